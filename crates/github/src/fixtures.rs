use copilot_core::{Metrics, ScopeType, Seat};

use crate::client::{self, SeatsPage};
use crate::{GithubError, Result};

const ORGANIZATION_USAGE: &str = include_str!("../assets/organization_usage_sample.json");
const ENTERPRISE_USAGE: &str = include_str!("../assets/enterprise_usage_sample.json");
const ORGANIZATION_SEATS: &str = include_str!("../assets/organization_seats_sample.json");

/// Canned source for mocked deployments: serves embedded sample payloads in
/// the same shape the live endpoints produce, without any network access.
#[derive(Clone)]
pub struct FixtureSource {
    metrics: Vec<Metrics>,
    seats: Vec<Seat>,
}

impl FixtureSource {
    pub fn new(metrics: Vec<Metrics>, seats: Vec<Seat>) -> Self {
        Self { metrics, seats }
    }

    /// Fixture backed by the bundled sample payloads for the given scope
    /// type. Seats carry no day of their own until retagged by `seats`.
    pub fn embedded(scope_type: ScopeType) -> Result<Self> {
        let usage = match scope_type {
            ScopeType::Organization => ORGANIZATION_USAGE,
            ScopeType::Enterprise => ENTERPRISE_USAGE,
        };
        let metrics: Vec<Metrics> = serde_json::from_str(usage)
            .map_err(|err| GithubError::MalformedResponse(format!("usage sample: {err}")))?;
        let page: SeatsPage = serde_json::from_str(ORGANIZATION_SEATS)
            .map_err(|err| GithubError::MalformedResponse(format!("seats sample: {err}")))?;
        let seats = page
            .seats
            .into_iter()
            .map(|raw| client::map_seat(raw, ""))
            .collect();
        Ok(Self { metrics, seats })
    }

    pub fn metrics(&self) -> Vec<Metrics> {
        self.metrics.clone()
    }

    /// Seats re-dated to `today`, mirroring how a live fetch stamps the
    /// observation day.
    pub fn seats(&self, today: &str) -> Vec<Seat> {
        self.seats
            .iter()
            .cloned()
            .map(|mut seat| {
                seat.day = today.to_string();
                seat
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_organization_fixture_parses() {
        let fixture = FixtureSource::embedded(ScopeType::Organization).expect("fixture");
        let metrics = fixture.metrics();
        assert!(!metrics.is_empty());
        assert!(metrics.iter().all(|m| !m.day.is_empty()));
    }

    #[test]
    fn embedded_enterprise_fixture_parses() {
        let fixture = FixtureSource::embedded(ScopeType::Enterprise).expect("fixture");
        assert!(!fixture.metrics().is_empty());
    }

    #[test]
    fn seats_are_retagged_with_the_requested_day() {
        let fixture = FixtureSource::embedded(ScopeType::Organization).expect("fixture");
        let seats = fixture.seats("2024-03-01");
        assert!(!seats.is_empty());
        assert!(seats.iter().all(|seat| seat.day == "2024-03-01"));
    }
}
