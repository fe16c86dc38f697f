use copilot_core::{Metrics, Scope, Seat};

use crate::{FixtureSource, GithubClient, Result};

/// Where usage metrics come from: the live API or an embedded fixture.
#[derive(Clone)]
pub enum MetricsSource {
    Github(GithubClient),
    Fixture(FixtureSource),
}

impl MetricsSource {
    pub async fn fetch_metrics(&self, scope: &Scope) -> Result<Vec<Metrics>> {
        match self {
            MetricsSource::Github(client) => client.fetch_metrics(scope).await,
            MetricsSource::Fixture(fixture) => Ok(fixture.metrics()),
        }
    }

    pub async fn fetch_team_metrics(&self, org: &str, team: &str) -> Result<Vec<Metrics>> {
        match self {
            MetricsSource::Github(client) => client.fetch_team_metrics(org, team).await,
            MetricsSource::Fixture(fixture) => {
                if team.trim().is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(fixture.metrics())
                }
            }
        }
    }
}

/// Where seat assignments come from: the live API or an embedded fixture.
#[derive(Clone)]
pub enum SeatSource {
    Github(GithubClient),
    Fixture(FixtureSource),
}

impl SeatSource {
    pub async fn fetch_seats(&self, org: &str, today: &str) -> Result<Vec<Seat>> {
        match self {
            SeatSource::Github(client) => client.fetch_seats(org, today).await,
            SeatSource::Fixture(fixture) => Ok(fixture.seats(today)),
        }
    }
}
