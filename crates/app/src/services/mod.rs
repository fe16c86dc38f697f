mod seats;
mod usage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Local, NaiveDate};
use copilot_github::{FixtureSource, GithubClient, MetricsSource, SeatSource};
use copilot_store::{
    DayRange, FileStore, SeatStore, SqliteStore, StorageKind, TableStore, UsageStore,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::AppConfig;
use crate::error::{AppError, Result};

pub use seats::SeatService;
pub use usage::UsageService;

pub(crate) type SharedConfig = Arc<AppConfig>;

/// Service registry for app-level operations.
#[derive(Clone)]
pub struct AppServices {
    pub usage: UsageService,
    pub seats: SeatService,
}

impl AppServices {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let shared = Arc::new(config.clone());
        let locks = CycleLocks::default();
        let (metrics_source, seat_source) = build_sources(&shared)?;
        Ok(Self {
            usage: UsageService::new(shared.clone(), metrics_source, locks.clone()),
            seats: SeatService::new(shared, seat_source, locks),
        })
    }
}

fn build_sources(config: &SharedConfig) -> Result<(MetricsSource, SeatSource)> {
    if config.mocked {
        let fixture = FixtureSource::embedded(config.scope_type)?;
        return Ok((
            MetricsSource::Fixture(fixture.clone()),
            SeatSource::Fixture(fixture),
        ));
    }
    let client = GithubClient::new(&config.github.api_url, &config.github.token)?;
    Ok((
        MetricsSource::Github(client.clone()),
        SeatSource::Github(client),
    ))
}

/// One async mutex per (dataset, scope) key, so a scheduled cycle and a
/// request-triggered cycle for the same dataset never interleave while
/// different datasets stay independent.
#[derive(Clone, Default)]
pub(crate) struct CycleLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CycleLocks {
    pub(crate) fn for_key(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }
}

pub(crate) fn open_usage_store(config: &SharedConfig) -> Result<Box<dyn UsageStore + Send>> {
    Ok(match config.storage {
        StorageKind::File => Box::new(FileStore::new(&config.data_dir)),
        StorageKind::Table => Box::new(TableStore::open(
            config.data_dir.join("copilot-entities.sqlite"),
        )?),
        StorageKind::Database => Box::new(SqliteStore::open(&config.db_path)?),
    })
}

pub(crate) fn open_seat_store(config: &SharedConfig) -> Result<Box<dyn SeatStore + Send>> {
    Ok(match config.storage {
        StorageKind::File => Box::new(FileStore::new(&config.data_dir)),
        StorageKind::Table => Box::new(TableStore::open(
            config.data_dir.join("copilot-entities.sqlite"),
        )?),
        StorageKind::Database => Box::new(SqliteStore::open(&config.db_path)?),
    })
}

/// Validates query bounds as ISO dates before they reach a store.
pub(crate) fn validate_range(since: Option<String>, until: Option<String>) -> Result<DayRange> {
    for value in since.iter().chain(until.iter()) {
        if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
            return Err(AppError::InvalidInput(format!(
                "invalid date '{value}', expected YYYY-MM-DD"
            )));
        }
    }
    Ok(DayRange { since, until })
}

pub(crate) fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_validation_accepts_iso_dates_and_open_bounds() {
        assert!(validate_range(None, None).is_ok());
        assert!(validate_range(Some("2024-01-01".to_string()), None).is_ok());
        let err = validate_range(Some("01/01/2024".to_string()), None).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn cycle_locks_hand_out_one_mutex_per_key() {
        let locks = CycleLocks::default();
        let first = locks.for_key("usage:organization_octo");
        let again = locks.for_key("usage:organization_octo");
        let other = locks.for_key("seats:organization_octo");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
