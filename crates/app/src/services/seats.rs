use copilot_core::{ChangeReport, Scope, ScopeType, Seat, merge_seats};
use copilot_github::SeatSource;
use copilot_store::{DayRange, Page};
use log::info;

use crate::error::{AppError, Result};
use crate::services::{CycleLocks, SharedConfig, open_seat_store, today, validate_range};

/// Fetches seat assignments and reconciles them into the persisted dataset.
/// Seats exist only for organizations; enterprise scopes are rejected up
/// front.
#[derive(Clone)]
pub struct SeatService {
    config: SharedConfig,
    source: SeatSource,
    locks: CycleLocks,
}

impl SeatService {
    pub(super) fn new(config: SharedConfig, source: SeatSource, locks: CycleLocks) -> Self {
        Self {
            config,
            source,
            locks,
        }
    }

    /// One fetch-and-reconcile pass dated with the local calendar day,
    /// waiting for any in-flight cycle on the same scope to finish first.
    pub async fn run_cycle(&self, scope: &Scope) -> Result<ChangeReport> {
        require_organization(scope)?;
        let lock = self.locks.for_key(&lock_key(scope));
        let _guard = lock.lock().await;
        self.cycle(scope, &today()).await
    }

    /// Scheduler entry point: skips the pass when a cycle for this scope is
    /// already running instead of queueing behind it.
    pub async fn try_run_cycle(&self, scope: &Scope) -> Result<Option<ChangeReport>> {
        require_organization(scope)?;
        let lock = self.locks.for_key(&lock_key(scope));
        match lock.try_lock() {
            Ok(_guard) => self.cycle(scope, &today()).await.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Cycle pinned to an explicit day; exercised directly by tests so the
    /// same-day and new-day merge branches are reproducible.
    pub async fn cycle_at(&self, scope: &Scope, day: &str) -> Result<ChangeReport> {
        require_organization(scope)?;
        let lock = self.locks.for_key(&lock_key(scope));
        let _guard = lock.lock().await;
        self.cycle(scope, day).await
    }

    async fn cycle(&self, scope: &Scope, day: &str) -> Result<ChangeReport> {
        let latest: Vec<Seat> = self.source.fetch_seats(&scope.name, day).await?;
        if latest.is_empty() {
            info!("no seat assignments returned for {}", scope.key());
            return Ok(ChangeReport::default());
        }
        let mut store = open_seat_store(&self.config)?;
        store.snapshot(scope, &latest)?;
        let existing = store.read_all(scope)?;
        let outcome = merge_seats(&latest, existing, day);
        if outcome.changed() {
            store.write_all(scope, &outcome.merged)?;
            info!(
                "seat dataset for {} changed: {} day(s) updated, {} day(s) added",
                scope.key(),
                outcome.report.updated.len(),
                outcome.report.added.len()
            );
        } else {
            info!("seat dataset for {} unchanged", scope.key());
        }
        Ok(outcome.report)
    }

    /// Reads a page of the persisted seat history in its natural order.
    pub fn query(
        &self,
        scope: &Scope,
        since: Option<String>,
        until: Option<String>,
        page: Page,
    ) -> Result<Vec<Seat>> {
        require_organization(scope)?;
        let range: DayRange = validate_range(since, until)?;
        let mut store = open_seat_store(&self.config)?;
        Ok(store.query(scope, &range, page)?)
    }
}

fn require_organization(scope: &Scope) -> Result<()> {
    if scope.scope_type != ScopeType::Organization {
        return Err(AppError::InvalidInput(
            "seat assignments are only available for organizations".to_string(),
        ));
    }
    Ok(())
}

fn lock_key(scope: &Scope) -> String {
    format!("seats:{}", scope.key())
}
