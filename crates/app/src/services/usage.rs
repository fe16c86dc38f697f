use copilot_core::{ChangeReport, Metrics, Scope, merge_metrics};
use copilot_github::MetricsSource;
use copilot_store::{DayRange, Page};
use log::info;

use crate::error::Result;
use crate::services::{CycleLocks, SharedConfig, open_usage_store, validate_range};

/// Fetches usage metrics and reconciles them into the persisted dataset.
#[derive(Clone)]
pub struct UsageService {
    config: SharedConfig,
    source: MetricsSource,
    locks: CycleLocks,
}

impl UsageService {
    pub(super) fn new(config: SharedConfig, source: MetricsSource, locks: CycleLocks) -> Self {
        Self {
            config,
            source,
            locks,
        }
    }

    /// One fetch-and-reconcile pass, waiting for any in-flight cycle on the
    /// same scope to finish first.
    pub async fn run_cycle(&self, scope: &Scope) -> Result<ChangeReport> {
        let lock = self.locks.for_key(&lock_key(scope));
        let _guard = lock.lock().await;
        self.cycle(scope).await
    }

    /// Scheduler entry point: skips the pass when a cycle for this scope is
    /// already running instead of queueing behind it.
    pub async fn try_run_cycle(&self, scope: &Scope) -> Result<Option<ChangeReport>> {
        let lock = self.locks.for_key(&lock_key(scope));
        match lock.try_lock() {
            Ok(_guard) => self.cycle(scope).await.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Fetch-and-reconcile pass for the configured team, stored as a dataset
    /// of its own next to the organization-wide one. A deployment without a
    /// team configured gets a no-op.
    pub async fn run_team_cycle(&self, org: &str) -> Result<Option<ChangeReport>> {
        let Some(team) = self.config.github.team.clone() else {
            return Ok(None);
        };
        let scope = team_scope(org, &team);
        let lock = self.locks.for_key(&lock_key(&scope));
        let _guard = lock.lock().await;

        let latest = self.source.fetch_team_metrics(org, &team).await?;
        self.reconcile(&scope, latest).map(Some)
    }

    async fn cycle(&self, scope: &Scope) -> Result<ChangeReport> {
        let latest = self.source.fetch_metrics(scope).await?;
        self.reconcile(scope, latest)
    }

    fn reconcile(&self, scope: &Scope, latest: Vec<Metrics>) -> Result<ChangeReport> {
        if latest.is_empty() {
            info!("no usage metrics returned for {}", scope.key());
            return Ok(ChangeReport::default());
        }
        let mut store = open_usage_store(&self.config)?;
        store.snapshot(scope, &latest)?;
        let existing = store.read_all(scope)?;
        let outcome = merge_metrics(&latest, existing);
        if outcome.changed() {
            store.write_all(scope, &outcome.merged)?;
            info!(
                "usage dataset for {} changed: {} day(s) updated, {} day(s) added",
                scope.key(),
                outcome.report.updated.len(),
                outcome.report.added.len()
            );
        } else {
            info!("usage dataset for {} unchanged", scope.key());
        }
        Ok(outcome.report)
    }

    /// Reads a page of the persisted dataset in its natural order.
    pub fn query(
        &self,
        scope: &Scope,
        since: Option<String>,
        until: Option<String>,
        page: Page,
    ) -> Result<Vec<Metrics>> {
        let range: DayRange = validate_range(since, until)?;
        let mut store = open_usage_store(&self.config)?;
        Ok(store.query(scope, &range, page)?)
    }
}

fn lock_key(scope: &Scope) -> String {
    format!("usage:{}", scope.key())
}

/// Team datasets reuse the scope machinery under a compound name, giving the
/// team its own file, partition or rows without widening the storage keys.
pub fn team_scope(org: &str, team: &str) -> Scope {
    Scope::organization(format!("{org}__{team}"))
}
