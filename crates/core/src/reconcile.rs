use serde::Serialize;

use crate::{Metrics, Seat};

/// Day keys touched by one reconciliation pass. Used for logging only and
/// discarded after emission; each key appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    pub updated: Vec<String>,
    pub added: Vec<String>,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.added.is_empty()
    }

    fn record_updated(&mut self, day: &str) {
        if !self.updated.iter().any(|value| value == day) {
            self.updated.push(day.to_string());
        }
    }

    fn record_added(&mut self, day: &str) {
        if !self.added.iter().any(|value| value == day) {
            self.added.push(day.to_string());
        }
    }
}

/// Result of merging a fetched batch into the persisted dataset. The caller
/// persists `merged` only when `changed()` is true; skipping the write on a
/// clean pass is an optimization, not a correctness requirement.
#[derive(Debug)]
pub struct MergeOutcome<T> {
    pub merged: Vec<T>,
    pub report: ChangeReport,
}

impl<T> MergeOutcome<T> {
    pub fn changed(&self) -> bool {
        !self.report.is_empty()
    }
}

/// Merges a fetched metrics batch into the existing dataset, keyed by `day`.
///
/// An incoming record whose day already exists replaces the stored record
/// wholesale; there is no field-level merge. Days never seen before are
/// appended in batch order. Re-merging an identical batch is a no-op, so the
/// operation is idempotent.
pub fn merge_metrics(latest: &[Metrics], mut existing: Vec<Metrics>) -> MergeOutcome<Metrics> {
    let mut report = ChangeReport::default();
    for incoming in latest {
        match existing.iter().position(|record| record.day == incoming.day) {
            Some(index) => {
                if existing[index] != *incoming {
                    existing[index] = incoming.clone();
                    report.record_updated(&incoming.day);
                }
            }
            None => {
                report.record_added(&incoming.day);
                existing.push(incoming.clone());
            }
        }
    }
    MergeOutcome {
        merged: existing,
        report,
    }
}

/// Merges a fetched seat batch into the existing dataset, keyed by seat `id`.
///
/// A seat already observed today gets a same-day refresh: only
/// `last_activity_at` is overwritten, and only when it differs. A seat whose
/// newest stored row is from an earlier day gets a fresh row dated `today`,
/// keeping one history row per distinct observation day. `today` is an
/// explicit parameter so late or replayed cycles stay under the caller's
/// control.
pub fn merge_seats(latest: &[Seat], mut existing: Vec<Seat>, today: &str) -> MergeOutcome<Seat> {
    let mut report = ChangeReport::default();
    for incoming in latest {
        // Match against the newest stored row for this id so a second pass on
        // the same day refreshes today's row instead of appending a duplicate.
        match existing.iter().rposition(|seat| seat.id == incoming.id) {
            Some(index) => {
                if existing[index].day == today {
                    if existing[index].last_activity_at != incoming.last_activity_at {
                        existing[index].last_activity_at = incoming.last_activity_at.clone();
                        report.record_updated(today);
                    }
                } else {
                    let mut seat = incoming.clone();
                    seat.day = today.to_string();
                    existing.push(seat);
                    report.record_added(today);
                }
            }
            None => {
                let mut seat = incoming.clone();
                seat.day = today.to_string();
                existing.push(seat);
                report.record_added(today);
            }
        }
    }
    MergeOutcome {
        merged: existing,
        report,
    }
}
