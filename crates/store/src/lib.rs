//! Durable storage for reconciled Copilot usage and seat datasets.
//!
//! Three interchangeable backends satisfy the same contract: a JSON file per
//! scope, a key-value entity table, and a relational two-table schema. The
//! reconciliation engine decides what to persist; backends only store the
//! result, so their own upsert paths are idempotence guards rather than a
//! second merge.

use std::str::FromStr;

use copilot_core::{Metrics, Scope, Seat};

mod file;
mod sqlite;
mod table;

pub use file::FileStore;
pub use sqlite::SqliteStore;
pub use table::TableStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed dataset: {0}")]
    MalformedDataset(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Which backend a deployment persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Table,
    Database,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "file" => Ok(StorageKind::File),
            "table" => Ok(StorageKind::Table),
            "database" => Ok(StorageKind::Database),
            other => Err(format!(
                "unknown storage backend '{other}', expected file, table or database"
            )),
        }
    }
}

/// Inclusive day-range filter; a missing bound leaves that side unbounded.
/// Day keys are ISO dates, so lexicographic comparison is chronological.
#[derive(Debug, Clone, Default)]
pub struct DayRange {
    pub since: Option<String>,
    pub until: Option<String>,
}

impl DayRange {
    pub fn contains(&self, day: &str) -> bool {
        if let Some(since) = &self.since {
            if day < since.as_str() {
                return false;
            }
        }
        if let Some(until) = &self.until {
            if day > until.as_str() {
                return false;
            }
        }
        true
    }
}

/// 1-based page slice. A page past the end of the data yields an empty
/// result, never an error.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn slice<T>(&self, records: Vec<T>) -> Vec<T> {
        let page = self.page.max(1) as usize;
        let per_page = self.per_page as usize;
        records
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect()
    }
}

/// Durable store for one scope's metrics dataset.
///
/// `read_all` returns an empty dataset when nothing was persisted yet;
/// "not found" is never an error. `write_all` must be safe to repeat with
/// the same content. `query` keeps the dataset's natural order.
pub trait UsageStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Metrics>>;
    fn write_all(&mut self, scope: &Scope, dataset: &[Metrics]) -> Result<()>;
    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Metrics>>;

    /// Audit copy of a fetched batch. Only the file backend keeps one.
    fn snapshot(&mut self, _scope: &Scope, _batch: &[Metrics]) -> Result<()> {
        Ok(())
    }
}

/// Durable store for one scope's seat dataset; same contract as
/// [`UsageStore`].
pub trait SeatStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Seat>>;
    fn write_all(&mut self, scope: &Scope, dataset: &[Seat]) -> Result<()>;
    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Seat>>;

    fn snapshot(&mut self, _scope: &Scope, _batch: &[Seat]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_kind_parses_known_values() {
        assert_eq!("file".parse::<StorageKind>().unwrap(), StorageKind::File);
        assert_eq!("table".parse::<StorageKind>().unwrap(), StorageKind::Table);
        assert_eq!(
            "database".parse::<StorageKind>().unwrap(),
            StorageKind::Database
        );
        assert!("blob".parse::<StorageKind>().is_err());
    }

    #[test]
    fn day_range_bounds_are_inclusive() {
        let range = DayRange {
            since: Some("2024-01-02".to_string()),
            until: Some("2024-01-04".to_string()),
        };
        assert!(!range.contains("2024-01-01"));
        assert!(range.contains("2024-01-02"));
        assert!(range.contains("2024-01-04"));
        assert!(!range.contains("2024-01-05"));
    }

    #[test]
    fn unbounded_range_contains_everything() {
        let range = DayRange::default();
        assert!(range.contains("1999-12-31"));
        assert!(range.contains("2099-01-01"));
    }

    #[test]
    fn page_slices_by_position() {
        let records: Vec<u32> = (1..=100).collect();
        let page = Page {
            page: 2,
            per_page: 28,
        };
        let sliced = page.slice(records);
        assert_eq!(sliced.first(), Some(&29));
        assert_eq!(sliced.last(), Some(&56));
        assert_eq!(sliced.len(), 28);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let records: Vec<u32> = (1..=10).collect();
        let page = Page {
            page: 999,
            per_page: 28,
        };
        assert!(page.slice(records).is_empty());
    }
}
