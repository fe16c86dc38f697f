use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use copilot_core::{Metrics, Scope, Seat};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DayRange, Page, Result, SeatStore, StoreError, UsageStore};

/// File-backed store: one JSON array file per scope acts as the authoritative
/// merged dataset, plus a timestamped snapshot file per fetch as an audit
/// trail that is never read back.
pub struct FileStore {
    data_dir: PathBuf,
}

/// On-disk layout for seats: rows are grouped into one bucket per
/// observation day.
#[derive(Debug, Serialize, Deserialize)]
struct SeatDayBucket {
    day: String,
    seats: Vec<Seat>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn scope_file(&self, scope: &Scope, kind: &str) -> PathBuf {
        self.data_dir.join(format!("{}_{kind}.json", scope.key()))
    }

    fn snapshot_file(&self, scope: &Scope, kind: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M");
        let suffix: u32 = rand::thread_rng().gen_range(10..100);
        self.data_dir
            .join(format!("{}_{timestamp}_{suffix}_{kind}.json", scope.key()))
    }

    fn ensure_scope_file(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        if !path.exists() {
            fs::write(path, "[]")?;
        }
        Ok(())
    }

    fn read_array(&self, path: &Path) -> Result<Value> {
        self.ensure_scope_file(path)?;
        let data = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&data).map_err(|err| {
            StoreError::MalformedDataset(format!("{}: {err}", path.display()))
        })?;
        if !value.is_array() {
            return Err(StoreError::MalformedDataset(format!(
                "{}: expected a JSON array",
                path.display()
            )));
        }
        Ok(value)
    }

    fn write_pretty<T: Serialize>(&self, path: &Path, records: &T) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::write(path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}

impl UsageStore for FileStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Metrics>> {
        let value = self.read_array(&self.scope_file(scope, "metrics"))?;
        Ok(serde_json::from_value(value)?)
    }

    fn write_all(&mut self, scope: &Scope, dataset: &[Metrics]) -> Result<()> {
        self.write_pretty(&self.scope_file(scope, "metrics"), &dataset)
    }

    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Metrics>> {
        let dataset = UsageStore::read_all(self, scope)?;
        let filtered: Vec<Metrics> = dataset
            .into_iter()
            .filter(|record| range.contains(&record.day))
            .collect();
        Ok(page.slice(filtered))
    }

    fn snapshot(&mut self, scope: &Scope, batch: &[Metrics]) -> Result<()> {
        let path = self.snapshot_file(scope, "metrics");
        self.write_pretty(&path, &batch)?;
        info!("wrote metrics snapshot {}", path.display());
        Ok(())
    }
}

impl SeatStore for FileStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Seat>> {
        let value = self.read_array(&self.scope_file(scope, "seats"))?;
        let buckets: Vec<SeatDayBucket> = serde_json::from_value(value)?;
        Ok(buckets.into_iter().flat_map(|bucket| bucket.seats).collect())
    }

    fn write_all(&mut self, scope: &Scope, dataset: &[Seat]) -> Result<()> {
        // Group rows into day buckets, keeping the first-seen order of days
        // and the row order within each day.
        let mut buckets: Vec<SeatDayBucket> = Vec::new();
        for seat in dataset {
            match buckets.iter_mut().find(|bucket| bucket.day == seat.day) {
                Some(bucket) => bucket.seats.push(seat.clone()),
                None => buckets.push(SeatDayBucket {
                    day: seat.day.clone(),
                    seats: vec![seat.clone()],
                }),
            }
        }
        self.write_pretty(&self.scope_file(scope, "seats"), &buckets)
    }

    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Seat>> {
        let dataset = SeatStore::read_all(self, scope)?;
        let filtered: Vec<Seat> = dataset
            .into_iter()
            .filter(|seat| range.contains(&seat.day))
            .collect();
        Ok(page.slice(filtered))
    }

    fn snapshot(&mut self, scope: &Scope, batch: &[Seat]) -> Result<()> {
        let path = self.snapshot_file(scope, "seats");
        self.write_pretty(&path, &batch)?;
        info!("wrote seats snapshot {}", path.display());
        Ok(())
    }
}
