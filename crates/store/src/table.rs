use std::fs;
use std::path::Path;

use copilot_core::{Metrics, Scope, Seat};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{DayRange, Page, Result, SeatStore, UsageStore};

const TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_entity (
  partition_key TEXT NOT NULL,
  row_key TEXT NOT NULL,
  day TEXT NOT NULL,
  payload TEXT NOT NULL,
  PRIMARY KEY (partition_key, row_key)
);
CREATE TABLE IF NOT EXISTS seat_entity (
  partition_key TEXT NOT NULL,
  row_key TEXT NOT NULL,
  day TEXT NOT NULL,
  payload TEXT NOT NULL,
  PRIMARY KEY (partition_key, row_key)
);
"#;

/// Managed-table store: each record is one entity row keyed by
/// (partition key = scope, row key = day plus record identity), with the
/// record serialized into a single JSON payload column. Natural order is
/// row-key order. Writes are `INSERT OR REPLACE`, so repeating a persist is
/// harmless.
pub struct TableStore {
    conn: Connection,
}

impl TableStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(TABLE_SCHEMA)?;
        Ok(Self { conn })
    }

    fn read_entities<T: DeserializeOwned>(
        &self,
        table: &str,
        scope: &Scope,
        range: &DayRange,
    ) -> Result<Vec<T>> {
        let mut sql = format!("SELECT payload FROM {table} WHERE partition_key = ?1");
        if range.since.is_some() {
            sql.push_str(" AND day >= ?2");
        }
        if range.until.is_some() {
            sql.push_str(if range.since.is_some() {
                " AND day <= ?3"
            } else {
                " AND day <= ?2"
            });
        }
        sql.push_str(" ORDER BY row_key ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let parse = |row: &rusqlite::Row<'_>| row.get::<_, String>(0);
        let rows = match (&range.since, &range.until) {
            (Some(since), Some(until)) => {
                stmt.query_map(params![scope.key(), since, until], parse)?
            }
            (Some(since), None) => stmt.query_map(params![scope.key(), since], parse)?,
            (None, Some(until)) => stmt.query_map(params![scope.key(), until], parse)?,
            (None, None) => stmt.query_map(params![scope.key()], parse)?,
        };
        let payloads = rows.collect::<std::result::Result<Vec<String>, _>>()?;
        payloads
            .iter()
            .map(|payload| Ok(serde_json::from_str(payload)?))
            .collect()
    }

    fn write_entities<T: Serialize>(
        &mut self,
        table: &str,
        scope: &Scope,
        rows: &[(String, String, &T)],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table} (partition_key, row_key, day, payload)
                 VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for (row_key, day, record) in rows {
                stmt.execute(params![
                    scope.key(),
                    row_key,
                    day,
                    serde_json::to_string(record)?
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl UsageStore for TableStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Metrics>> {
        self.read_entities("usage_entity", scope, &DayRange::default())
    }

    fn write_all(&mut self, scope: &Scope, dataset: &[Metrics]) -> Result<()> {
        let rows: Vec<(String, String, &Metrics)> = dataset
            .iter()
            .map(|record| {
                (
                    format!("{}_{}", record.day, scope.name),
                    record.day.clone(),
                    record,
                )
            })
            .collect();
        self.write_entities("usage_entity", scope, &rows)
    }

    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Metrics>> {
        let filtered = self.read_entities("usage_entity", scope, range)?;
        Ok(page.slice(filtered))
    }
}

impl SeatStore for TableStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Seat>> {
        self.read_entities("seat_entity", scope, &DayRange::default())
    }

    fn write_all(&mut self, scope: &Scope, dataset: &[Seat]) -> Result<()> {
        let rows: Vec<(String, String, &Seat)> = dataset
            .iter()
            .map(|seat| (format!("{}_{}", seat.day, seat.id), seat.day.clone(), seat))
            .collect();
        self.write_entities("seat_entity", scope, &rows)
    }

    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Seat>> {
        let filtered = self.read_entities("seat_entity", scope, range)?;
        Ok(page.slice(filtered))
    }
}
