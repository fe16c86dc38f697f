use std::collections::HashMap;
use std::fs;
use std::path::Path;

use copilot_core::{BreakdownEntry, Metrics, Scope, Seat};
use rusqlite::{Connection, Row, params};

use crate::{DayRange, Page, Result, SeatStore, UsageStore};

const MIGRATION_0001: &str = include_str!("../migrations/0001_init.sql");

const MIGRATIONS: &[(&str, &str)] = &[("0001_init", MIGRATION_0001)];

/// Relational store: a parent aggregate-per-day table plus a child breakdown
/// table, both carrying the scope in their uniqueness constraint. The upsert
/// on write is a storage-level idempotence guard; the reconciliation engine
/// already decided what to persist. Natural order is insertion (rowid) order.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (_name, sql) in MIGRATIONS {
            tx.execute_batch(sql)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_metrics(
        &self,
        scope: &Scope,
        range: &DayRange,
    ) -> Result<Vec<Metrics>> {
        let mut sql = String::from(
            r#"
            SELECT day, total_suggestions_count, total_acceptances_count,
                   total_lines_suggested, total_lines_accepted, total_active_users,
                   total_chat_acceptances, total_chat_turns, total_active_chat_users
            FROM usage_metrics
            WHERE scope_type = ?1 AND scope_name = ?2
            "#,
        );
        if range.since.is_some() {
            sql.push_str(" AND day >= ?3");
        }
        if range.until.is_some() {
            sql.push_str(if range.since.is_some() {
                " AND day <= ?4"
            } else {
                " AND day <= ?3"
            });
        }
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let scope_type = scope.scope_type.as_str();
        let rows = match (&range.since, &range.until) {
            (Some(since), Some(until)) => stmt.query_map(
                params![scope_type, scope.name, since, until],
                row_to_metrics,
            )?,
            (Some(since), None) => {
                stmt.query_map(params![scope_type, scope.name, since], row_to_metrics)?
            }
            (None, Some(until)) => {
                stmt.query_map(params![scope_type, scope.name, until], row_to_metrics)?
            }
            (None, None) => stmt.query_map(params![scope_type, scope.name], row_to_metrics)?,
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn attach_breakdowns(&self, scope: &Scope, metrics: &mut [Metrics]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT day, language, editor, suggestions_count, acceptances_count,
                   lines_suggested, lines_accepted, active_users
            FROM usage_breakdown
            WHERE scope_type = ?1 AND scope_name = ?2
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![scope.scope_type.as_str(), scope.name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                BreakdownEntry {
                    language: row.get(1)?,
                    editor: row.get(2)?,
                    suggestions_count: row.get::<_, i64>(3)? as u64,
                    acceptances_count: row.get::<_, i64>(4)? as u64,
                    lines_suggested: row.get::<_, i64>(5)? as u64,
                    lines_accepted: row.get::<_, i64>(6)? as u64,
                    active_users: row.get::<_, i64>(7)? as u64,
                },
            ))
        })?;
        let mut by_day: HashMap<String, Vec<BreakdownEntry>> = HashMap::new();
        for row in rows {
            let (day, entry) = row?;
            by_day.entry(day).or_default().push(entry);
        }
        for metric in metrics {
            metric.breakdown = by_day.remove(&metric.day).unwrap_or_default();
        }
        Ok(())
    }
}

fn row_to_metrics(row: &Row<'_>) -> rusqlite::Result<Metrics> {
    Ok(Metrics {
        day: row.get(0)?,
        total_suggestions_count: row.get::<_, i64>(1)? as u64,
        total_acceptances_count: row.get::<_, i64>(2)? as u64,
        total_lines_suggested: row.get::<_, i64>(3)? as u64,
        total_lines_accepted: row.get::<_, i64>(4)? as u64,
        total_active_users: row.get::<_, i64>(5)? as u64,
        total_chat_acceptances: row.get::<_, i64>(6)? as u64,
        total_chat_turns: row.get::<_, i64>(7)? as u64,
        total_active_chat_users: row.get::<_, i64>(8)? as u64,
        breakdown: Vec::new(),
    })
}

fn row_to_seat(row: &Row<'_>) -> rusqlite::Result<Seat> {
    Ok(Seat {
        login: row.get(0)?,
        id: row.get(1)?,
        team: row.get(2)?,
        created_at: row.get(3)?,
        last_activity_at: row.get(4)?,
        last_activity_editor: row.get(5)?,
        day: row.get(6)?,
    })
}

impl UsageStore for SqliteStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Metrics>> {
        let mut metrics = self.load_metrics(scope, &DayRange::default())?;
        self.attach_breakdowns(scope, &mut metrics)?;
        Ok(metrics)
    }

    fn write_all(&mut self, scope: &Scope, dataset: &[Metrics]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut metrics_stmt = tx.prepare(
                r#"
                INSERT INTO usage_metrics (
                  day, scope_type, scope_name,
                  total_suggestions_count, total_acceptances_count,
                  total_lines_suggested, total_lines_accepted, total_active_users,
                  total_chat_acceptances, total_chat_turns, total_active_chat_users
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (day, scope_type, scope_name) DO UPDATE SET
                  total_suggestions_count = excluded.total_suggestions_count,
                  total_acceptances_count = excluded.total_acceptances_count,
                  total_lines_suggested = excluded.total_lines_suggested,
                  total_lines_accepted = excluded.total_lines_accepted,
                  total_active_users = excluded.total_active_users,
                  total_chat_acceptances = excluded.total_chat_acceptances,
                  total_chat_turns = excluded.total_chat_turns,
                  total_active_chat_users = excluded.total_active_chat_users
                "#,
            )?;
            // The engine persists records wholesale, so a day's breakdown
            // rows are cleared before re-insert; pairs the incoming record
            // dropped must not survive the rewrite.
            let mut clear_stmt = tx.prepare(
                "DELETE FROM usage_breakdown
                 WHERE day = ?1 AND scope_type = ?2 AND scope_name = ?3",
            )?;
            let mut breakdown_stmt = tx.prepare(
                r#"
                INSERT INTO usage_breakdown (
                  day, scope_type, scope_name, language, editor,
                  suggestions_count, acceptances_count, lines_suggested,
                  lines_accepted, active_users
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT (day, scope_type, scope_name, language, editor) DO UPDATE SET
                  suggestions_count = excluded.suggestions_count,
                  acceptances_count = excluded.acceptances_count,
                  lines_suggested = excluded.lines_suggested,
                  lines_accepted = excluded.lines_accepted,
                  active_users = excluded.active_users
                "#,
            )?;
            let scope_type = scope.scope_type.as_str();
            for record in dataset {
                metrics_stmt.execute(params![
                    record.day,
                    scope_type,
                    scope.name,
                    record.total_suggestions_count as i64,
                    record.total_acceptances_count as i64,
                    record.total_lines_suggested as i64,
                    record.total_lines_accepted as i64,
                    record.total_active_users as i64,
                    record.total_chat_acceptances as i64,
                    record.total_chat_turns as i64,
                    record.total_active_chat_users as i64,
                ])?;
                clear_stmt.execute(params![record.day, scope_type, scope.name])?;
                for entry in &record.breakdown {
                    breakdown_stmt.execute(params![
                        record.day,
                        scope_type,
                        scope.name,
                        entry.language,
                        entry.editor,
                        entry.suggestions_count as i64,
                        entry.acceptances_count as i64,
                        entry.lines_suggested as i64,
                        entry.lines_accepted as i64,
                        entry.active_users as i64,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Metrics>> {
        let filtered = self.load_metrics(scope, range)?;
        let mut paged = page.slice(filtered);
        self.attach_breakdowns(scope, &mut paged)?;
        Ok(paged)
    }
}

impl SeatStore for SqliteStore {
    fn read_all(&mut self, scope: &Scope) -> Result<Vec<Seat>> {
        self.load_seats(scope, &DayRange::default())
    }

    fn write_all(&mut self, scope: &Scope, dataset: &[Seat]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO seat_assignment (
                  scope_name, seat_id, day, login, team,
                  created_at, last_activity_at, last_activity_editor
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (scope_name, seat_id, day) DO UPDATE SET
                  login = excluded.login,
                  team = excluded.team,
                  created_at = excluded.created_at,
                  last_activity_at = excluded.last_activity_at,
                  last_activity_editor = excluded.last_activity_editor
                "#,
            )?;
            for seat in dataset {
                stmt.execute(params![
                    scope.name,
                    seat.id,
                    seat.day,
                    seat.login,
                    seat.team,
                    seat.created_at,
                    seat.last_activity_at,
                    seat.last_activity_editor,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query(&mut self, scope: &Scope, range: &DayRange, page: Page) -> Result<Vec<Seat>> {
        let filtered = self.load_seats(scope, range)?;
        Ok(page.slice(filtered))
    }
}

impl SqliteStore {
    fn load_seats(&self, scope: &Scope, range: &DayRange) -> Result<Vec<Seat>> {
        let mut sql = String::from(
            r#"
            SELECT login, seat_id, team, created_at, last_activity_at,
                   last_activity_editor, day
            FROM seat_assignment
            WHERE scope_name = ?1
            "#,
        );
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
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match (&range.since, &range.until) {
            (Some(since), Some(until)) => {
                stmt.query_map(params![scope.name, since, until], row_to_seat)?
            }
            (Some(since), None) => stmt.query_map(params![scope.name, since], row_to_seat)?,
            (None, Some(until)) => stmt.query_map(params![scope.name, until], row_to_seat)?,
            (None, None) => stmt.query_map(params![scope.name], row_to_seat)?,
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(day: &str, suggestions: u64) -> Metrics {
        Metrics {
            day: day.to_string(),
            total_suggestions_count: suggestions,
            total_acceptances_count: suggestions / 2,
            total_lines_suggested: 100,
            total_lines_accepted: 50,
            total_active_users: 3,
            total_chat_acceptances: 1,
            total_chat_turns: 4,
            total_active_chat_users: 2,
            breakdown: vec![
                BreakdownEntry {
                    language: "rust".to_string(),
                    editor: "vscode".to_string(),
                    suggestions_count: suggestions,
                    acceptances_count: suggestions / 2,
                    lines_suggested: 60,
                    lines_accepted: 30,
                    active_users: 2,
                },
                BreakdownEntry {
                    language: "go".to_string(),
                    editor: "neovim".to_string(),
                    suggestions_count: 1,
                    acceptances_count: 1,
                    lines_suggested: 40,
                    lines_accepted: 20,
                    active_users: 1,
                },
            ],
        }
    }

    fn seat(id: i64, day: &str, last_activity_at: &str) -> Seat {
        Seat {
            login: format!("user-{id}"),
            id,
            team: String::new(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            last_activity_at: Some(last_activity_at.to_string()),
            last_activity_editor: None,
            day: day.to_string(),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("tracker.sqlite")).expect("open sqlite store")
    }

    #[test]
    fn round_trips_metrics_with_breakdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        let dataset = vec![metrics("2024-01-01", 10), metrics("2024-01-02", 20)];
        UsageStore::write_all(&mut store, &scope, &dataset).expect("write");
        let read = UsageStore::read_all(&mut store, &scope).expect("read");
        assert_eq!(read, dataset);
    }

    #[test]
    fn upsert_replaces_the_existing_day() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        UsageStore::write_all(&mut store, &scope, &[metrics("2024-01-01", 10)]).expect("write");
        UsageStore::write_all(&mut store, &scope, &[metrics("2024-01-01", 99)]).expect("rewrite");
        let read = UsageStore::read_all(&mut store, &scope).expect("read");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].total_suggestions_count, 99);
        assert_eq!(read[0].breakdown[0].suggestions_count, 99);
    }

    #[test]
    fn rewrite_discards_dropped_breakdown_pairs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        // First write carries (rust, vscode) and (go, neovim).
        UsageStore::write_all(&mut store, &scope, &[metrics("2024-01-01", 10)]).expect("write");

        let mut shrunk = metrics("2024-01-01", 10);
        shrunk.breakdown.truncate(1);
        UsageStore::write_all(&mut store, &scope, &[shrunk.clone()]).expect("rewrite");

        let read = UsageStore::read_all(&mut store, &scope).expect("read");
        assert_eq!(read, vec![shrunk.clone()]);
        assert_eq!(read[0].breakdown.len(), 1);
        assert_eq!(read[0].breakdown[0].language, "rust");

        // With the stored record equal to the persisted one, re-merging the
        // same batch settles instead of reporting an update every cycle.
        let outcome = copilot_core::merge_metrics(&[shrunk], read);
        assert!(!outcome.changed());
    }

    #[test]
    fn open_creates_a_missing_data_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("data").join("tracker.sqlite");
        let mut store = SqliteStore::open(&path).expect("open creates parent dirs");
        let scope = Scope::organization("octo");
        UsageStore::write_all(&mut store, &scope, &[metrics("2024-01-01", 10)]).expect("write");
        assert!(path.exists());
    }

    #[test]
    fn natural_order_is_insertion_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        // Days arrive out of calendar order; reads must not re-sort them.
        UsageStore::write_all(
            &mut store,
            &scope,
            &[metrics("2024-01-03", 1), metrics("2024-01-01", 2)],
        )
        .expect("write");
        let read = UsageStore::read_all(&mut store, &scope).expect("read");
        assert_eq!(read[0].day, "2024-01-03");
        assert_eq!(read[1].day, "2024-01-01");
    }

    #[test]
    fn scope_types_do_not_collide() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let org = Scope::organization("octo");
        let ent = Scope::enterprise("octo");
        UsageStore::write_all(&mut store, &org, &[metrics("2024-01-01", 10)]).expect("write");
        UsageStore::write_all(&mut store, &ent, &[metrics("2024-01-01", 77)]).expect("write");
        let read = UsageStore::read_all(&mut store, &org).expect("read");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].total_suggestions_count, 10);
    }

    #[test]
    fn query_filters_and_paginates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        let dataset: Vec<Metrics> = (1..=30)
            .map(|n| metrics(&format!("2024-01-{n:02}"), n))
            .collect();
        UsageStore::write_all(&mut store, &scope, &dataset).expect("write");

        let result = UsageStore::query(
            &mut store,
            &scope,
            &DayRange {
                since: Some("2024-01-10".to_string()),
                until: None,
            },
            Page {
                page: 2,
                per_page: 5,
            },
        )
        .expect("query");
        assert_eq!(result.len(), 5);
        assert_eq!(result[0].day, "2024-01-15");
        assert!(!result[0].breakdown.is_empty());

        let empty = UsageStore::query(
            &mut store,
            &scope,
            &DayRange::default(),
            Page {
                page: 999,
                per_page: 28,
            },
        )
        .expect("query");
        assert!(empty.is_empty());
    }

    #[test]
    fn seat_upsert_keeps_one_row_per_id_and_day() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        SeatStore::write_all(
            &mut store,
            &scope,
            &[seat(42, "2024-03-01", "2024-03-01T08:00")],
        )
        .expect("write");
        SeatStore::write_all(
            &mut store,
            &scope,
            &[
                seat(42, "2024-03-01", "2024-03-01T11:30"),
                seat(42, "2024-03-02", "2024-03-02T09:00"),
            ],
        )
        .expect("rewrite");
        let read = SeatStore::read_all(&mut store, &scope).expect("read");
        assert_eq!(read.len(), 2);
        assert_eq!(
            read[0].last_activity_at.as_deref(),
            Some("2024-03-01T11:30")
        );
        assert_eq!(read[1].day, "2024-03-02");
    }

    #[test]
    fn seat_query_filters_by_day() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = open_store(&dir);
        let scope = Scope::organization("octo");
        SeatStore::write_all(
            &mut store,
            &scope,
            &[
                seat(1, "2024-02-28", "2024-02-28T09:00"),
                seat(1, "2024-03-01", "2024-03-01T09:00"),
                seat(2, "2024-03-01", "2024-03-01T10:00"),
            ],
        )
        .expect("write");
        let result = SeatStore::query(
            &mut store,
            &scope,
            &DayRange {
                since: Some("2024-03-01".to_string()),
                until: Some("2024-03-01".to_string()),
            },
            Page {
                page: 1,
                per_page: 28,
            },
        )
        .expect("query");
        assert_eq!(result.len(), 2);
    }
}
