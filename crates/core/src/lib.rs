use serde::{Deserialize, Serialize};
use std::fmt;

mod reconcile;

pub use reconcile::{ChangeReport, MergeOutcome, merge_metrics, merge_seats};

/// Kind of GitHub entity whose Copilot usage is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Organization,
    Enterprise,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Organization => "organization",
            ScopeType::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The organization or enterprise a dataset belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub name: String,
}

impl Scope {
    pub fn organization(name: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Organization,
            name: name.into(),
        }
    }

    pub fn enterprise(name: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Enterprise,
            name: name.into(),
        }
    }

    /// Stable key used for file names, table partitions and locks.
    pub fn key(&self) -> String {
        format!("{}_{}", self.scope_type, self.name)
    }
}

/// Per (language, editor) slice of one day's usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub language: String,
    pub editor: String,
    pub suggestions_count: u64,
    pub acceptances_count: u64,
    pub lines_suggested: u64,
    pub lines_accepted: u64,
    pub active_users: u64,
}

/// One day's aggregate Copilot usage for a scope. `day` (YYYY-MM-DD) is the
/// natural key within a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub day: String,
    pub total_suggestions_count: u64,
    pub total_acceptances_count: u64,
    pub total_lines_suggested: u64,
    pub total_lines_accepted: u64,
    pub total_active_users: u64,
    #[serde(default)]
    pub total_chat_acceptances: u64,
    #[serde(default)]
    pub total_chat_turns: u64,
    #[serde(default)]
    pub total_active_chat_users: u64,
    pub breakdown: Vec<BreakdownEntry>,
}

/// One person's seat assignment as observed on `day`. `id` is the assignee
/// identity and the merge key; `day` records when the observation was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub team: String,
    pub created_at: String,
    #[serde(default)]
    pub last_activity_at: Option<String>,
    #[serde(default)]
    pub last_activity_editor: Option<String>,
    pub day: String,
}
