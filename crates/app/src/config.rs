use std::path::PathBuf;
use std::str::FromStr;

use copilot_core::{Scope, ScopeType};
use copilot_store::StorageKind;

use crate::error::{AppError, Result};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CYCLE_HOURS: u64 = 12;

/// Settings for talking to the GitHub API.
#[derive(Clone, Debug)]
pub struct GithubSettings {
    pub api_url: String,
    pub token: String,
    /// Optional team slug whose usage is tracked alongside each organization.
    pub team: Option<String>,
}

/// Deployment configuration, read from the environment at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub scope_type: ScopeType,
    pub scope_names: Vec<String>,
    pub github: GithubSettings,
    pub storage: StorageKind,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub mocked: bool,
    pub port: u16,
    pub cycle_hours: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an injectable lookup so tests can run
    /// without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let scope_type = match lookup("GITHUB_SCOPE").as_deref() {
            Some("organization") => ScopeType::Organization,
            Some("enterprise") => ScopeType::Enterprise,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "GITHUB_SCOPE must be 'organization' or 'enterprise', got '{other}'"
                )));
            }
            None => {
                return Err(AppError::Config(
                    "GITHUB_SCOPE is required".to_string(),
                ));
            }
        };

        let names_var = match scope_type {
            ScopeType::Organization => "GITHUB_ORGS",
            ScopeType::Enterprise => "GITHUB_ENT",
        };
        let scope_names = split_names(lookup(names_var).as_deref().unwrap_or(""));
        if scope_names.is_empty() {
            return Err(AppError::Config(format!(
                "{names_var} must list at least one {scope_type} name"
            )));
        }

        let mocked = lookup("MOCKED_DATA")
            .as_deref()
            .map(parse_bool)
            .unwrap_or(false);
        let token = lookup("GITHUB_TOKEN").unwrap_or_default();
        if token.is_empty() && !mocked {
            return Err(AppError::Config(
                "GITHUB_TOKEN is required unless MOCKED_DATA is set".to_string(),
            ));
        }

        let storage = match lookup("STORAGE_BACKEND") {
            Some(value) => StorageKind::from_str(&value).map_err(AppError::Config)?,
            None => StorageKind::File,
        };

        let data_dir = PathBuf::from(
            lookup("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );
        let db_path = data_dir.join("copilot-tracker.sqlite");

        let port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("PORT must be a port number, got '{value}'")))?,
            None => DEFAULT_PORT,
        };

        let cycle_hours = match lookup("CYCLE_HOURS") {
            Some(value) => {
                let hours = value.parse::<u64>().map_err(|_| {
                    AppError::Config(format!("CYCLE_HOURS must be a number of hours, got '{value}'"))
                })?;
                if hours == 0 {
                    return Err(AppError::Config(
                        "CYCLE_HOURS must be at least 1".to_string(),
                    ));
                }
                hours
            }
            None => DEFAULT_CYCLE_HOURS,
        };

        Ok(Self {
            scope_type,
            scope_names,
            github: GithubSettings {
                api_url: lookup("GITHUB_API_URL")
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                token,
                team: lookup("GITHUB_TEAM").filter(|team| !team.trim().is_empty()),
            },
            storage,
            data_dir,
            db_path,
            mocked,
            port,
            cycle_hours,
        })
    }

    /// Every configured scope, in configuration order.
    pub fn scopes(&self) -> Vec<Scope> {
        self.scope_names
            .iter()
            .map(|name| Scope {
                scope_type: self.scope_type,
                name: name.clone(),
            })
            .collect()
    }

    /// Resolves a request path segment to a configured scope.
    pub fn scope(&self, name: &str) -> Result<Scope> {
        if self.scope_names.iter().any(|candidate| candidate == name) {
            Ok(Scope {
                scope_type: self.scope_type,
                name: name.to_string(),
            })
        } else {
            Err(AppError::NotFound(format!("unknown scope '{name}'")))
        }
    }
}

fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
