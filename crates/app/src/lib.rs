//! Application layer: configuration, the service registry and the
//! fetch-and-reconcile cycles that keep persisted datasets current.

pub mod config;
pub mod error;
pub mod services;

pub use config::{AppConfig, GithubSettings};
pub use error::{ApiError, AppError, Result};
pub use services::{AppServices, SeatService, UsageService};
