//! Source adapters for the GitHub Copilot usage and billing-seats endpoints:
//! a paginating HTTP client plus a fixture source for mocked deployments and
//! tests.

mod client;
mod fixtures;
mod source;

pub use client::GithubClient;
pub use fixtures::FixtureSource;
pub use source::{MetricsSource, SeatSource};

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GithubError>;
