use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use copilot_store::Page;
use serde::Deserialize;
use serde_json::json;

use crate::{errors::HttpError, state::HttpState};

const DEFAULT_PER_PAGE: u32 = 60;

/// Query string shared by both service routes: an optional inclusive day
/// range plus 1-based pagination.
#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ServiceQuery {
    fn page(&self) -> Page {
        Page {
            page: self.page.unwrap_or(1).max(1),
            per_page: self.per_page.unwrap_or(DEFAULT_PER_PAGE),
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Runs a usage cycle for the scope, then serves the requested page of the
/// reconciled dataset.
pub async fn metrics_service(
    State(state): State<HttpState>,
    Path(scope_name): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let scope = state.config.scope(&scope_name)?;
    state.services.usage.run_cycle(&scope).await?;
    let records =
        state
            .services
            .usage
            .query(&scope, query.since.clone(), query.until.clone(), query.page())?;
    Ok(Json(records))
}

/// Runs a seat cycle for the scope, then serves the requested page of the
/// seat history. Enterprise scopes are rejected with 400.
pub async fn seats_service(
    State(state): State<HttpState>,
    Path(scope_name): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let scope = state.config.scope(&scope_name)?;
    state.services.seats.run_cycle(&scope).await?;
    let records =
        state
            .services
            .seats
            .query(&scope, query.since.clone(), query.until.clone(), query.page())?;
    Ok(Json(records))
}
