mod errors;
mod handlers;
mod state;

use axum::{Router, routing::get};

pub use state::HttpState;

pub fn router(state: HttpState) -> Router<()> {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/:scope_name/metrics/service", get(handlers::metrics_service))
        .route("/:scope_name/seats/service", get(handlers::seats_service))
        .with_state(state)
}
