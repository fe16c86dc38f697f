use std::sync::Arc;
use std::time::Duration;

use copilot_app::{AppConfig, AppServices};
use copilot_core::{Scope, ScopeType};
use http_api::HttpState;
use log::{error, info, warn};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    let services = match AppServices::new(&config) {
        Ok(services) => services,
        Err(err) => {
            eprintln!("failed to initialize services: {err}");
            std::process::exit(1);
        }
    };

    let config = Arc::new(config);
    let state = HttpState::new(config.clone(), services.clone());
    tokio::spawn(run_scheduler(config.clone(), services));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("bind server");
    info!("listening on {addr}");
    axum::serve(listener, http_api::router(state))
        .await
        .expect("serve");
}

/// Runs one collection pass per configured scope every `cycle_hours`. The
/// first tick fires immediately, so datasets are populated at startup.
async fn run_scheduler(config: Arc<AppConfig>, services: AppServices) {
    let period = Duration::from_secs(config.cycle_hours * 60 * 60);
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        for scope in config.scopes() {
            run_scope_pass(&services, &scope).await;
        }
    }
}

/// One scope's scheduled pass. A failing cycle is logged and never stops the
/// pass for the remaining datasets or scopes.
async fn run_scope_pass(services: &AppServices, scope: &Scope) {
    match services.usage.try_run_cycle(scope).await {
        Ok(Some(report)) if report.is_empty() => {
            info!("usage cycle for {}: no changes", scope.key());
        }
        Ok(Some(report)) => {
            info!(
                "usage cycle for {}: {} day(s) updated, {} day(s) added",
                scope.key(),
                report.updated.len(),
                report.added.len()
            );
        }
        Ok(None) => {
            warn!(
                "usage cycle for {} skipped, previous run still active",
                scope.key()
            );
        }
        Err(err) => error!("usage cycle for {} failed: {err}", scope.key()),
    }

    if scope.scope_type != ScopeType::Organization {
        return;
    }

    match services.seats.try_run_cycle(scope).await {
        Ok(Some(report)) if report.is_empty() => {
            info!("seat cycle for {}: no changes", scope.key());
        }
        Ok(Some(report)) => {
            info!(
                "seat cycle for {}: {} day(s) updated, {} day(s) added",
                scope.key(),
                report.updated.len(),
                report.added.len()
            );
        }
        Ok(None) => {
            warn!(
                "seat cycle for {} skipped, previous run still active",
                scope.key()
            );
        }
        Err(err) => error!("seat cycle for {} failed: {err}", scope.key()),
    }

    match services.usage.run_team_cycle(&scope.name).await {
        Ok(None) => {}
        Ok(Some(report)) if report.is_empty() => {
            info!("team usage cycle for {}: no changes", scope.name);
        }
        Ok(Some(report)) => {
            info!(
                "team usage cycle for {}: {} day(s) updated, {} day(s) added",
                scope.name,
                report.updated.len(),
                report.added.len()
            );
        }
        Err(err) => error!("team usage cycle for {} failed: {err}", scope.name),
    }
}
