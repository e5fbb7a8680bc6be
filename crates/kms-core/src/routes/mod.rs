//! Thin HTTP frontend over the orchestrator ("external interface"):
//! one axum handler per public operation, each doing request JSON ->
//! orchestrator call -> response JSON / `KmsError`. Grounded on the
//! `routes/` + `handlers/` split and `AppState` pattern, generalized from a
//! single `PgPool` + `Config` pair to the KMS's richer collaborator set.

mod admin;
mod crypto;
mod keys;
mod pools;

use crate::config::Config;
use crate::services::Orchestrator;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared application state, built once at startup and handed to every
/// handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

/// Installs the process-wide Prometheus recorder. Must run before any
/// `metrics::counter!`/`histogram!` call, so `main` calls this first.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError>
{
    PrometheusBuilder::new().install_recorder()
}

pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);

    Router::new()
        .route("/pools", get(pools::list_pools).post(pools::create_pool))
        .route("/pools/:id/import", post(pools::import_key))
        .route("/pools/:id/rotate", post(pools::rotate))
        .route("/pools/:id/status", post(pools::set_status))
        .route("/pools/:id/encrypt", post(crypto::encrypt))
        .route("/pools/:id/sign", post(crypto::sign))
        .route("/pools/:id/data-key", post(crypto::generate_data_key))
        .route("/decrypt", post(crypto::decrypt))
        .route("/verify", post(crypto::verify))
        .route("/keys", get(keys::list_keys))
        .route("/admin/unseal-rotate", post(admin::unseal_rotate))
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK"
}
