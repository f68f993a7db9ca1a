//! HTTP server exposing the scrape handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use cosmos_exporter_common::{AddressKind, Bech32Prefixes};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::scrape::{ScrapeReport, SharedScraper};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scraper: SharedScraper,
    pub prefixes: Arc<Bech32Prefixes>,
}

/// `?address=` parameter of the per-target handlers.
#[derive(Debug, Deserialize)]
struct TargetParams {
    address: Option<String>,
}

/// Create the HTTP router.
///
/// Serves the general handler at `metrics_path` and the per-target
/// handlers below it.
pub fn create_router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(general_handler))
        .route(&format!("{}/wallet", metrics_path), get(wallet_handler))
        .route(&format!("{}/validator", metrics_path), get(validator_handler))
        .route(
            &format!("{}/validators", metrics_path),
            get(validators_handler),
        )
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn metrics_response(
    state: &AppState,
    report: &ScrapeReport,
    handler: &str,
    started: Instant,
) -> Response {
    let elapsed = started.elapsed();
    debug!(
        handler,
        elapsed_ms = elapsed.as_millis() as u64,
        failures = report.failures.len(),
        "Scrape finished"
    );

    let body = state.scraper.render(report, handler, elapsed);
    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Validate the target address before any node query is made.
fn check_target(
    state: &AppState,
    params: TargetParams,
    kind: AddressKind,
) -> Result<String, Response> {
    let Some(address) = params.address.filter(|a| !a.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "missing address parameter\n").into_response());
    };

    if let Err(e) = state.prefixes.check(&address, kind) {
        debug!(address = %address, error = %e, "Rejected scrape target");
        return Err((StatusCode::BAD_REQUEST, format!("{}\n", e)).into_response());
    }

    Ok(address)
}

async fn general_handler(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let report = state.scraper.general().await;
    metrics_response(&state, &report, "general", started)
}

async fn wallet_handler(
    State(state): State<AppState>,
    Query(params): Query<TargetParams>,
) -> Response {
    let address = match check_target(&state, params, AddressKind::Account) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let started = Instant::now();
    let report = state.scraper.wallet(&address).await;
    metrics_response(&state, &report, "wallet", started)
}

async fn validator_handler(
    State(state): State<AppState>,
    Query(params): Query<TargetParams>,
) -> Response {
    let address = match check_target(&state, params, AddressKind::Validator) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let started = Instant::now();
    let report = state.scraper.validator(&address).await;
    metrics_response(&state, &report, "validator", started)
}

async fn validators_handler(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let report = state.scraper.validators().await;
    metrics_response(&state, &report, "validators", started)
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    state: AppState,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(state: AppState, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            state,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    ///
    /// In-flight scrapes are allowed to finish before this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.state, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "Listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
