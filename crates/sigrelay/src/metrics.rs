//! Operator HTTP surface: Prometheus metrics, liveness/readiness probes and
//! the client configuration record, plus the relay's metric helpers.

use crate::client_config;
use crate::server::ServerState;
use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the relay is still taking new connections. Cleared when
/// shutdown starts draining.
#[derive(Clone, Debug)]
pub struct Readiness(Arc<AtomicBool>);

impl Default for Readiness {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Readiness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop reporting ready; in-flight connections keep being served.
    pub fn drain(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct Probe {
    state: Arc<ServerState>,
    readiness: Readiness,
}

#[derive(Debug, Serialize)]
struct RelayStatus {
    status: &'static str,
    clients: usize,
}

/// Serve `/metrics`, `/health`, `/ready` and `/config` on `addr`.
///
/// # Errors
///
/// Returns an error if installing the recorder or binding the listener fails.
pub async fn start_http_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
    readiness: Readiness,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let client = state.config.client.clone();

    let app = probe_routes(Probe { state, readiness })
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .merge(client_config::routes(client));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("http endpoints listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn probe_routes(probe: Probe) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(probe)
}

async fn health(State(probe): State<Probe>) -> Json<RelayStatus> {
    Json(RelayStatus {
        status: "ok",
        clients: probe.state.relay.registry().len(),
    })
}

async fn ready(State(probe): State<Probe>) -> (StatusCode, Json<RelayStatus>) {
    let clients = probe.state.relay.registry().len();
    if probe.readiness.is_accepting() {
        (StatusCode::OK, Json(RelayStatus { status: "accepting", clients }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RelayStatus { status: "draining", clients }),
        )
    }
}

/// Connection and registration gauges.
pub mod gauges {
    /// Increment the open connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("sigrelay_connections_active").increment(1.0);
    }

    /// Decrement the open connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("sigrelay_connections_active").decrement(1.0);
    }

    /// Set the number of registered client identifiers.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_clients_registered(count: usize) {
        metrics::gauge!("sigrelay_clients_registered").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record a registration attempt with the given status label.
    pub fn registrations_total(status: &'static str) {
        metrics::counter!("sigrelay_registrations_total", "status" => status).increment(1);
    }

    /// Increment the routed-messages counter.
    pub fn messages_routed_total() {
        metrics::counter!("sigrelay_messages_routed_total").increment(1);
    }

    /// Count a message that was not delivered: `malformed`, `unavailable`,
    /// `closed`, `backpressure` or `encode`.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("sigrelay_messages_dropped_total", "reason" => reason).increment(1);
    }
}
