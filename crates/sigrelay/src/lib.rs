//! sigrelay — identifier-addressed WebSocket signaling relay.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Token-gated admission for registrations.
pub mod admission;
/// Browser client configuration record and `/config` route.
pub mod client_config;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for relay server operations.
pub mod error;
/// Prometheus metrics, health endpoints and the HTTP side server.
pub mod metrics;
/// Registration, admission and routing state machine.
pub mod relay;
/// Client identifier → connection table.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// Connection handles and per-connection session state.
pub mod session;
/// TLS certificate loading.
pub mod tls;

pub use server::{run, run_with_shutdown, ServerState};
