use crate::admission::AdmissionMode;
use crate::client_config::ClientConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Largest WebSocket message the relay can be configured to accept.
const MAX_ALLOWED_PAYLOAD: usize = 16 * 1024 * 1024;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "sigrelay")]
#[command(about = "WebSocket signaling relay")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on for relay connections.
    #[arg(long, default_value = "0.0.0.0:8443", env = "SIGRELAY_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics, health and client config endpoints.
    #[arg(long, default_value = "127.0.0.1:9090", env = "SIGRELAY_HTTP_ADDR")]
    pub http_addr: SocketAddr,
    /// Admission mode. `secure` requires the admission token on register.
    #[arg(long, value_enum, default_value = "insecure", env = "SIGRELAY_MODE")]
    pub mode: AdmissionMode,
    /// Admission token expected from clients in secure mode.
    #[arg(long, env = "SIGRELAY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// PEM certificate chain. Enables TLS together with `--tls-key`.
    #[arg(long, env = "SIGRELAY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,
    /// PEM PKCS#8 private key. Enables TLS together with `--tls-cert`.
    #[arg(long, env = "SIGRELAY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
    /// Maximum WebSocket message size in bytes.
    #[arg(long, default_value = "65536", env = "SIGRELAY_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Relay URL handed to browser clients by `/config`.
    #[arg(long, default_value = "wss://localhost:8443", env = "SIGNALING_URL")]
    pub signaling_url: String,
    /// Display name handed to browser clients by `/config`.
    #[arg(long, default_value = "client", env = "NAME")]
    pub client_name: String,
    /// Role label handed to browser clients by `/config`.
    #[arg(long, default_value = "caller", env = "ROLE")]
    pub client_role: String,
    /// Registration token handed to browser clients by `/config`.
    #[arg(long, env = "REG_TOKEN", hide_env_values = true)]
    pub client_token: Option<String>,
    /// Increase log verbosity (-v debug, -vv trace). Ignored when RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on for relay connections.
    pub listen: SocketAddr,
    /// Socket address for the HTTP side endpoints.
    pub http_addr: SocketAddr,
    /// Admission mode.
    pub mode: AdmissionMode,
    /// Admission token; `None` in secure mode rejects every registration.
    pub token: Option<String>,
    /// PEM certificate chain path.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key path.
    pub tls_key: Option<PathBuf>,
    /// Maximum WebSocket message size in bytes.
    pub max_payload: usize,
    /// Record served at `/config`.
    pub client: ClientConfig,
}

impl ServerConfig {
    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err("tls_cert and tls_key must be set together".to_string());
        }

        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_PAYLOAD
            ));
        }

        if self.listen == self.http_addr {
            return Err("listen and http_addr must differ".to_string());
        }
        Ok(())
    }

    /// Certificate and key paths when TLS is configured.
    #[must_use]
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            http_addr: args.http_addr,
            mode: args.mode,
            token: non_empty(args.token),
            tls_cert: args.tls_cert,
            tls_key: args.tls_key,
            max_payload: args.max_payload,
            client: ClientConfig {
                signaling_url: args.signaling_url,
                name: args.client_name,
                role: args.client_role,
                token: non_empty(args.client_token),
            },
        }
    }
}
