use axum::{response::Json, routing::get, Router};
use serde::Serialize;

/// Runtime settings handed to the browser client, served at `/config`.
///
/// Field names on the wire are the environment variable names the browser
/// application reads them under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    /// Client-reachable relay URL.
    #[serde(rename = "SIGNALING_URL")]
    pub signaling_url: String,
    /// Display name.
    #[serde(rename = "NAME")]
    pub name: String,
    /// Role label, e.g. `caller` or `callee`.
    #[serde(rename = "ROLE")]
    pub role: String,
    /// Registration token, `null` when unset.
    #[serde(rename = "TOKEN")]
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "wss://localhost:8443".to_string(),
            name: "client".to_string(),
            role: "caller".to_string(),
            token: None,
        }
    }
}

/// Routes serving the client configuration.
pub fn routes(config: ClientConfig) -> Router {
    Router::new().route("/config", get(move || config_handler(config.clone())))
}

async fn config_handler(config: ClientConfig) -> Json<ClientConfig> {
    Json(config)
}
