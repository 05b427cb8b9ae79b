use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Registration presented a missing or wrong admission token.
    #[error("invalid admission token")]
    InvalidToken,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// TLS handshake or certificate loading failed.
    #[error("tls error: {0}")]
    Tls(String),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
