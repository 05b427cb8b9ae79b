#![forbid(unsafe_code)]
//! Logging pass-through proxy for sigrelay.
//!
//! Each accepted WebSocket is paired with one upstream WebSocket to the
//! relay. Messages are forwarded unmodified in both directions and logged on
//! the way through.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TapError {
    #[error("invalid target url {0:?}: expected ws:// or wss://")]
    InvalidTarget(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which way a message is travelling through the tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToRelay,
    ToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToRelay => f.write_str("client->relay"),
            Self::ToClient => f.write_str("relay->client"),
        }
    }
}

/// Check that `target` is a WebSocket URL the tap can dial.
///
/// # Errors
///
/// Returns [`TapError::InvalidTarget`] for anything but a `ws://` or `wss://`
/// URL with a host.
pub fn validate_target(target: &str) -> Result<(), TapError> {
    let request = target
        .into_client_request()
        .map_err(|_| TapError::InvalidTarget(target.to_string()))?;
    match request.uri().scheme_str() {
        Some("ws" | "wss") if request.uri().host().is_some() => Ok(()),
        _ => Err(TapError::InvalidTarget(target.to_string())),
    }
}

/// Pretty-print `data` if it is JSON.
pub fn pretty_json(data: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(data).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

fn log_message(direction: Direction, peer: SocketAddr, msg: &Message) {
    let data: &[u8] = match msg {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(data) => data,
        _ => return,
    };
    info!(
        %direction,
        %peer,
        len = data.len(),
        "{}",
        String::from_utf8_lossy(data)
    );
    if let Some(pretty) = pretty_json(data) {
        debug!(%direction, %peer, "\n{}", pretty);
    }
}

/// Accept connections on `listener` forever, piping each to `target`.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, target: String) -> Result<(), TapError> {
    let local_addr = listener.local_addr()?;
    info!(%target, "tap listening on {}", local_addr);
    let target: Arc<str> = target.into();

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let target = Arc::clone(&target);
                tokio::spawn(async move {
                    if let Err(e) = pipe(stream, peer, &target).await {
                        debug!(%peer, "tap connection ended: {}", e);
                    }
                });
            }
            Err(e) => error!("failed to accept connection: {}", e),
        }
    }
}

/// Serve one inbound connection: dial `target`, then forward until either
/// side goes away. The other side is closed in turn.
///
/// # Errors
///
/// Returns an error if the inbound handshake or the upstream connect fails,
/// or either socket errors mid-stream.
pub async fn pipe(stream: TcpStream, peer: SocketAddr, target: &str) -> Result<(), TapError> {
    let mut inbound = tokio_tungstenite::accept_async(stream).await?;

    let upstream = match tokio_tungstenite::connect_async(target).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(%peer, %target, "upstream connect failed: {}", e);
            let close = CloseFrame {
                code: CloseCode::Error,
                reason: Cow::Borrowed("upstream unavailable"),
            };
            let _ = inbound.close(Some(close)).await;
            return Err(e.into());
        }
    };
    info!(%peer, %target, "tap session opened");

    let (mut client_tx, mut client_rx) = inbound.split();
    let (mut relay_tx, mut relay_rx) = upstream.split();

    let result = loop {
        tokio::select! {
            msg = client_rx.next() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    debug!(%peer, "client closed");
                    let _ = relay_tx.send(Message::Close(frame)).await;
                    break Ok(());
                }
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    log_message(Direction::ToRelay, peer, &msg);
                    if let Err(e) = relay_tx.send(msg).await {
                        break Err(e.into());
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
            msg = relay_rx.next() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    debug!(%peer, "relay closed");
                    let _ = client_tx.send(Message::Close(frame)).await;
                    break Ok(());
                }
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    log_message(Direction::ToClient, peer, &msg);
                    if let Err(e) = client_tx.send(msg).await {
                        break Err(e.into());
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
        }
    };

    // flushes any pending close reply; errors here mean the peer is already gone
    let _ = client_tx.close().await;
    let _ = relay_tx.close().await;
    info!(%peer, "tap session closed");

    result
}
