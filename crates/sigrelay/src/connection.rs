use crate::error::RelayError;
use crate::metrics::gauges;
use crate::relay::{Disposition, Relay};
use crate::server::ServerState;
use crate::session::{ConnHandle, Session};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sigrelay_common::types::reason;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsRecv<S> = SplitStream<WebSocketStream<S>>;

/// Serve one accepted transport stream until either side closes it.
///
/// `stream` is a plain TCP stream or an already-established TLS stream.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails or the connection ends
/// on a transport error rather than a close.
pub async fn handle_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_payload),
        max_frame_size: Some(state.config.max_payload),
        ..WebSocketConfig::default()
    };

    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(RelayError::WebSocket)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (handle, mut outbound_rx) = ConnHandle::channel();
    let mut session = state.relay.open_session(handle);
    tracing::debug!(conn = %session.handle().id(), %peer_addr, "connection accepted");

    gauges::inc_connections_active();

    let result = run_message_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut outbound_rx,
        &state.relay,
        &mut session,
    )
    .await;

    drop(outbound_rx);
    state.relay.close_session(session);
    gauges::dec_connections_active();

    result
}

/// Pump inbound messages into the relay and queued outbound messages onto
/// the socket, one at a time, until the connection ends.
async fn run_message_loop<S>(
    ws_tx: &mut WsSink<S>,
    ws_rx: &mut WsRecv<S>,
    outbound_rx: &mut mpsc::Receiver<String>,
    relay: &Relay,
    session: &mut Session,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let disposition = match msg {
                    Some(Ok(Message::Text(text))) => relay.handle_message(session, text.as_bytes()),
                    Some(Ok(Message::Binary(data))) => relay.handle_message(session, &data),
                    Some(Ok(Message::Close(_))) => {
                        // flush the close reply tungstenite queued
                        let _ = ws_tx.close().await;
                        return Ok(());
                    }
                    None => return Ok(()),
                    Some(Err(e)) => return Err(RelayError::WebSocket(e)),
                    // ping/pong replies are queued by tungstenite itself
                    Some(Ok(_)) => Disposition::Continue,
                };
                if disposition == Disposition::Terminate {
                    return terminate(ws_tx, outbound_rx).await;
                }
            }
            Some(text) = outbound_rx.recv() => {
                ws_tx.send(Message::Text(text)).await.map_err(RelayError::WebSocket)?;
            }
        }
    }
}

/// Relay-initiated close: write whatever is still queued (the rejection
/// envelope among it), then a policy close frame.
async fn terminate<S>(
    ws_tx: &mut WsSink<S>,
    outbound_rx: &mut mpsc::Receiver<String>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    outbound_rx.close();
    while let Ok(text) = outbound_rx.try_recv() {
        ws_tx
            .send(Message::Text(text))
            .await
            .map_err(RelayError::WebSocket)?;
    }

    let close = CloseFrame {
        code: CloseCode::Policy,
        reason: Cow::Borrowed(reason::INVALID_TOKEN),
    };
    if let Err(e) = ws_tx.send(Message::Close(Some(close))).await {
        tracing::debug!("failed to send close frame: {}", e);
    }
    Ok(())
}
