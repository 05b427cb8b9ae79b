#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sigrelay::admission::AdmissionMode;
use sigrelay::client_config::ClientConfig;
use sigrelay::config::ServerConfig;
use sigrelay::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        http_addr: "127.0.0.1:0".parse().unwrap(),
        mode: AdmissionMode::Insecure,
        token: None,
        tls_cert: None,
        tls_key: None,
        max_payload: 65_536,
        client: ClientConfig::default(),
    }
}

pub fn secure_config(listen: SocketAddr, token: &str) -> ServerConfig {
    ServerConfig {
        mode: AdmissionMode::Secure,
        token: Some(token.to_string()),
        ..test_config(listen)
    }
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    start_server_with(test_config).await
}

pub async fn start_server_with(
    make_config: impl FnOnce(SocketAddr) -> ServerConfig,
) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(make_config(addr)).unwrap());

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = sigrelay::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub struct TestClient<S = MaybeTlsStream<TcpStream>> {
    pub ws: WebSocketStream<S>,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        Self { ws }
    }

    /// Connect and register as `client_id`, asserting the confirmation.
    pub async fn register(addr: &SocketAddr, client_id: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send_json(&json!({"type": "register", "clientId": client_id}))
            .await;
        let reply = client.recv_json().await;
        assert_eq!(reply, json!({"type": "registered", "clientId": client_id}));
        client
    }
}

impl<S> TestClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send_json(&mut self, value: &Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, msg: Message) {
        self.ws.send(msg).await.unwrap();
    }

    pub async fn recv_json(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for message")
                .expect("stream ended")
                .expect("websocket error");
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text message, got {other:?}"),
            }
        }
    }

    /// Assert nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        let result = tokio::time::timeout(wait, async {
            while let Some(msg) = self.ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => return Some(text),
                    Ok(Message::Close(_)) | Err(_) => return None,
                    _ => {}
                }
            }
            None
        })
        .await;
        if let Ok(Some(text)) = result {
            panic!("expected no message, got {text}");
        }
    }

    /// Assert the relay closes the connection.
    pub async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for close");
            match next {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(other)) => panic!("expected close, got {other:?}"),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
