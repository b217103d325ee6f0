//! In-process chat socket server for driving a real `RealtimeChannel`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use loadchat_client::{ChannelConfig, ConnectionState, ReconnectPolicy};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts chat sockets and hands each one to the test.
pub struct TestServer {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
    handshakes: Arc<AtomicUsize>,
    refused: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

pub struct ServerConn {
    pub path: String,
    ws: WebSocketStream<TcpStream>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::unbounded_channel();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let refused = Arc::new(AtomicUsize::new(0));
        let refuse = Arc::new(AtomicBool::new(false));

        let (count, refused_count, refusing) =
            (handshakes.clone(), refused.clone(), refuse.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if refusing.load(Ordering::SeqCst) {
                    refused_count.fetch_add(1, Ordering::SeqCst);
                    drop(stream);
                    continue;
                }
                let mut path = String::new();
                let callback = |req: &Request, resp: Response| {
                    path = req.uri().path().to_string();
                    Ok::<_, ErrorResponse>(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                count.fetch_add(1, Ordering::SeqCst);
                if tx.send(ServerConn { path, ws }).is_err() {
                    break;
                }
            }
        });

        Self {
            addr,
            accepted,
            handshakes,
            refused,
            refuse,
        }
    }

    pub fn ws_base(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Config pointing at this server with a fast backoff.
    pub fn config(&self, base_delay_ms: u64, max_attempts: u32) -> ChannelConfig {
        ChannelConfig::new(self.ws_base(), "http://127.0.0.1:9").with_reconnect(ReconnectPolicy {
            base_delay_ms,
            cap_delay_ms: base_delay_ms * 4,
            multiplier: 2.0,
            max_attempts,
        })
    }

    pub async fn next_conn(&mut self) -> ServerConn {
        timeout(TIMEOUT, self.accepted.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    /// Whether another socket is accepted within `wait`.
    pub async fn accepts_within(&mut self, wait: Duration) -> bool {
        matches!(timeout(wait, self.accepted.recv()).await, Ok(Some(_)))
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    /// Drop new TCP connections before the WebSocket handshake.
    pub fn refuse_new(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl ServerConn {
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Next text frame from the client, parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        loop {
            let frame = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("client went away")
                .expect("transport error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Next frame of any kind, or `None` if none arrives within `wait`.
    pub async fn next_frame_within(&mut self, wait: Duration) -> Option<Message> {
        match timeout(wait, self.ws.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Close with a status code and a proper closing handshake.
    pub async fn close_with(self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "test".into(),
        };
        self.close(Some(frame)).await;
    }

    /// Close with an empty close frame, which carries no status code.
    pub async fn close_without_status(self) {
        self.close(None).await;
    }

    async fn close(mut self, frame: Option<CloseFrame>) {
        let _ = self.ws.close(frame).await;
        // Drain in the background so the client's close reply is read.
        let mut ws = self.ws;
        tokio::spawn(async move {
            let _ = timeout(TIMEOUT, async { while ws.next().await.is_some() {} }).await;
        });
    }

    /// Drop the TCP connection without a close frame.
    pub fn drop_abruptly(self) {
        drop(self.ws);
    }
}

/// Wait until `rx` sees a state matching `pred` and return it.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let state = timeout(TIMEOUT, rx.wait_for(pred))
        .await
        .expect("state not reached within timeout")
        .expect("channel dropped");
    *state
}
