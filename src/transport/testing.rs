//! In-process WebSocket backend for tests.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::TransportEvent;

const WAIT: Duration = Duration::from_secs(5);

/// A frame the server received from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

/// Accepts a single client and records everything it sends.  Frames can be
/// pushed to the client at any time.
pub struct TestServer {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    push: mpsc::UnboundedSender<Message>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(tcp).await else {
                return;
            };
            let (mut sink, mut stream) = ws.split();

            loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Binary(bytes))) => {
                            let _ = received_tx.send(Received::Binary(bytes));
                        }
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(Received::Text(text));
                        }
                        Some(Ok(Message::Close(_))) => {
                            let _ = received_tx.send(Received::Close);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    },
                    out = push_rx.recv() => match out {
                        Some(msg) => {
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            addr,
            received,
            push,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Page-style origin that derives to [`url`](Self::url).
    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.push.send(Message::Text(text.to_string()));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.push.send(Message::Binary(bytes));
    }

    /// Start a server-side close handshake.
    pub fn hang_up(&self, reason: &str) {
        let _ = self.push.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        })));
    }

    /// Next frame from the client, or `None` once the connection is gone.
    pub async fn next_received(&mut self) -> Option<Received> {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Collect binary frames until `count` arrived.
    pub async fn binary_frames(&mut self, count: usize) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while frames.len() < count {
            match self.next_received().await {
                Some(Received::Binary(bytes)) => frames.push(bytes),
                Some(_) => {}
                None => break,
            }
        }
        frames
    }
}

/// A listener that accepts TCP connections but never answers the handshake.
pub async fn silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((tcp, _)) = listener.accept().await {
            held.push(tcp);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
) -> Option<TransportEvent> {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .ok()
        .flatten()
}
