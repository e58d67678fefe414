//! One duplex WebSocket connection to the backend.
//!
//! [`TransportSession::open`] performs the handshake and then splits the
//! socket between two tokio tasks:
//!
//! * the **writer** drains an ordered outbound queue fed by
//!   [`TransportSender`] clones;
//! * the **reader** decodes inbound frames into [`TransportEvent`]s and is
//!   the only task that ever reports [`TransportEvent::Closed`].
//!
//! Audio is accepted only while the connection is [`ConnectionState::Open`].
//! Anything handed over before the handshake or after `close()` is dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{parse_text, InboundMessage, CLOSE_COMMAND};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the reader waits for the peer to answer our Close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection timed out after {0}s")]
    ConnectTimeout(u64),

    #[error("transport session was already opened")]
    AlreadyOpened,
}

// ---------------------------------------------------------------------------
// ConnectionState / TransportEvent
// ---------------------------------------------------------------------------

/// Lifecycle of a [`TransportSession`].  Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Something the reader task observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// A text frame that could not be decoded.  The connection stays up.
    ProtocolError(String),
    /// The connection is gone.  Emitted exactly once, always last.
    Closed { reason: Option<String> },
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, Default)]
struct StateCell(Arc<Mutex<ConnectionState>>);

impl StateCell {
    fn get(&self) -> ConnectionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: ConnectionState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

// ---------------------------------------------------------------------------
// TransportSender
// ---------------------------------------------------------------------------

/// Cloneable handle for queueing outbound audio.
#[derive(Debug, Clone)]
pub struct TransportSender {
    outbound: mpsc::UnboundedSender<Message>,
    state: StateCell,
}

impl TransportSender {
    /// Queue one binary frame.  Returns `false` (and drops the bytes) unless
    /// the connection is open.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        if self.state.get() != ConnectionState::Open {
            log::trace!("transport: dropping {} bytes, connection not open", bytes.len());
            return false;
        }
        self.outbound.send(Message::Binary(bytes)).is_ok()
    }
}

// ---------------------------------------------------------------------------
// TransportSession
// ---------------------------------------------------------------------------

pub struct TransportSession {
    url: String,
    state: StateCell,
    outbound_tx: mpsc::UnboundedSender<Message>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Message>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    send_close_command: bool,
}

impl TransportSession {
    pub fn new(url: impl Into<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            state: StateCell::default(),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            shutdown_tx: None,
            send_close_command: true,
        }
    }

    /// Whether [`close`](Self::close) sends the `close` text command ahead
    /// of the Close frame.  Enabled by default.
    pub fn with_close_command(mut self, enabled: bool) -> Self {
        self.send_close_command = enabled;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn sender(&self) -> TransportSender {
        TransportSender {
            outbound: self.outbound_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Shorthand for `self.sender().send(bytes)`.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.sender().send(bytes)
    }

    /// Connect and complete the WebSocket handshake.
    ///
    /// Resolves only once the connection is usable.  A session can be opened
    /// once; dropping the returned future mid-handshake leaves the session in
    /// `Connecting` until [`close`](Self::close) is called.
    pub async fn open(&mut self) -> Result<TransportEvents, TransportError> {
        if self.state.get() != ConnectionState::Idle {
            return Err(TransportError::AlreadyOpened);
        }
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or(TransportError::AlreadyOpened)?;

        self.state.set(ConnectionState::Connecting);
        log::info!("transport: connecting to {}", self.url);

        let socket = match connect_async(self.url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                self.state.set(ConnectionState::Closed);
                log::warn!("transport: connect to {} failed: {e}", self.url);
                return Err(TransportError::ConnectionFailed(e.to_string()));
            }
        };

        let (sink, stream) = socket.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        self.state.set(ConnectionState::Open);
        log::info!("transport: connected to {}", self.url);

        tokio::spawn(write_loop(sink, outbound_rx, self.state.clone()));
        tokio::spawn(read_loop(stream, events_tx, shutdown_rx, self.state.clone()));

        Ok(events_rx)
    }

    /// Begin a graceful close.  Idempotent; a never-opened session is left
    /// untouched.
    pub fn close(&mut self) {
        match self.state.get() {
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {}
            ConnectionState::Connecting => {
                log::info!("transport: connect abandoned");
                self.state.set(ConnectionState::Closed);
            }
            ConnectionState::Open => {
                log::info!("transport: closing");
                self.state.set(ConnectionState::Closing);
                if self.send_close_command {
                    let _ = self.outbound_tx.send(Message::Text(CLOSE_COMMAND.to_string()));
                }
                let _ = self.outbound_tx.send(Message::Close(None));
                if let Some(shutdown) = self.shutdown_tx.take() {
                    let _ = shutdown.send(());
                }
            }
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Socket tasks
// ---------------------------------------------------------------------------

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    state: StateCell,
) {
    while let Some(msg) = outbound.recv().await {
        if msg.is_binary() && state.get() != ConnectionState::Open {
            continue;
        }
        let is_close = msg.is_close();
        if let Err(e) = sink.send(msg).await {
            log::debug!("transport: write failed: {e}");
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
    log::debug!("transport: writer finished");
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: oneshot::Receiver<()>,
    state: StateCell,
) {
    // Starts counting once close() is called or the session is dropped.
    let grace = async move {
        let _ = shutdown.await;
        tokio::time::sleep(CLOSE_GRACE).await;
    };
    tokio::pin!(grace);

    let mut reason: Option<String> = None;

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = &mut grace => {
                log::warn!("transport: peer did not finish the close handshake");
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => match parse_text(&text) {
                Ok(Some(msg)) => {
                    let _ = events.send(TransportEvent::Message(msg));
                }
                Ok(None) => log::debug!("transport: ignoring message {text}"),
                Err(e) => {
                    log::warn!("transport: {e}");
                    let _ = events.send(TransportEvent::ProtocolError(e.to_string()));
                }
            },
            Some(Ok(Message::Binary(bytes))) => {
                let _ = events.send(TransportEvent::Message(InboundMessage::AudioPayload(bytes)));
            }
            Some(Ok(Message::Close(frame))) => {
                reason = frame
                    .map(|f| f.reason.into_owned())
                    .filter(|r| !r.is_empty());
                log::info!("transport: peer closed ({})", reason.as_deref().unwrap_or("no reason"));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if state.get() == ConnectionState::Open {
                    log::warn!("transport: read failed: {e}");
                    reason.get_or_insert_with(|| e.to_string());
                }
                break;
            }
            None => break,
        }
    }

    state.set(ConnectionState::Closed);
    let _ = events.send(TransportEvent::Closed { reason });
    log::debug!("transport: reader finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
