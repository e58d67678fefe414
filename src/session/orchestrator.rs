//! Session orchestrator: microphone → PCM16 chunks → WebSocket, and back.
//!
//! [`SessionOrchestrator`] owns the microphone, the transport and the
//! playback sink for one session at a time.  It runs as a single tokio task
//! and reacts to three sources:
//!
//! ```text
//! SessionCommand (mpsc) ──┐
//! capture chunks ─────────┼─▶ SessionOrchestrator::run() ─▶ SessionEvent (mpsc)
//! TransportEvent ─────────┘                              └▶ SharedState
//! ```
//!
//! # Start sequence
//!
//! ```text
//! Start
//!   └─▶ acquire microphone                       [Connecting]
//!         └─▶ open WebSocket (bounded by timeout)
//!               └─▶ start capture → transport    [Active]
//! any failure ─▶ release everything acquired so far, status Error, Idle
//! ```
//!
//! Stop, shutdown and a remote close all share one teardown path:
//! drop the chunk receiver, stop and release the microphone, close the
//! transport, then settle in `Idle`.
//!
//! Device calls (acquire, start, stop, render) can block for as long as the
//! platform takes to open or join an audio thread.  They run on tokio's
//! blocking pool; the loop awaits them without holding up other tasks.

use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::{AudioChunk, AudioInput, AudioOutput, ChunkCallback, Microphone};
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::transport::{
    endpoint_url, InboundMessage, Provider, TransportError, TransportEvent, TransportEvents,
    TransportSender, TransportSession,
};

use super::state::{ConnectionStatus, SessionSnapshot, SessionState, SharedState};

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

/// Requests accepted by [`SessionOrchestrator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    /// Stop any session and make `run` return.
    Shutdown,
}

/// Everything the orchestrator reports to its caller, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    StatusChanged(ConnectionStatus),
    /// The backend attached a transcription provider.
    Connected { provider: Provider },
    /// A new fragment plus the whole transcript so far.
    Transcription { fragment: String, transcript: String },
    /// The backend reported a problem; the session continues.
    RemoteError { error: SessionError },
    /// An inbound frame could not be decoded and was skipped.
    ProtocolError { error: SessionError },
    /// An inbound audio payload was handed to playback.
    AudioReceived { bytes: usize },
    /// `start` arrived while a session was already underway.
    StartRejected { state: SessionState },
    StartFailed { error: SessionError },
    /// An active session was torn down.  `error` is set when the connection
    /// went away rather than on request.
    Ended { error: Option<SessionError> },
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cloneable front-end handle for a running orchestrator.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

/// Create a handle and the command receiver to pass to
/// [`SessionOrchestrator::run`].
pub fn session_channel() -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
    let (commands, rx) = mpsc::channel(16);
    (SessionHandle { commands }, rx)
}

impl SessionHandle {
    pub async fn start_session(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Start).await
    }

    pub async fn stop_session(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Stop).await
    }

    /// Stop any session and end the orchestrator task.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::OrchestratorGone)
    }
}

// ---------------------------------------------------------------------------
// SessionOrchestrator
// ---------------------------------------------------------------------------

/// Resources held while a session is active.
struct ActiveSession {
    mic: Box<dyn Microphone>,
    transport: TransportSession,
    sender: TransportSender,
    chunks: Option<mpsc::UnboundedReceiver<AudioChunk>>,
    inbound: TransportEvents,
}

enum Step {
    Command(Option<SessionCommand>),
    Chunk(AudioChunk),
    Transport(TransportEvent),
}

/// Outcome of a start attempt that did not fail.
enum Started {
    Active(ActiveSession),
    Cancelled,
}

/// Drives streaming sessions.
///
/// ```rust,no_run
/// use voice_stream::audio::{CpalInput, NullOutput};
/// use voice_stream::config::AppConfig;
/// use voice_stream::session::{new_shared_state, session_channel, SessionOrchestrator};
///
/// # async fn example() {
/// let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
/// let (handle, commands) = session_channel();
/// let orchestrator = SessionOrchestrator::new(
///     AppConfig::default(),
///     new_shared_state(),
///     Box::new(CpalInput::new()),
///     Box::new(NullOutput),
///     events_tx,
/// );
/// tokio::spawn(orchestrator.run(commands));
///
/// handle.start_session().await.unwrap();
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
pub struct SessionOrchestrator {
    config: AppConfig,
    state: SharedState,
    input: Arc<dyn AudioInput>,
    output: Option<Box<dyn AudioOutput>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    active: Option<ActiveSession>,
    shutdown_requested: bool,
}

impl SessionOrchestrator {
    pub fn new(
        config: AppConfig,
        state: SharedState,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            state,
            input: Arc::from(input),
            output: Some(output),
            events,
            active: None,
            shutdown_requested: false,
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until [`SessionCommand::Shutdown`] arrives or every
    /// [`SessionHandle`] is dropped.  Any active session is stopped first.
    ///
    /// Commands are polled before session activity, so a stop is handled
    /// before any chunk queued behind it.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        while !self.shutdown_requested {
            let step = tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                step = next_activity(&mut self.active) => step,
            };

            match step {
                Step::Command(Some(SessionCommand::Start)) => self.start(&mut commands).await,
                Step::Command(Some(SessionCommand::Stop)) => self.stop().await,
                Step::Command(Some(SessionCommand::Shutdown) | None) => {
                    self.shutdown_requested = true;
                }
                Step::Chunk(chunk) => self.forward_chunk(chunk),
                Step::Transport(event) => self.handle_transport(event).await,
            }
        }

        self.stop().await;
        log::info!("session: orchestrator shutting down");
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    async fn start(&mut self, commands: &mut mpsc::Receiver<SessionCommand>) {
        let current = self.snapshot().state;
        if current != SessionState::Idle {
            log::warn!("session: start ignored while {}", current.label());
            self.emit(SessionEvent::StartRejected { state: current });
            return;
        }

        {
            let mut snap = self.snapshot();
            snap.transcript.clear();
            snap.provider = None;
            snap.last_error = None;
            snap.chunks_sent = 0;
        }
        self.set_state(SessionState::Connecting);

        match self.open_session(commands).await {
            Ok(Started::Active(session)) => {
                self.active = Some(session);
                self.set_status(ConnectionStatus::Recording);
                self.set_state(SessionState::Active);
                log::info!("session: streaming");
            }
            Ok(Started::Cancelled) => {
                log::info!("session: start cancelled while connecting");
                self.set_status(ConnectionStatus::Disconnected);
                self.set_state(SessionState::Idle);
                self.emit(SessionEvent::Ended { error: None });
            }
            Err(error) => self.fail_start(error),
        }
    }

    /// Acquire the microphone, connect, and wire capture to the transport.
    /// Everything acquired here is released on return unless the session
    /// comes back active.
    async fn open_session(
        &mut self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<Started, SessionError> {
        let input = Arc::clone(&self.input);
        let audio = self.config.audio.clone();
        // An unstarted microphone drops without blocking.
        let mic = blocking(move || input.acquire(&audio)).await??;

        let url = endpoint_url(&self.config.server.origin)?;
        let mut transport =
            TransportSession::new(url).with_close_command(self.config.server.send_close_command);

        let timeout_secs = self.config.server.connect_timeout_secs;
        let connect = tokio::time::timeout(Duration::from_secs(timeout_secs), transport.open());

        let opened = tokio::select! {
            opened = connect => Some(opened),
            shutdown = wait_for_stop(commands, &self.events) => {
                self.shutdown_requested = shutdown;
                None
            }
        };

        let inbound = match opened {
            Some(Ok(Ok(inbound))) => inbound,
            Some(Ok(Err(e))) => return Err(e.into()),
            Some(Err(_elapsed)) => {
                transport.close();
                return Err(TransportError::ConnectTimeout(timeout_secs).into());
            }
            None => {
                transport.close();
                return Ok(Started::Cancelled);
            }
        };
        self.set_status(ConnectionStatus::Connected);

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let on_chunk: ChunkCallback = Box::new(move |chunk| {
            let _ = chunk_tx.send(chunk);
        });

        let started = blocking(move || {
            let mut mic = mic;
            let result = mic.start(on_chunk);
            (mic, result)
        })
        .await;
        let mic = match started {
            Ok((mic, Ok(()))) => mic,
            Ok((mic, Err(e))) => {
                release_mic(mic).await;
                transport.close();
                return Err(e.into());
            }
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        let sender = transport.sender();
        Ok(Started::Active(ActiveSession {
            mic,
            transport,
            sender,
            chunks: Some(chunk_rx),
            inbound,
        }))
    }

    fn fail_start(&mut self, error: SessionError) {
        log::info!("session: start failed");
        self.record_error(&error);
        self.set_status(ConnectionStatus::Error);
        self.emit(SessionEvent::StartFailed { error });
        self.set_state(SessionState::Idle);
    }

    // -----------------------------------------------------------------------
    // Stop / teardown
    // -----------------------------------------------------------------------

    async fn stop(&mut self) {
        if self.active.is_none() {
            log::debug!("session: stop with no active session");
            return;
        }
        log::info!("session: stopping");
        self.teardown(None).await;
    }

    async fn teardown(&mut self, error: Option<SessionError>) {
        let Some(session) = self.active.take() else {
            return;
        };
        self.set_state(SessionState::Closing);

        let ActiveSession {
            mic,
            mut transport,
            chunks,
            ..
        } = session;

        // Chunks captured before this point are never sent.
        drop(chunks);
        release_mic(mic).await;
        transport.close();
        drop(transport);

        if let Some(error) = &error {
            self.record_error(error);
        }
        self.set_state(SessionState::Closed);
        self.set_status(ConnectionStatus::Disconnected);
        self.set_state(SessionState::Idle);
        self.emit(SessionEvent::Ended { error });
    }

    // -----------------------------------------------------------------------
    // Activity
    // -----------------------------------------------------------------------

    fn forward_chunk(&mut self, chunk: AudioChunk) {
        let Some(session) = &self.active else {
            return;
        };
        let seq = chunk.seq;
        if session.sender.send(chunk.data) {
            self.snapshot().chunks_sent += 1;
            log::trace!("session: sent chunk #{seq}");
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(InboundMessage::Connected { provider }) => {
                let parsed = Provider::parse(&provider);
                log::info!("session: backend connected via {parsed}");
                self.snapshot().provider = Some(provider);
                self.emit(SessionEvent::Connected { provider: parsed });
            }
            TransportEvent::Message(InboundMessage::Transcription { text }) => {
                let transcript = {
                    let mut snap = self.snapshot();
                    snap.transcript.push(&text);
                    snap.transcript.as_str().to_string()
                };
                log::debug!("session: transcription {text:?}");
                self.emit(SessionEvent::Transcription {
                    fragment: text,
                    transcript,
                });
            }
            TransportEvent::Message(InboundMessage::Error { message }) => {
                let error = SessionError::RemoteError(message);
                self.record_error(&error);
                self.emit(SessionEvent::RemoteError { error });
            }
            TransportEvent::Message(InboundMessage::AudioPayload(bytes)) => {
                let len = bytes.len();
                self.play(bytes).await;
                self.emit(SessionEvent::AudioReceived { bytes: len });
            }
            TransportEvent::ProtocolError(detail) => {
                let error = SessionError::ProtocolError(detail);
                self.record_error(&error);
                self.emit(SessionEvent::ProtocolError { error });
            }
            TransportEvent::Closed { reason } => {
                log::info!("session: connection closed by server");
                let reason = reason.unwrap_or_else(|| "connection closed".into());
                self.teardown(Some(SessionError::ConnectionClosed(reason)))
                    .await;
            }
        }
    }

    /// Hand an inbound payload to the output device.  Failures drop the
    /// payload and leave the session running.
    async fn play(&mut self, bytes: Vec<u8>) {
        let Some(mut output) = self.output.take() else {
            log::debug!("session: playback unavailable, dropping {} bytes", bytes.len());
            return;
        };
        let rate = self.config.playback.sample_rate;

        let rendered = blocking(move || {
            let result = output.render(&bytes, rate);
            (output, result)
        })
        .await;
        match rendered {
            Ok((output, result)) => {
                self.output = Some(output);
                if let Err(e) = result {
                    self.record_error(&SessionError::from(e));
                }
            }
            Err(e) => self.record_error(&e),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Log `error` at a level matching its severity and remember it.
    fn record_error(&self, error: &SessionError) {
        if error.is_fatal() {
            log::error!("session: {error}");
        } else {
            log::warn!("session: {error}");
        }
        self.snapshot().last_error = Some(error.clone());
    }

    fn snapshot(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        let changed = {
            let mut snap = self.snapshot();
            std::mem::replace(&mut snap.state, next) != next
        };
        if changed {
            log::debug!("session: → {}", next.label());
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    fn set_status(&self, next: ConnectionStatus) {
        let changed = {
            let mut snap = self.snapshot();
            std::mem::replace(&mut snap.status, next) != next
        };
        if changed {
            self.emit(SessionEvent::StatusChanged(next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Run a blocking device call on tokio's blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, SessionError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SessionError::Internal(format!("device task failed: {e}")))
}

/// Stop and drop a started microphone off the async workers.
async fn release_mic(mut mic: Box<dyn Microphone>) {
    let released = blocking(move || {
        mic.stop();
        drop(mic);
    })
    .await;
    if let Err(e) = released {
        log::error!("session: {e}");
    }
}

/// Next chunk or transport event of the active session.  Pending forever
/// when nothing is active.
async fn next_activity(active: &mut Option<ActiveSession>) -> Step {
    let Some(session) = active else {
        return std::future::pending().await;
    };

    tokio::select! {
        biased;
        Some(chunk) = recv_chunk(&mut session.chunks) => Step::Chunk(chunk),
        event = session.inbound.recv() => Step::Transport(
            event.unwrap_or(TransportEvent::Closed { reason: None })
        ),
    }
}

async fn recv_chunk(chunks: &mut Option<mpsc::UnboundedReceiver<AudioChunk>>) -> Option<AudioChunk> {
    match chunks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Consume commands while a connect is in flight.  Returns once the caller
/// asked to stop; `true` means the orchestrator should shut down as well.
async fn wait_for_stop(
    commands: &mut mpsc::Receiver<SessionCommand>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    loop {
        match commands.recv().await {
            Some(SessionCommand::Start) => {
                log::warn!("session: start ignored while Connecting");
                let _ = events.send(SessionEvent::StartRejected {
                    state: SessionState::Connecting,
                });
            }
            Some(SessionCommand::Stop) => return false,
            Some(SessionCommand::Shutdown) | None => return true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
