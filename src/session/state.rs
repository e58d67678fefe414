//! Session state machine and the snapshot shared with the front end.
//!
//! [`SessionState`] drives the orchestrator.  [`SharedState`] carries what a
//! caller wants to display: the state, a coarse [`ConnectionStatus`], the
//! accumulated [`Transcript`] and the last error.

use std::sync::{Arc, Mutex};

use crate::error::SessionError;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// States of one streaming session.
///
/// ```text
/// Idle ──start──▶ Connecting ──socket open──▶ Active
/// Active ──stop / socket closed──▶ Closing ──released──▶ Closed ──▶ Idle
/// Connecting ──failure / stop──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing acquired.  The only state that accepts `start`.
    #[default]
    Idle,

    /// Microphone acquired, WebSocket handshake in flight.
    Connecting,

    /// Capturing and streaming.
    Active,

    /// Releasing capture and connection.
    Closing,

    /// Everything released.  Settles back to `Idle` immediately.
    Closed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Active => "Active",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Coarse status signal for a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    Recording,
    Error,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Recording => "Recording",
            ConnectionStatus::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Fragments in arrival order, each followed by a single space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript(String);

impl Transcript {
    pub fn push(&mut self, fragment: &str) {
        self.0.push_str(fragment);
        self.0.push(' ');
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot / SharedState
// ---------------------------------------------------------------------------

/// Everything a front end needs to render the session.
///
/// Written only by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: ConnectionStatus,
    pub transcript: Transcript,
    /// Provider id from the most recent `connected` message.
    pub provider: Option<String>,
    /// Most recent error, fatal or not.
    pub last_error: Option<SessionError>,
    /// Chunks handed to the transport during the current session.
    pub chunks_sent: u64,
}

/// Thread-safe handle to [`SessionSnapshot`].
///
/// Lock for a short critical section; never hold the guard across `.await`.
pub type SharedState = Arc<Mutex<SessionSnapshot>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(SessionSnapshot::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle_and_disconnected() {
        let snap = SessionSnapshot::default();
        assert_eq!(snap.state, SessionState::Idle);
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert!(snap.transcript.is_empty());
        assert!(snap.provider.is_none());
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn labels() {
        assert_eq!(SessionState::Connecting.label(), "Connecting");
        assert_eq!(SessionState::Closed.label(), "Closed");
        assert_eq!(ConnectionStatus::Recording.label(), "Recording");
        assert_eq!(ConnectionStatus::Error.label(), "Error");
    }

    #[test]
    fn transcript_appends_a_space_after_each_fragment() {
        let mut t = Transcript::default();
        t.push("hello");
        t.push("world");
        assert_eq!(t.as_str(), "hello world ");

        t.clear();
        assert!(t.is_empty());
    }

    #[test]
    fn empty_fragment_still_adds_separator() {
        let mut t = Transcript::default();
        t.push("");
        assert_eq!(t.as_str(), " ");
    }

    #[test]
    fn shared_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedState>();
    }

    #[test]
    fn shared_state_can_be_cloned_and_mutated() {
        let state = new_shared_state();
        let state2 = Arc::clone(&state);

        state.lock().unwrap().state = SessionState::Active;
        assert_eq!(state2.lock().unwrap().state, SessionState::Active);
    }
}
