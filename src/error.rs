//! Caller-facing error taxonomy.
//!
//! Component errors ([`CaptureError`], [`TransportError`], [`PlaybackError`])
//! fold into [`SessionError`] so a front end only has to match on one type.

use thiserror::Error;

use crate::audio::{CaptureError, PlaybackError};
use crate::transport::TransportError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Microphone missing, denied, or rejected.  Fatal to `start`; retrying
    /// later may succeed.
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// The WebSocket could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection went away.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// An inbound frame could not be decoded.  The message is skipped.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The backend reported a problem.  Non-fatal.
    #[error("server error: {0}")]
    RemoteError(String),

    /// The playback device failed.  Inbound audio is dropped.
    #[error("playback failed: {0}")]
    Playback(String),

    /// A bug or resource failure inside this process, such as a capture
    /// thread that could not be spawned or a microphone started twice.
    #[error("internal error: {0}")]
    Internal(String),

    /// The orchestrator task is no longer running.
    #[error("session orchestrator is not running")]
    OrchestratorGone,
}

impl SessionError {
    /// Whether the error ends the session (as opposed to being reported and
    /// skipped).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::DeviceUnavailable(_)
                | SessionError::ConnectionFailed(_)
                | SessionError::ConnectionClosed(_)
                | SessionError::Internal(_)
                | SessionError::OrchestratorGone
        )
    }
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::DeviceUnavailable(msg) => SessionError::DeviceUnavailable(msg),
            other @ CaptureError::InvalidConfig(_) => {
                SessionError::DeviceUnavailable(other.to_string())
            }
            other @ (CaptureError::AlreadyRunning | CaptureError::Thread(_)) => {
                SessionError::Internal(other.to_string())
            }
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::ConnectionFailed(e.to_string())
    }
}

impl From<PlaybackError> for SessionError {
    fn from(e: PlaybackError) -> Self {
        SessionError::Playback(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_capture_errors_become_device_unavailable() {
        let err: SessionError = CaptureError::DeviceUnavailable("denied".into()).into();
        assert_eq!(err, SessionError::DeviceUnavailable("denied".into()));

        let err: SessionError = CaptureError::InvalidConfig("block size must be > 0".into()).into();
        assert_eq!(
            err,
            SessionError::DeviceUnavailable("invalid capture settings: block size must be > 0".into())
        );
    }

    #[test]
    fn capture_bugs_are_internal_not_device_errors() {
        let err: SessionError = CaptureError::AlreadyRunning.into();
        assert_eq!(err, SessionError::Internal("capture is already running".into()));

        let err: SessionError = CaptureError::Thread("resource exhausted".into()).into();
        assert_eq!(
            err,
            SessionError::Internal("failed to spawn capture thread: resource exhausted".into())
        );
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("internal error"));
    }

    #[test]
    fn transport_errors_become_connection_failed() {
        let err: SessionError = TransportError::ConnectTimeout(10).into();
        assert_eq!(
            err,
            SessionError::ConnectionFailed("connection timed out after 10s".into())
        );
    }

    #[test]
    fn only_session_ending_errors_are_fatal() {
        assert!(SessionError::DeviceUnavailable(String::new()).is_fatal());
        assert!(SessionError::ConnectionClosed(String::new()).is_fatal());
        assert!(!SessionError::ProtocolError(String::new()).is_fatal());
        assert!(!SessionError::RemoteError(String::new()).is_fatal());
        assert!(!SessionError::Playback(String::new()).is_fatal());
        assert!(SessionError::Internal(String::new()).is_fatal());
    }
}
