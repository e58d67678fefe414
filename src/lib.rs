//! Real-time microphone streaming client for a speech-to-text backend.
//!
//! Captures the microphone, frames it into PCM16 chunks, streams them over a
//! WebSocket, accumulates the transcript the backend sends back and plays
//! any synthesized audio it returns.

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use error::SessionError;
