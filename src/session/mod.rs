//! Streaming session orchestration.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_stream::audio::{CpalInput, CpalPlayback};
//! use voice_stream::config::AppConfig;
//! use voice_stream::session::{new_shared_state, session_channel, SessionOrchestrator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = new_shared_state();
//!     let (events_tx, _events) = tokio::sync::mpsc::unbounded_channel();
//!     let (handle, commands) = session_channel();
//!
//!     let orchestrator = SessionOrchestrator::new(
//!         AppConfig::load().unwrap_or_default(),
//!         state.clone(),
//!         Box::new(CpalInput::new()),
//!         Box::new(CpalPlayback::new()),
//!         events_tx,
//!     );
//!     tokio::spawn(orchestrator.run(commands));
//!
//!     handle.start_session().await.unwrap();
//!     // ...
//!     handle.stop_session().await.unwrap();
//!     println!("{}", state.lock().unwrap().transcript.as_str());
//! }
//! ```

pub mod orchestrator;
pub mod state;

pub use orchestrator::{
    session_channel, SessionCommand, SessionEvent, SessionHandle, SessionOrchestrator,
};
pub use state::{
    new_shared_state, ConnectionStatus, SessionSnapshot, SessionState, SharedState, Transcript,
};
