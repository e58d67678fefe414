//! WebSocket transport to the speech backend.
//!
//! ```text
//! origin ──endpoint_url──▶ ws(s)://host/ws
//!
//! TransportSender::send ─▶ outbound queue ─▶ writer task ─▶ socket
//! socket ─▶ reader task ─▶ parse_text ─▶ TransportEvent channel
//! ```

pub mod endpoint;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use endpoint::{endpoint_url, WS_PATH};
pub use protocol::{parse_text, InboundMessage, ProtocolError, Provider, CLOSE_COMMAND};
pub use session::{
    ConnectionState, TransportError, TransportEvent, TransportEvents, TransportSender,
    TransportSession,
};
