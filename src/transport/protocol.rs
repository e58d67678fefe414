//! Wire protocol spoken over the `/ws` socket.
//!
//! | Direction | Frame  | Payload                                         |
//! |-----------|--------|-------------------------------------------------|
//! | out       | binary | one [`AudioChunk`](crate::audio::AudioChunk)    |
//! | out       | text   | `close` end-of-stream control command           |
//! | in        | text   | `{"type":"connected","provider":..}`            |
//! | in        | text   | `{"type":"transcription","text":..}`            |
//! | in        | text   | `{"type":"error","message":..}`                 |
//! | in        | binary | PCM16 LE mono @ 16 kHz synthesized audio        |
//!
//! Text frames with an unknown `type` are ignored so newer backends can add
//! message kinds without breaking older clients.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Text command asking the backend to end the stream.
pub const CLOSE_COMMAND: &str = "close";

// ---------------------------------------------------------------------------
// InboundMessage
// ---------------------------------------------------------------------------

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The backend attached a transcription provider.
    Connected { provider: String },
    /// A transcript fragment to append.
    Transcription { text: String },
    /// A backend-reported problem.  Not fatal.
    Error { message: String },
    /// Raw PCM16 audio to play.
    AudioPayload(Vec<u8>),
}

/// A text frame that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed text frame: {0}")]
pub struct ProtocolError(pub String);

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TextFrame {
    Connected {
        #[serde(default)]
        provider: String,
    },
    Transcription {
        text: String,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Decode a text frame.
///
/// Returns `Ok(None)` for well-formed frames whose `type` this client does
/// not know.
///
/// ```rust
/// use voice_stream::transport::{parse_text, InboundMessage};
///
/// let msg = parse_text(r#"{"type":"transcription","text":"hi"}"#).unwrap();
/// assert_eq!(msg, Some(InboundMessage::Transcription { text: "hi".into() }));
///
/// assert_eq!(parse_text(r#"{"type":"ping"}"#).unwrap(), None);
/// assert!(parse_text("not json").is_err());
/// ```
pub fn parse_text(text: &str) -> Result<Option<InboundMessage>, ProtocolError> {
    let frame: TextFrame =
        serde_json::from_str(text).map_err(|e| ProtocolError(e.to_string()))?;

    Ok(match frame {
        TextFrame::Connected { provider } => Some(InboundMessage::Connected { provider }),
        TextFrame::Transcription { text } => Some(InboundMessage::Transcription { text }),
        TextFrame::Error { message } => Some(InboundMessage::Error { message }),
        TextFrame::Unknown => None,
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Transcription provider named in the `connected` message.  Informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenAiRealtime,
    Deepgram,
    ElevenLabs,
    Cartesia,
    Other(String),
}

impl Provider {
    pub fn parse(id: &str) -> Self {
        match id {
            "openai_realtime" => Provider::OpenAiRealtime,
            "deepgram" => Provider::Deepgram,
            "elevenlabs" => Provider::ElevenLabs,
            "cartesia" => Provider::Cartesia,
            other => Provider::Other(other.to_string()),
        }
    }

    /// Human-readable name.
    pub fn label(&self) -> &str {
        match self {
            Provider::OpenAiRealtime => "OpenAI Realtime",
            Provider::Deepgram => "Deepgram",
            Provider::ElevenLabs => "ElevenLabs",
            Provider::Cartesia => "Cartesia",
            Provider::Other(id) if id.is_empty() => "unknown",
            Provider::Other(id) => id,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connected() {
        let msg = parse_text(r#"{"type":"connected","provider":"deepgram"}"#).unwrap();
        assert_eq!(
            msg,
            Some(InboundMessage::Connected {
                provider: "deepgram".into()
            })
        );
    }

    #[test]
    fn connected_without_provider_is_accepted() {
        let msg = parse_text(r#"{"type":"connected"}"#).unwrap();
        assert_eq!(
            msg,
            Some(InboundMessage::Connected {
                provider: String::new()
            })
        );
    }

    #[test]
    fn parses_error() {
        let msg = parse_text(r#"{"type":"error","message":"quota exceeded"}"#).unwrap();
        assert_eq!(
            msg,
            Some(InboundMessage::Error {
                message: "quota exceeded".into()
            })
        );
    }

    #[test]
    fn extra_fields_are_ignored() {
        let msg = parse_text(r#"{"type":"transcription","text":"hi","final":true}"#).unwrap();
        assert_eq!(msg, Some(InboundMessage::Transcription { text: "hi".into() }));
    }

    #[test]
    fn unknown_type_is_skipped() {
        assert_eq!(parse_text(r#"{"type":"ping"}"#).unwrap(), None);
        assert_eq!(
            parse_text(r#"{"type":"session.updated","session":{}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(parse_text("close").is_err());
        assert!(parse_text(r#"{"text":"no type"}"#).is_err());
        assert!(parse_text(r#"{"type":"transcription"}"#).is_err());
        assert!(parse_text(r#"{"type":"error","message":42}"#).is_err());
    }

    #[test]
    fn provider_ids() {
        assert_eq!(Provider::parse("openai_realtime"), Provider::OpenAiRealtime);
        assert_eq!(Provider::parse("cartesia").to_string(), "Cartesia");
        assert_eq!(Provider::parse("whisper_local").label(), "whisper_local");
        assert_eq!(Provider::parse("").label(), "unknown");
    }
}
