//! Audio pipeline: microphone capture to PCM16 chunks, and PCM16 playback.
//!
//! # Capture path
//!
//! ```text
//! Microphone → cpal callback → downmix → StreamResampler (16 kHz)
//!           → BlockChunker (4096 samples) → pcm::encode → AudioChunk → callback
//! ```
//!
//! # Playback path
//!
//! ```text
//! binary frame → pcm::decode → resample_clip (device rate) → Mixer → cpal output
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voice_stream::audio::{AudioInput, CpalInput};
//! use voice_stream::config::AudioConfig;
//!
//! let mut mic = CpalInput::new().acquire(&AudioConfig::default()).unwrap();
//! mic.start(Box::new(|chunk| {
//!     println!("chunk #{} ({} bytes)", chunk.seq, chunk.data.len());
//! }))
//! .unwrap();
//! // ...
//! mic.stop();
//! ```

pub mod capture;
pub mod chunker;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use capture::{
    AudioInput, CaptureError, CaptureProcessor, ChunkCallback, ChunkSink, CpalInput, Microphone,
};
pub use chunker::{AudioChunk, BlockChunker};
pub use playback::{AudioOutput, CpalPlayback, Mixer, NullOutput, PlaybackError};
pub use resample::{downmix_into, resample_clip, ResampleError, StreamResampler};
