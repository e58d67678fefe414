//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable that overrides [`ServerConfig::origin`].
pub const ORIGIN_ENV: &str = "VOICE_STREAM_ORIGIN";

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the streaming backend lives and how the connection behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Origin of the hosting service, e.g. `http://localhost:8000`.
    ///
    /// The WebSocket endpoint is derived from it: `https` → `wss`, anything
    /// else → `ws`, path `/ws`.  A full `ws://` / `wss://` URL is used as-is.
    pub origin: String,
    /// Seconds to wait for the WebSocket handshake before giving up.
    pub connect_timeout_secs: u64,
    /// Send the `close` text command before closing the socket so the
    /// backend can flush its provider cleanly.
    pub send_close_command: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000".into(),
            connect_timeout_secs: 10,
            send_close_command: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture and chunk framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Wire sample rate in Hz.  The backend expects 16 000.
    pub sample_rate: u32,
    /// Samples per outbound chunk.  4096 samples @ 16 kHz = 256 ms.
    pub block_samples: usize,
    /// Input device name, or `None` for the system default.
    pub input_device: Option<String>,
    /// Request echo cancellation from the platform (best-effort).
    pub echo_cancellation: bool,
    /// Request noise suppression from the platform (best-effort).
    pub noise_suppression: bool,
}

impl AudioConfig {
    /// Reject values the capture chain cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("audio.sample_rate must be > 0");
        }
        if self.block_samples == 0 {
            bail!("audio.block_samples must be > 0");
        }
        Ok(())
    }

    /// Wall-clock length of one chunk in milliseconds.
    pub fn chunk_millis(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.block_samples as u64 * 1_000 / self.sample_rate as u64
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_samples: 4_096,
            input_device: None,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Settings for playing back synthesized audio received from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Play inbound binary frames through the default output device.
    pub enabled: bool,
    /// Sample rate of inbound PCM16 payloads (fixed by the backend).
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 16_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_stream::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Persist to an explicit path
/// config.save_to(std::path::Path::new("settings.toml")).unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend location and connection behaviour.
    pub server: ServerConfig,
    /// Capture / framing settings.
    pub audio: AudioConfig,
    /// Playback of inbound audio.
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`,
    /// then apply the [`ORIGIN_ENV`] override.
    ///
    /// Returns defaults when the file does not exist yet so callers never
    /// need to special-case a missing file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&AppPaths::new().settings_file)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        if self.playback.sample_rate == 0 {
            bail!("playback.sample_rate must be > 0");
        }
        if self.server.connect_timeout_secs == 0 {
            bail!("server.connect_timeout_secs must be > 0");
        }
        Ok(())
    }

    /// Save to an explicit path, creating parent directories as needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Replace the server origin with `VOICE_STREAM_ORIGIN` when it is set
    /// to a non-empty value.
    pub fn apply_env(&mut self) {
        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            self.override_origin(&origin);
        }
    }

    /// Replace the server origin unless `origin` is blank.
    pub fn override_origin(&mut self, origin: &str) {
        let origin = origin.trim();
        if !origin.is_empty() {
            self.server.origin = origin.to_string();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
