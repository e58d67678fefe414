//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the server
//! connection, capture and playback, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, PlaybackConfig, ServerConfig, ORIGIN_ENV};
