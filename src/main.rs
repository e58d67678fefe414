//! Command-line front end.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] (defaults on first run), then apply the
//!    `VOICE_STREAM_ORIGIN` variable and an optional origin argument.
//! 3. Create the tokio runtime.
//! 4. Spawn the session orchestrator with the cpal microphone and speaker.
//! 5. Start a session and print transcript fragments as they arrive.
//! 6. Ctrl-C stops the session; the process exits once it has ended.
//!
//! ```text
//! voice-stream [ORIGIN]
//! voice-stream https://asr.example.com
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use voice_stream::{
    audio::{AudioOutput, CpalInput, CpalPlayback, NullOutput},
    config::AppConfig,
    session::{new_shared_state, session_channel, SessionEvent, SessionOrchestrator},
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-stream starting up");

    // 2. Configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        let mut config = AppConfig::default();
        config.apply_env();
        config
    });
    if let Some(origin) = std::env::args().nth(1) {
        config.override_origin(&origin);
    }
    log::info!(
        "streaming to {} ({} ms chunks)",
        config.server.origin,
        config.audio.chunk_millis()
    );

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 4. Orchestrator
    let output: Box<dyn AudioOutput> = if config.playback.enabled {
        Box::new(CpalPlayback::new())
    } else {
        Box::new(NullOutput)
    };

    let state = new_shared_state();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (handle, commands) = session_channel();
    let orchestrator = SessionOrchestrator::new(
        config,
        Arc::clone(&state),
        Box::new(CpalInput::new()),
        output,
        events_tx,
    );
    let task = tokio::spawn(orchestrator.run(commands));

    // 5. Session
    handle.start_session().await?;

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if !report(&event) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                // 6. Ctrl-C
                log::info!("interrupt received, stopping session");
                interrupted = true;
                handle.stop_session().await?;
            }
        }
    }

    handle.shutdown().await?;
    task.await.context("session task panicked")?;

    let snap = state
        .lock()
        .map_err(|_| anyhow::anyhow!("session state poisoned"))?
        .clone();
    log::info!(
        "session finished: {} chunks sent, {} transcript chars",
        snap.chunks_sent,
        snap.transcript.as_str().len()
    );
    Ok(())
}

/// Print one event.  Returns `false` once the session is over.
fn report(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::Transcription { fragment, .. } => println!("{fragment}"),
        SessionEvent::StatusChanged(status) => eprintln!("[{}]", status.label()),
        SessionEvent::Connected { provider } => eprintln!("[provider: {provider}]"),
        SessionEvent::RemoteError { error } | SessionEvent::ProtocolError { error } => {
            eprintln!("{error}")
        }
        SessionEvent::StartFailed { error } => {
            eprintln!("could not start: {error}");
            return false;
        }
        SessionEvent::Ended { error } => {
            if let Some(error) = error {
                eprintln!("session ended: {error}");
            }
            return false;
        }
        _ => {}
    }
    true
}
