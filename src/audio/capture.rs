//! Microphone capture via `cpal`.
//!
//! [`AudioInput::acquire`] resolves the input device and picks a stream
//! configuration; [`Microphone::start`] begins delivering encoded
//! [`AudioChunk`]s to a callback; [`Microphone::stop`] tears the stream down
//! and guarantees that callback is never invoked again.
//!
//! `cpal::Stream` is not `Send` on every platform, so [`CpalMicrophone`]
//! builds and owns the stream on a dedicated `audio-capture` thread.  The
//! thread reports readiness (or the device error) over a channel, then parks
//! until it is told to stop.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use thiserror::Error;

use crate::audio::chunker::{AudioChunk, BlockChunker};
use crate::audio::resample::{downmix_into, StreamResampler};
use crate::config::AudioConfig;

/// Callback invoked with each encoded chunk, in capture order.
pub type ChunkCallback = Box<dyn FnMut(AudioChunk) + Send + 'static>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or starting the microphone.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    /// The platform has no usable input device, refused access, or rejected
    /// the stream configuration.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `start` was called on a microphone that is already capturing.
    #[error("capture is already running")]
    AlreadyRunning,

    /// The capture thread could not be spawned.
    #[error("failed to spawn capture thread: {0}")]
    Thread(String),

    /// Sample rates or block size the processing chain cannot work with.
    #[error("invalid capture settings: {0}")]
    InvalidConfig(String),
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        CaptureError::DeviceUnavailable(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(e: cpal::BuildStreamError) -> Self {
        CaptureError::DeviceUnavailable(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(e: cpal::PlayStreamError) -> Self {
        CaptureError::DeviceUnavailable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Source of microphone handles.
///
/// Object-safe so the session orchestrator can hold a `Box<dyn AudioInput>`
/// and tests can substitute a device-free double.
pub trait AudioInput: Send + Sync {
    /// Acquire exclusive access to the input described by `config`.
    fn acquire(&self, config: &AudioConfig) -> Result<Box<dyn Microphone>, CaptureError>;
}

/// An acquired input device.  Dropping it releases the device.
pub trait Microphone: Send {
    /// Begin capturing.  `on_chunk` receives every completed block in order.
    fn start(&mut self, on_chunk: ChunkCallback) -> Result<(), CaptureError>;

    /// Stop capturing.  No `on_chunk` call happens after this returns.
    /// Calling it when not running is a no-op.
    fn stop(&mut self);

    /// `true` between a successful `start` and the next `stop`.
    fn is_running(&self) -> bool;
}

// ---------------------------------------------------------------------------
// ChunkSink
// ---------------------------------------------------------------------------

/// Cancellable slot holding the chunk callback.
///
/// The audio thread holds the lock for the duration of each callback, so once
/// [`close`](Self::close) returns no invocation is in flight and none will
/// follow.
#[derive(Clone)]
pub struct ChunkSink {
    slot: Arc<Mutex<Option<ChunkCallback>>>,
}

impl ChunkSink {
    pub fn new(on_chunk: ChunkCallback) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(on_chunk))),
        }
    }

    /// Hand `chunk` to the callback.  Returns `false` once closed.
    pub fn deliver(&self, chunk: AudioChunk) -> bool {
        match self.slot.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(callback) => {
                    callback(chunk);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Drop the callback.  Idempotent.
    pub fn close(&self) {
        let callback = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(callback);
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// CaptureProcessor
// ---------------------------------------------------------------------------

/// Device buffer → mono → wire rate → fixed blocks → callback.
///
/// Runs inside the cpal data callback; never blocks on I/O.
pub struct CaptureProcessor {
    channels: u16,
    mono: Vec<f32>,
    resampler: StreamResampler,
    chunker: BlockChunker,
    sink: ChunkSink,
}

impl CaptureProcessor {
    pub fn new(
        channels: u16,
        device_rate: u32,
        wire_rate: u32,
        block_samples: usize,
        sink: ChunkSink,
    ) -> Result<Self, CaptureError> {
        if block_samples == 0 {
            return Err(CaptureError::InvalidConfig("block size must be > 0".into()));
        }
        let resampler = StreamResampler::new(device_rate, wire_rate)
            .map_err(|e| CaptureError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            channels,
            mono: Vec::new(),
            resampler,
            chunker: BlockChunker::new(block_samples),
            sink,
        })
    }

    /// Process one interleaved device buffer.
    pub fn process(&mut self, interleaved: &[f32]) {
        if self.sink.is_closed() {
            return;
        }

        self.mono.clear();
        downmix_into(interleaved, self.channels, &mut self.mono);
        let wire = match self.resampler.process(&self.mono) {
            Ok(wire) => wire,
            Err(e) => {
                log::error!("capture: resampling failed, dropping buffer: {e}");
                return;
            }
        };

        for chunk in self.chunker.push(&wire) {
            if !self.sink.deliver(chunk) {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CpalInput
// ---------------------------------------------------------------------------

/// Production [`AudioInput`] backed by the default `cpal` host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalInput;

impl CpalInput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioInput for CpalInput {
    /// Resolve the configured (or default) input device and choose a stream
    /// configuration, preferring the wire rate with the fewest channels.
    fn acquire(&self, config: &AudioConfig) -> Result<Box<dyn Microphone>, CaptureError> {
        config
            .validate()
            .map_err(|e| CaptureError::InvalidConfig(e.to_string()))?;
        let device = resolve_input_device(config.input_device.as_deref())?;
        let device_name = device.name().ok();
        let supported = choose_input_config(&device, config.sample_rate)?;

        if config.echo_cancellation || config.noise_suppression {
            log::debug!(
                "capture: echo cancellation / noise suppression requested but not exposed by cpal"
            );
        }

        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();

        log::info!(
            "capture: acquired {:?} ({} Hz, {} ch, {:?})",
            device_name.as_deref().unwrap_or("default input"),
            stream_config.sample_rate.0,
            stream_config.channels,
            sample_format
        );

        Ok(Box::new(CpalMicrophone {
            device_name,
            stream_config,
            sample_format,
            wire_rate: config.sample_rate,
            block_samples: config.block_samples,
            worker: None,
        }))
    }
}

fn resolve_input_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no input device named {wanted:?}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into())),
    }
}

fn is_supported_format(format: cpal::SampleFormat) -> bool {
    matches!(
        format,
        cpal::SampleFormat::F32
            | cpal::SampleFormat::I16
            | cpal::SampleFormat::U16
            | cpal::SampleFormat::I32
    )
}

fn choose_input_config(
    device: &cpal::Device,
    wire_rate: u32,
) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    let wanted = cpal::SampleRate(wire_rate);

    if let Ok(ranges) = device.supported_input_configs() {
        let mut matching: Vec<_> = ranges
            .filter(|r| is_supported_format(r.sample_format()))
            .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
            .collect();
        matching.sort_by_key(|r| r.channels());
        if let Some(range) = matching.into_iter().next() {
            return Ok(range.with_sample_rate(wanted));
        }
    }

    // Device cannot run at the wire rate: capture natively and resample.
    let default = device.default_input_config()?;
    if !is_supported_format(default.sample_format()) {
        return Err(CaptureError::DeviceUnavailable(format!(
            "unsupported sample format {:?}",
            default.sample_format()
        )));
    }
    Ok(default)
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

struct CaptureWorker {
    sink: ChunkSink,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// An acquired `cpal` input device.
pub struct CpalMicrophone {
    device_name: Option<String>,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    wire_rate: u32,
    block_samples: usize,
    worker: Option<CaptureWorker>,
}

impl Microphone for CpalMicrophone {
    fn start(&mut self, on_chunk: ChunkCallback) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let sink = ChunkSink::new(on_chunk);
        let processor = CaptureProcessor::new(
            self.stream_config.channels,
            self.stream_config.sample_rate.0,
            self.wire_rate,
            self.block_samples,
            sink.clone(),
        )?;

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

        let device_name = self.device_name.clone();
        let config = self.stream_config.clone();
        let sample_format = self.sample_format;

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream =
                    match open_input_stream(device_name.as_deref(), &config, sample_format, processor)
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stop() (or the handle is dropped).
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("capture: stream thread exiting");
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Thread("capture thread exited early".into())));

        if let Err(e) = ready {
            sink.close();
            let _ = thread.join();
            log::warn!("capture: failed to start: {e}");
            return Err(e);
        }

        log::info!(
            "capture: started ({} samples per chunk)",
            self.block_samples
        );

        self.worker = Some(CaptureWorker {
            sink,
            stop_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        worker.sink.close();
        let _ = worker.stop_tx.send(());
        if let Some(thread) = worker.thread.take() {
            if thread.join().is_err() {
                log::warn!("capture: stream thread panicked");
            }
        }
        log::info!("capture: stopped");
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input_stream(
    device_name: Option<&str>,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    processor: CaptureProcessor,
) -> Result<cpal::Stream, CaptureError> {
    let device = resolve_input_device(device_name)?;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, config, processor)?,
        cpal::SampleFormat::I16 => build_input::<i16>(&device, config, processor)?,
        cpal::SampleFormat::U16 => build_input::<u16>(&device, config, processor)?,
        cpal::SampleFormat::I32 => build_input::<i32>(&device, config, processor)?,
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };
    Ok(stream)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut processor: CaptureProcessor,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
            processor.process(&scratch);
        },
        |err: cpal::StreamError| {
            log::error!("capture: stream error: {err}");
        },
        None,
    )
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::mock::{MockInput, MockStats};
    use super::*;

    fn collecting_sink() -> (ChunkSink, Arc<Mutex<Vec<AudioChunk>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let sink = ChunkSink::new(Box::new(move |chunk| {
            seen_cb.lock().unwrap().push(chunk);
        }));
        (sink, seen)
    }

    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
        assert_send::<ChunkSink>();
        assert_send::<CaptureProcessor>();
    }

    #[test]
    fn closed_sink_never_invokes_callback() {
        let (sink, seen) = collecting_sink();
        assert!(sink.deliver(AudioChunk { seq: 0, data: vec![0, 0] }));

        sink.close();
        sink.close();
        assert!(sink.is_closed());
        assert!(!sink.deliver(AudioChunk { seq: 1, data: vec![0, 0] }));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].seq, 0);
    }

    #[test]
    fn processor_downmixes_and_resamples_to_wire_format() {
        let (sink, seen) = collecting_sink();
        // 48 kHz stereo device, 16 kHz mono wire, 160-sample blocks (10 ms).
        let mut processor = CaptureProcessor::new(2, 48_000, 16_000, 160, sink).unwrap();

        // One second of a steady stereo tone, in buffers that never match
        // the block or resampler chunk size.
        let frames: Vec<f32> = (0..48_000)
            .flat_map(|i| {
                let s = (i as f32 * 220.0 * std::f32::consts::TAU / 48_000.0).sin() * 0.5;
                [s, s]
            })
            .collect();
        for buffer in frames.chunks(2 * 1_021) {
            processor.process(buffer);
        }

        let seen = seen.lock().unwrap();
        // 16 000 wire samples, less at most one resampler chunk still queued.
        assert!((97..=100).contains(&seen.len()), "got {} blocks", seen.len());
        for (i, chunk) in seen.iter().enumerate() {
            assert_eq!(chunk.seq, i as u64);
            assert_eq!(chunk.samples(), 160);
        }

        let peak = seen[50..]
            .iter()
            .flat_map(|c| crate::audio::pcm::decode(&c.data))
            .fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }

    #[test]
    fn processor_passes_wire_rate_mono_straight_through() {
        let (sink, seen) = collecting_sink();
        let mut processor = CaptureProcessor::new(1, 16_000, 16_000, 4, sink).unwrap();

        processor.process(&[0.5; 6]);
        processor.process(&[0.5; 2]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // 0.5 * 32767 = 16383 → 0x3FFF
        assert_eq!(&seen[0].data[0..2], &[0xFF, 0x3F]);
    }

    #[test]
    fn processor_rejects_unusable_settings() {
        let (sink, _) = collecting_sink();
        assert!(matches!(
            CaptureProcessor::new(1, 48_000, 16_000, 0, sink.clone()),
            Err(CaptureError::InvalidConfig(_))
        ));
        assert!(matches!(
            CaptureProcessor::new(1, 48_000, 0, 160, sink),
            Err(CaptureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn acquire_rejects_zero_values_before_touching_a_device() {
        let config = AudioConfig {
            block_samples: 0,
            ..AudioConfig::default()
        };
        match CpalInput::new().acquire(&config) {
            Err(CaptureError::InvalidConfig(msg)) => assert!(msg.contains("block_samples")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("zero block size must be rejected"),
        }

        let config = AudioConfig {
            sample_rate: 0,
            ..AudioConfig::default()
        };
        assert!(matches!(
            CpalInput::new().acquire(&config),
            Err(CaptureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn processor_stops_after_sink_closes() {
        let (sink, seen) = collecting_sink();
        let mut processor = CaptureProcessor::new(1, 16_000, 16_000, 4, sink.clone()).unwrap();

        processor.process(&[0.0; 4]);
        sink.close();
        processor.process(&[0.0; 8]);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn mock_microphone_tracks_lifecycle() {
        let input = MockInput::with_chunks(vec![AudioChunk { seq: 0, data: vec![1, 2] }]);
        let stats = Arc::clone(&input.stats);

        let mut mic = input.acquire(&AudioConfig::default()).unwrap();
        let delivered = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&delivered);
        mic.start(Box::new(move |_| *counter.lock().unwrap() += 1))
            .unwrap();
        assert!(mic.is_running());
        assert_eq!(*delivered.lock().unwrap(), 1);

        mic.stop();
        mic.stop();
        assert!(!mic.is_running());
        drop(mic);

        assert_eq!(MockStats::get(&stats.acquired), 1);
        assert_eq!(MockStats::get(&stats.started), 1);
        assert_eq!(stats.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(MockStats::get(&stats.released), 1);
    }

    #[test]
    fn capture_error_messages() {
        let e = CaptureError::DeviceUnavailable("permission denied".into());
        assert!(e.to_string().contains("permission denied"));
        assert_eq!(
            CaptureError::AlreadyRunning.to_string(),
            "capture is already running"
        );
    }
}
