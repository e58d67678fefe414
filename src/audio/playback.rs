//! Playback of synthesized PCM16 audio received from the backend.
//!
//! [`CpalPlayback`] opens the default output device lazily on the first
//! [`render`](AudioOutput::render) call and keeps that single stream alive
//! for every later call.  Each render becomes an independent voice in a
//! [`Mixer`]: overlapping renders are summed, finished voices are dropped by
//! the output callback.  There is no stop primitive.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use thiserror::Error;

use crate::audio::pcm;
use crate::audio::resample::resample_clip;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    /// No output device, or the platform rejected the stream.
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The playback thread could not be spawned.
    #[error("failed to spawn playback thread: {0}")]
    Thread(String),

    /// The payload could not be converted to the device rate.
    #[error("cannot convert payload to the device rate: {0}")]
    Resample(String),
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Sink for inbound PCM16 payloads.
pub trait AudioOutput: Send {
    /// Schedule `pcm16` (little-endian mono at `sample_rate` Hz) for
    /// immediate playback.
    fn render(&mut self, pcm16: &[u8], sample_rate: u32) -> Result<(), PlaybackError>;
}

/// Discards everything.  Used when playback is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn render(&mut self, _pcm16: &[u8], _sample_rate: u32) -> Result<(), PlaybackError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Voice {
    samples: Vec<f32>,
    pos: usize,
}

/// Sums any number of concurrently playing mono voices.
#[derive(Default)]
pub struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playing `samples` from the next output frame.
    pub fn add(&mut self, samples: Vec<f32>) {
        if !samples.is_empty() {
            self.voices.push(Voice { samples, pos: 0 });
        }
    }

    /// Number of voices that still have samples left.
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Produce the next mono sample, clamped to `[-1, 1]`.
    pub fn next_sample(&mut self) -> f32 {
        let mut sum = 0.0;
        for voice in &mut self.voices {
            if let Some(&s) = voice.samples.get(voice.pos) {
                sum += s;
                voice.pos += 1;
            }
        }
        sum.clamp(-1.0, 1.0)
    }

    /// Release voices that have played to the end.
    pub fn reap(&mut self) {
        self.voices.retain(|v| v.pos < v.samples.len());
    }

    /// Fill an interleaved buffer, writing each mono sample to every channel.
    pub fn fill<T>(&mut self, output: &mut [T], channels: u16)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let channels = channels.max(1) as usize;
        for frame in output.chunks_mut(channels) {
            let value = T::from_sample(self.next_sample());
            for slot in frame.iter_mut() {
                *slot = value;
            }
        }
        self.reap();
    }
}

// ---------------------------------------------------------------------------
// CpalPlayback
// ---------------------------------------------------------------------------

struct PlaybackWorker {
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// Plays inbound audio through the default `cpal` output device.
#[derive(Default)]
pub struct CpalPlayback {
    worker: Option<PlaybackWorker>,
}

impl CpalPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_started(&mut self) -> Result<&PlaybackWorker, PlaybackError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => start_output()?,
        };
        Ok(self.worker.insert(worker))
    }
}

impl AudioOutput for CpalPlayback {
    fn render(&mut self, pcm16: &[u8], sample_rate: u32) -> Result<(), PlaybackError> {
        let samples = pcm::decode(pcm16);
        if samples.is_empty() {
            return Ok(());
        }

        let worker = self.ensure_started()?;
        let samples = resample_clip(&samples, sample_rate, worker.device_rate)
            .map_err(|e| PlaybackError::Resample(e.to_string()))?;
        log::trace!("playback: scheduling {} samples", samples.len());

        if let Ok(mut mixer) = worker.mixer.lock() {
            mixer.add(samples);
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn start_output() -> Result<PlaybackWorker, PlaybackError> {
    let mixer = Arc::new(Mutex::new(Mixer::new()));
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, PlaybackError>>();

    let mixer_thread = Arc::clone(&mixer);
    let thread = std::thread::Builder::new()
        .name("audio-playback".into())
        .spawn(move || {
            let (stream, device_rate) = match open_output_stream(mixer_thread) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(PlaybackError::DeviceUnavailable(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(device_rate));
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| PlaybackError::Thread(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(device_rate)) => {
            log::info!("playback: output stream started ({device_rate} Hz)");
            Ok(PlaybackWorker {
                mixer,
                device_rate,
                stop_tx,
                thread: Some(thread),
            })
        }
        Ok(Err(e)) => {
            let _ = thread.join();
            log::warn!("playback: {e}");
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(PlaybackError::Thread("playback thread exited early".into()))
        }
    }
}

fn open_output_stream(mixer: Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::DeviceUnavailable("no default output device".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let device_rate = config.sample_rate.0;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, mixer),
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, mixer),
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, mixer),
        cpal::SampleFormat::I32 => build_output::<i32>(&device, &config, mixer),
        other => {
            return Err(PlaybackError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )))
        }
    }
    .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

    Ok((stream, device_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = config.channels;
    device.build_output_stream(
        config,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| match mixer.lock() {
            Ok(mut mixer) => mixer.fill(output, channels),
            Err(_) => output.fill(T::EQUILIBRIUM),
        },
        |err: cpal::StreamError| {
            log::error!("playback: stream error: {err}");
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
    use super::*;

    #[test]
    fn overlapping_voices_are_summed() {
        let mut mixer = Mixer::new();
        mixer.add(vec![0.25, 0.25, 0.25]);
        mixer.add(vec![0.5]);

        assert!((mixer.next_sample() - 0.75).abs() < 1e-6);
        assert!((mixer.next_sample() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn sum_is_clamped() {
        let mut mixer = Mixer::new();
        mixer.add(vec![0.8]);
        mixer.add(vec![0.8]);
        assert_eq!(mixer.next_sample(), 1.0);
    }

    #[test]
    fn finished_voices_release_themselves() {
        let mut mixer = Mixer::new();
        mixer.add(vec![0.1, 0.1]);
        mixer.add(vec![0.1; 6]);

        let mut out = [0.0_f32; 4];
        mixer.fill(&mut out, 2); // two frames
        assert_eq!(mixer.active(), 1);

        let mut out = [0.0_f32; 8];
        mixer.fill(&mut out, 2);
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn fill_duplicates_into_every_channel_and_pads_with_silence() {
        let mut mixer = Mixer::new();
        mixer.add(vec![0.5]);

        let mut out = [9.0_f32; 4];
        mixer.fill(&mut out, 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn empty_payload_adds_no_voice() {
        let mut mixer = Mixer::new();
        mixer.add(Vec::new());
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn null_output_accepts_anything() {
        let mut out = NullOutput;
        assert!(out.render(&[0, 1, 2], 16_000).is_ok());
    }

    #[test]
    fn decoded_payload_matches_pcm16_scale() {
        let samples = pcm::decode(&[0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(samples, vec![0.5, -0.5]);
    }
}
