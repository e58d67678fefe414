//! Sample-rate and channel adaptation between devices and the wire format.
//!
//! The wire format is **16 kHz mono**.  Capture devices frequently run at
//! 44.1 / 48 kHz stereo and output devices rarely accept 16 kHz mono.
//!
//! * [`downmix_into`] folds interleaved frames to mono.
//! * [`StreamResampler`] converts a continuous signal delivered in
//!   arbitrarily sized buffers.  Input is queued until a full FFT chunk is
//!   available, so the filter state carries across callback boundaries and
//!   the output timeline never drifts from the input.
//! * [`resample_clip`] converts one self-contained clip (inbound playback
//!   payloads) and trims the filter delay so the clip keeps its length.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Sub-chunks per FFT block handed to rubato.
const SUB_CHUNKS: usize = 2;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid sample rate conversion {from} Hz -> {to} Hz")]
    InvalidRate { from: u32, to: u32 },

    #[error("resampler setup failed: {0}")]
    Setup(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

// ---------------------------------------------------------------------------
// Channel mixing
// ---------------------------------------------------------------------------

/// Append the mono mix of `interleaved` (`channels` samples per frame) to
/// `out`.  A trailing partial frame is ignored; zero channels appends nothing.
///
/// ```rust
/// use voice_stream::audio::downmix_into;
///
/// let mut mono = Vec::new();
/// downmix_into(&[0.5_f32, -0.5, 0.2, 0.4], 2, &mut mono); // L R L R
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_into(interleaved: &[f32], channels: u16, out: &mut Vec<f32>) {
    let width = usize::from(channels);
    if width <= 1 {
        if width == 1 {
            out.extend_from_slice(interleaved);
        }
        return;
    }

    let scale = 1.0 / width as f32;
    out.reserve(interleaved.len() / width);
    for frame in interleaved.chunks_exact(width) {
        out.push(frame.iter().copied().sum::<f32>() * scale);
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Mono rate converter for a continuous stream.
///
/// Equal rates pass samples straight through.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    chunk_frames: usize,
}

impl StreamResampler {
    /// Build a converter from `from_rate` Hz to `to_rate` Hz working in
    /// roughly 10 ms input chunks.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, ResampleError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(ResampleError::InvalidRate {
                from: from_rate,
                to: to_rate,
            });
        }

        if from_rate == to_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                chunk_frames: 0,
            });
        }

        let wanted = (from_rate as usize / 100).max(SUB_CHUNKS);
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            wanted,
            SUB_CHUNKS,
            1,
        )?;
        // rubato rounds the chunk to a whole number of FFT blocks.
        let chunk_frames = inner.input_frames_next();

        Ok(Self {
            inner: Some(inner),
            pending: Vec::with_capacity(chunk_frames * 2),
            chunk_frames,
        })
    }

    /// Queue `samples` and return whatever output is ready.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, ResampleError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_frames {
            let chunk = &self.pending[consumed..consumed + self.chunk_frames];
            let mut frames = inner.process(&[chunk], None)?;
            if let Some(mono) = frames.pop() {
                out.extend(mono);
            }
            consumed += self.chunk_frames;
        }
        self.pending.drain(..consumed);
        Ok(out)
    }

    /// Pad the queued tail with silence to one full chunk and convert it.
    /// With nothing queued a whole chunk of silence is pushed through, which
    /// drains the filter's delay line.
    pub fn flush(&mut self) -> Result<Vec<f32>, ResampleError> {
        if self.inner.is_none() {
            return Ok(std::mem::take(&mut self.pending));
        }
        let missing = self.chunk_frames - self.pending.len();
        self.pending.resize(self.pending.len() + missing, 0.0);
        self.process(&[])
    }

    /// Output frames by which the converter lags its input.
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.output_delay())
    }

    /// Input frames converted per step (0 when passing through).
    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Input samples waiting for a full chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forget queued input and filter history.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot clips
// ---------------------------------------------------------------------------

/// Convert a self-contained mono clip, returning
/// `samples.len() * to_rate / from_rate` samples aligned with the input.
pub fn resample_clip(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, ResampleError> {
    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    if resampler.chunk_frames() == 0 || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let delay = resampler.output_delay();

    let mut out = resampler.process(samples)?;
    while out.len() < expected + delay {
        out.extend(resampler.flush()?);
    }
    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
