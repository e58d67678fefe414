//! Linear PCM16 conversion.
//!
//! The wire format in both directions is 16-bit signed little-endian mono.
//! Encoding uses the asymmetric fixed-point scale (positive × 32767,
//! negative × 32768, truncated toward zero); decoding divides by 32768.
//!
//! ```rust
//! use voice_stream::audio::pcm;
//!
//! let bytes = pcm::encode(&[0.0, 1.0, -1.0]);
//! assert_eq!(bytes, vec![0x00, 0x00, 0xFF, 0x7F, 0x00, 0x80]);
//! ```

use byteorder::{ByteOrder, LittleEndian};

/// Bytes per encoded sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Quantise one sample.  Out-of-range input is clamped, NaN becomes 0.
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

/// Encode `samples` as PCM16 little-endian bytes, two bytes per sample.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let quantized: Vec<i16> = samples.iter().map(|&s| quantize(s)).collect();
    let mut bytes = vec![0u8; quantized.len() * BYTES_PER_SAMPLE];
    LittleEndian::write_i16_into(&quantized, &mut bytes);
    bytes
}

/// Decode PCM16 little-endian bytes into floats in `[-1, 1)`.
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    let even = bytes.len() - bytes.len() % BYTES_PER_SAMPLE;
    let mut samples = vec![0i16; even / BYTES_PER_SAMPLE];
    LittleEndian::read_i16_into(&bytes[..even], &mut samples);
    samples.into_iter().map(|s| s as f32 / 32_768.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_values() {
        assert_eq!(quantize(1.0), 32_767);
        assert_eq!(quantize(-1.0), -32_768);
        assert_eq!(quantize(0.0), 0);
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(encode(&[1.5]), encode(&[1.0]));
        assert_eq!(encode(&[-1.5]), encode(&[-1.0]));
    }

    #[test]
    fn nan_encodes_as_silence() {
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 → 16383
        assert_eq!(quantize(0.5), 16_383);
        // -0.5 * 32768 = -16384 exactly
        assert_eq!(quantize(-0.5), -16_384);
        // -0.00002 * 32768 = -0.65 → 0
        assert_eq!(quantize(-0.000_02), 0);
    }

    #[test]
    fn output_is_little_endian_in_input_order() {
        let bytes = encode(&[0.25, -0.25]);
        assert_eq!(bytes.len(), 4);
        // 0.25 * 32767 = 8191.75 → 8191 = 0x1FFF
        assert_eq!(&bytes[0..2], &[0xFF, 0x1F]);
        // -0.25 * 32768 = -8192 = 0xE000
        assert_eq!(&bytes[2..4], &[0x00, 0xE0]);
    }

    #[test]
    fn decode_divides_by_32768() {
        let samples = decode(&[0x00, 0x80, 0x00, 0x40, 0x00, 0x00]);
        assert_eq!(samples, vec![-1.0, 0.5, 0.0]);
    }

    #[test]
    fn decode_ignores_trailing_odd_byte() {
        assert_eq!(decode(&[0x00, 0x40, 0x7F]).len(), 1);
        assert!(decode(&[0x01]).is_empty());
    }

    /// Negative samples come back within one step of 1/32768; positive ones
    /// are scaled by 32767 on the way out and 32768 on the way back, which
    /// adds at most one more step.
    #[test]
    fn round_trip_stays_within_quantisation_error() {
        let steps = 20_000;
        let input: Vec<f32> = (0..=steps)
            .map(|i| -1.0 + 2.0 * i as f32 / steps as f32)
            .collect();
        let output = decode(&encode(&input));
        assert_eq!(output.len(), input.len());

        for (&x, &y) in input.iter().zip(output.iter()) {
            let tolerance = if x < 0.0 { 1.0 / 32_768.0 } else { 2.0 / 32_768.0 };
            assert!(
                (x - y).abs() <= tolerance + f32::EPSILON,
                "{x} decoded as {y}"
            );
        }
    }
}
