//! Blocks of IQ samples as they come off the radio

use byte_slice_cast::AsSliceOf;
use chrono::{DateTime, Utc};
use num_complex::Complex32;

/// The sample type of the whole pipeline (fc32, same as `gr_complex`)
pub type Sample = Complex32;

/// A run of samples tagged with the tuning in effect when they were captured.
/// Never mutated after the source hands it to the fan-out.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Production order, starting at 0 for every `start`
    pub sequence: u64,
    /// Bumped by the source whenever frequency or sample rate changes
    pub epoch: u64,
    pub sample_rate_hz: f64,
    pub center_frequency_hz: f64,
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<Sample>,
}

impl SampleBlock {
    pub fn new(
        sequence: u64,
        epoch: u64,
        sample_rate_hz: f64,
        center_frequency_hz: f64,
        samples: Vec<Sample>,
    ) -> Self {
        Self {
            sequence,
            epoch,
            sample_rate_hz,
            center_frequency_hz,
            timestamp: Utc::now(),
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock span covered by the block
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate_hz > 0.0 {
            self.samples.len() as f64 / self.sample_rate_hz
        } else {
            0.0
        }
    }
}

/// Flatten complex samples into `[re, im, re, im, ...]`, reusing `out`
pub fn interleave(samples: &[Sample], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for s in samples {
        out.push(s.re);
        out.push(s.im);
    }
}

/// Decode native-endian fc32 bytes. Trailing bytes that don't make a full
/// sample are ignored.
pub fn samples_from_bytes(bytes: &[u8]) -> Vec<Sample> {
    let whole = &bytes[..bytes.len() - bytes.len() % 8];
    match whole.as_slice_of::<f32>() {
        Ok(floats) => floats
            .chunks_exact(2)
            .map(|iq| Sample::new(iq[0], iq[1]))
            .collect(),
        // Misaligned buffer, go byte by byte
        Err(_) => whole
            .chunks_exact(8)
            .map(|c| {
                Sample::new(
                    f32::from_ne_bytes([c[0], c[1], c[2], c[3]]),
                    f32::from_ne_bytes([c[4], c[5], c[6], c[7]]),
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave() {
        let samples = [Sample::new(1.0, -1.0), Sample::new(0.5, 0.25)];
        let mut out = vec![9.0; 7];
        interleave(&samples, &mut out);
        assert_eq!(out, vec![1.0, -1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_partial_trailing_sample_dropped() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.5f32.to_ne_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_ne_bytes());
        bytes.extend_from_slice(&[0, 1, 2]);
        assert_eq!(samples_from_bytes(&bytes), vec![Sample::new(1.5, -2.0)]);
    }

    #[test]
    fn test_decode_aligned_and_misaligned() {
        use byte_slice_cast::AsByteSlice;

        let samples = vec![Sample::new(0.5, -0.5), Sample::new(3.0, 4.0)];
        let mut flat = Vec::new();
        interleave(&samples, &mut flat);
        let bytes = flat.as_byte_slice();
        assert_eq!(samples_from_bytes(bytes), samples);

        // Same bytes one past an f32 boundary
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(bytes);
        assert_eq!(samples_from_bytes(&shifted[1..]), samples);
    }

    #[test]
    fn test_duration() {
        let block = SampleBlock::new(0, 0, 1e6, 868e6, vec![Sample::default(); 1000]);
        assert!((block.duration_secs() - 1e-3).abs() < 1e-12);
    }
}
