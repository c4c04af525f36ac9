//! Windowed FFT power spectrum.
//!
//! For a window of N samples we
//! * multiply by a 4-term Blackman-Harris window
//! * forward FFT
//! * convert |X|^2 to dB relative to a full-scale tone

use std::sync::Arc;

use num_complex::Complex32;
use num_traits::{Float, FloatConst};
use rustfft::{Fft, FftPlanner};

// Keeps log10 away from zero; also the floor of the plot (-200 dB)
const POWER_FLOOR: f32 = 1e-20;

/// 4-term Blackman-Harris window (-92 dB sidelobes), symmetric
pub fn blackman_harris<T: Float + FloatConst>(n: usize) -> Vec<T> {
    if n <= 1 {
        return vec![T::one(); n];
    }
    let c = |v: f64| T::from(v).unwrap_or_else(T::zero);
    let (a0, a1, a2, a3) = (c(0.35875), c(0.48829), c(0.14128), c(0.01168));
    let denom = c((n - 1) as f64);
    (0..n)
        .map(|i| {
            let x = c(2.0) * T::PI() * c(i as f64) / denom;
            a0 - a1 * x.cos() + a2 * (c(2.0) * x).cos() - a3 * (c(3.0) * x).cos()
        })
        .collect()
}

pub struct SpectrumEngine {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    // (sum of window)^2, the power of a unit tone after windowing
    norm: f32,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectrumEngine {
    pub fn new(size: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(size);
        let window = blackman_harris::<f32>(size);
        let sum: f32 = window.iter().sum();
        let scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window,
            norm: sum * sum,
            buffer: vec![Complex32::default(); size],
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }

    /// Power spectrum of `input` in natural FFT bin order (DC first), in dB
    pub fn power_db(&mut self, input: &[Complex32], out: &mut Vec<f32>) {
        assert_eq!(
            input.len(),
            self.size(),
            "input length {} != FFT size {}",
            input.len(),
            self.size()
        );
        for ((b, x), w) in self.buffer.iter_mut().zip(input).zip(&self.window) {
            *b = *x * *w;
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        out.clear();
        out.extend(
            self.buffer
                .iter()
                .map(|x| 10.0 * (x.norm_sqr() / self.norm).max(POWER_FLOOR).log10()),
        );
    }
}
