//! Incremental log-mel spectrogram featurizer.
//!
//! Unlike a batch STFT, the featurizer consumes arbitrarily sized sample
//! chunks and carries the unconsumed tail (up to `n_fft - hop_length`
//! samples) across calls, so the k-th emitted frame is identical regardless
//! of how the stream was batched. Frame computation is strictly frame-local
//! (no global dynamic-range normalization), which is what makes that
//! batching invariance possible.

use crate::audio::FilterBank;
use crate::error::{StreamError, StreamResult};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// One mel frame: `n_mels` log-compressed filterbank energies.
pub type MelFrame = Vec<f32>;

const LOG_FLOOR: f64 = 1e-10;

/// Create a periodic Hann window.
fn hann_window(size: usize) -> Vec<f64> {
    let factor = 2.0 * std::f64::consts::PI / size as f64;
    (0..size)
        .map(|i| 0.5 - 0.5 * (i as f64 * factor).cos())
        .collect()
}

/// Stateful short-time Fourier / mel filterbank featurizer.
pub struct MelFeaturizer {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    filter_bank: Arc<FilterBank>,
    residual: Vec<f32>,
}

impl MelFeaturizer {
    /// Create a featurizer over the given filter bank.
    pub fn new(
        n_fft: usize,
        hop_length: usize,
        filter_bank: Arc<FilterBank>,
    ) -> StreamResult<Self> {
        if n_fft == 0 || hop_length == 0 {
            return Err(StreamError::config("n_fft and hop_length must be non-zero"));
        }
        if hop_length > n_fft {
            return Err(StreamError::config(format!(
                "hop_length {} exceeds n_fft {}",
                hop_length, n_fft
            )));
        }
        if filter_bank.n_freqs() != n_fft / 2 + 1 {
            return Err(StreamError::config(format!(
                "filter bank expects {} frequency bins, STFT produces {}",
                filter_bank.n_freqs(),
                n_fft / 2 + 1
            )));
        }
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n_fft);
        Ok(Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            fft,
            filter_bank,
            residual: Vec::new(),
        })
    }

    /// Append samples and extract every complete `n_fft`-length window at
    /// stride `hop_length`. Returns `None` when no full frame fit yet.
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<MelFrame>> {
        self.residual.extend_from_slice(samples);
        if self.residual.len() < self.n_fft {
            return None;
        }
        let n_frames = (self.residual.len() - self.n_fft) / self.hop_length + 1;
        let mut frames = Vec::with_capacity(n_frames);
        for i in 0..n_frames {
            let start = i * self.hop_length;
            let frame = self.compute_frame(start);
            frames.push(frame);
        }
        self.residual.drain(..n_frames * self.hop_length);
        Some(frames)
    }

    /// Emit at most one final frame by right-zero-padding the residual, then
    /// clear it. Returns `None` when the residual is empty.
    pub fn flush(&mut self) -> Option<Vec<MelFrame>> {
        if self.residual.is_empty() {
            return None;
        }
        self.residual.resize(self.n_fft, 0.0);
        let frame = self.compute_frame(0);
        self.residual.clear();
        Some(vec![frame])
    }

    /// Discard the residual.
    pub fn reset(&mut self) {
        self.residual.clear();
    }

    /// Number of samples currently carried over.
    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }

    fn compute_frame(&self, start: usize) -> MelFrame {
        let n_freqs = self.n_fft / 2 + 1;
        let mut buffer: Vec<Complex<f64>> = (0..self.n_fft)
            .map(|i| Complex::new(self.residual[start + i] as f64 * self.window[i], 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let power: Vec<f64> = buffer[..n_freqs].iter().map(|c| c.norm_sqr()).collect();
        self.filter_bank
            .apply(&power)
            .iter()
            .map(|&v| v.max(LOG_FLOOR).ln() as f32)
            .collect()
    }
}
