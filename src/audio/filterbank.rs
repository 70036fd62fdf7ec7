//! Mel filterbank construction and application.
//!
//! The Slaney builder follows librosa/transformers conventions:
//!
//! - For freq < 1000 Hz: `mel = 3.0 * freq / 200.0`
//! - For freq >= 1000 Hz: `mel = 15.0 + 27.0 * log(freq / 1000) / log(6.4)`
//! - Each triangular filter is normalized by `2.0 / (upper_freq - lower_freq)`

use crate::error::{StreamError, StreamResult};
use ndarray::{aview1, Array1, Array2};

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = 15.0;
const LOGSTEP: f64 = 0.06875177742094912; // log(6.4) / 27

/// Convert frequency in Hz to mel scale using the Slaney formula.
fn hz_to_mel_slaney(freq: f64) -> f64 {
    if freq < MIN_LOG_HZ {
        freq / F_SP
    } else {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / LOGSTEP
    }
}

/// Convert mel scale to frequency in Hz using the Slaney formula.
fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < MIN_LOG_MEL {
        mel * F_SP
    } else {
        MIN_LOG_HZ * ((mel - MIN_LOG_MEL) * LOGSTEP).exp()
    }
}

/// A mel projection matrix of shape `(n_mels, n_fft / 2 + 1)`.
#[derive(Debug, Clone)]
pub struct FilterBank {
    filters: Array2<f64>,
}

impl FilterBank {
    /// Wrap a caller-provided filter matrix of shape `(n_mels, n_freqs)`.
    pub fn from_matrix(filters: Array2<f64>) -> StreamResult<Self> {
        if filters.nrows() == 0 || filters.ncols() == 0 {
            return Err(StreamError::config("filter bank must be non-empty"));
        }
        Ok(Self { filters })
    }

    /// Build a Slaney-normalized triangular filter bank.
    pub fn slaney(
        n_mels: usize,
        n_fft: usize,
        sample_rate: f64,
        f_min: f64,
        f_max: f64,
    ) -> StreamResult<Self> {
        if n_mels == 0 || n_fft == 0 {
            return Err(StreamError::config("n_mels and n_fft must be non-zero"));
        }
        let n_freqs = n_fft / 2 + 1;

        let fft_freqs: Vec<f64> = (0..n_freqs)
            .map(|i| (i as f64 * sample_rate) / n_fft as f64)
            .collect();

        let mel_min = hz_to_mel_slaney(f_min);
        let mel_max = hz_to_mel_slaney(f_max);

        let n_mel_points = n_mels + 2;
        let freq_points: Vec<f64> = (0..n_mel_points)
            .map(|i| {
                let mel = mel_min + (mel_max - mel_min) * (i as f64) / ((n_mel_points - 1) as f64);
                mel_to_hz_slaney(mel)
            })
            .collect();

        let mut filters = Array2::<f64>::zeros((n_mels, n_freqs));
        for i in 0..n_mels {
            let f_lower = freq_points[i];
            let f_center = freq_points[i + 1];
            let f_upper = freq_points[i + 2];
            let enorm = 2.0 / (f_upper - f_lower);

            for (j, &freq) in fft_freqs.iter().enumerate() {
                if freq >= f_lower && freq <= f_center {
                    filters[[i, j]] = enorm * (freq - f_lower) / (f_center - f_lower);
                } else if freq > f_center && freq <= f_upper {
                    filters[[i, j]] = enorm * (f_upper - freq) / (f_upper - f_center);
                }
            }
        }

        Ok(Self { filters })
    }

    /// Number of mel bins.
    pub fn n_mels(&self) -> usize {
        self.filters.nrows()
    }

    /// Number of FFT frequency bins this bank expects.
    pub fn n_freqs(&self) -> usize {
        self.filters.ncols()
    }

    /// Project one power spectrum (length `n_freqs`) onto the mel bins.
    pub fn apply(&self, power: &[f64]) -> Array1<f64> {
        self.filters.dot(&aview1(power))
    }
}
