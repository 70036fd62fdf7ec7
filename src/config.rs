//! Session configuration and model-family constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Audio sample rate expected at the session boundary (Hz).
pub const SAMPLE_RATE: f64 = 16_000.0;

/// Encoder output tokens produced per second of audio.
pub const ENCODER_TOKENS_PER_SECOND: f64 = 13.0;

/// Heuristic text-token rate used to size decode budgets (tokens per audio second).
pub const TOKEN_RATE_ESTIMATE: f64 = 10.0;

/// Minimum token budget for any decode pass.
pub const MIN_TOKEN_BUDGET: usize = 24;

/// End-of-sequence token ids of the target language model.
pub const EOS_TOKEN_IDS: [u32; 2] = [151645, 151643];

/// Promotion-delay preset controlling the latency/stability trade-off.
///
/// A provisional token must survive unchanged for at least this long before
/// it can be promoted into the confirmed transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayPreset {
    /// 200 ms: fast confirmation, more flicker
    Low,
    /// 600 ms: balanced
    Medium,
    /// 1200 ms: slow confirmation, very stable
    High,
}

impl DelayPreset {
    /// The wall-clock delay this preset maps to.
    pub fn delay(self) -> Duration {
        match self {
            DelayPreset::Low => Duration::from_millis(200),
            DelayPreset::Medium => Duration::from_millis(600),
            DelayPreset::High => Duration::from_millis(1200),
        }
    }
}

/// Configuration for a streaming inference session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Language hint passed verbatim to the model's prompt builder
    pub language: String,
    /// Minimum wall-clock seconds between streaming decode passes
    pub decode_interval_secs: f64,
    /// Promotion delay preset
    pub delay_preset: DelayPreset,
    /// Hard budget for the autoregressive decode loop
    pub max_tokens_per_pass: usize,
    /// Logit scaling factor applied before argmax (0 = disabled)
    pub temperature: f32,
    /// Maximum completed encoder windows kept in the feature cache
    pub max_cached_windows: usize,
    /// Re-decode each completed window in full instead of relying on
    /// streaming promotion
    pub finalize_completed_windows: bool,
    /// STFT size in samples
    pub n_fft: usize,
    /// STFT hop in samples
    pub hop_length: usize,
    /// Mel filterbank bins per frame
    pub n_mels: usize,
    /// Mel frames per encoder window
    pub window_frames: usize,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            decode_interval_secs: 0.4,
            delay_preset: DelayPreset::Medium,
            max_tokens_per_pass: 256,
            temperature: 0.0,
            max_cached_windows: 4,
            finalize_completed_windows: false,
            n_fft: 400,
            hop_length: 160,
            n_mels: 128,
            window_frames: 125,
            event_capacity: 64,
        }
    }
}

impl StreamingConfig {
    /// Create a config with boundary-finalize mode enabled.
    pub fn finalize_windows() -> Self {
        Self {
            finalize_completed_windows: true,
            ..Default::default()
        }
    }

    /// Set the language hint.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the promotion delay preset.
    pub fn with_delay_preset(mut self, preset: DelayPreset) -> Self {
        self.delay_preset = preset;
        self
    }

    /// Set the minimum interval between streaming decode passes.
    pub fn with_decode_interval(mut self, secs: f64) -> Self {
        self.decode_interval_secs = secs;
        self
    }

    /// The promotion delay derived from the preset.
    pub fn promotion_delay(&self) -> Duration {
        self.delay_preset.delay()
    }

    /// The minimum interval between streaming decode passes as a duration.
    pub fn decode_interval(&self) -> Duration {
        Duration::from_secs_f64(self.decode_interval_secs)
    }
}
