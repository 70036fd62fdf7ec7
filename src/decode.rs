//! Stateless autoregressive decode passes.
//!
//! One pass builds a prompt around the encoded audio features, replays the
//! already-confirmed tokens through a fresh decoder cache, then generates
//! greedily until EOS or budget. Cancellation is observed at every
//! forward-pass boundary; a cancelled pass returns early with no output and
//! no side effects.

use crate::config::{
    StreamingConfig, ENCODER_TOKENS_PER_SECOND, EOS_TOKEN_IDS, MIN_TOKEN_BUDGET,
    TOKEN_RATE_ESTIMATE,
};
use crate::error::StreamResult;
use crate::model::{AsrModel, EncodedFeature};
use ndarray::Array1;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Result of one decode pass.
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    /// Newly emitted tokens, excluding the replayed confirmed prefix
    pub tokens: Vec<u32>,
    /// Wall-clock seconds spent in the pass
    pub decode_seconds: f64,
    /// True when the pass observed cancellation and aborted
    pub cancelled: bool,
}

impl DecodeOutput {
    fn empty() -> Self {
        Self {
            tokens: Vec::new(),
            decode_seconds: 0.0,
            cancelled: false,
        }
    }

    fn aborted(decode_seconds: f64) -> Self {
        Self {
            tokens: Vec::new(),
            decode_seconds,
            cancelled: true,
        }
    }
}

/// Greedy decode loop over encoded audio features. Never mutates session
/// state; everything it needs arrives by value or shared reference.
pub struct DecodeEngine;

impl DecodeEngine {
    /// Run one decode pass.
    ///
    /// `confirmed_prefix` is replayed token by token to rebuild cache state
    /// before generation; the returned tokens are the emission beyond that
    /// prefix.
    pub fn decode(
        model: &dyn AsrModel,
        encoded: &EncodedFeature,
        confirmed_prefix: &[u32],
        config: &StreamingConfig,
        cancel: &AtomicBool,
    ) -> StreamResult<DecodeOutput> {
        let num_audio_tokens = encoded.nrows();
        if num_audio_tokens == 0 {
            return Ok(DecodeOutput::empty());
        }
        let started = Instant::now();

        let prompt = model.build_prompt(num_audio_tokens, &config.language);
        let embeds = model.embed_tokens(&prompt)?;
        let embeds = model.merge_audio_features(embeds, encoded.view(), &prompt)?;

        let mut cache = model.make_cache();
        if cancel.load(Ordering::Acquire) {
            return Ok(DecodeOutput::aborted(started.elapsed().as_secs_f64()));
        }
        let mut logits = model.forward_embeddings(cache.as_mut(), embeds.view())?;

        for &token in confirmed_prefix {
            if cancel.load(Ordering::Acquire) {
                return Ok(DecodeOutput::aborted(started.elapsed().as_secs_f64()));
            }
            logits = model.forward_token(cache.as_mut(), token)?;
        }

        let max_tokens = Self::token_budget(
            num_audio_tokens,
            confirmed_prefix.len(),
            config.max_tokens_per_pass,
        );

        let mut emitted = Vec::new();
        for _ in 0..max_tokens.saturating_sub(confirmed_prefix.len()) {
            if config.temperature > 0.0 {
                logits.mapv_inplace(|v| v / config.temperature);
            }
            let token = argmax(&logits);
            if EOS_TOKEN_IDS.contains(&token) {
                break;
            }
            emitted.push(token);
            if cancel.load(Ordering::Acquire) {
                return Ok(DecodeOutput::aborted(started.elapsed().as_secs_f64()));
            }
            logits = model.forward_token(cache.as_mut(), token)?;
        }

        Ok(DecodeOutput {
            tokens: emitted,
            decode_seconds: started.elapsed().as_secs_f64(),
            cancelled: false,
        })
    }

    /// Token budget for a pass over `num_audio_tokens` of encoder output.
    pub fn token_budget(num_audio_tokens: usize, prefix_len: usize, max_per_pass: usize) -> usize {
        let windowed_seconds = num_audio_tokens as f64 / ENCODER_TOKENS_PER_SECOND;
        let estimated = MIN_TOKEN_BUDGET.max((windowed_seconds * TOKEN_RATE_ESTIMATE).ceil() as usize);
        max_per_pass.min(estimated.max(prefix_len + MIN_TOKEN_BUDGET))
    }
}

fn argmax(logits: &Array1<f32>) -> u32 {
    let mut best = 0usize;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &value) in logits.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = i;
        }
    }
    best as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockAsrModel;
    use ndarray::Array2;
    use std::sync::Arc;

    fn features(t_a: usize) -> EncodedFeature {
        Array2::zeros((t_a, 8))
    }

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_token_budget_math() {
        // 130 audio tokens: 130 / 13 * 10 = 100
        assert_eq!(DecodeEngine::token_budget(130, 0, 256), 100);
        // tiny window: floor at the minimum budget
        assert_eq!(DecodeEngine::token_budget(5, 0, 256), MIN_TOKEN_BUDGET);
        // a long prefix raises the budget
        assert_eq!(DecodeEngine::token_budget(5, 90, 256), 90 + MIN_TOKEN_BUDGET);
        // the per-pass cap always wins
        assert_eq!(DecodeEngine::token_budget(1300, 0, 256), 256);
    }

    #[test]
    fn test_empty_features_short_circuit() {
        let model = Arc::new(MockAsrModel::new());
        let out = DecodeEngine::decode(
            model.as_ref(),
            &features(0),
            &[],
            &StreamingConfig::default(),
            &no_cancel(),
        )
        .unwrap();
        assert!(out.tokens.is_empty());
        assert!(!out.cancelled);
        assert_eq!(model.forward_calls(), 0);
    }

    #[test]
    fn test_decode_emits_scripted_tokens() {
        let model = Arc::new(MockAsrModel::new());
        model.set_emission(vec![5, 6, 7]);
        let out = DecodeEngine::decode(
            model.as_ref(),
            &features(20),
            &[],
            &StreamingConfig::default(),
            &no_cancel(),
        )
        .unwrap();
        assert_eq!(out.tokens, vec![5, 6, 7]);
        assert!(out.decode_seconds >= 0.0);
    }

    #[test]
    fn test_prefix_is_replayed_not_emitted() {
        let model = Arc::new(MockAsrModel::new());
        model.set_emission(vec![5, 6, 7, 8]);
        let out = DecodeEngine::decode(
            model.as_ref(),
            &features(20),
            &[5, 6],
            &StreamingConfig::default(),
            &no_cancel(),
        )
        .unwrap();
        assert_eq!(out.tokens, vec![7, 8]);
    }

    #[test]
    fn test_budget_truncates_emission() {
        let model = Arc::new(MockAsrModel::new());
        model.set_emission((100..160).collect());
        let mut config = StreamingConfig::default();
        config.max_tokens_per_pass = 10;
        let out = DecodeEngine::decode(
            model.as_ref(),
            &features(1000),
            &[],
            &config,
            &no_cancel(),
        )
        .unwrap();
        assert_eq!(out.tokens.len(), 10);
        assert_eq!(out.tokens, (100..110).collect::<Vec<u32>>());
    }

    #[test]
    fn test_cancel_before_prompt_forward() {
        let model = Arc::new(MockAsrModel::new());
        model.set_emission(vec![5, 6, 7]);
        let cancel = AtomicBool::new(true);
        let out = DecodeEngine::decode(
            model.as_ref(),
            &features(20),
            &[],
            &StreamingConfig::default(),
            &cancel,
        )
        .unwrap();
        assert!(out.cancelled);
        assert!(out.tokens.is_empty());
        assert_eq!(model.forward_calls(), 0);
    }

    #[test]
    fn test_temperature_scaling_keeps_argmax() {
        let model = Arc::new(MockAsrModel::new());
        model.set_emission(vec![5, 6]);
        let mut config = StreamingConfig::default();
        config.temperature = 0.7;
        let out = DecodeEngine::decode(
            model.as_ref(),
            &features(20),
            &[],
            &config,
            &no_cancel(),
        )
        .unwrap();
        assert_eq!(out.tokens, vec![5, 6]);
    }

    #[test]
    fn test_argmax() {
        let logits = Array1::from_vec(vec![0.1, 0.9, 0.3]);
        assert_eq!(argmax(&logits), 1);
        let logits = Array1::from_vec(vec![f32::NEG_INFINITY, -1.0]);
        assert_eq!(argmax(&logits), 1);
    }
}
