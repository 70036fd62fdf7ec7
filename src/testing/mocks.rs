//! Mock implementations for testing.
//!
//! [`MockAsrModel`] implements the full [`AsrModel`] surface with scripted,
//! deterministic behavior:
//!
//! - `encode` maps `T` mel frames to `T` audio tokens and counts calls
//! - generation follows an emission policy: either a fixed token list or a
//!   sequence derived from the audio length (so successive passes over
//!   growing audio agree on their shared prefix)
//! - failure injection for the encoder, an unbindable tokenizer, and a
//!   per-forward latency for cancellation tests
//!
//! ```rust,ignore
//! use streamscribe::testing::mocks::MockAsrModel;
//!
//! let model = Arc::new(MockAsrModel::new());
//! model.set_emission(vec![5, 6, 7]);
//! let session = StreamingSession::new(model.clone(), StreamingConfig::default())?;
//! ```

use crate::config::EOS_TOKEN_IDS;
use crate::error::{StreamError, StreamResult};
use crate::model::{AsrModel, EncodedFeature, KvCache};
use ndarray::{Array1, Array2, ArrayView2};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Prompt token ids used by the mock.
const MOCK_BOS: u32 = 1;
const MOCK_SEP: u32 = 2;
const MOCK_AUDIO_PLACEHOLDER: u32 = 4;

/// First token id of the derived emission sequence.
const DERIVED_TOKEN_BASE: u32 = 100;
/// Audio tokens consumed per derived text token.
const AUDIO_TOKENS_PER_TEXT_TOKEN: usize = 5;

/// Logits vocabulary is sized to cover the EOS ids.
const MOCK_VOCAB: usize = EOS_TOKEN_IDS[0] as usize + 1;

enum EmissionPolicy {
    /// One token per `AUDIO_TOKENS_PER_TEXT_TOKEN` audio tokens, ids counting
    /// up from `DERIVED_TOKEN_BASE`. Prefix-stable as audio grows.
    Derived,
    /// A fixed token sequence regardless of audio length.
    Fixed(Vec<u32>),
}

/// Decoder cache for the mock: remembers the emission chosen at prompt time
/// and how many tokens have been fed since.
struct MockKvCache {
    emission: Vec<u32>,
    seen: usize,
}

impl KvCache for MockKvCache {
    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// A deterministic, scriptable stand-in for the external ASR model.
pub struct MockAsrModel {
    feature_dim: usize,
    emission: Mutex<EmissionPolicy>,
    encode_calls: AtomicUsize,
    forward_calls: AtomicUsize,
    active_forwards: AtomicUsize,
    max_concurrent_forwards: AtomicUsize,
    fail_encode: AtomicBool,
    tokenizer_available: AtomicBool,
    forward_delay: Mutex<Option<Duration>>,
}

impl MockAsrModel {
    pub fn new() -> Self {
        Self {
            feature_dim: 8,
            emission: Mutex::new(EmissionPolicy::Derived),
            encode_calls: AtomicUsize::new(0),
            forward_calls: AtomicUsize::new(0),
            active_forwards: AtomicUsize::new(0),
            max_concurrent_forwards: AtomicUsize::new(0),
            fail_encode: AtomicBool::new(false),
            tokenizer_available: AtomicBool::new(true),
            forward_delay: Mutex::new(None),
        }
    }

    /// Script a fixed emission for every subsequent decode pass.
    pub fn set_emission(&self, tokens: Vec<u32>) {
        *self.emission.lock().unwrap() = EmissionPolicy::Fixed(tokens);
    }

    /// Revert to the audio-length-derived emission.
    pub fn set_derived_emission(&self) {
        *self.emission.lock().unwrap() = EmissionPolicy::Derived;
    }

    /// Make every `encode` call fail (or succeed again).
    pub fn fail_encode(&self, fail: bool) {
        self.fail_encode.store(fail, Ordering::Release);
    }

    /// Bind or unbind the tokenizer.
    pub fn set_tokenizer_available(&self, available: bool) {
        self.tokenizer_available.store(available, Ordering::Release);
    }

    /// Sleep this long inside every forward call.
    pub fn set_forward_delay(&self, delay: Option<Duration>) {
        *self.forward_delay.lock().unwrap() = delay;
    }

    /// Number of `encode` invocations so far.
    pub fn encode_calls(&self) -> usize {
        self.encode_calls.load(Ordering::Acquire)
    }

    /// Number of forward invocations (prompt + token) so far.
    pub fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::Acquire)
    }

    /// Highest number of forward calls ever observed running concurrently.
    pub fn max_concurrent_forwards(&self) -> usize {
        self.max_concurrent_forwards.load(Ordering::Acquire)
    }

    /// The emission the mock would generate for `num_audio_tokens` of audio.
    pub fn expected_emission(&self, num_audio_tokens: usize) -> Vec<u32> {
        match &*self.emission.lock().unwrap() {
            EmissionPolicy::Fixed(tokens) => tokens.clone(),
            EmissionPolicy::Derived => Self::derived_emission(num_audio_tokens),
        }
    }

    /// The text the mock detokenizer produces for `ids`.
    pub fn text_for(ids: &[u32]) -> String {
        ids.iter()
            .map(|id| format!("t{}", id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn derived_emission(num_audio_tokens: usize) -> Vec<u32> {
        let count = num_audio_tokens.div_ceil(AUDIO_TOKENS_PER_TEXT_TOKEN);
        (0..count as u32).map(|i| DERIVED_TOKEN_BASE + i).collect()
    }

    fn one_hot(token: u32) -> Array1<f32> {
        let mut logits = Array1::zeros(MOCK_VOCAB);
        logits[token as usize] = 1.0;
        logits
    }

    fn next_logits(&self, cache: &mut MockKvCache) -> Array1<f32> {
        match cache.emission.get(cache.seen) {
            Some(&token) => Self::one_hot(token),
            None => Self::one_hot(EOS_TOKEN_IDS[0]),
        }
    }

    fn enter_forward(&self) {
        self.forward_calls.fetch_add(1, Ordering::AcqRel);
        let active = self.active_forwards.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_concurrent_forwards.fetch_max(active, Ordering::AcqRel);
        if let Some(delay) = *self.forward_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
    }

    fn exit_forward(&self) {
        self.active_forwards.fetch_sub(1, Ordering::AcqRel);
    }

    fn downcast<'a>(cache: &'a mut dyn KvCache) -> StreamResult<&'a mut MockKvCache> {
        cache
            .as_any()
            .downcast_mut::<MockKvCache>()
            .ok_or_else(|| StreamError::decoder("foreign cache passed to mock model"))
    }
}

impl Default for MockAsrModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AsrModel for MockAsrModel {
    fn encode(&self, mel: ArrayView2<f32>) -> StreamResult<EncodedFeature> {
        if self.fail_encode.load(Ordering::Acquire) {
            return Err(StreamError::encoder("injected encode failure"));
        }
        self.encode_calls.fetch_add(1, Ordering::AcqRel);
        let t_a = mel.nrows();
        Ok(Array2::from_shape_fn((t_a, self.feature_dim), |(i, j)| {
            (i + j) as f32 * 0.01
        }))
    }

    fn build_prompt(&self, num_audio_tokens: usize, _language: &str) -> Vec<u32> {
        let mut prompt = Vec::with_capacity(num_audio_tokens + 2);
        prompt.push(MOCK_BOS);
        prompt.extend(std::iter::repeat(MOCK_AUDIO_PLACEHOLDER).take(num_audio_tokens));
        prompt.push(MOCK_SEP);
        prompt
    }

    fn embed_tokens(&self, ids: &[u32]) -> StreamResult<Array2<f32>> {
        Ok(Array2::zeros((ids.len(), self.feature_dim)))
    }

    fn merge_audio_features(
        &self,
        input_embeds: Array2<f32>,
        audio_features: ArrayView2<f32>,
        input_ids: &[u32],
    ) -> StreamResult<Array2<f32>> {
        let slots = input_ids
            .iter()
            .filter(|&&id| id == MOCK_AUDIO_PLACEHOLDER)
            .count();
        if slots != audio_features.nrows() {
            return Err(StreamError::decoder(format!(
                "{} audio feature rows for {} placeholder slots",
                audio_features.nrows(),
                slots
            )));
        }
        Ok(input_embeds)
    }

    fn make_cache(&self) -> Box<dyn KvCache> {
        Box::new(MockKvCache {
            emission: Vec::new(),
            seen: 0,
        })
    }

    fn forward_embeddings(
        &self,
        cache: &mut dyn KvCache,
        embeds: ArrayView2<f32>,
    ) -> StreamResult<Array1<f32>> {
        self.enter_forward();
        let num_audio_tokens = embeds.nrows().saturating_sub(2);
        let result = Self::downcast(cache).map(|cache| {
            cache.emission = self.expected_emission(num_audio_tokens);
            cache.seen = 0;
            self.next_logits(cache)
        });
        self.exit_forward();
        result
    }

    fn forward_token(&self, cache: &mut dyn KvCache, _token: u32) -> StreamResult<Array1<f32>> {
        self.enter_forward();
        // a replayed or accepted token advances the cache one position
        let result = Self::downcast(cache).map(|cache| {
            cache.seen += 1;
            self.next_logits(cache)
        });
        self.exit_forward();
        result
    }

    fn detokenize(&self, ids: &[u32]) -> StreamResult<String> {
        if !self.tokenizer_available.load(Ordering::Acquire) {
            return Err(StreamError::TokenizerUnavailable);
        }
        Ok(Self::text_for(ids))
    }
}
