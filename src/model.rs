//! External ASR model interface.
//!
//! The neural network (audio encoder + autoregressive language model) and its
//! tokenizer live behind [`AsrModel`]. The session never owns model state:
//! it holds a shared immutable handle (`Arc<dyn AsrModel>`) and passes decode
//! tasks value snapshots, so tensors cross thread boundaries as plain owned
//! arrays with no unsafe shims.

use crate::error::StreamResult;
use ndarray::{Array1, Array2, ArrayView2};
use std::any::Any;

/// Encoded audio features for one window: shape `(T_a, D)`.
pub type EncodedFeature = Array2<f32>;

/// Opaque autoregressive decoder cache.
///
/// Produced fresh by [`AsrModel::make_cache`] for every decode pass and
/// advanced by each forward call.
pub trait KvCache: Send {
    /// Downcast support for concrete implementations.
    fn as_any(&mut self) -> &mut dyn Any;
}

/// The external acoustic encoder + language model + tokenizer.
///
/// Implementations are expected to be thread-safe handles; the session
/// serializes all encoder invocations under its own lock and confines the
/// decode loop to a single worker thread.
pub trait AsrModel: Send + Sync {
    /// Encode a block of mel frames, shape `(T, n_mels)`, into audio
    /// features of shape `(T_a, D)`.
    fn encode(&self, mel: ArrayView2<f32>) -> StreamResult<EncodedFeature>;

    /// Build the prompt token sequence around `num_audio_tokens` audio
    /// placeholder slots for the given language.
    fn build_prompt(&self, num_audio_tokens: usize, language: &str) -> Vec<u32>;

    /// Embed a token sequence into shape `(L, E)`.
    fn embed_tokens(&self, ids: &[u32]) -> StreamResult<Array2<f32>>;

    /// Splice encoded audio features into the placeholder slots of the
    /// prompt embeddings.
    fn merge_audio_features(
        &self,
        input_embeds: Array2<f32>,
        audio_features: ArrayView2<f32>,
        input_ids: &[u32],
    ) -> StreamResult<Array2<f32>>;

    /// Create a fresh decoder cache.
    fn make_cache(&self) -> Box<dyn KvCache>;

    /// Run one forward pass over prompt embeddings, returning the
    /// last-position logits row.
    fn forward_embeddings(
        &self,
        cache: &mut dyn KvCache,
        embeds: ArrayView2<f32>,
    ) -> StreamResult<Array1<f32>>;

    /// Advance the cache by a single token, returning the next logits row.
    fn forward_token(&self, cache: &mut dyn KvCache, token: u32) -> StreamResult<Array1<f32>>;

    /// Decode token ids to text.
    ///
    /// Returns [`crate::StreamError::TokenizerUnavailable`] when no tokenizer
    /// is bound, which turns the surrounding decode pass into a no-op.
    fn detokenize(&self, ids: &[u32]) -> StreamResult<String>;
}
