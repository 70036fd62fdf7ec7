//! Windowed streaming encoder.
//!
//! Buffers mel frames into fixed-length windows, invokes the external
//! encoder once per completed window, and keeps results in a bounded
//! least-recently-used cache. The trailing partial window is never cached:
//! [`WindowedEncoder::encode_pending`] re-encodes it from a fresh copy on
//! every call so the result is cheap to discard.
//!
//! Mel frames of a completed window are retained until that window's feature
//! is drained, which lets a drain re-encode a window whose cache entry was
//! evicted in the meantime.

use crate::audio::MelFrame;
use crate::error::{StreamError, StreamResult};
use crate::model::{AsrModel, EncodedFeature};
use ndarray::Array2;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const LOG_TARGET: &str = "streamscribe::encoder";

/// Buffers mel frames into encoder windows and caches encoded features.
pub struct WindowedEncoder {
    model: Arc<dyn AsrModel>,
    window_frames: usize,
    n_mels: usize,
    max_cached_windows: usize,
    pending: Vec<MelFrame>,
    cache: HashMap<usize, EncodedFeature>,
    /// Access order for eviction; most recently used at the back
    lru: VecDeque<usize>,
    /// Frames of completed windows not yet drained
    retained_frames: HashMap<usize, Vec<MelFrame>>,
    /// Window indices encoded since the last drain, in arrival order
    newly_encoded: VecDeque<usize>,
    encoded_window_count: usize,
}

impl WindowedEncoder {
    pub fn new(
        model: Arc<dyn AsrModel>,
        window_frames: usize,
        n_mels: usize,
        max_cached_windows: usize,
    ) -> StreamResult<Self> {
        if window_frames == 0 || n_mels == 0 {
            return Err(StreamError::config(
                "window_frames and n_mels must be non-zero",
            ));
        }
        if max_cached_windows == 0 {
            return Err(StreamError::config("max_cached_windows must be at least 1"));
        }
        Ok(Self {
            model,
            window_frames,
            n_mels,
            max_cached_windows,
            pending: Vec::with_capacity(window_frames),
            cache: HashMap::new(),
            lru: VecDeque::new(),
            retained_frames: HashMap::new(),
            newly_encoded: VecDeque::new(),
            encoded_window_count: 0,
        })
    }

    /// Append frames to the pending buffer, encoding every window that
    /// completes. Returns the number of windows completed by this call.
    pub fn feed(&mut self, frames: Vec<MelFrame>) -> StreamResult<usize> {
        let mut produced = 0;
        for frame in frames {
            if frame.len() != self.n_mels {
                return Err(StreamError::encoder(format!(
                    "mel frame has {} bins, expected {}",
                    frame.len(),
                    self.n_mels
                )));
            }
            self.pending.push(frame);
            if self.pending.len() == self.window_frames {
                let window = std::mem::take(&mut self.pending);
                self.commit_window(window)?;
                produced += 1;
            }
        }
        Ok(produced)
    }

    /// True iff the pending buffer holds at least one frame.
    pub fn has_pending_frames(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of frames in the pending buffer.
    pub fn pending_frame_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of completed windows encoded so far.
    pub fn encoded_window_count(&self) -> usize {
        self.encoded_window_count
    }

    /// Number of completed windows currently cached.
    pub fn cached_window_count(&self) -> usize {
        self.cache.len()
    }

    /// Encode the pending partial window from a fresh copy, without
    /// committing or caching it. Returns `None` when the buffer is empty.
    pub fn encode_pending(&self) -> StreamResult<Option<EncodedFeature>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let mel = Self::frames_to_array(&self.pending, self.n_mels)?;
        let encoded = self.model.encode(mel.view())?;
        Ok(Some(encoded))
    }

    /// Return and clear the features of windows encoded since the last
    /// drain, in window-index order. Evicted entries are re-encoded from
    /// their retained frames.
    pub fn drain_newly_encoded(&mut self) -> StreamResult<Vec<EncodedFeature>> {
        let mut features = Vec::with_capacity(self.newly_encoded.len());
        while let Some(index) = self.newly_encoded.pop_front() {
            let feature = match self.cache_get(index) {
                Some(feature) => feature,
                None => {
                    log::debug!(
                        target: LOG_TARGET,
                        "re-encoding evicted window {} for drain",
                        index
                    );
                    let frames = self.retained_frames.get(&index).ok_or_else(|| {
                        StreamError::encoder(format!("window {} unavailable for drain", index))
                    })?;
                    let mel = Self::frames_to_array(frames, self.n_mels)?;
                    self.model.encode(mel.view())?
                }
            };
            self.retained_frames.remove(&index);
            features.push(feature);
        }
        Ok(features)
    }

    /// Drop the undrained window queue and its retained frames without
    /// re-encoding anything.
    pub fn discard_newly_encoded(&mut self) {
        self.newly_encoded.clear();
        self.retained_frames.clear();
    }

    /// Clear the pending buffer, cache, and drain queue.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.cache.clear();
        self.lru.clear();
        self.retained_frames.clear();
        self.newly_encoded.clear();
        self.encoded_window_count = 0;
    }

    fn commit_window(&mut self, window: Vec<MelFrame>) -> StreamResult<()> {
        let index = self.encoded_window_count;
        let mel = Self::frames_to_array(&window, self.n_mels)?;
        let encoded = self.model.encode(mel.view())?;

        self.cache_insert(index, encoded);
        self.retained_frames.insert(index, window);
        self.newly_encoded.push_back(index);
        self.encoded_window_count += 1;
        log::debug!(target: LOG_TARGET, "encoded window {}", index);
        Ok(())
    }

    fn cache_insert(&mut self, index: usize, feature: EncodedFeature) {
        self.cache.insert(index, feature);
        self.touch(index);
        while self.cache.len() > self.max_cached_windows {
            if let Some(victim) = self.lru.pop_front() {
                self.cache.remove(&victim);
                log::debug!(target: LOG_TARGET, "evicted window {} from cache", victim);
            } else {
                break;
            }
        }
    }

    fn cache_get(&mut self, index: usize) -> Option<EncodedFeature> {
        let feature = self.cache.get(&index).cloned()?;
        self.touch(index);
        Some(feature)
    }

    fn touch(&mut self, index: usize) {
        if let Some(pos) = self.lru.iter().position(|&i| i == index) {
            self.lru.remove(pos);
        }
        self.lru.push_back(index);
    }

    fn frames_to_array(frames: &[MelFrame], n_mels: usize) -> StreamResult<Array2<f32>> {
        let mut flat = Vec::with_capacity(frames.len() * n_mels);
        for frame in frames {
            flat.extend_from_slice(frame);
        }
        Array2::from_shape_vec((frames.len(), n_mels), flat)
            .map_err(|e| StreamError::encoder(format!("mel window shape: {}", e)))
    }
}
