//! Streaming inference session.
//!
//! The session coordinates three independently advancing timelines: audio
//! sample time (the featurizer), encoder window time (the windowed encoder),
//! and decoder token time (the promotion ledger). A single long-lived worker
//! thread runs decode passes; the feed path never blocks on a decode.
//!
//! # Locking
//!
//! Two locks with a fixed order (`engine` before `shared`):
//!
//! - `engine` guards the featurizer, encoder, and scheduling fields. All
//!   external-encoder invocations happen under it, so the model sees at most
//!   one encode caller at a time.
//! - `shared` guards the promotion ledger. The worker takes it only to
//!   snapshot and to commit merge results, never across an LM forward pass.
//!
//! # Scheduling
//!
//! Decode requests flow through a bounded rendezvous of capacity one. The
//! feed path enqueues with `try_send`, so at most one pass is ever pending
//! and a second is never launched while one runs; a feed that finds the slot
//! occupied simply re-evaluates on the next call.

use crate::audio::{FilterBank, MelFeaturizer};
use crate::config::{StreamingConfig, ENCODER_TOKENS_PER_SECOND, SAMPLE_RATE};
use crate::decode::DecodeEngine;
use crate::encoder::WindowedEncoder;
use crate::error::{StreamError, StreamResult};
use crate::events::{self, EventSender, EventStream, TranscriptionEvent};
use crate::ledger::{LedgerState, PromotionLedger};
use crate::model::AsrModel;
use crate::stats::{MemoryProbe, NullMemoryProbe, SessionStats};
use crate::text;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "streamscribe::session";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting audio
    Active,
    /// Stop requested; finalization in progress
    Stopping,
    /// Ended normally; `Ended` was emitted
    Ended,
    /// Cancelled; no `Ended` event
    Cancelled,
}

enum WorkerRequest {
    Pass,
    Finalize,
}

/// Featurizer, encoder, and scheduling state under the session lock.
struct EngineState {
    featurizer: MelFeaturizer,
    encoder: WindowedEncoder,
    state: SessionState,
    total_samples_fed: u64,
    has_new_encoder_content: bool,
    last_decode_time: Option<Instant>,
    frozen_window_count: usize,
}

struct SessionInner {
    model: Arc<dyn AsrModel>,
    config: StreamingConfig,
    probe: Arc<dyn MemoryProbe>,
    decode_interval: Duration,
    promotion_delay: Duration,
    engine: Mutex<EngineState>,
    shared: Mutex<LedgerState>,
    cancelled: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Streaming ASR session.
///
/// Feed 16 kHz mono f32 samples with [`feed_audio`](Self::feed_audio) and
/// consume [`TranscriptionEvent`]s from the stream returned by
/// [`events`](Self::events). Exactly one `Ended` event follows
/// [`stop`](Self::stop); [`cancel`](Self::cancel) closes the stream without
/// one.
///
/// # Example
///
/// ```ignore
/// use streamscribe::{StreamingSession, StreamingConfig};
///
/// let mut session = StreamingSession::new(model, StreamingConfig::default())?;
/// let mut events = session.events().unwrap();
///
/// session.feed_audio(&chunk);
/// session.stop();
///
/// while let Some(event) = events.next().await {
///     println!("{:?}", event);
/// }
/// ```
pub struct StreamingSession {
    inner: Arc<SessionInner>,
    requests: SyncSender<WorkerRequest>,
    worker: Option<JoinHandle<()>>,
    events: Option<EventStream>,
}

impl StreamingSession {
    /// Create a session over a shared model handle.
    pub fn new(model: Arc<dyn AsrModel>, config: StreamingConfig) -> StreamResult<Self> {
        Self::with_memory_probe(model, config, Arc::new(NullMemoryProbe))
    }

    /// Create a session with an explicit memory probe capability.
    pub fn with_memory_probe(
        model: Arc<dyn AsrModel>,
        config: StreamingConfig,
        probe: Arc<dyn MemoryProbe>,
    ) -> StreamResult<Self> {
        let filter_bank = Arc::new(FilterBank::slaney(
            config.n_mels,
            config.n_fft,
            SAMPLE_RATE,
            0.0,
            SAMPLE_RATE / 2.0,
        )?);
        let featurizer = MelFeaturizer::new(config.n_fft, config.hop_length, filter_bank)?;
        let encoder = WindowedEncoder::new(
            model.clone(),
            config.window_frames,
            config.n_mels,
            config.max_cached_windows,
        )?;
        let (event_sender, event_stream) = events::channel(config.event_capacity);

        let inner = Arc::new(SessionInner {
            decode_interval: config.decode_interval(),
            promotion_delay: config.promotion_delay(),
            model,
            config,
            probe,
            engine: Mutex::new(EngineState {
                featurizer,
                encoder,
                state: SessionState::Active,
                total_samples_fed: 0,
                has_new_encoder_content: false,
                last_decode_time: None,
                frozen_window_count: 0,
            }),
            shared: Mutex::new(LedgerState::new()),
            cancelled: AtomicBool::new(false),
        });

        let (requests, request_rx) = std::sync::mpsc::sync_channel(1);
        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("streamscribe-decode".to_string())
            .spawn(move || worker_loop(worker_inner, request_rx, event_sender))
            .map_err(|e| {
                StreamError::invalid_state(format!("failed to spawn decode worker: {}", e))
            })?;

        Ok(Self {
            inner,
            requests,
            worker: Some(worker),
            events: Some(event_stream),
        })
    }

    /// Take the event stream. Returns `None` after the first call.
    pub fn events(&mut self) -> Option<EventStream> {
        self.events.take()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.inner.engine).state
    }

    /// Total samples fed so far.
    pub fn total_samples_fed(&self) -> u64 {
        lock(&self.inner.engine).total_samples_fed
    }

    /// Feed raw PCM samples (16 kHz mono f32). Callable from any thread
    /// while the session is active; never blocks on a running decode.
    pub fn feed_audio(&self, samples: &[f32]) {
        if samples.is_empty() || self.inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        let mut engine = lock(&self.inner.engine);
        if engine.state != SessionState::Active {
            log::debug!(
                target: LOG_TARGET,
                "ignoring {} samples fed in state {:?}",
                samples.len(),
                engine.state
            );
            return;
        }

        engine.total_samples_fed += samples.len() as u64;
        let mut new_windows = 0;
        if let Some(frames) = engine.featurizer.process(samples) {
            match engine.encoder.feed(frames) {
                Ok(windows) => new_windows = windows,
                Err(e) => log::warn!(target: LOG_TARGET, "window encode failed: {}", e),
            }
        }
        if new_windows > 0 || engine.encoder.has_pending_frames() {
            engine.has_new_encoder_content = true;
        }

        self.maybe_schedule_decode(&mut engine, new_windows);
    }

    /// Request a normal stop. Returns immediately; completion is signalled
    /// by the `Ended` event, after which the event stream closes.
    pub fn stop(&self) {
        {
            let mut engine = lock(&self.inner.engine);
            if engine.state != SessionState::Active {
                return;
            }
            engine.state = SessionState::Stopping;
        }
        log::info!(target: LOG_TARGET, "stop requested");
        if self.requests.send(WorkerRequest::Finalize).is_err() {
            log::warn!(target: LOG_TARGET, "decode worker unavailable at stop");
        }
    }

    /// Cancel the session. Idempotent. Any in-flight decode aborts at its
    /// next forward-pass boundary without touching the ledger, and the event
    /// stream closes without an `Ended` event.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!(target: LOG_TARGET, "cancel requested");
        {
            let mut engine = lock(&self.inner.engine);
            engine.state = SessionState::Cancelled;
            engine.featurizer.reset();
            engine.encoder.reset();
            engine.has_new_encoder_content = false;
        }
        // wake the worker if it is parked on an empty queue
        let _ = self.requests.try_send(WorkerRequest::Pass);
    }

    fn maybe_schedule_decode(&self, engine: &mut EngineState, new_windows: usize) {
        let now = Instant::now();
        let window_driven = self.inner.config.finalize_completed_windows && new_windows > 0;
        let interval_elapsed = engine
            .last_decode_time
            .is_some_and(|t| now.saturating_duration_since(t) >= self.inner.decode_interval);
        let first_content = engine.last_decode_time.is_none() && engine.has_new_encoder_content;

        let should_decode = window_driven || interval_elapsed || first_content;
        if !(should_decode && engine.has_new_encoder_content) {
            return;
        }

        match self.requests.try_send(WorkerRequest::Pass) {
            Ok(()) => {
                engine.has_new_encoder_content = false;
                if !window_driven {
                    engine.last_decode_time = Some(now);
                }
                log::debug!(target: LOG_TARGET, "scheduled decode pass");
            }
            // a pass is already queued; the predicate re-runs on the next feed
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.events = None;
        let _ = self.requests.try_send(WorkerRequest::Pass);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decode worker
// ─────────────────────────────────────────────────────────────────────────────

fn worker_loop(inner: Arc<SessionInner>, requests: Receiver<WorkerRequest>, events: EventSender) {
    log::debug!(target: LOG_TARGET, "decode worker started");
    while let Ok(request) = requests.recv() {
        if inner.cancelled.load(Ordering::Acquire) {
            break;
        }
        match request {
            WorkerRequest::Pass => {
                if inner.config.finalize_completed_windows {
                    run_finalize_pass(&inner, &events);
                } else {
                    run_streaming_pass(&inner, &events);
                }
            }
            WorkerRequest::Finalize => {
                run_stop(&inner, &events);
                break;
            }
        }
    }
    log::debug!(target: LOG_TARGET, "decode worker exiting");
}

/// One streaming-mode pass: freeze any windows completed since the last
/// freeze, decode the pending partial window with the confirmed prefix,
/// merge, and publish.
fn run_streaming_pass(inner: &SessionInner, events: &EventSender) {
    let mut freeze_text = None;
    let pending = {
        let mut engine = lock(&inner.engine);
        let encoded = engine.encoder.encoded_window_count();
        if encoded > engine.frozen_window_count {
            let mut shared = lock(&inner.shared);
            let tokens = shared.all_tokens();
            let segment = if tokens.is_empty() {
                String::new()
            } else {
                // Freezes are irreversible, so the provisional tail is
                // promoted here without waiting out the agreement delay.
                match inner.model.detokenize(&tokens) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "window freeze skipped: {}", e);
                        return;
                    }
                }
            };
            text::append_text(&mut shared.completed_text, &segment);
            shared.clear_tokens();
            engine.frozen_window_count = encoded;
            engine.encoder.discard_newly_encoded();
            freeze_text = Some(shared.completed_text.clone());
            log::debug!(
                target: LOG_TARGET,
                "froze transcript through {} windows",
                encoded
            );
        }
        engine.encoder.encode_pending()
    };
    if let Some(text) = freeze_text {
        events.emit(TranscriptionEvent::Confirmed { text });
    }

    let features = match pending {
        Ok(Some(features)) => features,
        Ok(None) => return,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "pending encode failed: {}", e);
            return;
        }
    };

    let prefix = lock(&inner.shared).confirmed.clone();
    let output = match DecodeEngine::decode(
        inner.model.as_ref(),
        &features,
        &prefix,
        &inner.config,
        &inner.cancelled,
    ) {
        Ok(output) => output,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "decode pass failed: {}", e);
            return;
        }
    };
    if output.cancelled {
        log::debug!(target: LOG_TARGET, "decode pass cancelled");
        return;
    }

    let mut all_tokens = prefix;
    all_tokens.extend_from_slice(&output.tokens);
    let now = Instant::now();

    // Only this worker mutates the ledger, so snapshot, merge, detokenize,
    // and commit need not happen under one lock.
    let outcome = {
        let shared = lock(&inner.shared);
        PromotionLedger::merge(
            &shared.confirmed,
            &shared.provisional,
            &shared.first_seen,
            &all_tokens,
            now,
            inner.promotion_delay,
        )
    };
    let confirmed_tail = match inner.model.detokenize(&outcome.confirmed) {
        Ok(text) => text,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "decode pass is a no-op: {}", e);
            return;
        }
    };
    let provisional_text = match inner.model.detokenize(&outcome.provisional) {
        Ok(text) => text,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "decode pass is a no-op: {}", e);
            return;
        }
    };
    let promoted = outcome.promoted;
    let completed = {
        let mut shared = lock(&inner.shared);
        shared.apply(outcome);
        shared.completed_text.clone()
    };

    let confirmed_text = text::concat(&completed, &confirmed_tail);
    if promoted > 0 {
        events.emit(TranscriptionEvent::Confirmed {
            text: confirmed_text.clone(),
        });
    }
    events.emit(TranscriptionEvent::DisplayUpdate {
        confirmed_text,
        provisional_text,
    });
    events.emit(TranscriptionEvent::Stats(make_stats(
        inner,
        output.decode_seconds,
        output.tokens.len(),
        features.nrows(),
    )));
}

/// One boundary-finalize pass: drain the windows completed since the last
/// drain and give each a full one-shot decode. The first drained window
/// reuses streamed ledger text when present, keeping work already spent on
/// it (even though that text can straddle the previous partial window).
fn run_finalize_pass(inner: &SessionInner, events: &EventSender) {
    let drained = {
        let mut engine = lock(&inner.engine);
        match engine.encoder.drain_newly_encoded() {
            Ok(drained) => drained,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "window drain failed: {}", e);
                return;
            }
        }
    };
    if drained.is_empty() {
        return;
    }

    let mut pass_decode_seconds = 0.0;
    let mut pass_tokens = 0;
    let mut pass_audio_tokens = 0;

    for (i, features) in drained.iter().enumerate() {
        if inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        pass_audio_tokens += features.nrows();

        let reused_tokens = if i == 0 {
            let shared = lock(&inner.shared);
            (!shared.is_token_empty()).then(|| shared.all_tokens())
        } else {
            None
        };

        let segment = match reused_tokens {
            Some(tokens) => match inner.model.detokenize(&tokens) {
                Ok(text) => {
                    lock(&inner.shared).clear_tokens();
                    text
                }
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "finalize pass is a no-op: {}", e);
                    return;
                }
            },
            None => {
                let output = match DecodeEngine::decode(
                    inner.model.as_ref(),
                    features,
                    &[],
                    &inner.config,
                    &inner.cancelled,
                ) {
                    Ok(output) => output,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "window decode failed: {}", e);
                        return;
                    }
                };
                if output.cancelled {
                    return;
                }
                pass_decode_seconds += output.decode_seconds;
                pass_tokens += output.tokens.len();
                match inner.model.detokenize(&output.tokens) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "finalize pass is a no-op: {}", e);
                        return;
                    }
                }
            }
        };

        let completed = {
            let mut shared = lock(&inner.shared);
            text::append_text(&mut shared.completed_text, &segment);
            shared.completed_text.clone()
        };
        lock(&inner.engine).frozen_window_count += 1;

        events.emit(TranscriptionEvent::Confirmed {
            text: completed.clone(),
        });
        events.emit(TranscriptionEvent::DisplayUpdate {
            confirmed_text: completed,
            provisional_text: String::new(),
        });
    }

    events.emit(TranscriptionEvent::Stats(make_stats(
        inner,
        pass_decode_seconds,
        pass_tokens,
        pass_audio_tokens,
    )));
}

/// Finalization after `stop()`: flush the featurizer, finalize trailing
/// windows, run one last decode over pending features, then emit `Ended`.
fn run_stop(inner: &SessionInner, events: &EventSender) {
    if inner.cancelled.load(Ordering::Acquire) {
        log::debug!(target: LOG_TARGET, "{}", StreamError::CancelledDuringStop);
        return;
    }

    {
        let mut engine = lock(&inner.engine);
        if let Some(frames) = engine.featurizer.flush() {
            if let Err(e) = engine.encoder.feed(frames) {
                log::warn!(target: LOG_TARGET, "flush encode failed: {}", e);
            }
        }
    }

    if inner.config.finalize_completed_windows {
        run_finalize_pass(inner, events);
    }
    if inner.cancelled.load(Ordering::Acquire) {
        log::debug!(target: LOG_TARGET, "{}", StreamError::CancelledDuringStop);
        return;
    }

    let pending = {
        let engine = lock(&inner.engine);
        engine.encoder.encode_pending()
    };
    match pending {
        Ok(Some(features)) => {
            let prefix = lock(&inner.shared).confirmed.clone();
            match DecodeEngine::decode(
                inner.model.as_ref(),
                &features,
                &prefix,
                &inner.config,
                &inner.cancelled,
            ) {
                Ok(output) if output.cancelled => {
                    log::debug!(target: LOG_TARGET, "{}", StreamError::CancelledDuringStop);
                    return;
                }
                Ok(output) => {
                    let mut confirmed = prefix;
                    confirmed.extend_from_slice(&output.tokens);
                    {
                        let mut shared = lock(&inner.shared);
                        shared.confirmed = confirmed;
                        shared.provisional.clear();
                        shared.first_seen.clear();
                    }
                    events.emit(TranscriptionEvent::Stats(make_stats(
                        inner,
                        output.decode_seconds,
                        output.tokens.len(),
                        features.nrows(),
                    )));
                }
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "final decode failed: {}", e);
                    promote_all_provisional(inner);
                }
            }
        }
        Ok(None) => promote_all_provisional(inner),
        Err(e) => {
            log::warn!(target: LOG_TARGET, "final pending encode failed: {}", e);
            promote_all_provisional(inner);
        }
    }

    if inner.cancelled.load(Ordering::Acquire) {
        log::debug!(target: LOG_TARGET, "{}", StreamError::CancelledDuringStop);
        return;
    }

    let full_text = {
        let shared = lock(&inner.shared);
        match inner.model.detokenize(&shared.confirmed) {
            Ok(tail) => text::concat(&shared.completed_text, &tail),
            Err(e) => {
                log::warn!(target: LOG_TARGET, "detokenize at stop failed: {}", e);
                shared.completed_text.clone()
            }
        }
    };
    events.emit(TranscriptionEvent::Ended { full_text });
    lock(&inner.engine).state = SessionState::Ended;
    log::info!(target: LOG_TARGET, "session ended");
}

fn promote_all_provisional(inner: &SessionInner) {
    let mut shared = lock(&inner.shared);
    let provisional = std::mem::take(&mut shared.provisional);
    shared.confirmed.extend(provisional);
    shared.first_seen.clear();
}

fn make_stats(
    inner: &SessionInner,
    decode_seconds: f64,
    tokens_emitted: usize,
    audio_tokens: usize,
) -> SessionStats {
    let (encoded_window_count, total_samples) = {
        let engine = lock(&inner.engine);
        (
            engine.encoder.encoded_window_count(),
            engine.total_samples_fed,
        )
    };
    let windowed_seconds = audio_tokens as f64 / ENCODER_TOKENS_PER_SECOND;
    SessionStats {
        encoded_window_count,
        total_audio_seconds: total_samples as f64 / SAMPLE_RATE,
        tokens_per_second: if decode_seconds > 0.0 {
            tokens_emitted as f64 / decode_seconds
        } else {
            0.0
        },
        real_time_factor: if windowed_seconds > 0.0 {
            decode_seconds / windowed_seconds
        } else {
            0.0
        },
        peak_memory_gb: inner.probe.peak_memory_gb(),
    }
}
