//! Streaming automatic speech recognition sessions.
//!
//! streamscribe turns incremental batches of raw audio samples into a live
//! transcript with a growing *confirmed* prefix and a volatile *provisional*
//! tail, plus periodic runtime statistics, until the caller ends the stream.
//!
//! # Architecture
//!
//! ```text
//! feed_audio() → [MelFeaturizer] → [WindowedEncoder] ──┐
//!                                                      │ completed windows
//!                 scheduler (one worker, one pending)  │ + pending view
//!                        │                             ▼
//!                        └────────────→ [DecodeEngine] → [PromotionLedger]
//!                                                              │
//!                 DisplayUpdate / Confirmed / Stats / Ended ◄──┘
//! ```
//!
//! Three timelines advance independently: audio-sample time in the
//! featurizer, encoder-window time in the windowed encoder, and
//! decoder-token time in the promotion ledger. The session keeps them in
//! lockstep: the feed path never blocks on inference, at most one decode
//! pass is in flight, and a time-delayed agreement rule stabilizes repeated
//! token prefixes into permanent transcript.
//!
//! The neural network itself (acoustic encoder, autoregressive LM,
//! tokenizer) stays behind the [`AsrModel`] trait; this crate supplies the
//! orchestration, not the weights.
//!
//! # Example
//!
//! ```ignore
//! use streamscribe::{StreamingSession, StreamingConfig, TranscriptionEvent};
//! use std::sync::Arc;
//!
//! let model: Arc<dyn streamscribe::AsrModel> = load_model()?;
//! let mut session = StreamingSession::new(model, StreamingConfig::default())?;
//! let mut events = session.events().unwrap();
//!
//! std::thread::spawn(move || {
//!     for chunk in microphone_chunks() {
//!         session.feed_audio(&chunk);
//!     }
//!     session.stop();
//! });
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         TranscriptionEvent::DisplayUpdate { confirmed_text, provisional_text } => {
//!             print!("\r{} {}", confirmed_text, provisional_text);
//!         }
//!         TranscriptionEvent::Ended { full_text } => println!("\n{}", full_text),
//!         _ => {}
//!     }
//! }
//! ```

pub mod audio;
pub mod config;
pub mod decode;
pub mod encoder;
pub mod error;
pub mod events;
pub mod ledger;
pub mod model;
pub mod session;
pub mod stats;
pub mod testing;
pub mod text;

pub use audio::{FilterBank, MelFeaturizer, MelFrame};
pub use config::{DelayPreset, StreamingConfig};
pub use decode::{DecodeEngine, DecodeOutput};
pub use encoder::WindowedEncoder;
pub use error::{StreamError, StreamResult};
pub use events::{EventStream, TranscriptionEvent};
pub use ledger::{LedgerState, MergeOutcome, PromotionLedger};
pub use model::{AsrModel, EncodedFeature, KvCache};
pub use session::{SessionState, StreamingSession};
pub use stats::{MemoryProbe, NullMemoryProbe, ProcessMemoryProbe, SessionStats};
