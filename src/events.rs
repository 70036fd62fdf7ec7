//! Transcription event stream.
//!
//! A bounded single-producer channel carries events from the session's
//! decode worker to the host. Events are never dropped: when the consumer
//! lags, the producer blocks briefly instead. The channel closes after
//! `Ended` (normal stop) or silently on cancellation.

use crate::stats::SessionStats;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "streamscribe::events";

/// Events emitted by a streaming session, in strict program order.
#[derive(Debug, Clone)]
pub enum TranscriptionEvent {
    /// Live two-tier transcript view
    DisplayUpdate {
        /// Append-only confirmed text
        confirmed_text: String,
        /// Volatile provisional tail
        provisional_text: String,
    },
    /// The confirmed transcript grew
    Confirmed { text: String },
    /// Periodic runtime statistics
    Stats(SessionStats),
    /// The session ended normally; always the last event
    Ended { full_text: String },
}

/// Consumer half of the event channel.
pub struct EventStream {
    receiver: mpsc::Receiver<TranscriptionEvent>,
}

impl EventStream {
    /// Receive the next event, or `None` once the channel has closed.
    pub async fn next(&mut self) -> Option<TranscriptionEvent> {
        self.receiver.recv().await
    }

    /// Blocking variant of [`next`](Self::next) for synchronous hosts.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_next(&mut self) -> Option<TranscriptionEvent> {
        self.receiver.blocking_recv()
    }

    /// Non-blocking poll; `None` when no event is ready or the channel closed.
    pub fn try_next(&mut self) -> Option<TranscriptionEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Producer half, owned by the session's decode worker.
pub(crate) struct EventSender {
    sender: mpsc::Sender<TranscriptionEvent>,
}

impl EventSender {
    /// Deliver an event, blocking while the consumer catches up. A dropped
    /// consumer is not an error; the event is discarded.
    pub(crate) fn emit(&self, event: TranscriptionEvent) {
        if self.sender.blocking_send(event).is_err() {
            log::debug!(target: LOG_TARGET, "event receiver dropped; discarding event");
        }
    }
}

/// Create a bounded event channel.
pub(crate) fn channel(capacity: usize) -> (EventSender, EventStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventSender { sender }, EventStream { receiver })
}
