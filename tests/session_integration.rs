//! End-to-end session scenarios against the mock model.
//!
//! The configs here shrink the STFT and window geometry so a handful of
//! samples exercises full window lifecycles: n_fft 64, hop 16, 8 frames per
//! window. The first window completes after 176 samples; every 16 samples
//! adds one frame.

use std::sync::Arc;
use std::time::Duration;

use streamscribe::testing::mocks::MockAsrModel;
use streamscribe::{
    DelayPreset, EventStream, SessionState, StreamingConfig, StreamingSession, TranscriptionEvent,
};

fn small_config() -> StreamingConfig {
    StreamingConfig {
        n_fft: 64,
        hop_length: 16,
        n_mels: 16,
        window_frames: 8,
        decode_interval_secs: 0.0,
        ..Default::default()
    }
}

fn tone(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 0.11).sin() * 0.4 + (i as f32 * 0.027).cos() * 0.2)
        .collect()
}

async fn next_event(events: &mut EventStream) -> Option<TranscriptionEvent> {
    tokio::time::timeout(Duration::from_secs(10), events.next())
        .await
        .expect("timed out waiting for event")
}

async fn drain_until_closed(events: &mut EventStream) -> Vec<TranscriptionEvent> {
    let mut collected = Vec::new();
    while let Some(event) = next_event(events).await {
        collected.push(event);
    }
    collected
}

fn drain_ready(events: &mut EventStream) -> Vec<TranscriptionEvent> {
    let mut collected = Vec::new();
    while let Some(event) = events.try_next() {
        collected.push(event);
    }
    collected
}

fn confirmed_texts(events: &[TranscriptionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TranscriptionEvent::Confirmed { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn ended_text(events: &[TranscriptionEvent]) -> Option<String> {
    events.iter().find_map(|event| match event {
        TranscriptionEvent::Ended { full_text } => Some(full_text.clone()),
        _ => None,
    })
}

/// Invariant check over a full event log: confirmed texts only ever extend,
/// and every display update carries the most recent confirmed text.
fn check_transcript_invariants(events: &[TranscriptionEvent]) {
    let mut last_confirmed = String::new();
    for event in events {
        match event {
            TranscriptionEvent::Confirmed { text } => {
                assert!(
                    text.starts_with(&last_confirmed),
                    "confirmed text {:?} does not extend {:?}",
                    text,
                    last_confirmed
                );
                last_confirmed = text.clone();
            }
            TranscriptionEvent::DisplayUpdate { confirmed_text, .. } => {
                assert_eq!(
                    confirmed_text, &last_confirmed,
                    "display update does not match the latest confirmed text"
                );
            }
            TranscriptionEvent::Ended { full_text } => {
                assert!(
                    full_text.starts_with(&last_confirmed),
                    "final text {:?} does not extend {:?}",
                    full_text,
                    last_confirmed
                );
            }
            TranscriptionEvent::Stats(_) => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_session_ends_with_empty_transcript() {
    let model = Arc::new(MockAsrModel::new());
    let mut session = StreamingSession::new(model, small_config()).unwrap();
    let mut events = session.events().unwrap();

    session.stop();
    let collected = drain_until_closed(&mut events).await;

    assert_eq!(collected.len(), 1);
    assert_eq!(ended_text(&collected).as_deref(), Some(""));
    assert_eq!(session.state(), SessionState::Ended);
}

#[tokio::test]
async fn sub_window_audio_is_flushed_and_decoded_once() {
    let model = Arc::new(MockAsrModel::new());
    let mut session = StreamingSession::new(model.clone(), small_config()).unwrap();
    let mut events = session.events().unwrap();

    // 100 samples: 3 mel frames, well short of the 8-frame window
    session.feed_audio(&tone(100));
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop();

    let collected = drain_until_closed(&mut events).await;
    check_transcript_invariants(&collected);

    // flush pads the residual into one extra frame: 4 pending frames, one
    // derived token
    let full_text = ended_text(&collected).expect("missing Ended event");
    assert_eq!(full_text, MockAsrModel::text_for(&[100]));
    assert!(matches!(collected.last(), Some(TranscriptionEvent::Ended { .. })));

    // no complete window was ever encoded
    for event in &collected {
        if let TranscriptionEvent::Stats(stats) = event {
            assert_eq!(stats.encoded_window_count, 0);
            assert!(stats.total_audio_seconds > 0.0);
        }
    }
}

#[tokio::test]
async fn two_windows_and_tail_freeze_in_order() {
    let model = Arc::new(MockAsrModel::new());
    let config = StreamingConfig {
        delay_preset: DelayPreset::High,
        ..small_config()
    };
    let mut session = StreamingSession::new(model, config).unwrap();
    let mut events = session.events().unwrap();

    // pending content decoded before each window completes, so freezes have
    // ledger text to keep
    let feeds: &[usize] = &[120, 60, 64, 64, 48];
    for &len in feeds {
        session.feed_audio(&tone(len));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    session.stop();

    let collected = drain_until_closed(&mut events).await;
    check_transcript_invariants(&collected);

    let confirmed = confirmed_texts(&collected);
    assert_eq!(confirmed.len(), 2, "one freeze per completed window");
    assert!(!confirmed[0].is_empty());

    let full_text = ended_text(&collected).expect("missing Ended event");
    assert!(full_text.starts_with(&confirmed[1]));
    assert!(full_text.len() > confirmed[1].len(), "tail text missing");

    let displays = collected
        .iter()
        .filter(|event| matches!(event, TranscriptionEvent::DisplayUpdate { .. }))
        .count();
    assert!(displays >= 1);
}

#[tokio::test]
async fn promotion_waits_for_the_configured_delay() {
    let model = Arc::new(MockAsrModel::new());
    model.set_emission(vec![5, 6, 7]);
    let config = StreamingConfig {
        delay_preset: DelayPreset::Low,
        ..small_config()
    };
    let mut session = StreamingSession::new(model, config).unwrap();
    let mut events = session.events().unwrap();

    // two agreeing decodes inside the 200 ms delay window
    session.feed_audio(&tone(120));
    tokio::time::sleep(Duration::from_millis(60)).await;
    session.feed_audio(&tone(16));
    tokio::time::sleep(Duration::from_millis(60)).await;

    let early = drain_ready(&mut events);
    assert!(
        confirmed_texts(&early).is_empty(),
        "promotion happened before the delay elapsed"
    );

    // a third agreeing decode after the delay promotes the whole prefix
    tokio::time::sleep(Duration::from_millis(250)).await;
    session.feed_audio(&tone(16));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let late = drain_ready(&mut events);
    let confirmed = confirmed_texts(&late);
    assert_eq!(confirmed, vec![MockAsrModel::text_for(&[5, 6, 7])]);

    session.cancel();
    assert!(drain_until_closed(&mut events).await.iter().all(|event| {
        !matches!(event, TranscriptionEvent::Ended { .. })
    }));
}

#[tokio::test]
async fn cancel_mid_decode_aborts_without_ended() {
    let model = Arc::new(MockAsrModel::new());
    model.set_emission((20..30).collect());
    model.set_forward_delay(Some(Duration::from_millis(150)));
    let mut session = StreamingSession::new(model.clone(), small_config()).unwrap();
    let mut events = session.events().unwrap();

    session.feed_audio(&tone(120));
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.cancel();

    let collected = drain_until_closed(&mut events).await;
    assert!(collected.is_empty(), "aborted pass must not publish: {:?}", collected);
    assert_eq!(session.state(), SessionState::Cancelled);
    // the pass stopped within one forward-pass boundary of the cancel
    assert!(model.forward_calls() <= 3, "decode kept running after cancel");
}

#[tokio::test]
async fn finalize_mode_confirms_each_window_and_matches_stop() {
    let model = Arc::new(MockAsrModel::new());
    let config = StreamingConfig {
        finalize_completed_windows: true,
        ..small_config()
    };
    let mut session = StreamingSession::new(model, config).unwrap();
    let mut events = session.events().unwrap();

    // exactly three windows (24 frames) plus a 48-sample residual
    session.feed_audio(&tone(432));
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop();

    let collected = drain_until_closed(&mut events).await;
    check_transcript_invariants(&collected);

    let confirmed = confirmed_texts(&collected);
    assert_eq!(confirmed.len(), 3, "one Confirmed per completed window");

    // each window one-shot decodes to the same derived two-token text
    let window_text = MockAsrModel::text_for(&[100, 101]);
    assert_eq!(confirmed[0], window_text);
    let expected_completed = vec![window_text.clone(); 3].join(" ");
    assert_eq!(confirmed[2], expected_completed);

    // stop decodes the flushed residual frame on top of the frozen windows
    let full_text = ended_text(&collected).expect("missing Ended event");
    let expected_full = format!("{} {}", expected_completed, MockAsrModel::text_for(&[100]));
    assert_eq!(full_text, expected_full);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency and failure policy
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_feeds_never_overlap_decodes() {
    let model = Arc::new(MockAsrModel::new());
    model.set_emission(vec![40, 41, 42]);
    model.set_forward_delay(Some(Duration::from_millis(5)));
    let mut session = StreamingSession::new(model.clone(), small_config()).unwrap();
    let mut events = session.events().unwrap();
    let session = Arc::new(session);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let session = session.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                session.feed_audio(&tone(32));
            }
        }));
    }
    let consumer = tokio::spawn(async move { drain_until_closed(&mut events).await });
    for handle in handles {
        handle.join().unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop();

    let collected = consumer.await.unwrap();
    check_transcript_invariants(&collected);
    assert_eq!(session.total_samples_fed(), 4 * 50 * 32);
    assert_eq!(
        model.max_concurrent_forwards(),
        1,
        "more than one decode pass ran at once"
    );
}

#[tokio::test]
async fn encoder_failure_is_fatal_to_the_pass_not_the_session() {
    let model = Arc::new(MockAsrModel::new());
    let mut session = StreamingSession::new(model.clone(), small_config()).unwrap();
    let mut events = session.events().unwrap();

    model.fail_encode(true);
    session.feed_audio(&tone(176));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Active);

    model.fail_encode(false);
    session.feed_audio(&tone(120));
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop();

    let collected = drain_until_closed(&mut events).await;
    let full_text = ended_text(&collected).expect("session did not recover");
    assert!(!full_text.is_empty());
    assert_eq!(session.state(), SessionState::Ended);
}

#[tokio::test]
async fn unavailable_tokenizer_makes_passes_noops() {
    let model = Arc::new(MockAsrModel::new());
    model.set_tokenizer_available(false);
    let mut session = StreamingSession::new(model.clone(), small_config()).unwrap();
    let mut events = session.events().unwrap();

    session.feed_audio(&tone(120));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(drain_ready(&mut events).is_empty());
    assert_eq!(session.state(), SessionState::Active);

    model.set_tokenizer_available(true);
    session.feed_audio(&tone(16));
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop();

    let collected = drain_until_closed(&mut events).await;
    assert!(collected
        .iter()
        .any(|event| matches!(event, TranscriptionEvent::DisplayUpdate { .. })));
    assert!(ended_text(&collected).is_some());
}

#[tokio::test]
async fn stop_is_idempotent_and_ends_exactly_once() {
    let model = Arc::new(MockAsrModel::new());
    let mut session = StreamingSession::new(model, small_config()).unwrap();
    let mut events = session.events().unwrap();

    session.feed_audio(&tone(100));
    session.stop();
    session.stop();

    let collected = drain_until_closed(&mut events).await;
    let ended = collected
        .iter()
        .filter(|event| matches!(event, TranscriptionEvent::Ended { .. }))
        .count();
    assert_eq!(ended, 1);

    // feeds after the stream closed are ignored
    let fed_before = session.total_samples_fed();
    session.feed_audio(&tone(64));
    assert_eq!(session.total_samples_fed(), fed_before);
}
