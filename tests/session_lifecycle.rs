//! Session lifecycle tests against mock transport and audio devices.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wisevoice::audio::codec::{self, AudioBuffer};
use wisevoice::audio::playback::{OutputSink, SourceId};
use wisevoice::audio::capture::CaptureFrame;
use wisevoice::config::{AssistantConfig, AudioConfig, SessionConfig};
use wisevoice::credentials::ApiKey;
use wisevoice::error::Result;
use wisevoice::session::manager::AudioEnvironment;
use wisevoice::session::protocol::ServerEvent;
use wisevoice::session::transport::{LiveConnector, LiveTransport};
use wisevoice::{KnowledgeStore, SessionManager, SessionStatus, UiEvent};

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Handles to one mock connection, kept for inspection after connect.
struct SessionHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
    texts: Arc<Mutex<Vec<String>>>,
    audio_frames: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
struct MockConnector {
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
    fail_connect: Arc<AtomicBool>,
}

impl MockConnector {
    fn session(&self, index: usize) -> SessionHandle {
        let sessions = self.sessions.lock().unwrap();
        let handle = &sessions[index];
        SessionHandle {
            events: handle.events.clone(),
            texts: Arc::clone(&handle.texts),
            audio_frames: Arc::clone(&handle.audio_frames),
            closed: Arc::clone(&handle.closed),
        }
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(
        &self,
        _config: &SessionConfig,
        _key: &ApiKey,
        _system_instruction: &str,
    ) -> Result<Box<dyn LiveTransport>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(wisevoice::AssistantError::Transport(
                "connection refused".into(),
            ));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let texts = Arc::new(Mutex::new(Vec::new()));
        let audio_frames = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        self.sessions.lock().unwrap().push(SessionHandle {
            events: event_tx,
            texts: Arc::clone(&texts),
            audio_frames: Arc::clone(&audio_frames),
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(MockTransport {
            texts,
            audio_frames,
            closed,
            events: Mutex::new(Some(event_rx)),
        }))
    }
}

struct MockTransport {
    texts: Arc<Mutex<Vec<String>>>,
    audio_frames: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
}

impl LiveTransport for MockTransport {
    fn send_audio_frame(&self, _samples: &[f32], _sample_rate: u32) {
        self.audio_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn send_text_turn(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_owned());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events.lock().unwrap().take()
    }
}

/// Sink state shared with the test.
#[derive(Default)]
struct SinkState {
    scheduled: Vec<(SourceId, f64, f64)>,
    cancel_count: usize,
}

struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

impl OutputSink for MockSink {
    fn now(&self) -> f64 {
        0.0
    }

    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64) {
        self.state
            .lock()
            .unwrap()
            .scheduled
            .push((id, start_at, buffer.duration_secs()));
    }

    fn cancel_all(&mut self) {
        self.state.lock().unwrap().cancel_count += 1;
    }
}

#[derive(Clone, Default)]
struct MockAudio {
    capture_starts: Arc<AtomicUsize>,
    /// Keeps capture senders alive and lets tests inject mic frames.
    capture_txs: Arc<Mutex<Vec<mpsc::Sender<CaptureFrame>>>>,
    sink_states: Arc<Mutex<Vec<Arc<Mutex<SinkState>>>>>,
    done_txs: Arc<Mutex<Vec<mpsc::UnboundedSender<SourceId>>>>,
}

impl MockAudio {
    fn sink_state(&self, index: usize) -> Arc<Mutex<SinkState>> {
        Arc::clone(&self.sink_states.lock().unwrap()[index])
    }
}

impl AudioEnvironment for MockAudio {
    fn start_capture(
        &self,
        _config: &AudioConfig,
        tx: mpsc::Sender<CaptureFrame>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.capture_starts.fetch_add(1, Ordering::SeqCst);
        self.capture_txs.lock().unwrap().push(tx);
        Ok(())
    }

    fn create_sink(
        &self,
        _config: &AudioConfig,
    ) -> Result<(Box<dyn OutputSink>, mpsc::UnboundedReceiver<SourceId>)> {
        let state = Arc::new(Mutex::new(SinkState::default()));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        self.sink_states.lock().unwrap().push(Arc::clone(&state));
        self.done_txs.lock().unwrap().push(done_tx);
        Ok((Box::new(MockSink { state }), done_rx))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    manager: SessionManager,
    connector: MockConnector,
    audio: MockAudio,
    ui: mpsc::UnboundedReceiver<UiEvent>,
}

fn fixture() -> Fixture {
    let mut config = AssistantConfig::default();
    config.session.api_key = Some("test-key".to_owned());

    let connector = MockConnector::default();
    let audio = MockAudio::default();
    let mut manager = SessionManager::new(
        config,
        Arc::new(connector.clone()),
        Arc::new(audio.clone()),
        Arc::new(Mutex::new(KnowledgeStore::new())),
    );
    let ui = manager.take_ui_events().unwrap();
    Fixture {
        manager,
        connector,
        audio,
        ui,
    }
}

/// Receive UI events until one satisfies the predicate, or panic after
/// two seconds.
async fn wait_for_ui<F>(ui: &mut mpsc::UnboundedReceiver<UiEvent>, mut predicate: F) -> UiEvent
where
    F: FnMut(&UiEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let event = tokio::time::timeout_at(deadline, ui.recv())
            .await
            .expect("timed out waiting for UI event")
            .expect("UI channel closed");
        if predicate(&event) {
            return event;
        }
    }
}

/// Poll a condition until it holds, or panic after two seconds.
async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn audio_event(samples: &[f32]) -> ServerEvent {
    let payload = codec::encode_frame(samples);
    ServerEvent::Audio(codec::decode_frame(&payload).unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_is_a_noop_while_active() {
    let mut fx = fixture();

    fx.manager.start(None).await.unwrap();
    assert_eq!(fx.manager.status(), SessionStatus::Active);
    assert_eq!(fx.connector.session_count(), 1);

    // A second start must not open a second connection.
    fx.manager.start(None).await.unwrap();
    assert_eq!(fx.connector.session_count(), 1);
    assert_eq!(fx.audio.capture_starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_returns_to_idle_and_is_idempotent() {
    let mut fx = fixture();

    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);

    fx.manager.stop();
    assert_eq!(fx.manager.status(), SessionStatus::Idle);
    assert!(session.closed.load(Ordering::SeqCst));

    // Stopping again, and stopping without a session, are both no-ops.
    fx.manager.stop();
    assert_eq!(fx.manager.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn stop_before_start_is_harmless() {
    let mut fx = fixture();
    fx.manager.stop();
    fx.manager.stop();
    assert_eq!(fx.manager.status(), SessionStatus::Idle);
    assert_eq!(fx.connector.session_count(), 0);
}

#[tokio::test]
async fn send_text_while_idle_starts_session_with_opening_turn() {
    let mut fx = fixture();

    fx.manager.send_text("what is in chapter two?").await.unwrap();

    assert_eq!(fx.manager.status(), SessionStatus::Active);
    let session = fx.connector.session(0);
    assert_eq!(
        *session.texts.lock().unwrap(),
        vec!["what is in chapter two?".to_owned()]
    );
}

#[tokio::test]
async fn send_text_while_active_reuses_the_session() {
    let mut fx = fixture();

    fx.manager.start(None).await.unwrap();
    fx.manager.send_text("first").await.unwrap();
    fx.manager.send_text("second").await.unwrap();

    assert_eq!(fx.connector.session_count(), 1);
    let session = fx.connector.session(0);
    assert_eq!(
        *session.texts.lock().unwrap(),
        vec!["first".to_owned(), "second".to_owned()]
    );
}

#[tokio::test]
async fn transcript_deltas_accumulate_into_complete_turns() {
    let mut fx = fixture();
    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);

    session
        .events
        .send(ServerEvent::TranscriptDelta("Par".into()))
        .unwrap();
    session
        .events
        .send(ServerEvent::TranscriptDelta("is.".into()))
        .unwrap();
    session.events.send(ServerEvent::TurnComplete).unwrap();

    let turn = wait_for_ui(&mut fx.ui, |e| matches!(e, UiEvent::AssistantTurn(_))).await;
    assert!(matches!(turn, UiEvent::AssistantTurn(text) if text == "Paris."));

    // The next turn starts from an empty transcript.
    session
        .events
        .send(ServerEvent::TranscriptDelta("Lyon.".into()))
        .unwrap();
    session.events.send(ServerEvent::TurnComplete).unwrap();
    let turn = wait_for_ui(&mut fx.ui, |e| matches!(e, UiEvent::AssistantTurn(_))).await;
    assert!(matches!(turn, UiEvent::AssistantTurn(text) if text == "Lyon."));
}

#[tokio::test]
async fn model_audio_is_scheduled_gaplessly_and_reports_speaking() {
    let mut fx = fixture();
    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);
    let sink = fx.audio.sink_state(0);

    // Two 0.1s buffers at 24kHz.
    session.events.send(audio_event(&[0.1; 2400])).unwrap();
    session.events.send(audio_event(&[0.2; 2400])).unwrap();

    let event = wait_for_ui(&mut fx.ui, |e| matches!(e, UiEvent::Speaking(_))).await;
    assert!(matches!(event, UiEvent::Speaking(true)));

    wait_until(|| sink.lock().unwrap().scheduled.len() == 2).await;
    let state = sink.lock().unwrap();
    let (_, first_start, first_duration) = state.scheduled[0];
    let (_, second_start, _) = state.scheduled[1];
    // The second buffer starts exactly where the first ends.
    assert!((second_start - (first_start + first_duration)).abs() < 1e-9);
}

#[tokio::test]
async fn interruption_flushes_playback_immediately() {
    let mut fx = fixture();
    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);
    let sink = fx.audio.sink_state(0);

    session.events.send(audio_event(&[0.1; 2400])).unwrap();
    wait_for_ui(&mut fx.ui, |e| matches!(e, UiEvent::Speaking(true))).await;

    session.events.send(ServerEvent::Interrupted).unwrap();

    let event = wait_for_ui(&mut fx.ui, |e| matches!(e, UiEvent::Speaking(_))).await;
    assert!(matches!(event, UiEvent::Speaking(false)));
    assert!(sink.lock().unwrap().cancel_count >= 1);
}

#[tokio::test]
async fn microphone_frames_are_forwarded_to_the_transport() {
    let mut fx = fixture();
    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);

    let tx = fx.audio.capture_txs.lock().unwrap()[0].clone();
    tx.send(CaptureFrame {
        samples: vec![0.0; 4096],
        sample_rate: 16_000,
    })
    .await
    .unwrap();

    wait_until(|| session.audio_frames.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn events_after_stop_are_ignored() {
    let mut fx = fixture();
    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);

    fx.manager.stop();
    assert_eq!(fx.manager.status(), SessionStatus::Idle);

    // A late burst from the dead session must not resurrect any state.
    let _ = session.events.send(ServerEvent::TranscriptDelta("stale".into()));
    let _ = session.events.send(ServerEvent::Error("stale failure".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fx.manager.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn server_close_returns_the_session_to_idle() {
    let mut fx = fixture();
    fx.manager.start(None).await.unwrap();
    let session = fx.connector.session(0);

    session.events.send(ServerEvent::Closed).unwrap();

    wait_for_ui(
        &mut fx.ui,
        |e| matches!(e, UiEvent::Status(SessionStatus::Idle)),
    )
    .await;
    assert_eq!(fx.manager.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn connect_failure_sets_error_and_allows_restart() {
    let mut fx = fixture();
    fx.connector.fail_connect.store(true, Ordering::SeqCst);

    assert!(fx.manager.start(None).await.is_err());
    assert_eq!(fx.manager.status(), SessionStatus::Error);
    // No audio device was touched for the failed attempt.
    assert_eq!(fx.audio.capture_starts.load(Ordering::SeqCst), 0);

    // Starting from the error state opens a fresh session.
    fx.connector.fail_connect.store(false, Ordering::SeqCst);
    fx.manager.start(None).await.unwrap();
    assert_eq!(fx.manager.status(), SessionStatus::Active);
    assert_eq!(fx.connector.session_count(), 1);
}

#[tokio::test]
async fn restart_after_stop_opens_a_new_connection() {
    let mut fx = fixture();

    fx.manager.start(None).await.unwrap();
    fx.manager.stop();
    fx.manager.start(None).await.unwrap();

    assert_eq!(fx.connector.session_count(), 2);
    assert!(fx.connector.session(0).closed.load(Ordering::SeqCst));
    assert!(!fx.connector.session(1).closed.load(Ordering::SeqCst));
    assert_eq!(fx.manager.status(), SessionStatus::Active);
}
