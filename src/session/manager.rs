//! Session lifecycle: connect, stream, interrupt, stop.
//!
//! The manager owns the session state machine and the per-session event
//! loop that bridges the transport, the microphone, and the playback
//! scheduler. Audio hardware and the network are behind traits so the
//! whole lifecycle is testable without devices or a server.

use crate::audio::capture::{CaptureFrame, CpalCapture};
use crate::audio::codec;
use crate::audio::playback::{CpalSink, OutputSink, PlaybackScheduler, SourceId};
use crate::config::{AssistantConfig, AudioConfig};
use crate::credentials::resolve_api_key;
use crate::error::{AssistantError, Result};
use crate::knowledge::KnowledgeStore;
use crate::session::protocol::ServerEvent;
use crate::session::transport::{LiveConnector, LiveTransport};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state of the voice session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session; ready to start.
    #[default]
    Idle,
    /// Connection and handshake in progress.
    Connecting,
    /// Live duplex conversation.
    Active,
    /// The last session failed; a new start is allowed.
    Error,
}

/// Events surfaced to the user interface.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Session status changed.
    Status(SessionStatus),
    /// A user text turn was submitted.
    UserText(String),
    /// Incremental assistant transcript for the turn in progress.
    AssistantDelta(String),
    /// A complete assistant turn transcript.
    AssistantTurn(String),
    /// The assistant started or stopped audibly speaking.
    Speaking(bool),
    /// A human-readable notice (errors, lifecycle messages).
    Notice(String),
}

/// Provides capture and playback; production uses cpal, tests inject
/// channel-backed fakes.
pub trait AudioEnvironment: Send + Sync {
    /// Start delivering fixed-size microphone frames on `tx` until the
    /// token is cancelled. Device errors surface here, before the
    /// session goes active.
    fn start_capture(
        &self,
        config: &AudioConfig,
        tx: mpsc::Sender<CaptureFrame>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Open the output device. Returns the sink and the channel on which
    /// finished source ids are reported.
    fn create_sink(
        &self,
        config: &AudioConfig,
    ) -> Result<(Box<dyn OutputSink>, mpsc::UnboundedReceiver<SourceId>)>;
}

/// cpal-backed [`AudioEnvironment`].
pub struct CpalEnvironment;

impl AudioEnvironment for CpalEnvironment {
    fn start_capture(
        &self,
        config: &AudioConfig,
        tx: mpsc::Sender<CaptureFrame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        // Device selection errors are synchronous; stream failures after
        // that end the capture task and the session notices the silence.
        let capture = CpalCapture::new(config)?;
        tokio::spawn(async move {
            if let Err(e) = capture.run(tx, cancel).await {
                error!("capture ended: {e}");
            }
        });
        Ok(())
    }

    fn create_sink(
        &self,
        config: &AudioConfig,
    ) -> Result<(Box<dyn OutputSink>, mpsc::UnboundedReceiver<SourceId>)> {
        let mut sink = CpalSink::new(config)?;
        let done_rx = sink
            .take_done_events()
            .ok_or_else(|| AssistantError::Channel("playback done channel taken".into()))?;
        Ok((Box::new(sink), done_rx))
    }
}

struct ActiveSession {
    transport: Arc<dyn LiveTransport>,
    cancel: CancellationToken,
}

/// Owns the live session lifecycle.
pub struct SessionManager {
    config: AssistantConfig,
    connector: Arc<dyn LiveConnector>,
    audio: Arc<dyn AudioEnvironment>,
    knowledge: Arc<Mutex<KnowledgeStore>>,
    status_tx: watch::Sender<SessionStatus>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    ui_rx: Option<mpsc::UnboundedReceiver<UiEvent>>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        config: AssistantConfig,
        connector: Arc<dyn LiveConnector>,
        audio: Arc<dyn AudioEnvironment>,
        knowledge: Arc<Mutex<KnowledgeStore>>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            audio,
            knowledge,
            status_tx,
            ui_tx,
            ui_rx: Some(ui_rx),
            active: None,
        }
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Watch status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Take the UI event stream. Yields `Some` exactly once.
    pub fn take_ui_events(&mut self) -> Option<mpsc::UnboundedReceiver<UiEvent>> {
        self.ui_rx.take()
    }

    /// Start a session, optionally opening with a user text turn.
    ///
    /// A no-op while a session is connecting or active. Starting from
    /// the error state begins a fresh session.
    ///
    /// # Errors
    ///
    /// Credential, device, and connection failures are returned and also
    /// reflected as the error status with a UI notice.
    pub async fn start(&mut self, initial_text: Option<String>) -> Result<()> {
        match self.status() {
            SessionStatus::Connecting | SessionStatus::Active => {
                debug!("start ignored: session already underway");
                return Ok(());
            }
            SessionStatus::Idle | SessionStatus::Error => {}
        }

        // Clear any remnants of a failed session.
        self.teardown();
        self.publish(SessionStatus::Connecting);

        let instruction = self.build_instruction();

        // The key is checked before touching any audio device.
        let key = match resolve_api_key(&self.config.session) {
            Ok(key) => key,
            Err(e) => return Err(self.fail(e)),
        };

        let mut transport = match self
            .connector
            .connect(&self.config.session, &key, &instruction)
            .await
        {
            Ok(t) => t,
            Err(e) => return Err(self.fail(e)),
        };
        let events = match transport.take_events() {
            Some(rx) => rx,
            None => {
                return Err(self.fail(AssistantError::Channel(
                    "transport event stream already taken".into(),
                )));
            }
        };

        let (sink, done_rx) = match self.audio.create_sink(&self.config.audio) {
            Ok(pair) => pair,
            Err(e) => {
                transport.close();
                return Err(self.fail(e));
            }
        };

        let cancel = CancellationToken::new();
        let (capture_tx, capture_rx) = mpsc::channel(32);
        if let Err(e) = self
            .audio
            .start_capture(&self.config.audio, capture_tx, cancel.clone())
        {
            transport.close();
            return Err(self.fail(e));
        }

        let transport: Arc<dyn LiveTransport> = Arc::from(transport);

        if let Some(text) = initial_text {
            let _ = self.ui_tx.send(UiEvent::UserText(text.clone()));
            transport.send_text_turn(&text);
        }

        self.publish(SessionStatus::Active);
        info!("session active");

        let loop_ctx = SessionLoop {
            transport: Arc::clone(&transport),
            scheduler: PlaybackScheduler::new(sink),
            output_sample_rate: self.config.audio.output_sample_rate,
            ui: self.ui_tx.clone(),
            status: self.status_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(loop_ctx.run(events, capture_rx, done_rx));

        self.active = Some(ActiveSession { transport, cancel });
        Ok(())
    }

    /// Send a user text turn. Implicitly starts a session when none is
    /// active, using the text as the opening turn.
    ///
    /// # Errors
    ///
    /// Propagates start failures when a session must be created.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.status() == SessionStatus::Active
            && let Some(active) = &self.active
        {
            let _ = self.ui_tx.send(UiEvent::UserText(text.to_owned()));
            active.transport.send_text_turn(text);
            return Ok(());
        }
        self.start(Some(text.to_owned())).await
    }

    /// Stop the session and return to idle. Safe to call from any state,
    /// repeatedly.
    pub fn stop(&mut self) {
        self.teardown();
        self.publish(SessionStatus::Idle);
    }

    fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.transport.close();
            info!("session stopped");
        }
    }

    /// System instruction for this session: the base prompt plus the
    /// current knowledge snapshot, capped to the configured length.
    fn build_instruction(&self) -> String {
        let context = match self.knowledge.lock() {
            Ok(store) => store.grounding_context(self.config.session.max_context_chars),
            Err(_) => String::new(),
        };
        if context.is_empty() {
            self.config.session.system_prompt.clone()
        } else {
            format!(
                "{}\n\nKnowledge base:\n{context}",
                self.config.session.system_prompt
            )
        }
    }

    fn publish(&self, status: SessionStatus) {
        publish_status(&self.status_tx, &self.ui_tx, status);
    }

    fn fail(&mut self, error: AssistantError) -> AssistantError {
        warn!("session failed: {error}");
        let _ = self.ui_tx.send(UiEvent::Notice(error.to_string()));
        self.teardown();
        self.publish(SessionStatus::Error);
        error
    }
}

fn publish_status(
    status_tx: &watch::Sender<SessionStatus>,
    ui: &mpsc::UnboundedSender<UiEvent>,
    status: SessionStatus,
) {
    if status_tx.send_replace(status) != status {
        let _ = ui.send(UiEvent::Status(status));
    }
}

/// Per-session event loop.
struct SessionLoop {
    transport: Arc<dyn LiveTransport>,
    scheduler: PlaybackScheduler<Box<dyn OutputSink>>,
    output_sample_rate: u32,
    ui: mpsc::UnboundedSender<UiEvent>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ServerEvent>,
        mut capture_rx: mpsc::Receiver<CaptureFrame>,
        mut done_rx: mpsc::UnboundedReceiver<SourceId>,
    ) {
        let mut turn_text = String::new();
        let mut speaking = false;
        let mut done_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("session loop cancelled");
                    break;
                }
                frame = capture_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            self.transport.send_audio_frame(&frame.samples, frame.sample_rate);
                        }
                        None => {
                            // Capture died mid-session; nothing useful can
                            // continue without a microphone.
                            self.finish(SessionStatus::Error, Some("microphone stopped"));
                            break;
                        }
                    }
                }
                done = done_rx.recv(), if done_open => {
                    match done {
                        Some(id) => {
                            if self.scheduler.mark_done(id) && speaking {
                                speaking = false;
                                let _ = self.ui.send(UiEvent::Speaking(false));
                            }
                        }
                        None => done_open = false,
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(ServerEvent::Audio(bytes)) => {
                            match codec::decode_to_buffer(&bytes, self.output_sample_rate, 1) {
                                Ok(buffer) => {
                                    self.scheduler.enqueue(buffer);
                                    if !speaking {
                                        speaking = true;
                                        let _ = self.ui.send(UiEvent::Speaking(true));
                                    }
                                }
                                Err(e) => warn!("dropping undecodable audio: {e}"),
                            }
                        }
                        Some(ServerEvent::TranscriptDelta(delta)) => {
                            turn_text.push_str(&delta);
                            let _ = self.ui.send(UiEvent::AssistantDelta(delta));
                        }
                        Some(ServerEvent::Interrupted) => {
                            debug!("model interrupted, flushing playback");
                            self.scheduler.interrupt();
                            if speaking {
                                speaking = false;
                                let _ = self.ui.send(UiEvent::Speaking(false));
                            }
                        }
                        Some(ServerEvent::TurnComplete) => {
                            if !turn_text.is_empty() {
                                let _ = self
                                    .ui
                                    .send(UiEvent::AssistantTurn(std::mem::take(&mut turn_text)));
                            }
                        }
                        Some(ServerEvent::Error(message)) => {
                            error!("session error: {message}");
                            self.finish(SessionStatus::Error, Some(&message));
                            break;
                        }
                        Some(ServerEvent::Closed) | None => {
                            info!("session closed");
                            self.finish(SessionStatus::Idle, None);
                            break;
                        }
                    }
                }
            }
        }

        // Stops capture and playback regardless of how the loop exited.
        self.cancel.cancel();
        self.scheduler.interrupt();
    }

    /// Publish a terminal status unless a newer session owns the state
    /// (stop or restart already cancelled this loop).
    fn finish(&self, status: SessionStatus, notice: Option<&str>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(message) = notice {
            let _ = self.ui.send(UiEvent::Notice(message.to_owned()));
        }
        publish_status(&self.status, &self.ui, status);
    }
}
