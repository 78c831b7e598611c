//! WebSocket transport for the live session.
//!
//! A connector opens the socket, performs the setup handshake, and hands
//! back a transport handle. Sends are fire-and-forget through a channel
//! so callers never block on socket backpressure; inbound frames are
//! parsed into [`ServerEvent`]s on a spawned reader task. There is no
//! reconnection: any failure ends the session.

use crate::config::SessionConfig;
use crate::credentials::ApiKey;
use crate::error::{AssistantError, Result};
use crate::session::protocol::{ClientMessage, ServerEvent, parse_server_frame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Opens live sessions. Production uses [`WsConnector`]; tests inject a
/// mock that returns a scripted transport.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect, send the setup message, and wait for the server's
    /// acknowledgement.
    async fn connect(
        &self,
        config: &SessionConfig,
        key: &ApiKey,
        system_instruction: &str,
    ) -> Result<Box<dyn LiveTransport>>;
}

/// An established live session. Send handles are cheap and shareable;
/// the event stream can be taken once.
pub trait LiveTransport: Send + Sync {
    /// Queue a microphone frame for sending. Never blocks; frames queued
    /// after the connection dies are silently dropped.
    fn send_audio_frame(&self, samples: &[f32], sample_rate: u32);

    /// Queue a user text turn for sending.
    fn send_text_turn(&self, text: &str);

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Take the inbound event stream. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>>;
}

/// Connector backed by tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(
        &self,
        config: &SessionConfig,
        key: &ApiKey,
        system_instruction: &str,
    ) -> Result<Box<dyn LiveTransport>> {
        let mut url = Url::parse(&config.live_url)
            .map_err(|e| AssistantError::Config(format!("invalid live URL: {e}")))?;
        url.query_pairs_mut().append_pair("key", key.as_str());

        info!("connecting live session ({})", config.model);

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let (mut stream, _response) =
            tokio::time::timeout(timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    AssistantError::Transport(format!(
                        "connection timed out after {}s",
                        config.connect_timeout_secs
                    ))
                })?
                .map_err(|e| AssistantError::Transport(format!("connection failed: {e}")))?;

        let setup = ClientMessage::setup(&config.model, system_instruction);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| AssistantError::Transport(format!("cannot encode setup: {e}")))?;
        stream
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| AssistantError::Transport(format!("setup send failed: {e}")))?;

        // The server acknowledges setup before any content flows.
        let ack = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| AssistantError::Transport("setup acknowledgement timed out".into()))?;
        match ack {
            Some(Ok(msg)) => {
                let text = frame_text(&msg);
                if !text.contains("setupComplete") {
                    return Err(AssistantError::Transport(format!(
                        "unexpected setup response: {text}"
                    )));
                }
            }
            Some(Err(e)) => {
                return Err(AssistantError::Transport(format!(
                    "connection failed during setup: {e}"
                )));
            }
            None => {
                return Err(AssistantError::Transport(
                    "connection closed during setup".into(),
                ));
            }
        }

        info!("live session established");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    queued = outbound_rx.recv() => {
                        match queued {
                            Some(Outbound::Frame(json)) => {
                                if let Err(e) = stream.send(Message::Text(json)).await {
                                    error!("send failed: {e}");
                                    let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                                    break;
                                }
                            }
                            Some(Outbound::Close) | None => {
                                debug!("closing live session");
                                let _ = stream.send(Message::Close(None)).await;
                                let _ = event_tx.send(ServerEvent::Closed);
                                break;
                            }
                        }
                    }
                    inbound = stream.next() => {
                        match inbound {
                            Some(Ok(Message::Close(_))) | None => {
                                info!("live session closed by server");
                                let _ = event_tx.send(ServerEvent::Closed);
                                break;
                            }
                            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                            Some(Ok(msg)) => {
                                let text = frame_text(&msg);
                                match parse_server_frame(&text) {
                                    Ok(events) => {
                                        for event in events {
                                            if event_tx.send(event).is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    Err(e) => warn!("dropping unreadable frame: {e}"),
                                }
                            }
                            Some(Err(e)) => {
                                error!("connection error: {e}");
                                let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::new(WsTransport {
            outbound: outbound_tx,
            events: Some(event_rx),
        }))
    }
}

/// Extract UTF-8 text from a websocket frame; the server may deliver
/// JSON as either text or binary frames.
fn frame_text(msg: &Message) -> String {
    match msg {
        Message::Text(t) => t.to_string(),
        Message::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    }
}

enum Outbound {
    Frame(String),
    Close,
}

struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl WsTransport {
    fn queue(&self, message: &ClientMessage) {
        match serde_json::to_string(message) {
            Ok(json) => {
                if self.outbound.send(Outbound::Frame(json)).is_err() {
                    debug!("dropping frame for closed session");
                }
            }
            Err(e) => error!("cannot encode outbound message: {e}"),
        }
    }
}

impl LiveTransport for WsTransport {
    fn send_audio_frame(&self, samples: &[f32], sample_rate: u32) {
        self.queue(&ClientMessage::audio_frame(samples, sample_rate));
    }

    fn send_text_turn(&self, text: &str) {
        self.queue(&ClientMessage::text_turn(text));
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events.take()
    }
}
