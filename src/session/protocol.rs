//! Wire protocol for the bidirectional live API.
//!
//! Mirrors the BidiGenerateContent message shapes: a setup message on
//! connect, realtime media chunks and client content turns outbound,
//! and server content (audio, transcription, interruption, turn
//! boundaries) inbound. Unknown inbound messages are tolerated and
//! skipped so additive server changes do not break the session.

use crate::audio::codec;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message of the connection: model and session configuration.
    Setup(Setup),
    /// Streamed realtime media (microphone audio).
    RealtimeInput(RealtimeInput),
    /// A discrete text turn.
    ClientContent(ClientContent),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

/// Empty marker object; presence enables output transcription.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded PCM16 payload.
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

impl ClientMessage {
    /// Build the connection setup message.
    #[must_use]
    pub fn setup(model: &str, system_instruction: &str) -> Self {
        let instruction = if system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part {
                    text: Some(system_instruction.to_owned()),
                    inline_data: None,
                }],
            })
        };
        Self::Setup(Setup {
            model: format!("models/{model}"),
            system_instruction: instruction,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_owned()],
            },
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
        })
    }

    /// Build a realtime audio chunk from f32 microphone samples.
    #[must_use]
    pub fn audio_frame(samples: &[f32], sample_rate: u32) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: codec::encode_frame(samples),
            }],
        })
    }

    /// Build a user text turn.
    #[must_use]
    pub fn text_turn(text: &str) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_owned()),
                parts: vec![Part {
                    text: Some(text.to_owned()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One raw frame from the server.
///
/// The wire format is a JSON object keyed by message kind. Parsing as a
/// struct of optional fields lets unknown kinds pass through silently.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    /// Acknowledges the setup message; the session is live.
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    /// A fragment of the model's response.
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// Normalized events delivered to the session loop.
///
/// Audio payloads are decoded to raw PCM16 bytes at this boundary so a
/// malformed fragment is dropped here instead of killing playback.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Raw little-endian PCM16 audio at the output sample rate.
    Audio(Vec<u8>),
    /// Incremental transcript text for the current model turn.
    TranscriptDelta(String),
    /// The model was interrupted (barge-in); flush playback.
    Interrupted,
    /// The model's turn finished.
    TurnComplete,
    /// The connection closed normally.
    Closed,
    /// The connection failed.
    Error(String),
}

/// Parse one raw server frame into zero or more session events.
///
/// Returns `Ok(events)` for every well-formed frame, including frames
/// this client ignores; only malformed JSON is an error.
pub fn parse_server_frame(raw: &str) -> Result<Vec<ServerEvent>> {
    let frame: ServerFrame = serde_json::from_str(raw)
        .map_err(|e| crate::error::AssistantError::Decode(format!("bad server frame: {e}")))?;

    let mut events = Vec::new();
    if frame.setup_complete.is_some() {
        debug!("setup complete");
    }
    if let Some(content) = frame.server_content {
        if content.interrupted == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data
                    && inline.mime_type.starts_with("audio/")
                {
                    match codec::decode_frame(&inline.data) {
                        Ok(bytes) => events.push(ServerEvent::Audio(bytes)),
                        Err(e) => warn!("dropping malformed audio fragment: {e}"),
                    }
                }
            }
        }
        if let Some(transcription) = content.output_transcription
            && !transcription.text.is_empty()
        {
            events.push(ServerEvent::TranscriptDelta(transcription.text));
        }
        if content.turn_complete == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
    }
    Ok(events)
}
