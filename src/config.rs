//! Configuration types for the voice assistant.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Live session settings.
    pub session: SessionConfig,
    /// Document ingestion settings.
    pub ingest: IngestConfig,
}

impl AssistantConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            AssistantError::Config(format!("invalid config {}: {e}", path.display()))
        })
    }
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Microphone sample rate in Hz (the rate sent to the model).
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz (the rate the model emits).
    pub output_sample_rate: u32,
    /// Samples per outbound frame at the input rate.
    pub frame_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_size: 4096,
            input_device: None,
            output_device: None,
        }
    }
}

/// Live session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model identifier for the duplex voice session.
    pub model: String,
    /// WebSocket endpoint of the live API.
    pub live_url: String,
    /// API key; resolved via env/keychain when empty.
    pub api_key: Option<String>,
    /// Maximum grounding-context length in characters (None = unlimited).
    pub max_context_chars: Option<usize>,
    /// Timeout in seconds for opening the connection.
    pub connect_timeout_secs: u64,
    /// Base instruction prepended to the document context.
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_owned(),
            live_url:
                "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
                    .to_owned(),
            api_key: None,
            max_context_chars: Some(10_000),
            connect_timeout_secs: 10,
            system_prompt: "You are a helpful assistant. Answer based on the provided knowledge base. Be brief."
                .to_owned(),
        }
    }
}

/// Document ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Model used to summarize uploaded documents.
    pub model: String,
    /// Base URL of the generative REST API.
    pub api_url: String,
    /// Prompt sent alongside each document.
    pub summary_prompt: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-flash-preview".to_owned(),
            api_url: "https://generativelanguage.googleapis.com".to_owned(),
            summary_prompt: "Summarize this PDF knowledge base in detail.".to_owned(),
        }
    }
}
