//! Voice assistant grounded in a PDF knowledge base.
//!
//! Real-time duplex speech conversation with a generative model:
//! microphone audio streams up as PCM16 frames, synthesized speech
//! streams back and is scheduled gaplessly on the output device, and
//! every session is grounded in summaries of previously ingested
//! documents. Barge-in interrupts playback immediately.
//!
//! The main pieces:
//! - [`session::SessionManager`] owns the session lifecycle
//! - [`audio`] handles capture, playback scheduling, and the PCM16 codec
//! - [`ingest::DocumentIngestor`] turns PDFs into knowledge entries
//! - [`knowledge::KnowledgeStore`] holds the in-memory knowledge base

pub mod audio;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ingest;
pub mod knowledge;
pub mod session;

pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use ingest::DocumentIngestor;
pub use knowledge::{KnowledgeEntry, KnowledgeStore};
pub use session::{SessionManager, SessionStatus, UiEvent};
