//! Document ingestion: summarize a PDF into a knowledge entry.
//!
//! Uploads the document inline to the generative REST API and stores the
//! returned summary. Ingestion happens outside any live session; the
//! summary only reaches the model as part of the next session's system
//! instruction.

use crate::config::IngestConfig;
use crate::credentials::ApiKey;
use crate::error::{AssistantError, Result};
use crate::knowledge::KnowledgeEntry;
use crate::session::protocol::{Content, InlineData, Part};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

/// Summarizes documents via the generative REST API.
pub struct DocumentIngestor {
    client: reqwest::Client,
    config: IngestConfig,
    key: ApiKey,
}

impl DocumentIngestor {
    /// Create an ingestor with the given configuration and key.
    #[must_use]
    pub fn new(config: IngestConfig, key: ApiKey) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            key,
        }
    }

    /// Read a PDF from disk and summarize it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and an ingest
    /// error on API failures.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<KnowledgeEntry> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest_bytes(&name, &bytes).await
    }

    /// Summarize raw PDF bytes under the given display name.
    ///
    /// # Errors
    ///
    /// Returns an ingest error if the API rejects the request or returns
    /// no usable summary.
    pub async fn ingest_bytes(&self, name: &str, bytes: &[u8]) -> Result<KnowledgeEntry> {
        info!("ingesting '{name}' ({} bytes)", bytes.len());

        let request = GenerateRequest {
            contents: vec![Content {
                role: None,
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "application/pdf".to_owned(),
                            data: STANDARD.encode(bytes),
                        }),
                    },
                    Part {
                        text: Some(self.config.summary_prompt.clone()),
                        inline_data: None,
                    },
                ],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| AssistantError::Ingest(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Ingest(format!(
                "API returned {status}: {body}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Ingest(format!("unreadable response: {e}")))?;

        let summary = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AssistantError::Ingest("response contained no summary".into()))?;

        info!("ingested '{name}': {} summary chars", summary.chars().count());

        Ok(KnowledgeEntry {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            content: summary,
            size: bytes.len() as u64,
        })
    }
}
