//! API key resolution.
//!
//! Keys are looked up in order: explicit config value, `GEMINI_API_KEY`
//! environment variable, then the OS keychain. A missing key is a config
//! error; callers surface it as the ERROR session status rather than
//! panicking.

use crate::config::SessionConfig;
use crate::error::{AssistantError, Result};
use std::fmt;

/// Environment variable consulted for the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Keychain service/account under which the key may be stored.
const KEYCHAIN_SERVICE: &str = "wisevoice";
const KEYCHAIN_ACCOUNT: &str = "gemini-api-key";

/// A resolved API key with a redacting `Debug` impl.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap an already-resolved key value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plaintext key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_empty() {
            "ApiKey()"
        } else {
            "ApiKey([REDACTED])"
        })
    }
}

/// Resolve the API key for the live session and ingestion collaborator.
///
/// # Errors
///
/// Returns a config error when no source yields a non-empty key.
pub fn resolve_api_key(config: &SessionConfig) -> Result<ApiKey> {
    if let Some(key) = &config.api_key
        && !key.trim().is_empty()
    {
        return Ok(ApiKey(key.trim().to_owned()));
    }

    if let Ok(key) = std::env::var(API_KEY_ENV)
        && !key.trim().is_empty()
    {
        return Ok(ApiKey(key.trim().to_owned()));
    }

    if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
        && let Ok(key) = entry.get_password()
        && !key.trim().is_empty()
    {
        return Ok(ApiKey(key.trim().to_owned()));
    }

    Err(AssistantError::Config(format!(
        "no API key configured (set {API_KEY_ENV} or store one in the keychain)"
    )))
}
