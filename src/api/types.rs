//! Records exchanged with the REST endpoints.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// =============================================================================
// Auth API Types
// =============================================================================

/// Request body for account registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Account email.
    pub email: String,
    /// Plain-text password; sent once over the wire, never stored.
    pub password: String,
}

/// Bearer token returned by the login endpoint.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    /// The JWT.
    pub access_token: String,
    /// Usually `bearer`.
    pub token_type: String,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Account as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserRead {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_verified: bool,
}

// =============================================================================
// Threads & Assistants
// =============================================================================

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThreadRecord {
    /// Provider-issued thread id; the session's thread identifier.
    pub openai_thread_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// An assistant that can answer on a thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssistantRecord {
    /// Provider-issued assistant id; the session's assistant identifier.
    pub openai_assistant_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Error body of a failed request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    /// `detail` as display text: strings verbatim, structured details as JSON.
    pub(crate) fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(detail) => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Accepts RFC 3339 timestamps and offset-less ones (read as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
