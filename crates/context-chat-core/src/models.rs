//! Core data models shared by the server pipeline and the client controller.
//!
//! A session's history is a flat, ordered list of [`Turn`]s. On disk (or in
//! Redis) it is wrapped in a versioned [`SessionRecord`] envelope so the
//! format can grow without corrupting sessions written by older builds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current [`SessionRecord`] schema version.
pub const RECORD_VERSION: u32 = 1;

/// Who authored a persisted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message within a session's history. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A context fragment returned by the retriever, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub content: String,
}

/// Text extracted from the first candidate of a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: String,
}

/// Versioned persisted form of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

/// Accepts both the envelope and the bare array older deployments wrote.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredHistory {
    Record(SessionRecord),
    Legacy(Vec<Turn>),
}

impl SessionRecord {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            version: RECORD_VERSION,
            updated_at: Utc::now(),
            turns,
        }
    }

    /// Serialize the record to its JSON wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a stored value.
    ///
    /// A bare `[{role, text}, ...]` array is upgraded to a version-1 record
    /// stamped with the current time. A record with a version this build
    /// does not know is rejected rather than partially read.
    pub fn decode(raw: &str) -> Result<Self, RecordError> {
        let stored: StoredHistory = serde_json::from_str(raw)?;
        match stored {
            StoredHistory::Record(record) if record.version == RECORD_VERSION => Ok(record),
            StoredHistory::Record(record) => Err(RecordError::UnsupportedVersion(record.version)),
            StoredHistory::Legacy(turns) => Ok(Self::new(turns)),
        }
    }
}

/// Failure to decode a persisted [`SessionRecord`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed session record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported session record version {0} (expected {RECORD_VERSION})")]
    UnsupportedVersion(u32),
}
