//! Error types shared across the workspace

use thiserror::Error;

/// A record that could not be decoded.
///
/// Callers on the replay and live-ingest paths log these and skip the record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,
}
