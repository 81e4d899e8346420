/// Errors from the recall subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    /// Non-zero code in the note-store response envelope.
    #[error("note store error {code}: {msg}")]
    Remote { code: i64, msg: String },

    /// Network or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response did not match any known shape.
    #[error("unexpected response shape: {0}")]
    Protocol(String),

    /// Local index failure.
    #[error("local index error: {0}")]
    Db(#[from] mnemo_db::DbError),

    /// Document id missing on the remote side.
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RecallResult<T> = Result<T, RecallError>;
