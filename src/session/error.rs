use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session id must not be empty")]
    Initialization,

    #[error("session is not ready (state: {0})")]
    NotReady(&'static str),

    #[error("snapshot belongs to session `{found}`, expected `{expected}`")]
    Mismatch { expected: String, found: String },

    #[error("stored record is inconsistent: {0}")]
    InvalidSnapshot(String),

    #[error("event `{0}` recorded before the session was initialized")]
    OutOfSequence(String),

    #[error("sync failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Transport-level failures, the ones a caller may retry by saving again.
    pub fn is_persistence(&self) -> bool {
        matches!(self, SessionError::Persistence(_) | SessionError::Http(_))
    }
}
