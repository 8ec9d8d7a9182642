use thiserror::Error;

/// Errors surfaced by the data layer.
///
/// Transport failures come from the remote store; data failures come from
/// encoding, decoding or the local store. Last-write-wins conflicts are
/// resolved silently and never show up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    // ===== Transport =====
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // ===== Data =====
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to encode {path}: {message}")]
    Encode { path: String, message: String },

    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Local store error: {0}")]
    Store(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Sync already in progress")]
    SyncInProgress,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl SyncError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => SyncError::Unauthorized,
            403 => SyncError::AccessDenied(truncated),
            404 => SyncError::NotFound(truncated),
            408 => SyncError::Timeout(truncated),
            500..=599 => SyncError::Server(truncated),
            _ => SyncError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn decode(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Decode {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn encode(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Encode {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// True for failures caused by connectivity rather than by the data itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::Cancelled
                | SyncError::Unauthorized
                | SyncError::AccessDenied(_)
                | SyncError::Server(_)
                | SyncError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::from_status(status, &err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}
