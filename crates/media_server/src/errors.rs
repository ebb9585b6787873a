use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaServerError {
    #[error("Connectivity error: {0}")]
    Connectivity(#[from] reqwest::Error),
    #[error("Request timed out: {url}")]
    Timeout { url: String },
    #[error("Invalid response status: {status}")]
    InvalidResponseStatus { status: reqwest::StatusCode },
    #[error("Unauthorized: {status}")]
    Unauthorized { status: reqwest::StatusCode },
    #[error("Not found: {what}")]
    NotFound { what: String },
    #[error("Decode error: {err}")]
    Decode { err: String },
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },
    #[error("Notification stream error: {0}")]
    Notify(#[from] notify_stream::NotifyStreamError),
}

impl MediaServerError {
    pub fn decode(err: impl ToString) -> Self {
        MediaServerError::Decode {
            err: err.to_string(),
        }
    }

    /// 401/403, or a credential that can not even be put on the wire.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            MediaServerError::Unauthorized { .. } | MediaServerError::InvalidCredential
        )
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, MediaServerError::Decode { .. })
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MediaServerError::Connectivity(_)
                | MediaServerError::Timeout { .. }
                | MediaServerError::InvalidResponseStatus { .. }
        )
    }
}
