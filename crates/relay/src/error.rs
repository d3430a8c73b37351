use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream transport failed: {0}")]
    Transport(String),

    /// Error record sent by the downstream service itself.
    #[error("{0}")]
    Downstream(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
