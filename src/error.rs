use thiserror::Error;

// Error reported by the generative service for one attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

// What `KeyPool::execute` can fail with
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no API keys configured")]
    NoCredentialsConfigured,

    #[error("no API keys available, all are cooling down")]
    AllCredentialsUnavailable,

    // Last upstream failure, surfaced unchanged
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
