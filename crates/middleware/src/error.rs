use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("timeout")]
    Timeout,
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl TransportError {
    /// Whether retrying the same operation may succeed.
    ///
    /// A lost broker connection or a rejected message will not heal by
    /// retrying a single publish; timeouts and publish failures might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::PublishFailed(_) | TransportError::Timeout)
    }
}
