//! The closed error taxonomy every connector operation reports through (§4.4).

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimit { retry_after_secs: Option<u64> },
    #[error("upstream server error (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("connector instance is already running a job")]
    AlreadyRunning,
}

impl ConnectorError {
    /// Whether a retrier should attempt this operation again. `AlreadyRunning` and
    /// `Validation`/`Auth` are never retryable — they need operator intervention or
    /// the caller to stop trying the same connector instance concurrently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::RateLimit { .. }
                | ConnectorError::Server { .. }
                | ConnectorError::Network(_)
                | ConnectorError::Timeout(_)
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ConnectorError::RateLimit { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<&ConnectorError> for ingestion_protocol::ErrorKind {
    fn from(err: &ConnectorError) -> Self {
        match err {
            ConnectorError::Validation(_) => ingestion_protocol::ErrorKind::Validation,
            ConnectorError::Auth(_) => ingestion_protocol::ErrorKind::Auth,
            ConnectorError::RateLimit { .. } => ingestion_protocol::ErrorKind::RateLimit,
            ConnectorError::Server { .. } => ingestion_protocol::ErrorKind::Server,
            ConnectorError::Network(_) => ingestion_protocol::ErrorKind::Network,
            ConnectorError::Timeout(_) => ingestion_protocol::ErrorKind::Timeout,
            ConnectorError::AlreadyRunning => ingestion_protocol::ErrorKind::AlreadyRunning,
        }
    }
}
