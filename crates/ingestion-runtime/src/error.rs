#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Connector(#[from] ingestion_core::ConnectorError),
    #[error(transparent)]
    Storage(#[from] ingestion_storage::StorageError),
    #[error("no job with id {0}")]
    UnknownJob(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
