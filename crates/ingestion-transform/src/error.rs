#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The record had no value at the declared (or heuristically guessed) primary
    /// key path. Per §4.8, the runtime routes this record to the job's error bucket
    /// rather than failing the whole pull.
    #[error("record is missing its primary key field")]
    MissingPrimaryKey,

    #[error("timestamp field did not parse as RFC 3339: {0}")]
    InvalidTimestamp(String),

    #[error("record did not serialize to JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}
