//! Canonical data types for the connector runtime and ingestion gateway.
//!
//! This crate intentionally does **not** perform I/O: it describes the shapes that
//! flow between the Connector Runtime, Transport, Transformer, Checkpoint Store and
//! Upload Gateway Client, and nothing else.

pub mod checkpoint;
pub mod connector_def;
pub mod envelope;
pub mod job;
pub mod source;
pub mod sync;

pub use checkpoint::{Checkpoint, CheckpointWire, CheckpointWireError, CHECKPOINT_WIRE_VERSION};
pub use connector_def::{
    ConfigValidationError, ConnectorDefinition, ConnectorInstance, ConnectorInstanceState,
    Schedule, SyncStrategy,
};
pub use envelope::{
    Chunking, ContentType, Deduplication, EnvelopeContent, Permissions, Priority,
    ProcessingHints, Relationships, SchemaDescriptor, UploadEnvelope, Visibility,
};
pub use job::{BoundedErrorLog, ErrorKind, Job, JobErrorRecord, JobStats, JobStatus};
pub use source::{PaginationVariant, SourceEndpointDescriptor};
pub use sync::SyncParams;
