//! Core abstractions shared by every connector implementation: credentials,
//! rate limiting, retries, transport, the error taxonomy, structured events and
//! the connector registry.
//!
//! This crate intentionally does **not** depend on a concrete HTTP client —
//! `ingestion-impl` provides the `reqwest`-backed `Transport`.

pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod transport;

pub use credential::{
    AcquireError, Credential, CredentialId, CredentialPool, CredentialProvider, CredentialScheme,
    CredentialState, Refresher, UnavailableReason,
};
pub use errors::{ConnectorError, ConnectorResult};
pub use events::{Event, EventHub, EventSink, TerminalEventSink};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use rate_limit::RateLimiter;
pub use registry::ConnectorRegistry;
pub use retry::{Jitter, RetryPolicy, Retrier};
pub use transport::{Batch, HttpMethod, PageCursor, Transport, TransportRequest, TransportResponse};
