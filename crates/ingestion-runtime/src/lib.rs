//! Connector Runtime: pull-loop orchestration, the instance-level job lock,
//! and the cron/interval scheduler that drives it (§4.8, §4.9). Bootstrap wires
//! CLI/ENV/DB configuration and the shared storage handles the rest of the
//! workspace builds on.

pub mod bootstrap;
pub mod error;
pub mod runtime;
pub mod scheduler;

pub use bootstrap::{Bootstrap, CliArgs};
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{ConnectorRuntime, DEFAULT_SOURCE_CONCURRENCY};
pub use scheduler::{always_leader, LeaderLock, Scheduler};
