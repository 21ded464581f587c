use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeConfigError {
    #[error("missing required runtime config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged process configuration.
///
/// Merge order: CLI > ENV > last persisted DB row, then the merged value is
/// persisted back so the next boot starts from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash (not plaintext).
    pub admin_key_hash: String,
    /// Outbound proxy used for upstream connector egress, if any.
    pub proxy: Option<String>,
    /// Database DSN used for checkpoint/job storage.
    pub dsn: String,
    /// Whether to redact sensitive fields (credentials, raw bodies) in emitted events.
    pub event_redact_sensitive: bool,
    /// Default bounded-concurrency group size for a connector instance's sources.
    pub default_source_concurrency: u32,
}

/// Optional layer used while merging `RuntimeConfig` from CLI/ENV/DB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_key_hash: Option<String>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub default_source_concurrency: Option<u32>,
}

impl RuntimeConfigPatch {
    pub fn overlay(&mut self, other: RuntimeConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.admin_key_hash.is_some() {
            self.admin_key_hash = other.admin_key_hash;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.event_redact_sensitive.is_some() {
            self.event_redact_sensitive = other.event_redact_sensitive;
        }
        if other.default_source_concurrency.is_some() {
            self.default_source_concurrency = other.default_source_concurrency;
        }
    }

    pub fn into_config(self) -> Result<RuntimeConfig, RuntimeConfigError> {
        Ok(RuntimeConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            admin_key_hash: self
                .admin_key_hash
                .ok_or(RuntimeConfigError::MissingField("admin_key_hash"))?,
            proxy: self.proxy,
            dsn: self.dsn.ok_or(RuntimeConfigError::MissingField("dsn"))?,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            default_source_concurrency: self.default_source_concurrency.unwrap_or(4),
        })
    }
}

impl From<RuntimeConfig> for RuntimeConfigPatch {
    fn from(value: RuntimeConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_key_hash: Some(value.admin_key_hash),
            proxy: value.proxy,
            dsn: Some(value.dsn),
            event_redact_sensitive: Some(value.event_redact_sensitive),
            default_source_concurrency: Some(value.default_source_concurrency),
        }
    }
}

/// Stable identifier of a fetch endpoint or stream within a connector instance.
pub type SourceKey = String;

/// Opaque trace id threaded through transport, retry, and job events.
pub fn new_trace_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
