mod pool;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool, Refresher};
pub use state::{CredentialId, CredentialState, UnavailableReason};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::errors::ConnectorResult;

/// Auth mechanism a materialized `Credential` attaches to a request (§4.1). OAuth2
/// (authorization-code-with-refresh, client-credentials) is an *acquisition*
/// mechanism, not a wire scheme — it still produces a `Bearer` credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialScheme {
    Bearer,
    Basic,
    ApiKey,
    CustomHeader,
}

/// A credential lease as observed by a consumer: read-only, owned by whichever
/// `CredentialProvider` issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub scheme: CredentialScheme,
    pub value: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Header name to carry `value` under when `scheme` is `CustomHeader`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

impl Credential {
    /// A credential with `expires_at` in the past (or inside the 60s safety
    /// window) must not be used — callers should await a refresh instead (§4.1).
    pub fn needs_refresh(&self, safety_window: time::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => OffsetDateTime::now_utc() >= expires_at - safety_window,
            None => false,
        }
    }
}

/// `acquire`/`invalidate` contract every credential-backed connector goes through.
/// Implementations own the refresh policy (OAuth2 authorization-code, client
/// credentials, or a no-op for static bearer/API key/basic/custom-header).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self, instance_id: &str) -> ConnectorResult<Credential>;
    async fn invalidate(&self, instance_id: &str);
}
