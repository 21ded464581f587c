use async_trait::async_trait;
use ingestion_core::{Credential, CredentialProvider, ConnectorResult};

/// Wraps a pre-issued credential that never needs refreshing: static bearer,
/// API key, basic auth, or custom-header (§4.1). `acquire` always returns the
/// same value; `invalidate` is a no-op since there is nothing to re-fetch.
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(&self, _instance_id: &str) -> ConnectorResult<Credential> {
        Ok(self.credential.clone())
    }

    async fn invalidate(&self, _instance_id: &str) {}
}
