use async_trait::async_trait;
use ingestion_core::{Credential, ConnectorError, ConnectorResult};
use ingestion_protocol::{Deduplication, UploadEnvelope};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Payloads above this size (§4.7) are rejected before leaving the process.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 50 * 1024 * 1024;

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Indexed,
    Processing,
    Queued,
}

impl UploadStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "processing" => UploadStatus::Processing,
            "queued" => UploadStatus::Queued,
            _ => UploadStatus::Indexed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadAck {
    pub document_id: String,
    pub status: UploadStatus,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub index: usize,
    pub result: Result<UploadAck, ConnectorError>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub items: Vec<BatchItemResult>,
}

impl BatchResult {
    pub fn successes(&self) -> impl Iterator<Item = &BatchItemResult> {
        self.items.iter().filter(|item| item.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchItemResult> {
        self.items.iter().filter(|item| item.result.is_err())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    pub transactional: bool,
}

#[derive(Debug, Deserialize)]
struct UploadErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    success: bool,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    error: Option<UploadErrorBody>,
    #[serde(default)]
    retryable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchResponse {
    #[serde(default)]
    documents: Vec<RawResponse>,
}

#[derive(Serialize)]
struct BatchRequestBody<'a> {
    documents: &'a [UploadEnvelope],
    transactional: bool,
}

#[async_trait]
pub trait UploadGatewayClient: Send + Sync {
    async fn upload(&self, envelope: &UploadEnvelope, opts: UploadOptions) -> ConnectorResult<UploadAck>;

    async fn upload_batch(
        &self,
        envelopes: &[UploadEnvelope],
        opts: UploadOptions,
    ) -> ConnectorResult<BatchResult>;

    async fn poll_status(&self, document_id: &str) -> ConnectorResult<UploadAck>;
}

/// `reqwest`-backed Upload Gateway client (§4.7, §6.1). Request discipline (idempotency
/// key derivation, size-limit rejection, dedup header selection) happens entirely
/// client-side before the request ever leaves the process.
pub struct HttpUploadGatewayClient {
    base_url: String,
    connector_id: String,
    credential: Credential,
    http: reqwest::Client,
    max_payload_bytes: u64,
}

impl HttpUploadGatewayClient {
    pub fn new(base_url: impl Into<String>, connector_id: impl Into<String>, credential: Credential) -> Self {
        Self {
            base_url: base_url.into(),
            connector_id: connector_id.into(),
            credential,
            http: reqwest::Client::new(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload_bytes(mut self, max_bytes: u64) -> Self {
        self.max_payload_bytes = max_bytes;
        self
    }

    fn content_fingerprint(envelope: &UploadEnvelope) -> String {
        let mut hasher = Sha256::new();
        match &envelope.content {
            ingestion_protocol::EnvelopeContent::InlineBytes { bytes } => hasher.update(bytes.as_ref()),
            ingestion_protocol::EnvelopeContent::Base64String { data } => hasher.update(data.as_bytes()),
            ingestion_protocol::EnvelopeContent::RemoteUrl { url } => hasher.update(url.as_bytes()),
        }
        to_hex(&hasher.finalize())
    }

    /// `hash(connectorId || external_id || content_fingerprint)` (§4.7). Stable within
    /// the 24h idempotency window as long as external_id and content are unchanged.
    fn idempotency_key(&self, envelope: &UploadEnvelope) -> String {
        let external_id = envelope.external_id().unwrap_or("");
        let fingerprint = Self::content_fingerprint(envelope);
        let mut hasher = Sha256::new();
        hasher.update(self.connector_id.as_bytes());
        hasher.update(b"|");
        hasher.update(external_id.as_bytes());
        hasher.update(b"|");
        hasher.update(fingerprint.as_bytes());
        to_hex(&hasher.finalize())
    }

    /// Request-level idempotency key for a whole batch call: the per-envelope keys,
    /// hashed together in order, so resubmitting the identical page is idempotent
    /// even though the gateway sees one request instead of N.
    fn batch_idempotency_key(&self, envelopes: &[UploadEnvelope]) -> String {
        let mut hasher = Sha256::new();
        for envelope in envelopes {
            hasher.update(self.idempotency_key(envelope).as_bytes());
            hasher.update(b"|");
        }
        to_hex(&hasher.finalize())
    }

    fn dedup_header(envelope: &UploadEnvelope) -> Option<(&'static str, String)> {
        match envelope.processing_hints.deduplication {
            Some(Deduplication::Exact) => Some(("X-Dedup-Hash", Self::content_fingerprint(envelope))),
            Some(Deduplication::Fuzzy) => envelope
                .processing_hints
                .primary_key
                .clone()
                .map(|key| ("X-Dedup-Key", key)),
            Some(Deduplication::None) | None => None,
        }
    }

    fn check_size(&self, body: &[u8]) -> ConnectorResult<()> {
        if body.len() as u64 > self.max_payload_bytes {
            return Err(ConnectorError::Validation(format!(
                "payload of {} bytes exceeds the {}-byte limit",
                body.len(),
                self.max_payload_bytes
            )));
        }
        Ok(())
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.credential.value)
    }

    async fn send_one(&self, envelope: &UploadEnvelope, idempotency_key: &str) -> ConnectorResult<UploadAck> {
        let body = serde_json::to_vec(envelope).map_err(|err| ConnectorError::Validation(err.to_string()))?;
        self.check_size(&body)?;

        let mut request = self
            .http
            .post(format!("{}/api/v1/upload", self.base_url))
            .header("Authorization", self.auth_header_value())
            .header("Idempotency-Key", idempotency_key)
            .header("Content-Type", "application/json");

        if let Some((name, value)) = Self::dedup_header(envelope) {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|err| if err.is_timeout() {
                ConnectorError::Timeout(err.to_string())
            } else {
                ConnectorError::Network(err.to_string())
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ConnectorError::Network(err.to_string()))?;
        parse_upload_response(status, &text)
    }

    /// Single request against `/api/v1/upload/batch` (§6.1): `{documents, transactional}`
    /// in, one `UploadAck`/error per document out, in order. `transactional=true` asks
    /// the gateway to roll the whole batch back atomically on any per-document failure
    /// rather than materializing a partial set (seed scenario 4).
    async fn send_batch(&self, envelopes: &[UploadEnvelope], opts: UploadOptions) -> ConnectorResult<BatchResult> {
        if envelopes.is_empty() {
            return Ok(BatchResult::default());
        }

        let body = serde_json::to_vec(&BatchRequestBody {
            documents: envelopes,
            transactional: opts.transactional,
        })
        .map_err(|err| ConnectorError::Validation(err.to_string()))?;
        self.check_size(&body)?;

        let batch_key = self.batch_idempotency_key(envelopes);

        let response = self
            .http
            .post(format!("{}/api/v1/upload/batch", self.base_url))
            .header("Authorization", self.auth_header_value())
            .header("Idempotency-Key", batch_key)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| if err.is_timeout() {
                ConnectorError::Timeout(err.to_string())
            } else {
                ConnectorError::Network(err.to_string())
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ConnectorError::Network(err.to_string()))?;
        parse_batch_response(status, &text, envelopes.len())
    }
}

#[async_trait]
impl UploadGatewayClient for HttpUploadGatewayClient {
    async fn upload(&self, envelope: &UploadEnvelope, _opts: UploadOptions) -> ConnectorResult<UploadAck> {
        let key = self.idempotency_key(envelope);
        self.send_one(envelope, &key).await
    }

    async fn upload_batch(
        &self,
        envelopes: &[UploadEnvelope],
        opts: UploadOptions,
    ) -> ConnectorResult<BatchResult> {
        self.send_batch(envelopes, opts).await
    }

    async fn poll_status(&self, document_id: &str) -> ConnectorResult<UploadAck> {
        let response = self
            .http
            .get(format!("{}/api/v1/upload/{}", self.base_url, document_id))
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|err| if err.is_timeout() {
                ConnectorError::Timeout(err.to_string())
            } else {
                ConnectorError::Network(err.to_string())
            })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ConnectorError::Network(err.to_string()))?;
        parse_upload_response(status, &text)
    }
}

/// Promotes `retryable=false` responses to a non-retryable `Validation` error and
/// `retryable=true` to a retryable `Server` error, per §4.7.
fn parse_upload_response(status: u16, body: &str) -> ConnectorResult<UploadAck> {
    let parsed: RawResponse = serde_json::from_str(body)
        .map_err(|err| ConnectorError::Server { status, message: format!("malformed upload response: {err}") })?;
    ack_from_raw(status, parsed)
}

/// Parses a `/api/v1/upload/batch` response body into one `BatchItemResult` per
/// submitted document, in order. `expected_count` guards against a gateway that
/// silently drops or duplicates documents in its response.
fn parse_batch_response(status: u16, body: &str, expected_count: usize) -> ConnectorResult<BatchResult> {
    let parsed: RawBatchResponse = serde_json::from_str(body)
        .map_err(|err| ConnectorError::Server { status, message: format!("malformed batch upload response: {err}") })?;

    if parsed.documents.len() != expected_count {
        return Err(ConnectorError::Server {
            status,
            message: format!(
                "batch response has {} documents for {expected_count} submitted",
                parsed.documents.len(),
            ),
        });
    }

    let items = parsed
        .documents
        .into_iter()
        .enumerate()
        .map(|(index, raw)| BatchItemResult { index, result: ack_from_raw(status, raw) })
        .collect();
    Ok(BatchResult { items })
}

fn ack_from_raw(status: u16, parsed: RawResponse) -> ConnectorResult<UploadAck> {
    if parsed.success {
        let document_id = parsed
            .document_id
            .ok_or_else(|| ConnectorError::Server { status, message: "success response missing documentId".into() })?;
        let upload_status = parsed.status.as_deref().map(UploadStatus::parse).unwrap_or(UploadStatus::Indexed);
        return Ok(UploadAck {
            document_id,
            status: upload_status,
            job_id: parsed.job_id,
        });
    }

    let error = parsed
        .error
        .unwrap_or(UploadErrorBody { code: "UNKNOWN".into(), message: "unknown upload failure".into() });
    let message = format!("{}: {}", error.code, error.message);
    if parsed.retryable {
        Err(ConnectorError::Server { status, message })
    } else {
        Err(ConnectorError::Validation(message))
    }
}
