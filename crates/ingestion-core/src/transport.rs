use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::errors::ConnectorResult;
use crate::headers::Headers;
use crate::{Credential, ConnectorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One page of raw records plus an opaque cursor for the next page, or `None`
/// when the source is exhausted (§4.2: pagination is a lazy, finite,
/// non-restartable sequence).
pub struct Batch {
    pub records: Vec<JsonValue>,
    pub next_cursor: Option<String>,
}

/// A single walk over a source's pages. Dropping it and calling
/// `Transport::paginate` again reissues the first page — there is no resume.
#[async_trait]
pub trait PageCursor: Send {
    async fn next_batch(&mut self) -> ConnectorResult<Option<Batch>>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        req: TransportRequest,
        credential: &Credential,
    ) -> ConnectorResult<TransportResponse>;

    async fn paginate(
        &self,
        descriptor: &ingestion_protocol::SourceEndpointDescriptor,
        credential: Credential,
        params: ingestion_protocol::SyncParams,
    ) -> ConnectorResult<Box<dyn PageCursor>>;
}

/// Maps an HTTP status + headers to the closed error taxonomy Transport emits
/// (§4.2). Shared by every concrete `Transport` implementation.
pub fn classify_http_status(status: u16, headers: &Headers, body_excerpt: &str) -> Option<ConnectorError> {
    if (200..300).contains(&status) {
        return None;
    }
    Some(match status {
        400 => ConnectorError::Validation(body_excerpt.to_string()),
        401 | 403 => ConnectorError::Auth(body_excerpt.to_string()),
        429 => ConnectorError::RateLimit {
            retry_after_secs: parse_retry_after(headers),
        },
        500..=599 => ConnectorError::Server {
            status,
            message: body_excerpt.to_string(),
        },
        _ => ConnectorError::Server {
            status,
            message: body_excerpt.to_string(),
        },
    })
}

fn parse_retry_after(headers: &Headers) -> Option<u64> {
    let value = crate::headers::header_get(headers, "retry-after")?;
    value.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_429_with_retry_after() {
        let headers = vec![("Retry-After".to_string(), "7".to_string())];
        let err = classify_http_status(429, &headers, "").unwrap();
        assert!(matches!(
            err,
            ConnectorError::RateLimit {
                retry_after_secs: Some(7)
            }
        ));
    }

    #[test]
    fn success_status_classifies_to_none() {
        assert!(classify_http_status(204, &[], "").is_none());
    }

    #[test]
    fn server_error_is_retryable() {
        let err = classify_http_status(503, &[], "down").unwrap();
        assert!(err.is_retryable());
    }
}
