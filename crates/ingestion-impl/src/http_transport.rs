use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use ingestion_core::{
    Batch, Credential, CredentialScheme, ConnectorError, ConnectorResult, Headers, HttpMethod,
    PageCursor, Transport, TransportRequest, TransportResponse,
};
use ingestion_protocol::{PaginationVariant, SourceEndpointDescriptor, SyncParams};
use serde_json::Value as JsonValue;

static CLIENT_CACHE: OnceLock<Mutex<HashMap<Option<String>, reqwest::Client>>> = OnceLock::new();

fn client_for_proxy(proxy: Option<&str>) -> ConnectorResult<reqwest::Client> {
    let key = proxy.map(str::to_string).filter(|p| !p.trim().is_empty());
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| ConnectorError::Network("http client cache lock poisoned".into()))?;

    if let Some(client) = guard.get(&key) {
        return Ok(client.clone());
    }

    let mut builder = reqwest::Client::builder();
    if let Some(proxy_url) = &key {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ConnectorError::Validation(format!("invalid proxy url: {err}")))?;
        builder = builder.proxy(proxy);
    }
    let client = builder
        .build()
        .map_err(|err| ConnectorError::Network(err.to_string()))?;
    guard.insert(key, client.clone());
    Ok(client)
}

/// `reqwest`-backed `Transport`. Substitutes for a TLS-fingerprinting client —
/// nothing here needs to impersonate a browser, so a plain rustls client suffices.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(proxy: Option<&str>) -> ConnectorResult<Self> {
        Ok(Self {
            client: client_for_proxy(proxy)?,
        })
    }

    fn attach_credential(mut headers: Headers, credential: &Credential) -> Headers {
        match credential.scheme {
            CredentialScheme::Bearer => {
                ingestion_core::header_set(&mut headers, "Authorization", format!("Bearer {}", credential.value));
            }
            CredentialScheme::ApiKey => {
                ingestion_core::header_set(&mut headers, "X-Api-Key", credential.value.clone());
            }
            CredentialScheme::CustomHeader => {
                let name = credential
                    .header_name
                    .as_deref()
                    .unwrap_or("X-Custom-Auth");
                ingestion_core::header_set(&mut headers, name, credential.value.clone());
            }
            CredentialScheme::Basic => {
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    credential.value.as_bytes(),
                );
                ingestion_core::header_set(&mut headers, "Authorization", format!("Basic {encoded}"));
            }
        }
        headers
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        req: TransportRequest,
        credential: &Credential,
    ) -> ConnectorResult<TransportResponse> {
        let headers = Self::attach_credential(req.headers, credential);

        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &req.url).timeout(req.timeout);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        tracing::debug!(url = %req.url, method = req.method.as_str(), "dispatching transport request");

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let response_headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;

        let excerpt = String::from_utf8_lossy(&body[..body.len().min(512)]).to_string();
        if let Some(err) = ingestion_core::transport::classify_http_status(status, &response_headers, &excerpt) {
            return Err(err);
        }

        Ok(TransportResponse {
            status,
            headers: response_headers,
            body,
        })
    }

    async fn paginate(
        &self,
        descriptor: &SourceEndpointDescriptor,
        credential: Credential,
        params: SyncParams,
    ) -> ConnectorResult<Box<dyn PageCursor>> {
        Ok(Box::new(RestPageCursor {
            transport: ReqwestTransport::new(None)?,
            descriptor: descriptor.clone(),
            credential,
            params,
            state: CursorState::NotStarted,
        }))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Timeout(err.to_string())
    } else {
        ConnectorError::Network(err.to_string())
    }
}

enum CursorState {
    NotStarted,
    OffsetLimit { offset: u32 },
    Cursor { next: Option<String> },
    LinkHeader { next_url: Option<String> },
    Exhausted,
}

struct RestPageCursor {
    transport: ReqwestTransport,
    descriptor: SourceEndpointDescriptor,
    credential: Credential,
    params: SyncParams,
    state: CursorState,
}

impl RestPageCursor {
    fn page_url(&self, offset: Option<u32>, cursor: Option<&str>) -> String {
        let mut url = self.descriptor.url.clone();
        let mut query_parts = Vec::new();
        if let Some(since) = self.params.effective_since() {
            query_parts.push(format!(
                "since={}",
                since
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default()
            ));
        }
        match &self.descriptor.pagination {
            PaginationVariant::OffsetLimit { limit } => {
                query_parts.push(format!("offset={}", offset.unwrap_or(0)));
                query_parts.push(format!("limit={limit}"));
            }
            PaginationVariant::Cursor { cursor_param } => {
                if let Some(cursor) = cursor {
                    query_parts.push(format!("{cursor_param}={cursor}"));
                }
            }
            PaginationVariant::LinkHeader => {}
        }
        if !query_parts.is_empty() {
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push(separator);
            url.push_str(&query_parts.join("&"));
        }
        url
    }
}

#[async_trait]
impl PageCursor for RestPageCursor {
    async fn next_batch(&mut self) -> ConnectorResult<Option<Batch>> {
        let url = match &self.state {
            CursorState::Exhausted => return Ok(None),
            CursorState::NotStarted => self.page_url(Some(0), None),
            CursorState::OffsetLimit { offset } => self.page_url(Some(*offset), None),
            CursorState::Cursor { next } => match next {
                Some(cursor) => self.page_url(None, Some(cursor)),
                None => return Ok(None),
            },
            CursorState::LinkHeader { next_url } => match next_url {
                Some(url) => url.clone(),
                None => return Ok(None),
            },
        };

        let mut request = TransportRequest::get(url);
        request.timeout = Duration::from_secs(self.descriptor.request_timeout_secs);
        let response = self.transport.request(request, &self.credential).await?;
        let body: JsonValue = serde_json::from_slice(&response.body)
            .map_err(|err| ConnectorError::Server { status: response.status, message: err.to_string() })?;
        let records = extract_records(&body);
        let is_empty = records.is_empty();

        match &self.descriptor.pagination {
            PaginationVariant::OffsetLimit { limit } => {
                let offset = match &self.state {
                    CursorState::OffsetLimit { offset } => *offset,
                    _ => 0,
                };
                self.state = if is_empty || (records.len() as u32) < *limit {
                    CursorState::Exhausted
                } else {
                    CursorState::OffsetLimit {
                        offset: offset + *limit,
                    }
                };
            }
            PaginationVariant::Cursor { .. } => {
                let next_cursor = body
                    .get("nextCursor")
                    .or_else(|| body.get("next_cursor"))
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                self.state = match next_cursor {
                    Some(cursor) => CursorState::Cursor { next: Some(cursor) },
                    None => CursorState::Exhausted,
                };
            }
            PaginationVariant::LinkHeader => {
                let next_url = parse_link_header_next(&response.headers);
                self.state = match next_url {
                    Some(url) => CursorState::LinkHeader { next_url: Some(url) },
                    None => CursorState::Exhausted,
                };
            }
        }

        if is_empty {
            return Ok(None);
        }

        Ok(Some(Batch {
            records,
            next_cursor: None,
        }))
    }
}

fn extract_records(body: &JsonValue) -> Vec<JsonValue> {
    if let Some(array) = body.as_array() {
        return array.clone();
    }
    for key in ["data", "items", "records", "results"] {
        if let Some(array) = body.get(key).and_then(JsonValue::as_array) {
            return array.clone();
        }
    }
    Vec::new()
}

fn parse_link_header_next(headers: &Headers) -> Option<String> {
    let value = ingestion_core::header_get(headers, "link")?;
    for part in value.split(',') {
        let mut segments = part.split(';');
        let url_part = segments.next()?.trim();
        let is_next = segments.any(|seg| seg.trim() == "rel=\"next\"" || seg.trim() == "rel=next");
        if is_next && url_part.starts_with('<') && url_part.ends_with('>') {
            return Some(url_part[1..url_part.len() - 1].to_string());
        }
    }
    None
}
