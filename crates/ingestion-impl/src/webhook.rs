use hmac::{Hmac, Mac};
use ingestion_core::{ConnectorError, ConnectorResult};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance window recipients use when verifying `X-Signature` (§4.10, §6.2).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

/// Computes `HMAC-SHA256(secret, "<unix_ts>.<raw_body>")` and renders it as the
/// `t=<unix>,v1=<hex>` signature header value (§4.10).
pub fn sign(secret: &[u8], unix_ts: i64, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(unix_ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    format!("t={unix_ts},v1={}", to_hex(&mac.finalize().into_bytes()))
}

/// Verifies a received `X-Signature` header in constant time and rejects stale
/// signatures outside `tolerance_secs` of `now`.
pub fn verify(secret: &[u8], header_value: &str, raw_body: &[u8], now_unix: i64, tolerance_secs: i64) -> bool {
    let Some((ts_part, sig_part)) = header_value.split_once(',') else {
        return false;
    };
    let Some(ts_str) = ts_part.strip_prefix("t=") else {
        return false;
    };
    let Some(expected_hex) = sig_part.strip_prefix("v1=") else {
        return false;
    };
    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };
    if (now_unix - ts).abs() > tolerance_secs {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(ts_str.as_bytes());
    mac.update(b".");
    mac.update(raw_body);

    let Ok(expected_bytes) = decode_hex(expected_hex) else {
        return false;
    };
    mac.verify_slice(&expected_bytes).is_ok()
}

fn decode_hex(value: &str) -> Result<Vec<u8>, ()> {
    if value.len() % 2 != 0 {
        return Err(());
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    slug: &'a str,
    input: &'a JsonValue,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TriggerAck {
    pub run_id: Option<String>,
}

/// Dispatches signed webhook invocations (§4.10). Signing and idempotency-key
/// forwarding are the client's responsibility; retry classification reuses
/// `ConnectorError`/`Retrier` the same way the Upload Gateway client does.
pub struct WebhookDispatcher {
    endpoint: String,
    secret: Vec<u8>,
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(endpoint: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            endpoint: endpoint.into(),
            secret: secret.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn trigger(
        &self,
        slug: &str,
        input: &JsonValue,
        opts: TriggerOptions,
    ) -> ConnectorResult<TriggerAck> {
        let body = WebhookBody { slug, input };
        let raw_body = serde_json::to_vec(&body).map_err(|err| ConnectorError::Validation(err.to_string()))?;
        let now = unix_now();
        let signature = sign(&self.secret, now, &raw_body);

        let mut request = self
            .http
            .post(format!("{}/{}", self.endpoint.trim_end_matches('/'), slug))
            .header("X-Signature", signature)
            .header("Content-Type", "application/json");
        if let Some(key) = &opts.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .body(raw_body)
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

        if let Some(err) = ingestion_core::transport::classify_http_status(status, &Vec::new(), &text) {
            return Err(err);
        }

        let parsed: JsonValue = serde_json::from_str(&text).unwrap_or(JsonValue::Null);
        let run_id = parsed.get("runId").and_then(JsonValue::as_str).map(str::to_string);
        Ok(TriggerAck { run_id })
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let secret = b"shared-secret";
        let body = br#"{"slug":"s","input":{}}"#;
        let now = 1_700_000_000;
        let header = sign(secret, now, body);
        assert!(verify(secret, &header, body, now, DEFAULT_TOLERANCE_SECS));
    }

    #[test]
    fn verify_rejects_stale_timestamp_outside_tolerance() {
        let secret = b"shared-secret";
        let body = b"payload";
        let header = sign(secret, 1_700_000_000, body);
        assert!(!verify(secret, &header, body, 1_700_000_000 + 301, DEFAULT_TOLERANCE_SECS));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = b"shared-secret";
        let header = sign(secret, 1_700_000_000, b"original");
        assert!(!verify(secret, &header, b"tampered", 1_700_000_000, DEFAULT_TOLERANCE_SECS));
    }

    #[test]
    fn verify_rejects_malformed_header() {
        assert!(!verify(b"secret", "garbage", b"body", 0, DEFAULT_TOLERANCE_SECS));
    }
}
