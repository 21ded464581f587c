use async_trait::async_trait;
use ingestion_core::{Credential, CredentialScheme, ConnectorError, ConnectorResult, Refresher};
use serde::Deserialize;
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn token_response_to_credential(resp: TokenResponse, fallback_refresh_token: Option<String>) -> Credential {
    let expires_at = resp
        .expires_in
        .map(|secs| OffsetDateTime::now_utc() + time::Duration::seconds(secs));
    Credential {
        scheme: CredentialScheme::Bearer,
        value: resp.access_token,
        expires_at,
        refresh_token: resp.refresh_token.or(fallback_refresh_token),
        header_name: None,
    }
}

/// Classifies a non-2xx token-endpoint response per §4.1: non-retryable if the
/// refresh/grant itself was rejected, retryable if the endpoint returned 5xx.
fn classify_token_endpoint_failure(status: u16, body: &str) -> ConnectorError {
    if (500..600).contains(&status) {
        ConnectorError::Server {
            status,
            message: body.to_string(),
        }
    } else {
        ConnectorError::Auth(format!("token endpoint rejected request ({status}): {body}"))
    }
}

async fn post_form(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> ConnectorResult<TokenResponse> {
    let response = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|err| {
            if err.is_timeout() {
                ConnectorError::Timeout(err.to_string())
            } else {
                ConnectorError::Network(err.to_string())
            }
        })?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|err| ConnectorError::Network(err.to_string()))?;

    if !(200..300).contains(&status) {
        return Err(classify_token_endpoint_failure(status, &body));
    }

    serde_json::from_str(&body).map_err(|err| ConnectorError::Server {
        status,
        message: format!("malformed token response: {err}"),
    })
}

/// OAuth2 authorization-code-with-refresh-token grant (§4.1). `acquire`'s first
/// call must be seeded with a `Credential` carrying the initial `refresh_token`
/// via `CredentialPool`'s lease map, or this refresher has nothing to exchange.
pub struct AuthorizationCodeRefresher {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    http: reqwest::Client,
}

impl AuthorizationCodeRefresher {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Refresher for AuthorizationCodeRefresher {
    async fn refresh(
        &self,
        _instance_id: &str,
        current: Option<&Credential>,
    ) -> ConnectorResult<Credential> {
        let refresh_token = current
            .and_then(|c| c.refresh_token.clone())
            .ok_or_else(|| ConnectorError::Auth("no refresh token on file for this instance".into()))?;

        let resp = post_form(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ],
        )
        .await?;

        Ok(token_response_to_credential(resp, Some(refresh_token)))
    }
}

/// OAuth2 client-credentials grant (§4.1): no refresh token, every refresh is a
/// fresh client-credentials exchange.
pub struct ClientCredentialsRefresher {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    http: reqwest::Client,
}

impl ClientCredentialsRefresher {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Refresher for ClientCredentialsRefresher {
    async fn refresh(
        &self,
        _instance_id: &str,
        _current: Option<&Credential>,
    ) -> ConnectorResult<Credential> {
        let resp = post_form(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ],
        )
        .await?;

        Ok(token_response_to_credential(resp, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_5xx_as_retryable_server_error() {
        let err = classify_token_endpoint_failure(503, "down");
        assert!(matches!(err, ConnectorError::Server { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn classifies_400_as_non_retryable_auth_error() {
        let err = classify_token_endpoint_failure(400, "invalid_grant");
        assert!(matches!(err, ConnectorError::Auth(_)));
        assert!(!err.is_retryable());
    }
}
