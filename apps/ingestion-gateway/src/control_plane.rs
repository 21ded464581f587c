//! Small admin HTTP surface: register a connector instance, trigger an
//! on-demand pull, check job status, cancel a running job. Auth is an
//! `X-Admin-Key` header or an `Authorization: Bearer <key>` header, checked
//! against a hash.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use ingestion_core::credential::{Credential, CredentialProvider};
use ingestion_core::{ConnectorError, ConnectorRegistry, ConnectorResult};
use ingestion_protocol::{ConnectorDefinition, ConnectorInstance, Job, SyncParams};
use ingestion_runtime::{ConnectorRuntime, Scheduler};
use ingestion_storage::JobHistoryStore;

/// Maps a registered instance's `credential_ref` straight to a `Credential`
/// supplied at registration time. Same shape as `StaticCredentialProvider`
/// (`ingestion-impl::credential::static_provider`), generalized to hold one
/// credential per instance instead of one for the whole process.
#[derive(Default)]
pub struct RegisteredCredentialProvider {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl RegisteredCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, instance_id: String, credential: Credential) {
        self.credentials.write().await.insert(instance_id, credential);
    }
}

#[async_trait::async_trait]
impl CredentialProvider for RegisteredCredentialProvider {
    async fn acquire(&self, instance_id: &str) -> ConnectorResult<Credential> {
        self.credentials
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ConnectorError::Validation(format!("no credential registered for instance {instance_id}")))
    }

    async fn invalidate(&self, instance_id: &str) {
        self.credentials.write().await.remove(instance_id);
    }
}

pub struct AdminState {
    pub runtime: Arc<ConnectorRuntime>,
    pub scheduler: Arc<Scheduler>,
    pub credentials: Arc<RegisteredCredentialProvider>,
    pub job_history: Arc<dyn JobHistoryStore>,
    pub definitions: RwLock<ConnectorRegistry>,
    pub instances: RwLock<HashMap<String, Arc<ConnectorInstance>>>,
    pub admin_key_hash: String,
}

pub fn admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/definitions", post(register_definition))
        .route("/admin/instances", post(register_instance))
        .route("/admin/instances/{id}/run", post(run_now))
        .route("/admin/jobs/{id}", get(job_status))
        .route("/admin/jobs/{id}/cancel", post(cancel_job))
        .with_state(state)
}

fn hash_admin_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().fold(String::with_capacity(64), |mut acc, byte| {
        use std::fmt::Write;
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn is_admin(headers: &HeaderMap, admin_key_hash: &str) -> bool {
    if let Some(key) = header_value(headers, "x-admin-key") {
        if hash_admin_key(key) == admin_key_hash {
            return true;
        }
    }
    if let Some(auth) = header_value(headers, "authorization") {
        if let Some(rest) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            if hash_admin_key(rest.trim()) == admin_key_hash {
                return true;
            }
        }
    }
    false
}

fn require_admin(state: &AdminState, headers: &HeaderMap) -> Result<(), Response> {
    if is_admin(headers, &state.admin_key_hash) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "missing or invalid admin key").into_response())
    }
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct RegisterDefinitionResponse {
    pub name: String,
}

/// Registers a connector definition so later instance registrations can be
/// validated against its `config_schema` (§3, §9). Definitions are immutable
/// once registered — re-registering the same name is rejected.
async fn register_definition(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(definition): Json<ConnectorDefinition>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let name = definition.name.clone();
    match state.definitions.write().await.register(definition) {
        Ok(()) => (StatusCode::CREATED, Json(RegisterDefinitionResponse { name })).into_response(),
        Err(err) => (StatusCode::CONFLICT, err.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub struct RegisterInstanceRequest {
    pub instance: ConnectorInstance,
    pub credential: Credential,
}

#[derive(Serialize)]
pub struct RegisterInstanceResponse {
    pub id: String,
}

async fn register_instance(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterInstanceRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let definition = {
        let definitions = state.definitions.read().await;
        definitions.get(&request.instance.definition_name).cloned()
    };
    let Some(definition) = definition else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("unknown connector definition {}", request.instance.definition_name),
        )
            .into_response();
    };
    if let Err(err) = definition.validate_config(&request.instance.config) {
        return (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response();
    }

    let instance = Arc::new(request.instance);
    state.credentials.put(instance.id.clone(), request.credential).await;
    state.instances.write().await.insert(instance.id.clone(), instance.clone());

    (StatusCode::CREATED, Json(RegisterInstanceResponse { id: instance.id.clone() })).into_response()
}

#[derive(Serialize)]
pub struct RunNowResponse {
    pub job: Job,
}

async fn run_now(State(state): State<Arc<AdminState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let instance = {
        let instances = state.instances.read().await;
        instances.get(&id).cloned()
    };
    let Some(instance) = instance else {
        return (StatusCode::NOT_FOUND, format!("unknown connector instance {id}")).into_response();
    };

    let trace_id = ingestion_common::new_trace_id();
    match state.runtime.clone().pull(instance, SyncParams::first_run(trace_id)).await {
        Ok(job) => Json(RunNowResponse { job }).into_response(),
        Err(ConnectorError::AlreadyRunning) => {
            (StatusCode::CONFLICT, "a pull is already running for this instance").into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn job_status(State(state): State<Arc<AdminState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    match state.job_history.get(&id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("unknown job {id}")).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn cancel_job(State(state): State<Arc<AdminState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    if state.runtime.cancel(&id).await {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::NOT_FOUND, format!("no running job {id}")).into_response()
    }
}
