mod control_plane;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;

use ingestion_core::events::TerminalEventSink;
use ingestion_core::{ConnectorRegistry, Credential, CredentialScheme, EventHub};
use ingestion_impl::{HttpUploadGatewayClient, ReqwestTransport};
use ingestion_runtime::{always_leader, Bootstrap, ConnectorRuntime, Scheduler};
use ingestion_storage::JobHistoryStore;
use ingestion_transform::RecordTransformer;

use control_plane::{admin_router, AdminState, RegisteredCredentialProvider};

const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Bootstrap {
        config,
        db: _db,
        checkpoints,
        job_history,
    } = ingestion_runtime::bootstrap::bootstrap_from_env().await?;

    let events = EventHub::new(EVENT_BUFFER);
    events.add_sink(Arc::new(TerminalEventSink::new())).await;

    let transport = Arc::new(ReqwestTransport::new(config.proxy.as_deref()).context("build transport")?);
    let credentials = Arc::new(RegisteredCredentialProvider::new());
    // Uploads authenticate to the downstream Upload Gateway with the same admin
    // credential the control-plane itself is locked behind.
    let uploader: Arc<dyn ingestion_impl::UploadGatewayClient> = Arc::new(HttpUploadGatewayClient::new(
        format!("http://{}:{}", config.host, config.port),
        "ingestion-gateway",
        Credential {
            scheme: CredentialScheme::Bearer,
            value: config.admin_key_hash.clone(),
            expires_at: None,
            refresh_token: None,
            header_name: None,
        },
    ));
    let transformer = Arc::new(RecordTransformer);
    let job_history: Arc<dyn JobHistoryStore> = job_history;

    let runtime = Arc::new(
        ConnectorRuntime::new(
            transport,
            credentials.clone(),
            uploader,
            checkpoints,
            job_history.clone(),
            transformer,
            events,
        )
        .with_source_concurrency(config.default_source_concurrency),
    );

    let scheduler = Scheduler::new(runtime.clone(), always_leader());
    scheduler.start(std::time::Duration::from_secs(30));

    let state = Arc::new(AdminState {
        runtime,
        scheduler,
        credentials,
        job_history,
        definitions: RwLock::new(ConnectorRegistry::new()),
        instances: RwLock::new(HashMap::new()),
        admin_key_hash: config.admin_key_hash.clone(),
    });

    let app = admin_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "starting ingestion gateway");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await.context("serve")?;

    Ok(())
}
