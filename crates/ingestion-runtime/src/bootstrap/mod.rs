use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ingestion_common::{RuntimeConfig, RuntimeConfigPatch};
use ingestion_storage::{
    connect_shared, ensure_schema, RuntimeConfigStore, SeaOrmCheckpointStore, SeaOrmJobHistoryStore,
    SeaOrmRuntimeConfigStore,
};
use sea_orm::DatabaseConnection;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "ingestion-gateway",
    version,
    about = "Connector Runtime and Ingestion Gateway"
)]
pub struct CliArgs {
    /// Database DSN (required to bootstrap the rest of config).
    #[arg(long, env = "INGESTION_DSN")]
    pub dsn: Option<String>,

    /// Bind host for the control-plane API.
    #[arg(long, env = "INGESTION_HOST")]
    pub host: Option<String>,

    /// Bind port for the control-plane API.
    #[arg(long, env = "INGESTION_PORT")]
    pub port: Option<String>,

    /// Admin key (plaintext). Stored as a hash in the DB and in memory.
    #[arg(long, env = "INGESTION_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Optional outbound proxy for upstream connector requests.
    #[arg(long, env = "INGESTION_PROXY")]
    pub proxy: Option<String>,

    /// Redact sensitive headers/body fields in emitted events.
    #[arg(long, env = "INGESTION_EVENT_REDACT_SENSITIVE")]
    pub event_redact_sensitive: Option<String>,

    /// Default bounded-concurrency group size across a connector instance's sources.
    #[arg(long, env = "INGESTION_DEFAULT_SOURCE_CONCURRENCY")]
    pub default_source_concurrency: Option<String>,
}

/// Everything a binary needs to assemble a `ConnectorRuntime` and `Scheduler`.
/// Connector-specific collaborators (transport, credential providers, upload
/// client, transformer, connector registry) are left to the binary — bootstrap
/// only owns the config merge and the shared storage handles.
pub struct Bootstrap {
    pub config: RuntimeConfig,
    pub db: DatabaseConnection,
    pub checkpoints: Arc<SeaOrmCheckpointStore>,
    pub job_history: Arc<SeaOrmJobHistoryStore>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    let host = sanitize_optional_env_value(args.host.clone());
    let port = parse_u16_env_value(args.port.clone(), "INGESTION_PORT")?;
    let admin_key = sanitize_optional_env_value(args.admin_key.clone());
    let proxy = sanitize_optional_env_value(args.proxy.clone());
    let event_redact_sensitive = parse_bool_env_value(
        args.event_redact_sensitive.clone(),
        "INGESTION_EVENT_REDACT_SENSITIVE",
    )?;
    let default_source_concurrency = parse_u32_env_value(
        args.default_source_concurrency.clone(),
        "INGESTION_DEFAULT_SOURCE_CONCURRENCY",
    )?;

    ensure_sqlite_parent_dir(&dsn)?;

    let db = connect_shared(&dsn).await.context("connect storage")?;
    ensure_schema(&db).await.context("schema sync")?;

    let config_store = SeaOrmRuntimeConfigStore::new(db.clone());
    let persisted = config_store.load().await.context("load persisted runtime config")?;

    // clap already applies CLI > ENV precedence per field; overlay that onto
    // whatever was last persisted to the DB (§10.4).
    let mut merged = persisted.map(RuntimeConfigPatch::from).unwrap_or_default();

    // Admin key: CLI/ENV-provided key always wins and overwrites the DB hash;
    // otherwise generate one on first run and print it once.
    let mut admin_key_hash_override = None;
    if let Some(key_plain) = admin_key.as_deref() {
        admin_key_hash_override = Some(hash_admin_key(key_plain));
    } else if merged.admin_key_hash.is_none() {
        let key_plain = generate_admin_key();
        eprintln!("generated admin key: {key_plain}");
        admin_key_hash_override = Some(hash_admin_key(&key_plain));
    }

    merged.overlay(RuntimeConfigPatch {
        host,
        port,
        admin_key_hash: admin_key_hash_override,
        proxy,
        dsn: Some(dsn),
        event_redact_sensitive,
        default_source_concurrency,
    });

    let config: RuntimeConfig = merged.into_config().context("finalize merged runtime config")?;
    config_store.save(&config).await.context("persist runtime config")?;

    Ok(Bootstrap {
        config,
        checkpoints: Arc::new(SeaOrmCheckpointStore::new(db.clone())),
        job_history: Arc::new(SeaOrmJobHistoryStore::new(db.clone())),
        db,
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Some PaaS systems may inject unresolved placeholders like `${VAR}`.
    // Treat them as "not set" so startup doesn't fail on URL parsing.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("INGESTION_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/ingestion.db?mode=rwc");
    }
    "sqlite://ingestion.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }

    let memory = normalized.to_ascii_lowercase();
    if memory == ":memory:" {
        return None;
    }

    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u32_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u32>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u32>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
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

fn generate_admin_key() -> String {
    // Random enough for a bootstrap key; stored only in memory/printed once.
    uuid::Uuid::now_v7().to_string()
}
