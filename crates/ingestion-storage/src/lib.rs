pub mod config_store;
pub mod db;
pub mod entities;
pub mod job_store;
pub mod store;

pub use config_store::{RuntimeConfigStore, SeaOrmRuntimeConfigStore};
pub use db::connect_shared;
pub use job_store::{JobHistoryStore, SeaOrmJobHistoryStore};
pub use store::{CheckpointStore, SeaOrmCheckpointStore, StorageError, StorageResult};

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Schema};

use entities::{checkpoints, job_history, runtime_config};

/// Creates the `checkpoints`/`job_history`/`runtime_config` tables if they don't
/// already exist. Intended for the SQLite-backed default deployment (§6.4); a
/// managed Postgres/MySQL deployment would run migrations out of band instead.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    if builder == DatabaseBackend::Sqlite {
        db.execute_unprepared("PRAGMA journal_mode = WAL").await?;
    }

    let mut checkpoints_stmt = schema.create_table_from_entity(checkpoints::Entity);
    checkpoints_stmt.if_not_exists();
    db.execute(builder.build(&checkpoints_stmt)).await?;

    let mut job_history_stmt = schema.create_table_from_entity(job_history::Entity);
    job_history_stmt.if_not_exists();
    db.execute(builder.build(&job_history_stmt)).await?;

    let mut runtime_config_stmt = schema.create_table_from_entity(runtime_config::Entity);
    runtime_config_stmt.if_not_exists();
    db.execute(builder.build(&runtime_config_stmt)).await?;

    Ok(())
}
