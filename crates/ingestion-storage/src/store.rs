use async_trait::async_trait;
use ingestion_protocol::{Checkpoint, CHECKPOINT_WIRE_VERSION};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};

use crate::entities::checkpoints;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable key→value state keyed by `(connectorInstanceId, sourceKey)` (§4.6).
///
/// `set` must not return until the checkpoint is durable, and readers must never
/// observe a partially-written value — the SeaOrm implementation gets both from a
/// single upsert statement on the composite primary key.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, connector_instance_id: &str, source_key: &str) -> StorageResult<Option<Checkpoint>>;

    async fn set(&self, checkpoint: &Checkpoint) -> StorageResult<()>;

    async fn delete(&self, connector_instance_id: &str, source_key: &str) -> StorageResult<()>;
}

#[derive(Clone)]
pub struct SeaOrmCheckpointStore {
    db: DatabaseConnection,
}

impl SeaOrmCheckpointStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for SeaOrmCheckpointStore {
    async fn get(&self, connector_instance_id: &str, source_key: &str) -> StorageResult<Option<Checkpoint>> {
        let row = checkpoints::Entity::find()
            .filter(checkpoints::Column::ConnectorInstanceId.eq(connector_instance_id))
            .filter(checkpoints::Column::SourceKey.eq(source_key))
            .one(&self.db)
            .await?;

        // Unknown wire version: ignore the row and force a full sync (§6.4).
        Ok(row
            .filter(|row| row.schema_version == CHECKPOINT_WIRE_VERSION as i32)
            .map(|row| Checkpoint {
                connector_instance_id: row.connector_instance_id,
                source_key: row.source_key,
                cursor: row.cursor,
                updated_at: row.updated_at,
                records_processed: row.records_processed as u64,
            }))
    }

    /// Atomic replace: a single upsert on the composite key, so a concurrent reader
    /// sees either the prior row or this one, never a half-written mix of the two.
    async fn set(&self, checkpoint: &Checkpoint) -> StorageResult<()> {
        let active = checkpoints::ActiveModel {
            connector_instance_id: ActiveValue::Set(checkpoint.connector_instance_id.clone()),
            source_key: ActiveValue::Set(checkpoint.source_key.clone()),
            cursor: ActiveValue::Set(checkpoint.cursor.clone()),
            updated_at: ActiveValue::Set(checkpoint.updated_at),
            records_processed: ActiveValue::Set(checkpoint.records_processed as i64),
            schema_version: ActiveValue::Set(CHECKPOINT_WIRE_VERSION as i32),
        };

        checkpoints::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    checkpoints::Column::ConnectorInstanceId,
                    checkpoints::Column::SourceKey,
                ])
                .update_columns([
                    checkpoints::Column::Cursor,
                    checkpoints::Column::UpdatedAt,
                    checkpoints::Column::RecordsProcessed,
                    checkpoints::Column::SchemaVersion,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete(&self, connector_instance_id: &str, source_key: &str) -> StorageResult<()> {
        checkpoints::Entity::delete_many()
            .filter(checkpoints::Column::ConnectorInstanceId.eq(connector_instance_id))
            .filter(checkpoints::Column::SourceKey.eq(source_key))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, Schema};
    use time::macros::datetime;

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        db.execute(builder.build(&schema.create_table_from_entity(checkpoints::Entity)))
            .await
            .unwrap();
        db
    }

    fn checkpoint(cursor: &str, at: time::OffsetDateTime, records: u64) -> Checkpoint {
        Checkpoint {
            connector_instance_id: "inst-1".into(),
            source_key: "orders".into(),
            cursor: cursor.into(),
            updated_at: at,
            records_processed: records,
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SeaOrmCheckpointStore::new(test_db().await);
        let checkpoint = checkpoint("c1", datetime!(2026-01-01 00:00:00 UTC), 5);
        store.set(&checkpoint).await.unwrap();

        let loaded = store.get("inst-1", "orders").await.unwrap().unwrap();
        assert_eq!(loaded.cursor, "c1");
        assert_eq!(loaded.records_processed, 5);
    }

    #[tokio::test]
    async fn set_replaces_existing_row_atomically() {
        let store = SeaOrmCheckpointStore::new(test_db().await);
        store
            .set(&checkpoint("c1", datetime!(2026-01-01 00:00:00 UTC), 5))
            .await
            .unwrap();
        store
            .set(&checkpoint("c2", datetime!(2026-01-01 00:00:04 UTC), 8))
            .await
            .unwrap();

        let loaded = store.get("inst-1", "orders").await.unwrap().unwrap();
        assert_eq!(loaded.cursor, "c2");
        assert_eq!(loaded.records_processed, 8);
    }

    #[tokio::test]
    async fn missing_checkpoint_returns_none() {
        let store = SeaOrmCheckpointStore::new(test_db().await);
        assert!(store.get("inst-1", "orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let store = SeaOrmCheckpointStore::new(test_db().await);
        store
            .set(&checkpoint("c1", datetime!(2026-01-01 00:00:00 UTC), 5))
            .await
            .unwrap();
        store.delete("inst-1", "orders").await.unwrap();
        assert!(store.get("inst-1", "orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrecognized_schema_version_is_ignored_on_read() {
        let db = test_db().await;
        let active = checkpoints::ActiveModel {
            connector_instance_id: ActiveValue::Set("inst-1".into()),
            source_key: ActiveValue::Set("orders".into()),
            cursor: ActiveValue::Set("c1".into()),
            updated_at: ActiveValue::Set(datetime!(2026-01-01 00:00:00 UTC)),
            records_processed: ActiveValue::Set(5),
            schema_version: ActiveValue::Set(99),
        };
        checkpoints::Entity::insert(active).exec(&db).await.unwrap();

        let store = SeaOrmCheckpointStore::new(db);
        assert!(store.get("inst-1", "orders").await.unwrap().is_none());
    }
}
