use async_trait::async_trait;
use ingestion_common::RuntimeConfig;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait};

use crate::entities::runtime_config;
use crate::store::{StorageError, StorageResult};

const ROW_ID: i32 = 0;

/// Durable store for the single merged `RuntimeConfig` row (§10.4).
#[async_trait]
pub trait RuntimeConfigStore: Send + Sync {
    async fn load(&self) -> StorageResult<Option<RuntimeConfig>>;

    async fn save(&self, config: &RuntimeConfig) -> StorageResult<()>;
}

#[derive(Clone)]
pub struct SeaOrmRuntimeConfigStore {
    db: DatabaseConnection,
}

impl SeaOrmRuntimeConfigStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RuntimeConfigStore for SeaOrmRuntimeConfigStore {
    async fn load(&self) -> StorageResult<Option<RuntimeConfig>> {
        let Some(row) = runtime_config::Entity::find_by_id(ROW_ID).one(&self.db).await? else {
            return Ok(None);
        };
        let config = serde_json::from_str(&row.config_json)
            .map_err(|err| StorageError::Db(sea_orm::DbErr::Custom(format!("malformed runtime config: {err}"))))?;
        Ok(Some(config))
    }

    async fn save(&self, config: &RuntimeConfig) -> StorageResult<()> {
        let config_json = serde_json::to_string(config)
            .map_err(|err| StorageError::Db(sea_orm::DbErr::Custom(format!("unserializable runtime config: {err}"))))?;
        let active = runtime_config::ActiveModel {
            id: ActiveValue::Set(ROW_ID),
            config_json: ActiveValue::Set(config_json),
        };
        runtime_config::Entity::insert(active)
            .on_conflict(
                OnConflict::column(runtime_config::Column::Id)
                    .update_column(runtime_config::Column::ConfigJson)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
