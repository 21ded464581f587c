use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Durable row for one `(connectorInstanceId, sourceKey)` checkpoint (§4.6, §6.4).
/// `cursor` holds the version-tagged opaque JSON payload the runtime treats as a
/// black box; the store itself only needs `updated_at` to decide monotonicity.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "checkpoints")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub connector_instance_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub source_key: String,
    pub cursor: String,
    pub updated_at: OffsetDateTime,
    pub records_processed: i64,
    /// Wire version the row was written under (§6.4); a mismatch on read means
    /// the checkpoint is ignored and a full sync is forced.
    pub schema_version: i32,
}

impl ActiveModelBehavior for ActiveModel {}
