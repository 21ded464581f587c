use sea_orm::entity::prelude::*;

/// Single-row table holding the last persisted `RuntimeConfig` (§10.4): CLI
/// overlays ENV overlays this row, then the merged result is written back here.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "runtime_config")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub config_json: String,
}

impl ActiveModelBehavior for ActiveModel {}
