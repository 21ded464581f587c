use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One row per `Job` (§4.8, §4.9): the runtime's in-memory registry is authoritative
/// while a job is live, this table is the durable record once it reaches a terminal
/// state (and a best-effort snapshot while running, for `runs history` queries that
/// survive a process restart).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub connector_instance_id: String,
    pub started_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub status: String,
    pub stats_json: String,
    pub errors_json: String,
}

impl ActiveModelBehavior for ActiveModel {}
