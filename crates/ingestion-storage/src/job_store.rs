use async_trait::async_trait;
use ingestion_protocol::job::{BoundedErrorLog, Job, JobStats, JobStatus};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::entities::job_history;
use crate::store::{StorageError, StorageResult};

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn parse_status(raw: &str) -> Option<JobStatus> {
    match raw {
        "pending" => Some(JobStatus::Pending),
        "running" => Some(JobStatus::Running),
        "completed" => Some(JobStatus::Completed),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

fn row_to_job(row: job_history::Model) -> Result<Job, StorageError> {
    let stats: JobStats = serde_json::from_str(&row.stats_json)
        .map_err(|err| StorageError::Db(sea_orm::DbErr::Custom(format!("malformed job stats: {err}"))))?;
    let errors: BoundedErrorLog = serde_json::from_str(&row.errors_json)
        .map_err(|err| StorageError::Db(sea_orm::DbErr::Custom(format!("malformed job errors: {err}"))))?;
    let status = parse_status(&row.status)
        .ok_or_else(|| StorageError::Db(sea_orm::DbErr::Custom(format!("unknown job status {}", row.status))))?;

    Ok(Job {
        id: row.id,
        connector_instance_id: row.connector_instance_id,
        started_at: row.started_at,
        completed_at: row.completed_at,
        status,
        stats,
        errors,
    })
}

/// Durable record of job lifecycle (§4.8, §4.9) surviving process restarts, so
/// `runs history` queries work even after the in-memory job registry is gone.
#[async_trait]
pub trait JobHistoryStore: Send + Sync {
    async fn upsert(&self, job: &Job) -> StorageResult<()>;

    async fn get(&self, job_id: &str) -> StorageResult<Option<Job>>;

    async fn list_by_instance(&self, connector_instance_id: &str, limit: u64) -> StorageResult<Vec<Job>>;
}

#[derive(Clone)]
pub struct SeaOrmJobHistoryStore {
    db: DatabaseConnection,
}

impl SeaOrmJobHistoryStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobHistoryStore for SeaOrmJobHistoryStore {
    async fn upsert(&self, job: &Job) -> StorageResult<()> {
        let stats_json = serde_json::to_string(&job.stats)
            .map_err(|err| StorageError::Db(sea_orm::DbErr::Custom(err.to_string())))?;
        let errors_json = serde_json::to_string(&job.errors)
            .map_err(|err| StorageError::Db(sea_orm::DbErr::Custom(err.to_string())))?;

        let active = job_history::ActiveModel {
            id: ActiveValue::Set(job.id.clone()),
            connector_instance_id: ActiveValue::Set(job.connector_instance_id.clone()),
            started_at: ActiveValue::Set(job.started_at),
            completed_at: ActiveValue::Set(job.completed_at),
            status: ActiveValue::Set(status_str(job.status).to_string()),
            stats_json: ActiveValue::Set(stats_json),
            errors_json: ActiveValue::Set(errors_json),
        };

        job_history::Entity::insert(active)
            .on_conflict(
                OnConflict::column(job_history::Column::Id)
                    .update_columns([
                        job_history::Column::CompletedAt,
                        job_history::Column::Status,
                        job_history::Column::StatsJson,
                        job_history::Column::ErrorsJson,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> StorageResult<Option<Job>> {
        let row = job_history::Entity::find_by_id(job_id.to_string()).one(&self.db).await?;
        row.map(row_to_job).transpose()
    }

    async fn list_by_instance(&self, connector_instance_id: &str, limit: u64) -> StorageResult<Vec<Job>> {
        let rows = job_history::Entity::find()
            .filter(job_history::Column::ConnectorInstanceId.eq(connector_instance_id))
            .order_by_desc(job_history::Column::StartedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        rows.into_iter().map(row_to_job).collect()
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
        db.execute(builder.build(&schema.create_table_from_entity(job_history::Entity)))
            .await
            .unwrap();
        db
    }

    fn running_job() -> Job {
        let mut job = Job::new("job-1".into(), "inst-1".into(), datetime!(2026-01-01 00:00:00 UTC));
        job.status = JobStatus::Running;
        job
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = SeaOrmJobHistoryStore::new(test_db().await);
        store.upsert(&running_job()).await.unwrap();

        let loaded = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.connector_instance_id, "inst-1");
        assert!(matches!(loaded.status, JobStatus::Running));
    }

    #[tokio::test]
    async fn upsert_transitions_status_on_completion() {
        let store = SeaOrmJobHistoryStore::new(test_db().await);
        let mut job = running_job();
        store.upsert(&job).await.unwrap();

        job.status = JobStatus::Completed;
        job.completed_at = Some(datetime!(2026-01-01 00:00:10 UTC));
        job.stats.records_uploaded = 5;
        store.upsert(&job).await.unwrap();

        let loaded = store.get("job-1").await.unwrap().unwrap();
        assert!(matches!(loaded.status, JobStatus::Completed));
        assert_eq!(loaded.stats.records_uploaded, 5);
    }

    #[tokio::test]
    async fn list_by_instance_orders_newest_first() {
        let store = SeaOrmJobHistoryStore::new(test_db().await);
        let mut older = running_job();
        older.id = "job-older".into();
        let mut newer = running_job();
        newer.id = "job-newer".into();
        newer.started_at = datetime!(2026-01-02 00:00:00 UTC);

        store.upsert(&older).await.unwrap();
        store.upsert(&newer).await.unwrap();

        let jobs = store.list_by_instance("inst-1", 10).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "job-newer");
    }
}
