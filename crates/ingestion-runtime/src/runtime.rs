use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ingestion_common::new_trace_id;
use ingestion_core::events::{
    CheckpointAdvancedEvent, Event, JobCancelledEvent, JobCompletedEvent, JobEvent, JobFailedEvent,
    JobStartedEvent,
};
use ingestion_core::{
    ConnectorError, ConnectorResult, CredentialProvider, EventHub, RateLimiter, Retrier,
    RetryPolicy, Transport,
};
use ingestion_impl::SourcePuller;
use ingestion_protocol::job::{ErrorKind, Job, JobErrorRecord, JobStatus};
use ingestion_protocol::{Checkpoint, ConnectorInstance, SourceEndpointDescriptor, SyncParams};
use ingestion_storage::{CheckpointStore, JobHistoryStore};
use ingestion_transform::{TransformContext, Transformer};
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Bounded-concurrency group size across an instance's source endpoints (§4.8 step 3).
pub const DEFAULT_SOURCE_CONCURRENCY: usize = 4;

fn rate_limit_config(config: &serde_json::Value) -> (u32, f64) {
    let capacity = config
        .get("rateLimit.burst")
        .and_then(serde_json::Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(10);
    let rate = config
        .get("rateLimit.requestsPerSecond")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(5.0);
    (capacity, rate)
}

fn retry_policy(config: &serde_json::Value) -> RetryPolicy {
    let max_attempts = config
        .get("retry.maxAttempts")
        .and_then(serde_json::Value::as_u64)
        .map(|v| v as u32);
    match max_attempts {
        Some(max_attempts) => RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        },
        None => RetryPolicy::default(),
    }
}

fn error_record(where_: String, err: &ConnectorError) -> JobErrorRecord {
    JobErrorRecord {
        when: OffsetDateTime::now_utc(),
        where_,
        kind: ErrorKind::from(err),
        message: err.to_string(),
        retryable: err.is_retryable(),
    }
}

fn storage_to_connector_err(err: ingestion_storage::StorageError) -> ConnectorError {
    ConnectorError::Server {
        status: 500,
        message: format!("checkpoint/job-history storage error: {err}"),
    }
}

struct RunningJob {
    job_id: String,
    cancel: Arc<AtomicBool>,
}

enum SourceOutcome {
    Ok {
        records_read: u64,
        records_uploaded: u64,
        records_failed: u64,
    },
    Cancelled {
        records_read: u64,
        records_uploaded: u64,
        records_failed: u64,
    },
    Fatal {
        source_key: String,
        err: ConnectorError,
        records_read: u64,
        records_uploaded: u64,
        records_failed: u64,
    },
}

/// Orchestrates one connector instance's pull across all its configured source
/// endpoints (§4.8). Owns the instance-level "one job at a time" lock; everything
/// else (transport, credentials, transform, checkpoint durability, upload) is
/// delegated to the concrete collaborators it's built with.
pub struct ConnectorRuntime {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    uploader: Arc<dyn ingestion_impl::UploadGatewayClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    job_history: Arc<dyn JobHistoryStore>,
    transformer: Arc<dyn Transformer>,
    events: EventHub,
    running: Mutex<HashMap<String, RunningJob>>,
    source_concurrency: usize,
}

impl ConnectorRuntime {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        uploader: Arc<dyn ingestion_impl::UploadGatewayClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        job_history: Arc<dyn JobHistoryStore>,
        transformer: Arc<dyn Transformer>,
        events: EventHub,
    ) -> Self {
        Self {
            transport,
            credentials,
            uploader,
            checkpoints,
            job_history,
            transformer,
            events,
            running: Mutex::new(HashMap::new()),
            source_concurrency: DEFAULT_SOURCE_CONCURRENCY,
        }
    }

    /// Overrides the default per-instance source fan-out width (§10.4's
    /// `default_source_concurrency` config knob).
    pub fn with_source_concurrency(mut self, source_concurrency: u32) -> Self {
        self.source_concurrency = source_concurrency.max(1) as usize;
        self
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Warms the instance's credential lease so a config/auth mistake surfaces at
    /// registration time rather than on the first scheduled pull.
    pub async fn initialize(&self, instance: &ConnectorInstance) -> ConnectorResult<()> {
        self.credentials.acquire(&instance.id).await?;
        Ok(())
    }

    pub async fn is_running(&self, instance_id: &str) -> bool {
        self.running.lock().await.contains_key(instance_id)
    }

    /// Runs one full pull for `instance`, fanning out across its source endpoints
    /// with bounded concurrency and persisting checkpoints as each source
    /// progresses. Returns the finished `Job` — a source's fatal error lands in
    /// the job's error log and fails the job overall, but never stops its sibling
    /// sources from running to completion (§4.8 step 5's per-source isolation).
    ///
    /// Takes `self` behind an `Arc` so source fetches can run as real concurrent
    /// tasks rather than a sequential loop. Callers hold the runtime as
    /// `Arc<ConnectorRuntime>` and pass a clone into each `pull` call.
    pub async fn pull(
        self: Arc<Self>,
        instance: Arc<ConnectorInstance>,
        params: SyncParams,
    ) -> ConnectorResult<Job> {
        {
            let mut running = self.running.lock().await;
            if running.contains_key(&instance.id) {
                return Err(ConnectorError::AlreadyRunning);
            }
            running.insert(
                instance.id.clone(),
                RunningJob {
                    job_id: String::new(),
                    cancel: Arc::new(AtomicBool::new(false)),
                },
            );
        }

        let job_id = new_trace_id();
        let cancel = {
            let mut running = self.running.lock().await;
            let slot = running.get_mut(&instance.id).expect("just inserted");
            slot.job_id = job_id.clone();
            slot.cancel.clone()
        };

        let started_at = OffsetDateTime::now_utc();
        let mut job = Job::new(job_id.clone(), instance.id.clone(), started_at);
        job.status = JobStatus::Running;
        self.job_history.upsert(&job).await.map_err(storage_to_connector_err)?;

        self.events
            .emit(Event::Job(JobEvent::Started(JobStartedEvent {
                at: SystemTime::now(),
                trace_id: params.trace_id.clone(),
                job_id: job_id.clone(),
                connector_instance_id: instance.id.clone(),
            })))
            .await;

        let (capacity, rate) = rate_limit_config(&instance.config);
        let rate_limiter = Arc::new(RateLimiter::new(capacity, rate));
        let retrier = Arc::new(Retrier::new(retry_policy(&instance.config)));

        let mut any_fatal = false;
        let mut cancelled = false;

        // Bounded-concurrency fan-out over sources (§4.8 step 3): each group of
        // `source_concurrency` sources runs as real spawned tasks, isolated from
        // one another (§4.8 step 5) — one source's failure doesn't stop the rest.
        let mut pending: Vec<SourceEndpointDescriptor> = instance.sources.clone();
        while !pending.is_empty() {
            let take = pending.len().min(self.source_concurrency);
            let chunk: Vec<SourceEndpointDescriptor> = pending.drain(..take).collect();

            let mut handles = Vec::with_capacity(chunk.len());
            for source in chunk {
                let runtime = self.clone();
                let instance = instance.clone();
                let params = params.clone();
                let rate_limiter = rate_limiter.clone();
                let retrier = retrier.clone();
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    runtime
                        .pull_source(&instance, &source, &params, rate_limiter, retrier, cancel)
                        .await
                }));
            }

            for handle in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => SourceOutcome::Fatal {
                        source_key: "unknown".into(),
                        err: ConnectorError::Server {
                            status: 500,
                            message: format!("source task panicked: {join_err}"),
                        },
                        records_read: 0,
                        records_uploaded: 0,
                        records_failed: 0,
                    },
                };
                match outcome {
                    SourceOutcome::Ok { records_read, records_uploaded, records_failed } => {
                        job.stats.records_read += records_read;
                        job.stats.records_uploaded += records_uploaded;
                        job.stats.records_failed += records_failed;
                    }
                    SourceOutcome::Cancelled { records_read, records_uploaded, records_failed } => {
                        job.stats.records_read += records_read;
                        job.stats.records_uploaded += records_uploaded;
                        job.stats.records_failed += records_failed;
                        cancelled = true;
                    }
                    SourceOutcome::Fatal { source_key, err, records_read, records_uploaded, records_failed } => {
                        job.stats.records_read += records_read;
                        job.stats.records_uploaded += records_uploaded;
                        job.stats.records_failed += records_failed;
                        job.errors.push(error_record(source_key, &err));
                        any_fatal = true;
                    }
                }
            }
        }

        job.completed_at = Some(OffsetDateTime::now_utc());
        job.status = if cancelled {
            JobStatus::Cancelled
        } else if any_fatal {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        self.job_history.upsert(&job).await.map_err(storage_to_connector_err)?;
        self.running.lock().await.remove(&instance.id);

        let event = match job.status {
            JobStatus::Cancelled => Event::Job(JobEvent::Cancelled(JobCancelledEvent {
                at: SystemTime::now(),
                job_id: job.id.clone(),
                connector_instance_id: instance.id.clone(),
            })),
            JobStatus::Failed => Event::Job(JobEvent::Failed(JobFailedEvent {
                at: SystemTime::now(),
                job_id: job.id.clone(),
                connector_instance_id: instance.id.clone(),
                message: job
                    .errors
                    .entries()
                    .last()
                    .map(|e| e.message.clone())
                    .unwrap_or_default(),
            })),
            _ => Event::Job(JobEvent::Completed(JobCompletedEvent {
                at: SystemTime::now(),
                job_id: job.id.clone(),
                connector_instance_id: instance.id.clone(),
                records_read: job.stats.records_read,
                records_uploaded: job.stats.records_uploaded,
                records_failed: job.stats.records_failed,
            })),
        };
        self.events.emit(event).await;

        Ok(job)
    }

    async fn pull_source(
        &self,
        instance: &ConnectorInstance,
        source: &SourceEndpointDescriptor,
        params: &SyncParams,
        rate_limiter: Arc<RateLimiter>,
        retrier: Arc<Retrier>,
        cancel: Arc<AtomicBool>,
    ) -> SourceOutcome {
        let credential = match self.credentials.acquire(&instance.id).await {
            Ok(cred) => cred,
            Err(err) => {
                return SourceOutcome::Fatal { source_key: source.source_key.clone(), err, records_read: 0, records_uploaded: 0, records_failed: 0 };
            }
        };

        let existing = self
            .checkpoints
            .get(&instance.id, &source.source_key)
            .await
            .ok()
            .flatten();
        let mut checkpoint = existing.unwrap_or_else(|| Checkpoint {
            connector_instance_id: instance.id.clone(),
            source_key: source.source_key.clone(),
            cursor: String::new(),
            updated_at: params.effective_since().unwrap_or(OffsetDateTime::UNIX_EPOCH),
            records_processed: 0,
        });

        // Feed the durable checkpoint cursor back into the fetch params (§4.8 step
        // 2): callers always hand us `SyncParams` built at trigger time (schedule
        // tick or on-demand run), which carries no knowledge of prior progress.
        // `full_sync` requests bypass this and refetch from the configured since.
        let params = if params.full_sync {
            params.clone()
        } else {
            SyncParams { since: Some(checkpoint.updated_at), ..params.clone() }
        };

        let ctx = TransformContext::from_source(instance.id.clone(), source);
        let mut puller = match SourcePuller::new(
            self.transport.as_ref(),
            source,
            credential,
            params.clone(),
            rate_limiter,
            retrier,
            self.transformer.clone(),
            ctx,
        )
        .await
        {
            Ok(puller) => puller,
            Err(err) => {
                return SourceOutcome::Fatal { source_key: source.source_key.clone(), err, records_read: 0, records_uploaded: 0, records_failed: 0 };
            }
        };

        let mut records_read = 0u64;
        let mut records_uploaded = 0u64;
        let mut records_failed = 0u64;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return SourceOutcome::Cancelled { records_read, records_uploaded, records_failed };
            }

            let batch = match puller.next_batch(&params.trace_id).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    return SourceOutcome::Fatal { source_key: source.source_key.clone(), err, records_read, records_uploaded, records_failed };
                }
            };

            records_read += batch.envelopes.len() as u64 + batch.record_failures.len() as u64;
            records_failed += batch.record_failures.len() as u64;

            let is_empty_page = batch.envelopes.is_empty() && batch.record_failures.is_empty();

            if !batch.envelopes.is_empty() {
                let result = match self
                    .uploader
                    .upload_batch(&batch.envelopes, ingestion_impl::UploadOptions { transactional: false })
                    .await
                {
                    Ok(result) => result,
                    Err(err) => {
                        return SourceOutcome::Fatal { source_key: source.source_key.clone(), err, records_read, records_uploaded, records_failed };
                    }
                };
                records_uploaded += result.successes().count() as u64;
                records_failed += result.failures().count() as u64;
            }

            // Advance checkpoint: max observed timestamp, or now() on an empty page
            // so an unchanged window isn't re-pulled. Never regresses (§4.6).
            let advance_to = batch.max_observed_timestamp.unwrap_or_else(OffsetDateTime::now_utc);
            if advance_to > checkpoint.updated_at {
                checkpoint.updated_at = advance_to;
            } else if is_empty_page {
                checkpoint.updated_at = OffsetDateTime::now_utc();
            }
            checkpoint.records_processed += batch.envelopes.len() as u64;

            if let Err(err) = self.checkpoints.set(&checkpoint).await {
                return SourceOutcome::Fatal {
                    source_key: source.source_key.clone(),
                    err: storage_to_connector_err(err),
                    records_read,
                    records_uploaded,
                    records_failed,
                };
            }

            self.events
                .emit(Event::Job(JobEvent::CheckpointAdvanced(CheckpointAdvancedEvent {
                    at: SystemTime::now(),
                    connector_instance_id: instance.id.clone(),
                    source_key: source.source_key.clone(),
                    records_processed: checkpoint.records_processed,
                })))
                .await;
        }

        SourceOutcome::Ok { records_read, records_uploaded, records_failed }
    }

    /// Requests cancellation of a running job. Each source finishes its in-flight
    /// batch (already committed to the brain) and persists that batch's
    /// checkpoint before the job as a whole terminates `cancelled` (§4.8 step 4).
    pub async fn cancel(&self, job_id: &str) -> bool {
        let running = self.running.lock().await;
        for entry in running.values() {
            if entry.job_id == job_id {
                entry.cancel.store(true, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    /// Releases the instance's credential lease and clears any stuck running
    /// entry. Idempotent.
    pub async fn teardown(&self, instance_id: &str) {
        self.credentials.invalidate(instance_id).await;
        self.running.lock().await.remove(instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingestion_core::{PageCursor, Batch};
    use ingestion_impl::{BatchItemResult, BatchResult, StaticCredentialProvider, UploadAck, UploadOptions, UploadStatus};
    use ingestion_protocol::{ConnectorInstanceState, PaginationVariant};
    use ingestion_transform::RecordTransformer;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct FakeCheckpointStore {
        rows: StdMutex<HashMap<String, Checkpoint>>,
    }

    impl FakeCheckpointStore {
        fn new() -> Self {
            Self { rows: StdMutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl CheckpointStore for FakeCheckpointStore {
        async fn get(&self, connector_instance_id: &str, source_key: &str) -> ingestion_storage::StorageResult<Option<Checkpoint>> {
            Ok(self.rows.lock().unwrap().get(&Checkpoint::storage_key(connector_instance_id, source_key)).cloned())
        }

        async fn set(&self, checkpoint: &Checkpoint) -> ingestion_storage::StorageResult<()> {
            let key = Checkpoint::storage_key(&checkpoint.connector_instance_id, &checkpoint.source_key);
            self.rows.lock().unwrap().insert(key, checkpoint.clone());
            Ok(())
        }

        async fn delete(&self, connector_instance_id: &str, source_key: &str) -> ingestion_storage::StorageResult<()> {
            self.rows.lock().unwrap().remove(&Checkpoint::storage_key(connector_instance_id, source_key));
            Ok(())
        }
    }

    struct FakeJobHistoryStore {
        jobs: StdMutex<HashMap<String, Job>>,
    }

    impl FakeJobHistoryStore {
        fn new() -> Self {
            Self { jobs: StdMutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl JobHistoryStore for FakeJobHistoryStore {
        async fn upsert(&self, job: &Job) -> ingestion_storage::StorageResult<()> {
            self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn get(&self, job_id: &str) -> ingestion_storage::StorageResult<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(job_id).cloned())
        }

        async fn list_by_instance(&self, connector_instance_id: &str, _limit: u64) -> ingestion_storage::StorageResult<Vec<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|job| job.connector_instance_id == connector_instance_id)
                .cloned()
                .collect())
        }
    }

    /// Yields one page per `pages` entry, then exhausts. Lets a test script a
    /// source's response sequence (e.g. one empty page to exercise the
    /// empty-page checkpoint bump, or one page that errors to exercise
    /// per-source isolation) without a live network.
    struct FakeCursor {
        pages: StdMutex<std::collections::VecDeque<ConnectorResult<Option<Batch>>>>,
    }

    #[async_trait]
    impl PageCursor for FakeCursor {
        async fn next_batch(&mut self) -> ConnectorResult<Option<Batch>> {
            match self.pages.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(None),
            }
        }
    }

    /// Records the `since` every `paginate` call was invoked with, so a test can
    /// assert the Connector Runtime derives it from the durable checkpoint
    /// rather than forwarding whatever the caller's `SyncParams` happened to
    /// carry.
    struct FakeTransport {
        since_calls: StdMutex<Vec<Option<OffsetDateTime>>>,
        pages_by_source: StdMutex<HashMap<String, Vec<Vec<serde_json::Value>>>>,
        fail_sources: StdMutex<std::collections::HashSet<String>>,
    }

    impl FakeTransport {
        fn new(pages_by_source: HashMap<String, Vec<Vec<serde_json::Value>>>) -> Self {
            Self {
                since_calls: StdMutex::new(Vec::new()),
                pages_by_source: StdMutex::new(pages_by_source),
                fail_sources: StdMutex::new(std::collections::HashSet::new()),
            }
        }

        /// Makes `paginate` return a fatal error for `source_key`, so a test can
        /// exercise per-source isolation without a real network failure.
        fn fail_source(&self, source_key: &str) {
            self.fail_sources.lock().unwrap().insert(source_key.to_string());
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn request(
            &self,
            _req: ingestion_core::TransportRequest,
            _credential: &ingestion_core::Credential,
        ) -> ConnectorResult<ingestion_core::TransportResponse> {
            unimplemented!("runtime tests only exercise paginate")
        }

        async fn paginate(
            &self,
            descriptor: &SourceEndpointDescriptor,
            _credential: ingestion_core::Credential,
            params: SyncParams,
        ) -> ConnectorResult<Box<dyn PageCursor>> {
            self.since_calls.lock().unwrap().push(params.effective_since());
            if self.fail_sources.lock().unwrap().contains(&descriptor.source_key) {
                return Err(ConnectorError::Server { status: 500, message: "simulated source outage".into() });
            }
            let records = self
                .pages_by_source
                .lock()
                .unwrap()
                .remove(&descriptor.source_key)
                .unwrap_or_default();
            let pages = records
                .into_iter()
                .map(|records| Ok(Some(Batch { records, next_cursor: None })))
                .collect();
            Ok(Box::new(FakeCursor { pages: StdMutex::new(pages) }))
        }
    }

    /// Every upload succeeds. Per-source isolation and transactional rollback
    /// are covered at the Upload Gateway Client layer; here the runtime just
    /// needs a collaborator that records what it received.
    struct FakeUploader;

    #[async_trait]
    impl ingestion_impl::UploadGatewayClient for FakeUploader {
        async fn upload(&self, _envelope: &ingestion_protocol::UploadEnvelope, _opts: UploadOptions) -> ConnectorResult<UploadAck> {
            Ok(UploadAck { document_id: "doc".into(), status: UploadStatus::Indexed, job_id: None })
        }

        async fn upload_batch(&self, envelopes: &[ingestion_protocol::UploadEnvelope], _opts: UploadOptions) -> ConnectorResult<BatchResult> {
            let items = (0..envelopes.len())
                .map(|index| BatchItemResult {
                    index,
                    result: Ok(UploadAck { document_id: format!("doc-{index}"), status: UploadStatus::Indexed, job_id: None }),
                })
                .collect();
            Ok(BatchResult { items })
        }

        async fn poll_status(&self, _document_id: &str) -> ConnectorResult<UploadAck> {
            Ok(UploadAck { document_id: "doc".into(), status: UploadStatus::Indexed, job_id: None })
        }
    }

    fn source(key: &str) -> SourceEndpointDescriptor {
        SourceEndpointDescriptor {
            source_key: key.into(),
            url: format!("https://example.test/{key}"),
            pagination: PaginationVariant::OffsetLimit { limit: 100 },
            primary_key: Some("id".into()),
            timestamp_field: Some("updated_at".into()),
            request_timeout_secs: 30,
        }
    }

    fn instance(id: &str, sources: Vec<SourceEndpointDescriptor>) -> ConnectorInstance {
        ConnectorInstance {
            id: id.into(),
            definition_name: "rest-orders".into(),
            config: json!({}),
            credential_ref: "cred-1".into(),
            state: ConnectorInstanceState::Initialized,
            sources,
        }
    }

    fn credential() -> ingestion_core::Credential {
        ingestion_core::Credential {
            scheme: ingestion_core::CredentialScheme::Bearer,
            value: "tok".into(),
            expires_at: None,
            refresh_token: None,
            header_name: None,
        }
    }

    fn build_runtime(
        transport: Arc<FakeTransport>,
        checkpoints: Arc<FakeCheckpointStore>,
    ) -> Arc<ConnectorRuntime> {
        Arc::new(ConnectorRuntime::new(
            transport,
            Arc::new(StaticCredentialProvider::new(credential())),
            Arc::new(FakeUploader),
            checkpoints,
            Arc::new(FakeJobHistoryStore::new()),
            Arc::new(RecordTransformer),
            EventHub::new(16),
        ))
    }

    #[tokio::test]
    async fn first_pull_with_no_checkpoint_uploads_every_record() {
        let mut pages = HashMap::new();
        pages.insert(
            "orders".to_string(),
            vec![vec![
                json!({"id": "a", "updated_at": "2026-01-01T00:00:01Z"}),
                json!({"id": "b", "updated_at": "2026-01-01T00:00:02Z"}),
            ]],
        );
        let transport = Arc::new(FakeTransport::new(pages));
        let checkpoints = Arc::new(FakeCheckpointStore::new());
        let runtime = build_runtime(transport.clone(), checkpoints.clone());
        let instance = Arc::new(instance("inst-1", vec![source("orders")]));

        let job = runtime.clone().pull(instance.clone(), SyncParams::first_run("trace-1")).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stats.records_read, 2);
        assert_eq!(job.stats.records_uploaded, 2);
        // No prior checkpoint: the freshly-seeded checkpoint defaults to the
        // unix epoch, so the first fetch's effective `since` is "everything".
        assert_eq!(transport.since_calls.lock().unwrap()[0], Some(OffsetDateTime::UNIX_EPOCH));

        let checkpoint = checkpoints.get("inst-1", "orders").await.unwrap().unwrap();
        assert_eq!(checkpoint.records_processed, 2);
    }

    /// Regression test for the checkpoint cursor never reaching `Transport`:
    /// a second pull over the same instance must see `since` set to the
    /// checkpoint the first pull advanced to, not `None` again (§4.8 step 2).
    #[tokio::test]
    async fn second_pull_forwards_the_advanced_checkpoint_as_since() {
        let mut pages = HashMap::new();
        // One empty page per pull so each run ends immediately but still bumps
        // the checkpoint forward via the "no records" now()-advance rule.
        pages.insert("orders".to_string(), vec![Vec::new()]);
        pages.insert("orders-second".to_string(), vec![Vec::new()]);

        let transport = Arc::new(FakeTransport::new(pages));
        let checkpoints = Arc::new(FakeCheckpointStore::new());
        let runtime = build_runtime(transport.clone(), checkpoints.clone());
        let instance = Arc::new(instance("inst-1", vec![source("orders")]));

        runtime.clone().pull(instance.clone(), SyncParams::first_run("trace-1")).await.unwrap();
        let advanced = checkpoints.get("inst-1", "orders").await.unwrap().unwrap();

        // Re-seed the fake transport's page queue for the source key under a
        // second registration so the second pull has a page to fetch.
        transport.pages_by_source.lock().unwrap().insert("orders".to_string(), vec![Vec::new()]);
        runtime.clone().pull(instance.clone(), SyncParams::first_run("trace-2")).await.unwrap();

        let calls = transport.since_calls.lock().unwrap();
        assert_eq!(
            calls[0],
            Some(OffsetDateTime::UNIX_EPOCH),
            "first pull has no checkpoint to resume from, so it starts from the epoch"
        );
        assert_eq!(calls[1], Some(advanced.updated_at), "second pull must resume from the checkpoint the first pull wrote");
        assert!(advanced.updated_at > OffsetDateTime::UNIX_EPOCH, "first pull must have advanced the checkpoint");
    }

    #[tokio::test]
    async fn one_source_failing_fatally_does_not_stop_its_sibling() {
        let mut pages = HashMap::new();
        pages.insert(
            "orders".to_string(),
            vec![vec![json!({"id": "a", "updated_at": "2026-01-01T00:00:01Z"})]],
        );

        let transport = Arc::new(FakeTransport::new(pages));
        transport.fail_source("broken");
        let checkpoints = Arc::new(FakeCheckpointStore::new());
        let runtime = build_runtime(transport, checkpoints.clone());
        let instance = Arc::new(instance("inst-1", vec![source("orders"), source("broken")]));

        let job = runtime.clone().pull(instance, SyncParams::first_run("trace-1")).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.stats.records_uploaded, 1, "the healthy sibling source still completes");
        assert_eq!(job.errors.entries().len(), 1);
        assert_eq!(job.errors.entries()[0].where_, "broken");

        // The healthy source's checkpoint still advanced despite the sibling's failure.
        assert!(checkpoints.get("inst-1", "orders").await.unwrap().is_some());
        assert!(checkpoints.get("inst-1", "broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_record_missing_its_primary_key_is_a_per_record_failure_not_a_fatal_one() {
        let mut pages = HashMap::new();
        pages.insert(
            "orders".to_string(),
            vec![vec![
                json!({"id": "a", "updated_at": "2026-01-01T00:00:01Z"}),
                json!({"no_id_here": true}),
            ]],
        );
        let transport = Arc::new(FakeTransport::new(pages));
        let checkpoints = Arc::new(FakeCheckpointStore::new());
        let runtime = build_runtime(transport, checkpoints);
        let instance = Arc::new(instance("inst-1", vec![source("orders")]));

        let job = runtime.clone().pull(instance, SyncParams::first_run("trace-1")).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stats.records_uploaded, 1);
        assert_eq!(job.stats.records_failed, 1);
    }
}
