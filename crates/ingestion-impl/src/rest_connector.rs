use std::sync::Arc;
use std::time::Duration;

use ingestion_core::{Batch, Credential, ConnectorResult, PageCursor, RateLimiter, Retrier, Transport};
use ingestion_protocol::{SourceEndpointDescriptor, SyncParams, UploadEnvelope};
use ingestion_transform::{TransformContext, TransformError, Transformer};
use time::OffsetDateTime;

/// One fetched-and-transformed page: envelopes ready for upload plus the
/// per-record failures routed to the error bucket instead of failing the batch
/// (§4.8 "missing a declared primary key is routed to an error bucket but does
/// NOT fail the batch").
pub struct TransformedBatch {
    pub envelopes: Vec<UploadEnvelope>,
    pub record_failures: Vec<(usize, TransformError)>,
    /// Maximum `source_updated_at` observed in this batch, if any record carried one.
    pub max_observed_timestamp: Option<OffsetDateTime>,
}

/// Wraps one source endpoint's lazy page sequence with rate limiting, retry and
/// transform, so the Connector Runtime's pull loop (§4.8 step 3) only has to
/// call `next_batch` in order.
pub struct SourcePuller {
    cursor: Box<dyn PageCursor>,
    rate_limiter: Arc<RateLimiter>,
    retrier: Arc<Retrier>,
    transformer: Arc<dyn Transformer>,
    ctx: TransformContext,
    source_key: String,
}

impl SourcePuller {
    pub async fn new<T: Transport + ?Sized>(
        transport: &T,
        descriptor: &SourceEndpointDescriptor,
        credential: Credential,
        params: SyncParams,
        rate_limiter: Arc<RateLimiter>,
        retrier: Arc<Retrier>,
        transformer: Arc<dyn Transformer>,
        ctx: TransformContext,
    ) -> ConnectorResult<Self> {
        let cursor = transport.paginate(descriptor, credential, params).await?;
        Ok(Self {
            cursor,
            rate_limiter,
            retrier,
            transformer,
            ctx,
            source_key: descriptor.source_key.clone(),
        })
    }

    /// Acquires a rate-limit slot, fetches the next page under the Retrier, and
    /// transforms every record in it. Returns `Ok(None)` once the source is
    /// exhausted.
    pub async fn next_batch(&mut self, trace_id: &str) -> ConnectorResult<Option<TransformedBatch>> {
        self.rate_limiter.acquire(&self.source_key).await;

        let cursor = &mut self.cursor;
        let result: Result<Option<Batch>, _> = self
            .retrier
            .run(trace_id, fastrand_unit, || cursor.next_batch())
            .await;

        // A 429 survives the Retrier's own backoff when attempts run out; drain
        // the bucket so the next `acquire` (this or any concurrent caller on the
        // same source) doesn't immediately retrigger the same rate limit (§4.3).
        if let Err(err) = &result
            && let Some(retry_after) = err.retry_after_secs()
        {
            self.rate_limiter.penalize(&self.source_key, Duration::from_secs(retry_after)).await;
        }

        let batch = result?;

        let Some(batch) = batch else {
            return Ok(None);
        };

        let mut envelopes = Vec::new();
        let mut record_failures = Vec::new();
        let mut max_observed_timestamp = None;

        for (index, record) in batch.records.iter().enumerate() {
            match self.transformer.transform(record, &self.ctx) {
                Ok(mut emitted) => {
                    for envelope in &emitted {
                        if let Some(ts) = envelope
                            .metadata
                            .get("source_updated_at")
                            .and_then(|v| v.as_str())
                            .and_then(|s| OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok())
                        {
                            max_observed_timestamp = Some(match max_observed_timestamp {
                                Some(current) if current >= ts => current,
                                _ => ts,
                            });
                        }
                    }
                    envelopes.append(&mut emitted);
                }
                Err(err) => record_failures.push((index, err)),
            }
        }

        Ok(Some(TransformedBatch {
            envelopes,
            record_failures,
            max_observed_timestamp,
        }))
    }
}

/// A cursor's `next_batch` is retried as a unit; jitter doesn't need to be
/// cryptographically random, just spread out, so a simple xorshift suffices
/// without pulling in a `rand` dependency.
fn fastrand_unit() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static STATE: Cell<u64> = Cell::new(0x9E3779B97F4A7C15);
    }
    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x >> 11) as f64 / (1u64 << 53) as f64
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingestion_transform::RecordTransformer;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCursor {
        pages: Vec<Vec<serde_json::Value>>,
        index: AtomicUsize,
    }

    #[async_trait]
    impl PageCursor for FixedCursor {
        async fn next_batch(&mut self) -> ConnectorResult<Option<Batch>> {
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            if i >= self.pages.len() {
                return Ok(None);
            }
            Ok(Some(Batch {
                records: self.pages[i].clone(),
                next_cursor: None,
            }))
        }
    }

    fn descriptor() -> SourceEndpointDescriptor {
        SourceEndpointDescriptor {
            source_key: "orders".into(),
            url: "https://example.test/orders".into(),
            pagination: ingestion_protocol::PaginationVariant::OffsetLimit { limit: 10 },
            primary_key: Some("order_id".into()),
            timestamp_field: Some("updated_at".into()),
            request_timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn transforms_records_and_tracks_max_timestamp() {
        let cursor = FixedCursor {
            pages: vec![vec![
                json!({"order_id": "a", "updated_at": "2026-01-01T00:00:00Z"}),
                json!({"order_id": "b", "updated_at": "2026-01-02T00:00:00Z"}),
            ]],
            index: AtomicUsize::new(0),
        };
        let mut puller = SourcePuller {
            cursor: Box::new(cursor),
            rate_limiter: Arc::new(RateLimiter::new(10, 100.0)),
            retrier: Arc::new(Retrier::new(ingestion_core::RetryPolicy::default())),
            transformer: Arc::new(RecordTransformer),
            ctx: TransformContext::from_source("inst-1", &descriptor()),
            source_key: "orders".into(),
        };

        let batch = puller.next_batch("trace-1").await.unwrap().unwrap();
        assert_eq!(batch.envelopes.len(), 2);
        assert!(batch.record_failures.is_empty());
        assert_eq!(
            batch.max_observed_timestamp,
            Some(
                OffsetDateTime::parse("2026-01-02T00:00:00Z", &time::format_description::well_known::Rfc3339)
                    .unwrap()
            )
        );

        assert!(puller.next_batch("trace-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_primary_key_routes_to_failure_bucket_not_batch_failure() {
        let cursor = FixedCursor {
            pages: vec![vec![json!({"no_id_here": true})]],
            index: AtomicUsize::new(0),
        };
        let mut puller = SourcePuller {
            cursor: Box::new(cursor),
            rate_limiter: Arc::new(RateLimiter::new(10, 100.0)),
            retrier: Arc::new(Retrier::new(ingestion_core::RetryPolicy::default())),
            transformer: Arc::new(RecordTransformer),
            ctx: TransformContext::from_source("inst-1", &descriptor()),
            source_key: "orders".into(),
        };

        let batch = puller.next_batch("trace-1").await.unwrap().unwrap();
        assert!(batch.envelopes.is_empty());
        assert_eq!(batch.record_failures.len(), 1);
        assert!(matches!(batch.record_failures[0].1, TransformError::MissingPrimaryKey));
    }
}
