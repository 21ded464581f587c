use std::collections::BTreeMap;

use bytes::Bytes;
use ingestion_protocol::{EnvelopeContent, ProcessingHints, UploadEnvelope};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::context::TransformContext;
use crate::error::TransformError;

const HEURISTIC_ID_PATHS: &[&str] = &["id", "external_id", "_id"];
const HEURISTIC_TIMESTAMP_PATHS: &[&str] = &["updated_at", "updatedAt", "timestamp", "modified_at"];

/// Pure mapping from one external record to zero or more canonical upload
/// envelopes. Implementations MUST NOT perform I/O, read checkpoints, or mutate
/// shared state — transform is a pure function of `(record, ctx)` (§4.5).
pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        record: &JsonValue,
        ctx: &TransformContext,
    ) -> Result<Vec<UploadEnvelope>, TransformError>;
}

/// Default, field-mapping-driven transformer: one record becomes one envelope
/// whose payload is the record's own JSON, with `external_id` and
/// `source_updated_at` lifted into `metadata` per the context's mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTransformer;

impl Transformer for RecordTransformer {
    fn transform(
        &self,
        record: &JsonValue,
        ctx: &TransformContext,
    ) -> Result<Vec<UploadEnvelope>, TransformError> {
        let external_id = ctx
            .mapping
            .resolve(record, "external_id", HEURISTIC_ID_PATHS)
            .ok_or(TransformError::MissingPrimaryKey)?;
        let external_id = json_value_to_metadata_string(external_id);

        let mut metadata = BTreeMap::new();
        metadata.insert("external_id".to_string(), JsonValue::String(external_id));
        metadata.insert(
            "source".to_string(),
            JsonValue::String(ctx.source_key.clone()),
        );
        metadata.insert(
            "connector_instance_id".to_string(),
            JsonValue::String(ctx.connector_instance_id.clone()),
        );

        if let Some(raw_timestamp) = ctx
            .mapping
            .resolve(record, "source_updated_at", HEURISTIC_TIMESTAMP_PATHS)
        {
            let rendered = render_timestamp(raw_timestamp)?;
            metadata.insert("source_updated_at".to_string(), JsonValue::String(rendered));
        }

        let bytes = serde_json::to_vec(record)?;
        let envelope = UploadEnvelope {
            content: EnvelopeContent::InlineBytes {
                bytes: Bytes::from(bytes),
            },
            content_type: ctx.content_type,
            schema: None,
            metadata,
            tags: ctx.default_tags.clone(),
            processing_hints: ProcessingHints {
                primary_key: ctx.primary_key_field.clone(),
                timestamp_field: ctx.timestamp_field.clone(),
                ..ProcessingHints::default()
            },
            relationships: None,
            permissions: None,
        };

        Ok(vec![envelope])
    }
}

fn json_value_to_metadata_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_timestamp(value: &JsonValue) -> Result<String, TransformError> {
    let raw = value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());

    let parsed = OffsetDateTime::parse(&raw, &time::format_description::well_known::Rfc3339)
        .map_err(|_| TransformError::InvalidTimestamp(raw.clone()))?;
    parsed
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|_| TransformError::InvalidTimestamp(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestion_protocol::{PaginationVariant, SourceEndpointDescriptor};
    use serde_json::json;

    fn source() -> SourceEndpointDescriptor {
        SourceEndpointDescriptor {
            source_key: "orders".into(),
            url: "https://example.test/orders".into(),
            pagination: PaginationVariant::OffsetLimit { limit: 100 },
            primary_key: Some("order_id".into()),
            timestamp_field: Some("updated_at".into()),
            request_timeout_secs: 30,
        }
    }

    #[test]
    fn maps_declared_primary_key_and_timestamp() {
        let ctx = TransformContext::from_source("inst-1", &source());
        let record = json!({
            "order_id": "ord-42",
            "updated_at": "2026-01-02T03:04:05Z",
            "total": 19.99
        });

        let envelopes = RecordTransformer.transform(&record, &ctx).unwrap();
        assert_eq!(envelopes.len(), 1);
        let envelope = &envelopes[0];
        assert_eq!(envelope.external_id(), Some("ord-42"));
        assert_eq!(
            envelope.metadata.get("source_updated_at").and_then(JsonValue::as_str),
            Some("2026-01-02T03:04:05Z")
        );
    }

    #[test]
    fn missing_primary_key_is_an_error_not_a_panic() {
        let ctx = TransformContext::from_source("inst-1", &SourceEndpointDescriptor {
            primary_key: None,
            timestamp_field: None,
            ..source()
        });
        let record = json!({"total": 5});

        let err = RecordTransformer.transform(&record, &ctx).unwrap_err();
        assert!(matches!(err, TransformError::MissingPrimaryKey));
    }

    #[test]
    fn falls_back_to_heuristic_id_when_source_has_no_declared_primary_key() {
        let ctx = TransformContext::from_source("inst-1", &SourceEndpointDescriptor {
            primary_key: None,
            timestamp_field: None,
            ..source()
        });
        let record = json!({"id": "heuristic-42"});

        let envelopes = RecordTransformer.transform(&record, &ctx).unwrap();
        assert_eq!(envelopes[0].external_id(), Some("heuristic-42"));
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let ctx = TransformContext::from_source("inst-1", &source());
        let record = json!({"order_id": "ord-1", "updated_at": "not-a-date"});

        let err = RecordTransformer.transform(&record, &ctx).unwrap_err();
        assert!(matches!(err, TransformError::InvalidTimestamp(_)));
    }
}
