use ingestion_protocol::{ContentType, SourceEndpointDescriptor};

use crate::mapping::FieldMapping;

/// Everything a `Transformer` needs to turn one external record into envelopes,
/// besides the record itself. Built once per source, reused across every record
/// that source yields in a pull.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub connector_instance_id: String,
    pub source_key: String,
    pub primary_key_field: Option<String>,
    pub timestamp_field: Option<String>,
    pub content_type: ContentType,
    pub default_tags: Vec<String>,
    pub mapping: FieldMapping,
}

impl TransformContext {
    /// Seeds the field mapping with the source's declared primary key and
    /// timestamp field as explicit mappings, so they win over the transformer's
    /// built-in heuristics (§4.5: "explicit mapping overrides heuristic").
    pub fn from_source(connector_instance_id: impl Into<String>, source: &SourceEndpointDescriptor) -> Self {
        let mut mapping = FieldMapping::new();
        if let Some(primary_key) = &source.primary_key {
            mapping = mapping.with_explicit("external_id", primary_key);
        }
        if let Some(timestamp_field) = &source.timestamp_field {
            mapping = mapping.with_explicit("source_updated_at", timestamp_field);
        }

        Self {
            connector_instance_id: connector_instance_id.into(),
            source_key: source.source_key.clone(),
            primary_key_field: source.primary_key.clone(),
            timestamp_field: source.timestamp_field.clone(),
            content_type: ContentType::Json,
            default_tags: Vec::new(),
            mapping,
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_default_tags(mut self, tags: Vec<String>) -> Self {
        self.default_tags = tags;
        self
    }
}
