use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One of the three carriers an `UploadEnvelope` can hold its payload in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum EnvelopeContent {
    InlineBytes { bytes: bytes::Bytes },
    RemoteUrl { url: String },
    Base64String { data: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Pdf,
    Html,
    Text,
    Markdown,
    Json,
    Csv,
    Xml,
    Image,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chunking {
    Paragraph,
    Semantic,
    Fixed,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deduplication {
    Exact,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_tables: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking: Option<Chunking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplication: Option<Deduplication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#async: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationships {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Restricted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writers: Vec<String>,
    pub visibility: Visibility,
}

/// A field-type descriptor for structured data, keyed by field name.
pub type SchemaDescriptor = BTreeMap<String, String>;

/// Canonical unit of ingestion accepted by the Upload Gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEnvelope {
    pub content: EnvelopeContent,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDescriptor>,
    /// Must include a source identifier and the external id (`metadata.external_id`).
    pub metadata: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub processing_hints: ProcessingHints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Relationships>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
}

impl UploadEnvelope {
    pub fn external_id(&self) -> Option<&str> {
        self.metadata.get("external_id").and_then(JsonValue::as_str)
    }

    pub fn source_identifier(&self) -> Option<&str> {
        self.metadata.get("source").and_then(JsonValue::as_str)
    }

    /// Tag order is insignificant; use this for equality checks in tests.
    pub fn tags_sorted(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_order_insignificant() {
        let mut envelope = sample_envelope();
        envelope.tags = vec!["b".into(), "a".into()];
        assert_eq!(envelope.tags_sorted(), vec!["a".to_string(), "b".to_string()]);
    }

    fn sample_envelope() -> UploadEnvelope {
        UploadEnvelope {
            content: EnvelopeContent::Base64String { data: "".into() },
            content_type: ContentType::Json,
            schema: None,
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            processing_hints: ProcessingHints::default(),
            relationships: None,
            permissions: None,
        }
    }
}
