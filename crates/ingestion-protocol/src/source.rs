use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "variant")]
pub enum PaginationVariant {
    OffsetLimit { limit: u32 },
    Cursor { cursor_param: String },
    LinkHeader,
}

/// Static description of one fetch endpoint within a connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEndpointDescriptor {
    pub source_key: String,
    pub url: String,
    pub pagination: PaginationVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}
