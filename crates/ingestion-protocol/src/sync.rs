use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

/// Parameters for one pull invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    /// Absent means "first run" (no checkpoint to resume from).
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
    #[serde(default)]
    pub full_sync: bool,
    #[serde(default)]
    pub params: BTreeMap<String, JsonValue>,
    pub trace_id: String,
}

impl SyncParams {
    pub fn first_run(trace_id: impl Into<String>) -> Self {
        Self {
            since: None,
            full_sync: false,
            params: BTreeMap::new(),
            trace_id: trace_id.into(),
        }
    }

    pub fn effective_since(&self) -> Option<OffsetDateTime> {
        if self.full_sync { None } else { self.since }
    }
}
