use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::source::SourceEndpointDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    Pull,
    Push,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Schedule {
    Cron { expr: String },
    Interval { millis: u64 },
}

/// Static, registered-once description of a connector. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDefinition {
    pub name: String,
    pub version: String,
    /// JSON Schema describing required configuration; only the `properties` keys
    /// named here are a recognized vocabulary (§9: unknown keys are rejected).
    pub config_schema: JsonValue,
    pub sync_strategy: SyncStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("missing required config key: {0}")]
    MissingRequired(String),
    #[error("unrecognized config key: {0}")]
    UnknownKey(String),
    #[error("config schema must declare a JSON object of properties")]
    MalformedSchema,
}

impl ConnectorDefinition {
    /// Extract the recognized/ required key sets from `config_schema`
    /// (`{"properties": {...}, "required": [...]}` shape).
    fn schema_keys(&self) -> Result<(BTreeSet<String>, BTreeSet<String>), ConfigValidationError> {
        let properties = self
            .config_schema
            .get("properties")
            .and_then(JsonValue::as_object)
            .ok_or(ConfigValidationError::MalformedSchema)?;
        let recognized: BTreeSet<String> = properties.keys().cloned().collect();
        let required: BTreeSet<String> = self
            .config_schema
            .get("required")
            .and_then(JsonValue::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok((recognized, required))
    }

    /// Reject unknown keys and enforce required keys, per §9's "unknown keys MUST
    /// be rejected during schema validation".
    pub fn validate_config(&self, config: &JsonValue) -> Result<(), ConfigValidationError> {
        let (recognized, required) = self.schema_keys()?;
        let object = config
            .as_object()
            .ok_or(ConfigValidationError::MalformedSchema)?;

        for key in object.keys() {
            if !recognized.contains(key) {
                return Err(ConfigValidationError::UnknownKey(key.clone()));
            }
        }
        for key in &required {
            if !object.contains_key(key) {
                return Err(ConfigValidationError::MissingRequired(key.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorInstanceState {
    Initialized,
    Running,
    Paused,
    Errored,
    Terminated,
}

/// One configured deployment of a connector definition against a specific external
/// tenant. Owns exclusively one checkpoint namespace and one credential lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInstance {
    pub id: String,
    pub definition_name: String,
    pub config: JsonValue,
    pub credential_ref: String,
    pub state: ConnectorInstanceState,
    #[serde(default)]
    pub sources: Vec<SourceEndpointDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> ConnectorDefinition {
        ConnectorDefinition {
            name: "rest-orders".into(),
            version: "1".into(),
            config_schema: json!({
                "properties": {
                    "credentials.scheme": {"type": "string"},
                    "rateLimit.requestsPerSecond": {"type": "number"}
                },
                "required": ["credentials.scheme"]
            }),
            sync_strategy: SyncStrategy::Pull,
            schedule: None,
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        let def = definition();
        let err = def
            .validate_config(&json!({"credentials.scheme": "bearer", "bogus": 1}))
            .unwrap_err();
        assert!(matches!(err, ConfigValidationError::UnknownKey(k) if k == "bogus"));
    }

    #[test]
    fn rejects_missing_required_keys() {
        let def = definition();
        let err = def
            .validate_config(&json!({"rateLimit.requestsPerSecond": 5}))
            .unwrap_err();
        assert!(matches!(err, ConfigValidationError::MissingRequired(_)));
    }

    #[test]
    fn accepts_valid_config() {
        let def = definition();
        assert!(
            def.validate_config(&json!({"credentials.scheme": "bearer"}))
                .is_ok()
        );
    }
}
