use std::collections::HashMap;

use ingestion_protocol::ConnectorDefinition;

use crate::errors::{ConnectorError, ConnectorResult};

/// Registered connector definitions, keyed by name. A definition is immutable
/// once registered (§ Data Model: "Connector Definition").
#[derive(Default)]
pub struct ConnectorRegistry {
    definitions: HashMap<String, ConnectorDefinition>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ConnectorDefinition) -> ConnectorResult<()> {
        if self.definitions.contains_key(&definition.name) {
            return Err(ConnectorError::Validation(format!(
                "connector definition '{}' is already registered",
                definition.name
            )));
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ConnectorDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestion_protocol::SyncStrategy;
    use serde_json::json;

    fn definition(name: &str) -> ConnectorDefinition {
        ConnectorDefinition {
            name: name.to_string(),
            version: "1".into(),
            config_schema: json!({"properties": {}, "required": []}),
            sync_strategy: SyncStrategy::Pull,
            schedule: None,
        }
    }

    #[test]
    fn registering_the_same_name_twice_is_rejected() {
        let mut registry = ConnectorRegistry::new();
        registry.register(definition("rest-orders")).unwrap();
        let err = registry.register(definition("rest-orders")).unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }
}
