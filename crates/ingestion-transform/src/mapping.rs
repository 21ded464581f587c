use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// Looks up a dotted path (`"a.b.c"`) inside a JSON value, one segment at a time.
pub fn get_path<'a>(record: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Field-mapping tie-break rules: an explicit mapping for a target field always wins
/// over the heuristic guesses, per §4.5.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    /// target envelope field name -> source record path.
    explicit: BTreeMap<String, String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_explicit(mut self, target: impl Into<String>, source_path: impl Into<String>) -> Self {
        self.explicit.insert(target.into(), source_path.into());
        self
    }

    /// Resolve `target` against `record`, preferring the explicit mapping and
    /// falling back to `heuristic_paths` in order.
    pub fn resolve<'a>(
        &self,
        record: &'a JsonValue,
        target: &str,
        heuristic_paths: &[&str],
    ) -> Option<&'a JsonValue> {
        if let Some(path) = self.explicit.get(target) {
            return get_path(record, path);
        }
        heuristic_paths
            .iter()
            .find_map(|path| get_path(record, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_mapping_overrides_heuristic() {
        let record = json!({"id": "heuristic-id", "order_ref": "explicit-id"});
        let mapping = FieldMapping::new().with_explicit("external_id", "order_ref");
        let resolved = mapping.resolve(&record, "external_id", &["id"]);
        assert_eq!(resolved.and_then(JsonValue::as_str), Some("explicit-id"));
    }

    #[test]
    fn falls_back_to_heuristic_when_no_explicit_mapping() {
        let record = json!({"id": "heuristic-id"});
        let mapping = FieldMapping::new();
        let resolved = mapping.resolve(&record, "external_id", &["id"]);
        assert_eq!(resolved.and_then(JsonValue::as_str), Some("heuristic-id"));
    }

    #[test]
    fn nested_path_lookup() {
        let record = json!({"order": {"ref": "nested-id"}});
        assert_eq!(
            get_path(&record, "order.ref").and_then(JsonValue::as_str),
            Some("nested-id")
        );
    }
}
