use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Current wire version for the persisted checkpoint payload (§6.4).
pub const CHECKPOINT_WIRE_VERSION: u32 = 1;

/// Durable key→value state keyed by (connector instance, source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub connector_instance_id: String,
    pub source_key: String,
    pub cursor: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub records_processed: u64,
}

impl Checkpoint {
    pub fn storage_key(connector_instance_id: &str, source_key: &str) -> String {
        format!("{connector_instance_id}/{source_key}")
    }

    /// Advance the checkpoint only if `candidate` is strictly newer, never regressing
    /// (§4.8 tie-break: advance only to the maximum timestamp observed so far).
    pub fn advance(&mut self, candidate_cursor: String, candidate_at: OffsetDateTime, records: u64) {
        if candidate_at > self.updated_at {
            self.cursor = candidate_cursor;
            self.updated_at = candidate_at;
        }
        self.records_processed += records;
    }
}

/// Version-tagged wire representation stored as the checkpoint's opaque byte string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointWire {
    pub v: u32,
    pub cursor: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub records_processed: u64,
}

impl From<&Checkpoint> for CheckpointWire {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            v: CHECKPOINT_WIRE_VERSION,
            cursor: checkpoint.cursor.clone(),
            updated_at: checkpoint.updated_at,
            records_processed: checkpoint.records_processed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointWireError {
    #[error("unsupported checkpoint wire version {0}; forcing full sync")]
    UnsupportedVersion(u32),
    #[error("malformed checkpoint payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CheckpointWire {
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointWireError> {
        let wire: CheckpointWire = serde_json::from_slice(bytes)?;
        if wire.v != CHECKPOINT_WIRE_VERSION {
            return Err(CheckpointWireError::UnsupportedVersion(wire.v));
        }
        Ok(wire)
    }

    pub fn encode(&self) -> Vec<u8> {
        // `serde_json` on a struct of primitives/strings cannot fail here.
        serde_json::to_vec(self).expect("checkpoint wire always serializes")
    }

    pub fn into_checkpoint(self, connector_instance_id: String, source_key: String) -> Checkpoint {
        Checkpoint {
            connector_instance_id,
            source_key,
            cursor: self.cursor,
            updated_at: self.updated_at,
            records_processed: self.records_processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn advance_never_regresses_timestamp() {
        let mut checkpoint = Checkpoint {
            connector_instance_id: "inst".into(),
            source_key: "src".into(),
            cursor: "c0".into(),
            updated_at: datetime!(2025-01-01 00:00:02 UTC),
            records_processed: 2,
        };
        checkpoint.advance("c-earlier".into(), datetime!(2025-01-01 00:00:01 UTC), 1);
        assert_eq!(checkpoint.cursor, "c0");
        assert_eq!(checkpoint.records_processed, 3);

        checkpoint.advance("c-later".into(), datetime!(2025-01-01 00:00:04 UTC), 1);
        assert_eq!(checkpoint.cursor, "c-later");
        assert_eq!(checkpoint.updated_at, datetime!(2025-01-01 00:00:04 UTC));
    }

    #[test]
    fn unknown_wire_version_is_rejected() {
        let bytes = br#"{"v":99,"cursor":"x","updated_at":"2025-01-01T00:00:00Z","records_processed":0}"#;
        let err = CheckpointWire::decode(bytes).unwrap_err();
        assert!(matches!(err, CheckpointWireError::UnsupportedVersion(99)));
    }

    #[test]
    fn round_trips_through_bytes() {
        let wire = CheckpointWire {
            v: CHECKPOINT_WIRE_VERSION,
            cursor: "abc".into(),
            updated_at: datetime!(2025-01-01 00:00:00 UTC),
            records_processed: 5,
        };
        let decoded = CheckpointWire::decode(&wire.encode()).unwrap();
        assert_eq!(decoded.cursor, "abc");
        assert_eq!(decoded.records_processed, 5);
    }
}
