//! Append-only journal of every event committed by the clinic store.
//!
//! Entries are written only when a unit of work commits, so a rejected operation
//! leaves no trace here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clinicflow_core::AggregateId;

use crate::store::StoreError;

/// A committed event, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    /// Per-aggregate sequence number (1-based), equal to the aggregate version after apply.
    pub sequence_number: u64,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl JournalEntry {
    /// Capture a typed event and its metadata.
    pub fn from_typed<E>(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        sequence_number: u64,
        event: &E,
    ) -> Result<Self, StoreError>
    where
        E: clinicflow_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| StoreError::Serialization(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            sequence_number,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
