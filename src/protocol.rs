use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::events::EventRecord;

/// One event as it travels in a sync batch. `created_at` stays client-side;
/// the server stamps its own arrival time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub sequence_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl From<&EventRecord> for SyncEvent {
    fn from(record: &EventRecord) -> Self {
        Self {
            event_id: record.event_id,
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
            sequence_number: record.sequence_number,
            correlation_id: record.correlation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub events: Vec<SyncEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckCursor {
    pub device_id: Uuid,
    pub last_acked_sequence: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub ack_cursor: AckCursor,
    pub accepted_count: usize,
    pub rejected_count: usize,
    #[serde(default)]
    pub rejected_event_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub anonymous_user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResponse {
    pub merged_event_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildResponse {
    pub workouts_written: u64,
    pub sets_written: u64,
    pub duration_ms: u64,
}
