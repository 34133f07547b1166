use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::events::validate_payload;
use crate::protocol::SyncEvent;
use crate::server::EventLog;

#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub accepted_count: usize,
    pub rejected_count: usize,
    pub rejected_event_ids: Vec<Uuid>,
    pub last_acked_sequence: Option<i64>,
}

/// Batch ingestion: validate each event individually, then persist the valid
/// remainder in one idempotent transaction.
pub struct SyncService<'a> {
    log: &'a EventLog,
}

impl<'a> SyncService<'a> {
    pub fn new(log: &'a EventLog) -> Self {
        Self { log }
    }

    pub fn sync_events(
        &self,
        device_id: Uuid,
        user_id: Uuid,
        events: &[SyncEvent],
    ) -> Result<SyncSummary> {
        let mut rejected_event_ids = Vec::new();
        let mut valid = Vec::with_capacity(events.len());

        for event in events {
            if event.sequence_number <= 0 {
                warn!(
                    event_id = %event.event_id,
                    sequence_number = event.sequence_number,
                    "rejecting event with non-positive sequence number"
                );
                rejected_event_ids.push(event.event_id);
                continue;
            }
            match validate_payload(&event.event_type, &event.payload) {
                Ok(_) => valid.push(event),
                Err(e) => {
                    warn!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        error = %e,
                        "rejecting event that failed validation"
                    );
                    rejected_event_ids.push(event.event_id);
                }
            }
        }

        let last_acked_sequence = self.log.append_batch(device_id, user_id, &valid)?;

        Ok(SyncSummary {
            accepted_count: valid.len(),
            rejected_count: rejected_event_ids.len(),
            rejected_event_ids,
            last_acked_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(seq: i64) -> SyncEvent {
        SyncEvent {
            event_id: Uuid::new_v4(),
            event_type: "WorkoutStarted".to_string(),
            payload: json!({"workout_id": Uuid::new_v4(), "started_at": "2026-03-01T10:00:00Z"}),
            sequence_number: seq,
            correlation_id: None,
        }
    }

    #[test]
    fn accepts_valid_batch_and_acks_highest_sequence() {
        let log = EventLog::open_in_memory().unwrap();
        let service = SyncService::new(&log);
        let (device, user) = (Uuid::new_v4(), Uuid::new_v4());

        let summary = service
            .sync_events(device, user, &[started(1), started(2), started(3)])
            .unwrap();
        assert_eq!(summary.accepted_count, 3);
        assert_eq!(summary.rejected_count, 0);
        assert_eq!(summary.last_acked_sequence, Some(3));
        assert_eq!(log.count_events().unwrap(), 3);
    }

    #[test]
    fn duplicate_submission_is_a_no_op_with_same_ack() {
        let log = EventLog::open_in_memory().unwrap();
        let service = SyncService::new(&log);
        let (device, user) = (Uuid::new_v4(), Uuid::new_v4());
        let batch = vec![started(1), started(2), started(3)];

        let first = service.sync_events(device, user, &batch).unwrap();
        let second = service.sync_events(device, user, &batch).unwrap();
        assert_eq!(second.accepted_count, 3);
        assert_eq!(second.rejected_count, 0);
        assert_eq!(second.last_acked_sequence, first.last_acked_sequence);
        assert_eq!(log.count_events().unwrap(), 3);
    }

    #[test]
    fn invalid_middle_event_is_rejected_alone() {
        let log = EventLog::open_in_memory().unwrap();
        let service = SyncService::new(&log);
        let (device, user) = (Uuid::new_v4(), Uuid::new_v4());
        let bad = started(0);

        let summary = service
            .sync_events(device, user, &[started(1), bad.clone(), started(3)])
            .unwrap();
        assert_eq!(summary.accepted_count, 2);
        assert_eq!(summary.rejected_count, 1);
        assert_eq!(summary.rejected_event_ids, vec![bad.event_id]);
        assert_eq!(summary.last_acked_sequence, Some(3));
        assert_eq!(log.count_events().unwrap(), 2);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let log = EventLog::open_in_memory().unwrap();
        let service = SyncService::new(&log);
        let mut bad = started(1);
        bad.event_type = "MealLogged".to_string();

        let summary = service
            .sync_events(Uuid::new_v4(), Uuid::new_v4(), &[bad.clone()])
            .unwrap();
        assert_eq!(summary.accepted_count, 0);
        assert_eq!(summary.rejected_event_ids, vec![bad.event_id]);
        assert_eq!(summary.last_acked_sequence, None);
    }

    #[test]
    fn empty_batch_yields_zero_counts_and_null_cursor() {
        let log = EventLog::open_in_memory().unwrap();
        let service = SyncService::new(&log);

        let summary = service
            .sync_events(Uuid::new_v4(), Uuid::new_v4(), &[])
            .unwrap();
        assert_eq!(summary.accepted_count, 0);
        assert_eq!(summary.rejected_count, 0);
        assert_eq!(summary.last_acked_sequence, None);
    }

    #[test]
    fn payload_schema_mismatch_is_rejected() {
        let log = EventLog::open_in_memory().unwrap();
        let service = SyncService::new(&log);
        let bad = SyncEvent {
            event_id: Uuid::new_v4(),
            event_type: "SetCompleted".to_string(),
            payload: json!({"set_id": Uuid::new_v4()}),
            sequence_number: 1,
            correlation_id: None,
        };

        let summary = service
            .sync_events(Uuid::new_v4(), Uuid::new_v4(), &[bad])
            .unwrap();
        assert_eq!(summary.accepted_count, 0);
        assert_eq!(summary.rejected_count, 1);
    }
}
