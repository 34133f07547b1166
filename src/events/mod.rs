use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    WorkoutStarted,
    WorkoutEnded,
    ExerciseAdded,
    SetCompleted,
    SetUpdated,
    SetDeleted,
    WorkoutCancelled,
}

impl EventKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "WorkoutStarted" => Some(Self::WorkoutStarted),
            "WorkoutEnded" => Some(Self::WorkoutEnded),
            "ExerciseAdded" => Some(Self::ExerciseAdded),
            "SetCompleted" => Some(Self::SetCompleted),
            "SetUpdated" => Some(Self::SetUpdated),
            "SetDeleted" => Some(Self::SetDeleted),
            "WorkoutCancelled" => Some(Self::WorkoutCancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkoutStarted => "WorkoutStarted",
            Self::WorkoutEnded => "WorkoutEnded",
            Self::ExerciseAdded => "ExerciseAdded",
            Self::SetCompleted => "SetCompleted",
            Self::SetUpdated => "SetUpdated",
            Self::SetDeleted => "SetDeleted",
            Self::WorkoutCancelled => "WorkoutCancelled",
        }
    }
}

/// The atomic unit carried through both sides of the system. `event_id` is
/// the idempotency key; `(device_id, sequence_number)` is the replay order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub sequence_number: i64,
    pub correlation_id: Option<Uuid>,
    pub created_at: String,
}

impl EventRecord {
    pub fn new(
        kind: EventKind,
        payload: Value,
        user_id: Uuid,
        device_id: Uuid,
        sequence_number: i64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: kind.as_str().to_string(),
            payload,
            user_id,
            device_id,
            sequence_number,
            correlation_id: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutStartedPayload {
    pub workout_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutEndedPayload {
    pub workout_id: Uuid,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutCancelledPayload {
    pub workout_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseAddedPayload {
    pub workout_id: Uuid,
    pub exercise_id: Uuid,
    pub exercise_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCompletedPayload {
    pub workout_id: Uuid,
    pub exercise_id: Uuid,
    pub set_id: Uuid,
    pub reps: i64,
    pub weight: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetUpdatedPayload {
    pub set_id: Uuid,
    pub reps: Option<i64>,
    pub weight: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDeletedPayload {
    pub set_id: Uuid,
}

/// Typed view of `(event_type, payload)`. Parsing doubles as the schema
/// check at the producing and ingestion boundaries; the projector matches on
/// this exhaustively.
#[derive(Debug, Clone)]
pub enum EventPayload {
    WorkoutStarted(WorkoutStartedPayload),
    WorkoutEnded(WorkoutEndedPayload),
    ExerciseAdded(ExerciseAddedPayload),
    SetCompleted(SetCompletedPayload),
    SetUpdated(SetUpdatedPayload),
    SetDeleted(SetDeletedPayload),
    WorkoutCancelled(WorkoutCancelledPayload),
}

impl EventPayload {
    pub fn parse(kind: EventKind, payload: &Value) -> Result<Self> {
        let parsed = match kind {
            EventKind::WorkoutStarted => {
                Self::WorkoutStarted(from_payload(kind, payload.clone())?)
            }
            EventKind::WorkoutEnded => Self::WorkoutEnded(from_payload(kind, payload.clone())?),
            EventKind::ExerciseAdded => Self::ExerciseAdded(from_payload(kind, payload.clone())?),
            EventKind::SetCompleted => {
                let p: SetCompletedPayload = from_payload(kind, payload.clone())?;
                if p.reps < 0 {
                    return Err(SyncError::Validation(format!(
                        "SetCompleted.reps must be >= 0, got {}",
                        p.reps
                    )));
                }
                if !(p.weight >= 0.0) {
                    return Err(SyncError::Validation(format!(
                        "SetCompleted.weight must be >= 0, got {}",
                        p.weight
                    )));
                }
                Self::SetCompleted(p)
            }
            EventKind::SetUpdated => {
                let p: SetUpdatedPayload = from_payload(kind, payload.clone())?;
                if matches!(p.reps, Some(r) if r < 0) {
                    return Err(SyncError::Validation(
                        "SetUpdated.reps must be >= 0".to_string(),
                    ));
                }
                if matches!(p.weight, Some(w) if !(w >= 0.0)) {
                    return Err(SyncError::Validation(
                        "SetUpdated.weight must be >= 0".to_string(),
                    ));
                }
                Self::SetUpdated(p)
            }
            EventKind::SetDeleted => Self::SetDeleted(from_payload(kind, payload.clone())?),
            EventKind::WorkoutCancelled => {
                Self::WorkoutCancelled(from_payload(kind, payload.clone())?)
            }
        };
        Ok(parsed)
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| {
        SyncError::Validation(format!(
            "{} payload does not match schema: {e}",
            kind.as_str()
        ))
    })
}

/// Boundary check: resolve the kind tag, then parse the payload against its
/// schema. Unknown tags are an `UnknownEventType` error so ingestion can
/// reject them individually.
pub fn validate_payload(event_type: &str, payload: &Value) -> Result<EventPayload> {
    let kind = EventKind::parse(event_type)
        .ok_or_else(|| SyncError::UnknownEventType(event_type.to_string()))?;
    EventPayload::parse(kind, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_known_kind_roundtrip() {
        for kind in [
            EventKind::WorkoutStarted,
            EventKind::WorkoutEnded,
            EventKind::ExerciseAdded,
            EventKind::SetCompleted,
            EventKind::SetUpdated,
            EventKind::SetDeleted,
            EventKind::WorkoutCancelled,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("MealLogged"), None);
    }

    #[test]
    fn validates_set_completed_payload() {
        let payload = json!({
            "workout_id": Uuid::new_v4(),
            "exercise_id": Uuid::new_v4(),
            "set_id": Uuid::new_v4(),
            "reps": 10,
            "weight": 100.0,
            "completed_at": "2026-03-01T10:00:00Z"
        });
        assert!(validate_payload("SetCompleted", &payload).is_ok());
    }

    #[test]
    fn rejects_negative_reps() {
        let payload = json!({
            "workout_id": Uuid::new_v4(),
            "exercise_id": Uuid::new_v4(),
            "set_id": Uuid::new_v4(),
            "reps": -1,
            "weight": 100.0,
            "completed_at": "2026-03-01T10:00:00Z"
        });
        let err = validate_payload("SetCompleted", &payload).unwrap_err();
        assert!(format!("{err}").contains("reps must be >= 0"));
    }

    #[test]
    fn zero_reps_and_weight_are_valid() {
        let payload = json!({
            "workout_id": Uuid::new_v4(),
            "exercise_id": Uuid::new_v4(),
            "set_id": Uuid::new_v4(),
            "reps": 0,
            "weight": 0.0,
            "completed_at": "2026-03-01T10:00:00Z"
        });
        assert!(validate_payload("SetCompleted", &payload).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let payload = json!({"workout_id": Uuid::new_v4()});
        let err = validate_payload("WorkoutStarted", &payload).unwrap_err();
        assert!(format!("{err}").contains("does not match schema"));
    }

    #[test]
    fn set_updated_accepts_partial_fields() {
        let payload = json!({"set_id": Uuid::new_v4(), "weight": 82.5});
        let parsed = validate_payload("SetUpdated", &payload).unwrap();
        match parsed {
            EventPayload::SetUpdated(p) => {
                assert_eq!(p.weight, Some(82.5));
                assert_eq!(p.reps, None);
            }
            other => panic!("unexpected payload variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_its_own_error() {
        let err = validate_payload("MealLogged", &json!({})).unwrap_err();
        assert!(matches!(err, SyncError::UnknownEventType(_)));
    }
}
