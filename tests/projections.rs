use serde_json::json;
use uuid::Uuid;

use liftlog::protocol::SyncEvent;
use liftlog::server::projection::{list_sets, list_workouts, WorkoutSummary};
use liftlog::server::{EventLog, ProjectionRebuilder};

fn event(event_type: &str, payload: serde_json::Value, seq: i64) -> SyncEvent {
    SyncEvent {
        event_id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        payload,
        sequence_number: seq,
        correlation_id: None,
    }
}

fn append(log: &EventLog, device: Uuid, user: Uuid, events: &[SyncEvent]) {
    let refs: Vec<&SyncEvent> = events.iter().collect();
    log.append_batch(device, user, &refs).unwrap();
}

fn workout_rows(log: &EventLog, user: Uuid) -> Vec<(Uuid, Option<String>, String)> {
    list_workouts(log, user)
        .unwrap()
        .into_iter()
        .map(|w: WorkoutSummary| (w.workout_id, w.ended_at, w.status))
        .collect()
}

/// Two devices contribute to the same user's history. Arrival order differs
/// between the two logs, per-device sequence order does not; the rebuilt
/// tables must match row for row.
#[test]
fn rebuild_is_invariant_under_arrival_permutations() {
    let user = Uuid::new_v4();
    let (dev_a, dev_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (workout_a, workout_b) = (Uuid::new_v4(), Uuid::new_v4());
    let set_a = Uuid::new_v4();

    let a1 = event(
        "WorkoutStarted",
        json!({"workout_id": workout_a, "started_at": "2026-03-02T08:00:00Z"}),
        1,
    );
    let a2 = event(
        "SetCompleted",
        json!({
            "workout_id": workout_a, "exercise_id": Uuid::new_v4(), "set_id": set_a,
            "reps": 10, "weight": 100.0, "completed_at": "2026-03-02T08:10:00Z"
        }),
        2,
    );
    let a3 = event(
        "WorkoutEnded",
        json!({"workout_id": workout_a, "ended_at": "2026-03-02T09:00:00Z"}),
        3,
    );
    let b1 = event(
        "WorkoutStarted",
        json!({"workout_id": workout_b, "started_at": "2026-03-03T08:00:00Z"}),
        1,
    );
    let b2 = event(
        "WorkoutCancelled",
        json!({"workout_id": workout_b}),
        2,
    );

    // arrival order 1: device A first, then device B
    let log1 = EventLog::open_in_memory().unwrap();
    append(&log1, dev_a, user, &[a1.clone(), a2.clone(), a3.clone()]);
    append(&log1, dev_b, user, &[b1.clone(), b2.clone()]);

    // arrival order 2: interleaved batches, B ahead of A
    let log2 = EventLog::open_in_memory().unwrap();
    append(&log2, dev_b, user, &[b1.clone()]);
    append(&log2, dev_a, user, &[a1.clone()]);
    append(&log2, dev_b, user, &[b2.clone()]);
    append(&log2, dev_a, user, &[a2.clone(), a3.clone()]);

    let stats1 = ProjectionRebuilder::new(&log1).rebuild(None).unwrap();
    let stats2 = ProjectionRebuilder::new(&log2).rebuild(None).unwrap();
    assert_eq!(stats1, stats2);

    assert_eq!(workout_rows(&log1, user), workout_rows(&log2, user));
    let sets1 = list_sets(&log1, workout_a).unwrap();
    let sets2 = list_sets(&log2, workout_a).unwrap();
    assert_eq!(sets1.len(), sets2.len());
    for (s1, s2) in sets1.iter().zip(&sets2) {
        assert_eq!(s1.set_id, s2.set_id);
        assert_eq!(s1.reps, s2.reps);
        assert_eq!(s1.weight, s2.weight);
        assert_eq!(s1.completed_at, s2.completed_at);
    }
}

/// A set logged from a second device lands even when its replay position
/// precedes the workout it belongs to; the reducer never depends on
/// cross-device ordering.
#[test]
fn cross_device_sets_attach_to_workouts_from_other_devices() {
    let user = Uuid::new_v4();
    // device ids chosen so the set-bearing device replays first
    let dev_early = Uuid::parse_str("00000000-0000-0000-0000-0000000000aa").unwrap();
    let dev_late = Uuid::parse_str("00000000-0000-0000-0000-0000000000bb").unwrap();
    let workout = Uuid::new_v4();
    let set = Uuid::new_v4();

    let log = EventLog::open_in_memory().unwrap();
    append(
        &log,
        dev_early,
        user,
        &[event(
            "SetCompleted",
            json!({
                "workout_id": workout, "exercise_id": Uuid::new_v4(), "set_id": set,
                "reps": 6, "weight": 90.0, "completed_at": "2026-03-02T08:10:00Z"
            }),
            1,
        )],
    );
    append(
        &log,
        dev_late,
        user,
        &[event(
            "WorkoutStarted",
            json!({"workout_id": workout, "started_at": "2026-03-02T08:00:00Z"}),
            1,
        )],
    );

    let stats = ProjectionRebuilder::new(&log).rebuild(None).unwrap();
    assert_eq!(stats.workouts_written, 1);
    assert_eq!(stats.sets_written, 1);
    assert_eq!(list_sets(&log, workout).unwrap()[0].set_id, set);
}

#[test]
fn unknown_event_types_survive_in_the_log_but_not_the_projections() {
    let user = Uuid::new_v4();
    let device = Uuid::new_v4();
    let workout = Uuid::new_v4();

    let log = EventLog::open_in_memory().unwrap();
    append(
        &log,
        device,
        user,
        &[
            event(
                "WorkoutStarted",
                json!({"workout_id": workout, "started_at": "2026-03-02T08:00:00Z"}),
                1,
            ),
            // written by a future schema version
            event("RestTimerElapsed", json!({"seconds": 90}), 2),
            event(
                "WorkoutEnded",
                json!({"workout_id": workout, "ended_at": "2026-03-02T09:00:00Z"}),
                3,
            ),
        ],
    );

    let stats = ProjectionRebuilder::new(&log).rebuild(None).unwrap();
    assert_eq!(stats.unknown_skipped, 1);
    assert_eq!(stats.workouts_written, 1);
    assert_eq!(log.count_events().unwrap(), 3);
    assert_eq!(workout_rows(&log, user)[0].2, "completed");
}

#[test]
fn scoped_rebuild_never_touches_other_scopes() {
    // two users, rebuild scoped to one; the other's rows are never touched
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    let log = EventLog::open_in_memory().unwrap();
    let workout_a = Uuid::new_v4();
    let workout_b = Uuid::new_v4();
    append(
        &log,
        Uuid::new_v4(),
        user_a,
        &[event(
            "WorkoutStarted",
            json!({"workout_id": workout_a, "started_at": "2026-03-02T08:00:00Z"}),
            1,
        )],
    );
    append(
        &log,
        Uuid::new_v4(),
        user_b,
        &[event(
            "WorkoutStarted",
            json!({"workout_id": workout_b, "started_at": "2026-03-02T08:00:00Z"}),
            1,
        )],
    );

    ProjectionRebuilder::new(&log).rebuild(None).unwrap();
    ProjectionRebuilder::new(&log).rebuild(Some(user_a)).unwrap();
    assert_eq!(workout_rows(&log, user_a).len(), 1);
    assert_eq!(workout_rows(&log, user_b).len(), 1);
}
