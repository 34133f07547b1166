use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::events::{EventKind, EventPayload, EventRecord};
use crate::server::{metrics, EventLog};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub workouts_written: u64,
    pub sets_written: u64,
    pub unknown_skipped: u64,
}

#[derive(Debug, Clone)]
struct WorkoutState {
    user_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: &'static str,
}

#[derive(Debug, Clone)]
struct SetState {
    workout_id: Uuid,
    exercise_id: Uuid,
    reps: i64,
    weight: f64,
    completed_at: DateTime<Utc>,
}

/// Deterministic fold of the log into `workouts_projection` and
/// `sets_projection`. Rebuild-only: there is no incremental path, so the
/// tables never need links back into the log beyond the ids they store.
pub struct ProjectionRebuilder<'a> {
    log: &'a EventLog,
}

impl<'a> ProjectionRebuilder<'a> {
    pub fn new(log: &'a EventLog) -> Self {
        Self { log }
    }

    /// Truncate the scoped projections and replay the scoped log in
    /// `(device_id, sequence_number)` order, all in one transaction. Any
    /// error rolls the whole rebuild back.
    pub fn rebuild(&self, scope: Option<Uuid>) -> Result<RebuildStats> {
        let conn = self.log.connection();
        let tx = conn.unchecked_transaction()?;

        match scope {
            Some(user) => {
                conn.execute(
                    "DELETE FROM sets_projection WHERE workout_id IN
                     (SELECT workout_id FROM workouts_projection WHERE user_id = ?1)",
                    params![user.to_string()],
                )?;
                conn.execute(
                    "DELETE FROM workouts_projection WHERE user_id = ?1",
                    params![user.to_string()],
                )?;
            }
            None => {
                conn.execute("DELETE FROM sets_projection", [])?;
                conn.execute("DELETE FROM workouts_projection", [])?;
            }
        }

        let events = self.log.list_events(scope)?;
        let mut stats = RebuildStats::default();

        // Workouts first: sets join against them and cross-device ordering
        // between a workout and its sets is not guaranteed.
        let mut workouts: BTreeMap<Uuid, WorkoutState> = BTreeMap::new();
        for event in &events {
            let Some(kind) = EventKind::parse(&event.event_type) else {
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "skipping unknown event type during rebuild"
                );
                stats.unknown_skipped += 1;
                continue;
            };
            match parse_logged_payload(event, kind)? {
                EventPayload::WorkoutStarted(p) => {
                    workouts.insert(
                        p.workout_id,
                        WorkoutState {
                            user_id: event.user_id,
                            started_at: p.started_at,
                            ended_at: None,
                            status: "in_progress",
                        },
                    );
                }
                EventPayload::WorkoutEnded(p) => match workouts.get_mut(&p.workout_id) {
                    Some(w) => {
                        w.ended_at = Some(p.ended_at);
                        w.status = "completed";
                    }
                    None => {
                        warn!(workout_id = %p.workout_id, "WorkoutEnded for unknown workout");
                    }
                },
                EventPayload::WorkoutCancelled(p) => match workouts.get_mut(&p.workout_id) {
                    Some(w) => w.status = "cancelled",
                    None => {
                        warn!(workout_id = %p.workout_id, "WorkoutCancelled for unknown workout");
                    }
                },
                _ => {}
            }
        }

        let mut sets: BTreeMap<Uuid, SetState> = BTreeMap::new();
        for event in &events {
            let Some(kind) = EventKind::parse(&event.event_type) else {
                continue;
            };
            match parse_logged_payload(event, kind)? {
                EventPayload::SetCompleted(p) => {
                    if !workouts.contains_key(&p.workout_id) {
                        warn!(
                            set_id = %p.set_id,
                            workout_id = %p.workout_id,
                            "SetCompleted for unknown workout"
                        );
                        continue;
                    }
                    sets.insert(
                        p.set_id,
                        SetState {
                            workout_id: p.workout_id,
                            exercise_id: p.exercise_id,
                            reps: p.reps,
                            weight: p.weight,
                            completed_at: p.completed_at,
                        },
                    );
                }
                EventPayload::SetUpdated(p) => match sets.get_mut(&p.set_id) {
                    Some(s) => {
                        if let Some(reps) = p.reps {
                            s.reps = reps;
                        }
                        if let Some(weight) = p.weight {
                            s.weight = weight;
                        }
                        if let Some(completed_at) = p.completed_at {
                            s.completed_at = completed_at;
                        }
                    }
                    None => {
                        warn!(set_id = %p.set_id, "SetUpdated for unknown set");
                    }
                },
                EventPayload::SetDeleted(p) => {
                    if sets.remove(&p.set_id).is_none() {
                        warn!(set_id = %p.set_id, "SetDeleted for unknown set");
                    }
                }
                _ => {}
            }
        }

        for (workout_id, w) in &workouts {
            conn.execute(
                "INSERT INTO workouts_projection
                 (workout_id, user_id, started_at, ended_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    workout_id.to_string(),
                    w.user_id.to_string(),
                    w.started_at.to_rfc3339(),
                    w.ended_at.map(|t| t.to_rfc3339()),
                    w.status,
                ],
            )?;
            stats.workouts_written += 1;
        }
        for (set_id, s) in &sets {
            conn.execute(
                "INSERT INTO sets_projection
                 (set_id, workout_id, exercise_id, reps, weight, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    set_id.to_string(),
                    s.workout_id.to_string(),
                    s.exercise_id.to_string(),
                    s.reps,
                    s.weight,
                    s.completed_at.to_rfc3339(),
                ],
            )?;
            stats.sets_written += 1;
        }

        metrics::rebuild_weekly(conn, scope)?;
        tx.commit()?;
        Ok(stats)
    }
}

fn parse_logged_payload(event: &EventRecord, kind: EventKind) -> Result<EventPayload> {
    EventPayload::parse(kind, &event.payload).map_err(|e| {
        SyncError::Storage(format!(
            "logged event {} has corrupt payload: {e}",
            event.event_id
        ))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkoutSummary {
    pub workout_id: Uuid,
    pub user_id: Uuid,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetSummary {
    pub set_id: Uuid,
    pub workout_id: Uuid,
    pub exercise_id: Uuid,
    pub reps: i64,
    pub weight: f64,
    pub completed_at: String,
}

pub fn list_workouts(log: &EventLog, user_id: Uuid) -> Result<Vec<WorkoutSummary>> {
    let conn = log.connection();
    let mut stmt = conn.prepare(
        "SELECT workout_id, user_id, started_at, ended_at, status
         FROM workouts_projection WHERE user_id = ?1
         ORDER BY started_at DESC",
    )?;
    let rows = stmt
        .query_map(params![user_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(workout, user, started_at, ended_at, status)| {
            Ok(WorkoutSummary {
                workout_id: parse_uuid(&workout)?,
                user_id: parse_uuid(&user)?,
                started_at,
                ended_at,
                status,
            })
        })
        .collect()
}

pub fn list_sets(log: &EventLog, workout_id: Uuid) -> Result<Vec<SetSummary>> {
    let conn = log.connection();
    let mut stmt = conn.prepare(
        "SELECT set_id, workout_id, exercise_id, reps, weight, completed_at
         FROM sets_projection WHERE workout_id = ?1
         ORDER BY completed_at, set_id",
    )?;
    let rows = stmt
        .query_map(params![workout_id.to_string()], read_set_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_set_summary).collect()
}

type RawSetRow = (String, String, String, i64, f64, String);

fn read_set_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSetRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_set_summary(raw: RawSetRow) -> Result<SetSummary> {
    let (set, workout, exercise, reps, weight, completed_at) = raw;
    Ok(SetSummary {
        set_id: parse_uuid(&set)?,
        workout_id: parse_uuid(&workout)?,
        exercise_id: parse_uuid(&exercise)?,
        reps,
        weight,
        completed_at,
    })
}

/// How many of `workout_ids` belong to `user_id`. Callers compare against
/// the requested count to enforce all-or-nothing ownership on batch reads.
pub fn owned_workout_count(log: &EventLog, user_id: Uuid, workout_ids: &[Uuid]) -> Result<usize> {
    if workout_ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "SELECT COUNT(*) FROM workouts_projection
         WHERE user_id = ? AND workout_id IN ({})",
        vec!["?"; workout_ids.len()].join(",")
    );
    let mut bind = vec![user_id.to_string()];
    bind.extend(workout_ids.iter().map(Uuid::to_string));
    let count: i64 = log
        .connection()
        .query_row(&sql, rusqlite::params_from_iter(bind), |row| row.get(0))?;
    Ok(count as usize)
}

/// Sets for several workouts in one query instead of one query per workout.
pub fn list_sets_for_workouts(log: &EventLog, workout_ids: &[Uuid]) -> Result<Vec<SetSummary>> {
    if workout_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT set_id, workout_id, exercise_id, reps, weight, completed_at
         FROM sets_projection WHERE workout_id IN ({})
         ORDER BY completed_at, set_id",
        vec!["?"; workout_ids.len()].join(",")
    );
    let mut stmt = log.connection().prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(workout_ids.iter().map(Uuid::to_string)),
            read_set_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_set_summary).collect()
}

/// Sets for `exercise_id` from the user's most recent workout containing it.
/// Empty when the user has never logged that exercise.
pub fn last_sets_for_exercise(
    log: &EventLog,
    user_id: Uuid,
    exercise_id: Uuid,
) -> Result<Vec<SetSummary>> {
    use rusqlite::OptionalExtension;
    let conn = log.connection();
    let last_workout = conn
        .query_row(
            "SELECT w.workout_id FROM workouts_projection w
             JOIN sets_projection s ON s.workout_id = w.workout_id
             WHERE s.exercise_id = ?1 AND w.user_id = ?2
             ORDER BY w.started_at DESC LIMIT 1",
            params![exercise_id.to_string(), user_id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let Some(workout_id) = last_workout else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT set_id, workout_id, exercise_id, reps, weight, completed_at
         FROM sets_projection
         WHERE workout_id = ?1 AND exercise_id = ?2
         ORDER BY completed_at, set_id",
    )?;
    let rows = stmt
        .query_map(params![workout_id, exercise_id.to_string()], read_set_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_set_summary).collect()
}

pub fn workout_owner(log: &EventLog, workout_id: Uuid) -> Result<Option<Uuid>> {
    use rusqlite::OptionalExtension;
    let owner = log
        .connection()
        .query_row(
            "SELECT user_id FROM workouts_projection WHERE workout_id = ?1",
            params![workout_id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    match owner {
        Some(raw) => Ok(Some(parse_uuid(&raw)?)),
        None => Ok(None),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SyncError::Storage(format!("corrupt uuid '{raw}': {e}")))
}
