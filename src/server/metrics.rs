use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::server::EventLog;

/// Monday of the week containing `dt`.
pub fn week_start(dt: DateTime<Utc>) -> NaiveDate {
    let date = dt.date_naive();
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyMetricsRow {
    pub user_id: Uuid,
    pub week_start: NaiveDate,
    pub total_workouts: i64,
    pub total_volume: f64,
    pub exercises_count: i64,
}

#[derive(Default)]
struct WeekAccumulator {
    total_workouts: i64,
    total_volume: f64,
    exercises: BTreeSet<Uuid>,
}

/// Recompute `weekly_metrics` from the projections, scoped like the rebuild
/// that invokes it. Completed workouts are bucketed by the Monday of their
/// start; volume is Σ reps × weight over their sets.
pub(crate) fn rebuild_weekly(conn: &Connection, scope: Option<Uuid>) -> Result<u64> {
    match scope {
        Some(user) => {
            conn.execute(
                "DELETE FROM weekly_metrics WHERE user_id = ?1",
                params![user.to_string()],
            )?;
        }
        None => {
            conn.execute("DELETE FROM weekly_metrics", [])?;
        }
    }

    let (sql, bind): (&str, Vec<String>) = match scope {
        Some(user) => (
            "SELECT workout_id, user_id, started_at FROM workouts_projection
             WHERE status = 'completed' AND user_id = ?1",
            vec![user.to_string()],
        ),
        None => (
            "SELECT workout_id, user_id, started_at FROM workouts_projection
             WHERE status = 'completed'",
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let workouts = stmt
        .query_map(params_from_iter(bind), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut buckets: BTreeMap<(String, NaiveDate), WeekAccumulator> = BTreeMap::new();
    let mut workout_week: BTreeMap<String, (String, NaiveDate)> = BTreeMap::new();
    for (workout_id, user_id, started_at) in &workouts {
        let started = match DateTime::parse_from_rfc3339(started_at) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                warn!(workout_id = %workout_id, error = %e, "unparseable started_at in projection");
                continue;
            }
        };
        let week = week_start(started);
        let key = (user_id.clone(), week);
        buckets.entry(key.clone()).or_default().total_workouts += 1;
        workout_week.insert(workout_id.clone(), key);
    }

    if !workout_week.is_empty() {
        let ids: Vec<&String> = workout_week.keys().collect();
        let sql = format!(
            "SELECT workout_id, exercise_id, reps, weight FROM sets_projection
             WHERE workout_id IN ({})",
            vec!["?"; ids.len()].join(",")
        );
        let mut stmt = conn.prepare(&sql)?;
        let sets = stmt
            .query_map(params_from_iter(ids), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (workout_id, exercise_id, reps, weight) in sets {
            let Some(key) = workout_week.get(&workout_id) else {
                continue;
            };
            let acc = buckets.entry(key.clone()).or_default();
            acc.total_volume += reps.unwrap_or(0) as f64 * weight.unwrap_or(0.0);
            if let Ok(exercise) = Uuid::parse_str(&exercise_id) {
                acc.exercises.insert(exercise);
            }
        }
    }

    let mut written = 0;
    for ((user_id, week), acc) in &buckets {
        conn.execute(
            "INSERT INTO weekly_metrics
             (user_id, week_start, total_workouts, total_volume, exercises_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                week.to_string(),
                acc.total_workouts,
                acc.total_volume,
                acc.exercises.len() as i64,
            ],
        )?;
        written += 1;
    }
    Ok(written)
}

pub fn list_for_user(log: &EventLog, user_id: Uuid) -> Result<Vec<WeeklyMetricsRow>> {
    let mut stmt = log.connection().prepare(
        "SELECT user_id, week_start, total_workouts, total_volume, exercises_count
         FROM weekly_metrics WHERE user_id = ?1 ORDER BY week_start",
    )?;
    let rows = stmt
        .query_map(params![user_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(user, week, total_workouts, total_volume, exercises_count)| {
            Ok(WeeklyMetricsRow {
                user_id: Uuid::parse_str(&user)
                    .map_err(|e| SyncError::Storage(format!("corrupt uuid '{user}': {e}")))?,
                week_start: week.parse().map_err(|e| {
                    SyncError::Storage(format!("corrupt week_start '{week}': {e}"))
                })?,
                total_workouts,
                total_volume,
                exercises_count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SyncEvent;
    use crate::server::ProjectionRebuilder;
    use serde_json::json;

    #[test]
    fn week_start_is_monday() {
        // 2026-03-04 is a Wednesday
        let wednesday = "2026-03-04T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            week_start(wednesday),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
        let monday = "2026-03-02T00:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            week_start(monday),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }

    fn event(event_type: &str, payload: serde_json::Value, seq: i64) -> SyncEvent {
        SyncEvent {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload,
            sequence_number: seq,
            correlation_id: None,
        }
    }

    #[test]
    fn aggregates_volume_and_distinct_exercises_per_week() {
        let log = EventLog::open_in_memory().unwrap();
        let (device, user) = (Uuid::new_v4(), Uuid::new_v4());
        let workout = Uuid::new_v4();
        let exercise = Uuid::new_v4();
        let events = vec![
            event(
                "WorkoutStarted",
                json!({"workout_id": workout, "started_at": "2026-03-04T09:00:00Z"}),
                1,
            ),
            event(
                "SetCompleted",
                json!({
                    "workout_id": workout, "exercise_id": exercise,
                    "set_id": Uuid::new_v4(), "reps": 10, "weight": 100.0,
                    "completed_at": "2026-03-04T09:10:00Z"
                }),
                2,
            ),
            event(
                "SetCompleted",
                json!({
                    "workout_id": workout, "exercise_id": exercise,
                    "set_id": Uuid::new_v4(), "reps": 5, "weight": 120.0,
                    "completed_at": "2026-03-04T09:20:00Z"
                }),
                3,
            ),
            event(
                "WorkoutEnded",
                json!({"workout_id": workout, "ended_at": "2026-03-04T10:00:00Z"}),
                4,
            ),
        ];
        let refs: Vec<&SyncEvent> = events.iter().collect();
        log.append_batch(device, user, &refs).unwrap();
        ProjectionRebuilder::new(&log).rebuild(None).unwrap();

        let rows = list_for_user(&log, user).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].week_start, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(rows[0].total_workouts, 1);
        assert_eq!(rows[0].total_volume, 10.0 * 100.0 + 5.0 * 120.0);
        assert_eq!(rows[0].exercises_count, 1);
    }

    #[test]
    fn in_progress_workouts_do_not_count() {
        let log = EventLog::open_in_memory().unwrap();
        let (device, user) = (Uuid::new_v4(), Uuid::new_v4());
        let events = vec![event(
            "WorkoutStarted",
            json!({"workout_id": Uuid::new_v4(), "started_at": "2026-03-04T09:00:00Z"}),
            1,
        )];
        let refs: Vec<&SyncEvent> = events.iter().collect();
        log.append_batch(device, user, &refs).unwrap();
        ProjectionRebuilder::new(&log).rebuild(None).unwrap();

        assert!(list_for_user(&log, user).unwrap().is_empty());
    }
}
