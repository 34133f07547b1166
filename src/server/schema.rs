use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            user_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            correlation_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_device_sequence
            ON events(device_id, sequence_number);
        CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id);

        CREATE TABLE IF NOT EXISTS workouts_projection (
            workout_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            status TEXT NOT NULL CHECK(status IN ('in_progress','completed','cancelled'))
        );

        CREATE INDEX IF NOT EXISTS idx_workouts_projection_user
            ON workouts_projection(user_id);

        CREATE TABLE IF NOT EXISTS sets_projection (
            set_id TEXT PRIMARY KEY,
            workout_id TEXT NOT NULL REFERENCES workouts_projection(workout_id),
            exercise_id TEXT NOT NULL,
            reps INTEGER,
            weight REAL,
            completed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sets_projection_workout
            ON sets_projection(workout_id);

        CREATE TABLE IF NOT EXISTS weekly_metrics (
            user_id TEXT NOT NULL,
            week_start TEXT NOT NULL,
            total_workouts INTEGER NOT NULL DEFAULT 0,
            total_volume REAL NOT NULL DEFAULT 0,
            exercises_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, week_start)
        );
        ",
    )?;

    Ok(())
}
