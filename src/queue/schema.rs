use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS event_queue (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            user_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            correlation_id TEXT,
            created_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending','syncing','synced','failed')),
            retry_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_queue_status ON event_queue(status);
        CREATE INDEX IF NOT EXISTS idx_queue_device_sequence
            ON event_queue(device_id, sequence_number);

        CREATE TABLE IF NOT EXISTS sequence_counters (
            device_id TEXT PRIMARY KEY,
            next_sequence INTEGER NOT NULL
        );
        ",
    )?;

    Ok(())
}
