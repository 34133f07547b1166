use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::events::{validate_payload, EventRecord};
use crate::queue::{schema, QueueRow, QueueStats, QueueStatus, MAX_SYNC_ATTEMPTS};

/// Durable client-side staging for outgoing events. Rows only ever leave
/// through `mark_synced`; everything else is a status transition.
pub struct EventQueue {
    conn: Connection,
}

impl EventQueue {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("create queue db parent dir {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SyncError::Storage(format!("open queue db {}: {e}", path.display())))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Stage a batch in one transaction. Staging the same `event_id` twice is
    /// a no-op: the stored row keeps its status, retry count and sequencing.
    pub fn enqueue(&self, records: &[EventRecord]) -> Result<()> {
        for record in records {
            validate_payload(&record.event_type, &record.payload)?;
        }
        let tx = self.conn.unchecked_transaction()?;
        for record in records {
            tx.execute(
                "INSERT OR IGNORE INTO event_queue
                 (event_id, event_type, payload_json, user_id, device_id,
                  sequence_number, correlation_id, created_at, status, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0)",
                params![
                    record.event_id.to_string(),
                    record.event_type,
                    record.payload.to_string(),
                    record.user_id.to_string(),
                    record.device_id.to_string(),
                    record.sequence_number,
                    record.correlation_id.map(|c| c.to_string()),
                    record.created_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_pending(&self, device_id: Uuid, user_id: Uuid) -> Result<Vec<QueueRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, event_type, payload_json, user_id, device_id,
                    sequence_number, correlation_id, created_at, status, retry_count
             FROM event_queue
             WHERE status = 'pending' AND device_id = ?1 AND user_id = ?2
             ORDER BY sequence_number ASC",
        )?;
        let raw = stmt
            .query_map(
                params![device_id.to_string(), user_id.to_string()],
                read_raw_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawRow::into_queue_row).collect()
    }

    /// Atomic bulk `pending -> syncing`. The only gate that hides events from
    /// `get_pending`, so each event reaches at most one in-flight attempt.
    pub fn mark_syncing(&self, event_ids: &[Uuid]) -> Result<usize> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE event_queue SET status = 'syncing'
             WHERE status = 'pending' AND event_id IN ({})",
            placeholders(event_ids.len())
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(event_ids.iter().map(Uuid::to_string)))?;
        Ok(changed)
    }

    /// Acknowledged by the server: the rows are deleted.
    pub fn mark_synced(&self, event_ids: &[Uuid]) -> Result<usize> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM event_queue WHERE event_id IN ({})",
            placeholders(event_ids.len())
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(event_ids.iter().map(Uuid::to_string)))?;
        Ok(changed)
    }

    /// Increment retry accounting and restore eligibility, or park the row in
    /// `failed` at the strike limit. One statement over the whole id set:
    /// either every row moves or none does.
    pub fn mark_failed(&self, event_ids: &[Uuid]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE event_queue
             SET retry_count = retry_count + 1,
                 status = CASE WHEN retry_count + 1 >= {MAX_SYNC_ATTEMPTS}
                          THEN 'failed' ELSE 'pending' END
             WHERE event_id IN ({})",
            placeholders(event_ids.len())
        );
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(&sql, params_from_iter(event_ids.iter().map(Uuid::to_string)))?;
        tx.commit()?;
        Ok(())
    }

    pub fn reset_failed(&self, user_id: Option<Uuid>) -> Result<usize> {
        let changed = match user_id {
            Some(user) => self.conn.execute(
                "UPDATE event_queue SET status = 'pending', retry_count = 0
                 WHERE status = 'failed' AND user_id = ?1",
                params![user.to_string()],
            )?,
            None => self.conn.execute(
                "UPDATE event_queue SET status = 'pending', retry_count = 0
                 WHERE status = 'failed'",
                [],
            )?,
        };
        Ok(changed)
    }

    /// Identity rewrite during account merge. Touches every status so
    /// parked and in-flight rows follow the new owner too.
    pub fn rewrite_user_id(&self, old: Uuid, new: Uuid) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE event_queue SET user_id = ?2 WHERE user_id = ?1",
            params![old.to_string(), new.to_string()],
        )?;
        Ok(changed)
    }

    /// Rows left in `syncing` by a crash are ambiguous: the server may or may
    /// not have them. Restore to `pending`; server-side idempotency absorbs
    /// the potential duplicate delivery.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE event_queue SET status = 'pending' WHERE status = 'syncing'",
            [],
        )?;
        Ok(changed)
    }

    pub fn stats(&self, user_id: Option<Uuid>) -> Result<QueueStats> {
        let (sql, bind): (&str, Vec<String>) = match user_id {
            Some(user) => (
                "SELECT status, COUNT(*) FROM event_queue WHERE user_id = ?1 GROUP BY status",
                vec![user.to_string()],
            ),
            None => (
                "SELECT status, COUNT(*) FROM event_queue GROUP BY status",
                Vec::new(),
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.total += count;
            match QueueStatus::parse(&status) {
                Some(QueueStatus::Pending) => stats.pending = count,
                Some(QueueStatus::Syncing) => stats.syncing = count,
                Some(QueueStatus::Failed) => stats.failed = count,
                Some(QueueStatus::Synced) | None => {}
            }
        }
        Ok(stats)
    }

    pub(crate) fn max_sequence(&self, device_id: Uuid) -> Result<Option<i64>> {
        let max = self
            .conn
            .query_row(
                "SELECT MAX(sequence_number) FROM event_queue WHERE device_id = ?1",
                params![device_id.to_string()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(max)
    }

    pub(crate) fn sequence_counter(&self, device_id: Uuid) -> Result<Option<i64>> {
        let next = self
            .conn
            .query_row(
                "SELECT next_sequence FROM sequence_counters WHERE device_id = ?1",
                params![device_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(next)
    }

    pub(crate) fn store_sequence_counter(&self, device_id: Uuid, next: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sequence_counters (device_id, next_sequence) VALUES (?1, ?2)
             ON CONFLICT(device_id) DO UPDATE SET next_sequence = excluded.next_sequence",
            params![device_id.to_string(), next],
        )?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

struct RawRow {
    event_id: String,
    event_type: String,
    payload_json: String,
    user_id: String,
    device_id: String,
    sequence_number: i64,
    correlation_id: Option<String>,
    created_at: String,
    status: String,
    retry_count: i64,
}

fn read_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        event_id: row.get(0)?,
        event_type: row.get(1)?,
        payload_json: row.get(2)?,
        user_id: row.get(3)?,
        device_id: row.get(4)?,
        sequence_number: row.get(5)?,
        correlation_id: row.get(6)?,
        created_at: row.get(7)?,
        status: row.get(8)?,
        retry_count: row.get(9)?,
    })
}

impl RawRow {
    fn into_queue_row(self) -> Result<QueueRow> {
        let status = QueueStatus::parse(&self.status)
            .ok_or_else(|| SyncError::Storage(format!("unknown queue status '{}'", self.status)))?;
        Ok(QueueRow {
            record: EventRecord {
                event_id: parse_uuid(&self.event_id)?,
                event_type: self.event_type,
                payload: serde_json::from_str(&self.payload_json).unwrap_or(Value::Null),
                user_id: parse_uuid(&self.user_id)?,
                device_id: parse_uuid(&self.device_id)?,
                sequence_number: self.sequence_number,
                correlation_id: match self.correlation_id {
                    Some(raw) => Some(parse_uuid(&raw)?),
                    None => None,
                },
                created_at: self.created_at,
            },
            status,
            retry_count: self.retry_count,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SyncError::Storage(format!("corrupt uuid '{raw}': {e}")))
}
