use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::events::EventRecord;
use crate::protocol::SyncEvent;
use crate::server::schema;

/// Append-only server log plus the projection tables derived from it.
/// The unique constraint on `event_id` is the linearization point; nothing
/// here ever updates a payload.
pub struct EventLog {
    conn: Connection,
}

impl EventLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("create db parent dir {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SyncError::Storage(format!("open server db {}: {e}", path.display())))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Persist a batch of already-validated events in one transaction.
    /// A conflict on `event_id` is not an error; the event counts as
    /// accepted either way (at-least-once delivery, exactly-once effect).
    /// Returns the highest acknowledged sequence for the device, or `None`
    /// for an empty batch.
    pub fn append_batch(
        &self,
        device_id: Uuid,
        user_id: Uuid,
        events: &[&SyncEvent],
    ) -> Result<Option<i64>> {
        if events.is_empty() {
            return Ok(None);
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let mut last_acked: Option<i64> = None;
        for event in events {
            tx.execute(
                "INSERT INTO events
                 (event_id, event_type, payload_json, user_id, device_id,
                  sequence_number, correlation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(event_id) DO NOTHING",
                params![
                    event.event_id.to_string(),
                    event.event_type,
                    event.payload.to_string(),
                    user_id.to_string(),
                    device_id.to_string(),
                    event.sequence_number,
                    event.correlation_id.map(|c| c.to_string()),
                    now,
                ],
            )?;
            if last_acked.is_none_or(|acked| event.sequence_number > acked) {
                last_acked = Some(event.sequence_number);
            }
        }
        tx.commit()?;
        Ok(last_acked)
    }

    /// Full log in replay order, optionally scoped to one user.
    pub fn list_events(&self, user_id: Option<Uuid>) -> Result<Vec<EventRecord>> {
        let (sql, bind): (&str, Vec<String>) = match user_id {
            Some(user) => (
                "SELECT event_id, event_type, payload_json, user_id, device_id,
                        sequence_number, correlation_id, created_at
                 FROM events WHERE user_id = ?1
                 ORDER BY device_id, sequence_number",
                vec![user.to_string()],
            ),
            None => (
                "SELECT event_id, event_type, payload_json, user_id, device_id,
                        sequence_number, correlation_id, created_at
                 FROM events ORDER BY device_id, sequence_number",
                Vec::new(),
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(rusqlite::params_from_iter(bind), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(event_id, event_type, payload, user, device, seq, corr, created_at)| {
                    Ok(EventRecord {
                        event_id: parse_uuid(&event_id)?,
                        event_type,
                        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                        user_id: parse_uuid(&user)?,
                        device_id: parse_uuid(&device)?,
                        sequence_number: seq,
                        correlation_id: match corr {
                            Some(raw) => Some(parse_uuid(&raw)?),
                            None => None,
                        },
                        created_at,
                    })
                },
            )
            .collect()
    }

    pub fn count_events(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_events_for_user(&self, user_id: Uuid) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// `(device_id, sequence_number)` pairs owned by both identities. Any
    /// overlap makes a merge unsound.
    pub(crate) fn sequence_overlap_count(&self, a: Uuid, b: Uuid) -> Result<i64> {
        let count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM events lhs
                 JOIN events rhs ON lhs.device_id = rhs.device_id
                  AND lhs.sequence_number = rhs.sequence_number
                 WHERE lhs.user_id = ?1 AND rhs.user_id = ?2",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(count)
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SyncError::Storage(format!("corrupt uuid '{raw}': {e}")))
}
