use rusqlite::params;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::server::{EventLog, ProjectionRebuilder};

#[derive(Debug, Clone, Copy)]
pub struct MergeOutcome {
    pub merged_event_count: u64,
}

/// Fold the anonymous identity into the authenticated one. `device_id` and
/// `sequence_number` are never touched, so per-device ordering survives.
/// Safe to repeat: a source identity with no events merges as a zero-count
/// success.
pub fn merge_user_data(
    log: &EventLog,
    anonymous_user: Uuid,
    authenticated_user: Uuid,
) -> Result<MergeOutcome> {
    if anonymous_user == authenticated_user {
        return Err(SyncError::Validation(
            "cannot merge an identity into itself".to_string(),
        ));
    }

    let conn = log.connection();
    let tx = conn.unchecked_transaction()?;

    let overlap = log.sequence_overlap_count(anonymous_user, authenticated_user)?;
    if overlap > 0 {
        return Err(SyncError::MergeConflict(format!(
            "{overlap} (device_id, sequence_number) pair(s) exist under both identities"
        )));
    }

    let events_updated = conn.execute(
        "UPDATE events SET user_id = ?2 WHERE user_id = ?1",
        params![anonymous_user.to_string(), authenticated_user.to_string()],
    )?;
    // Reassign derived rows so the scoped rebuild below sees them; it will
    // rewrite them from the log anyway.
    conn.execute(
        "UPDATE workouts_projection SET user_id = ?2 WHERE user_id = ?1",
        params![anonymous_user.to_string(), authenticated_user.to_string()],
    )?;
    conn.execute(
        "DELETE FROM weekly_metrics WHERE user_id = ?1",
        params![anonymous_user.to_string()],
    )?;
    tx.commit()?;

    info!(
        merged = events_updated,
        from = %anonymous_user,
        to = %authenticated_user,
        "merged anonymous events into authenticated account"
    );

    if events_updated > 0 {
        ProjectionRebuilder::new(log).rebuild(Some(authenticated_user))?;
    }

    Ok(MergeOutcome {
        merged_event_count: events_updated as u64,
    })
}
