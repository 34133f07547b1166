use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::sync::coordinator::SyncOutcome;

/// Append one NDJSON line per sync attempt. Purely observational; the queue
/// remains the durable truth.
pub fn record_attempt(
    path: &Path,
    device_id: Uuid,
    user_id: Uuid,
    outcome: &SyncOutcome,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SyncError::Storage(format!("create journal dir {}: {e}", parent.display()))
        })?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SyncError::Storage(format!("open journal {}: {e}", path.display())))?;
    let line = json!({
        "ts": Utc::now().to_rfc3339(),
        "device_id": device_id,
        "user_id": user_id,
        "synced": outcome.synced,
        "failed": outcome.failed,
        "ok": outcome.ok,
        "message": outcome.message,
    });
    writeln!(f, "{line}")
        .map_err(|e| SyncError::Storage(format!("append journal {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_line_per_attempt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("sync.ndjson");
        let outcome = SyncOutcome {
            synced: 2,
            failed: 0,
            ok: true,
            message: "synced 2 events".to_string(),
        };
        record_attempt(&path, Uuid::new_v4(), Uuid::new_v4(), &outcome).unwrap();
        record_attempt(&path, Uuid::new_v4(), Uuid::new_v4(), &outcome).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().all(|l| l.contains("\"synced\":2")));
    }
}
