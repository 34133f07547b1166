pub mod schema;
pub mod sequence;
pub mod store;

pub use sequence::SequenceGenerator;
pub use store::EventQueue;

use crate::events::EventRecord;

/// Strike limit: after this many failed sync attempts an event is parked in
/// `failed` until `reset_failed`.
pub const MAX_SYNC_ATTEMPTS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl QueueStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "synced" => Some(Self::Synced),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueRow {
    pub record: EventRecord,
    pub status: QueueStatus,
    pub retry_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub syncing: i64,
    pub failed: i64,
    pub total: i64,
}
