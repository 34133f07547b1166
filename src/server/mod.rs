pub mod http;
pub mod log;
pub mod merge;
pub mod metrics;
pub mod projection;
pub mod schema;
pub mod service;

pub use log::EventLog;
pub use projection::{ProjectionRebuilder, RebuildStats};
pub use service::{SyncService, SyncSummary};
