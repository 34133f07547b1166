pub mod coordinator;
pub mod journal;
pub mod notify;
pub mod transport;

pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use notify::{Notifier, SyncNotice};
pub use transport::{HttpTransport, SyncTransport};
