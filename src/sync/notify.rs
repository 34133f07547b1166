use std::sync::mpsc;
use std::sync::Mutex;
use uuid::Uuid;

/// State changes the coordinator publishes. Consumers subscribe and pull at
/// their own pace; a dropped receiver just falls off the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    SyncStarted { batch_size: usize },
    SyncCompleted { synced: usize, failed: usize },
    SyncFailed { error: String },
    IdentityRewritten { from: Uuid, to: Uuid, events: usize },
}

#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<mpsc::Sender<SyncNotice>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SyncNotice> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .expect("notifier subscriber list poisoned")
            .push(tx);
        rx
    }

    pub fn publish(&self, notice: &SyncNotice) {
        let mut subs = self
            .subscribers
            .lock()
            .expect("notifier subscriber list poisoned");
        subs.retain(|tx| tx.send(notice.clone()).is_ok());
    }
}
