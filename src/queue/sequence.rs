use uuid::Uuid;

use crate::error::Result;
use crate::queue::EventQueue;

/// Per-device monotonic sequence source. The next value is cached in memory
/// and written through to `sequence_counters` on every draw, so the counter
/// survives restarts even after a fully-synced queue has been drained.
/// Never derived from the clock.
pub struct SequenceGenerator {
    device_id: Uuid,
    next: i64,
}

impl SequenceGenerator {
    pub fn load(queue: &EventQueue, device_id: Uuid) -> Result<Self> {
        let from_counter = queue.sequence_counter(device_id)?.unwrap_or(1);
        let from_rows = queue.max_sequence(device_id)?.map_or(1, |max| max + 1);
        Ok(Self {
            device_id,
            next: from_counter.max(from_rows),
        })
    }

    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    pub fn peek(&self) -> i64 {
        self.next
    }

    pub fn next(&mut self, queue: &EventQueue) -> Result<i64> {
        let seq = self.next;
        self.next += 1;
        queue.store_sequence_counter(self.device_id, self.next)?;
        Ok(seq)
    }
}
