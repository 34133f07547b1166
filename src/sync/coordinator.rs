use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::protocol::{MergeRequest, MergeResponse, SyncEvent, SyncRequest};
use crate::queue::EventQueue;
use crate::sync::journal;
use crate::sync::notify::{Notifier, SyncNotice};
use crate::sync::transport::SyncTransport;

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub synced: usize,
    pub failed: usize,
    pub ok: bool,
    pub message: String,
}

impl SyncOutcome {
    fn busy() -> Self {
        Self {
            synced: 0,
            failed: 0,
            ok: false,
            message: "sync already in progress".to_string(),
        }
    }

    fn empty() -> Self {
        Self {
            synced: 0,
            failed: 0,
            ok: true,
            message: "nothing to sync".to_string(),
        }
    }
}

/// Single-flight end-to-end sync driver. Owns the queue and the transport;
/// the only process-wide state is the in-flight token.
pub struct SyncCoordinator {
    queue: EventQueue,
    transport: Box<dyn SyncTransport>,
    in_flight: AtomicBool,
    notifier: Notifier,
    journal_path: Option<PathBuf>,
}

/// Releases the in-flight token on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    pub fn new(queue: EventQueue, transport: Box<dyn SyncTransport>) -> Self {
        Self {
            queue,
            transport,
            in_flight: AtomicBool::new(false),
            notifier: Notifier::new(),
            journal_path: None,
        }
    }

    pub fn with_journal(mut self, path: PathBuf) -> Self {
        self.journal_path = Some(path);
        self
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn sync(&self, device_id: Uuid, user_id: Uuid) -> Result<SyncOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync attempt rejected: already in progress");
            return Ok(SyncOutcome::busy());
        }
        let _guard = FlightGuard(&self.in_flight);

        // Rows stranded in `syncing` by a previous crash are ambiguous;
        // restore them before deciding what to send.
        let recovered = self.queue.recover_interrupted()?;
        if recovered > 0 {
            info!(recovered, "restored interrupted events to pending");
        }

        let pending = self.queue.get_pending(device_id, user_id)?;
        if pending.is_empty() {
            return Ok(SyncOutcome::empty());
        }

        let event_ids: Vec<Uuid> = pending.iter().map(|r| r.record.event_id).collect();
        self.queue.mark_syncing(&event_ids)?;

        let request = SyncRequest {
            device_id,
            user_id,
            events: pending.iter().map(|r| SyncEvent::from(&r.record)).collect(),
        };
        self.notifier.publish(&SyncNotice::SyncStarted {
            batch_size: request.events.len(),
        });

        let outcome = match self.transport.submit_batch(&request) {
            Ok(response) => {
                let rejected: Vec<Uuid> = response.rejected_event_ids.clone();
                let accepted: Vec<Uuid> = event_ids
                    .iter()
                    .copied()
                    .filter(|id| !rejected.contains(id))
                    .collect();
                self.queue.mark_synced(&accepted)?;
                // Validation rejects surface per-event; route them through
                // retry accounting so they eventually park in `failed`.
                self.queue.mark_failed(&rejected)?;
                info!(
                    synced = accepted.len(),
                    rejected = rejected.len(),
                    last_acked = ?response.ack_cursor.last_acked_sequence,
                    "sync batch acknowledged"
                );
                self.notifier.publish(&SyncNotice::SyncCompleted {
                    synced: accepted.len(),
                    failed: rejected.len(),
                });
                SyncOutcome {
                    synced: accepted.len(),
                    failed: rejected.len(),
                    ok: true,
                    message: format!("synced {} events", accepted.len()),
                }
            }
            Err(e @ (SyncError::Network(_) | SyncError::Timeout(_))) => {
                warn!(error = %e, "sync transport failed; events return to pending");
                self.queue.mark_failed(&event_ids)?;
                self.notifier.publish(&SyncNotice::SyncFailed {
                    error: e.to_string(),
                });
                SyncOutcome {
                    synced: 0,
                    failed: event_ids.len(),
                    ok: false,
                    message: e.to_string(),
                }
            }
            Err(other) => return Err(other),
        };

        if let Some(path) = &self.journal_path {
            if let Err(e) = journal::record_attempt(path, device_id, user_id, &outcome) {
                warn!(error = %e, "failed to append sync journal");
            }
        }
        Ok(outcome)
    }

    /// Client half of the account merge: rewrite local ownership, drain the
    /// queue under the new identity, then ask the server to do the same.
    pub fn merge_account(
        &self,
        device_id: Uuid,
        anonymous_user: Uuid,
        authenticated_user: Uuid,
    ) -> Result<MergeResponse> {
        let rewritten = self
            .queue
            .rewrite_user_id(anonymous_user, authenticated_user)?;
        self.queue.reset_failed(Some(authenticated_user))?;
        self.notifier.publish(&SyncNotice::IdentityRewritten {
            from: anonymous_user,
            to: authenticated_user,
            events: rewritten,
        });
        info!(rewritten, "queue ownership rewritten for merge");

        let outcome = self.sync(device_id, authenticated_user)?;
        if !outcome.ok {
            if outcome.message == "sync already in progress" {
                return Err(SyncError::SyncInProgress);
            }
            return Err(SyncError::Network(format!(
                "pre-merge sync failed: {}",
                outcome.message
            )));
        }

        self.transport.merge_user(
            authenticated_user,
            &MergeRequest {
                anonymous_user_id: anonymous_user,
            },
        )
    }
}
