//! Sync session handle.
//!
//! Only one session may run at a time. Holding a `Session` means holding
//! the delivery receiver lock; acquiring it never waits. Dropping the
//! session cancels it and clears the active slot on every exit path.

use crate::{HeaderPack, SyncError, SyncResult};
use hsync_network::PeerId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

static SESSION_IDS: AtomicU64 = AtomicU64::new(1);

/// What deliveries and membership changes need to know about the
/// running session.
#[derive(Debug, Clone)]
pub(crate) struct ActiveSession {
    pub id: u64,
    pub master: PeerId,
    pub cancel: CancellationToken,
}

pub(crate) type SessionSlot = Arc<RwLock<Option<ActiveSession>>>;

pub(crate) type DeliveryGuard = OwnedMutexGuard<mpsc::Receiver<HeaderPack>>;

/// Exclusive right to run a sync session.
pub(crate) struct Session {
    id: u64,
    deliveries: Option<DeliveryGuard>,
    cancel: CancellationToken,
    slot: SessionSlot,
}

impl Session {
    /// Claim the session or fail with `Busy` if one is running.
    pub fn acquire(
        receiver: &Arc<Mutex<mpsc::Receiver<HeaderPack>>>,
        slot: &SessionSlot,
        master: PeerId,
    ) -> SyncResult<Self> {
        let mut guard = receiver
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::Busy)?;

        // Leftovers of an earlier session
        while guard.try_recv().is_ok() {}

        let id = SESSION_IDS.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot.write() = Some(ActiveSession {
            id,
            master,
            cancel: cancel.clone(),
        });

        Ok(Self {
            id,
            deliveries: Some(guard),
            cancel,
            slot: slot.clone(),
        })
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The delivery receiver, while the session still owns it.
    pub fn deliveries(&mut self) -> SyncResult<&mut mpsc::Receiver<HeaderPack>> {
        self.deliveries
            .as_deref_mut()
            .ok_or_else(|| SyncError::Internal("delivery receiver already handed off".into()))
    }

    /// Hand the receiver to a fetch task; the busy lock travels with it.
    pub fn take_deliveries(&mut self) -> SyncResult<DeliveryGuard> {
        self.deliveries
            .take()
            .ok_or_else(|| SyncError::Internal("delivery receiver already handed off".into()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        let mut slot = self.slot.write();
        if slot.as_ref().map_or(false, |active| active.id == self.id) {
            *slot = None;
        }
    }
}
