//! Keyed mutual exclusion over node ids.
//!
//! Every read-modify-write of an existing node (merge or verification commit)
//! runs under that node's lock. Different nodes never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct NodeLocks {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holder plus waiters. The slot is reclaimed when this reaches zero.
    users: usize,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Released when the guard drops.
    /// Dropping the future while it waits releases its claim on the slot too.
    pub async fn lock(&self, id: Uuid) -> NodeGuard<'_> {
        let ticket = self.enter(id);
        let guard = ticket.mutex.clone().lock_owned().await;
        NodeGuard {
            _guard: guard,
            ticket,
        }
    }

    /// Number of ids with a live lock slot.
    pub fn active(&self) -> usize {
        self.slots.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn enter(&self, id: Uuid) -> Ticket<'_> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(id).or_insert_with(|| Slot {
            mutex: Arc::new(AsyncMutex::new(())),
            users: 0,
        });
        slot.users += 1;
        Ticket {
            id,
            owner: self,
            mutex: slot.mutex.clone(),
        }
    }
}

/// One user's claim on a slot, held from the start of `lock` until the guard drops.
struct Ticket<'a> {
    id: Uuid,
    owner: &'a NodeLocks,
    mutex: Arc<AsyncMutex<()>>,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(&self.id) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.id);
            }
        }
    }
}

pub struct NodeGuard<'a> {
    // Field order: the mutex is released before the ticket gives up the slot.
    _guard: OwnedMutexGuard<()>,
    ticket: Ticket<'a>,
}

impl NodeGuard<'_> {
    pub fn node_id(&self) -> Uuid {
        self.ticket.id
    }
}
