//! Correlates suspend request ids with the external responses that answer them.
//!
//! A waiter is registered under a request id, the suspend event goes out,
//! and the parked task resumes when `resolve` (or `abort_all`) reaches the
//! id. The answer may arrive on an entirely different connection.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use tether_core::ids::RequestId;

type Slot = oneshot::Sender<Option<Value>>;

#[derive(Default)]
struct Table {
    waiters: HashMap<RequestId, (u64, Slot)>,
    next_generation: u64,
}

/// Per-run registry of pending suspend requests. Clones share the table.
#[derive(Clone, Default)]
pub struct PendingRequests {
    table: Arc<Mutex<Table>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return a waiter for its response.
    ///
    /// Registering an id that is still pending replaces the older waiter,
    /// which then resolves to `None`.
    pub fn register(&self, id: RequestId) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();
        let generation = table.next_generation;
        table.next_generation += 1;
        if table.waiters.insert(id.clone(), (generation, tx)).is_some() {
            warn!(request_id = %id, "request id re-registered while pending");
        }
        Waiter {
            id,
            generation,
            rx,
            table: Arc::clone(&self.table),
        }
    }

    /// Block until `id` is resolved or aborted.
    pub async fn wait(&self, id: RequestId) -> Option<Value> {
        self.register(id).recv().await
    }

    /// Deliver `response` to the waiter for `id`. Returns `false` if nothing
    /// is pending under that id.
    pub fn resolve(&self, id: &RequestId, response: Value) -> bool {
        let entry = self.table.lock().waiters.remove(id);
        match entry {
            Some((_, slot)) => {
                if slot.send(Some(response)).is_err() {
                    debug!(request_id = %id, "waiter gone before response arrived");
                }
                true
            }
            None => {
                warn!(request_id = %id, "resolve for unknown request id");
                false
            }
        }
    }

    pub fn has(&self, id: &RequestId) -> bool {
        self.table.lock().waiters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every pending waiter with `None` and clear the table.
    /// Returns how many waiters were woken.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<_> = self.table.lock().waiters.drain().collect();
        let count = drained.len();
        for (_, (_, slot)) in drained {
            let _ = slot.send(None);
        }
        if count > 0 {
            debug!(count, "aborted pending requests");
        }
        count
    }
}

/// A registered, not yet answered request. Dropping it unregisters the id.
pub struct Waiter {
    id: RequestId,
    generation: u64,
    rx: oneshot::Receiver<Option<Value>>,
    table: Arc<Mutex<Table>>,
}

impl Waiter {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Park until resolved. `None` when aborted.
    pub async fn recv(mut self) -> Option<Value> {
        (&mut self.rx).await.ok().flatten()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let ours = matches!(table.waiters.get(&self.id), Some((g, _)) if *g == self.generation);
        if ours {
            table.waiters.remove(&self.id);
        }
    }
}
