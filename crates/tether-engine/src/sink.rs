//! Outbound event queue between a run and its transport.
//!
//! `emit` never blocks: events go onto an unbounded queue the transport
//! drains at its own pace. `suspend` additionally parks the caller on the
//! run's pending-request registry until the correlated response arrives.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tether_core::events::AgentEvent;

use crate::error::SinkError;
use crate::pending::PendingRequests;

/// Producer half. Clones share one queue and one registry.
#[derive(Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Option<AgentEvent>>>>>,
    pending: PendingRequests,
}

/// Consumer half, owned by the transport.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Option<AgentEvent>>,
    finished: bool,
}

impl EventSink {
    pub fn new(pending: PendingRequests) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
                pending,
            },
            EventReceiver {
                rx,
                finished: false,
            },
        )
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Enqueue a fire-and-forget event.
    pub fn emit(&self, event: AgentEvent) -> Result<(), SinkError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            warn!(event = event.event_type(), "emit after sink closed, event dropped");
            return Err(SinkError::Closed);
        };
        tx.send(Some(event)).map_err(|_| SinkError::Closed)
    }

    /// Enqueue a suspend event and park until its request id is answered.
    /// Resolves to `None` when the run is aborted while waiting.
    pub async fn suspend(&self, event: AgentEvent) -> Result<Option<Value>, SinkError> {
        let Some(id) = event.request_id().cloned() else {
            return Err(SinkError::NotSuspendable(event.event_type()));
        };

        // Register before the event is visible so a fast resolve cannot miss.
        let waiter = self.pending.register(id.clone());
        self.emit(event)?;
        debug!(request_id = %id, "suspended");
        let response = waiter.recv().await;
        debug!(request_id = %id, resumed = response.is_some(), "suspend finished");
        Ok(response)
    }

    /// Enqueue `events` followed by the sentinel while holding the sender,
    /// so no other emit can land between them or after them. Fails without
    /// sending anything if the sink is already closed.
    pub fn finish_with<I>(&self, events: I) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = AgentEvent>,
    {
        let Some(tx) = self.tx.lock().take() else {
            debug!("sink already closed, terminal events dropped");
            return Err(SinkError::Closed);
        };
        for event in events {
            tx.send(Some(event)).map_err(|_| SinkError::Closed)?;
        }
        tx.send(None).map_err(|_| SinkError::Closed)
    }

    /// Enqueue the end-of-stream sentinel. Later emits are rejected.
    pub fn close(&self) {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(None);
            }
            None => debug!("sink already closed"),
        }
    }
}

impl EventReceiver {
    /// Next event, or `None` once the sentinel has been read.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Some(event)) => Some(event),
            Some(None) | None => {
                self.finished = true;
                None
            }
        }
    }

    /// Drain everything up to the sentinel.
    pub async fn collect(mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}
