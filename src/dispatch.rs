//! Event fan-out: per-event-name subscribers, a catch-all channel, and the
//! lifecycle signal surface.
//!
//! Records are never handed to subscribers inline with the parser: the
//! worker queues them during a parse step and drains the queue afterwards,
//! so dispatch order is exactly arrival order (FIFO) by construction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StreamError;
use crate::frame::EventRecord;

/// Connection lifecycle signals delivered to lifecycle subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// The stream opened and is being consumed.
    Open,
    /// A non-intentional failure. Reconnection is driven independently;
    /// handling this never blocks or skips it.
    Error(StreamError),
    /// Heartbeat expiry; a forced reconnect follows.
    Warning { message: String },
    /// A reconnect was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// The connection ended for good: `intentional` for user-initiated
    /// close, otherwise a terminal failure such as `max_retries_reached`.
    Closed {
        intentional: bool,
        reason: Option<String>,
    },
}

/// Catch-all notification for records with a non-default event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyEvent {
    pub event: String,
    pub id: Option<String>,
    pub data: String,
}

/// Handle identifying one subscriber; allocated by the client, passed back
/// to unsubscribe.
pub type SubscriberId = u64;

/// Subscriber registry plus the FIFO dispatch queue.
///
/// Owned exclusively by the connection worker; all mutation is serialized
/// through it.
#[derive(Debug, Default)]
pub struct Dispatcher {
    by_event: HashMap<String, Vec<(SubscriberId, mpsc::UnboundedSender<EventRecord>)>>,
    catch_all: Vec<(SubscriberId, mpsc::UnboundedSender<AnyEvent>)>,
    lifecycle: Vec<(SubscriberId, mpsc::UnboundedSender<Lifecycle>)>,
    queue: VecDeque<EventRecord>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one event name. Fan-out within a name
    /// follows registration order.
    pub fn register(
        &mut self,
        id: SubscriberId,
        event: impl Into<String>,
        tx: mpsc::UnboundedSender<EventRecord>,
    ) {
        self.by_event.entry(event.into()).or_default().push((id, tx));
    }

    /// Register a catch-all subscriber: receives every record whose event
    /// name is not the default one.
    pub fn register_any(&mut self, id: SubscriberId, tx: mpsc::UnboundedSender<AnyEvent>) {
        self.catch_all.push((id, tx));
    }

    /// Register a lifecycle-signal subscriber.
    pub fn register_lifecycle(&mut self, id: SubscriberId, tx: mpsc::UnboundedSender<Lifecycle>) {
        self.lifecycle.push((id, tx));
    }

    /// Remove a subscriber from whichever registry holds it.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        for subscribers in self.by_event.values_mut() {
            subscribers.retain(|(sid, _)| *sid != id);
        }
        self.by_event.retain(|_, subscribers| !subscribers.is_empty());
        self.catch_all.retain(|(sid, _)| *sid != id);
        self.lifecycle.retain(|(sid, _)| *sid != id);
    }

    /// Queue a record for delivery. Nothing is sent until [`drain`].
    ///
    /// [`drain`]: Dispatcher::drain
    pub fn enqueue(&mut self, record: EventRecord) {
        self.queue.push_back(record);
    }

    /// Deliver every queued record, in arrival order. Subscribers whose
    /// receiver is gone are pruned.
    pub fn drain(&mut self) {
        while let Some(record) = self.queue.pop_front() {
            debug!(event = %record.event, id = ?record.id, "dispatching record");
            if let Some(subscribers) = self.by_event.get_mut(&record.event) {
                subscribers.retain(|(_, tx)| tx.send(record.clone()).is_ok());
                if subscribers.is_empty() {
                    self.by_event.remove(&record.event);
                }
            }
            if record.is_named() {
                let any = AnyEvent {
                    event: record.event.clone(),
                    id: record.id.clone(),
                    data: record.data.clone(),
                };
                self.catch_all.retain(|(_, tx)| tx.send(any.clone()).is_ok());
            }
        }
    }

    /// Broadcast a lifecycle signal to every lifecycle subscriber.
    pub fn emit(&mut self, signal: Lifecycle) {
        debug!(?signal, "lifecycle signal");
        self.lifecycle
            .retain(|(_, tx)| tx.send(signal.clone()).is_ok());
    }
}
