//! Many-producer, single-consumer ordered event bus
//!
//! One bounded FIFO channel carries every [`SessionEvent`]. Producers hold
//! cheap [`EventPublisher`] clones stamped with their connection generation;
//! the session loop owns the only [`EventReceiver`].
//!
//! Backpressure differs by event class. Context notifications are published
//! with [`EventPublisher::notify_context`], which drops the notification when
//! the bus is full because the context store already holds the value. All
//! other events use [`EventPublisher::publish`], which waits for capacity.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use weaver_core::{ContextFact, Error, Result};

use crate::events::{Envelope, SessionEvent};

#[derive(Debug, Default)]
struct Shared {
    /// Last assigned sequence number. Held while the envelope is handed to
    /// the channel so delivery order and sequence order agree.
    last_seq: Mutex<u64>,
    closed: AtomicBool,
}

/// Why a non-blocking publish did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryPublishError {
    Full,
    Closed,
}

/// Owner of the session event channel
pub struct EventBus {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    shared: Arc<Shared>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus holding at most `capacity` undelivered envelopes
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            shared: Arc::new(Shared::default()),
            capacity: capacity.max(1),
        }
    }

    /// Create a bus whose receiver is handed out directly
    pub fn with_receiver(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(Shared::default());
        let receiver = EventReceiver {
            rx,
            shared: Arc::clone(&shared),
        };
        let bus = Self {
            tx,
            rx: Mutex::new(None),
            shared,
            capacity: capacity.max(1),
        };
        (bus, receiver)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publisher stamping envelopes with `generation`
    pub fn publisher(&self, generation: u64) -> EventPublisher {
        EventPublisher {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
            generation,
        }
    }

    /// The single consumption point. Returns `None` once taken.
    pub fn take_receiver(&self) -> Option<EventReceiver> {
        self.rx.lock().take().map(|rx| EventReceiver {
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Reject further publishes and drop anything not yet taken
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(mut rx) = self.rx.lock().take() {
            rx.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Cloneable producer handle
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Envelope>,
    shared: Arc<Shared>,
    generation: u64,
}

impl EventPublisher {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    /// Publish, waiting for capacity. Returns the assigned sequence number.
    pub async fn publish(&self, event: SessionEvent) -> Result<u64> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }
        let permit = self.tx.reserve().await.map_err(|_| Error::ChannelClosed)?;
        Ok(self.send_with(permit, event))
    }

    /// Publish only if there is room right now
    pub fn try_publish(&self, event: SessionEvent) -> std::result::Result<u64, TryPublishError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TryPublishError::Closed);
        }
        match self.tx.try_reserve() {
            Ok(permit) => Ok(self.send_with(permit, event)),
            Err(mpsc::error::TrySendError::Full(())) => Err(TryPublishError::Full),
            Err(mpsc::error::TrySendError::Closed(())) => Err(TryPublishError::Closed),
        }
    }

    /// Announce a stored context fact. Returns false if the notification
    /// was dropped.
    pub fn notify_context(&self, fact: ContextFact) -> bool {
        match self.try_publish(SessionEvent::ContextUpdated(fact)) {
            Ok(_) => true,
            Err(TryPublishError::Full) => {
                metrics::counter!("weaver_bus_dropped_total", "event" => "context_updated")
                    .increment(1);
                tracing::debug!(generation = self.generation, "Bus full, context notification coalesced");
                false
            }
            Err(TryPublishError::Closed) => false,
        }
    }

    fn send_with(&self, permit: mpsc::Permit<'_, Envelope>, event: SessionEvent) -> u64 {
        let mut last = self.shared.last_seq.lock();
        *last += 1;
        let seq = *last;
        permit.send(Envelope {
            seq,
            at: Utc::now(),
            generation: self.generation,
            event,
        });
        seq
    }
}

/// The bus consumption point
pub struct EventReceiver {
    rx: mpsc::Receiver<Envelope>,
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Next envelope, or `None` when the bus is closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.recv().await
    }

    /// Close the bus from the consumer side. Pending publishers fail.
    pub fn close(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}
