//! Fan-out of invocation events to `Admin.Logging` subscribers.
//!
//! Every authorized call is published once into the [`EventHub`]. A single
//! relay task reads the ingestion channel and copies each event (by `Arc`)
//! into the bounded queue of every subscriber registered at the time the
//! event was published.
//!
//! ```text
//!  interceptor ─┐                          ┌─► [queue S1] ─► Logging stream 1
//!  interceptor ─┼─► ingestion ─► relay ────┼─► [queue S2] ─► Logging stream 2
//!  interceptor ─┘   (seq, event)           └─► [queue SN] ─► Logging stream N
//! ```
//!
//! ## Guarantees
//!
//! - Sequence numbers are assigned under the registry lock, so every
//!   subscriber observes the same total order.
//! - A subscriber receives exactly the events published after it registered.
//! - Publishing never waits on a subscriber. A subscriber whose queue is full
//!   is evicted: its stream yields [`Error::SubscriberLagged`] after the
//!   buffered events and ends. Other subscribers are unaffected.
//! - Shutdown marks the hub closed and detaches every subscriber in one
//!   critical section. Registrations that lose the race are refused with
//!   [`Error::ServiceShutdown`]; those that win it are closed by it.

use crate::server::telemetry::{
    decrement_log_subscribers, increment_log_subscribers, increment_subscribers_evicted,
};
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll, ready};
use core::time::Duration;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warden_core::{Error, Result, types::InvocationEvent};

type Sequenced = (u64, Arc<InvocationEvent>);

/// Sending half of one subscriber queue.
#[derive(Clone)]
struct Slot {
    tx: mpsc::Sender<Arc<InvocationEvent>>,
    /// First sequence number this subscriber may observe.
    since: u64,
    evicted: Arc<AtomicBool>,
}

struct Registry {
    subscribers: HashMap<u64, Slot>,
    next_id: u64,
    next_seq: u64,
    closed: bool,
    ingress: mpsc::UnboundedSender<Sequenced>,
}

struct Shared {
    registry: Mutex<Registry>,
    capacity: usize,
}

impl Shared {
    fn unregister(&self, id: u64) -> bool {
        self.registry.lock().subscribers.remove(&id).is_some()
    }

    fn snapshot(&self) -> Vec<(u64, Slot)> {
        self.registry
            .lock()
            .subscribers
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect()
    }

    /// Marks the hub closed and detaches every subscriber.
    fn close(&self) -> Vec<(u64, Slot)> {
        let mut registry = self.registry.lock();
        registry.closed = true;
        registry.subscribers.drain().collect()
    }

    fn deliver(&self, slots: &[(u64, Slot)], seq: u64, event: &Arc<InvocationEvent>) {
        for (id, slot) in slots {
            if seq < slot.since {
                continue;
            }

            match slot.tx.try_send(Arc::clone(event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.evicted.store(true, Ordering::Release);
                    if self.unregister(*id) {
                        increment_subscribers_evicted();
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Log subscriber {id} evicted: queue full");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.unregister(*id);
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Log subscriber {id} already gone");
                }
            }
        }
    }
}

/// Broadcast hub for [`InvocationEvent`]s.
///
/// Cheap to clone; all clones share one registry and one relay task.
#[derive(Clone)]
pub struct EventHub {
    shared: Arc<Shared>,
    relay: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl EventHub {
    /// Creates a hub whose subscriber queues hold `capacity` events and spawns
    /// its relay task. The hub closes when `shutdown_token` is cancelled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        capacity: usize,
        shutdown_timeout: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (ingress, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry {
                subscribers: HashMap::new(),
                next_id: 0,
                next_seq: 0,
                closed: false,
                ingress,
            }),
            capacity: capacity.max(1),
        });

        let relay = tokio::spawn(relay_loop(
            Arc::clone(&shared),
            rx,
            shutdown_token.clone(),
        ));

        Self {
            shared,
            relay: Arc::new(Mutex::new(Some(relay))),
            shutdown_token,
            shutdown_timeout,
        }
    }

    /// Registers a new subscriber that will observe every event published
    /// from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the hub has closed.
    pub fn register(&self) -> Result<LogSubscription> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let evicted = Arc::new(AtomicBool::new(false));

        let id = {
            let mut registry = self.shared.registry.lock();
            if registry.closed {
                return Err(Error::ServiceShutdown);
            }
            let id = registry.next_id;
            registry.next_id += 1;
            let since = registry.next_seq;
            registry.subscribers.insert(
                id,
                Slot {
                    tx,
                    since,
                    evicted: Arc::clone(&evicted),
                },
            );
            id
        };

        increment_log_subscribers();
        #[cfg(feature = "tracing")]
        tracing::debug!("Log subscriber {id} registered");

        Ok(LogSubscription {
            id,
            rx,
            evicted,
            shared: Arc::clone(&self.shared),
            finished: false,
        })
    }

    /// Publishes an event to every registered subscriber. A no-op once the
    /// hub has closed.
    pub fn publish(&self, event: InvocationEvent) {
        let mut registry = self.shared.registry.lock();
        if registry.closed {
            return;
        }
        let seq = registry.next_seq;
        registry.next_seq += 1;
        if registry.ingress.send((seq, Arc::new(event))).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Relay stopped; dropping event {seq}");
        }
    }

    /// Removes a subscriber. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: u64) {
        self.shared.unregister(id);
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.lock().subscribers.len()
    }

    /// Returns `true` once the hub refuses new subscribers.
    pub fn is_closed(&self) -> bool {
        self.shared.registry.lock().closed
    }

    /// Closes the hub: cancels the shutdown token, waits (up to the
    /// configured timeout) for the relay to deliver every event already
    /// published, and detaches all subscribers so their streams end.
    ///
    /// Safe to call more than once and concurrently with [`register`].
    ///
    /// [`register`]: EventHub::register
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();

        let relay = self.relay.lock().take();
        if let Some(relay) = relay {
            match tokio::time::timeout(self.shutdown_timeout, relay).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Event relay stopped");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Event relay failed: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Event relay did not stop within {:?}", self.shutdown_timeout);
                }
            }
        }

        // Covers a relay that panicked or timed out.
        self.shared.close();
    }
}

/// Delivers published events until the token is cancelled, then closes the
/// hub and flushes whatever was published before the close.
async fn relay_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Sequenced>,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Event relay started");

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some((seq, event)) => {
                    let slots = shared.snapshot();
                    shared.deliver(&slots, seq, &event);
                }
                None => break,
            },
        }
    }

    // Publishing enqueues under the registry lock, so once `close` returns
    // nothing new can arrive and `try_recv` sees every remaining event.
    let slots = shared.close();
    while let Ok((seq, event)) = rx.try_recv() {
        shared.deliver(&slots, seq, &event);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Event relay closed {} subscribers", slots.len());
}

/// Receiving half of one `Admin.Logging` subscription.
///
/// Yields events in publication order. Ends when the hub shuts down; yields a
/// final [`Error::SubscriberLagged`] first if the subscriber was evicted.
/// Dropping the subscription unregisters it.
pub struct LogSubscription {
    id: u64,
    rx: mpsc::Receiver<Arc<InvocationEvent>>,
    evicted: Arc<AtomicBool>,
    shared: Arc<Shared>,
    finished: bool,
}

impl LogSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for LogSubscription {
    type Item = Result<Arc<InvocationEvent>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(event) => Poll::Ready(Some(Ok(event))),
            None => {
                self.finished = true;
                if self.evicted.load(Ordering::Acquire) {
                    Poll::Ready(Some(Err(Error::SubscriberLagged)))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.shared.unregister(self.id);
        decrement_log_subscribers();
        #[cfg(feature = "tracing")]
        tracing::debug!("Log subscriber {} unregistered", self.id);
    }
}
