//! Event Bus - fans domain events out to subscribers.
//!
//! Every subscription owns an [`OverflowBuffer`] created with the bus's
//! [`BufferPolicy`]. Publishing pushes a clone of the event into each buffer
//! and returns immediately, so one slow subscriber never holds up the
//! pipeline or the other subscribers; what it loses when it falls behind is
//! decided by the policy.
//!
//! # Delivery Semantics
//!
//! - A subscription sees only events published after it was created.
//! - All subscriptions see events in publication order.
//! - After [`EventBus::complete`] every subscription ends once drained, and
//!   new subscriptions end immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::{EventBus, consumers::LogConsumer};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let mut subscription = bus.subscribe();
//! let task = bus.on(Arc::new(LogConsumer::new()));
//!
//! while let Some(event) = subscription.recv().await {
//!     println!("{:?}", event.kind());
//! }
//! ```

use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferPolicy, OverflowBuffer, Push};
use crate::consumers::EventConsumer;
use crate::event::DomainEvent;

#[derive(Default)]
struct Registry {
    subscribers: HashMap<u64, Arc<OverflowBuffer<DomainEvent>>>,
    completed: bool,
}

struct Inner {
    registry: Mutex<Registry>,
    policy: BufferPolicy,
    next_id: AtomicU64,
    events_published: AtomicU64,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broadcast bus for [`DomainEvent`]s. Clones share the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Bus with unbounded subscriptions.
    pub fn new() -> Self {
        Self::with_policy(BufferPolicy::unbounded())
    }

    /// Bus whose subscriptions buffer according to `policy`.
    pub fn with_policy(policy: BufferPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                policy,
                next_id: AtomicU64::new(0),
                events_published: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> BufferPolicy {
        self.inner.policy
    }

    /// Deliver an event to every current subscription.
    ///
    /// Returns the number of subscriptions that queued it.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let registry = self.inner.registry();
        if registry.completed {
            debug!(kind = ?event.kind(), "Bus completed, event discarded");
            return 0;
        }

        self.inner.events_published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for (id, buffer) in &registry.subscribers {
            match buffer.push(event.clone()) {
                Push::Accepted => delivered += 1,
                Push::Displaced(discarded) => {
                    debug!(subscription = id, discarded, "Subscription overflowed");
                    delivered += 1;
                }
                Push::Rejected => {
                    debug!(subscription = id, kind = ?event.kind(), "Subscription full, event dropped");
                }
                Push::Closed => {}
            }
        }

        debug!(kind = ?event.kind(), receivers = delivered, "Event published");
        delivered
    }

    /// Open a subscription starting at the next published event.
    pub fn subscribe(&self) -> EventSubscription {
        let buffer = Arc::new(OverflowBuffer::new(self.inner.policy));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.inner.registry();
        if registry.completed {
            buffer.close();
        } else {
            registry.subscribers.insert(id, buffer.clone());
        }
        drop(registry);

        debug!(subscription = id, "New subscription created");
        EventSubscription {
            id,
            buffer,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Run a consumer on its own task for every event published from now on.
    ///
    /// Errors and panics raised by the consumer are logged per event and do
    /// not stop delivery. The task ends when the bus completes.
    pub fn on(&self, consumer: Arc<dyn EventConsumer>) -> JoinHandle<()> {
        let mut subscription = self.subscribe();
        info!(consumer = %consumer.name(), "Attaching consumer");

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let outcome = AssertUnwindSafe(consumer.consume(&event))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(result)) => {
                        debug!(
                            consumer = %consumer.name(),
                            message = %result.message,
                            "Event consumed"
                        );
                    }
                    Ok(Err(e)) => {
                        warn!(
                            consumer = %consumer.name(),
                            kind = ?event.kind(),
                            error = %e,
                            "Consumer failed"
                        );
                    }
                    Err(_) => {
                        error!(
                            consumer = %consumer.name(),
                            kind = ?event.kind(),
                            "Consumer panicked"
                        );
                    }
                }
            }

            info!(consumer = %consumer.name(), "Consumer detached");
        })
    }

    /// End every subscription once it has drained.
    pub fn complete(&self) {
        let mut registry = self.inner.registry();
        if registry.completed {
            return;
        }
        registry.completed = true;
        for buffer in registry.subscribers.values() {
            buffer.close();
        }
        info!(subscribers = registry.subscribers.len(), "Event bus completed");
    }

    pub fn is_completed(&self) -> bool {
        self.inner.registry().completed
    }

    /// Number of live subscriptions, consumers included.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().subscribers.len()
    }

    /// Total events accepted for publication.
    pub fn events_published(&self) -> u64 {
        self.inner.events_published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle for receiving events.
///
/// When dropped, the subscription is removed from the bus.
pub struct EventSubscription {
    id: u64,
    buffer: Arc<OverflowBuffer<DomainEvent>>,
    bus: std::sync::Weak<Inner>,
}

impl EventSubscription {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus has completed and everything buffered
    /// was received.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.buffer.pop().await
    }

    /// Take the next event if one is buffered.
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        self.buffer.try_pop()
    }

    /// Events this subscription lost to its overflow policy.
    pub fn dropped(&self) -> u64 {
        self.buffer.dropped()
    }

    pub fn into_stream(self) -> BoxStream<'static, DomainEvent> {
        stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
        .boxed()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        bus.registry().subscribers.remove(&self.id);
        debug!(subscription = self.id, "Subscription dropped");
    }
}
