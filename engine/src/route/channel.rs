//! Event channels: one topic, many subscribers.
//!
//! A [`Channel`] is the delivery primitive both routers are built on. It holds a topic
//! identity and an ordered list of subscribers, and delivers an event to every subscriber in
//! subscription order.
//!
//! # Ownership
//!
//! Channels never own subscribers. They keep a [`Weak`] reference to each one; whoever
//! subscribed keeps the [`Arc`]. A subscriber whose last `Arc` is gone is reported as
//! [`Status::Skipped`] on delivery and can be dropped with [`Channel::prune`].
//!
//! ```rust,ignore
//! let audit = Arc::new(|event: &Event<Order>| -> Result<(), Failure> {
//!     println!("audit: {}", event.topic());
//!     Ok(())
//! });
//!
//! let mut channel = Channel::new("orders");
//! channel.subscribe(&audit);
//!
//! let report = channel.deliver(&Event::new("orders", order));
//! assert!(report.all_ok());
//! ```

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use crate::{
    error::Failure,
    event::{Event, Topic},
    outcome::{Report, Status},
    tasks::Executor,
};

/// Something that reacts to events.
///
/// `notify` gets `&self` and the event; per-call state travels in the event payload.
/// Closures of the right shape are subscribers too.
pub trait Subscriber<P>: Send + Sync {
    fn notify(&self, event: &Event<P>) -> Result<(), Failure>;
}

impl<P, F> Subscriber<P> for F
where
    F: Fn(&Event<P>) -> Result<(), Failure> + Send + Sync,
{
    #[inline]
    fn notify(&self, event: &Event<P>) -> Result<(), Failure> {
        self(event)
    }
}

/// Identity of a subscriber, taken from its `Arc` allocation.
///
/// The same `Arc` (or any clone of it) always has the same id. Channels keep a `Weak` to
/// every subscriber, which keeps the allocation, and therefore the id, from being reused
/// while the subscription exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(usize);

impl SubscriberId {
    /// The id of the subscriber behind `subscriber`.
    #[inline]
    pub fn of<S: ?Sized>(subscriber: &Arc<S>) -> Self {
        Self(Arc::as_ptr(subscriber).cast::<()>() as usize)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber@{:#x}", self.0)
    }
}

struct Entry<P> {
    id: SubscriberId,
    target: Weak<dyn Subscriber<P>>,
}

impl<P> Clone for Entry<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: Weak::clone(&self.target),
        }
    }
}

/// A topic plus its subscribers, in subscription order.
pub struct Channel<P> {
    topic: Topic,
    subscribers: Vec<Entry<P>>,
}

impl<P> Channel<P> {
    /// Creates a channel with no subscribers.
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            subscribers: Vec::new(),
        }
    }

    /// The channel's topic.
    #[inline]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Adds a subscriber to the end of the delivery order.
    ///
    /// Subscribing the same subscriber twice is a no-op. Returns `true` if the subscriber was
    /// added.
    pub fn subscribe<S>(&mut self, subscriber: &Arc<S>) -> bool
    where
        S: Subscriber<P> + 'static,
    {
        let id = SubscriberId::of(subscriber);
        if self.contains(id) {
            return false;
        }

        let target: Weak<S> = Arc::downgrade(subscriber);
        let target: Weak<dyn Subscriber<P>> = target;
        self.subscribers.push(Entry { id, target });
        true
    }

    /// Removes a subscriber. Removing one that is not subscribed is a no-op.
    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.iter().position(|entry| entry.id == id) {
            Some(index) => {
                // `remove`, not `swap_remove`: delivery order is subscription order.
                self.subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `id` is subscribed.
    #[inline]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.iter().any(|entry| entry.id == id)
    }

    /// Number of subscriptions, including any whose subscriber has since been dropped.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscriber ids in delivery order.
    pub fn ids(&self) -> impl Iterator<Item = SubscriberId> + '_ {
        self.subscribers.iter().map(|entry| entry.id)
    }

    /// Drops subscriptions whose subscriber no longer exists. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|entry| entry.target.strong_count() > 0);
        before - self.subscribers.len()
    }

    /// Copies the current subscriber list so it can be delivered to without holding on to
    /// the channel.
    pub fn snapshot(&self) -> Snapshot<P> {
        Snapshot {
            topic: self.topic.clone(),
            subscribers: self.subscribers.clone(),
        }
    }

    /// Delivers `event` to every subscriber in subscription order.
    ///
    /// Each subscriber is notified independently: a failure, or a panic, is recorded in the
    /// report and delivery continues with the next subscriber.
    pub fn deliver(&self, event: &Event<P>) -> Report<SubscriberId> {
        deliver(&self.topic, &self.subscribers, event)
    }
}

impl<P> fmt::Debug for Channel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// A point-in-time copy of a channel's subscriber list.
///
/// Routers take a snapshot while holding their map guard and deliver after releasing it, so
/// a subscriber may subscribe or unsubscribe from inside `notify`. Such changes apply to the
/// next delivery, not the one in progress.
pub struct Snapshot<P> {
    topic: Topic,
    subscribers: Vec<Entry<P>>,
}

impl<P> Snapshot<P> {
    #[inline]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers `event` to every subscriber in the snapshot, in subscription order.
    pub fn deliver(&self, event: &Event<P>) -> Report<SubscriberId> {
        deliver(&self.topic, &self.subscribers, event)
    }
}

impl<P: Sync> Snapshot<P> {
    /// Notifies every subscriber concurrently on `executor`.
    ///
    /// The report is in subscription order regardless of completion order. Called from one of
    /// `executor`'s own threads, as when a subscriber publishes again, this delivers inline.
    pub fn deliver_parallel(&self, event: &Event<P>, executor: &Executor) -> Report<SubscriberId> {
        if executor.is_worker_thread() {
            log::trace!("Already on a worker thread, delivering `{}` inline", self.topic);
            return self.deliver(event);
        }

        let results: Vec<_> = executor.scope(|scope| {
            let futures: Vec<_> = self
                .subscribers
                .iter()
                .map(|entry| {
                    let target = entry.target.upgrade();
                    scope.spawn_with_result(move || target.map(|subscriber| notify(&*subscriber, event)))
                })
                .collect();

            futures.into_iter().map(|future| future.wait()).collect()
        });

        let mut report = Report::with_capacity(results.len());
        for (entry, result) in self.subscribers.iter().zip(results) {
            let status = match result {
                Ok(Some(result)) => Status::from(result),
                Ok(None) => Status::Skipped,
                Err(_) => Status::Failed(Failure::new("panicked")),
            };
            log_status(&self.topic, entry.id, &status);
            report.push(entry.id, status);
        }
        report
    }
}

fn deliver<P>(topic: &Topic, subscribers: &[Entry<P>], event: &Event<P>) -> Report<SubscriberId> {
    let mut report = Report::with_capacity(subscribers.len());

    for entry in subscribers {
        let status = match entry.target.upgrade() {
            Some(subscriber) => Status::from(notify(&*subscriber, event)),
            None => Status::Skipped,
        };
        log_status(topic, entry.id, &status);
        report.push(entry.id, status);
    }

    report
}

fn notify<P>(subscriber: &dyn Subscriber<P>, event: &Event<P>) -> Result<(), Failure> {
    panic::catch_unwind(AssertUnwindSafe(|| subscriber.notify(event)))
        .unwrap_or_else(|payload| Err(Failure::from_panic(&*payload)))
}

fn log_status(topic: &Topic, id: SubscriberId, status: &Status) {
    match status {
        Status::Failed(failure) => {
            log::warn!("Delivery to {id} on `{topic}` failed: {failure}")
        }
        Status::Skipped => log::debug!("{id} on `{topic}` was dropped, skipping"),
        Status::Ok => {}
    }
}
