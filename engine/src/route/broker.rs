//! Broker router: decentralized publish/subscribe.
//!
//! Each topic has its own [`Channel`], and publishing delivers straight to that channel's
//! subscribers. The broker knows nothing about payloads and keeps no routing table.
//!
//! ```rust,ignore
//! let broker = Broker::new();
//! broker.subscribe("orders", &billing);
//! broker.subscribe("orders", &shipping);
//!
//! let report = broker.publish(&Event::new("orders", order));
//! assert_eq!(report.len(), 2);
//! ```

use std::{convert::Infallible, fmt, sync::Arc};

use dashmap::DashMap;

use crate::{
    event::{Event, Topic},
    outcome::Report,
    tasks::Executor,
};

use super::{
    Router,
    channel::{Channel, Snapshot, Subscriber, SubscriberId},
};

/// Publish/subscribe without a central router.
///
/// Channels are created by the first subscription to a topic and removed when their last
/// subscriber unsubscribes. Publishing to a topic nobody subscribes to is not an error; the
/// report is simply empty.
pub struct Broker<P> {
    channels: DashMap<Topic, Channel<P>>,
}

impl<P> Broker<P> {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribes to `topic`, creating its channel if needed.
    ///
    /// Returns `false` if the subscriber was already subscribed to `topic`.
    pub fn subscribe<S>(&self, topic: impl Into<Topic>, subscriber: &Arc<S>) -> bool
    where
        S: Subscriber<P> + 'static,
    {
        let topic = topic.into();
        let added = self
            .channels
            .entry(topic.clone())
            .or_insert_with(|| Channel::new(topic.clone()))
            .subscribe(subscriber);

        if added {
            log::debug!("{} subscribed to `{topic}`", SubscriberId::of(subscriber));
        }
        added
    }

    /// Unsubscribes from `topic`, dropping the channel if it becomes empty.
    ///
    /// Returns `false` if the subscriber was not subscribed to `topic`.
    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) -> bool {
        let removed = self
            .channels
            .get_mut(topic)
            .is_some_and(|mut channel| channel.unsubscribe(id));

        if removed {
            self.channels.remove_if(topic, |_, channel| channel.is_empty());
            log::debug!("{id} unsubscribed from `{topic}`");
        }
        removed
    }

    /// Delivers `event` to every subscriber of its topic, in subscription order.
    ///
    /// Subscribers may subscribe or unsubscribe while being notified; the change applies to
    /// the next publish.
    pub fn publish(&self, event: &Event<P>) -> Report<SubscriberId> {
        match self.snapshot(event.topic()) {
            Some(snapshot) => snapshot.deliver(event),
            None => {
                log::trace!("No subscribers for `{}`", event.topic());
                Report::new()
            }
        }
    }

    /// Topics that currently have a channel.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<_> = self.channels.iter().map(|entry| entry.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Number of subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels.get(topic).map_or(0, |channel| channel.len())
    }

    /// Returns `true` if `id` is subscribed to `topic`.
    pub fn is_subscribed(&self, topic: &str, id: SubscriberId) -> bool {
        self.channels
            .get(topic)
            .is_some_and(|channel| channel.contains(id))
    }

    /// Drops subscriptions whose subscriber no longer exists, and any channel left empty.
    /// Returns how many subscriptions were dropped.
    pub fn prune(&self) -> usize {
        let mut pruned = 0;
        self.channels.retain(|_, channel| {
            pruned += channel.prune();
            !channel.is_empty()
        });
        pruned
    }

    fn snapshot(&self, topic: &Topic) -> Option<Snapshot<P>> {
        // The guard is released when this returns, before anyone is notified.
        self.channels.get(topic).map(|channel| channel.snapshot())
    }
}

impl<P: Sync> Broker<P> {
    /// Like [`publish`](Self::publish), but notifies subscribers concurrently on `executor`.
    ///
    /// The report is still in subscription order.
    pub fn publish_parallel(&self, event: &Event<P>, executor: &Executor) -> Report<SubscriberId> {
        match self.snapshot(event.topic()) {
            Some(snapshot) => snapshot.deliver_parallel(event, executor),
            None => Report::new(),
        }
    }
}

impl<P> Default for Broker<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Router<P> for Broker<P> {
    type Receipt = Report<SubscriberId>;
    type Error = Infallible;

    fn accept(&self, event: Event<P>) -> Result<Self::Receipt, Infallible> {
        Ok(self.publish(&event))
    }
}

impl<P> fmt::Debug for Broker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("topics", &self.topics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, atomic::AtomicUsize, atomic::Ordering},
        thread,
    };

    use crate::{error::Failure, outcome::Status};

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(name: &'static str, log: &Log) -> Arc<impl Subscriber<String> + 'static> {
        let log = Arc::clone(log);
        Arc::new(move |event: &Event<String>| -> Result<(), Failure> {
            log.lock().unwrap().push(format!("{name}:{}", event.payload()));
            Ok(())
        })
    }

    // ==================== Publish ====================

    #[test]
    fn publish_delivers_in_subscription_order() {
        let broker = Broker::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);
        let s2 = recorder("s2", &log);
        broker.subscribe("orders", &s1);
        broker.subscribe("orders", &s2);

        let report = broker.publish(&Event::new("orders", "e".to_owned()));

        assert_eq!(*log.lock().unwrap(), vec!["s1:e", "s2:e"]);
        let ids: Vec<_> = report.iter().map(|outcome| outcome.id).collect();
        assert_eq!(ids, vec![SubscriberId::of(&s1), SubscriberId::of(&s2)]);
        assert!(report.all_ok());
    }

    #[test]
    fn publish_to_topic_without_subscribers_is_empty() {
        let broker = Broker::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);
        broker.subscribe("orders", &s1);

        let report = broker.publish(&Event::new("invoices", "e".to_owned()));

        assert!(report.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn publish_only_reaches_exact_topic() {
        let broker = Broker::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);
        broker.subscribe("orders", &s1);

        assert!(broker.publish(&Event::new("orders.urgent", "e".to_owned())).is_empty());
    }

    #[test]
    fn double_subscribe_delivers_once() {
        let broker = Broker::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);

        assert!(broker.subscribe("orders", &s1));
        assert!(!broker.subscribe("orders", &s1));
        broker.publish(&Event::new("orders", "e".to_owned()));

        assert_eq!(*log.lock().unwrap(), vec!["s1:e"]);
    }

    #[test]
    fn publish_collects_failures_and_keeps_going() {
        let broker = Broker::new();
        let log = Log::default();
        let failing =
            Arc::new(|_: &Event<String>| -> Result<(), Failure> { Err("mailbox full".into()) });
        let s2 = recorder("s2", &log);
        broker.subscribe("orders", &failing);
        broker.subscribe("orders", &s2);

        let report = broker.publish(&Event::new("orders", "e".to_owned()));

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures, vec![(&SubscriberId::of(&failing), &Failure::new("mailbox full"))]);
        assert_eq!(*log.lock().unwrap(), vec!["s2:e"]);
    }

    #[test]
    fn dropped_subscriber_is_skipped() {
        let broker = Broker::new();
        let log = Log::default();
        broker.subscribe("orders", &recorder("gone", &log));

        let report = broker.publish(&Event::new("orders", "e".to_owned()));
        assert_eq!(report.statuses().cloned().collect::<Vec<_>>(), vec![Status::Skipped]);

        assert_eq!(broker.prune(), 1);
        assert!(broker.topics().is_empty());
    }

    #[test]
    fn router_accept_publishes() {
        let broker = Broker::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);
        broker.subscribe("orders", &s1);

        let Ok(report) = broker.accept(Event::new("orders", "e".to_owned()));
        assert_eq!(report.ok_count(), 1);
    }

    // ==================== Subscriptions ====================

    #[test]
    fn unsubscribe_removes_empty_channels() {
        let broker = Broker::<String>::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);
        let s2 = recorder("s2", &log);
        broker.subscribe("orders", &s1);
        broker.subscribe("orders", &s2);
        broker.subscribe("invoices", &s1);

        assert!(broker.unsubscribe("orders", SubscriberId::of(&s1)));
        assert_eq!(broker.subscriber_count("orders"), 1);
        assert!(!broker.is_subscribed("orders", SubscriberId::of(&s1)));
        assert!(broker.is_subscribed("invoices", SubscriberId::of(&s1)));

        assert!(broker.unsubscribe("orders", SubscriberId::of(&s2)));
        assert_eq!(broker.topics(), vec![Topic::new("invoices")]);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let broker = Broker::<String>::new();
        let log = Log::default();
        let s1 = recorder("s1", &log);

        assert!(!broker.unsubscribe("orders", SubscriberId::of(&s1)));
        broker.subscribe("orders", &s1);
        assert!(!broker.unsubscribe("invoices", SubscriberId::of(&s1)));
        assert_eq!(broker.subscriber_count("orders"), 1);
    }

    #[test]
    fn subscriber_may_subscribe_during_delivery() {
        let broker = Arc::new(Broker::<String>::new());
        let log = Log::default();
        let late = recorder("late", &log);

        let joiner = {
            let broker = Arc::downgrade(&broker);
            let late = Arc::clone(&late);
            Arc::new(move |_: &Event<String>| -> Result<(), Failure> {
                if let Some(broker) = broker.upgrade() {
                    broker.subscribe("orders", &late);
                }
                Ok(())
            })
        };
        broker.subscribe("orders", &joiner);

        // The new subscription applies to the next publish, not this one.
        let first = broker.publish(&Event::new("orders", "1".to_owned()));
        assert_eq!(first.len(), 1);
        assert!(log.lock().unwrap().is_empty());

        let second = broker.publish(&Event::new("orders", "2".to_owned()));
        assert_eq!(second.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["late:2"]);
    }

    // ==================== Concurrency ====================

    #[test]
    fn publish_parallel_notifies_everyone() {
        let broker = Broker::<String>::new();
        let executor = Executor::new(3);
        let count = Arc::new(AtomicUsize::new(0));
        let subscribers: Vec<_> = (0..6)
            .map(|_| {
                let count = Arc::clone(&count);
                Arc::new(move |_: &Event<String>| -> Result<(), Failure> {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for subscriber in &subscribers {
            broker.subscribe("orders", subscriber);
        }

        let report = broker.publish_parallel(&Event::new("orders", "e".to_owned()), &executor);

        assert_eq!(report.ok_count(), 6);
        assert_eq!(count.load(Ordering::SeqCst), 6);
        let ids: Vec<_> = report.iter().map(|outcome| outcome.id).collect();
        let expected: Vec<_> = subscribers.iter().map(SubscriberId::of).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn publish_parallel_from_a_subscriber_does_not_deadlock() {
        let broker = Arc::new(Broker::<String>::new());
        let executor = Arc::new(Executor::new(1));
        let log = Log::default();
        let inner = recorder("inner", &log);
        broker.subscribe("inner", &inner);

        let outer = {
            let broker = Arc::downgrade(&broker);
            let executor = Arc::downgrade(&executor);
            Arc::new(move |event: &Event<String>| -> Result<(), Failure> {
                let (Some(broker), Some(executor)) = (broker.upgrade(), executor.upgrade()) else {
                    return Err("gone".into());
                };
                let report =
                    broker.publish_parallel(&Event::new("inner", event.payload().clone()), &executor);
                if report.all_ok() { Ok(()) } else { Err("inner delivery failed".into()) }
            })
        };
        broker.subscribe("outer", &outer);

        let report = broker.publish_parallel(&Event::new("outer", "e".to_owned()), &executor);

        assert_eq!(report.len(), 1);
        assert!(report.all_ok());
        assert_eq!(*log.lock().unwrap(), vec!["inner:e"]);
    }

    #[test]
    fn concurrent_publish_and_subscribe() {
        let broker = Arc::new(Broker::<String>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &Event<String>| -> Result<(), Failure> {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        broker.subscribe("orders", &counter);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let broker = Arc::clone(&broker);
                let log = Log::default();
                thread::spawn(move || {
                    let local = recorder("local", &log);
                    for round in 0..50 {
                        broker.subscribe(format!("topic.{worker}"), &local);
                        broker.publish(&Event::new("orders", round.to_string()));
                        broker.unsubscribe(&format!("topic.{worker}"), SubscriberId::of(&local));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 200);
        assert_eq!(broker.topics(), vec![Topic::new("orders")]);
    }
}
