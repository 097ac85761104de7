//! Mediator router: a queue in front of a fixed routing table.
//!
//! Producers [`submit`](Mediator::submit) events; the mediator resolves each topic against its
//! routing table right away and queues the event with its target. Each call to
//! [`process_next`](Mediator::process_next) forwards the oldest queued event to its target
//! channel and reports the delivery.
//!
//! ```rust,ignore
//! let mediator = Mediator::<Order>::builder()
//!     .route("orders.*", "fulfilment")
//!     .route("orders.urgent", "expedite")
//!     .build()?;
//!
//! mediator.subscribe("expedite", &courier)?;
//! mediator.submit(Event::new("orders.urgent", order))?;
//!
//! let forwarded = mediator.process_next().unwrap();
//! assert_eq!(forwarded.target.as_str(), "expedite");
//! ```
//!
//! Topics that match no route, or match two equally specific routes, are rejected at
//! `submit` and never reach the queue.

use std::{
    collections::VecDeque,
    fmt,
    marker::PhantomData,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use dashmap::DashMap;

use crate::{
    error::{ConfigurationError, MediatorError, RouteError},
    event::{Event, Topic},
    outcome::Report,
};

use super::{
    Router,
    channel::{Channel, Subscriber, SubscriberId},
    pattern::{Route, Table},
};

/// Receipt for a submitted event. Tickets increase in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket#{}", self.0)
    }
}

/// What the mediator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Waiting for `process_next`.
    Idle = 0,
    /// Forwarding an event to its target channel.
    Routing = 1,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Routing,
            _ => Self::Idle,
        }
    }
}

/// An event the mediator forwarded, with the delivery report from its target channel.
#[derive(Debug)]
pub struct Forwarded<P> {
    pub ticket: Ticket,
    pub event: Event<P>,
    pub target: Topic,
    pub report: Report<SubscriberId>,
}

struct Queued<P> {
    ticket: Ticket,
    event: Event<P>,
    target: Topic,
}

/// Collects routes for a [`Mediator`].
pub struct Builder<P> {
    routes: Vec<(String, String)>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Builder<P> {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// Sends events whose topic matches `pattern` to the channel named `target`.
    pub fn route(mut self, pattern: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.push((pattern.into(), target.into()));
        self
    }

    /// Validates the routing table and creates one channel per distinct target.
    pub fn build(self) -> Result<Mediator<P>, ConfigurationError> {
        Table::new(self.routes).map(Mediator::with_table)
    }
}

impl<P> Default for Builder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for Builder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder").field("routes", &self.routes).finish()
    }
}

/// Routes events through a central queue according to a fixed routing table.
///
/// The table never changes after construction. All operations take `&self`; a mediator can
/// be shared between producer threads and a routing thread behind an `Arc`.
pub struct Mediator<P> {
    table: Table,
    channels: DashMap<Topic, Channel<P>>,
    queue: Mutex<VecDeque<Queued<P>>>,
    next_ticket: AtomicU64,
    state: AtomicU8,
    // Held for the whole of a pass. `router` is the thread holding it.
    pass: Mutex<()>,
    router: Mutex<Option<ThreadId>>,
}

impl<P> Mediator<P> {
    pub fn builder() -> Builder<P> {
        Builder::new()
    }

    /// Creates a mediator from `(pattern, target)` pairs.
    pub fn new<I, S, T>(routes: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Table::new(routes).map(Self::with_table)
    }

    fn with_table(table: Table) -> Self {
        let channels = table
            .targets()
            .iter()
            .map(|target| (target.clone(), Channel::new(target.clone())))
            .collect();

        log::info!(
            "Mediator ready with {} routes to {} channels",
            table.routes().len(),
            table.targets().len()
        );

        Self {
            table,
            channels,
            queue: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(0),
            state: AtomicU8::new(State::Idle as u8),
            pass: Mutex::new(()),
            router: Mutex::new(None),
        }
    }

    /// Routes in declaration order.
    #[inline]
    pub fn routes(&self) -> &[Route] {
        self.table.routes()
    }

    /// Target channel names in order of first declaration.
    #[inline]
    pub fn targets(&self) -> &[Topic] {
        self.table.targets()
    }

    /// The target `topic` would be forwarded to.
    pub fn resolve(&self, topic: &Topic) -> Result<&Topic, RouteError> {
        self.table.resolve(topic).map(Route::target)
    }

    #[inline]
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of events waiting to be forwarded.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Resolves the event's route and queues it.
    ///
    /// A rejected event is dropped and the queue is left untouched.
    pub fn submit(&self, event: Event<P>) -> Result<Ticket, RouteError> {
        let target = match self.table.resolve(event.topic()) {
            Ok(route) => route.target().clone(),
            Err(err) => {
                log::debug!("Rejected event: {err}");
                return Err(err);
            }
        };

        // Issue the ticket under the queue lock so queue order and ticket order agree.
        let mut queue = self.queue();
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        log::trace!("Queued `{}` for `{target}` as {ticket}", event.topic());
        queue.push_back(Queued {
            ticket,
            event,
            target,
        });

        Ok(ticket)
    }

    /// Removes a queued event before it is forwarded.
    ///
    /// Returns `None` if the event was already forwarded or the ticket is unknown.
    pub fn withdraw(&self, ticket: Ticket) -> Option<Event<P>> {
        let mut queue = self.queue();
        let index = queue.iter().position(|queued| queued.ticket == ticket)?;
        queue.remove(index).map(|queued| queued.event)
    }

    /// Forwards the oldest queued event to its target channel.
    ///
    /// Only one event is in flight at a time. A call from another thread while a pass is
    /// running waits for it to finish. Returns `None` if the queue is empty, or if called from
    /// a subscriber of the pass in progress on the same thread.
    pub fn process_next(&self) -> Option<Forwarded<P>> {
        let _routing = Routing::enter(self)?;

        let Queued {
            ticket,
            event,
            target,
        } = self.queue().pop_front()?;

        // Release the map guard before delivery so subscribers can (un)subscribe.
        let snapshot = self.channels.get(&target).map(|channel| channel.snapshot());
        let report = match snapshot {
            Some(snapshot) => snapshot.deliver(&event),
            None => Report::new(),
        };

        log::debug!(
            "Forwarded {ticket} `{}` to `{target}`: {} ok, {} failed, {} skipped",
            event.topic(),
            report.ok_count(),
            report.failed_count(),
            report.skipped_count()
        );

        Some(Forwarded {
            ticket,
            event,
            target,
            report,
        })
    }

    /// Forwards queued events until the queue is empty.
    ///
    /// Passes running on other threads are waited for, not skipped. Called from a subscriber
    /// during a pass, returns an empty `Vec` and leaves the queue alone.
    pub fn process_all(&self) -> Vec<Forwarded<P>> {
        std::iter::from_fn(|| self.process_next()).collect()
    }

    /// Subscribes to the target channel named `target`.
    ///
    /// Returns `Ok(false)` if the subscriber was already subscribed.
    pub fn subscribe<S>(&self, target: &str, subscriber: &Arc<S>) -> Result<bool, MediatorError>
    where
        S: Subscriber<P> + 'static,
    {
        self.channels
            .get_mut(target)
            .map(|mut channel| channel.subscribe(subscriber))
            .ok_or_else(|| MediatorError::UnknownTarget(target.to_owned()))
    }

    /// Unsubscribes from the target channel named `target`.
    ///
    /// Returns `Ok(false)` if the subscriber was not subscribed.
    pub fn unsubscribe(&self, target: &str, id: SubscriberId) -> Result<bool, MediatorError> {
        self.channels
            .get_mut(target)
            .map(|mut channel| channel.unsubscribe(id))
            .ok_or_else(|| MediatorError::UnknownTarget(target.to_owned()))
    }

    /// Number of subscriptions on the target channel named `target`.
    pub fn subscriber_count(&self, target: &str) -> Option<usize> {
        self.channels.get(target).map(|channel| channel.len())
    }

    /// Drops subscriptions whose subscriber no longer exists, on every target channel.
    pub fn prune(&self) -> usize {
        self.channels
            .iter_mut()
            .map(|mut channel| channel.prune())
            .sum()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued<P>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn router(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.router.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> Router<P> for Mediator<P> {
    type Receipt = Ticket;
    type Error = RouteError;

    fn accept(&self, event: Event<P>) -> Result<Ticket, RouteError> {
        self.submit(event)
    }
}

impl<P> fmt::Debug for Mediator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("routes", &self.table.routes().len())
            .field("targets", &self.table.targets())
            .field("pending", &self.pending())
            .field("state", &self.state())
            .finish()
    }
}

/// Holds the mediator in [`State::Routing`] and returns it to idle on drop.
struct Routing<'a, P> {
    mediator: &'a Mediator<P>,
    _pass: MutexGuard<'a, ()>,
}

impl<'a, P> Routing<'a, P> {
    /// Waits for any pass on another thread, then starts one on this thread.
    ///
    /// Returns `None` if this thread is already routing.
    fn enter(mediator: &'a Mediator<P>) -> Option<Self> {
        let current = thread::current().id();
        if *mediator.router() == Some(current) {
            log::trace!("Nested pass on the routing thread refused");
            return None;
        }

        let pass = mediator.pass.lock().unwrap_or_else(PoisonError::into_inner);
        *mediator.router() = Some(current);
        mediator
            .state
            .store(State::Routing as u8, Ordering::Release);

        Some(Self {
            mediator,
            _pass: pass,
        })
    }
}

impl<P> Drop for Routing<'_, P> {
    fn drop(&mut self) {
        self.mediator.state.store(State::Idle as u8, Ordering::Release);
        *self.mediator.router() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, thread, time::Duration};

    use crossbeam::channel::bounded;

    use crate::error::Failure;

    use super::*;

    type Log = Arc<StdMutex<Vec<String>>>;

    fn recorder(name: &'static str, log: &Log) -> Arc<impl Subscriber<u32> + 'static> {
        let log = Arc::clone(log);
        Arc::new(move |event: &Event<u32>| -> Result<(), Failure> {
            log.lock()
                .unwrap()
                .push(format!("{name}:{}:{}", event.topic(), event.payload()));
            Ok(())
        })
    }

    fn orders() -> Mediator<u32> {
        Mediator::builder()
            .route("orders.*", "Qa")
            .route("orders.urgent", "Qb")
            .build()
            .unwrap()
    }

    // ==================== Construction ====================

    #[test]
    fn build_rejects_empty_table() {
        let result = Builder::<u32>::new().build();
        assert_eq!(result.unwrap_err(), ConfigurationError::EmptyTable);
    }

    #[test]
    fn build_rejects_malformed_pattern() {
        let result = Mediator::<u32>::new([("orders.#.eu", "Qa")]);
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::MisplacedTail {
                pattern: "orders.#.eu".into()
            }
        );
    }

    #[test]
    fn build_creates_one_channel_per_target() {
        let mediator = orders();
        let targets: Vec<_> = mediator.targets().iter().map(Topic::as_str).collect();
        assert_eq!(targets, vec!["Qa", "Qb"]);
        assert_eq!(mediator.subscriber_count("Qa"), Some(0));
        assert_eq!(mediator.subscriber_count("Qc"), None);
        assert_eq!(mediator.state(), State::Idle);
    }

    // ==================== Submit ====================

    #[test]
    fn submit_routes_to_most_specific_target() {
        let mediator = orders();
        let log = Log::default();
        let qa = recorder("Qa", &log);
        let qb = recorder("Qb", &log);
        mediator.subscribe("Qa", &qa).unwrap();
        mediator.subscribe("Qb", &qb).unwrap();

        mediator.submit(Event::new("orders.urgent", 1)).unwrap();
        mediator.submit(Event::new("orders.normal", 2)).unwrap();

        let forwarded = mediator.process_all();
        let targets: Vec<_> = forwarded.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(targets, vec!["Qb", "Qa"]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["Qb:orders.urgent:1", "Qa:orders.normal:2"]
        );
    }

    #[test]
    fn submit_without_route_leaves_queue_unchanged() {
        let mediator = orders();
        mediator.submit(Event::new("orders.normal", 1)).unwrap();

        let err = mediator.submit(Event::new("invoices.new", 2)).unwrap_err();

        assert_eq!(
            err,
            RouteError::NoRoute {
                topic: Topic::new("invoices.new")
            }
        );
        assert_eq!(mediator.pending(), 1);
    }

    #[test]
    fn submit_with_ambiguous_route_is_rejected() {
        let mediator = Mediator::<u32>::new([("orders.*", "Qa"), ("*.urgent", "Qb")]).unwrap();

        let err = mediator.submit(Event::new("orders.urgent", 1)).unwrap_err();

        assert!(matches!(err, RouteError::AmbiguousRoute { .. }));
        assert_eq!(err.topic().as_str(), "orders.urgent");
        assert_eq!(mediator.pending(), 0);
    }

    #[test]
    fn tickets_increase_in_submission_order() {
        let mediator = orders();
        let first = mediator.submit(Event::new("orders.a", 1)).unwrap();
        let second = mediator.submit(Event::new("orders.b", 2)).unwrap();
        assert!(first < second);
        assert_eq!(second.get(), first.get() + 1);
    }

    #[test]
    fn router_accept_submits() {
        fn accept_all<R: Router<u32>>(router: &R, events: Vec<Event<u32>>) -> Vec<Result<R::Receipt, R::Error>> {
            events.into_iter().map(|event| router.accept(event)).collect()
        }

        let mediator = orders();
        let results = accept_all(
            &mediator,
            vec![Event::new("orders.a", 1), Event::new("nothing", 2)],
        );
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(mediator.pending(), 1);
    }

    // ==================== Processing ====================

    #[test]
    fn process_next_is_fifo() {
        let mediator = orders();
        for value in 0..5 {
            mediator.submit(Event::new("orders.normal", value)).unwrap();
        }

        let payloads: Vec<_> = mediator
            .process_all()
            .into_iter()
            .map(|forwarded| forwarded.event.into_payload())
            .collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
        assert_eq!(mediator.pending(), 0);
    }

    #[test]
    fn process_next_on_empty_queue_returns_none() {
        let mediator = orders();
        assert!(mediator.process_next().is_none());
        assert_eq!(mediator.state(), State::Idle);
    }

    #[test]
    fn forwarded_report_collects_subscriber_failures() {
        let mediator = orders();
        let log = Log::default();
        let failing = Arc::new(|_: &Event<u32>| -> Result<(), Failure> { Err("offline".into()) });
        let ok = recorder("ok", &log);
        mediator.subscribe("Qa", &failing).unwrap();
        mediator.subscribe("Qa", &ok).unwrap();

        mediator.submit(Event::new("orders.normal", 1)).unwrap();
        let forwarded = mediator.process_next().unwrap();

        assert_eq!(forwarded.report.len(), 2);
        assert_eq!(forwarded.report.failed_count(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:orders.normal:1"]);
    }

    #[test]
    fn forwarding_to_channel_without_subscribers_reports_nothing() {
        let mediator = orders();
        mediator.submit(Event::new("orders.normal", 1)).unwrap();
        let forwarded = mediator.process_next().unwrap();
        assert!(forwarded.report.is_empty());
    }

    #[test]
    fn state_is_routing_during_delivery() {
        let mediator = Arc::new(orders());
        let seen = Arc::new(StdMutex::new(None));

        let observer = {
            let mediator = Arc::downgrade(&mediator);
            let seen = Arc::clone(&seen);
            Arc::new(move |_: &Event<u32>| -> Result<(), Failure> {
                if let Some(mediator) = mediator.upgrade() {
                    *seen.lock().unwrap() = Some((mediator.state(), mediator.process_next().is_none()));
                }
                Ok(())
            })
        };
        mediator.subscribe("Qa", &observer).unwrap();
        mediator.submit(Event::new("orders.normal", 1)).unwrap();
        mediator.submit(Event::new("orders.normal", 2)).unwrap();

        mediator.process_next().unwrap();

        // A nested `process_next` is refused while routing and leaves the second event queued.
        assert_eq!(*seen.lock().unwrap(), Some((State::Routing, true)));
        assert_eq!(mediator.state(), State::Idle);
        assert_eq!(mediator.pending(), 1);
    }

    // ==================== Withdraw ====================

    #[test]
    fn withdraw_removes_queued_event() {
        let mediator = orders();
        let first = mediator.submit(Event::new("orders.a", 1)).unwrap();
        let second = mediator.submit(Event::new("orders.b", 2)).unwrap();

        let withdrawn = mediator.withdraw(first).unwrap();
        assert_eq!(*withdrawn.payload(), 1);
        assert!(mediator.withdraw(first).is_none());

        let forwarded = mediator.process_next().unwrap();
        assert_eq!(forwarded.ticket, second);
    }

    #[test]
    fn withdraw_after_forwarding_returns_none() {
        let mediator = orders();
        let ticket = mediator.submit(Event::new("orders.a", 1)).unwrap();
        mediator.process_next().unwrap();
        assert!(mediator.withdraw(ticket).is_none());
    }

    // ==================== Subscriptions ====================

    #[test]
    fn subscribe_to_unknown_target_fails() {
        let mediator = orders();
        let log = Log::default();
        let subscriber = recorder("x", &log);
        assert_eq!(
            mediator.subscribe("Qz", &subscriber),
            Err(MediatorError::UnknownTarget("Qz".into()))
        );
    }

    #[test]
    fn subscribe_twice_and_unsubscribe() {
        let mediator = orders();
        let log = Log::default();
        let subscriber = recorder("x", &log);

        assert_eq!(mediator.subscribe("Qa", &subscriber), Ok(true));
        assert_eq!(mediator.subscribe("Qa", &subscriber), Ok(false));
        assert_eq!(mediator.unsubscribe("Qa", SubscriberId::of(&subscriber)), Ok(true));
        assert_eq!(mediator.unsubscribe("Qa", SubscriberId::of(&subscriber)), Ok(false));
    }

    #[test]
    fn prune_drops_dead_subscribers() {
        let mediator = orders();
        let log = Log::default();
        mediator.subscribe("Qa", &recorder("gone", &log)).unwrap();
        assert_eq!(mediator.prune(), 1);
        assert_eq!(mediator.subscriber_count("Qa"), Some(0));
    }

    // ==================== Concurrency ====================

    #[test]
    fn concurrent_producers_are_all_forwarded_once() {
        let mediator = Arc::new(orders());
        let log = Log::default();
        let subscriber = recorder("qa", &log);
        mediator.subscribe("Qa", &subscriber).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let mediator = Arc::clone(&mediator);
                thread::spawn(move || {
                    for value in 0..25 {
                        mediator
                            .submit(Event::new("orders.normal", producer * 100 + value))
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let forwarded = mediator.process_all();
        assert_eq!(forwarded.len(), 100);
        assert!(forwarded.windows(2).all(|pair| pair[0].ticket < pair[1].ticket));
        assert_eq!(log.lock().unwrap().len(), 100);
    }

    #[test]
    fn process_all_waits_for_a_pass_on_another_thread() {
        let mediator = Arc::new(orders());
        let (entered_tx, entered_rx) = bounded::<()>(1);
        let (release_tx, release_rx) = bounded::<()>(1);

        // Blocks delivery of the first event until released.
        let gate = Arc::new(move |event: &Event<u32>| -> Result<(), Failure> {
            if *event.payload() == 1 {
                let _ = entered_tx.send(());
                let _ = release_rx.recv();
            }
            Ok(())
        });
        mediator.subscribe("Qa", &gate).unwrap();
        for value in 1..=3 {
            mediator.submit(Event::new("orders.normal", value)).unwrap();
        }

        let first = {
            let mediator = Arc::clone(&mediator);
            thread::spawn(move || mediator.process_next().map(|f| f.event.into_payload()))
        };
        entered_rx.recv().unwrap();
        assert_eq!(mediator.state(), State::Routing);

        let rest = {
            let mediator = Arc::clone(&mediator);
            thread::spawn(move || {
                mediator
                    .process_all()
                    .into_iter()
                    .map(|f| f.event.into_payload())
                    .collect::<Vec<_>>()
            })
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        assert_eq!(first.join().unwrap(), Some(1));
        assert_eq!(rest.join().unwrap(), vec![2, 3]);
        assert_eq!(mediator.pending(), 0);
        assert_eq!(mediator.state(), State::Idle);
    }
}
