//! Broker fan-out.
//!
//! `topic_count` topics, each with a seeded number of subscribers drawn from a shared pool.
//! A run publishes one event to every topic.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use switchyard::{
    Event, Failure, Topic,
    route::{Broker, Subscriber},
    tasks::Executor,
};

use crate::scenarios::Scenario;

/// Configuration for the fan-out scenario.
pub struct FanOutConfig {
    pub topic_count: usize,
    /// Size of the shared subscriber pool.
    pub subscriber_count: usize,
    /// Subscribers per topic, at most `subscriber_count`.
    pub subscribers_per_topic: usize,
    /// Probability that a subscriber rejects every event.
    pub failure_rate: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            topic_count: 32,
            subscriber_count: 256,
            subscribers_per_topic: 16,
            failure_rate: 0.01,
            seed: 424242,
        }
    }
}

/// Counts the events it sees.
pub struct Tally {
    seen: AtomicU64,
    rejects: bool,
}

impl Subscriber<u64> for Tally {
    fn notify(&self, event: &Event<u64>) -> Result<(), Failure> {
        self.seen.fetch_add(*event.payload(), Ordering::Relaxed);
        if self.rejects {
            return Err(Failure::new("rejected"));
        }
        Ok(())
    }
}

pub struct FanOutScenario {
    broker: Broker<u64>,
    // Keeps the subscribers alive; the broker only holds weak references.
    subscribers: Vec<Arc<Tally>>,
    events: Vec<Event<u64>>,
}

impl FanOutScenario {
    pub fn new() -> Self {
        Self::with_config(FanOutConfig::default())
    }

    pub fn with_config(config: FanOutConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let subscribers: Vec<_> = (0..config.subscriber_count)
            .map(|_| {
                Arc::new(Tally {
                    seen: AtomicU64::new(0),
                    rejects: rng.gen_bool(config.failure_rate),
                })
            })
            .collect();

        let broker = Broker::new();
        let events: Vec<_> = (0..config.topic_count)
            .map(|index| Event::new(Topic::new(format!("fan.{index}")), 1))
            .collect();

        let per_topic = config.subscribers_per_topic.min(subscribers.len());
        for event in &events {
            let mut subscribed = 0;
            while subscribed < per_topic {
                let subscriber = &subscribers[rng.gen_range(0..subscribers.len())];
                if broker.subscribe(event.topic().clone(), subscriber) {
                    subscribed += 1;
                }
            }
        }

        Self {
            broker,
            subscribers,
            events,
        }
    }

    pub fn broker(&self) -> &Broker<u64> {
        &self.broker
    }

    /// Total events seen across all subscribers since construction.
    pub fn delivered(&self) -> u64 {
        self.subscribers
            .iter()
            .map(|subscriber| subscriber.seen.load(Ordering::Relaxed))
            .sum()
    }

    pub fn run_parallel(&self, executor: &Executor) -> usize {
        self.events
            .iter()
            .map(|event| self.broker.publish_parallel(event, executor).failed_count())
            .sum()
    }
}

impl Default for FanOutScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for FanOutScenario {
    fn name(&self) -> &'static str {
        "fan_out"
    }

    fn description(&self) -> &'static str {
        "Broker publish to every topic, many subscribers per topic"
    }

    fn item_count(&self) -> usize {
        self.events
            .iter()
            .map(|event| self.broker.subscriber_count(event.topic().as_str()))
            .sum()
    }

    fn run(&mut self) -> usize {
        self.events
            .iter()
            .map(|event| self.broker.publish(event).failed_count())
            .sum()
    }
}
