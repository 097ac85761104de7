//! Mediator throughput.
//!
//! A routing table with one literal route and one wildcard route per region, plus a catch-all.
//! A run submits `event_count` events with seeded topics and drains the queue.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use switchyard::{
    Event, Failure, Topic,
    route::{Mediator, Subscriber},
};

use crate::scenarios::Scenario;

/// Configuration for the mediation scenario.
pub struct MediationConfig {
    pub region_count: usize,
    /// Events submitted per run.
    pub event_count: usize,
    /// Probability that an event's topic has no route.
    pub unroutable_rate: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for MediationConfig {
    fn default() -> Self {
        Self {
            region_count: 8,
            event_count: 10_000,
            unroutable_rate: 0.02,
            seed: 99999,
        }
    }
}

#[derive(Default)]
struct Received(AtomicUsize);

impl Subscriber<usize> for Received {
    fn notify(&self, _event: &Event<usize>) -> Result<(), Failure> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub struct MediationScenario {
    mediator: Mediator<usize>,
    // Subscribed to every target.
    received: Arc<Received>,
    topics: Vec<Topic>,
}

impl MediationScenario {
    pub fn new() -> Self {
        Self::with_config(MediationConfig::default())
    }

    pub fn with_config(config: MediationConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut builder = Mediator::builder().route("orders.#", "archive");
        for region in 0..config.region_count {
            builder = builder
                .route(format!("orders.{region}.*"), format!("region-{region}"))
                .route(format!("orders.{region}.urgent"), format!("urgent-{region}"));
        }
        let mediator: Mediator<usize> = match builder.build() {
            Ok(mediator) => mediator,
            Err(err) => panic!("scenario routing table is invalid: {err}"),
        };

        let received = Arc::new(Received::default());
        for target in mediator.targets() {
            if let Err(err) = mediator.subscribe(target.as_str(), &received) {
                panic!("scenario subscription to `{target}` failed: {err}");
            }
        }

        let topics = (0..config.event_count)
            .map(|_| {
                if rng.gen_bool(config.unroutable_rate) {
                    Topic::new("invoices.new")
                } else {
                    let region = rng.gen_range(0..config.region_count.max(1));
                    let kind = if rng.gen_bool(0.1) { "urgent" } else { "normal" };
                    Topic::new(format!("orders.{region}.{kind}"))
                }
            })
            .collect();

        Self {
            mediator,
            received,
            topics,
        }
    }

    pub fn mediator(&self) -> &Mediator<usize> {
        &self.mediator
    }

    /// Events delivered to subscribers since construction.
    pub fn received(&self) -> usize {
        self.received.0.load(Ordering::Relaxed)
    }
}

impl Default for MediationScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for MediationScenario {
    fn name(&self) -> &'static str {
        "mediation"
    }

    fn description(&self) -> &'static str {
        "Submit seeded topics through a routing table and drain the queue"
    }

    fn item_count(&self) -> usize {
        self.topics.len()
    }

    /// Returns the number of rejected submissions.
    fn run(&mut self) -> usize {
        let rejected = self
            .topics
            .iter()
            .enumerate()
            .filter(|(index, topic)| {
                self.mediator
                    .submit(Event::new((*topic).clone(), *index))
                    .is_err()
            })
            .count();
        self.mediator.process_all();
        rejected
    }
}
