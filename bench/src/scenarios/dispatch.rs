//! Dispatch pass over a seeded mix of worker kinds.
//!
//! Builds a registry of `worker_count` workers drawn at random from every kind, with
//! `failure_rate` of the gates closed, and keeps a boxed copy of the same list so closed-set
//! and open-set dispatch can be compared on identical work.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use switchyard::{
    dispatch::{Config, Perform, Registry},
    tasks::Executor,
};

use crate::{
    scenarios::Scenario,
    workers::{Batch, BoxedWorker, Even, Gate, Max, Sum, Worker, boxed},
};

/// Configuration for the dispatch scenario.
pub struct DispatchConfig {
    /// Number of registered workers.
    pub worker_count: usize,
    /// Length of the shared batch each worker reads.
    pub batch_len: usize,
    /// Probability that a gate worker fails.
    pub failure_rate: f64,
    /// Halt passes at the first failure.
    pub stop_on_first_failure: bool,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 1_000,
            batch_len: 64,
            failure_rate: 0.05,
            stop_on_first_failure: false,
            seed: 12345,
        }
    }
}

pub struct DispatchScenario {
    registry: Registry<Worker>,
    boxed: Vec<BoxedWorker>,
    batch: Batch,
}

impl DispatchScenario {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let batch = Batch::new(config.batch_len, u64::MAX);

        let mut registry = Registry::with_config(
            Config::new().stop_on_first_failure(config.stop_on_first_failure),
        );
        let mut boxed_workers = Vec::with_capacity(config.worker_count);

        for _ in 0..config.worker_count {
            let worker = match rng.gen_range(0..4) {
                0 => Worker::from(Sum),
                1 => Worker::from(Max),
                2 => Worker::from(Even),
                _ => Worker::from(Gate {
                    open: !rng.gen_bool(config.failure_rate),
                }),
            };
            registry.register(worker);
            boxed_workers.push(boxed(worker));
        }

        Self {
            registry,
            boxed: boxed_workers,
            batch,
        }
    }

    pub fn registry(&self) -> &Registry<Worker> {
        &self.registry
    }

    /// One pass through the enum registry.
    pub fn run_enum(&self) -> usize {
        self.registry.dispatch_all(&self.batch).failed_count()
    }

    /// One pass through the boxed workers, collecting the same kind of report.
    pub fn run_boxed(&self) -> usize {
        self.boxed
            .iter()
            .filter(|worker| worker.perform(&self.batch).is_err())
            .count()
    }

    /// One pass through the enum registry on `executor`.
    pub fn run_parallel(&self, executor: &Executor) -> usize {
        self.registry
            .dispatch_parallel(&self.batch, executor)
            .failed_count()
    }
}

impl Default for DispatchScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for DispatchScenario {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn description(&self) -> &'static str {
        "Sequential pass over a seeded mix of worker kinds"
    }

    fn item_count(&self) -> usize {
        self.registry.len()
    }

    fn run(&mut self) -> usize {
        self.run_enum()
    }
}
