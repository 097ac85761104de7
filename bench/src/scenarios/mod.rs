//! Seeded workload scenarios.
//!
//! Each scenario builds its fixture up front from a fixed seed so repeated runs measure the
//! same work.
//!
//! # Scenarios
//!
//! - **Dispatch**: a registry with a random mix of succeeding and failing workers
//! - **Fan-out**: a broker with many topics and subscribers, publishing round-robin
//! - **Mediation**: producers submitting random topics through a mediator, then draining

pub mod dispatch;
pub mod fan_out;
pub mod mediation;

pub use dispatch::{DispatchConfig, DispatchScenario};
pub use fan_out::{FanOutConfig, FanOutScenario};
pub use mediation::{MediationConfig, MediationScenario};

/// Common trait for benchmark scenarios.
pub trait Scenario {
    /// Human-readable name of the scenario.
    fn name(&self) -> &'static str;

    /// Brief description of what this scenario tests.
    fn description(&self) -> &'static str;

    /// Number of items (workers, deliveries, events) one run touches.
    fn item_count(&self) -> usize;

    /// Run the workload once. Returns the number of failures reported.
    fn run(&mut self) -> usize;
}
