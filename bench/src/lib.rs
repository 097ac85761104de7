//! Benchmark utilities for switchyard.
//!
//! - **Microbenchmarks**: enum dispatch against boxed trait objects, broker and channel
//!   delivery in isolation
//! - **Scenario benchmarks**: seeded workloads for dispatch passes, broker fan-out and
//!   mediator queue throughput
//! - **Memory tracking**: heap allocation profiling via dhat
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p switchyard_bench
//!
//! # Run specific benchmark group
//! cargo bench -p switchyard_bench -- dispatch
//!
//! # Run with memory profiling (slower)
//! cargo bench -p switchyard_bench --features memory_profiling
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.
//! Memory profiling results are written to `dhat-heap.json` for viewing with
//! DHAT's viewer.

pub mod memory;
pub mod scenarios;
pub mod workers;
