//! Worker kinds shared by the dispatch benchmarks.
//!
//! Every kind exists twice over: wrapped in the [`Worker`] enum for closed-set dispatch, and
//! boxed as `dyn Perform<Batch>` through [`boxed`] for the open-set comparison.

use std::hint::black_box;

use switchyard::{
    Failure,
    dispatch::{Perform, Variant},
};

/// Context handed to every worker in a pass.
#[derive(Debug, Clone)]
pub struct Batch {
    pub values: Vec<u64>,
    pub limit: u64,
}

impl Batch {
    pub fn new(len: usize, limit: u64) -> Self {
        Self {
            values: (0..len as u64).collect(),
            limit,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sum;

impl Perform<Batch> for Sum {
    fn perform(&self, batch: &Batch) -> Result<(), Failure> {
        let sum: u64 = black_box(&batch.values).iter().sum();
        if sum > batch.limit {
            return Err(Failure::new("sum over limit"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Max;

impl Perform<Batch> for Max {
    fn perform(&self, batch: &Batch) -> Result<(), Failure> {
        match black_box(&batch.values).iter().max() {
            Some(&max) if max > batch.limit => Err(Failure::new("max over limit")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Even;

impl Perform<Batch> for Even {
    fn perform(&self, batch: &Batch) -> Result<(), Failure> {
        let even = black_box(&batch.values).iter().filter(|v| *v % 2 == 0).count();
        black_box(even);
        Ok(())
    }
}

/// Fails or succeeds without looking at the batch.
#[derive(Debug, Clone, Copy)]
pub struct Gate {
    pub open: bool,
}

impl Perform<Batch> for Gate {
    fn perform(&self, _batch: &Batch) -> Result<(), Failure> {
        if black_box(self.open) {
            Ok(())
        } else {
            Err(Failure::new("gate closed"))
        }
    }
}

#[derive(Debug, Clone, Copy, Variant)]
pub enum Worker {
    Sum(Sum),
    Max(Max),
    Even(Even),
    Gate(Gate),
}

pub type BoxedWorker = Box<dyn Perform<Batch> + Send + Sync>;

/// The same worker, behind a vtable.
pub fn boxed(worker: Worker) -> BoxedWorker {
    match worker {
        Worker::Sum(w) => Box::new(w),
        Worker::Max(w) => Box::new(w),
        Worker::Even(w) => Box::new(w),
        Worker::Gate(w) => Box::new(w),
    }
}
