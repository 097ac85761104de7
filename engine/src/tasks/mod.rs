//! Thread pool used by the parallel dispatch and delivery paths.

mod executor;

pub use executor::{Executor, Scope, TaskError, TaskFuture};
