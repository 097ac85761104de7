//! Worker registry for storing and dispatching closed-set workers.
//!
//! The [`Registry`] keeps workers in registration order and drives
//! [`Perform::perform`] across all of them. Each pass returns a [`Report`] with one outcome per
//! worker, so a single failing worker never hides what happened to the others.
//!
//! [`Shared`] wraps a registry in a readers-writer lock: registration takes the write side,
//! dispatch passes take the read side and may run concurrently.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    dispatch::{Config, Id, Perform, Variant},
    error::Failure,
    outcome::{Report, Status},
    tasks::Executor,
};

/// An insertion-ordered sequence of workers.
///
/// Registration order is dispatch order. The registry never reorders workers; a slot can be
/// overwritten wholesale with [`replace`](Self::replace) but never removed, so an [`Id`] stays
/// valid for the life of the registry.
///
/// # Examples
///
/// ```rust,ignore
/// let mut registry = Registry::<Worker>::with_config(Config::new().stop_on_first_failure(true));
///
/// let resize = registry.register(Resize { width: 640 });
/// registry.register(Notify);
///
/// let report = registry.dispatch_all(&request);
/// for outcome in &report {
///     println!("{}: {}", outcome.id, outcome.status);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Registry<W> {
    /// All registered workers, indexed by their [`Id`].
    workers: Vec<W>,

    config: Config,
}

impl<W> Registry<W> {
    /// Create a new, empty registry with the default [`Config`].
    #[inline]
    pub const fn new() -> Self {
        Self::with_config(Config::new())
    }

    /// Create a new, empty registry with the given dispatch configuration.
    #[inline]
    pub const fn with_config(config: Config) -> Self {
        Self {
            workers: Vec::new(),
            config,
        }
    }

    /// The dispatch configuration.
    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    /// Change the dispatch configuration for subsequent passes.
    #[inline]
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Append a worker and return its identifier.
    ///
    /// Accepts the worker enum itself or any wrapped worker type that converts into it.
    #[inline]
    pub fn register(&mut self, worker: impl Into<W>) -> Id {
        let id = Id::from(self.workers.len());

        self.workers.push(worker.into());

        id
    }

    /// Replace the worker in slot `id`, returning the previous one.
    ///
    /// The new worker may be of a different kind. If no worker is registered under `id` the
    /// registry is unchanged and the new worker is handed back as `Err`.
    pub fn replace(&mut self, id: Id, worker: impl Into<W>) -> Result<W, W> {
        let worker = worker.into();
        match self.workers.get_mut(id.index()) {
            Some(slot) => Ok(std::mem::replace(slot, worker)),
            None => Err(worker),
        }
    }

    /// Retrieve a worker by its identifier.
    #[inline]
    pub fn get(&self, id: Id) -> Option<&W> {
        self.workers.get(id.index())
    }

    /// Iterate over workers in registration order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (Id, &W)> {
        self.workers
            .iter()
            .enumerate()
            .map(|(index, worker)| (Id::from(index), worker))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl<W: Variant> Registry<W> {
    /// The kind of every registered worker, in registration order.
    pub fn kinds(&self) -> impl ExactSizeIterator<Item = &'static str> + '_ {
        self.workers.iter().map(Variant::kind)
    }

    /// Run every worker's `perform` in registration order on the calling thread.
    ///
    /// A failing worker is recorded and the pass moves on, unless
    /// [`Config::stop_on_first_failure`] is set: then the pass halts and every worker after the
    /// failure is reported as [`Status::Skipped`].
    pub fn dispatch_all<C>(&self, ctx: &C) -> Report<Id>
    where
        C: ?Sized,
        W: Perform<C>,
    {
        let mut report = Report::with_capacity(self.workers.len());
        let mut halted = false;

        for (id, worker) in self.iter() {
            if halted {
                report.push(id, Status::Skipped);
                continue;
            }

            let status = Status::from(self.run(worker, ctx));
            if let Status::Failed(failure) = &status {
                log::warn!("{id} ({}) failed: {failure}", worker.kind());
                halted = self.config.stop_on_first_failure;
            }
            report.push(id, status);
        }

        if halted {
            log::debug!(
                "Dispatch halted on first failure, skipped {} worker(s)",
                report.skipped_count()
            );
        }

        report
    }

    /// Run every worker concurrently on `executor`.
    ///
    /// The report is still in registration order. Halting on the first failure is defined in
    /// terms of registration order, so with [`Config::stop_on_first_failure`] set this runs the
    /// sequential [`dispatch_all`](Self::dispatch_all) pass instead. So does a call made from
    /// one of `executor`'s own threads.
    ///
    /// # Panics
    ///
    /// With [`Config::catch_panics`] disabled, a panicking worker panics the caller once every
    /// other worker has finished.
    pub fn dispatch_parallel<C>(&self, ctx: &C, executor: &Executor) -> Report<Id>
    where
        C: ?Sized + Sync,
        W: Perform<C> + Sync,
    {
        if self.config.stop_on_first_failure {
            log::debug!("stop_on_first_failure is set, dispatching sequentially");
            return self.dispatch_all(ctx);
        }
        if executor.is_worker_thread() {
            log::trace!("Already on a worker thread, dispatching sequentially");
            return self.dispatch_all(ctx);
        }

        let catch_panics = self.config.catch_panics;
        let results: Vec<_> = executor.scope(|scope| {
            let futures: Vec<_> = self
                .workers
                .iter()
                .map(|worker| scope.spawn_with_result(move || run_worker(worker, ctx, catch_panics)))
                .collect();

            futures.into_iter().map(|future| future.wait()).collect()
        });

        let mut report = Report::with_capacity(results.len());
        let mut panicked = None;
        for ((id, worker), result) in self.iter().zip(results) {
            let status = match result {
                Ok(result) => Status::from(result),
                Err(_) => {
                    panicked.get_or_insert(id);
                    Status::Failed(Failure::new("panicked"))
                }
            };
            if let Status::Failed(failure) = &status {
                log::warn!("{id} ({}) failed: {failure}", worker.kind());
            }
            report.push(id, status);
        }

        if let Some(id) = panicked.filter(|_| !catch_panics) {
            panic!("{id} panicked during parallel dispatch");
        }

        report
    }

    fn run<C>(&self, worker: &W, ctx: &C) -> Result<(), Failure>
    where
        C: ?Sized,
        W: Perform<C>,
    {
        run_worker(worker, ctx, self.config.catch_panics)
    }
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> FromIterator<W> for Registry<W> {
    fn from_iter<T: IntoIterator<Item = W>>(iter: T) -> Self {
        Self {
            workers: iter.into_iter().collect(),
            config: Config::new(),
        }
    }
}

impl<W> Extend<W> for Registry<W> {
    fn extend<T: IntoIterator<Item = W>>(&mut self, iter: T) {
        self.workers.extend(iter);
    }
}

fn run_worker<W, C>(worker: &W, ctx: &C, catch_panics: bool) -> Result<(), Failure>
where
    C: ?Sized,
    W: Perform<C>,
{
    if !catch_panics {
        return worker.perform(ctx);
    }

    panic::catch_unwind(AssertUnwindSafe(|| worker.perform(ctx)))
        .unwrap_or_else(|payload| Err(Failure::from_panic(&*payload)))
}

/// A registry shared between threads under a readers-writer lock.
///
/// Structural changes ([`register`](Self::register), [`replace`](Self::replace)) take the
/// write lock. Dispatch passes take the read lock, so any number of them can run at once;
/// this is sound because [`Perform::perform`] only gets `&self`.
///
/// Cloning a `Shared` clones the handle, not the registry.
pub struct Shared<W> {
    inner: Arc<RwLock<Registry<W>>>,
}

impl<W> Shared<W> {
    pub fn new(registry: Registry<W>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Append a worker under the write lock.
    pub fn register(&self, worker: impl Into<W>) -> Id {
        self.write().register(worker)
    }

    /// Replace a worker under the write lock.
    pub fn replace(&self, id: Id, worker: impl Into<W>) -> Result<W, W> {
        self.write().replace(id, worker)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Shared access to the registry.
    ///
    /// A poisoned lock is recovered: registry mutations are single `Vec` operations that
    /// cannot be observed half-done.
    pub fn read(&self) -> RwLockReadGuard<'_, Registry<W>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the registry.
    pub fn write(&self) -> RwLockWriteGuard<'_, Registry<W>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Variant> Shared<W> {
    /// Run a sequential dispatch pass under the read lock.
    pub fn dispatch_all<C>(&self, ctx: &C) -> Report<Id>
    where
        C: ?Sized,
        W: Perform<C>,
    {
        self.read().dispatch_all(ctx)
    }

    /// Run a parallel dispatch pass under the read lock.
    pub fn dispatch_parallel<C>(&self, ctx: &C, executor: &Executor) -> Report<Id>
    where
        C: ?Sized + Sync,
        W: Perform<C> + Sync,
    {
        self.read().dispatch_parallel(ctx, executor)
    }
}

impl<W> Clone for Shared<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W> From<Registry<W>> for Shared<W> {
    fn from(registry: Registry<W>) -> Self {
        Self::new(registry)
    }
}

impl<W> Default for Shared<W> {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}
