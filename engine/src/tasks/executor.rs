use std::{
    cell::Cell,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use crossbeam::{
    channel::{Receiver, Sender, TryRecvError, bounded, unbounded},
    sync::WaitGroup,
};

type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // Pool that owns the current thread, if it is a worker thread.
    static POOL: Cell<Option<usize>> = const { Cell::new(None) };
}

/// A concurrent task executor based on a thread pool pattern.
/// Tasks can be submitted from any thread and will be executed by worker threads.
///
/// Used by the parallel dispatch and delivery paths
/// ([`Registry::dispatch_parallel`](crate::dispatch::Registry::dispatch_parallel),
/// [`Broker::publish_parallel`](crate::route::Broker::publish_parallel)).
pub struct Executor {
    pool: usize,
    sender: Sender<Message>,
    threads: Vec<Thread>,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct Thread {
    handle: Option<thread::JoinHandle<()>>,
}

impl Executor {
    /// Creates a new executor with the specified number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "Thread pool size must be greater than 0");

        let pool = NEXT_POOL.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded();
        let threads = (0..size)
            .map(|id| Thread::new(pool, id, receiver.clone()))
            .collect();

        Executor {
            pool,
            sender,
            threads,
        }
    }

    /// Creates a single-threaded executor.
    pub fn single_threaded() -> Self {
        Self::new(1)
    }

    /// Creates an executor with one thread per available core.
    pub fn with_available_parallelism() -> Self {
        Self::new(thread::available_parallelism().map_or(1, |n| n.get()))
    }

    /// Executes a task on the thread pool.
    /// Tasks are started in FIFO order, but completion order is non-deterministic.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(f));
    }

    /// Spawns a task and returns a future that resolves to the task's result.
    pub fn spawn<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);

        self.submit(Box::new(move || {
            let _ = tx.send(f());
        }));

        TaskFuture { receiver: rx }
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Returns `true` when called from one of this pool's worker threads.
    ///
    /// A task that queues more work on its own pool and waits for it can deadlock once every
    /// worker is waiting. Callers check this and run the work inline instead.
    pub fn is_worker_thread(&self) -> bool {
        POOL.with(|pool| pool.get() == Some(self.pool))
    }

    /// Creates a scope for spawning tasks that can access non-'static data.
    /// The scope ensures all spawned tasks complete before returning, even if `f` panics.
    ///
    /// # Example
    /// ```ignore
    /// let mut data = vec![1, 2, 3, 4];
    /// executor.scope(|s| {
    ///     for item in &mut data {
    ///         s.spawn(|| {
    ///             *item *= 2;
    ///         });
    ///     }
    /// });
    /// // All tasks guaranteed to be complete here
    /// assert_eq!(data, vec![2, 4, 6, 8]);
    /// ```
    pub fn scope<'env, F, R>(&'env self, f: F) -> R
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            executor: self,
            pending: Some(WaitGroup::new()),
            _phantom: PhantomData,
        };

        f(&scope)
        // `scope` drops here and blocks until every spawned task has finished.
    }

    fn submit(&self, task: Task) {
        // Workers only exit on `Shutdown`, which is sent from `drop`, so the channel
        // is connected for as long as `self` is alive.
        let _ = self.sender.send(Message::Task(task));
    }
}

/// A scope for spawning tasks that can borrow non-'static data.
/// All tasks spawned within the scope are guaranteed to complete before the scope ends.
pub struct Scope<'env> {
    executor: &'env Executor,
    pending: Option<WaitGroup>,
    _phantom: PhantomData<std::cell::Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Spawns a scoped task that can access data from the environment.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        let guard = self.pending.clone();
        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            let _guard = guard;
            f();
        });
        // Safety: `Scope::drop` waits for this task before `'env` ends.
        self.executor.submit(unsafe { extend_lifetime(task) });
    }

    /// Spawns a scoped task and returns a future for its result.
    pub fn spawn_with_result<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);

        let guard = self.pending.clone();
        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            let _guard = guard;
            let _ = tx.send(f());
        });
        // Safety: Same as spawn() - the scope outlives the task
        self.executor.submit(unsafe { extend_lifetime(task) });

        TaskFuture { receiver: rx }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        // Each task holds a clone of the wait group and releases it when it finishes
        // (or unwinds), so this returns once no task can touch borrowed data.
        if let Some(pending) = self.pending.take() {
            pending.wait();
        }
    }
}

/// Erase the `'env` lifetime of a scoped task so it can be queued on the pool.
///
/// # Safety
///
/// The caller must not let the [`Scope`] that spawned the task end before the task has run.
/// `Scope::drop` enforces this by waiting on the wait group every task holds.
unsafe fn extend_lifetime<'env>(task: Box<dyn FnOnce() + Send + 'env>) -> Task {
    unsafe { std::mem::transmute::<Box<dyn FnOnce() + Send + 'env>, Task>(task) }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Send shutdown message to all threads
        for _ in &self.threads {
            let _ = self.sender.send(Message::Shutdown);
        }

        // Wait for all threads to finish
        for thread in &mut self.threads {
            if let Some(handle) = thread.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Thread {
    fn new(pool: usize, id: usize, receiver: Receiver<Message>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("switchyard-worker-{id}"))
            .spawn(move || {
                POOL.with(|current| current.set(Some(pool)));
                loop {
                    match receiver.recv() {
                        Ok(Message::Task(task)) => {
                            // A panicking task drops its result sender, which the waiting
                            // future observes as `TaskFailed`. The thread keeps serving.
                            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                                log::warn!("Task panicked on worker thread {id}");
                            }
                        }
                        Ok(Message::Shutdown) | Err(_) => break,
                    }
                }
            });

        match handle {
            Ok(handle) => Thread {
                handle: Some(handle),
            },
            Err(err) => panic!("failed to spawn executor thread {id}: {err}"),
        }
    }
}

/// A future representing the result of a spawned task.
/// Use `wait()` to block until the task completes and get its result.
pub struct TaskFuture<T> {
    receiver: Receiver<T>,
}

impl<T> TaskFuture<T> {
    /// Waits for the task to complete and returns its result.
    /// This blocks the current thread until the task finishes execution.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().map_err(|_| TaskError::TaskFailed)
    }

    /// Attempts to get the result without blocking.
    /// Returns `Ok(Some(result))` if ready, `Ok(None)` if not ready yet,
    /// or `Err` if the task failed.
    pub fn try_wait(&self) -> Result<Option<T>, TaskError> {
        match self.receiver.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TaskError::TaskFailed),
        }
    }
}

/// Error type for task execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task failed to complete (executor was dropped or task panicked).
    #[error("task failed to complete")]
    TaskFailed,
}
