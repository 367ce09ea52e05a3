//! Running producer code on a caller-supplied executor.
//!
//! The library itself never spawns threads implicitly. Work is handed to an [`Executor`], which
//! the caller picks explicitly and passes to [`Tasks`] at construction. [`Background`] is the
//! documented default: a single owned background thread.
//!
//! [`Tasks`] is also the boundary at which producer failures are caught: a producer returns a
//! [`Result`], which is delivered as an [`Outcome`] through the returned [`Promise`], and a
//! panicking producer cancels its promise instead of tearing down the executor thread.

use std::{
    any::Any,
    fmt, io,
    panic::{self, resume_unwind, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use crossbeam_channel::Sender;

use crate::{
    buffer::BufferPolicy, cancel::CancelToken, Channel, Deferred, Outcome, Progress, Promise,
};

/// A unit of work submitted to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a [`Job`] asynchronously.
///
/// Implementations decide where and when the job runs. Closures of type `Fn(Job)` implement this
/// trait, which makes it easy to adapt an existing thread pool.
pub trait Executor: Send + Sync {
    /// Submits `job` for execution.
    fn execute(&self, job: Job);
}

impl<F> Executor for F
where
    F: Fn(Job) + Send + Sync,
{
    fn execute(&self, job: Job) {
        self(job)
    }
}

/// An [`Executor`] that runs every job immediately on the submitting thread.
///
/// Mostly useful in tests, where it makes producer code run deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job()
    }
}

/// A builder object that can be used to configure and spawn a [`Background`] executor.
#[derive(Clone, Default)]
pub struct BackgroundBuilder {
    name: Option<String>,
    capacity: Option<usize>,
}

impl BackgroundBuilder {
    /// Sets the name of the background thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Limits the number of jobs that can be queued.
    ///
    /// By default the queue is unbounded, so [`Executor::execute`] never blocks. With a capacity,
    /// submitting a job blocks while the queue is full.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..self
        }
    }

    /// Spawns the background thread.
    pub fn spawn(self) -> io::Result<Background> {
        let (sender, recv) = match self.capacity {
            Some(capacity) => crossbeam_channel::bounded::<Job>(capacity),
            None => crossbeam_channel::unbounded::<Job>(),
        };
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let name = self.name.unwrap_or_else(|| String::from("<unnamed>"));
        let handle = builder.spawn(move || {
            log::trace!("background executor '{name}' starting");
            for job in recv {
                job();
            }
            log::trace!("background executor '{name}' exiting");
        })?;

        Ok(Background {
            sender: Some(sender),
            thread: handle.thread().id(),
            handle: Some(handle),
        })
    }
}

/// An [`Executor`] that runs jobs one at a time on a single owned thread.
///
/// When the [`Background`] is dropped, the queue is closed, remaining jobs are run, and the thread
/// is joined. If a job has panicked the thread has died with it, and the panic is propagated to
/// the thread that drops the [`Background`]. Until then, jobs submitted to the dead thread are
/// dropped without running; promises created through [`Tasks`] are canceled when that happens.
pub struct Background {
    sender: Option<Sender<Job>>,
    thread: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl Background {
    /// Returns a builder that can be used to configure and spawn a [`Background`] executor.
    #[inline]
    pub fn builder() -> BackgroundBuilder {
        BackgroundBuilder::default()
    }

    /// Spawns an unnamed [`Background`] executor with an unbounded queue.
    pub fn spawn() -> io::Result<Self> {
        Self::builder().spawn()
    }

    fn wait_for_exit(&mut self) {
        // Wait for it to exit and propagate its panic if it panicked.
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl Executor for Background {
    fn execute(&self, job: Job) {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return,
        };
        if let Err(err) = sender.send(job) {
            // The thread has died. Its panic is propagated when the executor is dropped.
            log::error!("background executor thread has exited, job dropped");
            drop(err);
        }
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        // Close the channel to signal the thread to exit.
        drop(self.sender.take());

        // A job may own the last handle to its own executor; it cannot join itself.
        if thread::current().id() == self.thread {
            return;
        }
        self.wait_for_exit();
    }
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Background")
            .field("thread", &self.thread)
            .field("queued", &self.sender.as_ref().map_or(0, Sender::len))
            .finish()
    }
}

/// Configuration for running producers: which [`Executor`] to use, and which [`BufferPolicy`]
/// the promises and streams it creates get.
#[derive(Clone)]
pub struct Tasks {
    executor: Arc<dyn Executor>,
    policy: Option<BufferPolicy>,
}

impl Tasks {
    /// Creates a [`Tasks`] configuration that submits work to `executor`.
    pub fn new<E: Executor + 'static>(executor: E) -> Self {
        Self::from_arc(Arc::new(executor))
    }

    /// Creates a [`Tasks`] configuration sharing an existing executor.
    pub fn from_arc(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            policy: None,
        }
    }

    /// Creates a [`Tasks`] configuration backed by a freshly spawned [`Background`] thread.
    ///
    /// The thread is joined once the last clone of the returned [`Tasks`] is dropped.
    pub fn background() -> io::Result<Self> {
        Ok(Self::new(Background::spawn()?))
    }

    /// Sets the buffer policy of the promises and streams created by this configuration.
    ///
    /// If unset, promises use [`BufferPolicy::Last`] and streams [`BufferPolicy::None`].
    pub fn policy(self, policy: BufferPolicy) -> Self {
        Self {
            policy: Some(policy),
            ..self
        }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Runs `producer` on the executor and returns a promise of its outcome.
    ///
    /// `producer` receives the promise's [`CancelToken`] so that it can stop early. If the promise
    /// is canceled before the job starts, `producer` is not run at all. If `producer` panics, the
    /// panic is logged and the promise is canceled. If the executor drops the job without running
    /// it, the promise is canceled as well.
    pub fn promise<T, E, F>(&self, producer: F) -> Promise<Outcome<T, E>>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnOnce(&CancelToken) -> Result<T, E> + Send + 'static,
    {
        let deferred = Deferred::with_policy(self.policy.unwrap_or(BufferPolicy::Last));
        let promise = deferred.promise();
        let unrun = CancelOnDrop::new(promise.cancel_token());
        self.executor.execute(Box::new(move || {
            unrun.disarm();
            let token = deferred.cancel_token();
            if token.is_canceled() {
                log::debug!("promise canceled before its producer started");
                return;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| producer(token))) {
                Ok(result) => {
                    if let Err(err) = deferred.resolve(Outcome::from(result)) {
                        log::warn!("failed to resolve task promise: {err}");
                    }
                }
                Err(payload) => {
                    log::error!("promise producer panicked: {}", panic_message(&*payload));
                    token.cancel();
                }
            }
        }));
        promise
    }

    /// Runs `producer` on the executor and returns the stream it writes to.
    ///
    /// The channel is closed once `producer` returns, unless it closed the channel itself. If the
    /// stream is canceled before the job starts, `producer` is not run. A panic in `producer` is
    /// logged and cancels the stream, and so does the executor dropping the job unrun.
    pub fn progress<T, F>(&self, producer: F) -> Progress<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Channel<T>) + Send + 'static,
    {
        let channel = Channel::with_policy(self.policy.unwrap_or(BufferPolicy::None));
        let progress = channel.progress();
        let unrun = CancelOnDrop::new(progress.cancel_token());
        self.executor.execute(Box::new(move || {
            unrun.disarm();
            if channel.is_canceled() {
                log::debug!("stream canceled before its producer started");
                return;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| producer(&channel))) {
                Ok(()) => {
                    if !channel.is_closed() {
                        // Only fails if the stream was closed concurrently.
                        channel.close().ok();
                    }
                }
                Err(payload) => {
                    log::error!("stream producer panicked: {}", panic_message(&*payload));
                    channel.cancel_token().cancel();
                }
            }
        }));
        progress
    }
}

impl fmt::Debug for Tasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasks")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Cancels a task's token if the job owning this guard is dropped before it starts running.
struct CancelOnDrop(Option<CancelToken>);

impl CancelOnDrop {
    fn new(token: &CancelToken) -> Self {
        Self(Some(token.clone()))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.0.take() {
            log::debug!("task dropped by its executor before running, canceling");
            token.cancel();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
