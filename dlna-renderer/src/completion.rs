//! Completion handles for renderer operations.
//!
//! Every operation on a [`MediaRenderer`](crate::MediaRenderer) starts work on
//! the renderer's runtime and immediately hands back a [`Pending`]. The
//! result can be awaited, blocked on, or delivered to a completion listener
//! through a [`CallbackExecutor`].

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CommandError, Result};

/// A unit of listener work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where completion and event listeners run.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs listeners on the runtime worker that produced the result.
///
/// Listeners must not block.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task()
    }
}

/// Forwards listeners to a caller-owned loop, e.g. a UI thread.
///
/// ```
/// use dlna_renderer::ChannelExecutor;
///
/// let (executor, tasks) = ChannelExecutor::new();
/// # drop(executor);
/// // on the UI thread:
/// for task in tasks {
///     task();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    sender: mpsc::Sender<Task>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, mpsc::Receiver<Task>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl CallbackExecutor for ChannelExecutor {
    fn execute(&self, task: Task) {
        if self.sender.send(task).is_err() {
            debug!("Callback loop is gone; dropping listener invocation");
        }
    }
}

/// The eventual outcome of a renderer operation.
///
/// Exactly one result is produced per operation. Dropping a `Pending` does
/// not cancel the operation; its result is simply discarded.
#[must_use = "the operation runs regardless, but its result is lost unless awaited or observed"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Result<T>>,
    runtime: Handle,
    executor: Arc<dyn CallbackExecutor>,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn spawn<F>(runtime: &Handle, executor: Arc<dyn CallbackExecutor>, operation: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        runtime.spawn(async move {
            let _ = sender.send(operation.await);
        });
        Self {
            receiver,
            runtime: runtime.clone(),
            executor,
        }
    }

    /// An already-resolved operation, for failures detected before any I/O.
    pub(crate) fn ready(runtime: &Handle, executor: Arc<dyn CallbackExecutor>, result: Result<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self {
            receiver,
            runtime: runtime.clone(),
            executor,
        }
    }

    /// Deliver the result to `listener`, exactly once, through the
    /// renderer's [`CallbackExecutor`].
    pub fn on_complete<F>(self, listener: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let Self {
            receiver,
            runtime,
            executor,
        } = self;
        runtime.spawn(async move {
            let result = settle(receiver.await);
            executor.execute(Box::new(move || listener(result)));
        });
    }

    /// Block the current thread until the operation finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async context; `.await` the
    /// `Pending` there instead.
    pub fn wait(self) -> Result<T> {
        settle(self.receiver.blocking_recv())
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(settle)
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

fn settle<T>(received: std::result::Result<Result<T>, oneshot::error::RecvError>) -> Result<T> {
    received.unwrap_or_else(|_| {
        Err(CommandError::TransportError(
            "Operation was abandoned before completing".to_string(),
        ))
    })
}
