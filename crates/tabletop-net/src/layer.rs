//! The node layer: a single named worker thread that owns all protocol
//! state of one node.
//!
//! Protocol state (bound remote nodes, the password, lifecycle flags) is
//! only ever touched by tasks running on this thread, so none of it needs a
//! lock shared with other threads. Transport callbacks and UI code reach it
//! through [`NodeLayer::async_exec`] and [`NodeLayer::sync_exec`].
//!
//! The queue is unbounded. Tasks running on the layer may schedule further
//! tasks on it without ever blocking.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{ExecutionError, NodeError};

type Job = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// NodeLayer
// ---------------------------------------------------------------------------

/// Single-writer execution context for one node.
pub struct NodeLayer {
    name: String,
    thread_id: ThreadId,
    /// `None` once disposed. Submissions happen under this lock, so a
    /// submission racing [`dispose`](Self::dispose) is either queued before
    /// the sender is dropped or rejected.
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: Arc<AtomicBool>,
}

impl NodeLayer {
    /// Spawns the worker thread under `name`.
    pub fn new(name: impl Into<String>) -> Result<Self, ExecutionError> {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let disposed = Arc::new(AtomicBool::new(false));

        let worker_disposed = Arc::clone(&disposed);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&receiver, &worker_disposed))
            .map_err(ExecutionError::Spawn)?;

        tracing::debug!("Node layer `{name}` started");
        Ok(Self {
            thread_id: handle.thread().id(),
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
            disposed,
        })
    }

    /// Name of the worker thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the worker thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the calling thread is this layer's worker.
    pub fn is_node_layer_thread(&self) -> bool {
        self.is_node_layer_thread_id(thread::current().id())
    }

    /// Whether `thread` is this layer's worker.
    pub fn is_node_layer_thread_id(&self, thread: ThreadId) -> bool {
        thread == self.thread_id
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Queues `task` to run on the layer thread and returns immediately.
    ///
    /// Callable from any thread, including the layer thread itself, in which
    /// case the task runs after the current one finishes. Fails with
    /// [`ExecutionError::Rejected`] once the layer is disposed.
    pub fn async_exec<T, F>(&self, task: F) -> Result<TaskHandle<T>, ExecutionError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send(run_caught(task));
        });

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ExecutionError::Rejected);
        };
        sender.send(job).map_err(|_| ExecutionError::Rejected)?;

        Ok(TaskHandle {
            receiver: result_rx,
            layer_thread: self.thread_id,
        })
    }

    /// Runs `task` on the layer thread and blocks until it completes.
    ///
    /// On the layer thread itself the task runs inline instead of being
    /// queued.
    pub fn sync_exec<T, F>(&self, task: F) -> Result<T, ExecutionError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_node_layer_thread() {
            if self.is_disposed() {
                return Err(ExecutionError::Rejected);
            }
            return run_caught(task);
        }
        self.async_exec(task)?.wait()
    }

    /// Stops accepting work and releases the worker.
    ///
    /// Tasks still queued resolve to [`ExecutionError::Cancelled`], later
    /// submissions to [`ExecutionError::Rejected`]. The worker is joined
    /// unless this is called from the worker itself. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender.lock().take();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && !self.is_node_layer_thread()
            && worker.join().is_err()
        {
            tracing::error!("Node layer `{}` worker panicked during shutdown", self.name);
        }
        tracing::debug!("Node layer `{}` disposed", self.name);
    }
}

impl Drop for NodeLayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for NodeLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLayer")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn run_worker(receiver: &Receiver<Job>, disposed: &AtomicBool) {
    while let Ok(job) = receiver.recv() {
        if disposed.load(Ordering::Acquire) {
            // Dropping the job drops its result sender, which the handle
            // reports as cancellation.
            drop(job);
            continue;
        }
        job();
    }
}

fn run_caught<T>(task: impl FnOnce() -> T) -> Result<T, ExecutionError> {
    panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!("Node-layer task panicked: {message}");
        ExecutionError::Panicked(message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Eventual result of a task submitted with [`NodeLayer::async_exec`].
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T, ExecutionError>>,
    layer_thread: ThreadId,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run.
    ///
    /// Fails with [`ExecutionError::Deadlock`] when called on the layer
    /// thread for a task that has not run yet, since it never could.
    pub fn wait(self) -> Result<T, ExecutionError> {
        if thread::current().id() == self.layer_thread {
            return self.receiver.try_recv().unwrap_or(Err(ExecutionError::Deadlock));
        }
        self.receiver
            .recv()
            .unwrap_or(Err(ExecutionError::Cancelled))
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, ExecutionError> {
        if thread::current().id() == self.layer_thread {
            return self.receiver.try_recv().unwrap_or(Err(ExecutionError::Deadlock));
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ExecutionError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Confined
// ---------------------------------------------------------------------------

/// A value that may only be accessed on one node layer's thread.
///
/// Access from another thread fails with
/// [`NodeError::NotOnNodeLayerThread`]. Nested access from the layer thread
/// while the value is already borrowed fails with
/// [`NodeError::ReentrantStateAccess`] instead of deadlocking.
pub struct Confined<T> {
    owner: ThreadId,
    value: Mutex<T>,
}

impl<T> Confined<T> {
    /// Confines `value` to `layer`'s thread.
    pub fn new(layer: &NodeLayer, value: T) -> Self {
        Self {
            owner: layer.thread_id(),
            value: Mutex::new(value),
        }
    }

    /// Borrows the value. Must be called on the owning layer thread.
    pub fn get(&self) -> Result<MutexGuard<'_, T>, NodeError> {
        if thread::current().id() != self.owner {
            return Err(NodeError::NotOnNodeLayerThread);
        }
        self.value.try_lock().ok_or(NodeError::ReentrantStateAccess)
    }
}

impl<T> std::fmt::Debug for Confined<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confined").field("owner", &self.owner).finish_non_exhaustive()
    }
}
