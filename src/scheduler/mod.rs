//! Single-threaded task scheduler
//!
//! A FIFO message queue drained by one dedicated worker thread. Messages are
//! dispatched one at a time to a single [`Handler`], which may post follow-up
//! messages back onto the queue it is being driven from. A flush-post clears
//! everything still queued before enqueueing its message.

use crate::utils::error::{PumpError, Result};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Receives messages on the worker thread
pub trait Handler<M>: Send + 'static {
    /// Handle one message. `queue` is the queue the message came from.
    fn handle(&mut self, message: M, queue: &TaskQueue<M>);

    /// Called once after `handle` panicked, with the queue already stopped
    fn on_panic(&mut self, _queue: &TaskQueue<M>) {}
}

struct QueueState<M> {
    messages: VecDeque<M>,
    running: bool,
}

struct QueueInner<M> {
    state: Mutex<QueueState<M>>,
    available: Condvar,
}

/// Cloneable handle to a message queue
pub struct TaskQueue<M> {
    inner: Arc<QueueInner<M>>,
}

impl<M> Clone for TaskQueue<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> Default for TaskQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> TaskQueue<M> {
    /// Create a running, empty queue
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    messages: VecDeque::new(),
                    running: true,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Append a message. Returns false if the queue was stopped.
    pub fn post(&self, message: M) -> bool {
        self.enqueue(message, false)
    }

    /// Discard every queued message, then append this one.
    pub fn post_flush(&self, message: M) -> bool {
        self.enqueue(message, true)
    }

    fn enqueue(&self, message: M, flush: bool) -> bool {
        let mut state = self.inner.state.lock();
        if !state.running {
            return false;
        }
        if flush {
            state.messages.clear();
        }
        state.messages.push_back(message);
        drop(state);

        self.inner.available.notify_one();
        true
    }

    /// Stop the queue. Pending messages are dropped and later posts are ignored.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.running = false;
        state.messages.clear();
        drop(state);

        self.inner.available.notify_all();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        !self.inner.state.lock().running
    }

    /// Number of messages waiting
    pub fn len(&self) -> usize {
        self.inner.state.lock().messages.len()
    }

    /// Whether no messages are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every waiting message without dispatching it
    pub fn take_pending(&self) -> Vec<M> {
        self.inner.state.lock().messages.drain(..).collect()
    }

    /// Pop the next message without blocking
    pub fn try_recv(&self) -> Option<M> {
        let mut state = self.inner.state.lock();
        if !state.running {
            return None;
        }
        state.messages.pop_front()
    }

    /// Block until a message is available. Returns `None` once stopped.
    pub fn recv(&self) -> Option<M> {
        let mut state = self.inner.state.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            self.inner.available.wait(&mut state);
        }
    }
}

/// A task queue plus the worker thread that drains it
pub struct Scheduler<M: Send + 'static> {
    queue: TaskQueue<M>,
    worker: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> Scheduler<M> {
    /// Spawn a named worker thread dispatching to `handler`
    pub fn spawn<H: Handler<M>>(name: &str, handler: H) -> Result<Self> {
        let queue = TaskQueue::new();
        let worker_queue = queue.clone();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(handler, worker_queue))
            .map_err(|e| PumpError::Scheduler(format!("failed to spawn {}: {}", name, e)))?;
        debug!("spawned worker thread {}", name);

        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }

    /// The queue this scheduler drains
    pub fn queue(&self) -> &TaskQueue<M> {
        &self.queue
    }

    /// See [`TaskQueue::post`]
    pub fn post(&self, message: M) -> bool {
        self.queue.post(message)
    }

    /// See [`TaskQueue::post_flush`]
    pub fn post_flush(&self, message: M) -> bool {
        self.queue.post_flush(message)
    }

    /// Stop the queue; the worker exits after its in-flight dispatch
    pub fn stop(&self) {
        self.queue.stop();
    }

    /// Wait for the worker thread to exit
    ///
    /// Returns immediately if it was already joined. The queue must be
    /// stopped, by `stop` or by the handler, for this to return.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    /// Whether the worker thread has been joined
    pub fn is_joined(&self) -> bool {
        self.worker.is_none()
    }
}

impl<M: Send + 'static> Drop for Scheduler<M> {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run_loop<M, H: Handler<M>>(mut handler: H, queue: TaskQueue<M>) {
    while let Some(message) = queue.recv() {
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(message, &queue)));
        if result.is_err() {
            error!("handler panicked, stopping worker");
            queue.stop();
            if catch_unwind(AssertUnwindSafe(|| handler.on_panic(&queue))).is_err() {
                error!("panic cleanup panicked");
            }
            break;
        }
    }
    debug!("worker loop exited");
}
