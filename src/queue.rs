//! Concurrent FIFO queues shared between the coordinator and the workers.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::warn;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("task_done() called more times than items were pushed")]
    TooManyAcks,
}

/// Multi-producer, multi-consumer FIFO with completion tracking.
///
/// Every pushed item counts as unfinished until a consumer calls
/// [`task_done`](Self::task_done) for it. [`wait_drained`](Self::wait_drained)
/// resolves once that count reaches zero.
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
    unfinished: watch::Sender<usize>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (unfinished, _) = watch::channel(0);
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            unfinished,
        }
    }

    pub fn push(&self, item: T) {
        self.unfinished.send_modify(|n| *n += 1);
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Takes the oldest item, waiting until one is available.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Like [`pop`](Self::pop), but the item is acknowledged when the returned
    /// [`Claim`] is dropped, including when the consumer unwinds.
    pub async fn claim(&self) -> Claim<'_, T> {
        Claim {
            item: self.pop().await,
            queue: self,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().pop_front();
        // Pass the wake-up along if more work is waiting.
        if item.is_some() && !self.lock().is_empty() {
            self.available.notify_one();
        }
        item
    }

    /// Acknowledges that one previously popped item has been fully handled.
    pub fn task_done(&self) -> Result<(), QueueError> {
        let mut result = Ok(());
        self.unfinished.send_if_modified(|n| {
            if *n == 0 {
                result = Err(QueueError::TooManyAcks);
                false
            } else {
                *n -= 1;
                true
            }
        });
        result
    }

    /// Waits until every pushed item has been popped and acknowledged.
    pub async fn wait_drained(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Items pushed but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    /// Items waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An item taken from a [`TaskQueue`] that still counts as unfinished.
pub struct Claim<'a, T> {
    item: T,
    queue: &'a TaskQueue<T>,
}

impl<T> Deref for Claim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.queue.task_done() {
            warn!(error = %e, "Task acknowledgement rejected");
        }
    }
}

/// FIFO accumulating worker output until the coordinator drains it.
pub struct ResultCollector<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ResultCollector<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Removes and returns everything collected so far, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ResultCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}
