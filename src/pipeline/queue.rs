//! Bounded hand-off queue between producers and the batch writer.
//!
//! A thin layer over `tokio::sync::mpsc`: the bounded channel supplies FIFO
//! order and backpressure (a full queue suspends [`HandoffSender::put`]), and
//! a shared "producers finished" flag lets the writer tell a temporarily
//! empty queue apart from a drained one.

use crate::error::DatasetError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Outcome of one [`HandoffReceiver::poll`].
#[derive(Debug)]
pub enum Poll<T> {
    /// An item arrived within the timeout.
    Item(T),
    /// Nothing arrived, but producers may still push.
    Idle,
    /// Producers finished and the queue is empty; the consumer should stop.
    Drained,
}

/// Producer half. Cheap to clone; one clone per producer.
pub struct HandoffSender<T> {
    tx: mpsc::Sender<T>,
    finished: Arc<AtomicBool>,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            finished: Arc::clone(&self.finished),
        }
    }
}

/// Consumer half, owned by the single writer.
pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<T>,
    finished: Arc<AtomicBool>,
}

/// Create a queue holding at most `capacity` items.
pub fn handoff_queue<T>(capacity: usize) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let finished = Arc::new(AtomicBool::new(false));
    (
        HandoffSender {
            tx,
            finished: Arc::clone(&finished),
        },
        HandoffReceiver { rx, finished },
    )
}

impl<T> HandoffSender<T> {
    /// Push an item, suspending while the queue is full.
    ///
    /// Fails only if the receiver is gone, which means the writer stopped on
    /// a fatal error.
    pub async fn put(&self, item: T) -> Result<(), DatasetError> {
        self.tx.send(item).await.map_err(|_| DatasetError::QueueClosed)
    }

    /// Raise the "producers finished" signal. Items already queued are still
    /// delivered.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl<T> HandoffReceiver<T> {
    /// Wait up to `wait` for the next item.
    ///
    /// Returns [`Poll::Drained`] once the finished signal is raised (or every
    /// sender is dropped) and no item is left.
    pub async fn poll(&mut self, wait: Duration) -> Poll<T> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => Poll::Item(item),
            Ok(None) => Poll::Drained,
            Err(_) if self.is_drained() => Poll::Drained,
            Err(_) => Poll::Idle,
        }
    }

    /// `true` when producers finished and nothing is left to take.
    pub fn is_drained(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
