//! Bounded queues between nodes
//!
//! Every producer→consumer edge is a fixed-capacity `mpsc` channel. A put on
//! a full queue waits for space, which throttles the whole upstream chain.
//! All waits also observe the flow's [`Cancellation`] signal.

use crate::error::FlowError;
use crate::event::Record;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Default capacity of every queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// A content-free timer wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

/// One unit of work for a node.
#[derive(Debug, Clone)]
pub enum Intake {
    Data(Record),
    Tick,
}

/// Cooperative cancellation shared by every task of a flow.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal every holder. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flow is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives as long as any clone of `self`.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Producing end of a queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    name: Arc<str>,
    tx: mpsc::Sender<T>,
    cancel: Cancellation,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Send> QueueSender<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `item`, waiting while the queue is full.
    ///
    /// A free slot is always taken, even after cancellation, so records a
    /// closing node emits still reach a draining consumer. Fails with
    /// [`FlowError::Cancelled`] when the flow is cancelled while the queue is
    /// full, or when the consumer has gone away.
    pub async fn put(&self, item: T) -> Result<(), FlowError> {
        tokio::select! {
            biased;
            sent = self.tx.send(item) => sent.map_err(|_| FlowError::Cancelled),
            _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
        }
    }

    /// Enqueue without waiting. Returns `false` if the queue is full or closed.
    pub fn try_put(&self, item: T) -> bool {
        self.tx.try_send(item).is_ok()
    }

    /// Free slots left in the queue.
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consuming end of a queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    name: Arc<str>,
    rx: mpsc::Receiver<T>,
    cancel: Cancellation,
    closed: bool,
}

impl<T> QueueReceiver<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next item. `Ok(None)` once every sender has been dropped
    /// and the queue is drained.
    pub async fn take(&mut self) -> Result<Option<T>, FlowError> {
        if self.closed {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
            item = self.rx.recv() => {
                self.closed = item.is_none();
                Ok(item)
            }
        }
    }

    /// Wait for the next item without observing cancellation. `None` once
    /// every sender has been dropped and the queue is drained.
    pub async fn take_remaining(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        let item = self.rx.recv().await;
        self.closed = item.is_none();
        item
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Create a bounded queue of `capacity` slots.
pub fn queue<T>(
    name: impl Into<Arc<str>>,
    capacity: usize,
    cancel: &Cancellation,
) -> (QueueSender<T>, QueueReceiver<T>) {
    let name = name.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender {
            name: Arc::clone(&name),
            tx,
            cancel: cancel.clone(),
        },
        QueueReceiver {
            name,
            rx,
            cancel: cancel.clone(),
            closed: false,
        },
    )
}

/// Wait on a data queue and an optional timer queue at once.
///
/// Returns the first item available from either. `Ok(None)` means the data
/// queue has closed; a closed timer queue is simply ignored from then on.
pub async fn select_intake(
    data: &mut QueueReceiver<Record>,
    timer: Option<&mut QueueReceiver<Tick>>,
    cancel: &Cancellation,
) -> Result<Option<Intake>, FlowError> {
    let Some(timer) = timer else {
        return Ok(data.take().await?.map(Intake::Data));
    };

    loop {
        if timer.closed {
            return Ok(data.take().await?.map(Intake::Data));
        }
        if data.closed {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            tick = timer.rx.recv() => match tick {
                Some(Tick) => return Ok(Some(Intake::Tick)),
                None => timer.closed = true,
            },
            item = data.rx.recv() => {
                data.closed = item.is_none();
                return Ok(item.map(Intake::Data));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Record;
    use rivulet_core::Schema;
    use std::time::Duration;

    fn record(ts: i64) -> Record {
        Record::materialized(ts, Arc::new(Schema::default()), vec![])
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let cancel = Cancellation::new();
        let (tx, mut rx) = queue::<i32>("q", 4, &cancel);
        for i in 0..3 {
            tx.put(i).await.unwrap();
        }
        drop(tx);
        assert_eq!(rx.take().await.unwrap(), Some(0));
        assert_eq!(rx.take().await.unwrap(), Some(1));
        assert_eq!(rx.take().await.unwrap(), Some(2));
        assert_eq!(rx.take().await.unwrap(), None);
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn test_put_blocks_when_full() {
        let cancel = Cancellation::new();
        let (tx, mut rx) = queue::<i32>("q", 1, &cancel);
        tx.put(1).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.put(2)).await;
        assert!(blocked.is_err(), "put on a full queue should wait");

        assert_eq!(rx.take().await.unwrap(), Some(1));
        tx.put(3).await.unwrap();
        assert_eq!(rx.take().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_put_and_take() {
        let cancel = Cancellation::new();
        let (tx, mut rx) = queue::<i32>("q", 1, &cancel);
        tx.put(1).await.unwrap();

        let put = tokio::spawn(async move { tx.put(2).await });
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(matches!(put.await.unwrap(), Err(FlowError::Cancelled)));
        assert!(matches!(rx.take().await, Err(FlowError::Cancelled)));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_put_with_room_succeeds_after_cancel() {
        let cancel = Cancellation::new();
        let (tx, mut rx) = queue::<i32>("q", 2, &cancel);
        cancel.cancel();
        tx.put(1).await.unwrap();
        assert!(matches!(tx.put(2).await, Ok(())));
        assert!(matches!(tx.put(3).await, Err(FlowError::Cancelled)));

        assert!(matches!(rx.take().await, Err(FlowError::Cancelled)));
        drop(tx);
        assert_eq!(rx.take_remaining().await, Some(1));
        assert_eq!(rx.take_remaining().await, Some(2));
        assert_eq!(rx.take_remaining().await, None);
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn test_select_intake_wakes_on_either_queue() {
        let cancel = Cancellation::new();
        let (dtx, mut drx) = queue::<Record>("data", 4, &cancel);
        let (ttx, mut trx) = queue::<Tick>("timer", 4, &cancel);

        ttx.put(Tick).await.unwrap();
        let got = select_intake(&mut drx, Some(&mut trx), &cancel).await.unwrap();
        assert!(matches!(got, Some(Intake::Tick)));

        dtx.put(record(7)).await.unwrap();
        let got = select_intake(&mut drx, Some(&mut trx), &cancel).await.unwrap();
        match got {
            Some(Intake::Data(r)) => assert_eq!(r.timestamp(), 7),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_select_intake_survives_closed_timer() {
        let cancel = Cancellation::new();
        let (dtx, mut drx) = queue::<Record>("data", 4, &cancel);
        let (ttx, mut trx) = queue::<Tick>("timer", 4, &cancel);
        drop(ttx);
        dtx.put(record(1)).await.unwrap();
        drop(dtx);

        let got = select_intake(&mut drx, Some(&mut trx), &cancel).await.unwrap();
        assert!(matches!(got, Some(Intake::Data(_))));
        let got = select_intake(&mut drx, Some(&mut trx), &cancel).await.unwrap();
        assert!(got.is_none());
    }
}
