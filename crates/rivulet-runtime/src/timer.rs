//! Tick producers for timer-augmented nodes
//!
//! A tick producer periodically puts a content-free [`Tick`] on its node's
//! timer queue, so windows are evicted and re-evaluated even when no data
//! arrives.

use crate::queue::{QueueSender, Tick};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn a task that ticks `timer` every `interval`.
///
/// The task stops when the flow is cancelled or the node's timer queue has
/// been dropped.
pub fn spawn_ticker(node: String, interval: Duration, timer: QueueSender<Tick>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Ticker for '{}' starting with interval: {:?}", node, interval);

        let mut interval_timer = tokio::time::interval(interval);
        interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick
        interval_timer.tick().await;

        loop {
            interval_timer.tick().await;
            if timer.put(Tick).await.is_err() {
                debug!("Ticker for '{}' stopping: timer queue closed", node);
                break;
            }
        }
    })
}
