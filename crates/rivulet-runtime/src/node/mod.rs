//! Processing nodes and the worker loop that drives them
//!
//! A node is a vertex of the dataflow graph. Its lifecycle is
//! `open → take_event* → close`; each node runs on its own tokio task and
//! reads from one data queue plus, optionally, its own timer queue.

mod filter;
mod project;

pub use filter::FilterNode;
pub use project::{ProjectNode, Projection};

use crate::context::NodeContext;
use crate::error::FlowError;
use crate::event::Record;
use crate::queue::{select_intake, Intake, QueueReceiver, Tick};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, error, info};

/// A vertex of the dataflow graph that consumes upstream records.
#[async_trait]
pub trait ProcessingNode: Send {
    fn name(&self) -> &str;

    /// True if the node needs a timer queue and a tick producer.
    fn wants_timer(&self) -> bool {
        false
    }

    /// Acquire resources. Called once, before any `take_event`.
    async fn open(&mut self, _ctx: &mut NodeContext) -> Result<(), FlowError> {
        Ok(())
    }

    /// Process one data record or tick; may emit zero or more records.
    ///
    /// Errors returned here are fatal to the flow, except `Cancelled`.
    async fn take_event(&mut self, intake: Intake, ctx: &mut NodeContext)
        -> Result<(), FlowError>;

    /// Release resources. Runs after every upstream producer has closed.
    async fn close(&mut self, _ctx: &mut NodeContext) -> Result<(), FlowError> {
        Ok(())
    }
}

/// A vertex with no upstream queue that produces records on its own.
#[async_trait]
pub trait SourceNode: Send {
    fn name(&self) -> &str;

    /// Produce records until exhausted or cancelled.
    async fn run(&mut self, ctx: &mut NodeContext) -> Result<(), FlowError>;
}

/// Drive `node` until its input closes or the flow is cancelled.
///
/// `close` runs only once every upstream sender has been dropped, and the
/// context, with every downstream sender, is dropped only after `close` has
/// returned. After cancellation the node keeps processing the records still
/// in flight; after a fatal error it cancels the flow and discards them.
pub async fn run_node(
    mut node: Box<dyn ProcessingNode>,
    mut ctx: NodeContext,
    mut input: QueueReceiver<Record>,
    mut timer: Option<QueueReceiver<Tick>>,
) -> Result<(), FlowError> {
    let name = node.name().to_string();
    node.open(&mut ctx).await?;
    info!("Node '{}' opened", name);

    let outcome = loop {
        let intake = match select_intake(&mut input, timer.as_mut(), ctx.cancellation()).await {
            Ok(Some(intake)) => intake,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        if matches!(intake, Intake::Data(_)) {
            ctx.metrics().records_in.inc();
        }
        let started = Instant::now();
        let result = node.take_event(intake, &mut ctx).await;
        ctx.metrics()
            .processing_latency
            .observe(started.elapsed().as_secs_f64());
        if let Err(e) = result {
            break Err(e);
        }
    };

    let outcome = match outcome {
        Err(FlowError::Cancelled) => {
            debug!("Node '{}' observed cancellation, draining input", name);
            drain(node.as_mut(), &mut ctx, &mut input).await
        }
        Err(e) => {
            ctx.cancellation().cancel();
            let mut discarded = 0usize;
            while input.take_remaining().await.is_some() {
                discarded += 1;
            }
            debug!("Node '{}' discarded {} records after failing", name, discarded);
            Err(e)
        }
        Ok(()) => Ok(()),
    };

    let closed = match node.close(&mut ctx).await {
        Err(FlowError::Cancelled) => Ok(()),
        other => other,
    };
    drop(ctx);

    match (&outcome, &closed) {
        (Err(e), _) | (Ok(()), Err(e)) => error!("Node '{}' failed: {}", name, e),
        _ => info!("Node '{}' closed", name),
    }
    outcome.and(closed)
}

/// Process data still queued after cancellation until the input closes.
/// Ticks are no longer read.
async fn drain(
    node: &mut dyn ProcessingNode,
    ctx: &mut NodeContext,
    input: &mut QueueReceiver<Record>,
) -> Result<(), FlowError> {
    while let Some(record) = input.take_remaining().await {
        ctx.metrics().records_in.inc();
        match node.take_event(Intake::Data(record), ctx).await {
            Ok(()) | Err(FlowError::Cancelled) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Drive a source until it finishes, then drop its downstream sender.
pub async fn run_source(
    mut source: Box<dyn SourceNode>,
    mut ctx: NodeContext,
) -> Result<(), FlowError> {
    let name = source.name().to_string();
    info!("Source '{}' started", name);
    let result = match source.run(&mut ctx).await {
        Err(FlowError::Cancelled) => Ok(()),
        other => other,
    };
    drop(ctx);
    match &result {
        Ok(()) => info!("Source '{}' finished", name),
        Err(e) => error!("Source '{}' failed: {}", name, e),
    }
    result
}
