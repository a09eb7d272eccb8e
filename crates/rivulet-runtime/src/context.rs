//! Node contexts: where a node's output goes.
//!
//! A context owns the downstream end(s) of a node's queues. The flow builder
//! picks the variant from the node's wiring:
//!
//! - **terminal**: no downstream edge; any emit is a graph protocol error
//! - **direct**: one downstream data queue
//! - **timer-augmented**: one downstream data queue plus the node's own timer
//!   queue, fed only by the node's tick producer

use crate::error::FlowError;
use crate::event::Record;
use crate::metrics::NodeMetrics;
use crate::queue::{Cancellation, QueueSender, Tick};

/// Where emitted records go.
#[derive(Debug)]
pub enum ContextKind {
    Terminal,
    Direct {
        downstream: QueueSender<Record>,
    },
    TimerAugmented {
        downstream: QueueSender<Record>,
        timer: QueueSender<Tick>,
    },
}

/// Execution context handed to a node for its whole lifetime.
#[derive(Debug)]
pub struct NodeContext {
    node: String,
    kind: ContextKind,
    cancel: Cancellation,
    metrics: NodeMetrics,
}

impl NodeContext {
    pub fn new(
        node: impl Into<String>,
        kind: ContextKind,
        cancel: Cancellation,
        metrics: NodeMetrics,
    ) -> Self {
        Self {
            node: node.into(),
            kind,
            cancel,
            metrics,
        }
    }

    /// A terminal context, mostly useful for driving nodes by hand.
    pub fn terminal(node: impl Into<String>, cancel: Cancellation) -> Self {
        Self::new(node, ContextKind::Terminal, cancel, NodeMetrics::detached())
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ContextKind::Terminal)
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Send `record` downstream, waiting while the downstream queue is full.
    pub async fn emit(&self, record: Record) -> Result<(), FlowError> {
        let downstream = match &self.kind {
            ContextKind::Terminal => {
                return Err(FlowError::GraphProtocol(format!(
                    "node '{}' has no downstream and cannot emit",
                    self.node
                )))
            }
            ContextKind::Direct { downstream } | ContextKind::TimerAugmented { downstream, .. } => {
                downstream
            }
        };
        downstream.put(record).await?;
        self.metrics.records_out.inc();
        Ok(())
    }

    /// The producing end of this node's timer queue, if it has one.
    pub fn timer_sender(&self) -> Option<QueueSender<Tick>> {
        match &self.kind {
            ContextKind::TimerAugmented { timer, .. } => Some(timer.clone()),
            _ => None,
        }
    }
}
