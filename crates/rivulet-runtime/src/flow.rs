//! Flows: wiring nodes into a running dataflow graph
//!
//! A [`FlowBuilder`] collects sources, processing nodes and edges, checks the
//! wiring, then starts one tokio task per node. The returned [`FlowHandle`]
//! cancels and joins the flow.

use crate::config::RuntimeConfig;
use crate::context::{ContextKind, NodeContext};
use crate::error::FlowError;
use crate::event::Record;
use crate::metrics::Metrics;
use crate::node::{run_node, run_source, ProcessingNode, SourceNode};
use crate::queue::{queue, Cancellation, QueueReceiver, QueueSender, Tick};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Ticks a slow node has not taken yet; the tick producer waits beyond this.
const TIMER_QUEUE_CAPACITY: usize = 4;

static NEXT_FLOW: AtomicU64 = AtomicU64::new(1);

/// Identity of a running flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u64);

impl FlowId {
    pub fn new() -> Self {
        Self(NEXT_FLOW.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// Handle of a vertex inside a [`FlowBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

enum Vertex {
    Source(Box<dyn SourceNode>),
    Processing(Box<dyn ProcessingNode>),
}

impl Vertex {
    fn name(&self) -> &str {
        match self {
            Vertex::Source(source) => source.name(),
            Vertex::Processing(node) => node.name(),
        }
    }
}

/// Collects the vertices and edges of a flow.
pub struct FlowBuilder {
    id: FlowId,
    config: RuntimeConfig,
    metrics: Metrics,
    vertices: Vec<Vertex>,
    edges: Vec<(NodeId, NodeId)>,
}

impl FlowBuilder {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            id: FlowId::new(),
            config: config.clone(),
            metrics: Metrics::new(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Report into `metrics` instead of a private registry.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn add_source(&mut self, source: impl SourceNode + 'static) -> NodeId {
        self.vertices.push(Vertex::Source(Box::new(source)));
        NodeId(self.vertices.len() - 1)
    }

    pub fn add_node(&mut self, node: impl ProcessingNode + 'static) -> NodeId {
        self.vertices.push(Vertex::Processing(Box::new(node)));
        NodeId(self.vertices.len() - 1)
    }

    /// Feed `from`'s output into `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.edges.push((from, to));
        self
    }

    /// Connect `ids` in order: `ids[0] → ids[1] → …`.
    pub fn chain(&mut self, ids: &[NodeId]) -> &mut Self {
        for pair in ids.windows(2) {
            self.edges.push((pair[0], pair[1]));
        }
        self
    }

    fn wiring_error(&self, id: NodeId, problem: &str) -> FlowError {
        let name = self.vertices.get(id.0).map_or("?", Vertex::name);
        FlowError::GraphProtocol(format!("{}: node '{}' {}", self.id, name, problem))
    }

    /// Downstream vertex of every vertex, after checking the graph shape.
    fn validate(&self) -> Result<Vec<Option<NodeId>>, FlowError> {
        let count = self.vertices.len();
        let mut names = rustc_hash::FxHashSet::default();
        for (i, vertex) in self.vertices.iter().enumerate() {
            if !names.insert(vertex.name()) {
                return Err(self.wiring_error(NodeId(i), "is declared twice"));
            }
        }

        let mut downstream: Vec<Option<NodeId>> = vec![None; count];
        let mut upstreams = vec![0usize; count];
        for &(from, to) in &self.edges {
            if from.0 >= count || to.0 >= count {
                return Err(FlowError::GraphProtocol(format!(
                    "{}: edge refers to an unknown node",
                    self.id
                )));
            }
            if matches!(self.vertices[to.0], Vertex::Source(_)) {
                return Err(self.wiring_error(to, "is a source and takes no input"));
            }
            if downstream[from.0].replace(to).is_some() {
                return Err(self.wiring_error(from, "has more than one downstream edge"));
            }
            upstreams[to.0] += 1;
        }

        for (i, vertex) in self.vertices.iter().enumerate() {
            let id = NodeId(i);
            match vertex {
                Vertex::Source(_) if downstream[i].is_none() => {
                    return Err(self.wiring_error(id, "is a source with no downstream edge"));
                }
                Vertex::Processing(_) if upstreams[i] == 0 => {
                    return Err(self.wiring_error(id, "has no upstream edge"));
                }
                Vertex::Processing(node) if node.wants_timer() && downstream[i].is_none() => {
                    return Err(self.wiring_error(id, "needs a timer but has no downstream edge"));
                }
                _ => {}
            }
        }

        // out-degree is at most one, so a cycle shows up as a revisit on a walk
        for start in 0..count {
            let mut steps = 0;
            let mut at = downstream[start];
            while let Some(next) = at {
                steps += 1;
                if next.0 == start {
                    return Err(self.wiring_error(NodeId(start), "is part of a cycle"));
                }
                if steps > count {
                    break;
                }
                at = downstream[next.0];
            }
        }

        Ok(downstream)
    }

    /// Check the wiring and start every node on its own task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<FlowHandle, FlowError> {
        let downstream = self.validate()?;
        let cancel = Cancellation::new();
        let capacity = self.config.queue_capacity;

        // One input queue per processing node, shared by all its upstreams.
        let mut inputs: Vec<Option<(QueueSender<Record>, QueueReceiver<Record>)>> = self
            .vertices
            .iter()
            .map(|vertex| match vertex {
                Vertex::Processing(node) => Some(queue(node.name(), capacity, &cancel)),
                Vertex::Source(_) => None,
            })
            .collect();

        let senders: Vec<Option<QueueSender<Record>>> = inputs
            .iter()
            .map(|input| input.as_ref().map(|(tx, _)| tx.clone()))
            .collect();

        let mut tasks = Vec::with_capacity(self.vertices.len());
        for (i, vertex) in self.vertices.into_iter().enumerate() {
            let name = vertex.name().to_string();
            let metrics = self.metrics.node(&name);
            let out = downstream[i].and_then(|to| senders[to.0].clone());

            let task = match vertex {
                Vertex::Source(source) => {
                    let kind = match out {
                        Some(downstream) => ContextKind::Direct { downstream },
                        None => ContextKind::Terminal,
                    };
                    let ctx = NodeContext::new(name.clone(), kind, cancel.clone(), metrics);
                    supervise(cancel.clone(), run_source(source, ctx))
                }
                Vertex::Processing(node) => {
                    let Some((_, input)) = inputs[i].take() else {
                        continue;
                    };
                    let (kind, timer) = match (out, node.wants_timer()) {
                        (Some(downstream), true) => {
                            let (timer_tx, timer_rx) =
                                queue::<Tick>(format!("{}:timer", name), TIMER_QUEUE_CAPACITY, &cancel);
                            (
                                ContextKind::TimerAugmented {
                                    downstream,
                                    timer: timer_tx,
                                },
                                Some(timer_rx),
                            )
                        }
                        (Some(downstream), false) => (ContextKind::Direct { downstream }, None),
                        (None, _) => (ContextKind::Terminal, None),
                    };
                    let ctx = NodeContext::new(name.clone(), kind, cancel.clone(), metrics);
                    supervise(cancel.clone(), run_node(node, ctx, input, timer))
                }
            };
            tasks.push((name, task));
        }
        // Only upstream contexts may keep input queues open.
        drop(senders);
        drop(inputs);

        info!("Flow {} started with {} nodes", self.id, tasks.len());
        Ok(FlowHandle {
            id: self.id,
            cancel,
            metrics: self.metrics,
            tasks,
        })
    }
}

/// Spawn `worker`, cancelling the whole flow if it fails.
fn supervise<F>(cancel: Cancellation, worker: F) -> JoinHandle<Result<(), FlowError>>
where
    F: std::future::Future<Output = Result<(), FlowError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = worker.await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    })
}

/// A running flow.
pub struct FlowHandle {
    id: FlowId,
    cancel: Cancellation,
    metrics: Metrics,
    tasks: Vec<(String, JoinHandle<Result<(), FlowError>>)>,
}

impl FlowHandle {
    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ask every node to stop. Sources stop producing and blocked queue
    /// operations return. Each node processes what is already in flight and
    /// runs its `close` after its upstream nodes have closed.
    pub fn cancel(&self) {
        info!("Cancelling flow {}", self.id);
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    /// Wait for every node to finish. Returns the first error any node
    /// failed with.
    pub async fn join(self) -> Result<(), FlowError> {
        let mut first: Option<FlowError> = None;
        for (name, task) in self.tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Worker '{}' of flow {} panicked: {}", name, self.id, e);
                    self.cancel.cancel();
                    Err(FlowError::Join(name, e.to_string()))
                }
            };
            if let Err(e) = outcome {
                if first.is_none() {
                    first = Some(e);
                } else {
                    warn!("Flow {} also failed with: {}", self.id, e);
                }
            }
        }
        match first {
            None => {
                info!("Flow {} finished", self.id);
                Ok(())
            }
            Some(e) => Err(e),
        }
    }
}
