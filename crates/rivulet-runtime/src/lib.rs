//! Rivulet Runtime - dataflow engine for continuous grouped queries
//!
//! A flow is a graph of nodes connected by bounded queues. Sources push
//! records in, processing nodes filter, project and aggregate them over a
//! sliding time window, and output nodes deliver results to client sessions
//! or to a named external stream.
//!
//! ```rust,no_run
//! use rivulet_core::{Expr, FieldDescriptor, Schema, Type};
//! use rivulet_runtime::{
//!     AggregateSpec, FlowBuilder, MemoryBuffers, MemoryOutputNode, MemorySource,
//!     RuntimeConfig, WindowedAggregateNode, WindowedAggregator, WindowedQuery,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), rivulet_runtime::FlowError> {
//! let config = RuntimeConfig::default();
//! let schema = Arc::new(Schema::new(vec![FieldDescriptor::new("a", Type::Int)]));
//! let source = MemorySource::from_text_rows("input", Arc::clone(&schema), ',', [(1, "1")])?;
//!
//! let query = WindowedQuery::new(Duration::from_secs(10))
//!     .aggregate(AggregateSpec::count_star("c"));
//! let aggregator =
//!     WindowedAggregator::new("agg", &schema, query, config.aggregator_settings())?;
//!
//! let buffers = MemoryBuffers::new();
//! let mut flow = FlowBuilder::new(&config);
//! let src = flow.add_source(source);
//! let agg = flow.add_node(WindowedAggregateNode::new(aggregator, config.tick_interval()));
//! let out = flow.add_node(MemoryOutputNode::new("out", &buffers, "results"));
//! flow.chain(&[src, agg, out]);
//! flow.start()?.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate_node;
pub mod aggregation;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod flow;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod node;
pub mod output;
pub mod parser;
pub mod queue;
pub mod session;
pub mod source;
pub mod symbols;
pub mod timer;
pub mod window;

pub use aggregate_node::{AggregatorSettings, WindowedAggregateNode, WindowedAggregator, WindowedQuery};
pub use aggregation::{Accumulator, AggregateKind, AggregateSpec};
pub use config::{ConfigError, LoggingConfig, RuntimeConfig};
pub use context::{ContextKind, NodeContext};
pub use error::FlowError;
pub use event::{Event, Record, SharedEvent};
pub use flow::{FlowBuilder, FlowHandle, FlowId, NodeId};
pub use memory::{MemoryBuffer, MemoryBuffers, MemoryOutputNode};
pub use metrics::{Metrics, NodeMetrics};
pub use node::{FilterNode, ProcessingNode, ProjectNode, Projection, SourceNode};
pub use output::{OutputConnector, OutputNode};
pub use parser::FormatSpec;
pub use queue::{queue, Cancellation, Intake, QueueReceiver, QueueSender, Tick};
pub use session::{ChannelSession, MemorySession, Session, SubscriberSet};
pub use source::{ChannelSource, IngestHandle, MemorySource};
pub use symbols::{BindingOwner, SinkBindings, StreamSymbol, SymbolTable};
pub use window::{TimeWindow, WindowEntry};
