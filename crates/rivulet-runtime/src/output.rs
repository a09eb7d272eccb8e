//! Output node: the terminal fan-out of a query
//!
//! Every row reaching an [`OutputNode`] is
//!
//! - rendered as a tab-separated line (record timestamp first, `null` for
//!   nulls) and sent to each attached [`Session`], unless nobody is attached;
//! - when a sink target is set, encoded with the sink codec and put on the
//!   delivery queue registered under the target name in [`SinkBindings`].
//!
//! The control plane drives a running node through its [`OutputConnector`].

use crate::codec;
use crate::context::NodeContext;
use crate::error::FlowError;
use crate::event::Record;
use crate::node::ProcessingNode;
use crate::parser::FormatSpec;
use crate::queue::{Cancellation, Intake, QueueSender, DEFAULT_QUEUE_CAPACITY};
use crate::session::{Session, SubscriberSet};
use crate::symbols::{BindingOwner, SinkBindings, StreamSymbol, SymbolTable};
use async_trait::async_trait;
use bytes::Bytes;
use rivulet_core::{Schema, SchemaRef, Value};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

/// Header line sent to a session when it attaches.
pub fn format_header(schema: &Schema) -> String {
    let mut header = String::from("timestamp");
    for field in schema.fields() {
        header.push('\t');
        header.push_str(&field.name);
    }
    header
}

/// One output row as a text line.
pub fn format_line(record: &Record) -> String {
    let mut line = record.timestamp().to_string();
    for index in 0..record.schema().len() {
        let _ = write!(line, "\t{}", record.value(index));
    }
    line
}

#[derive(Debug, Default)]
struct SinkState {
    target: Option<String>,
    sender: Option<QueueSender<Bytes>>,
    owns_symbol: bool,
    cancel: Option<Cancellation>,
    closed: bool,
}

/// State shared by the node and its connector.
#[derive(Debug)]
struct Shared {
    name: String,
    header: String,
    sink_schema: SchemaRef,
    subscribers: SubscriberSet,
    symbols: SymbolTable,
    bindings: SinkBindings,
    sink_capacity: usize,
    owner: BindingOwner,
    state: Mutex<SinkState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the delivery queue and the stream symbol for `target`.
    fn activate(&self, state: &mut SinkState, target: &str) -> Result<(), FlowError> {
        let Some(cancel) = state.cancel.clone() else {
            return Ok(());
        };
        if self.symbols.resolve(target).is_some() {
            return Err(FlowError::BindingConflict(target.to_string()));
        }
        let sender = self
            .bindings
            .bind(target, self.owner, self.sink_capacity, &cancel)?;
        let symbol = StreamSymbol::new(
            target,
            Arc::clone(&self.sink_schema),
            FormatSpec::binary(&self.sink_schema),
        );
        if let Err(e) = self.symbols.add(symbol, Some(self.owner)) {
            self.bindings.drop_binding(target, self.owner);
            return Err(e);
        }
        state.sender = Some(sender);
        state.owns_symbol = true;
        info!("Output '{}' publishing stream '{}'", self.name, target);
        Ok(())
    }

    /// Tear down whatever the current target registered.
    fn decommission(&self, state: &mut SinkState) {
        let Some(target) = state.target.as_deref() else {
            return;
        };
        if state.owns_symbol {
            self.symbols.remove_owned(target, self.owner);
            state.owns_symbol = false;
        }
        if self.bindings.drop_binding(target, self.owner) {
            info!("Output '{}' stopped publishing '{}'", self.name, target);
        }
        state.sender = None;
    }

    /// Activate the recorded target; on failure external delivery stays off.
    fn activate_target(&self, state: &mut SinkState) -> Result<(), FlowError> {
        let Some(target) = state.target.clone() else {
            return Ok(());
        };
        self.activate(state, &target).map_err(|e| {
            state.target = None;
            e
        })
    }
}

/// Control-plane handle of an [`OutputNode`].
#[derive(Debug, Clone)]
pub struct OutputConnector {
    shared: Arc<Shared>,
}

impl OutputConnector {
    /// Send the header line to `session`, then start delivering rows to it.
    pub fn attach(&self, session: Arc<dyn Session>) {
        session.send_info(&self.shared.header);
        debug!("Session '{}' attached to '{}'", session.id(), self.shared.name);
        self.shared.subscribers.add(session);
    }

    pub fn detach(&self, session_id: &str) -> bool {
        self.shared.subscribers.remove(session_id).is_some()
    }

    pub fn subscribers(&self) -> &SubscriberSet {
        &self.shared.subscribers
    }

    /// Point external delivery at `target`, or turn it off with `None`.
    ///
    /// The current target is decommissioned before the new one is
    /// activated. Retargeting to the current name does nothing. Before the
    /// node opens the target is only recorded.
    pub fn set_sink_target(&self, target: Option<&str>) -> Result<(), FlowError> {
        let mut state = self.shared.lock();
        if state.target.as_deref() == target {
            return Ok(());
        }
        self.shared.decommission(&mut state);
        state.target = target.map(str::to_string);
        if state.closed {
            return Ok(());
        }
        self.shared.activate_target(&mut state)
    }

    pub fn sink_target(&self) -> Option<String> {
        self.shared.lock().target.clone()
    }

    /// Stream name this node currently owns in the symbol table.
    pub fn published_stream(&self) -> Option<String> {
        let state = self.shared.lock();
        if state.owns_symbol {
            state.target.clone()
        } else {
            None
        }
    }
}

/// Terminal node delivering rows to sessions and an optional external sink.
pub struct OutputNode {
    input: SchemaRef,
    sink_fields: Vec<usize>,
    shared: Arc<Shared>,
}

impl OutputNode {
    pub fn new(
        name: impl Into<String>,
        input: SchemaRef,
        symbols: SymbolTable,
        bindings: SinkBindings,
    ) -> (Self, OutputConnector) {
        Self::with_sink_capacity(name, input, symbols, bindings, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`OutputNode::new`], with `sink_capacity` slots in the external
    /// delivery queue.
    pub fn with_sink_capacity(
        name: impl Into<String>,
        input: SchemaRef,
        symbols: SymbolTable,
        bindings: SinkBindings,
        sink_capacity: usize,
    ) -> (Self, OutputConnector) {
        let sink_schema = Arc::new(input.distinct());
        let sink_fields = sink_schema
            .fields()
            .iter()
            .filter_map(|field| input.index_of(&field.name))
            .collect();
        let shared = Arc::new(Shared {
            name: name.into(),
            header: format_header(&input),
            sink_schema,
            subscribers: SubscriberSet::new(),
            symbols,
            bindings,
            sink_capacity,
            owner: BindingOwner::new(),
            state: Mutex::new(SinkState::default()),
        });
        let connector = OutputConnector {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                input,
                sink_fields,
                shared,
            },
            connector,
        )
    }

    pub fn input_schema(&self) -> &SchemaRef {
        &self.input
    }

    async fn deliver_to_sink(
        &self,
        sender: QueueSender<Bytes>,
        record: &Record,
        ctx: &NodeContext,
    ) -> Result<(), FlowError> {
        let values: Vec<Value> = self
            .sink_fields
            .iter()
            .map(|&index| record.value(index).clone())
            .collect();
        let encoded = match codec::encode(&self.shared.sink_schema, record.timestamp(), &values) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!("Dropping output record from sink: {}", e);
                ctx.metrics().sink_drops.inc();
                return Ok(());
            }
        };
        match sender.put(encoded).await {
            Ok(()) => Ok(()),
            Err(e) if ctx.cancellation().is_cancelled() => Err(e),
            Err(_) => {
                debug!("Sink of '{}' went away; record dropped", self.shared.name);
                ctx.metrics().sink_drops.inc();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ProcessingNode for OutputNode {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn open(&mut self, ctx: &mut NodeContext) -> Result<(), FlowError> {
        let mut state = self.shared.lock();
        state.cancel = Some(ctx.cancellation().clone());
        match self.shared.activate_target(&mut state) {
            Ok(()) => Ok(()),
            Err(e @ FlowError::BindingConflict(_)) => {
                error!("Cannot create stream for '{}': {}", self.shared.name, e);
                self.shared
                    .subscribers
                    .broadcast(&format!("Cannot create stream: {}", e));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn take_event(&mut self, intake: Intake, ctx: &mut NodeContext) -> Result<(), FlowError> {
        let Intake::Data(record) = intake else {
            return Ok(());
        };

        let sender = self.shared.lock().sender.clone();
        if let Some(sender) = sender {
            self.deliver_to_sink(sender, &record, ctx).await?;
        }

        let subscribers = self.shared.subscribers.snapshot();
        if subscribers.is_empty() {
            return Ok(());
        }
        let line = format_line(&record);
        for session in subscribers {
            session.send_info(&line);
        }
        Ok(())
    }

    async fn close(&mut self, _ctx: &mut NodeContext) -> Result<(), FlowError> {
        let mut state = self.shared.lock();
        self.shared.decommission(&mut state);
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use rivulet_core::{FieldDescriptor, Type};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            FieldDescriptor::new("a", Type::Int),
            FieldDescriptor::not_null("c", Type::Long),
        ]))
    }

    fn node() -> (OutputNode, OutputConnector, SymbolTable, SinkBindings) {
        let symbols = SymbolTable::new();
        let bindings = SinkBindings::new();
        let (node, connector) = OutputNode::new("out", schema(), symbols.clone(), bindings.clone());
        (node, connector, symbols, bindings)
    }

    #[test]
    fn test_header_and_line_format() {
        assert_eq!(format_header(&schema()), "timestamp\ta\tc");
        let record = Record::materialized(36, schema(), vec![Value::Null, Value::Long(2)]);
        assert_eq!(format_line(&record), "36\tnull\t2");
    }

    #[tokio::test]
    async fn test_attach_sends_header_then_rows() {
        let (mut node, connector, _, _) = node();
        let session = MemorySession::new("s1");
        connector.attach(session.clone());

        let mut ctx = NodeContext::terminal("out", Cancellation::new());
        node.open(&mut ctx).await.unwrap();
        let record = Record::materialized(200, schema(), vec![Value::Int(1), Value::Long(3)]);
        node.take_event(Intake::Data(record), &mut ctx).await.unwrap();

        assert_eq!(session.lines(), vec!["timestamp\ta\tc", "200\t1\t3"]);
        assert!(connector.detach("s1"));
        assert!(!connector.detach("s1"));
    }

    #[tokio::test]
    async fn test_sink_delivery_and_nullability_drop() {
        let (mut node, connector, symbols, bindings) = node();
        connector.set_sink_target(Some("results")).unwrap();
        // recorded only until the node opens
        assert!(connector.published_stream().is_none());

        let mut ctx = NodeContext::terminal("out", Cancellation::new());
        node.open(&mut ctx).await.unwrap();
        assert_eq!(connector.published_stream().as_deref(), Some("results"));
        assert!(symbols.resolve("results").is_some());

        let mut rx = bindings.take_receiver("results").unwrap();
        let good = Record::materialized(1, schema(), vec![Value::Int(1), Value::Long(2)]);
        let bad = Record::materialized(2, schema(), vec![Value::Int(1), Value::Null]);
        node.take_event(Intake::Data(good), &mut ctx).await.unwrap();
        node.take_event(Intake::Data(bad), &mut ctx).await.unwrap();
        assert_eq!(ctx.metrics().sink_drops.get(), 1);

        let bytes = rx.take().await.unwrap().unwrap();
        let decoded = codec::decode(&schema(), &bytes).unwrap();
        assert_eq!(decoded.timestamp, 1);

        node.close(&mut ctx).await.unwrap();
        assert!(symbols.resolve("results").is_none());
        assert!(!bindings.contains("results"));
    }

    #[tokio::test]
    async fn test_binding_conflict_at_open_is_reported_not_fatal() {
        let (mut node, connector, symbols, _) = node();
        symbols
            .add(
                StreamSymbol::new("taken", schema(), FormatSpec::default()),
                None,
            )
            .unwrap();
        let session = MemorySession::new("s1");
        connector.attach(session.clone());
        connector.set_sink_target(Some("taken")).unwrap();

        let mut ctx = NodeContext::terminal("out", Cancellation::new());
        node.open(&mut ctx).await.unwrap();
        assert!(connector.published_stream().is_none());
        assert!(session.lines()[1].contains("taken"));

        // the conflicting user symbol survives close
        node.close(&mut ctx).await.unwrap();
        assert!(symbols.resolve("taken").is_some());
    }

    #[tokio::test]
    async fn test_retarget_decommissions_before_activating() {
        let (mut node, connector, symbols, bindings) = node();
        let mut ctx = NodeContext::terminal("out", Cancellation::new());
        node.open(&mut ctx).await.unwrap();

        connector.set_sink_target(Some("first")).unwrap();
        assert!(bindings.contains("first"));
        // same name: no-op
        connector.set_sink_target(Some("first")).unwrap();
        assert!(bindings.contains("first"));

        connector.set_sink_target(Some("second")).unwrap();
        assert!(!bindings.contains("first"));
        assert!(symbols.resolve("first").is_none());
        assert_eq!(connector.published_stream().as_deref(), Some("second"));

        connector.set_sink_target(None).unwrap();
        assert!(symbols.is_empty());
        assert!(connector.published_stream().is_none());
    }

    #[tokio::test]
    async fn test_retarget_conflict_returned_to_caller() {
        let (mut node, connector, symbols, _) = node();
        symbols
            .add(
                StreamSymbol::new("taken", schema(), FormatSpec::default()),
                None,
            )
            .unwrap();
        let mut ctx = NodeContext::terminal("out", Cancellation::new());
        node.open(&mut ctx).await.unwrap();
        assert!(matches!(
            connector.set_sink_target(Some("taken")),
            Err(FlowError::BindingConflict(_))
        ));
        assert!(connector.sink_target().is_none());
    }
}
