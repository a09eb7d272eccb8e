//! Source nodes: where events enter a flow

use crate::context::NodeContext;
use crate::error::FlowError;
use crate::event::{Event, Layout, Record};
use crate::node::SourceNode;
use crate::parser::FormatSpec;
use async_trait::async_trait;
use rivulet_core::SchemaRef;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

fn layout(schema: SchemaRef, format: &FormatSpec) -> Result<Arc<Layout>, FlowError> {
    let parser = format.build_parser(&schema)?;
    Ok(Arc::new(Layout {
        schema,
        parser: Some(parser),
    }))
}

/// Replays a fixed list of events, then ends.
pub struct MemorySource {
    name: String,
    layout: Arc<Layout>,
    events: VecDeque<Event>,
}

impl MemorySource {
    pub fn new(
        name: impl Into<String>,
        schema: SchemaRef,
        format: &FormatSpec,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<Self, FlowError> {
        Ok(Self {
            name: name.into(),
            layout: layout(schema, format)?,
            events: events.into_iter().collect(),
        })
    }

    /// Delimited text rows paired with their timestamps.
    pub fn from_text_rows<'a>(
        name: impl Into<String>,
        schema: SchemaRef,
        delimiter: char,
        rows: impl IntoIterator<Item = (i64, &'a str)>,
    ) -> Result<Self, FlowError> {
        Self::new(
            name,
            schema,
            &FormatSpec::delimited(delimiter),
            rows.into_iter().map(|(ts, row)| Event::from_text(ts, row)),
        )
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.layout.schema
    }
}

#[async_trait]
impl SourceNode for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, ctx: &mut NodeContext) -> Result<(), FlowError> {
        while let Some(event) = self.events.pop_front() {
            if ctx.cancellation().is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            ctx.emit(Record::parsed(Arc::new(event), Arc::clone(&self.layout)))
                .await?;
        }
        debug!("Source '{}' exhausted", self.name);
        Ok(())
    }
}

/// Pushes events into a [`ChannelSource`]. Clones share the same source;
/// the source ends once every handle is dropped.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Event>,
}

impl IngestHandle {
    /// Enqueue `event`, waiting while the source's buffer is full.
    pub async fn push(&self, event: Event) -> Result<(), FlowError> {
        self.tx.send(event).await.map_err(|_| FlowError::Cancelled)
    }

    pub async fn push_text(&self, timestamp: i64, text: &str) -> Result<(), FlowError> {
        self.push(Event::from_text(timestamp, text)).await
    }
}

/// Ingests events pushed through [`IngestHandle`]s.
pub struct ChannelSource {
    name: String,
    layout: Arc<Layout>,
    rx: mpsc::Receiver<Event>,
}

impl ChannelSource {
    pub fn new(
        name: impl Into<String>,
        schema: SchemaRef,
        format: &FormatSpec,
        capacity: usize,
    ) -> Result<(Self, IngestHandle), FlowError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = Self {
            name: name.into(),
            layout: layout(schema, format)?,
            rx,
        };
        Ok((source, IngestHandle { tx }))
    }
}

#[async_trait]
impl SourceNode for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, ctx: &mut NodeContext) -> Result<(), FlowError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => return Err(FlowError::Cancelled),
                event = self.rx.recv() => event,
            };
            let Some(event) = event else {
                debug!("Source '{}' has no more producers", self.name);
                return Ok(());
            };
            ctx.emit(Record::parsed(Arc::new(event), Arc::clone(&self.layout)))
                .await?;
        }
    }
}
