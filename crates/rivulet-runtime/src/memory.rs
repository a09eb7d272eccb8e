//! Named in-memory result buffers
//!
//! A [`MemoryOutputNode`] appends every record it takes to a buffer
//! registered in [`MemoryBuffers`], where a client can read it back later.

use crate::context::NodeContext;
use crate::error::FlowError;
use crate::event::Record;
use crate::node::ProcessingNode;
use crate::queue::Intake;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One named buffer. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryBuffer {
    pub fn push(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    /// Copy of every record received so far.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remove and return every record received so far.
    pub fn drain(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of named buffers, shared across flows.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffers {
    inner: Arc<Mutex<FxHashMap<String, MemoryBuffer>>>,
}

impl MemoryBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer called `name`, created empty on first use.
    pub fn buffer(&self, name: &str) -> MemoryBuffer {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(name.to_string()).or_default().clone()
    }

    pub fn get(&self, name: &str) -> Option<MemoryBuffer> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<MemoryBuffer> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(name)
    }
}

/// Terminal node collecting its input into a [`MemoryBuffer`].
pub struct MemoryOutputNode {
    name: String,
    buffer_name: String,
    buffer: MemoryBuffer,
}

impl MemoryOutputNode {
    pub fn new(name: impl Into<String>, buffers: &MemoryBuffers, buffer_name: &str) -> Self {
        Self {
            name: name.into(),
            buffer_name: buffer_name.to_string(),
            buffer: buffers.buffer(buffer_name),
        }
    }
}

#[async_trait]
impl ProcessingNode for MemoryOutputNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_event(&mut self, intake: Intake, _ctx: &mut NodeContext) -> Result<(), FlowError> {
        if let Intake::Data(record) = intake {
            self.buffer.push(record);
        }
        Ok(())
    }

    async fn close(&mut self, _ctx: &mut NodeContext) -> Result<(), FlowError> {
        debug!(
            "Memory output '{}' holds {} records in '{}'",
            self.name,
            self.buffer.len(),
            self.buffer_name
        );
        Ok(())
    }
}
