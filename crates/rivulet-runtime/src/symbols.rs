//! Top-level symbol table and external sink bindings
//!
//! Output nodes that publish their results under a stream name register two
//! things: a [`StreamSymbol`] describing the stream, so other statements can
//! read it, and a bounded delivery queue in [`SinkBindings`], from which an
//! external sink system takes encoded records. Both registrations carry a
//! [`BindingOwner`] token so only the registering node can remove them.

use crate::error::FlowError;
use crate::parser::FormatSpec;
use crate::queue::{queue, Cancellation, QueueReceiver, QueueSender};
use bytes::Bytes;
use rivulet_core::SchemaRef;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of the node instance that registered a symbol or binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingOwner(u64);

impl BindingOwner {
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for BindingOwner {
    fn default() -> Self {
        Self::new()
    }
}

/// A named stream that statements can read from.
#[derive(Debug, Clone)]
pub struct StreamSymbol {
    pub name: String,
    pub schema: SchemaRef,
    pub format: FormatSpec,
}

impl StreamSymbol {
    pub fn new(name: impl Into<String>, schema: SchemaRef, format: FormatSpec) -> Self {
        Self {
            name: name.into(),
            schema,
            format,
        }
    }
}

#[derive(Debug)]
struct SymbolEntry {
    symbol: StreamSymbol,
    owner: Option<BindingOwner>,
}

/// Shared top-level symbol table. Clones share one table.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    inner: Arc<Mutex<FxHashMap<String, SymbolEntry>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, name: &str) -> Option<StreamSymbol> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(name).map(|entry| entry.symbol.clone())
    }

    /// Add `symbol`. Fails with [`FlowError::BindingConflict`] if the name is
    /// already taken.
    pub fn add(&self, symbol: StreamSymbol, owner: Option<BindingOwner>) -> Result<(), FlowError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(&symbol.name) {
            return Err(FlowError::BindingConflict(symbol.name));
        }
        info!("CREATE STREAM ({})", symbol.name);
        inner.insert(symbol.name.clone(), SymbolEntry { symbol, owner });
        Ok(())
    }

    /// Remove regardless of owner.
    pub fn remove(&self, name: &str) -> Option<StreamSymbol> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(name).map(|entry| entry.symbol)
    }

    /// Remove only if `owner` registered the symbol. Returns true if removed.
    pub fn remove_owned(&self, name: &str, owner: BindingOwner) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(name) {
            Some(entry) if entry.owner == Some(owner) => {
                inner.remove(name);
                info!("DROP STREAM ({})", name);
                true
            }
            _ => false,
        }
    }

    pub fn owner_of(&self, name: &str) -> Option<BindingOwner> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(name).and_then(|entry| entry.owner)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct SinkBinding {
    owner: BindingOwner,
    receiver: Option<QueueReceiver<Bytes>>,
}

/// Delivery queues of published streams, keyed by stream name.
#[derive(Debug, Clone, Default)]
pub struct SinkBindings {
    inner: Arc<Mutex<FxHashMap<String, SinkBinding>>>,
}

impl SinkBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the delivery queue for `name` and return its producing end.
    pub fn bind(
        &self,
        name: &str,
        owner: BindingOwner,
        capacity: usize,
        cancel: &Cancellation,
    ) -> Result<QueueSender<Bytes>, FlowError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(name) {
            return Err(FlowError::BindingConflict(name.to_string()));
        }
        let (tx, rx) = queue(format!("sink:{}", name), capacity, cancel);
        inner.insert(
            name.to_string(),
            SinkBinding {
                owner,
                receiver: Some(rx),
            },
        );
        debug!("Bound sink '{}' with capacity {}", name, capacity);
        Ok(tx)
    }

    /// Hand the consuming end of `name`'s queue to an external sink. Only
    /// the first caller gets it.
    pub fn take_receiver(&self, name: &str) -> Option<QueueReceiver<Bytes>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get_mut(name).and_then(|binding| binding.receiver.take())
    }

    /// Drop `name`'s binding if `owner` created it.
    pub fn drop_binding(&self, name: &str, owner: BindingOwner) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(name) {
            Some(binding) if binding.owner == owner => {
                inner.remove(name);
                debug!("Dropped sink '{}'", name);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::{FieldDescriptor, Schema, Type};

    fn symbol(name: &str) -> StreamSymbol {
        let schema = Arc::new(Schema::new(vec![FieldDescriptor::new("a", Type::Int)]));
        let format = FormatSpec::binary(&schema);
        StreamSymbol::new(name, schema, format)
    }

    #[test]
    fn test_add_resolve_conflict() {
        let table = SymbolTable::new();
        table.add(symbol("s"), None).unwrap();
        assert!(table.resolve("s").is_some());
        assert!(table.resolve("t").is_none());
        assert!(matches!(
            table.add(symbol("s"), None),
            Err(FlowError::BindingConflict(name)) if name == "s"
        ));
    }

    #[test]
    fn test_only_owner_removes() {
        let table = SymbolTable::new();
        let owner = BindingOwner::new();
        let other = BindingOwner::new();
        table.add(symbol("s"), Some(owner)).unwrap();
        table.add(symbol("user"), None).unwrap();

        assert!(!table.remove_owned("s", other));
        assert!(!table.remove_owned("user", owner));
        assert_eq!(table.owner_of("s"), Some(owner));
        assert!(table.remove_owned("s", owner));
        assert!(table.resolve("s").is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_binding_round_trip() {
        let bindings = SinkBindings::new();
        let cancel = Cancellation::new();
        let owner = BindingOwner::new();
        let tx = bindings.bind("out", owner, 2, &cancel).unwrap();
        assert!(bindings.bind("out", BindingOwner::new(), 2, &cancel).is_err());

        let mut rx = bindings.take_receiver("out").unwrap();
        assert!(bindings.take_receiver("out").is_none());
        tx.put(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(rx.take().await.unwrap(), Some(Bytes::from_static(b"x")));

        assert!(!bindings.drop_binding("out", BindingOwner::new()));
        assert!(bindings.drop_binding("out", owner));
        assert!(!bindings.contains("out"));
    }
}
