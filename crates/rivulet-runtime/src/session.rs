//! Interactive client sessions and the subscriber sets of output nodes

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A connected client that receives text lines.
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    /// Deliver one line. Must not block the caller.
    fn send_info(&self, text: &str);
}

impl fmt::Debug for dyn Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id()).finish()
    }
}

/// Live sessions attached to one output node, in attach order.
///
/// Broadcasting works on a snapshot, so sessions may attach or detach while
/// a row is being delivered.
#[derive(Debug, Clone, Default)]
pub struct SubscriberSet {
    inner: Arc<Mutex<IndexMap<String, Arc<dyn Session>, FxBuildHasher>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session`, replacing any session with the same id.
    pub fn add(&self, session: Arc<dyn Session>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(session.id().to_string(), session);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn Session>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.shift_remove(id)
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Session>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.values().cloned().collect()
    }

    /// Send `text` to every session attached right now.
    pub fn broadcast(&self, text: &str) {
        for session in self.snapshot() {
            session.send_info(text);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session that keeps every line it receives.
#[derive(Debug, Default)]
pub struct MemorySession {
    id: String,
    lines: Mutex<Vec<String>>,
}

impl MemorySession {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            lines: Mutex::new(Vec::new()),
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_info(&self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
    }
}

/// Session forwarding lines to an async consumer, e.g. a socket writer.
///
/// Lines sent after the receiver is gone are discarded.
#[derive(Debug)]
pub struct ChannelSession {
    id: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSession {
    pub fn new(id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { id: id.into(), tx }), rx)
    }
}

impl Session for ChannelSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_info(&self, text: &str) {
        let _ = self.tx.send(text.to_string());
    }
}
