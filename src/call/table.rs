use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{CallContext, CallTag};

#[derive(Debug)]
struct Inner {
    // Completion actions are `Send` but not `Sync`; the lock makes the map shareable.
    contexts: DashMap<CallTag, Mutex<CallContext>>,
    next_tag: AtomicU64,
}

/// Registered call contexts, keyed by tag.
///
/// The table owns a context from registration until [`take`](Self::take)
/// moves it out for completion. Removal is the only way out, so each
/// registered context is completed (or abandoned) exactly once.
#[derive(Debug, Clone)]
pub struct CallTable {
    inner: Arc<Inner>,
}

impl Default for CallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                contexts: DashMap::new(),
                // 0 is the poll-once sentinel
                next_tag: AtomicU64::new(1),
            }),
        }
    }

    /// Issue a fresh tag, unique for the lifetime of this table.
    pub fn next_tag(&self) -> CallTag {
        CallTag::from_raw(self.inner.next_tag.fetch_add(1, Ordering::Relaxed))
    }

    /// Hand a context over to the table.
    pub fn register(&self, context: CallContext) {
        let tag = context.tag();
        debug!(%tag, kind = %context.kind(), "Registering call");
        let previous = self.inner.contexts.insert(tag, Mutex::new(context));
        debug_assert!(previous.is_none(), "call tag {} registered twice", tag);
    }

    /// Remove the context for `tag`, if it is still registered.
    pub fn take(&self, tag: CallTag) -> Option<CallContext> {
        self.inner
            .contexts
            .remove(&tag)
            .map(|(_, context)| context.into_inner())
    }

    pub fn contains(&self, tag: CallTag) -> bool {
        self.inner.contexts.contains_key(&tag)
    }

    /// Number of registered, not yet completed calls.
    pub fn len(&self) -> usize {
        self.inner.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.contexts.is_empty()
    }

    /// Remove every registered context without completing it.
    pub fn drain(&self) -> Vec<CallContext> {
        let tags: Vec<CallTag> = self.inner.contexts.iter().map(|entry| *entry.key()).collect();
        tags.into_iter().filter_map(|tag| self.take(tag)).collect()
    }
}
