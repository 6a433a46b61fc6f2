use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::{Field, Id, Predicate};

/// Override document compiled against the live collections
pub struct CompiledOverride {
    pub id: Id,
    pub target_collection_id: Id,
    pub predicate: Predicate,
    /// Fully compiled and linked root fields, sorted by name
    pub fields: Vec<(String, Arc<Field>)>,
}

impl std::fmt::Debug for CompiledOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledOverride")
            .field("id", &self.id)
            .field("target_collection_id", &self.target_collection_id)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct CacheState {
    entries: Vec<Arc<CompiledOverride>>,
    /// False when some override could not be resolved; the next read reloads everything
    complete: bool,
}

/// Process-local cache of compiled overrides, in storage order.
/// Only ever invalidated as a whole.
#[derive(Debug, Default)]
pub struct OverrideCache {
    state: RwLock<Option<CacheState>>,
    loads: AtomicU64,
}

impl OverrideCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entries, if a complete load is present
    pub async fn get(&self) -> Option<Vec<Arc<CompiledOverride>>> {
        let state = self.state.read().await;
        match state.as_ref() {
            Some(state) if state.complete => Some(state.entries.clone()),
            _ => None,
        }
    }

    /// Store the result of a full load
    pub async fn put(&self, entries: Vec<Arc<CompiledOverride>>, complete: bool) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        *self.state.write().await = Some(CacheState { entries, complete });
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Clear the entire cache
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }

    /// Number of full loads stored since construction
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}
