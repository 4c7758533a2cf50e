//! Per-server shared caches.
//!
//! Reserved words and schema snapshots are scoped by [`ServerKey`]
//! (`host:port`) and shared across every handle connected to the same
//! endpoint. Both are read-mostly: writers install a complete snapshot
//! under the lock, readers clone an `Arc` out, so an observer sees either
//! the old or the new snapshot, never a partial one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::connection::ServerKey;
use crate::introspect::SchemaSnapshot;
use crate::quote::ReservedWords;

/// Caches for one endpoint.
#[derive(Debug, Default)]
pub struct ServerCache {
    reserved: RwLock<Option<Arc<ReservedWords>>>,
    schema: RwLock<Option<SchemaSnapshot>>,
}

impl ServerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserved(&self) -> Option<Arc<ReservedWords>> {
        self.reserved.read().expect("reserved cache poisoned").clone()
    }

    pub fn install_reserved(&self, words: Arc<ReservedWords>) {
        *self.reserved.write().expect("reserved cache poisoned") = Some(words);
    }

    pub fn schema(&self) -> Option<SchemaSnapshot> {
        self.schema.read().expect("schema cache poisoned").clone()
    }

    pub fn install_schema(&self, snapshot: SchemaSnapshot) {
        *self.schema.write().expect("schema cache poisoned") = Some(snapshot);
    }

    /// Drop the schema snapshot; the next schema query re-introspects.
    /// Reserved words survive (DDL cannot change them).
    pub fn invalidate_schema(&self) {
        *self.schema.write().expect("schema cache poisoned") = None;
    }
}

/// Process-wide registry of per-server caches.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    map: Mutex<HashMap<ServerKey, Arc<ServerCache>>>,
}

impl CacheRegistry {
    /// The registry shared by every command handle in the process.
    pub fn global() -> &'static CacheRegistry {
        static REGISTRY: OnceLock<CacheRegistry> = OnceLock::new();
        REGISTRY.get_or_init(CacheRegistry::default)
    }

    /// The cache for an endpoint, created on first use.
    pub fn get(&self, key: &ServerKey) -> Arc<ServerCache> {
        let mut map = self.map.lock().expect("cache registry poisoned");
        Arc::clone(map.entry(key.clone()).or_default())
    }
}
