//! Node output cache
//!
//! Remembers the outputs of each node instance together with a fingerprint
//! of the inputs they were computed from. Nodes declaring
//! [`CachePolicy::AlwaysExecute`] bypass the cache entirely.

use crate::error::NodeError;
use crate::node::{CachePolicy, HostObject, LoaderNode, NodeArgs};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Fingerprint of one node invocation
pub fn fingerprint(class_name: &str, args: &NodeArgs) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(class_name.as_bytes());

    for (name, object) in &args.objects {
        hasher.update(b"\0object\0");
        hasher.update(name.as_bytes());
        hasher.update(object.identity().as_bytes());
    }

    // BTreeMap keeps widget order stable
    let widgets = serde_json::to_vec(&args.widgets).unwrap_or_default();
    hasher.update(b"\0widgets\0");
    hasher.update(&widgets);

    *hasher.finalize().as_bytes()
}

/// Outputs cached for one node instance
#[derive(Debug, Clone)]
pub struct CachedOutputs {
    /// Fingerprint of the inputs
    pub fingerprint: [u8; 32],
    /// Node outputs
    pub outputs: Vec<HostObject>,
    /// Last access time
    pub last_accessed: Instant,
    /// Access count
    pub access_count: u64,
}

impl CachedOutputs {
    fn new(fingerprint: [u8; 32], outputs: Vec<HostObject>) -> Self {
        Self {
            fingerprint,
            outputs,
            last_accessed: Instant::now(),
            access_count: 0,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Lookups for memoised nodes
    pub lookups: u64,
    /// Cache hits
    pub hits: u64,
    /// Cache misses
    pub misses: u64,
    /// Runs of always-execute nodes
    pub bypassed: u64,
    /// Evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Output cache keyed by node instance id
pub struct ExecutionCache {
    entries: HashMap<String, CachedOutputs>,
    max_entries: usize,
    stats: CacheStats,
}

impl ExecutionCache {
    /// Create a cache holding at most `max_entries` node outputs
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Run `node` as instance `node_id`, reusing cached outputs when allowed
    pub fn execute(
        &mut self,
        node_id: &str,
        node: &mut dyn LoaderNode,
        args: &NodeArgs,
    ) -> Result<Vec<HostObject>, NodeError> {
        let descriptor = node.descriptor();

        if descriptor.cache_policy == CachePolicy::AlwaysExecute {
            self.stats.bypassed += 1;
            self.entries.remove(node_id);
            return node.execute(args);
        }

        let fingerprint = fingerprint(&descriptor.class_name, args);
        self.stats.lookups += 1;

        if let Some(entry) = self
            .entries
            .get_mut(node_id)
            .filter(|e| e.fingerprint == fingerprint)
        {
            self.stats.hits += 1;
            entry.touch();
            debug!(node_id, class = %descriptor.class_name, "Reusing cached outputs");
            return Ok(entry.outputs.clone());
        }

        self.stats.misses += 1;
        let outputs = node.execute(args)?;
        self.insert(node_id, CachedOutputs::new(fingerprint, outputs.clone()));

        Ok(outputs)
    }

    fn insert(&mut self, node_id: &str, entry: CachedOutputs) {
        self.entries.remove(node_id);

        while self.entries.len() >= self.max_entries && !self.entries.is_empty() {
            self.evict_one();
        }

        if self.max_entries > 0 {
            self.entries.insert(node_id.to_string(), entry);
        }
    }

    /// Evict the least recently used entry
    fn evict_one(&mut self) {
        let lru_id = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(id, _)| id.clone());

        if let Some(id) = lru_id {
            self.entries.remove(&id);
            self.stats.evictions += 1;
        }
    }

    /// Check if outputs are cached for a node instance
    pub fn contains(&self, node_id: &str) -> bool {
        self.entries.contains_key(node_id)
    }

    /// Drop the outputs of a node instance
    pub fn invalidate(&mut self, node_id: &str) -> bool {
        self.entries.remove(node_id).is_some()
    }

    /// Clear all cached entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExecutionCache {
    fn default() -> Self {
        Self::new(64)
    }
}
