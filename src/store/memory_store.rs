//! In-memory node storage.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::NodeStore;

/// Type alias for our fast HashMap with FxHash
///
/// FxHash is safe here because keys are keccak256 digests and therefore
/// already uniformly distributed.
type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// A heap-backed [`NodeStore`].
///
/// Handy as the default backend and in tests; anything dict-like can stand
/// in for it behind the trait.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    nodes: FastHashMap<[u8; 32], Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            nodes: FastHashMap::default(),
        }
    }

    /// Creates a store sized for an expected number of nodes.
    pub fn with_capacity(expected_nodes: usize) -> Self {
        Self {
            nodes: FastHashMap::with_capacity_and_hasher(expected_nodes, FxBuildHasher),
        }
    }

    /// Returns the number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeStore for MemoryStore {
    fn get(&self, key: &[u8; 32]) -> Option<Vec<u8>> {
        self.nodes.get(key).cloned()
    }

    fn put(&mut self, key: [u8; 32], value: Vec<u8>) {
        self.nodes.insert(key, value);
    }

    fn contains(&self, key: &[u8; 32]) -> bool {
        self.nodes.contains_key(key)
    }
}
