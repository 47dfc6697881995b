//! Content-addressed node storage.
//!
//! The trie consumes storage through the narrow [`NodeStore`] seam: a
//! mapping from 32-byte digests to node serializations. Entries are
//! content-addressed, so writes are idempotent and nothing is ever
//! overwritten with different bytes; deletion is not required.

mod memory_store;

pub use memory_store::MemoryStore;

/// A blob store keyed by 32-byte content digests.
///
/// Durability, transactions, and cross-process concurrency are the
/// adapter's concern; the trie only assumes that a stored entry reads back
/// the exact bytes it wrote.
pub trait NodeStore {
    /// Reads the bytes stored under a digest, or `None` if absent.
    fn get(&self, key: &[u8; 32]) -> Option<Vec<u8>>;

    /// Stores bytes under a digest. Overwriting an existing entry is
    /// acceptable: the key is derived from the content.
    fn put(&mut self, key: [u8; 32], value: Vec<u8>);

    /// Returns true if a digest is present.
    fn contains(&self, key: &[u8; 32]) -> bool;
}
