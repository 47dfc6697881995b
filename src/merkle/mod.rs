//! Merkle Patricia Trie: node taxonomy, codec, and trie operations.
//!
//! This module implements the authenticated key-value structure itself,
//! including RLP node serialization, the inline-vs-digest reference rule,
//! and the structural normalization that keeps equal mappings at equal
//! root hashes.

mod error;
mod node;
mod trie;


pub use error::{Result, TrieError};
pub use node::{keccak256, ChildRef, Node, EMPTY_ROOT, HASH_SIZE};
pub use trie::{MerklePatriciaTrie, MerkleProof};
