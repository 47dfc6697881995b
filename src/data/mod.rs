//! Core data structures for trie navigation.

mod nibble_path;

pub use nibble_path::{NibbleIterator, NibblePath, PathError};
