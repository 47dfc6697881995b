//! Trie error taxonomy.

use thiserror::Error;

use crate::data::PathError;

/// Errors surfaced by trie operations.
///
/// All errors propagate to the caller unchanged; the trie performs no
/// retries, and a failed mutation leaves the previous root in place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrieError {
    /// Lookup or delete against an absent mapping.
    #[error("key not found")]
    KeyNotFound,
    /// Update called with a zero-length value; the empty string is reserved
    /// as the wire marker for an absent branch terminator.
    #[error("empty values are not allowed")]
    EmptyValue,
    /// A node's serialization fails structural checks.
    #[error("malformed node")]
    MalformedNode,
    /// A 32-byte reference resolves to nothing in the storage.
    #[error("referenced node is missing from storage")]
    MissingNode([u8; 32]),
    /// Nibble path conversion or decoding failed.
    #[error(transparent)]
    Path(#[from] PathError),
}

impl From<rlp::DecoderError> for TrieError {
    fn from(_: rlp::DecoderError) -> Self {
        TrieError::MalformedNode
    }
}

/// Result type for trie operations.
pub type Result<T> = std::result::Result<T, TrieError>;
