//! Merkle trie node types and their RLP codec.

use rlp::{Prototype, Rlp, RlpStream};
use tiny_keccak::{Hasher, Keccak};

use super::error::{Result, TrieError};
use crate::data::NibblePath;

/// Hash size (Keccak-256).
pub const HASH_SIZE: usize = 32;

/// Reference to a child node in the trie.
///
/// Per Ethereum's MPT rules:
/// - If the RLP encoding of a child is >= 32 bytes, store the keccak256 hash
/// - If the RLP encoding is < 32 bytes, embed the RLP directly (inline)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildRef {
    /// Empty child (null).
    Empty,
    /// Child whose RLP encoding is >= 32 bytes - stored as keccak256 hash.
    Hash([u8; HASH_SIZE]),
    /// Child whose RLP encoding is < 32 bytes - stored inline.
    /// The Vec contains the actual RLP-encoded node.
    Inline(Vec<u8>),
}

impl ChildRef {
    /// Returns the hash this reference commits to.
    ///
    /// For Hash: the hash directly. For Inline: keccak256 of the inline
    /// encoding. For Empty: the empty-trie root hash.
    pub fn to_hash(&self) -> [u8; HASH_SIZE] {
        match self {
            ChildRef::Hash(hash) => *hash,
            ChildRef::Inline(data) => keccak256(data),
            ChildRef::Empty => EMPTY_ROOT,
        }
    }

    /// Returns the wire form of the reference: nothing, the inline
    /// encoding, or the 32-byte digest.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ChildRef::Empty => &[],
            ChildRef::Hash(hash) => hash.as_slice(),
            ChildRef::Inline(data) => data,
        }
    }

    /// Returns true if this is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, ChildRef::Empty)
    }

    /// Appends the reference to an RLP list under construction.
    ///
    /// Inline references are spliced in raw so the child node structure is
    /// embedded in the parent, exactly as it was before hashing would have
    /// flattened it.
    pub(crate) fn append_to(&self, stream: &mut RlpStream) {
        match self {
            ChildRef::Empty => {
                stream.append_empty_data();
            }
            ChildRef::Hash(hash) => {
                stream.append(&hash.to_vec());
            }
            ChildRef::Inline(raw) => {
                stream.append_raw(raw, 1);
            }
        }
    }

    /// Reads a reference out of a decoded RLP item.
    ///
    /// A data item must be empty (no child) or exactly 32 bytes (a digest);
    /// a nested list is an inline child and is kept in its raw encoded form.
    pub(crate) fn decode(item: &Rlp<'_>) -> Result<Self> {
        if item.is_data() {
            let data = item.data()?;
            match data.len() {
                0 => Ok(ChildRef::Empty),
                HASH_SIZE => {
                    let mut hash = [0u8; HASH_SIZE];
                    hash.copy_from_slice(data);
                    Ok(ChildRef::Hash(hash))
                }
                _ => Err(TrieError::MalformedNode),
            }
        } else {
            Ok(ChildRef::Inline(item.as_raw().to_vec()))
        }
    }
}

/// Allocates the 16 empty slots of a branch node.
pub(crate) fn empty_children() -> Box<[ChildRef; 16]> {
    Box::new(std::array::from_fn(|_| ChildRef::Empty))
}

/// A node in the Merkle Patricia Trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Empty node (null).
    Empty,

    /// Leaf node: contains the remainder of the key and the value.
    Leaf {
        /// Remaining nibbles of the key.
        path: NibblePath,
        /// The value stored at this leaf.
        value: Vec<u8>,
    },

    /// Extension node: contains a shared path prefix and a child.
    Extension {
        /// Shared path prefix (nibbles).
        path: NibblePath,
        /// Reference to child node (hash or inline).
        child: ChildRef,
    },

    /// Branch node: 16 child slots (one per nibble) and an optional
    /// terminator value for a key ending exactly here.
    Branch {
        /// Children, indexed by the next nibble of the path.
        children: Box<[ChildRef; 16]>,
        /// Terminator value; `None` encodes as the empty string.
        value: Option<Vec<u8>>,
    },
}

impl Node {
    /// RLP encodes the node.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        match self {
            Node::Empty => {
                stream.append_empty_data();
            }
            Node::Leaf { path, value } => {
                stream.begin_list(2);
                stream.append(&path.encode(true));
                stream.append(value);
            }
            Node::Extension { path, child } => {
                stream.begin_list(2);
                stream.append(&path.encode(false));
                child.append_to(&mut stream);
            }
            Node::Branch { children, value } => {
                stream.begin_list(17);
                for child in children.iter() {
                    child.append_to(&mut stream);
                }
                match value {
                    Some(data) => {
                        stream.append(data);
                    }
                    None => {
                        stream.append_empty_data();
                    }
                }
            }
        }
        stream.out().to_vec()
    }

    /// Decodes a node from its RLP encoding.
    ///
    /// Fails with [`TrieError::MalformedNode`] on anything other than the
    /// empty string, a 2-item leaf/extension, or a 17-item branch, or when
    /// a path prefix contradicts the node position it appears in.
    pub fn decode(encoded: &[u8]) -> Result<Node> {
        let rlp = Rlp::new(encoded);
        match rlp.prototype()? {
            Prototype::Data(0) => Ok(Node::Empty),
            Prototype::List(2) => {
                let encoded_path: Vec<u8> = rlp.val_at(0)?;
                let (path, is_leaf) = NibblePath::decode(&encoded_path)?;
                if is_leaf {
                    let value: Vec<u8> = rlp.val_at(1)?;
                    Ok(Node::Leaf { path, value })
                } else {
                    let child = ChildRef::decode(&rlp.at(1)?)?;
                    if child.is_empty() {
                        return Err(TrieError::MalformedNode);
                    }
                    Ok(Node::Extension { path, child })
                }
            }
            Prototype::List(17) => {
                let mut children = empty_children();
                for (i, slot) in children.iter_mut().enumerate() {
                    *slot = ChildRef::decode(&rlp.at(i)?)?;
                }
                let data: Vec<u8> = rlp.val_at(16)?;
                let value = if data.is_empty() { None } else { Some(data) };
                Ok(Node::Branch { children, value })
            }
            _ => Err(TrieError::MalformedNode),
        }
    }
}

/// Computes Keccak-256 hash of data.
pub fn keccak256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    hash
}

/// The empty trie root hash (keccak of the RLP empty string).
pub const EMPTY_ROOT: [u8; HASH_SIZE] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6,
    0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0,
    0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];
