//! Merkle Patricia Trie over content-addressed node storage.
//!
//! The trie works as a wrapper over a [`NodeStore`]: every node whose RLP
//! encoding reaches 32 bytes lives in the store under its keccak256 digest,
//! while smaller nodes are embedded inline in their parent. Mutations are
//! logically functional - each rebuild returns a new reference and the root
//! is swapped only once the full recursive rebuild has succeeded, so a
//! failed operation leaves the previous root untouched and any historical
//! root can be reopened against the same storage.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::error::{Result, TrieError};
use super::node::{empty_children, keccak256, ChildRef, Node, EMPTY_ROOT, HASH_SIZE};
use crate::data::NibblePath;
use crate::store::NodeStore;

/// Type alias for our fast HashMap with FxHash
type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Outcome of a recursive delete step, driving the normalization rules
/// applied while the rebuilt chain unwinds.
enum DeleteAction {
    /// The node vanished entirely.
    Deleted,
    /// The node was rebuilt; the parent just swaps the reference.
    Updated(ChildRef),
    /// A branch collapsed into the carried node; the parent may need to
    /// merge its own path with it.
    UselessBranch(NibblePath, ChildRef),
}

/// A Merkle Patricia Trie bound to external node storage.
///
/// A handle owns the current root reference and borrows the storage
/// mutably, which statically enforces the single-writer rule. Concurrent
/// mutation of one trie is not supported; readers of historical roots are
/// safe because stored nodes are immutable once written.
pub struct MerklePatriciaTrie<'s, S: NodeStore> {
    /// The backing node storage.
    storage: &'s mut S,
    /// Reference to the current top node; `ChildRef::Empty` for an empty
    /// trie.
    root: ChildRef,
    /// When set, keys are keccak256-hashed before deriving the nibble path.
    secure: bool,
}

impl<'s, S: NodeStore> MerklePatriciaTrie<'s, S> {
    /// Creates an empty trie over the given storage.
    pub fn new(storage: &'s mut S) -> Self {
        Self {
            storage,
            root: ChildRef::Empty,
            secure: false,
        }
    }

    /// Opens a trie at a previously obtained root reference.
    ///
    /// The reference may be a 32-byte digest or an inline node encoding,
    /// exactly as returned by [`root`](Self::root).
    pub fn with_root(storage: &'s mut S, root: ChildRef) -> Self {
        Self {
            storage,
            root,
            secure: false,
        }
    }

    /// Creates an empty secure trie: all keys are keccak256-hashed before
    /// use, so key material never appears in node paths.
    pub fn new_secure(storage: &'s mut S) -> Self {
        Self {
            storage,
            root: ChildRef::Empty,
            secure: true,
        }
    }

    /// Opens a secure trie at a previously obtained root reference.
    pub fn with_root_secure(storage: &'s mut S, root: ChildRef) -> Self {
        Self {
            storage,
            root,
            secure: true,
        }
    }

    /// Returns the reference to the current top node.
    ///
    /// This is the value to keep for reopening the trie later; it is the
    /// node's inline encoding when that is shorter than 32 bytes.
    pub fn root(&self) -> &ChildRef {
        &self.root
    }

    /// Returns the canonical 32-byte root hash.
    ///
    /// For an empty trie this is the well-known hash of the RLP empty
    /// string; for an inline root it is the keccak of the inline encoding.
    pub fn root_hash(&self) -> [u8; HASH_SIZE] {
        self.root.to_hash()
    }

    /// Returns true if the trie holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Gets the value stored under a key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let path = NibblePath::from_bytes(&self.navigation_key(key));
        self.lookup(&self.root, path)
    }

    /// Inserts or updates a key-value pair.
    ///
    /// Empty values are rejected with [`TrieError::EmptyValue`]; the empty
    /// string is reserved on the wire for absent branch terminators.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(TrieError::EmptyValue);
        }

        let path = NibblePath::from_bytes(&self.navigation_key(key));
        let root = self.root.clone();
        let new_root = self.update_at(&root, path, value.to_vec())?;
        self.root = new_root;
        Ok(())
    }

    /// Removes a key, failing with [`TrieError::KeyNotFound`] if absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let path = NibblePath::from_bytes(&self.navigation_key(key));
        let root = self.root.clone();
        match self.delete_at(&root, path)? {
            DeleteAction::Deleted => {
                self.root = ChildRef::Empty;
            }
            DeleteAction::Updated(reference) | DeleteAction::UselessBranch(_, reference) => {
                self.root = reference;
            }
        }
        Ok(())
    }

    fn navigation_key(&self, key: &[u8]) -> Vec<u8> {
        if self.secure {
            keccak256(key).to_vec()
        } else {
            key.to_vec()
        }
    }

    /// Resolves a reference to its node: a digest is fetched from storage,
    /// an inline reference decodes directly.
    fn get_node(&self, node_ref: &ChildRef) -> Result<Node> {
        match node_ref {
            ChildRef::Empty => Ok(Node::Empty),
            ChildRef::Hash(hash) => {
                let raw = self
                    .storage
                    .get(hash)
                    .ok_or(TrieError::MissingNode(*hash))?;
                Node::decode(&raw)
            }
            ChildRef::Inline(raw) => Node::decode(raw),
        }
    }

    /// Builds the reference for a node, persisting it when its encoding
    /// reaches the 32-byte threshold.
    fn store_node(&mut self, node: &Node) -> ChildRef {
        let encoded = node.encode();
        if encoded.len() < HASH_SIZE {
            ChildRef::Inline(encoded)
        } else {
            let hash = keccak256(&encoded);
            self.storage.put(hash, encoded);
            ChildRef::Hash(hash)
        }
    }

    fn lookup(&self, node_ref: &ChildRef, path: NibblePath) -> Result<Vec<u8>> {
        match self.get_node(node_ref)? {
            Node::Empty => Err(TrieError::KeyNotFound),
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path == path {
                    Ok(value)
                } else {
                    Err(TrieError::KeyNotFound)
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.starts_with(&ext_path) {
                    self.lookup(&child, path.slice_from(ext_path.len()))
                } else {
                    Err(TrieError::KeyNotFound)
                }
            }
            Node::Branch { children, value } => {
                if path.is_empty() {
                    value.ok_or(TrieError::KeyNotFound)
                } else {
                    let idx = path.get(0) as usize;
                    self.lookup(&children[idx], path.slice_from(1))
                }
            }
        }
    }

    fn update_at(
        &mut self,
        node_ref: &ChildRef,
        path: NibblePath,
        value: Vec<u8>,
    ) -> Result<ChildRef> {
        match self.get_node(node_ref)? {
            Node::Empty => Ok(self.store_node(&Node::Leaf { path, value })),

            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path == path {
                    return Ok(self.store_node(&Node::Leaf { path, value }));
                }

                // Paths diverge: split into a branch keyed by the nibbles
                // right after the shared prefix.
                let common = path.common_prefix_len(&leaf_path);
                let prefix = path.slice_to(common);
                let branch_ref = self.create_branch_node(
                    path.slice_from(common),
                    value,
                    leaf_path.slice_from(common),
                    leaf_value,
                );

                if common != 0 {
                    Ok(self.store_node(&Node::Extension {
                        path: prefix,
                        child: branch_ref,
                    }))
                } else {
                    Ok(branch_ref)
                }
            }

            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.starts_with(&ext_path) {
                    let rest = path.slice_from(ext_path.len());
                    let new_child = self.update_at(&child, rest, value)?;
                    return Ok(self.store_node(&Node::Extension {
                        path: ext_path,
                        child: new_child,
                    }));
                }

                // Split the extension at the shared prefix. The old child
                // moves into a branch slot, possibly behind a shortened
                // extension; the new value takes another slot or the
                // branch terminator.
                let common = path.common_prefix_len(&ext_path);
                let prefix = path.slice_to(common);
                let path_rest = path.slice_from(common);
                let ext_rest = ext_path.slice_from(common);

                let mut children = empty_children();
                let mut branch_value = None;
                if path_rest.is_empty() {
                    branch_value = Some(value);
                } else {
                    self.create_branch_leaf(path_rest, value, &mut children);
                }
                self.create_branch_extension(ext_rest, child, &mut children);

                let branch_ref = self.store_node(&Node::Branch {
                    children,
                    value: branch_value,
                });

                if common != 0 {
                    Ok(self.store_node(&Node::Extension {
                        path: prefix,
                        child: branch_ref,
                    }))
                } else {
                    Ok(branch_ref)
                }
            }

            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return Ok(self.store_node(&Node::Branch {
                        children,
                        value: Some(value),
                    }));
                }

                let idx = path.get(0) as usize;
                let new_child = self.update_at(&children[idx], path.slice_from(1), value)?;
                children[idx] = new_child;
                Ok(self.store_node(&Node::Branch {
                    children,
                    value: branch_value,
                }))
            }
        }
    }

    /// Creates a branch holding two participants, each placed in the slot
    /// keyed by its first remaining nibble or in the terminator when its
    /// remaining path is empty.
    fn create_branch_node(
        &mut self,
        path_a: NibblePath,
        value_a: Vec<u8>,
        path_b: NibblePath,
        value_b: Vec<u8>,
    ) -> ChildRef {
        debug_assert!(!path_a.is_empty() || !path_b.is_empty());

        let mut children = empty_children();
        let mut value = None;

        if path_a.is_empty() {
            value = Some(value_a);
        } else {
            self.create_branch_leaf(path_a, value_a, &mut children);
        }
        if path_b.is_empty() {
            value = Some(value_b);
        } else {
            self.create_branch_leaf(path_b, value_b, &mut children);
        }

        self.store_node(&Node::Branch { children, value })
    }

    /// Stores a leaf for the path remainder in its branch slot.
    fn create_branch_leaf(
        &mut self,
        path: NibblePath,
        value: Vec<u8>,
        children: &mut [ChildRef; 16],
    ) {
        let idx = path.get(0) as usize;
        children[idx] = self.store_node(&Node::Leaf {
            path: path.slice_from(1),
            value,
        });
    }

    /// Hangs an existing child under a branch slot, behind a shortened
    /// extension when more than one nibble of its path remains.
    fn create_branch_extension(
        &mut self,
        path: NibblePath,
        child: ChildRef,
        children: &mut [ChildRef; 16],
    ) {
        debug_assert!(
            !path.is_empty(),
            "the remaining extension path holds at least the diverging nibble"
        );

        let idx = path.get(0) as usize;
        if path.len() == 1 {
            children[idx] = child;
        } else {
            children[idx] = self.store_node(&Node::Extension {
                path: path.slice_from(1),
                child,
            });
        }
    }

    fn delete_at(&mut self, node_ref: &ChildRef, path: NibblePath) -> Result<DeleteAction> {
        match self.get_node(node_ref)? {
            Node::Empty => Err(TrieError::KeyNotFound),
            Node::Leaf {
                path: leaf_path, ..
            } => {
                if leaf_path == path {
                    Ok(DeleteAction::Deleted)
                } else {
                    Err(TrieError::KeyNotFound)
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => self.delete_extension(ext_path, child, path),
            Node::Branch { children, value } => self.delete_branch(children, value, path),
        }
    }

    /// An extension never answers a delete itself; it forwards the request
    /// and then merges with whatever its child collapsed into.
    fn delete_extension(
        &mut self,
        ext_path: NibblePath,
        child: ChildRef,
        path: NibblePath,
    ) -> Result<DeleteAction> {
        if !path.starts_with(&ext_path) {
            return Err(TrieError::KeyNotFound);
        }

        match self.delete_at(&child, path.slice_from(ext_path.len()))? {
            DeleteAction::Deleted => Ok(DeleteAction::Deleted),
            DeleteAction::Updated(child_ref) => {
                let reference = self.store_node(&Node::Extension {
                    path: ext_path,
                    child: child_ref,
                });
                Ok(DeleteAction::Updated(reference))
            }
            DeleteAction::UselessBranch(stored_path, stored_ref) => {
                let new_node = match self.get_node(&stored_ref)? {
                    // An extension over a leaf or another extension is
                    // merged into a single node.
                    Node::Leaf {
                        path: leaf_path,
                        value,
                    } => Node::Leaf {
                        path: ext_path.join(&leaf_path),
                        value,
                    },
                    Node::Extension {
                        path: child_path,
                        child: next,
                    } => Node::Extension {
                        path: ext_path.join(&child_path),
                        child: next,
                    },
                    Node::Branch { .. } => Node::Extension {
                        path: ext_path.join(&stored_path),
                        child: stored_ref,
                    },
                    Node::Empty => return Err(TrieError::MalformedNode),
                };
                let reference = self.store_node(&new_node);
                Ok(DeleteAction::Updated(reference))
            }
        }
    }

    fn delete_branch(
        &mut self,
        mut children: Box<[ChildRef; 16]>,
        value: Option<Vec<u8>>,
        path: NibblePath,
    ) -> Result<DeleteAction> {
        if path.is_empty() {
            if value.is_none() {
                return Err(TrieError::KeyNotFound);
            }
            // The key ends here: clear the terminator, then see what is
            // left of the branch.
            return self.collapse_branch(children, None);
        }

        let idx = path.get(0) as usize;
        if children[idx].is_empty() {
            return Err(TrieError::KeyNotFound);
        }

        match self.delete_at(&children[idx], path.slice_from(1))? {
            DeleteAction::Deleted => {
                children[idx] = ChildRef::Empty;
                self.collapse_branch(children, value)
            }
            DeleteAction::Updated(new_ref) | DeleteAction::UselessBranch(_, new_ref) => {
                children[idx] = new_ref;
                Ok(DeleteAction::Updated(
                    self.store_node(&Node::Branch { children, value }),
                ))
            }
        }
    }

    /// Re-examines a branch that just lost a participant and applies the
    /// collapsing rules keeping the representation canonical: an empty
    /// branch vanishes, a value-only branch becomes a leaf, a single-child
    /// branch folds into its child.
    fn collapse_branch(
        &mut self,
        children: Box<[ChildRef; 16]>,
        value: Option<Vec<u8>>,
    ) -> Result<DeleteAction> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, child)| !child.is_empty())
            .map(|(i, _)| i)
            .collect();

        match (occupied.len(), value) {
            (0, None) => Ok(DeleteAction::Deleted),
            (0, Some(data)) => {
                let path = NibblePath::new();
                let reference = self.store_node(&Node::Leaf {
                    path: path.clone(),
                    value: data,
                });
                Ok(DeleteAction::UselessBranch(path, reference))
            }
            (1, None) => self.collapse_last_child(occupied[0], &children[occupied[0]]),
            (_, value) => Ok(DeleteAction::Updated(
                self.store_node(&Node::Branch { children, value }),
            )),
        }
    }

    /// Folds a single-child branch: the child absorbs the branch's slot
    /// nibble, merging with a leaf or extension child directly and hanging
    /// behind a one-nibble extension when the child is itself a branch.
    fn collapse_last_child(&mut self, idx: usize, child_ref: &ChildRef) -> Result<DeleteAction> {
        let prefix = NibblePath::from_nibble(idx as u8);

        match self.get_node(child_ref)? {
            Node::Leaf { path, value } => {
                let merged = prefix.join(&path);
                let reference = self.store_node(&Node::Leaf {
                    path: merged.clone(),
                    value,
                });
                Ok(DeleteAction::UselessBranch(merged, reference))
            }
            Node::Extension { path, child } => {
                let merged = prefix.join(&path);
                let reference = self.store_node(&Node::Extension {
                    path: merged.clone(),
                    child,
                });
                Ok(DeleteAction::UselessBranch(merged, reference))
            }
            Node::Branch { .. } => {
                let reference = self.store_node(&Node::Extension {
                    path: prefix.clone(),
                    child: child_ref.clone(),
                });
                Ok(DeleteAction::UselessBranch(prefix, reference))
            }
            Node::Empty => Err(TrieError::MalformedNode),
        }
    }
}

// ============================================================================
// Merkle Proofs
// ============================================================================

/// A path proof for a key: the encoded nodes met while walking from the
/// root towards the key, root first. Nodes referenced inline ride inside
/// their parent's encoding and are not repeated.
///
/// A proof with `value: None` witnesses the key's absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// The navigation key (keccak256 of the user key in secure mode).
    pub key: Vec<u8>,
    /// The value at the key (None for non-existence proofs).
    pub value: Option<Vec<u8>>,
    /// Encoded proof nodes from the root towards the key.
    pub nodes: Vec<Vec<u8>>,
}

impl<'s, S: NodeStore> MerklePatriciaTrie<'s, S> {
    /// Generates a proof for the given key, usable to verify the key's
    /// presence (or absence) against a root hash without the full storage.
    pub fn generate_proof(&self, key: &[u8]) -> Result<MerkleProof> {
        let nav_key = self.navigation_key(key);
        let mut path = NibblePath::from_bytes(&nav_key);
        let mut nodes = Vec::new();
        let mut node_ref = self.root.clone();

        let value = loop {
            let node = match &node_ref {
                ChildRef::Empty => break None,
                ChildRef::Hash(hash) => {
                    let raw = self
                        .storage
                        .get(hash)
                        .ok_or(TrieError::MissingNode(*hash))?;
                    let node = Node::decode(&raw)?;
                    nodes.push(raw);
                    node
                }
                ChildRef::Inline(raw) => {
                    let node = Node::decode(raw)?;
                    // Only an inline root stands alone; deeper inline nodes
                    // are already part of their parent's encoding.
                    if nodes.is_empty() {
                        nodes.push(raw.clone());
                    }
                    node
                }
            };

            match node {
                Node::Empty => break None,
                Node::Leaf {
                    path: leaf_path,
                    value,
                } => {
                    break if leaf_path == path { Some(value) } else { None };
                }
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    if !path.starts_with(&ext_path) {
                        break None;
                    }
                    path = path.slice_from(ext_path.len());
                    node_ref = child;
                }
                Node::Branch { children, value } => {
                    if path.is_empty() {
                        break value;
                    }
                    let idx = path.get(0) as usize;
                    path = path.slice_from(1);
                    node_ref = children[idx].clone();
                }
            }
        };

        Ok(MerkleProof {
            key: nav_key,
            value,
            nodes,
        })
    }
}

impl MerkleProof {
    /// Verifies this proof against a root hash.
    ///
    /// Re-walks the key's path resolving every hash reference against the
    /// proof set only, and checks that the walk lands on the claimed value
    /// (or on a provable absence).
    pub fn verify(&self, root_hash: &[u8; HASH_SIZE]) -> bool {
        if self.nodes.is_empty() {
            // Empty trie: nothing can be present.
            return *root_hash == EMPTY_ROOT && self.value.is_none();
        }

        let mut by_hash: FastHashMap<[u8; HASH_SIZE], &[u8]> = FastHashMap::default();
        for raw in &self.nodes {
            by_hash.insert(keccak256(raw), raw.as_slice());
        }

        let mut current = match by_hash.get(root_hash) {
            Some(raw) => raw.to_vec(),
            None => return false,
        };
        let mut path = NibblePath::from_bytes(&self.key);

        loop {
            let node = match Node::decode(&current) {
                Ok(node) => node,
                Err(_) => return false,
            };

            match node {
                Node::Empty => return self.value.is_none(),
                Node::Leaf {
                    path: leaf_path,
                    value,
                } => {
                    return if leaf_path == path {
                        self.value.as_deref() == Some(value.as_slice())
                    } else {
                        self.value.is_none()
                    };
                }
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    if !path.starts_with(&ext_path) {
                        return self.value.is_none();
                    }
                    path = path.slice_from(ext_path.len());
                    current = match resolve_proof_ref(&child, &by_hash) {
                        Some(raw) => raw,
                        None => return false,
                    };
                }
                Node::Branch { children, value } => {
                    if path.is_empty() {
                        return self.value == value;
                    }
                    let idx = path.get(0) as usize;
                    if children[idx].is_empty() {
                        return self.value.is_none();
                    }
                    path = path.slice_from(1);
                    current = match resolve_proof_ref(&children[idx], &by_hash) {
                        Some(raw) => raw,
                        None => return false,
                    };
                }
            }
        }
    }

    /// Returns true if this is a proof of inclusion (key exists).
    pub fn is_inclusion(&self) -> bool {
        self.value.is_some()
    }

    /// Returns true if this is a proof of non-existence.
    pub fn is_exclusion(&self) -> bool {
        self.value.is_none()
    }
}

fn resolve_proof_ref(
    child: &ChildRef,
    by_hash: &FastHashMap<[u8; HASH_SIZE], &[u8]>,
) -> Option<Vec<u8>> {
    match child {
        ChildRef::Hash(hash) => by_hash.get(hash).map(|raw| raw.to_vec()),
        ChildRef::Inline(raw) => Some(raw.clone()),
        ChildRef::Empty => None,
    }
}
