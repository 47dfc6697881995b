//! Integration tests for mpt_db.

use mpt_db::merkle::{ChildRef, MerklePatriciaTrie, TrieError, EMPTY_ROOT};
use mpt_db::store::MemoryStore;

#[test]
fn test_mutation_history_stays_readable() {
    let mut storage = MemoryStore::new();

    let mut trie = MerklePatriciaTrie::new(&mut storage);
    trie.update(b"do", b"verb").unwrap();
    trie.update(b"dog", b"puppy").unwrap();
    trie.update(b"doge", b"coin").unwrap();
    trie.update(b"horse", b"stallion").unwrap();

    let h1 = trie.root_hash();

    trie.delete(b"doge").unwrap();
    let h2 = trie.root_hash();
    assert_ne!(h1, h2);

    // The mutated trie no longer sees the deleted key.
    assert_eq!(trie.get(b"doge"), Err(TrieError::KeyNotFound));
    assert_eq!(trie.get(b"dog").unwrap(), b"puppy");
    drop(trie);

    // A handle reconstructed at the old root still does.
    let old = MerklePatriciaTrie::with_root(&mut storage, ChildRef::Hash(h1));
    assert_eq!(old.get(b"doge").unwrap(), b"coin");
    assert_eq!(old.get(b"horse").unwrap(), b"stallion");
}

#[test]
fn test_overwrite_is_canonical() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);
    trie.update(b"a", b"1").unwrap();
    trie.update(b"a", b"2").unwrap();
    assert_eq!(trie.get(b"a").unwrap(), b"2");
    let overwritten = trie.root_hash();
    drop(trie);

    let mut fresh_storage = MemoryStore::new();
    let mut fresh = MerklePatriciaTrie::new(&mut fresh_storage);
    fresh.update(b"a", b"2").unwrap();

    assert_eq!(overwritten, fresh.root_hash());
}

#[test]
fn test_insertion_order_does_not_matter() {
    let mut storage1 = MemoryStore::new();
    let mut trie1 = MerklePatriciaTrie::new(&mut storage1);
    trie1.update(b"key1", b"v1").unwrap();
    trie1.update(b"key2", b"v2").unwrap();
    trie1.update(b"key3", b"v3").unwrap();

    let mut storage2 = MemoryStore::new();
    let mut trie2 = MerklePatriciaTrie::new(&mut storage2);
    trie2.update(b"key3", b"v3").unwrap();
    trie2.update(b"key1", b"v1").unwrap();
    trie2.update(b"key2", b"v2").unwrap();

    assert_eq!(trie1.root_hash(), trie2.root_hash());
}

#[test]
fn test_delete_all_in_reverse_restores_empty_root() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);

    let entries: [(&[u8], &[u8]); 4] = [
        (b"do", b"verb"),
        (b"dog", b"puppy"),
        (b"doge", b"coin"),
        (b"horse", b"stallion"),
    ];

    for (key, value) in entries {
        trie.update(key, value).unwrap();
    }
    for (key, _) in entries.iter().rev() {
        trie.delete(key).unwrap();
    }

    assert!(trie.is_empty());
    assert_eq!(trie.root_hash(), EMPTY_ROOT);
    assert!(matches!(trie.root(), ChildRef::Empty));
}

#[test]
fn test_empty_value_leaves_state_unchanged() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);

    assert_eq!(trie.update(b"key", b""), Err(TrieError::EmptyValue));
    assert_eq!(trie.root_hash(), EMPTY_ROOT);

    trie.update(b"key", b"value").unwrap();
    let root = trie.root_hash();

    assert_eq!(trie.update(b"key", b""), Err(TrieError::EmptyValue));
    assert_eq!(trie.root_hash(), root);
    assert_eq!(trie.get(b"key").unwrap(), b"value");
}

#[test]
fn test_dangling_root_reports_missing_node() {
    let mut storage = MemoryStore::new();
    let dangling = [0x5A; 32];

    let trie = MerklePatriciaTrie::with_root(&mut storage, ChildRef::Hash(dangling));
    assert_eq!(trie.get(b"anything"), Err(TrieError::MissingNode(dangling)));
}

#[test]
fn test_insert_get_lots() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);

    let keys: Vec<Vec<u8>> = (0..500u32)
        .map(|i| format!("key_{}", i.wrapping_mul(2654435761)).into_bytes())
        .collect();

    for key in &keys {
        let mut value = key.clone();
        value.extend_from_slice(key);
        trie.update(key, &value).unwrap();
    }

    for key in &keys {
        let mut expected = key.clone();
        expected.extend_from_slice(key);
        assert_eq!(trie.get(key).unwrap(), expected);
    }
}

#[test]
fn test_delete_lots() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);

    let keys: Vec<Vec<u8>> = (0..500u32)
        .map(|i| format!("{}", i.wrapping_mul(2654435761)).into_bytes())
        .collect();

    for key in &keys {
        trie.update(key, key).unwrap();
    }
    for key in &keys {
        trie.delete(key).unwrap();
    }

    assert_eq!(trie.root_hash(), EMPTY_ROOT);
}

#[test]
fn test_long_keys_and_values() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);

    let key = [0xA7u8; 70];
    let value = [0x5Cu8; 70];
    trie.update(&key, &value).unwrap();

    assert_eq!(trie.get(&key).unwrap(), value);
}

#[test]
fn test_secure_trie_round_trip() {
    let mut storage = MemoryStore::new();

    let root;
    {
        let mut trie = MerklePatriciaTrie::new_secure(&mut storage);
        trie.update(b"do", b"verb").unwrap();
        trie.update(b"dog", b"puppy").unwrap();
        trie.update(b"doge", b"coin").unwrap();
        trie.delete(b"doge").unwrap();
        root = trie.root().clone();
    }

    let trie = MerklePatriciaTrie::with_root_secure(&mut storage, root);
    assert_eq!(trie.get(b"do").unwrap(), b"verb");
    assert_eq!(trie.get(b"dog").unwrap(), b"puppy");
    assert_eq!(trie.get(b"doge"), Err(TrieError::KeyNotFound));
}

#[test]
fn test_proofs_against_live_roots() {
    let mut storage = MemoryStore::new();
    let mut trie = MerklePatriciaTrie::new(&mut storage);

    trie.update(b"do", b"verb").unwrap();
    trie.update(b"dog", b"puppy").unwrap();
    trie.update(b"doge", b"coin").unwrap();
    trie.update(b"horse", b"stallion").unwrap();

    let root = trie.root_hash();

    let inclusion = trie.generate_proof(b"doge").unwrap();
    assert!(inclusion.is_inclusion());
    assert_eq!(inclusion.value.as_deref(), Some(&b"coin"[..]));
    assert!(inclusion.verify(&root));

    let exclusion = trie.generate_proof(b"cat").unwrap();
    assert!(exclusion.is_exclusion());
    assert!(exclusion.verify(&root));

    // A proof is bound to the root it was generated against.
    trie.delete(b"doge").unwrap();
    assert!(!inclusion.verify(&trie.root_hash()));
}
