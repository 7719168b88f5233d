//! Persistent structural-sharing map.
//!
//! A hash-array-mapped trie with `Arc`-shared nodes. Updates copy only the
//! path from the root to the touched leaf, so snapshots share every
//! unmodified node. This is what makes the cache's fork/reset pattern cheap:
//! cloning a map is an `Arc` bump, and two clones diverge in O(log n) per
//! update.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const BITS: u32 = 5;
const MASK: u64 = (1 << BITS) - 1;

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
enum Node<K, V> {
    Branch {
        bitmap: u32,
        children: Vec<Arc<Node<K, V>>>,
    },
    // Entries with the same full hash live together in one leaf.
    Leaf {
        hash: u64,
        entries: Vec<(K, V)>,
    },
}

/// An immutable associative container with structural sharing.
///
/// All "mutating" operations return a new map and leave the receiver
/// untouched. `Clone` is O(1).
#[derive(Debug)]
pub struct PersistentMap<K, V> {
    root: Option<Arc<Node<K, V>>>,
    len: usize,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look up a value by key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut node = self.root.as_deref()?;
        let hash = hash_of(key);
        let mut shift = 0;
        loop {
            match node {
                Node::Leaf { hash: h, entries } => {
                    return if *h == hash {
                        entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
                    } else {
                        None
                    };
                }
                Node::Branch { bitmap, children } => {
                    let bit = 1u32 << ((hash >> shift) & MASK);
                    if bitmap & bit == 0 {
                        return None;
                    }
                    let pos = (bitmap & (bit - 1)).count_ones() as usize;
                    node = &children[pos];
                    shift += BITS;
                }
            }
        }
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Return a new map with `key` bound to `value`.
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = hash_of(&key);
        match &self.root {
            None => Self {
                root: Some(Arc::new(Node::Leaf {
                    hash,
                    entries: vec![(key, value)],
                })),
                len: 1,
            },
            Some(root) => {
                let (root, added) = insert_node(root, 0, hash, key, value);
                Self {
                    root: Some(root),
                    len: self.len + usize::from(added),
                }
            }
        }
    }

    /// Return a new map without `key`. Returns a clone if the key is absent.
    pub fn remove(&self, key: &K) -> Self {
        let hash = hash_of(key);
        match &self.root {
            None => self.clone(),
            Some(root) => match remove_node(root, 0, hash, key) {
                None => self.clone(),
                Some(root) => Self {
                    root,
                    len: self.len - 1,
                },
            },
        }
    }

    /// Iterate over entries in unspecified order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: self.root.as_deref().into_iter().collect(),
            leaf: None,
        }
    }

    /// Iterate over keys in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterate over values in unspecified order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K, V> FromIterator<(K, V)> for PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |map, (k, v)| map.insert(k, v))
    }
}

fn insert_node<K, V>(
    node: &Arc<Node<K, V>>,
    shift: u32,
    hash: u64,
    key: K,
    value: V,
) -> (Arc<Node<K, V>>, bool)
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    match node.as_ref() {
        Node::Leaf { hash: h, entries } if *h == hash => {
            let mut entries = entries.clone();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => {
                    slot.1 = value;
                    (Arc::new(Node::Leaf { hash, entries }), false)
                }
                None => {
                    entries.push((key, value));
                    (Arc::new(Node::Leaf { hash, entries }), true)
                }
            }
        }
        Node::Leaf { hash: h, .. } => {
            let new_leaf = Arc::new(Node::Leaf {
                hash,
                entries: vec![(key, value)],
            });
            (split(Arc::clone(node), *h, new_leaf, hash, shift), true)
        }
        Node::Branch { bitmap, children } => {
            let bit = 1u32 << ((hash >> shift) & MASK);
            let pos = (bitmap & (bit - 1)).count_ones() as usize;
            let mut children = children.clone();
            if bitmap & bit != 0 {
                let (child, added) = insert_node(&children[pos], shift + BITS, hash, key, value);
                children[pos] = child;
                (
                    Arc::new(Node::Branch {
                        bitmap: *bitmap,
                        children,
                    }),
                    added,
                )
            } else {
                children.insert(
                    pos,
                    Arc::new(Node::Leaf {
                        hash,
                        entries: vec![(key, value)],
                    }),
                );
                (
                    Arc::new(Node::Branch {
                        bitmap: bitmap | bit,
                        children,
                    }),
                    true,
                )
            }
        }
    }
}

// Builds the branch chain separating two leaves whose hashes differ at or
// below `shift`. Differing 64-bit hashes always diverge before the hash is
// exhausted, so the recursion terminates.
fn split<K, V>(
    a: Arc<Node<K, V>>,
    hash_a: u64,
    b: Arc<Node<K, V>>,
    hash_b: u64,
    shift: u32,
) -> Arc<Node<K, V>> {
    let index_a = (hash_a >> shift) & MASK;
    let index_b = (hash_b >> shift) & MASK;
    if index_a == index_b {
        let child = split(a, hash_a, b, hash_b, shift + BITS);
        Arc::new(Node::Branch {
            bitmap: 1 << index_a,
            children: vec![child],
        })
    } else {
        let (bitmap, children) = if index_a < index_b {
            ((1 << index_a) | (1 << index_b), vec![a, b])
        } else {
            ((1 << index_a) | (1 << index_b), vec![b, a])
        };
        Arc::new(Node::Branch { bitmap, children })
    }
}

// Returns None when the key was absent, Some(new_subtree) when removed;
// Some(None) means the subtree became empty.
#[allow(clippy::type_complexity)]
fn remove_node<K, V>(
    node: &Arc<Node<K, V>>,
    shift: u32,
    hash: u64,
    key: &K,
) -> Option<Option<Arc<Node<K, V>>>>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    match node.as_ref() {
        Node::Leaf { hash: h, entries } => {
            if *h != hash || !entries.iter().any(|(k, _)| k == key) {
                return None;
            }
            if entries.len() == 1 {
                return Some(None);
            }
            let entries = entries
                .iter()
                .filter(|(k, _)| k != key)
                .cloned()
                .collect();
            Some(Some(Arc::new(Node::Leaf { hash: *h, entries })))
        }
        Node::Branch { bitmap, children } => {
            let bit = 1u32 << ((hash >> shift) & MASK);
            if bitmap & bit == 0 {
                return None;
            }
            let pos = (bitmap & (bit - 1)).count_ones() as usize;
            match remove_node(&children[pos], shift + BITS, hash, key)? {
                Some(child) => {
                    let mut children = children.clone();
                    children[pos] = child;
                    Some(Some(Arc::new(Node::Branch {
                        bitmap: *bitmap,
                        children,
                    })))
                }
                None => {
                    if children.len() == 1 {
                        return Some(None);
                    }
                    let mut children = children.clone();
                    children.remove(pos);
                    Some(Some(Arc::new(Node::Branch {
                        bitmap: bitmap & !bit,
                        children,
                    })))
                }
            }
        }
    }
}

/// Iterator over map entries.
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    leaf: Option<std::slice::Iter<'a, (K, V)>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(leaf) = &mut self.leaf {
                if let Some((k, v)) = leaf.next() {
                    return Some((k, v));
                }
                self.leaf = None;
            }
            match self.stack.pop()? {
                Node::Leaf { entries, .. } => {
                    self.leaf = Some(entries.iter());
                }
                Node::Branch { children, .. } => {
                    self.stack.extend(children.iter().map(Arc::as_ref));
                }
            }
        }
    }
}
