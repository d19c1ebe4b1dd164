//! Path-keyed tree with prefix operations

use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};

use serde::{Deserialize, Serialize};

use crate::definition::tree::path::Path;

/// Mapping from [`Path`] to values.
///
/// Iteration is in lexical order of the path strings. Prefix operations only match whole segments,
/// so `/a` covers `/a` and `/a/b` but not `/ab`. Serialises as a JSON object keyed by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tree<T> {
    inner: BTreeMap<Path, T>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<T> Tree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value at the path
    pub fn insert(&mut self, path: Path, value: T) -> Option<T> {
        self.inner.insert(path, value)
    }

    pub fn get(&self, path: &Path) -> Option<&T> {
        self.inner.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut T> {
        self.inner.get_mut(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.contains_key(path)
    }

    pub fn delete(&mut self, path: &Path) -> Option<T> {
        self.inner.remove(path)
    }

    /// Remove every entry at or below `prefix`, returning how many were removed
    pub fn delete_prefix(&mut self, prefix: &Path) -> usize {
        let keys: Vec<Path> = self.iter_prefix(prefix).map(|(p, _)| p.clone()).collect();
        for key in &keys {
            self.inner.remove(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Path> {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &T)> {
        self.inner.iter()
    }

    /// Entries at or below `prefix`, in lexical order
    pub fn iter_prefix<'a>(&'a self, prefix: &Path) -> Box<dyn Iterator<Item = (&'a Path, &'a T)> + 'a> {
        if prefix.is_root() {
            return Box::new(self.inner.iter());
        }

        let exact = self.inner.get_key_value(prefix);
        let lower = format!("{}/", prefix);
        // '0' sorts directly after '/', so the range holds exactly the keys starting with "prefix/"
        let upper = format!("{}0", prefix);
        let below = self
            .inner
            .range::<str, _>((Bound::Included(lower.as_str()), Bound::Excluded(upper.as_str())));
        Box::new(exact.into_iter().chain(below))
    }

    /// Visit every entry in lexical order until `f` breaks
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&Path, &T) -> ControlFlow<()>,
    {
        for (path, value) in self.inner.iter() {
            if f(path, value).is_break() {
                return;
            }
        }
    }

    /// Visit every entry at or below `prefix` until `f` breaks
    pub fn walk_prefix<F>(&self, prefix: &Path, mut f: F)
    where
        F: FnMut(&Path, &T) -> ControlFlow<()>,
    {
        for (path, value) in self.iter_prefix(prefix) {
            if f(path, value).is_break() {
                return;
            }
        }
    }
}

impl<T: Clone> Tree<T> {
    /// Replace the subtree at `prefix` with `other`.
    ///
    /// Every entry at or below `prefix` is removed, then every entry of `other` is inserted with its
    /// path rebased under `prefix` (the root of `other` lands on `prefix` itself).
    pub fn replace_prefix(&mut self, prefix: &Path, other: &Tree<T>) {
        self.delete_prefix(prefix);
        for (path, value) in other.iter() {
            self.inner.insert(prefix.join(path), value.clone());
        }
    }

    /// Copy of the subtree at `prefix`, rebased so that `prefix` becomes the root
    pub fn subtree(&self, prefix: &Path) -> Tree<T> {
        let mut result = Tree::new();
        for (path, value) in self.iter_prefix(prefix) {
            if let Some(relative) = path.strip_prefix(prefix) {
                result.insert(relative, value.clone());
            }
        }
        result
    }
}

impl<T> FromIterator<(Path, T)> for Tree<T> {
    fn from_iter<I: IntoIterator<Item = (Path, T)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    fn sample() -> Tree<u32> {
        vec![
            (p("/"), 0),
            (p("/a"), 1),
            (p("/a/b"), 2),
            (p("/a-b"), 3),
            (p("/ab"), 4),
            (p("/a/b/c"), 5),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_walk_is_lexical() {
        let tree = sample();
        let mut seen = Vec::new();
        tree.walk(|path, _| {
            seen.push(path.to_string());
            ControlFlow::Continue(())
        });
        assert_eq!(seen, vec!["/", "/a", "/a-b", "/a/b", "/a/b/c", "/ab"]);
    }

    #[test]
    fn test_walk_halts() {
        let tree = sample();
        let mut count = 0;
        tree.walk(|_, _| {
            count += 1;
            if count == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn test_prefix_walk_is_segment_aware() {
        let tree = sample();
        let keys: Vec<String> = tree.iter_prefix(&p("/a")).map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(tree.iter_prefix(&Path::root()).count(), 6);
    }

    #[test]
    fn test_delete_prefix() {
        let mut tree = sample();
        assert_eq!(tree.delete_prefix(&p("/a")), 3);
        assert_eq!(tree.len(), 3);
        assert!(tree.contains(&p("/a-b")));
        assert!(tree.contains(&p("/ab")));
    }

    #[test]
    fn test_replace_prefix_rebases() {
        let mut tree = sample();
        let other: Tree<u32> = vec![(p("/"), 10), (p("/x"), 11)].into_iter().collect();
        tree.replace_prefix(&p("/a"), &other);

        let below: Vec<String> = tree.iter_prefix(&p("/a")).map(|(k, _)| k.to_string()).collect();
        assert_eq!(below, vec!["/a", "/a/x"]);
        assert_eq!(tree.get(&p("/a")), Some(&10));
        assert_eq!(tree.get(&p("/ab")), Some(&4));
    }

    #[test]
    fn test_subtree() {
        let tree = sample();
        let sub = tree.subtree(&p("/a/b"));
        let keys: Vec<String> = sub.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["/", "/c"]);
    }

    #[test]
    fn test_json_is_keyed_by_path() {
        let tree: Tree<u32> = vec![(p("/"), 1), (p("/a"), 2)].into_iter().collect();
        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(json, r#"{"/":1,"/a":2}"#);
        let back: Tree<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}
