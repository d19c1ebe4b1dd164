//! Hierarchical component paths

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::LatticeError;

/// Separator between the segments of a path
pub const PATH_SEPARATOR: char = '/';

/// Path from the root of a definition tree to one of its nodes, e.g. `/a/b/c`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(String);

impl Path {
    /// Validate and build a path.
    ///
    /// The string must be non-empty and start with `/`. Apart from the root (`/`) no segment may be
    /// empty.
    pub fn new(p: &str) -> Result<Self, LatticeError> {
        if p.is_empty() {
            return Err(LatticeError::InvalidPath(
                "cannot pass empty string as path".to_string(),
            ));
        }

        let parts: Vec<&str> = p.split(PATH_SEPARATOR).collect();
        if !parts[0].is_empty() {
            return Err(LatticeError::InvalidPath(format!(
                "path must start with '{}': {}",
                PATH_SEPARATOR, p
            )));
        }

        if parts.len() > 2 && parts[1..].iter().any(|part| part.is_empty()) {
            return Err(LatticeError::InvalidPath(format!(
                "path cannot contain empty subpath: {}",
                p
            )));
        }

        Ok(Self(p.to_string()))
    }

    /// The root path `/`
    pub fn root() -> Self {
        Self(PATH_SEPARATOR.to_string())
    }

    /// Build a path from its dotted domain form, e.g. `c.b.a` becomes `/a/b/c`
    pub fn from_domain(domain: &str) -> Result<Self, LatticeError> {
        let p: String = domain
            .split('.')
            .rev()
            .map(|part| format!("{}{}", PATH_SEPARATOR, part))
            .collect();
        Self::new(&p)
    }

    /// Dotted domain form, lowercased, e.g. `/a/B/c` becomes `c.b.a`
    pub fn to_domain(&self) -> String {
        self.parts()
            .iter()
            .rev()
            .map(|part| part.to_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Segments of the path; empty for the root
    pub fn parts(&self) -> Vec<&str> {
        if self.is_root() {
            return Vec::new();
        }
        self.0[1..].split(PATH_SEPARATOR).collect()
    }

    /// Number of segments; the root has depth 0
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches(PATH_SEPARATOR).count()
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Last segment of the path, `None` for the root
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit(PATH_SEPARATOR).next()
    }

    /// Path of a child node, e.g. child `c` of `/a/b` is `/a/b/c`
    pub fn child(&self, name: &str) -> Result<Self, LatticeError> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) {
            return Err(LatticeError::InvalidPath(format!(
                "invalid child name '{}' for {}",
                name, self
            )));
        }

        if self.is_root() {
            Ok(Self(format!("{}{}", PATH_SEPARATOR, name)))
        } else {
            Ok(Self(format!("{}{}{}", self.0, PATH_SEPARATOR, name)))
        }
    }

    /// Path one level up; the root has no parent
    pub fn parent(&self) -> Result<Self, LatticeError> {
        if self.is_root() {
            return Err(LatticeError::InvalidPath(format!(
                "path {} does not have a parent",
                self
            )));
        }

        match self.0.rfind(PATH_SEPARATOR) {
            Some(0) | None => Ok(Self::root()),
            Some(idx) => Ok(Self(self.0[..idx].to_string())),
        }
    }

    /// Path made of the first `n` segments, e.g. `/a/b/c` prefix 2 is `/a/b`
    pub fn prefix(&self, n: usize) -> Result<Self, LatticeError> {
        let parts = self.parts();
        if n > parts.len() {
            return Err(LatticeError::InvalidPath(format!(
                "cannot take prefix {} of path {} with depth {}",
                n,
                self,
                parts.len()
            )));
        }

        let mut prefix = Self::root();
        for part in &parts[..n] {
            prefix = prefix.child(part)?;
        }
        Ok(prefix)
    }

    /// Shift the path `n` segments left.
    ///
    /// Returns the remaining path and the segments shifted out, e.g. `/a/b/c` shifted 2 returns `/c`
    /// and `[a, b]`.
    pub fn shift(&self, n: usize) -> Result<(Self, Vec<String>), LatticeError> {
        let parts = self.parts();
        if n > parts.len() {
            return Err(LatticeError::InvalidPath(format!(
                "cannot shift path with depth {} {} times",
                parts.len(),
                n
            )));
        }

        let shifted: Vec<String> = parts[..n].iter().map(|s| s.to_string()).collect();
        let remaining = format!("{}{}", PATH_SEPARATOR, parts[n..].join("/"));
        Ok((Self::new(&remaining)?, shifted))
    }

    /// Whether `prefix` is this path or one of its ancestors, compared segment by segment
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0)
                && self.0.as_bytes().get(prefix.0.len()) == Some(&(PATH_SEPARATOR as u8)))
    }

    /// Rebase a path relative to the root onto this path, e.g. `/c` onto `/a/b` is `/a/b/c`
    pub fn join(&self, relative: &Path) -> Self {
        if relative.is_root() {
            return self.clone();
        }
        if self.is_root() {
            return relative.clone();
        }
        Self(format!("{}{}", self.0, relative.0))
    }

    /// Express this path relative to `prefix`, e.g. `/a/b/c` relative to `/a` is `/b/c`
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Self> {
        if !self.has_prefix(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        let rest = &self.0[prefix.0.len()..];
        if rest.is_empty() {
            Some(Self::root())
        } else {
            Some(Self(rest.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Path {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for Path {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Path {
    type Error = LatticeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_path_validation() {
        assert!(Path::new("").is_err());
        assert!(Path::new("a/b").is_err());
        assert!(Path::new("/a//b").is_err());
        assert!(Path::new("/a/").is_err());
        assert!(Path::new("/").unwrap().is_root());
        assert_eq!(Path::new("/a/b").unwrap().depth(), 2);
    }

    #[test]
    fn test_child_and_parent() {
        let root = Path::root();
        let a = root.child("a").unwrap();
        assert_eq!(a.as_str(), "/a");
        let ab = a.child("b").unwrap();
        assert_eq!(ab.as_str(), "/a/b");
        assert_eq!(ab.parent().unwrap(), a);
        assert_eq!(a.parent().unwrap(), root);
        assert!(root.parent().is_err());
        assert!(a.child("").is_err());
    }

    #[test]
    fn test_shift() {
        let p = Path::new("/a/b/c").unwrap();
        let (rest, shifted) = p.shift(2).unwrap();
        assert_eq!(rest.as_str(), "/c");
        assert_eq!(shifted, vec!["a".to_string(), "b".to_string()]);

        let (rest, _) = p.shift(3).unwrap();
        assert!(rest.is_root());
        assert!(p.shift(4).is_err());
    }

    #[test]
    fn test_domain_round_trip() {
        let p = Path::new("/a/b/c").unwrap();
        assert_eq!(p.to_domain(), "c.b.a");
        assert_eq!(Path::from_domain(&p.to_domain()).unwrap(), p);

        let mixed = Path::new("/a/B").unwrap();
        assert_eq!(mixed.to_domain(), "b.a");
        assert_eq!(Path::from_domain(&mixed.to_domain()).unwrap().as_str(), "/a/b");
    }

    #[test]
    fn test_has_prefix_is_segment_aware() {
        let p = Path::new("/ab/c").unwrap();
        assert!(p.has_prefix(&Path::root()));
        assert!(p.has_prefix(&Path::new("/ab").unwrap()));
        assert!(!p.has_prefix(&Path::new("/a").unwrap()));
        assert!(p.has_prefix(&p));
    }

    #[test]
    fn test_join_and_strip() {
        let base = Path::new("/a/b").unwrap();
        let rel = Path::new("/c/d").unwrap();
        let joined = base.join(&rel);
        assert_eq!(joined.as_str(), "/a/b/c/d");
        assert_eq!(joined.strip_prefix(&base).unwrap(), rel);
        assert!(base.strip_prefix(&base).unwrap().is_root());
        assert_eq!(base.join(&Path::root()), base);
    }

    #[test]
    fn test_prefix() {
        let p = Path::new("/a/b/c").unwrap();
        assert!(p.prefix(0).unwrap().is_root());
        assert_eq!(p.prefix(2).unwrap().as_str(), "/a/b");
        assert!(p.prefix(4).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let p: Path = serde_json::from_str("\"/a/b\"").unwrap();
        assert_eq!(p.name(), Some("b"));
        assert!(serde_json::from_str::<Path>("\"a\"").is_err());
    }
}
