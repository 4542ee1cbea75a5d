//! Synthetic path-like identifiers for handles.
//!
//! Handles carry no stable identity of their own, so the bridge invents one:
//! an [`Identifier`] is a normalized absolute path (`/project/src/main.rs`)
//! whose first component names a registered handle and whose remaining
//! components name descendants reached through that handle.
//!
//! The namespace root `/` is never backed by a handle. Its parent is itself,
//! which is what terminates parent-chain walks.

use std::fmt;

/// Normalized absolute path naming a handle in the bridge namespace.
///
/// Construction always normalizes: empty components and `.` are dropped and
/// the result starts with exactly one `/` and never ends with one (except for
/// the root itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// The namespace root.
    pub fn root() -> Self {
        Identifier("/".to_string())
    }

    /// Parse and normalize a path string.
    pub fn new(path: impl AsRef<str>) -> Self {
        let components: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        if components.is_empty() {
            Self::root()
        } else {
            Identifier(format!("/{}", components.join("/")))
        }
    }

    /// Top-level identifier for a handle name (`/<name>`).
    pub fn for_name(name: &str) -> Self {
        Self::root().join(name)
    }

    /// Top-level identifier with a collision counter inserted before the
    /// extension: `notes.txt` with counter 2 becomes `/notes-2.txt`.
    pub fn with_counter(name: &str, counter: u64) -> Self {
        let (stem, ext) = split_extension(name);
        Self::for_name(&format!("{stem}-{counter}{ext}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Last component, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Parent identifier. The root is its own parent.
    pub fn parent(&self) -> Identifier {
        match self.0.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Identifier(self.0[..idx].to_string()),
        }
    }

    /// Child identifier. `name` is normalized like any other path, so a
    /// multi-component relative path is accepted too.
    pub fn join(&self, name: &str) -> Identifier {
        if self.is_root() {
            Identifier::new(name)
        } else {
            Identifier::new(format!("{}/{}", self.0, name))
        }
    }

    /// Descendant identifier from relative path components.
    pub fn join_components<I, S>(&self, components: I) -> Identifier
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        components
            .into_iter()
            .fold(self.clone(), |acc, c| acc.join(c.as_ref()))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components (0 for the root).
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &Identifier) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0
            .strip_prefix(other.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::new(s)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Split a file name into stem and extension (extension includes the dot).
///
/// A leading dot does not start an extension: `.bashrc` has none, and
/// `archive.tar.gz` has `.gz`.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
