//! Preferences-style key-value namespaces backing the flat store.
//!
//! # Invariants
//! - Keys match `^[A-Za-z0-9_.-]+$` and never name a path outside the
//!   namespace directory.
//! - A `set` fully replaces the previous value or leaves it untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid namespace key regex"));

/// Namespace access error.
#[derive(Debug)]
pub enum NamespaceError {
    InvalidKey(String),
    Io(std::io::Error),
}

impl Display for NamespaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid namespace key `{key}`"),
            Self::Io(err) => write!(f, "namespace io failure: {err}"),
        }
    }
}

impl Error for NamespaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::InvalidKey(_) => None,
        }
    }
}

impl From<std::io::Error> for NamespaceError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Whole-value storage keyed by short names.
pub trait KeyValueNamespace: Send + Sync {
    /// Stored bytes, or `None` when the key was never set.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NamespaceError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), NamespaceError>;

    fn remove(&self, key: &str) -> Result<(), NamespaceError>;
}

fn validate_key(key: &str) -> Result<(), NamespaceError> {
    if KEY_RE.is_match(key) && key != "." && key != ".." {
        Ok(())
    } else {
        Err(NamespaceError::InvalidKey(key.to_string()))
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileNamespace {
    dir: PathBuf,
}

impl FileNamespace {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, NamespaceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, NamespaceError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

impl KeyValueNamespace for FileNamespace {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NamespaceError> {
        match std::fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), NamespaceError> {
        let path = self.path_for(key)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(value)?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|err| NamespaceError::Io(err.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), NamespaceError> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local namespace, used by tests and the in-memory CLI mode.
#[derive(Debug, Default)]
pub struct MemoryNamespace {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueNamespace for MemoryNamespace {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NamespaceError> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), NamespaceError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), NamespaceError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FileNamespace, KeyValueNamespace, MemoryNamespace, NamespaceError};

    #[test]
    fn file_namespace_replaces_whole_values() {
        let dir = tempfile::tempdir().unwrap();
        let namespace = FileNamespace::open(dir.path().join("preferences")).unwrap();

        assert_eq!(namespace.get("post_list").unwrap(), None);
        namespace.set("post_list", b"first, longer value").unwrap();
        namespace.set("post_list", b"second").unwrap();
        assert_eq!(namespace.get("post_list").unwrap(), Some(b"second".to_vec()));

        namespace.remove("post_list").unwrap();
        namespace.remove("post_list").unwrap();
        assert_eq!(namespace.get("post_list").unwrap(), None);
    }

    #[test]
    fn keys_cannot_escape_the_namespace() {
        let namespace = MemoryNamespace::new();
        for key in ["", "..", "../post_list", "a/b", "with space"] {
            assert!(matches!(
                namespace.set(key, b"x"),
                Err(NamespaceError::InvalidKey(_))
            ));
        }
    }
}
