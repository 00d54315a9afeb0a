//! Host-facing traits for reading and defining classes
//!
//! Anything that needs compiled class bytes goes through [`ClassSource`];
//! anything that installs new classes goes through [`ClassDefiner`]. The
//! [`Vm`](crate::Vm) implements both, and [`InstanceBinder`] for handing
//! objects to the classes it defined.

use crate::VmResult;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of encoded classes on disk
pub const CLASS_EXTENSION: &str = "wclass";

/// Supplies the encoded bytes of a class by internal name
pub trait ClassSource {
    /// Bytes of the class, or None if this source does not know it
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>>;
}

impl<T: ClassSource + ?Sized> ClassSource for &T {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        (**self).class_bytes(name)
    }
}

impl<T: ClassSource + ?Sized> ClassSource for Arc<T> {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        (**self).class_bytes(name)
    }
}

/// Installs encoded classes into a running process
pub trait ClassDefiner {
    /// Handle returned for a defined class
    type Handle: Clone + fmt::Debug;

    /// Define a class from its encoded bytes
    fn define_class(&self, name: &str, bytes: &[u8]) -> VmResult<Self::Handle>;

    /// Whether a class with this name is already defined
    fn is_defined(&self, name: &str) -> bool;
}

/// Hands live objects to defined classes through their static fields
pub trait InstanceBinder {
    /// Handle of a live object
    type Instance: Clone + fmt::Debug;

    /// Whether `instance` is an instance of `class`
    fn instance_of(&self, instance: &Self::Instance, class: &str) -> VmResult<bool>;

    /// Store `instance` in the static `field` of `class`
    fn bind_instance(&self, class: &str, field: &str, instance: &Self::Instance) -> VmResult<()>;
}

/// Bytes held in memory, keyed by class name
#[derive(Debug, Default)]
pub struct InMemorySource {
    classes: RwLock<FxHashMap<String, Arc<[u8]>>>,
}

impl InMemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the bytes of a class
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.classes.write().insert(name.into(), bytes.into());
    }

    /// Remove a class
    pub fn remove(&self, name: &str) -> bool {
        self.classes.write().remove(name).is_some()
    }

    /// Number of classes held
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Check if the source is empty
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl ClassSource for InMemorySource {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.classes.read().get(name).map(|b| b.to_vec())
    }
}

/// Reads `<root>/<internal name>.wclass`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Create a source rooted at a directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a class is read from
    pub fn path_of(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in name.split('/') {
            path.push(part);
        }
        path.set_extension(CLASS_EXTENSION);
        path
    }

    /// Write encoded bytes where [`Self::class_bytes`] will find them
    pub fn store(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

impl ClassSource for DirectorySource {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.path_of(name);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read class file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_source() {
        let source = InMemorySource::new();
        source.insert("demo/A", vec![1u8, 2, 3]);
        assert_eq!(source.class_bytes("demo/A"), Some(vec![1, 2, 3]));
        assert_eq!(source.class_bytes("demo/B"), None);
        assert!(source.remove("demo/A"));
        assert!(source.is_empty());
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        let path = source.store("demo/nested/A", b"bytes").unwrap();
        assert!(path.ends_with("demo/nested/A.wclass"));
        assert_eq!(source.class_bytes("demo/nested/A"), Some(b"bytes".to_vec()));
        assert_eq!(source.class_bytes("demo/nested/B"), None);
    }

    #[test]
    fn test_source_through_reference() {
        let source = Arc::new(InMemorySource::new());
        source.insert("demo/A", vec![9u8]);
        fn read(s: impl ClassSource) -> Option<Vec<u8>> {
            s.class_bytes("demo/A")
        }
        assert_eq!(read(&*source), Some(vec![9]));
        assert_eq!(read(source.clone()), Some(vec![9]));
    }
}
