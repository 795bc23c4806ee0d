//! Key-Value Stores - Row and Blob Persistence
//!
//! Design rows and externalized blobs both go through [`KeyValueStore`].
//! Keys are `/`-separated segments of `[A-Za-z0-9._-]`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::model::ViewName;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the value at `key`. Readers never observe a partial value.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Returns whether a value was present.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }
}

pub fn template_key(template_id: &str, view: ViewName) -> String {
    format!("template/{template_id}/{view}")
}

pub fn design_key(design_id: &str) -> String {
    format!("design/{design_id}")
}

/// Blobs are addressed by content so a save never overwrites the blob a
/// committed row still points at.
pub fn design_blob_key(design_id: &str, sha256: &str) -> String {
    format!("design-blob/{design_id}/{sha256}")
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.split('/').all(valid_segment) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.entries.write().remove(key).is_some())
    }
}

/// One file per key under `root`. Writes go to a sibling temp file that is
/// renamed into place.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

impl KeyValueStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let io_err = |source| StoreError::Io { key: key.to_string(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp_name);

        fs::write(&tmp, value).map_err(io_err)?;
        if let Err(source) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(source));
        }
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }
}
