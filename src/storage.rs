//! Byte persistence rooted at a directory. The signing and CSR paths only
//! ever need `put` and `get`; everything else is the caller's business.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `bytes` at `path` relative to the root, creating parent
    /// directories as needed.
    pub fn put(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.root.join(path.as_ref());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&target, bytes).map_err(|source| StorageError::Write {
            path: target.clone(),
            source,
        })
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, StorageError> {
        let target = self.root.join(path.as_ref());
        fs::read(&target).map_err(|source| StorageError::Read {
            path: target.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("zatca-sign-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn put_then_get_round_trips() {
        let storage = Storage::new(scratch_dir("roundtrip"));
        storage.put("out/signed.xml", b"<Invoice/>").unwrap();
        assert_eq!(storage.get("out/signed.xml").unwrap(), b"<Invoice/>");
        let _ = fs::remove_dir_all(storage.root());
    }

    #[test]
    fn read_failure_names_the_path() {
        let storage = Storage::new(scratch_dir("missing"));
        match storage.get("does/not/exist.pem") {
            Err(StorageError::Read { path, .. }) => {
                assert!(path.ends_with("does/not/exist.pem"));
            }
            other => panic!("expected Read error, got {other:?}"),
        }
    }
}
