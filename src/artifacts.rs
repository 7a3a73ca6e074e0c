use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Replace-whole-file write: the bytes land in a sibling temp file which is
/// then renamed over the destination, so a reader never observes a partial
/// artifact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    Ok(())
}

/// Filesystem-backed store of serde-JSON blobs keyed by string. This is the
/// single caching mechanism in the pipeline: `get_or_compute` makes reruns
/// idempotent, so an interrupted run never redoes finished work.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create artifact dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let path = self.path_for(key);
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read artifact {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("artifact {} is not valid JSON", path.display()))
    }

    pub fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).context("failed to serialize artifact")?;
        write_atomic(&self.path_for(key), &bytes)
    }

    /// Load the artifact under `key`, or run `compute`, persist its result,
    /// and return it. `compute` runs only on a miss.
    pub fn get_or_compute<T, F>(&self, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if self.contains(key) {
            log::debug!("artifact cache hit: {key}");
            return self.load(key);
        }
        let value = compute()?;
        self.store(key, &value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_get_or_compute_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let calls = Cell::new(0);

        let first: Vec<u32> = store
            .get_or_compute("numbers", || {
                calls.set(calls.get() + 1);
                Ok(vec![1, 2, 3])
            })
            .unwrap();
        let second: Vec<u32> = store
            .get_or_compute("numbers", || {
                calls.set(calls.get() + 1);
                Ok(vec![9, 9, 9])
            })
            .unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![1, 2, 3]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_compute_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let result: Result<Vec<u32>> = store.get_or_compute("bad", || anyhow::bail!("boom"));
        assert!(result.is_err());
        assert!(!store.contains("bad"));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.csv");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }
}
