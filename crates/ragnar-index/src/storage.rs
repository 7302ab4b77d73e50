//! Persistence of the index state.
//!
//! One JSON document holds everything needed to resume without re-parsing:
//! - repository root and name, so a snapshot is never applied to another repo
//! - per-file fingerprints, to find files that changed while the process was down
//! - the builder state (extractions, symbol table, graph)
//!
//! A snapshot that fails to parse is treated as absent, which makes the
//! indexer fall back to a full rebuild.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::graph_builder::BuilderSnapshot;

/// Default state directory, relative to the repository root.
pub const DEFAULT_STATE_DIR: &str = ".ragnar";

/// Snapshot file name inside the state directory.
pub const INDEX_FILE: &str = "index.json";

/// Bumped whenever the snapshot layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// What the index knows about one file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// sha256 of the file content
    pub fingerprint: String,
    /// Set when the file did not parse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unparsed: Option<String>,
}

/// Everything persisted for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format_version: u32,
    pub root: PathBuf,
    pub repo: String,
    pub saved_at: u64,
    pub generation: u64,
    pub files: BTreeMap<String, FileRecord>,
    pub builder: BuilderSnapshot,
}

impl IndexSnapshot {
    pub fn new(root: &Path, repo: &str, files: BTreeMap<String, FileRecord>, builder: BuilderSnapshot) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            root: root.to_path_buf(),
            repo: repo.to_string(),
            saved_at: now(),
            generation: builder.generation,
            files,
            builder,
        }
    }
}

/// Reads and writes the snapshot of one repository.
#[derive(Debug, Clone)]
pub struct IndexStorage {
    state_dir: PathBuf,
}

impl IndexStorage {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    /// Storage in the default state directory of a repository.
    pub fn for_repo(root: &Path) -> Self {
        Self::new(root.join(DEFAULT_STATE_DIR))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.state_dir.join(INDEX_FILE)
    }

    /// Write a snapshot, replacing the previous one atomically.
    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<()> {
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("Failed to create state directory: {:?}", self.state_dir))?;

        let json = serde_json::to_string(snapshot).context("Failed to serialize index snapshot")?;
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write snapshot: {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace snapshot: {:?}", path))?;

        debug!(
            path = %path.display(),
            generation = snapshot.generation,
            files = snapshot.files.len(),
            "Saved index snapshot"
        );
        Ok(())
    }

    /// Load the snapshot for `root`. Missing, foreign, outdated or corrupt
    /// snapshots all yield `None`.
    pub fn load(&self, root: &Path) -> Result<Option<IndexSnapshot>> {
        let path = self.index_path();
        if !path.exists() {
            debug!(path = %path.display(), "No index snapshot");
            return Ok(None);
        }
        let content = fs::read_to_string(&path).with_context(|| format!("Failed to read snapshot: {:?}", path))?;
        let snapshot: IndexSnapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding corrupt index snapshot");
                return Ok(None);
            }
        };
        if snapshot.format_version != FORMAT_VERSION {
            info!(
                found = snapshot.format_version,
                expected = FORMAT_VERSION,
                "Discarding index snapshot with another format version"
            );
            return Ok(None);
        }
        if snapshot.root != root {
            warn!(
                snapshot_root = %snapshot.root.display(),
                root = %root.display(),
                "Index snapshot belongs to another repository"
            );
            return Ok(None);
        }
        info!(
            path = %path.display(),
            generation = snapshot.generation,
            files = snapshot.files.len(),
            "Loaded index snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Delete the snapshot, if any.
    pub fn clear(&self) -> Result<()> {
        let path = self.index_path();
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to delete snapshot: {:?}", path))?;
        }
        Ok(())
    }
}

/// Current time as Unix seconds.
fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(root: &Path) -> IndexSnapshot {
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            FileRecord {
                fingerprint: "abc".to_string(),
                unparsed: None,
            },
        );
        IndexSnapshot::new(root, "repo", files, BuilderSnapshot::default())
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::for_repo(dir.path());
        storage.save(&snapshot(dir.path())).unwrap();

        let loaded = storage.load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.repo, "repo");
        assert_eq!(loaded.files["a.py"].fingerprint, "abc");
    }

    #[test]
    fn test_foreign_root_is_ignored() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::for_repo(dir.path());
        storage.save(&snapshot(Path::new("/somewhere/else"))).unwrap();
        assert!(storage.load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::for_repo(dir.path());
        fs::create_dir_all(storage.state_dir()).unwrap();
        fs::write(storage.index_path(), "{ not json").unwrap();
        assert!(storage.load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::for_repo(dir.path());
        assert!(storage.load(dir.path()).unwrap().is_none());
        storage.clear().unwrap();
    }
}
