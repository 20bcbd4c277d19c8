//! File-backed identity store.
//!
//! The identity is stored as JSON in `{data_dir}/state.json`. Saves write a
//! sibling temporary file and rename it over the target.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use edge_agent_core::NodeIdentity;

use crate::error::{Result, StoreError};
use crate::IdentityStore;

/// Directory used when no data directory is configured.
pub const DEFAULT_DATA_DIR: &str = "/tmp/edge-agent-node";

/// Name of the identity file inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Identity store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    dir: PathBuf,
    path: PathBuf,
}

impl FileIdentityStore {
    /// Create a store rooted at `data_dir`. An empty path selects
    /// [`DEFAULT_DATA_DIR`].
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_DATA_DIR)
        } else {
            dir.to_path_buf()
        };
        let path = dir.join(STATE_FILE_NAME);
        Self { dir, path }
    }

    /// Full path of the identity file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn write_tmp(tmp: &Path, data: &[u8]) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(tmp)?;
        file.write_all(data)?;
        file.sync_all()
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<NodeIdentity>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No identity file");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io("read", &self.path, e)),
        };

        let identity: NodeIdentity = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        tracing::debug!(
            path = %self.path.display(),
            register_id = %identity.register_id,
            node_id = %identity.node_id,
            "Loaded node identity"
        );
        Ok(Some(identity))
    }

    fn save(&self, identity: &NodeIdentity) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io("create", &self.dir, e))?;

        let data = serde_json::to_vec_pretty(identity)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.tmp_path();
        if let Err(e) = Self::write_tmp(&tmp, &data) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io("write", tmp, e));
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io("rename", &self.path, e));
        }

        tracing::info!(
            path = %self.path.display(),
            register_id = %identity.register_id,
            "Saved node identity"
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Cleared node identity");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", &self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_agent_core::{NodeId, RegisterId};
    use tempfile::TempDir;

    fn create_test_store() -> (FileIdentityStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path().join("node"));
        (store, dir)
    }

    fn identity(register_id: &str) -> NodeIdentity {
        NodeIdentity {
            register_id: RegisterId::new(register_id).unwrap(),
            node_id: NodeId::new(7),
            hostname: "edge-7".to_string(),
        }
    }

    #[test]
    fn load_missing_is_none() {
        let (store, _dir) = create_test_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_load_clear() {
        let (store, _dir) = create_test_store();

        store.save(&identity("r-1")).unwrap();
        assert_eq!(store.load().unwrap(), Some(identity("r-1")));

        // Overwrite
        store.save(&identity("r-2")).unwrap();
        assert_eq!(store.load().unwrap(), Some(identity("r-2")));
        assert!(!store.tmp_path().exists());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());

        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let (store, _dir) = create_test_store();
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(store.path(), b"{not json").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn stale_tmp_file_does_not_affect_load() {
        let (store, _dir) = create_test_store();
        store.save(&identity("r-1")).unwrap();

        // Simulate a crash after writing the temporary file but before rename.
        fs::write(store.tmp_path(), b"{\"register_id\":").unwrap();
        assert_eq!(store.load().unwrap(), Some(identity("r-1")));

        // The next save replaces the leftover.
        store.save(&identity("r-3")).unwrap();
        assert_eq!(store.load().unwrap(), Some(identity("r-3")));
    }

    #[test]
    fn empty_dir_uses_default() {
        let store = FileIdentityStore::new("");
        assert_eq!(
            store.path(),
            Path::new(DEFAULT_DATA_DIR).join(STATE_FILE_NAME)
        );
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _dir) = create_test_store();
        store.save(&identity("r-1")).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
