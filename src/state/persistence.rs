//! State Store Backends
//!
//! - **JSON**: a single state document on disk, rewritten atomically
//! - **Memory**: in-process storage for tests and dry runs
//!
//! Both implement [`StateStore`].

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use super::{RealizedResource, StateDocument, StateStore};
use crate::error::{Error, Result};
use crate::outputs::StackOutputs;

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory state store.
#[derive(Debug)]
pub struct MemoryStateStore {
    document: RwLock<StateDocument>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            document: RwLock::new(StateDocument::new()),
        }
    }

    /// Number of realized resources.
    pub fn len(&self) -> usize {
        self.document.read().resources.len()
    }

    /// Whether the store holds no resources.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, name: &str) -> Result<Option<RealizedResource>> {
        Ok(self.document.read().resources.get(name).cloned())
    }

    fn put(&self, resource: RealizedResource) -> Result<()> {
        self.document
            .write()
            .resources
            .insert(resource.name.clone(), resource);
        Ok(())
    }

    fn list(&self) -> Result<Vec<RealizedResource>> {
        Ok(self.document.read().resources.values().cloned().collect())
    }

    fn put_outputs(&self, outputs: &StackOutputs) -> Result<()> {
        self.document.write().outputs = Some(outputs.clone());
        Ok(())
    }

    fn get_outputs(&self) -> Result<Option<StackOutputs>> {
        Ok(self.document.read().outputs.clone())
    }
}

// ============================================================================
// JSON Store
// ============================================================================

/// JSON file-based state store.
///
/// The whole document is kept in memory and written back after every
/// change through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    document: RwLock<StateDocument>,
}

impl JsonStateStore {
    /// Open the store at `path`, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = if path.exists() {
            let file = File::open(&path)?;
            let document: StateDocument = serde_json::from_reader(BufReader::new(file))?;
            if document.version > StateDocument::VERSION {
                return Err(Error::State(format!(
                    "state file '{}' has version {}, newest supported is {}",
                    path.display(),
                    document.version,
                    StateDocument::VERSION
                )));
            }
            debug!(
                "Loaded state for {} resources from {}",
                document.resources.len(),
                path.display()
            );
            document
        } else {
            StateDocument::new()
        };

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, document: &StateDocument) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, document)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn get(&self, name: &str) -> Result<Option<RealizedResource>> {
        Ok(self.document.read().resources.get(name).cloned())
    }

    fn put(&self, resource: RealizedResource) -> Result<()> {
        let mut document = self.document.write();
        document.resources.insert(resource.name.clone(), resource);
        self.flush(&document)
    }

    fn list(&self) -> Result<Vec<RealizedResource>> {
        Ok(self.document.read().resources.values().cloned().collect())
    }

    fn put_outputs(&self, outputs: &StackOutputs) -> Result<()> {
        let mut document = self.document.write();
        document.outputs = Some(outputs.clone());
        self.flush(&document)
    }

    fn get_outputs(&self) -> Result<Option<StackOutputs>> {
        Ok(self.document.read().outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceKind;
    use chrono::Utc;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    fn realized(name: &str, id: &str) -> RealizedResource {
        RealizedResource {
            name: name.to_string(),
            kind: ResourceKind::NetworkBlock,
            id: id.to_string(),
            attributes: IndexMap::new(),
            fingerprint: "f".to_string(),
            realized_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_put_get() {
        let store = MemoryStateStore::new();
        assert!(store.is_empty());

        store.put(realized("vpc", "vpc-1")).unwrap();
        store.put(realized("vpc", "vpc-2")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("vpc").unwrap().unwrap().id, "vpc-2");
        assert!(store.get("subnet").unwrap().is_none());
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        {
            let store = JsonStateStore::open(&path).unwrap();
            store.put(realized("vpc", "vpc-1")).unwrap();
            store
                .put_outputs(&StackOutputs {
                    instance_id: "i-1".to_string(),
                    public_ip: "54.0.0.1".to_string(),
                    public_dns: "ec2-54-0-0-1.compute.amazonaws.com".to_string(),
                })
                .unwrap();
        }

        let store = JsonStateStore::open(&path).unwrap();
        assert_eq!(store.get("vpc").unwrap().unwrap().id, "vpc-1");
        assert_eq!(store.get_outputs().unwrap().unwrap().instance_id, "i-1");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_rejects_newer_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99, "resources": {}}"#).unwrap();

        assert!(matches!(JsonStateStore::open(&path), Err(Error::State(_))));
    }
}
