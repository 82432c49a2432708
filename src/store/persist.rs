//! Persistence backends for the configuration store.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::store::Snapshot;

/// Storage contract behind the store.
///
/// Treated as a black box by the store: load on open, save on every
/// accepted commit.
pub trait Persistence: Send + Sync {
    /// Load the persisted snapshot, or `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Persist a snapshot, replacing any previous state.
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// JSON file persistence used by the server binary.
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Persistence for FilePersistence {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("corrupt store file: {e}")))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let content = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| Error::Persistence(format!("serialize store: {e}")))?;
        // Write-then-rename keeps a crash from truncating the store.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory persistence for tests.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: Mutex<Option<Snapshot>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| Error::Persistence("poisoned".into()))?
            .clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self
            .inner
            .lock()
            .map_err(|_| Error::Persistence("poisoned".into()))? = Some(snapshot.clone());
        Ok(())
    }
}
