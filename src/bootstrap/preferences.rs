//! Named key-value preference scopes.
//!
//! [`FilePreferences`] keeps one JSON document per scope:
//!
//! ```text
//! <work_dir>/shared_prefs/
//! └── aries-framework-kotlin-sample.json   {"entries": {"walletKey": "..."}}
//! ```
//!
//! Every write rewrites the document through [`super::atomic::write_atomic`],
//! so a crash leaves either the old or the new document on disk. Writers are
//! serialised per document across the whole process, not per handle, so two
//! handles opened on the same scope never lose each other's updates.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};

use super::atomic;
use crate::error::BootstrapError;

/// Durable string preferences. Each write is individually atomic.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BootstrapError>;

    fn set(&self, key: &str, value: &str) -> Result<(), BootstrapError>;

    /// Store `value` only if `key` has no value yet.
    ///
    /// Returns `None` when `value` was written, or the value another writer
    /// stored first. The check and the write happen under one lock.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, BootstrapError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefsFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

type DocumentLocks = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

/// One write lock per preference document in this process.
fn document_lock(path: &Path) -> Result<Arc<Mutex<()>>, BootstrapError> {
    static LOCKS: OnceLock<DocumentLocks> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .map_err(|_| BootstrapError::Storage("preference lock registry poisoned".into()))?;
    Ok(locks.entry(path.to_path_buf()).or_default().clone())
}

/// File-backed preference scope.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FilePreferences {
    /// Open (or lazily create) the scope `scope` under `dir`.
    pub fn open(dir: &Path, scope: &str) -> Result<Self, BootstrapError> {
        if scope.is_empty() || scope.contains(['/', '\\']) || scope.starts_with('.') {
            return Err(BootstrapError::Storage(format!("invalid preference scope '{scope}'")));
        }
        fs::create_dir_all(dir).map_err(|e| {
            BootstrapError::Storage(format!("cannot create {}: {e}", dir.display()))
        })?;
        // Canonical so `a/../shared_prefs` and `shared_prefs` share a lock.
        let dir = fs::canonicalize(dir).map_err(|e| {
            BootstrapError::Storage(format!("cannot resolve {}: {e}", dir.display()))
        })?;
        let path = dir.join(format!("{scope}.json"));
        let write_lock = document_lock(&path)?;
        Ok(Self { path, write_lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PrefsFile, BootstrapError> {
        match fs::read_to_string(&self.path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                BootstrapError::Storage(format!("malformed {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(PrefsFile::default()),
            Err(e) => Err(BootstrapError::Storage(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl FilePreferences {
    fn lock(&self) -> Result<MutexGuard<'_, ()>, BootstrapError> {
        self.write_lock
            .lock()
            .map_err(|_| BootstrapError::Storage("preference lock poisoned".into()))
    }

    fn write(&self, prefs: &PrefsFile) -> Result<(), BootstrapError> {
        let data = serde_json::to_vec_pretty(prefs)
            .map_err(|e| BootstrapError::Storage(format!("serialise preferences: {e}")))?;
        atomic::write_atomic(&self.path, &data).map_err(|e| {
            BootstrapError::Storage(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>, BootstrapError> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BootstrapError> {
        let _guard = self.lock()?;
        let mut prefs = self.read()?;
        prefs.entries.insert(key.to_string(), value.to_string());
        self.write(&prefs)
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, BootstrapError> {
        let _guard = self.lock()?;
        let mut prefs = self.read()?;
        if let Some(existing) = prefs.entries.get(key) {
            return Ok(Some(existing.clone()));
        }
        prefs.entries.insert(key.to_string(), value.to_string());
        self.write(&prefs)?;
        Ok(None)
    }
}

/// In-process preference scope. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryPreferences {
    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, BootstrapError> {
        self.entries
            .lock()
            .map_err(|_| BootstrapError::Storage("preference lock poisoned".into()))
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, BootstrapError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BootstrapError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, BootstrapError> {
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(existing) => Ok(Some(existing.clone())),
            None => {
                entries.insert(key.to_string(), value.to_string());
                Ok(None)
            }
        }
    }
}
