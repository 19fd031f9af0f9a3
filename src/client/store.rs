// src/client/store.rs

//! Local key-value store that survives a reload.
//!
//! Holds the session token, the session snapshot and per-module interim
//! results. Created at session start, cleared on logout or after a confirmed
//! final submission.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::error::ClientError;
use crate::exam::ModuleId;

/// Store keys.
pub mod keys {
    use crate::exam::ModuleId;

    pub const TOKEN: &str = "token";
    pub const SESSION: &str = "session";

    pub fn result(exam_id: &str, module: ModuleId) -> String {
        format!("result:{}:{}", exam_id, module)
    }

    pub fn submitted(session_id: &str) -> String {
        format!("submitted:{}", session_id)
    }

    /// Violation count at which this browser ended the session.
    pub fn terminated(session_id: &str) -> String {
        format!("terminated:{}", session_id)
    }
}

pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, ClientError>;

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError>;

    fn remove(&self, key: &str) -> Result<(), ClientError>;

    fn clear(&self) -> Result<(), ClientError>;

    fn keys(&self) -> Result<Vec<String>, ClientError>;
}

/// Typed access on top of [`SessionStore`].
pub trait SessionStoreExt: SessionStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ClientError> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ClientError> {
        self.set(key, serde_json::to_value(value)?)
    }

    /// Removes every interim result cached for an exam.
    fn clear_results(&self, exam_id: &str) -> Result<(), ClientError> {
        for module in ModuleId::ORDER {
            self.remove(&keys::result(exam_id, module))?;
        }
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ClientError> {
    mutex
        .lock()
        .map_err(|_| ClientError::Store("store lock poisoned".to_string()))
}

/// In-process store; gone with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, ClientError> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError> {
        lock(&self.entries)?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        lock(&self.entries)?.clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ClientError> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}

/// Store backed by one JSON file, rewritten on every change.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash never leaves a half-written store behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<(), ClientError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, Value>)) -> Result<(), ClientError> {
        let mut entries = lock(&self.entries)?;
        change(&mut entries);
        self.persist(&entries)
    }
}

impl SessionStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, ClientError> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn clear(&self) -> Result<(), ClientError> {
        self.update(BTreeMap::clear)
    }

    fn keys(&self) -> Result<Vec<String>, ClientError> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}
