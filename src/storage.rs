//! # Persisted Key-Value Entries
//!
//! Three independent entries survive process restarts:
//! - the calculation-method preference
//! - the last resolved location (with its acquisition timestamp)
//! - the last fetched prayer table (with timestamp, coordinates and ISO date)
//!
//! Each is a JSON value stored under its own key and cleared independently.
//! [`FileStore`] keeps one file per key in a directory; [`MemoryStore`] is the
//! in-process variant used by tests and short-lived runs.

use crate::methods::{self, DEFAULT_METHOD};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::{fs, io};
use tracing::{debug, warn};

pub const METHOD_KEY: &str = "calculation_method";
pub const LOCATION_KEY: &str = "last_location";
pub const PRAYER_TABLE_KEY: &str = "prayer_times_cache";

/// Durable string storage keyed by name.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One `<key>.json` file per entry under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create the store, making `dir` if it does not exist yet.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Read and decode an entry. Missing, unreadable and corrupt entries all read
/// as `None`: a broken cache is a cache miss.
pub fn load_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Could not read {}: {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding corrupt {} entry: {}", key, e);
            None
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_string(value)?;
    store.set(key, &data)?;
    debug!("Persisted {}", key);
    Ok(())
}

/// The stored calculation-method id, or [`DEFAULT_METHOD`] when unset or unknown.
pub fn load_calculation_method(store: &dyn Store) -> u8 {
    match load_json::<u8>(store, METHOD_KEY) {
        Some(id) if methods::find_method(id).is_some() => id,
        Some(id) => {
            warn!("Ignoring unknown stored calculation method {}", id);
            DEFAULT_METHOD
        }
        None => DEFAULT_METHOD,
    }
}

pub fn save_calculation_method(store: &dyn Store, id: u8) -> Result<()> {
    let id = methods::validate_method(id)?;
    save_json(store, METHOD_KEY, &id)
}
