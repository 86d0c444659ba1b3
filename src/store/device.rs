//! Persistent device configuration backed by a YAML file.
//!
//! Every disk access goes through the sibling [`FileLock`]. The in-memory
//! record is only written back by [`DeviceConfig::write`] and
//! [`DeviceConfig::save`]; [`DeviceConfig::update`] never touches the disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::store::lock::{DEFAULT_LOCK_TIMEOUT, FileLock};
use crate::store::record::{self, Record};
use crate::utils::error::StoreError;

/// Transient device fields that are never written to disk.
pub const DEVICE_DENIED_KEYS: [&str; 2] = ["message", "task_id"];

/// The minimal essential record written on first run or after corruption.
pub fn default_essentials() -> Record {
    let mut essentials = Record::new();
    essentials.insert("assets".to_string(), Value::Object(Record::new()));
    essentials
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    path: PathBuf,
    lock: FileLock,
    essentials: Record,
    denied: Vec<String>,
    data: Record,
}

impl DeviceConfig {
    pub fn new(path: impl Into<PathBuf>, essentials: Record) -> Self {
        let path = path.into();
        Self {
            lock: FileLock::for_file(&path, DEFAULT_LOCK_TIMEOUT),
            path,
            essentials,
            denied: DEVICE_DENIED_KEYS.iter().map(|k| k.to_string()).collect(),
            data: Record::new(),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock = FileLock::for_file(&self.path, timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn essentials(&self) -> &Record {
        &self.essentials
    }

    /// The in-memory record.
    pub fn current(&self) -> &Record {
        &self.data
    }

    /// Reads and parses the file under the lock.
    pub fn read(&self) -> Result<Record, StoreError> {
        let text = {
            let _guard = self.lock.acquire()?;
            fs::read_to_string(&self.path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StoreError::NotFound(self.path.clone()),
                _ => StoreError::io(&self.path, e),
            })?
        };
        self.parse(&text)
    }

    fn parse(&self, text: &str) -> Result<Record, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyFile(self.path.clone()));
        }
        let value: Value = serde_yaml::from_str(text).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        match value {
            Value::Object(map) if !map.is_empty() => Ok(map),
            Value::Null | Value::Object(_) => Err(StoreError::EmptyFile(self.path.clone())),
            other => Err(StoreError::Parse {
                path: self.path.clone(),
                message: format!("top level is not a mapping: {other}"),
            }),
        }
    }

    /// Writes `record` in full, without reserved and denied keys.
    pub fn write(&self, record: &Record) -> Result<(), StoreError> {
        let filtered = record::persistent(record, &self.denied);
        let dump =
            serde_yaml::to_string(&filtered).map_err(|e| StoreError::Serialize(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let _guard = self.lock.acquire()?;
        fs::write(&self.path, dump).map_err(|e| StoreError::io(&self.path, e))
    }

    /// Merges `payload` into the in-memory record and returns the result.
    pub fn update(&mut self, payload: Record) -> &Record {
        self.data = record::apply(&self.data, &self.essentials, payload);
        &self.data
    }

    /// Resets the file and the in-memory record to the essential defaults.
    pub fn write_default(&mut self) -> Result<Record, StoreError> {
        if self.essentials.is_empty() {
            return Err(StoreError::NoDefaults(self.path.clone()));
        }
        self.data = self.essentials.clone();
        self.write(&self.data)?;
        Ok(self.data.clone())
    }

    /// Loads the persisted record, rewriting the defaults when the file is
    /// missing, empty, unparseable or lacks an essential key.
    pub fn load(&mut self) -> Result<Record, StoreError> {
        match self.read() {
            Ok(record) => {
                let missing = record::missing_keys(&record, &self.essentials);
                if missing.is_empty() {
                    self.data = record;
                    return Ok(self.data.clone());
                }
                warn!(path = %self.path.display(), ?missing, "config inconsistent, writing defaults");
            }
            Err(e) if e.is_corruption() => {
                debug!(path = %self.path.display(), error = %e, "config unusable, writing defaults");
            }
            Err(e) => return Err(e),
        }
        self.write_default()
    }

    /// Applies an optional payload, then writes the whole record.
    pub fn save(&mut self, payload: Option<Record>) -> Result<&Record, StoreError> {
        if let Some(payload) = payload {
            self.update(payload);
        }
        self.write(&self.data)?;
        Ok(&self.data)
    }
}
