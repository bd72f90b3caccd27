//! Persistence for the device configuration and its concurrency token.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ledlink_peer::DeviceConfiguration;
use tracing::debug;

use crate::error::StoreError;

/// Loads and saves the active configuration.
pub trait ConfigurationStore: Send + Sync {
    /// `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<DeviceConfiguration>, StoreError>;

    fn save(&self, config: &DeviceConfiguration) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps the configuration for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: Mutex<Option<DeviceConfiguration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `config`.
    pub fn with(config: DeviceConfiguration) -> Self {
        Self {
            current: Mutex::new(Some(config)),
        }
    }
}

impl ConfigurationStore for MemoryStore {
    fn load(&self) -> Result<Option<DeviceConfiguration>, StoreError> {
        Ok(lock(&self.current).clone())
    }

    fn save(&self, config: &DeviceConfiguration) -> Result<(), StoreError> {
        *lock(&self.current) = Some(config.clone());
        Ok(())
    }
}

/// One JSON document on disk. Saves go through a sibling temp file and a
/// rename so a crash never leaves half a document behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigurationStore for JsonFileStore {
    fn load(&self) -> Result<Option<DeviceConfiguration>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, config: &DeviceConfiguration) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), strips = config.strips.len(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ledlink_peer::{ColorSpectrum, StripConfiguration};

    use super::*;

    fn sample() -> DeviceConfiguration {
        DeviceConfiguration::new(
            "tok-A",
            vec![StripConfiguration::new(0, 30, ColorSpectrum::Rgb)],
        )
    }

    #[test]
    fn memory_store_starts_empty() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap().unwrap().concurrency_token, "tok-A");
    }

    #[test]
    fn json_store_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("ledlink-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(dir.join("device.json"));

        assert!(store.load().unwrap().is_none());
        let config = sample();
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));
        assert!(!dir.join("device.json.tmp").exists());

        std::fs::write(store.path(), b"[]").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Json(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
