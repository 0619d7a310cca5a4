use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::TRACKED_ADDRESSES_KEY;
use crate::error::StoreError;

/// Emitted after every successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

/// Durable key/value storage: one JSON file per key.
///
/// Values are always read and written whole. A change signal is broadcast
/// after each write so other parts of the running app can resync.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl LocalStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let (changes, _) = broadcast::channel(64);
        Ok(Self { dir, changes })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Raw contents of `key`, `None` if it was never written.
    pub fn read_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Decoded value of `key`. Unreadable or malformed content reads as
    /// `None` and is overwritten by the next write.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.read_raw(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("storage read failed: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("discarding corrupt value under {}: {}", key, e);
                None
            }
        }
    }

    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;

        // write-then-rename so readers never see a torn file
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", key));
        std::fs::write(&tmp, encoded)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;

        // no receivers is fine
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }
}

/// The persisted set of addresses the user opted to watch
#[derive(Debug, Clone)]
pub struct TrackedAddresses {
    store: LocalStore,
}

impl TrackedAddresses {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Deduplicated list in insertion order. Corrupt or non-array content
    /// reads as empty.
    pub fn load(&self) -> Vec<String> {
        let list: Vec<String> = self.store.read(TRACKED_ADDRESSES_KEY).unwrap_or_default();
        dedup(list)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.load().iter().any(|a| a == address)
    }

    pub fn add(&self, address: &str) -> Result<Vec<String>, StoreError> {
        let mut list = self.load();
        if !list.iter().any(|a| a == address) {
            list.push(address.to_string());
        }
        self.store.write(TRACKED_ADDRESSES_KEY, &list)?;
        Ok(list)
    }

    pub fn remove(&self, address: &str) -> Result<Vec<String>, StoreError> {
        let mut list = self.load();
        list.retain(|a| a != address);
        self.store.write(TRACKED_ADDRESSES_KEY, &list)?;
        Ok(list)
    }
}

fn dedup(list: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(list.len());
    for address in list {
        if !out.contains(&address) {
            out.push(address);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked() -> (tempfile::TempDir, TrackedAddresses) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        (dir, TrackedAddresses::new(store))
    }

    #[test]
    fn add_and_remove_round_trip_through_disk() {
        let (dir, tracked) = tracked();
        tracked.add("AAA").unwrap();
        tracked.add("BBB").unwrap();
        tracked.add("AAA").unwrap();

        let reopened = TrackedAddresses::new(LocalStore::open(dir.path()).unwrap());
        assert_eq!(reopened.load(), vec!["AAA", "BBB"]);

        reopened.remove("AAA").unwrap();
        assert_eq!(tracked.load(), vec!["BBB"]);
        assert!(!tracked.contains("AAA"));
    }

    #[test]
    fn corrupt_content_self_heals() {
        let (dir, tracked) = tracked();
        std::fs::write(dir.path().join("tracked-addresses.json"), "not json").unwrap();
        assert!(tracked.load().is_empty());

        std::fs::write(dir.path().join("tracked-addresses.json"), "{\"a\": 1}").unwrap();
        assert!(tracked.load().is_empty());

        tracked.add("CCC").unwrap();
        let raw = tracked.store().read_raw(TRACKED_ADDRESSES_KEY).unwrap().unwrap();
        assert_eq!(raw, "[\"CCC\"]");
    }

    #[test]
    fn duplicates_on_disk_are_collapsed() {
        let (dir, tracked) = tracked();
        std::fs::write(
            dir.path().join("tracked-addresses.json"),
            "[\"X\",\"Y\",\"X\"]",
        )
        .unwrap();
        assert_eq!(tracked.load(), vec!["X", "Y"]);
    }

    #[test]
    fn every_write_broadcasts_a_change() {
        let (_dir, tracked) = tracked();
        let mut changes = tracked.store().subscribe();

        tracked.add("A").unwrap();
        tracked.remove("A").unwrap();
        tracked.remove("missing").unwrap();

        for _ in 0..3 {
            assert_eq!(
                changes.try_recv().unwrap(),
                StorageChange {
                    key: TRACKED_ADDRESSES_KEY.to_string()
                }
            );
        }
        assert!(changes.try_recv().is_err());
    }
}
