use std::{fs, path::Path, path::PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use twox_hash::XxHash3_64;

use crate::{error::InventoryError, kubevirt::FetchedData, options::CacheOptions};

#[derive(Deserialize, Serialize, Debug)]
pub struct CacheEntry {
    pub fetched_at: DateTime<Utc>,
    pub data: FetchedData,
}

/// Stores fetched data as JSON files, one per inventory file.
pub struct InventoryCache {
    path: PathBuf,
    timeout: u64,
}

/// Derives the cache key from the location and contents of the inventory file.
pub fn cache_key(prefix: &str, config_path: &Path, config_contents: &str) -> String {
    let mut seed = config_path.to_string_lossy().into_owned();
    seed.push('\0');
    seed.push_str(config_contents);

    format!("{prefix}{:016x}", XxHash3_64::oneshot(seed.as_bytes()))
}

impl InventoryCache {
    pub fn new(options: &CacheOptions, key: &str) -> Self {
        Self {
            path: options.connection.join(format!("{key}.json")),
            timeout: options.timeout,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached data unless it is missing, expired or unreadable.
    pub fn load(&self, now: DateTime<Utc>) -> Option<FetchedData> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No usable cache at {}: {e}", self.path.display());
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring corrupt cache at {}: {e}", self.path.display());
                return None;
            }
        };

        let expired = i64::try_from(self.timeout)
            .ok()
            .filter(|timeout| *timeout > 0)
            .and_then(TimeDelta::try_seconds)
            .is_some_and(|timeout| now - entry.fetched_at > timeout);
        if expired {
            debug!("Cache at {} expired", self.path.display());
            return None;
        }

        Some(entry.data)
    }

    pub fn store(&self, data: &FetchedData, now: DateTime<Utc>) -> Result<(), InventoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry = CacheEntry {
            fetched_at: now,
            data: data.clone(),
        };
        fs::write(&self.path, serde_json::to_vec(&entry)?)?;

        debug!("Stored inventory cache at {}", self.path.display());
        Ok(())
    }
}
