//! Persistence layer for per-account state.
//!
//! Two small JSON files survive restarts:
//!
//! - the token file maps an account id to its last issued bearer token;
//! - the session file maps an account id to the user agent chosen for it.
//!
//! Both are flat `{"<id>": "<value>"}` objects handled by [`JsonMapStore`].
//! Saves use an atomic write pattern (write to temp file, then rename) so a
//! crash mid-write never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use crate::device;

/// A string-to-string map mirrored to a JSON file.
///
/// Every mutation is saved immediately. Save failures are logged and the
/// in-memory state is kept, so the current run keeps working.
pub struct JsonMapStore {
    entries: BTreeMap<String, String>,
    file_path: String,
}

impl JsonMapStore {
    /// Loads the map stored at `file_path`.
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if the file exists but cannot be read or is not
    /// a JSON object of strings.
    pub fn load(file_path: &str) -> Result<Self, String> {
        let entries = read_entries(file_path)?;
        log::debug!("Loaded {} entries from file={}", entries.len(), file_path);
        Ok(Self {
            entries,
            file_path: file_path.to_string(),
        })
    }

    /// Re-reads the file, replacing the in-memory map.
    ///
    /// On failure the current map is kept and the error is returned.
    pub fn reload(&mut self) -> Result<(), String> {
        self.entries = read_entries(&self.file_path)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Stores `value` under `key` and saves the file.
    pub fn insert(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
        self.save();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn save(&self) {
        match serde_json::to_string_pretty(&self.entries) {
            Ok(data) => {
                let temp_path = format!("{}.tmp", self.file_path);

                if let Err(e) = fs::write(&temp_path, data) {
                    log::error!("Failed to write temp file file={}: {}", temp_path, e);
                    return;
                }

                if let Err(e) = fs::rename(&temp_path, &self.file_path) {
                    log::error!("Failed to rename temp file to {} : {}", self.file_path, e);
                    let _ = fs::remove_file(&temp_path);
                    return;
                }

                log::debug!(
                    "Saved {} entries to file={}",
                    self.entries.len(),
                    self.file_path
                );
            }
            Err(e) => {
                log::error!("Failed to serialize {}: {}", self.file_path, e);
            }
        }
    }
}

fn read_entries(file_path: &str) -> Result<BTreeMap<String, String>, String> {
    match fs::read_to_string(file_path) {
        Ok(data) if data.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(data) => serde_json::from_str(&data)
            .map_err(|e| format!("Failed to parse JSON file={file_path}: {e}")),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("File does not exist, starting with empty state file={}", file_path);
            Ok(BTreeMap::new())
        }
        Err(e) => Err(format!("Failed to read file={file_path}: {e}")),
    }
}

/// Account id → bearer token.
pub struct TokenStore {
    inner: JsonMapStore,
}

impl TokenStore {
    /// # Errors
    ///
    /// See [`JsonMapStore::load`].
    pub fn load(file_path: &str) -> Result<Self, String> {
        let inner = JsonMapStore::load(file_path)?;
        log::info!("Loaded {} cached tokens from file={}", inner.len(), file_path);
        Ok(Self { inner })
    }

    /// Picks up tokens written since the last read. Failures are logged and
    /// the previous tokens stay in use.
    pub fn refresh(&mut self) {
        if let Err(e) = self.inner.reload() {
            log::warn!("Keeping cached tokens: {}", e);
        }
    }

    pub fn token(&self, account_id: &str) -> Option<String> {
        self.inner.get(account_id).map(str::to_string)
    }

    pub fn save_token(&mut self, account_id: &str, token: String) {
        self.inner.insert(account_id, token);
    }
}

/// Session id → user agent.
///
/// Once a user agent is recorded for a session it is never replaced, which
/// keeps the device fingerprint stable across requests and restarts.
pub struct SessionStore {
    inner: JsonMapStore,
}

impl SessionStore {
    /// # Errors
    ///
    /// See [`JsonMapStore::load`].
    pub fn load(file_path: &str) -> Result<Self, String> {
        Ok(Self {
            inner: JsonMapStore::load(file_path)?,
        })
    }

    /// Returns the user agent of `session`, choosing and saving a random one
    /// on first use.
    pub fn user_agent_for(&mut self, session: &str) -> String {
        if let Some(user_agent) = self.inner.get(session) {
            return user_agent.to_string();
        }

        log::info!("Creating user agent session={}", session);
        let user_agent = device::random_user_agent().to_string();
        self.inner.insert(session, user_agent.clone());
        user_agent
    }
}
