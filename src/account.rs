//! Account credentials loaded from the data file.
//!
//! Each non-empty line of the data file is a Telegram Mini App init-data
//! string. The embedded `user` parameter is decoded locally to learn the
//! account id (the session identifier) and a display name; the raw line is
//! sent untouched as the `tma` credential.

use serde::Deserialize;
use std::fs;

/// The `user` JSON object embedded in init data.
#[derive(Deserialize)]
struct InitDataUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    username: Option<String>,
}

/// One automated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Zero-based position among the non-empty lines of the data file.
    pub index: usize,
    /// The raw init-data line.
    pub init_data: String,
    /// Numeric account id, stable across runs.
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: Option<String>,
}

impl Account {
    /// Decodes an init-data line.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if the line has no `user` parameter or the
    /// parameter is not a JSON object with a numeric `id`.
    pub fn parse(index: usize, init_data: &str) -> Result<Self, String> {
        let init_data = init_data.trim();
        let user = url::form_urlencoded::parse(init_data.as_bytes())
            .find(|(key, _)| key == "user")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| "init data has no user parameter".to_string())?;

        let user: InitDataUser =
            serde_json::from_str(&user).map_err(|e| format!("invalid user payload: {e}"))?;

        Ok(Self {
            index,
            init_data: init_data.to_string(),
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
        })
    }

    /// Key under which this account's token and user agent are stored.
    pub fn session_key(&self) -> String {
        self.id.to_string()
    }

    /// `first last`, or the username when both are empty.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone().unwrap_or_default()
        } else {
            name.to_string()
        }
    }

    /// One-based number used in every log line for this account.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Loads all accounts from `path`.
///
/// Lines that cannot be decoded are logged and skipped; the remaining
/// accounts keep their original line positions.
///
/// # Errors
///
/// Returns `Err(String)` if the file cannot be read.
pub fn load_accounts(path: &str) -> Result<Vec<Account>, String> {
    log::info!("Loading accounts file={}", path);
    let data =
        fs::read_to_string(path).map_err(|e| format!("Failed to read data file {path}: {e}"))?;

    let accounts: Vec<Account> = data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .filter_map(|(index, line)| match Account::parse(index, line) {
            Ok(account) => Some(account),
            Err(e) => {
                log::warn!("[Account {}] Skipping unreadable credential: {}", index + 1, e);
                None
            }
        })
        .collect();

    log::info!("Loaded {} accounts from file={}", accounts.len(), path);
    Ok(accounts)
}
