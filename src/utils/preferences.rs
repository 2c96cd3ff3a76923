use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use log::{debug, error};
use crate::errors::ToolkitError::PreferenceStoreError;
use crate::errors::ToolkitResult;

pub const P_CURRENT_ACCOUNT: &str = "currentAccount";
pub const P_GLOBAL_CURRENT_DEFAULT_ACCOUNT: &str = "currentDefaultAccount";
pub const P_ACCOUNT_IDS: &str = "accountIds";
pub const P_CREDENTIAL_PROFILE_ACCOUNT_IDS: &str = "credentialProfileAccountIds";
pub const P_CREDENTIAL_PROFILE_NAME: &str = "credentialProfileName";
pub const P_REGIONS_WITH_DEFAULT_ACCOUNTS: &str = "regionsWithDefaultAccounts";
pub const P_DEFAULT_REGION: &str = "defaultRegion";
pub const P_ACCOUNT_NAME: &str = "accountName";
pub const P_ACCESS_KEY: &str = "accessKey";
pub const P_SECRET_KEY: &str = "secretKey";
pub const P_SESSION_TOKEN: &str = "sessionToken";
pub const P_USE_SESSION_TOKEN: &str = "useSessionToken";
pub const P_USER_ID: &str = "userId";
pub const P_PRIVATE_KEY_FILE: &str = "privateKeyFile";
pub const P_CERTIFICATE_FILE: &str = "certificateFile";

/// Separator of the id lists stored in a single preference value.
pub const ID_SEPARATOR: char = '|';

/// `accountIds-<region>` holds the legacy accounts of one region.
pub fn p_account_ids(region_id: Option<&str>) -> String {
    match region_id {
        Some(region_id) => format!("{}-{}", P_ACCOUNT_IDS, region_id),
        None => P_ACCOUNT_IDS.to_string(),
    }
}

pub fn p_region_current_default_account(region_id: &str) -> String {
    format!("{}-{}", P_GLOBAL_CURRENT_DEFAULT_ACCOUNT, region_id)
}

pub fn p_region_default_account_enabled(region_id: &str) -> String {
    format!("regionalAccountEnabled-{}", region_id)
}

/// Per-account keys are `<account id>:<name>`.
pub fn account_key(account_id: &str, name: &str) -> String {
    format!("{}:{}", account_id, name)
}

/// Split a `|` separated id list, dropping empty entries.
pub fn split_ids(value: &str) -> Vec<String> {
    value.split(ID_SEPARATOR)
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .collect()
}

pub fn join_ids<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter().map(|id| id.as_ref()).collect::<Vec<_>>().join(&ID_SEPARATOR.to_string())
}

/// Flat string key/value settings, persisted as a JSON object.
///
/// Reads of a missing key return an empty string, so callers can treat "unset" and
/// "empty" alike.
pub struct PreferenceStore {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, String>>,
}

impl PreferenceStore {
    /// A store that lives only in memory, [PreferenceStore::save] is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load the store from `path`. A missing or unreadable file gives an empty store
    /// that will be written to `path` on the next save.
    pub fn load(path: &Path) -> Self {
        let values = if path.exists() {
            debug!("Preference file found at {:?}", path);
            match fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    error!("Preference file {} is broken, starting empty: {}", path.display(), e);
                    BTreeMap::new()
                }),
                Err(e) => {
                    error!("Failed to read preference file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Self {
            path: Some(path.to_path_buf()),
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.values.read() {
            Ok(values) => values.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key).unwrap_or_default()
    }

    /// Only an explicit `false` is false.
    pub fn get_bool_or_true(&self, key: &str) -> bool {
        !matches!(self.get(key).as_deref().map(str::trim), Some("false"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set_value(&self, key: &str, value: &str) {
        let mut values = match self.values.write() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        let mut values = match self.values.write() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.remove(key);
    }

    pub fn save(&self) -> ToolkitResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let values = match self.values.read() {
                Ok(values) => values,
                Err(poisoned) => poisoned.into_inner(),
            };
            serde_json::to_string_pretty(&*values)
                .map_err(|e| PreferenceStoreError(format!("Failed to serialize preferences: {}", e)))?
        };

        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!("Creating directory {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, content)?;

        Ok(())
    }
}
