use std::env;
use std::path::PathBuf;
use std::time::Duration;
use log::{debug, warn};
use crate::utils::proxy::ProxySettings;

pub const ENV_REGIONS_FILE_OVERRIDE: &str = "AWS_TOOLKIT_REGIONS_FILE_OVERRIDE";
pub const ENV_USE_LOCAL_REGION_FILE: &str = "AWS_TOOLKIT_USE_LOCAL_REGION_FILE";
pub const ENV_REGIONS_BASE_URL: &str = "AWS_TOOLKIT_REGIONS_BASE_URL";
pub const ENV_STATE_DIR: &str = "AWS_TOOLKIT_STATE_DIR";
pub const ENV_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
pub const ENV_MONITOR_CREDENTIALS_FILE: &str = "AWS_TOOLKIT_MONITOR_CREDENTIALS_FILE";

pub const DEFAULT_REGIONS_BASE_URL: &str = "https://vstoolkit.amazonwebservices.com/";
pub const REGIONS_METADATA_OBJECT: &str = "ServiceEndPoints.xml";

/// Everything the toolkit reads from its environment. Read once at startup.
#[derive(Clone, Debug)]
pub struct ToolkitConfig {
    /// Region metadata file that takes priority over every other source.
    pub regions_file_override: Option<PathBuf>,
    /// Skip the remote metadata and go straight to the bundled document.
    pub use_local_region_file: bool,
    /// Base url of the remote metadata document and flag icons, ends with `/`.
    pub remote_metadata_base_url: String,
    pub state_dir: PathBuf,
    pub credentials_file: PathBuf,
    /// Reload the accounts whenever `credentials_file` changes on disk.
    pub monitor_credentials_file: bool,
    pub preferences_file: PathBuf,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub proxy: ProxySettings,
}

impl ToolkitConfig {
    /// Config rooted at `state_dir`, with no override, remote loading enabled and no proxy.
    pub fn with_state_dir(state_dir: PathBuf) -> Self {
        let credentials_file = dirs::home_dir()
            .unwrap_or(PathBuf::from("."))
            .join(".aws")
            .join("credentials");

        Self {
            regions_file_override: None,
            use_local_region_file: false,
            remote_metadata_base_url: DEFAULT_REGIONS_BASE_URL.to_string(),
            preferences_file: state_dir.join("preferences.json"),
            state_dir,
            credentials_file,
            monitor_credentials_file: true,
            connect_timeout: Duration::from_secs(20),
            socket_timeout: Duration::from_secs(20),
            proxy: ProxySettings::disabled(),
        }
    }

    pub fn from_env() -> Self {
        let state_dir = non_empty_var(ENV_STATE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);
        let mut config = Self::with_state_dir(state_dir);

        config.regions_file_override = non_empty_var(ENV_REGIONS_FILE_OVERRIDE).map(PathBuf::from);
        config.use_local_region_file = non_empty_var(ENV_USE_LOCAL_REGION_FILE)
            .map(|value| parse_bool(ENV_USE_LOCAL_REGION_FILE, &value))
            .unwrap_or(false);
        if let Some(base_url) = non_empty_var(ENV_REGIONS_BASE_URL) {
            config.remote_metadata_base_url = normalize_base_url(&base_url);
        }
        if let Some(credentials_file) = non_empty_var(ENV_SHARED_CREDENTIALS_FILE) {
            config.credentials_file = PathBuf::from(credentials_file);
        }
        if let Some(value) = non_empty_var(ENV_MONITOR_CREDENTIALS_FILE) {
            config.monitor_credentials_file = parse_bool(ENV_MONITOR_CREDENTIALS_FILE, &value);
        }

        let non_proxy_hosts = non_empty_var("NO_PROXY")
            .or_else(|| non_empty_var("no_proxy"))
            .map(|hosts| hosts.split(',').map(|h| h.trim().to_string()).filter(|h| !h.is_empty()).collect())
            .unwrap_or_default();
        if let Some(proxy) = non_empty_var("HTTPS_PROXY").or_else(|| non_empty_var("https_proxy")) {
            config.proxy = ProxySettings::from_proxy_url(&proxy, non_proxy_hosts).unwrap_or_default();
        }

        debug!("Toolkit config loaded from environment: {:?}", config);
        config
    }

    pub fn regions_metadata_url(&self) -> String {
        format!("{}{}", self.remote_metadata_base_url, REGIONS_METADATA_OBJECT)
    }

    /// Directory the remote metadata and flag icons are cached in.
    pub fn regions_cache_dir(&self) -> PathBuf {
        self.state_dir.join("regions")
    }
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self::with_state_dir(default_state_dir())
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or(PathBuf::from("."))
        .join("aws-toolkit")
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> bool {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            warn!("{} has an invalid boolean value {}. Using false", key, value);
            false
        }
    }
}

pub(crate) fn normalize_base_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    }
}
