use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::{Duration, SystemTime};
use log::{debug, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use crate::errors::ToolkitError::CredentialsFileError;
use crate::errors::ToolkitResult;
use crate::utils::credential::AccountManager;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

type Fingerprint = Option<(Option<SystemTime>, u64)>;

fn fingerprint(path: &Path) -> Fingerprint {
    fs::metadata(path).ok().map(|metadata| (metadata.modified().ok(), metadata.len()))
}

/// Reloads the accounts whenever the shared credentials file changes on disk.
///
/// The parent directory is watched so the file may be created, replaced or deleted.
/// Events are debounced, and a change only counts when the file's modification time
/// or length differs from the last reload. Monitoring stops when this is dropped.
pub struct CredentialsFileMonitor {
    target: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl CredentialsFileMonitor {
    pub fn start(target: &Path, accounts: Weak<AccountManager>, debounce: Duration) -> ToolkitResult<Self> {
        let target = target.to_path_buf();
        let (Some(directory), Some(file_name)) = (target.parent(), target.file_name()) else {
            return Err(CredentialsFileError(format!("Can't monitor {}: not a file path", target.display())));
        };
        let directory = if directory.as_os_str().is_empty() { Path::new(".") } else { directory };
        fs::create_dir_all(directory)?;

        let file_name = file_name.to_os_string();
        let watched = target.clone();
        let mut last_seen = fingerprint(&target);
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                if !events.iter().any(|event| event.path.file_name() == Some(file_name.as_os_str())) {
                    return;
                }
                let current = fingerprint(&watched);
                if current == last_seen {
                    debug!("{} touched without changes", watched.display());
                    return;
                }
                last_seen = current;

                match accounts.upgrade() {
                    Some(accounts) => {
                        info!("{} changed, reloading accounts", watched.display());
                        accounts.reload();
                    }
                    None => debug!("Accounts are gone, ignoring change to {}", watched.display()),
                }
            }
            Err(e) => warn!("Error while monitoring {}: {}", watched.display(), e),
        }).map_err(|e| CredentialsFileError(format!("Unable to start file monitor on {}: {}", target.display(), e)))?;

        debouncer
            .watcher()
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| CredentialsFileError(format!("Unable to start file monitor on {}: {}", target.display(), e)))?;
        info!("Monitoring content of {}", target.display());

        Ok(Self { target, _debouncer: debouncer })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for CredentialsFileMonitor {
    fn drop(&mut self) {
        info!("Stopped monitoring content of {}", self.target.display());
    }
}

impl std::fmt::Debug for CredentialsFileMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsFileMonitor")
            .field("target", &self.target)
            .finish()
    }
}
