use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, error, info, warn};
use crate::errors::ToolkitError::InvalidArgumentError;
use crate::errors::ToolkitResult;
use crate::utils::credential::account::{AccountBacking, AccountInfo};
use crate::utils::credential::legacy::{regions_with_default_accounts, save_legacy_account, save_optional_config};
use crate::utils::credential::profile_file::{load_credentials_file, write_credentials_file, CredentialProfile, DEFAULT_PROFILE_NAME};
use crate::utils::credential::provider::AccountInfoProvider;
use crate::utils::listeners::{Listeners, Subscription};
use crate::utils::preferences::{
    p_region_current_default_account, p_region_default_account_enabled, PreferenceStore, P_CURRENT_ACCOUNT,
    P_GLOBAL_CURRENT_DEFAULT_ACCOUNT,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountEvent {
    /// The account catalog was reloaded.
    Reloaded,
    /// The active account changed, carries the new account id.
    CurrentAccountChanged(String),
}

struct ManagerState {
    provider: AccountInfoProvider,
    // Set once resolution fell through to the temporary account, cleared by reload.
    no_account_configured: bool,
}

/// Merges profile and legacy accounts and resolves the active one.
///
/// Every read and the whole of [AccountManager::reload] run under one lock. Listeners
/// are called after the lock is released.
pub struct AccountManager {
    store: Arc<PreferenceStore>,
    state: Mutex<ManagerState>,
    temp_account: AccountInfo,
    listeners: Listeners<AccountEvent>,
}

impl AccountManager {
    /// Nothing is loaded until the first [AccountManager::reload].
    pub fn new(store: Arc<PreferenceStore>, credentials_file: PathBuf) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                provider: AccountInfoProvider::new(store.clone(), credentials_file),
                no_account_configured: false,
            }),
            store,
            temp_account: AccountInfo::temporary(),
            listeners: Listeners::new(),
        }
    }

    /// Reload the profile accounts from the credentials file.
    ///
    /// The file is bootstrapped when missing, unless legacy accounts exist. A file that
    /// fails to load is logged and leaves no profile accounts.
    pub fn reload(&self) {
        {
            let mut state = self.lock_state();
            state.no_account_configured = false;
            let bootstrap = state.provider.legacy_accounts().is_empty();
            if let Err(e) = state.provider.refresh_profile_accounts(bootstrap) {
                let level = if bootstrap { log::Level::Error } else { log::Level::Info };
                log::log!(level, "Failed to load credential profiles from {}: {}", state.provider.credentials_file().display(), e);
            }
        }
        self.persist();
        self.listeners.notify(&AccountEvent::Reloaded);
    }

    /// Profile accounts, or the legacy ones when there is no profile account. When both
    /// are empty the credentials file is bootstrapped and the profiles loaded again.
    pub fn all_accounts(&self) -> Vec<AccountInfo> {
        let mut state = self.lock_state();
        let accounts = Self::all_accounts_locked(&mut state);
        drop(state);
        self.persist();
        accounts
    }

    fn all_accounts_locked(state: &mut ManagerState) -> Vec<AccountInfo> {
        let profile_accounts = state.provider.profile_accounts();
        if !profile_accounts.is_empty() {
            return profile_accounts.to_vec();
        }

        let legacy_accounts = state.provider.legacy_accounts();
        if !legacy_accounts.is_empty() {
            return legacy_accounts;
        }

        info!("No account is configured, bootstrapping the credentials file at {}", state.provider.credentials_file().display());
        if let Err(e) = state.provider.refresh_profile_accounts(true) {
            warn!("Failed to bootstrap the credentials file: {}", e);
        }
        state.provider.profile_accounts().to_vec()
    }

    pub fn account(&self, account_id: &str) -> Option<AccountInfo> {
        let state = self.lock_state();
        Self::account_locked(&state, account_id)
    }

    fn account_locked(state: &ManagerState, account_id: &str) -> Option<AccountInfo> {
        if account_id.is_empty() {
            return None;
        }
        state.provider
            .profile_account(account_id)
            .cloned()
            .or_else(|| state.provider.legacy_account(account_id))
    }

    /// `(account id, account name)` of every account, in catalog order.
    pub fn all_account_names(&self) -> Vec<(String, String)> {
        self.all_accounts()
            .into_iter()
            .map(|account| (account.internal_account_id().to_string(), account.account_name().to_string()))
            .collect()
    }

    pub fn current_account_id(&self) -> String {
        self.store.get_string(P_CURRENT_ACCOUNT)
    }

    /// The active account, never missing.
    ///
    /// Resolution: the stored current id; else the account named `default`; else the
    /// first account, storing its id as current; else the temporary empty account, which
    /// is then returned until the next reload.
    pub fn current_account(&self) -> AccountInfo {
        let mut state = self.lock_state();
        if state.no_account_configured {
            return self.temp_account.clone();
        }

        let current_id = self.current_account_id();
        if let Some(account) = Self::account_locked(&state, &current_id) {
            return account;
        }

        let accounts = Self::all_accounts_locked(&mut state);
        let fallback = accounts.iter()
            .rev()
            .find(|account| account.account_name() == DEFAULT_PROFILE_NAME)
            .or_else(|| accounts.first())
            .cloned();

        match fallback {
            Some(account) => {
                info!("Current account '{}' not found, switching to {}", current_id, account.account_name());
                self.store.set_value(P_CURRENT_ACCOUNT, account.internal_account_id());
                drop(state);
                self.persist();
                account
            }
            None => {
                info!("No account could be found, using a temporary account");
                state.no_account_configured = true;
                drop(state);
                self.persist();
                self.temp_account.clone()
            }
        }
    }

    pub fn set_current_account_id(&self, account_id: &str) {
        if self.current_account_id() == account_id {
            return;
        }
        self.store.set_value(P_CURRENT_ACCOUNT, account_id);
        self.persist();
        debug!("Current account changed to {}", account_id);
        self.listeners.notify(&AccountEvent::CurrentAccountChanged(account_id.to_string()));
    }

    /// A region uses its own default account when it is listed under
    /// `regionsWithDefaultAccounts` and not explicitly disabled.
    pub fn is_region_default_account_enabled(&self, region_id: &str) -> bool {
        regions_with_default_accounts(&self.store).iter().any(|id| id == region_id)
            && self.store.get_bool_or_true(&p_region_default_account_enabled(region_id))
    }

    /// The default account of the region, or the global default account.
    pub fn default_account_id(&self, region_id: &str) -> String {
        if self.is_region_default_account_enabled(region_id) {
            self.store.get_string(&p_region_current_default_account(region_id))
        } else {
            self.store.get_string(P_GLOBAL_CURRENT_DEFAULT_ACCOUNT)
        }
    }

    pub fn set_default_account_id(&self, region_id: &str, account_id: &str) {
        if self.is_region_default_account_enabled(region_id) {
            self.store.set_value(&p_region_current_default_account(region_id), account_id);
        } else {
            self.store.set_value(P_GLOBAL_CURRENT_DEFAULT_ACCOUNT, account_id);
        }
        self.persist();
    }

    /// Switch to the default account of a newly selected region.
    pub fn update_current_account(&self, region_id: &str) {
        if self.is_region_default_account_enabled(region_id) {
            info!("Switching to the default account of region {}", region_id);
        } else {
            info!("Switching to the global default account");
        }
        self.set_current_account_id(&self.default_account_id(region_id));
    }

    pub fn valid_accounts_configured(&self) -> bool {
        self.current_account().is_valid() || self.all_account_names().len() > 1
    }

    /// Persist an account to its backing store and reload.
    ///
    /// A profile account is written to the credentials file under its account name; if
    /// the name differs from the profile it was loaded from, the profile is renamed.
    pub fn save_account(&self, account: &AccountInfo) -> ToolkitResult<()> {
        match account.backing() {
            AccountBacking::Profile(profile_name) => {
                let credentials_file = self.lock_state().provider.credentials_file().to_path_buf();
                save_profile_account(&credentials_file, profile_name, account)?;
                save_optional_config(&self.store, account.account_name(), account);
                self.reload();
            }
            AccountBacking::Legacy => {
                save_legacy_account(&self.store, account);
                self.persist();
                self.listeners.notify(&AccountEvent::Reloaded);
            }
            AccountBacking::Temporary => {
                return Err(InvalidArgumentError("The temporary account can't be saved".to_string()));
            }
        }
        Ok(())
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AccountEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save() {
            error!("Failed to save account preferences: {}", e);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn save_profile_account(credentials_file: &Path, profile_name: &str, account: &AccountInfo) -> ToolkitResult<()> {
    let mut profiles = if credentials_file.exists() {
        load_credentials_file(credentials_file)?
    } else {
        Vec::new()
    };

    let session_token = if account.use_session_token() { account.session_token() } else { None };
    match profiles.iter_mut().find(|profile| profile.name() == profile_name) {
        Some(profile) => {
            if profile_name != account.account_name() {
                info!("Renaming profile {} to {}", profile_name, account.account_name());
                profile.set_name(account.account_name());
            }
            profile.set_credentials(account.access_key(), account.secret_key(), session_token);
        }
        None => profiles.push(CredentialProfile::new(account.account_name(), account.access_key(), account.secret_key(), session_token)),
    }

    write_credentials_file(credentials_file, &profiles)
}
