use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info};
use uuid::Uuid;
use crate::errors::ToolkitResult;
use crate::utils::credential::account::{AccountBacking, AccountInfo};
use crate::utils::credential::legacy::{load_legacy_accounts, load_optional_config};
use crate::utils::credential::profile_file::{bootstrap_credentials_file, load_credentials_file, CredentialProfile};
use crate::utils::preferences::{
    account_key, join_ids, split_ids, PreferenceStore, P_CREDENTIAL_PROFILE_ACCOUNT_IDS, P_CREDENTIAL_PROFILE_NAME,
};

/// Vends the accounts of both backing stores.
///
/// Profile accounts are cached and only change on [AccountInfoProvider::refresh_profile_accounts];
/// legacy accounts are read from the preference store on every call.
pub struct AccountInfoProvider {
    store: Arc<PreferenceStore>,
    credentials_file: PathBuf,
    profile_accounts: Vec<AccountInfo>,
}

impl AccountInfoProvider {
    pub fn new(store: Arc<PreferenceStore>, credentials_file: PathBuf) -> Self {
        Self {
            store,
            credentials_file,
            profile_accounts: Vec::new(),
        }
    }

    pub fn credentials_file(&self) -> &Path {
        &self.credentials_file
    }

    pub fn profile_accounts(&self) -> &[AccountInfo] {
        &self.profile_accounts
    }

    pub fn profile_account(&self, account_id: &str) -> Option<&AccountInfo> {
        self.profile_accounts
            .iter()
            .find(|account| account.internal_account_id() == account_id)
    }

    pub fn legacy_accounts(&self) -> Vec<AccountInfo> {
        load_legacy_accounts(&self.store)
    }

    pub fn legacy_account(&self, account_id: &str) -> Option<AccountInfo> {
        self.legacy_accounts()
            .into_iter()
            .find(|account| account.internal_account_id() == account_id)
    }

    /// Drop the cached profile accounts and load them again from the credentials file.
    ///
    /// With `bootstrap` set, a missing file is first created with an empty default
    /// profile. On error the cache stays empty.
    pub fn refresh_profile_accounts(&mut self, bootstrap: bool) -> ToolkitResult<()> {
        self.profile_accounts.clear();

        if bootstrap && !self.credentials_file.exists() {
            bootstrap_credentials_file(&self.credentials_file)?;
        }
        let profiles = load_credentials_file(&self.credentials_file)?;

        let existing_ids = self.existing_profile_account_ids();
        self.profile_accounts = profiles.iter()
            .map(|profile| {
                let account_id = match existing_ids.get(profile.name()) {
                    Some(account_id) => account_id.clone(),
                    None => {
                        info!("New credentials profile found: {}", profile.name());
                        Uuid::new_v4().to_string()
                    }
                };
                self.profile_account_info(&account_id, profile)
            })
            .collect();
        self.record_profile_account_ids();
        debug!("{} profile accounts loaded", self.profile_accounts.len());

        Ok(())
    }

    fn profile_account_info(&self, account_id: &str, profile: &CredentialProfile) -> AccountInfo {
        let mut account = AccountInfo::new(
            account_id,
            profile.name(),
            profile.access_key_id(),
            profile.secret_access_key(),
            AccountBacking::Profile(profile.name().to_string()),
        );
        account.set_session_token(profile.session_token());
        load_optional_config(&self.store, profile.name(), &mut account);
        account
    }

    /// Profile name to the account id recorded for it by earlier loads.
    fn existing_profile_account_ids(&self) -> HashMap<String, String> {
        split_ids(&self.store.get_string(P_CREDENTIAL_PROFILE_ACCOUNT_IDS))
            .into_iter()
            .filter_map(|account_id| {
                let profile_name = self.store.get_string(&account_key(&account_id, P_CREDENTIAL_PROFILE_NAME));
                (!profile_name.is_empty()).then_some((profile_name, account_id))
            })
            .collect()
    }

    fn record_profile_account_ids(&self) {
        let ids = self.profile_accounts
            .iter()
            .map(|account| account.internal_account_id())
            .collect::<Vec<_>>();
        self.store.set_value(P_CREDENTIAL_PROFILE_ACCOUNT_IDS, &join_ids(&ids));
        for account in self.profile_accounts.iter() {
            self.store.set_value(
                &account_key(account.internal_account_id(), P_CREDENTIAL_PROFILE_NAME),
                account.account_name(),
            );
        }
    }
}
