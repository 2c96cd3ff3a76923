use std::path::PathBuf;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::warn;
use crate::utils::credential::account::{AccountBacking, AccountInfo};
use crate::utils::preferences::{
    account_key, join_ids, p_account_ids, split_ids, PreferenceStore, P_ACCESS_KEY, P_ACCOUNT_NAME,
    P_CERTIFICATE_FILE, P_PRIVATE_KEY_FILE, P_REGIONS_WITH_DEFAULT_ACCOUNTS, P_SECRET_KEY, P_SESSION_TOKEN,
    P_USER_ID, P_USE_SESSION_TOKEN,
};

/// Regions that have region-specific default accounts configured, enabled or not.
pub fn regions_with_default_accounts(store: &PreferenceStore) -> Vec<String> {
    split_ids(&store.get_string(P_REGIONS_WITH_DEFAULT_ACCOUNTS))
}

/// Accounts stored in the preference store: the global ones first, then the ones of
/// every region with default accounts. An id listed twice is returned once.
pub fn load_legacy_accounts(store: &PreferenceStore) -> Vec<AccountInfo> {
    let mut accounts: Vec<AccountInfo> = load_legacy_accounts_by_region(store, None);
    for region_id in regions_with_default_accounts(store) {
        for account in load_legacy_accounts_by_region(store, Some(&region_id)) {
            match accounts.iter_mut().find(|a| a.internal_account_id() == account.internal_account_id()) {
                Some(existing) => *existing = account,
                None => accounts.push(account),
            }
        }
    }
    accounts
}

fn load_legacy_accounts_by_region(store: &PreferenceStore, region_id: Option<&str>) -> Vec<AccountInfo> {
    split_ids(&store.get_string(&p_account_ids(region_id)))
        .iter()
        .map(|account_id| load_legacy_account(store, account_id))
        .collect()
}

fn load_legacy_account(store: &PreferenceStore, account_id: &str) -> AccountInfo {
    let mut account = AccountInfo::new(
        account_id,
        &decoded(store, &account_key(account_id, P_ACCOUNT_NAME)),
        &decoded(store, &account_key(account_id, P_ACCESS_KEY)),
        &decoded(store, &account_key(account_id, P_SECRET_KEY)),
        AccountBacking::Legacy,
    );
    let session_token = decoded(store, &account_key(account_id, P_SESSION_TOKEN));
    if !session_token.is_empty() {
        account.set_session_token(Some(&session_token));
    }
    account.set_use_session_token(store.get_string(&account_key(account_id, P_USE_SESSION_TOKEN)) == "true");
    load_optional_config(store, account_id, &mut account);
    account
}

/// Write a legacy account's values and make sure it is listed under `accountIds`.
pub fn save_legacy_account(store: &PreferenceStore, account: &AccountInfo) {
    let account_id = account.internal_account_id();
    store.set_value(&account_key(account_id, P_ACCOUNT_NAME), &encode(account.account_name()));
    store.set_value(&account_key(account_id, P_ACCESS_KEY), &encode(account.access_key()));
    store.set_value(&account_key(account_id, P_SECRET_KEY), &encode(account.secret_key()));
    match account.session_token() {
        Some(token) => store.set_value(&account_key(account_id, P_SESSION_TOKEN), &encode(token)),
        None => store.remove(&account_key(account_id, P_SESSION_TOKEN)),
    }
    store.set_value(&account_key(account_id, P_USE_SESSION_TOKEN), &account.use_session_token().to_string());
    save_optional_config(store, account_id, account);

    let listed = load_legacy_accounts(store)
        .iter()
        .any(|existing| existing.internal_account_id() == account_id);
    if !listed {
        let mut ids = split_ids(&store.get_string(&p_account_ids(None)));
        ids.push(account_id.to_string());
        store.set_value(&p_account_ids(None), &join_ids(&ids));
    }
}

/// Optional settings live under `<prefix>:<key>`. Legacy accounts use their id as
/// the prefix, profile accounts their profile name so the settings follow the profile
/// whatever id it gets.
pub(crate) fn load_optional_config(store: &PreferenceStore, prefix: &str, account: &mut AccountInfo) {
    let user_id = decoded(store, &account_key(prefix, P_USER_ID));
    account.set_user_id(Some(user_id.as_str()).filter(|id| !id.is_empty()));
    account.set_ec2_private_key_file(path_value(store, &account_key(prefix, P_PRIVATE_KEY_FILE)));
    account.set_ec2_certificate_file(path_value(store, &account_key(prefix, P_CERTIFICATE_FILE)));
}

pub(crate) fn save_optional_config(store: &PreferenceStore, prefix: &str, account: &AccountInfo) {
    match account.user_id() {
        Some(user_id) => store.set_value(&account_key(prefix, P_USER_ID), &encode(user_id)),
        None => store.remove(&account_key(prefix, P_USER_ID)),
    }
    for (key, path) in [
        (P_PRIVATE_KEY_FILE, account.ec2_private_key_file()),
        (P_CERTIFICATE_FILE, account.ec2_certificate_file()),
    ] {
        match path {
            Some(path) => store.set_value(&account_key(prefix, key), &path.to_string_lossy()),
            None => store.remove(&account_key(prefix, key)),
        }
    }
}

fn path_value(store: &PreferenceStore, key: &str) -> Option<PathBuf> {
    store.get(key)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

fn encode(value: &str) -> String {
    STANDARD.encode(value)
}

/// Values are stored base64 encoded. A value that doesn't decode is used as is.
fn decoded(store: &PreferenceStore, key: &str) -> String {
    let value = store.get_string(key);
    if value.is_empty() {
        return value;
    }
    match STANDARD.decode(value.trim()).map(String::from_utf8) {
        Ok(Ok(decoded)) => decoded,
        _ => {
            warn!("Preference {} is not base64 encoded, using the raw value", key);
            value
        }
    }
}
