use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where an account's credentials are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountBacking {
    /// A profile of the shared credentials file, carries the profile name.
    Profile(String),
    /// Stored directly in the preference store.
    Legacy,
    /// Never persisted.
    Temporary,
}

/// Credentials and settings of one configured account.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountInfo {
    internal_account_id: String,
    account_name: String,
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    use_session_token: bool,
    user_id: Option<String>,
    ec2_private_key_file: Option<PathBuf>,
    ec2_certificate_file: Option<PathBuf>,
    backing: AccountBacking,
}

impl AccountInfo {
    pub(crate) fn new(internal_account_id: &str, account_name: &str, access_key: &str, secret_key: &str, backing: AccountBacking) -> Self {
        Self {
            internal_account_id: internal_account_id.to_string(),
            account_name: account_name.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            session_token: None,
            use_session_token: false,
            user_id: None,
            ec2_private_key_file: None,
            ec2_certificate_file: None,
            backing,
        }
    }

    /// A credentials file profile that isn't saved yet. Its id is only a placeholder,
    /// the stable one is assigned when the file is loaded again.
    pub fn new_profile_account(profile_name: &str, access_key: &str, secret_key: &str) -> Self {
        Self::new(&Uuid::new_v4().to_string(), profile_name, access_key, secret_key, AccountBacking::Profile(profile_name.to_string()))
    }

    /// An account kept in the preference store.
    pub fn new_legacy_account(account_name: &str, access_key: &str, secret_key: &str) -> Self {
        Self::new(&Uuid::new_v4().to_string(), account_name, access_key, secret_key, AccountBacking::Legacy)
    }

    /// The empty stand-in returned while no account is configured.
    pub fn temporary() -> Self {
        Self::new(&Uuid::new_v4().to_string(), "", "", "", AccountBacking::Temporary)
    }

    pub fn internal_account_id(&self) -> &str {
        &self.internal_account_id
    }

    /// For profile accounts this is the profile name.
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn use_session_token(&self) -> bool {
        self.use_session_token
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn ec2_private_key_file(&self) -> Option<&Path> {
        self.ec2_private_key_file.as_deref()
    }

    pub fn ec2_certificate_file(&self) -> Option<&Path> {
        self.ec2_certificate_file.as_deref()
    }

    pub fn backing(&self) -> &AccountBacking {
        &self.backing
    }

    pub fn is_profile_account(&self) -> bool {
        matches!(self.backing, AccountBacking::Profile(_))
    }

    pub fn is_temporary(&self) -> bool {
        self.backing == AccountBacking::Temporary
    }

    /// Whether the account has the keys needed to sign requests. Callers check this
    /// before making calls, nothing here enforces it.
    pub fn is_valid(&self) -> bool {
        if self.access_key.trim().is_empty() || self.secret_key.trim().is_empty() {
            return false;
        }
        if self.use_session_token {
            return self.session_token.as_deref().is_some_and(|token| !token.trim().is_empty());
        }
        true
    }

    /// Both EC2 files are configured and exist.
    pub fn is_certificate_valid(&self) -> bool {
        match (&self.ec2_private_key_file, &self.ec2_certificate_file) {
            (Some(private_key), Some(certificate)) => private_key.is_file() && certificate.is_file(),
            _ => false,
        }
    }

    pub fn set_account_name(&mut self, account_name: &str) {
        self.account_name = account_name.to_string();
    }

    pub fn set_access_key(&mut self, access_key: &str) {
        self.access_key = access_key.to_string();
    }

    pub fn set_secret_key(&mut self, secret_key: &str) {
        self.secret_key = secret_key.to_string();
    }

    /// Setting a token also turns session tokens on, clearing it turns them off.
    pub fn set_session_token(&mut self, session_token: Option<&str>) {
        self.session_token = session_token.map(|s| s.to_string());
        self.use_session_token = self.session_token.is_some();
    }

    pub fn set_user_id(&mut self, user_id: Option<&str>) {
        self.user_id = user_id.map(|s| s.to_string());
    }

    pub fn set_ec2_private_key_file(&mut self, path: Option<PathBuf>) {
        self.ec2_private_key_file = path;
    }

    pub fn set_ec2_certificate_file(&mut self, path: Option<PathBuf>) {
        self.ec2_certificate_file = path;
    }

    pub(crate) fn set_use_session_token(&mut self, use_session_token: bool) {
        self.use_session_token = use_session_token;
    }
}

impl Debug for AccountInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountInfo")
            .field("internal_account_id", &self.internal_account_id)
            .field("account_name", &self.account_name)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("session_token", &self.session_token.as_deref().map(redact))
            .field("use_session_token", &self.use_session_token)
            .field("user_id", &self.user_id)
            .field("ec2_private_key_file", &self.ec2_private_key_file)
            .field("ec2_certificate_file", &self.ec2_certificate_file)
            .field("backing", &self.backing)
            .finish()
    }
}

impl Display for AccountInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.account_name, self.internal_account_id)
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "***" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid() {
        let mut account = AccountInfo::new("id", "default", "AKIA", "secret", AccountBacking::Legacy);
        assert!(account.is_valid());

        account.set_use_session_token(true);
        assert!(!account.is_valid());
        account.set_session_token(Some("token"));
        assert!(account.is_valid());

        account.set_secret_key(" ");
        assert!(!account.is_valid());
        assert!(!AccountInfo::temporary().is_valid());
    }

    #[test]
    fn test_certificate_requires_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("pk.pem");
        let cert = dir.path().join("cert.pem");
        std::fs::write(&key, "key").unwrap();

        let mut account = AccountInfo::new("id", "default", "", "", AccountBacking::Legacy);
        account.set_ec2_private_key_file(Some(key));
        account.set_ec2_certificate_file(Some(cert.clone()));
        assert!(!account.is_certificate_valid());

        std::fs::write(&cert, "cert").unwrap();
        assert!(account.is_certificate_valid());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut account = AccountInfo::new("id", "work", "AKIAEXAMPLE", "topsecret", AccountBacking::Profile("work".to_string()));
        account.set_session_token(Some("tokenvalue"));
        let printed = format!("{:?}", account);
        assert!(printed.contains("work"));
        assert!(!printed.contains("AKIAEXAMPLE"));
        assert!(!printed.contains("topsecret"));
        assert!(!printed.contains("tokenvalue"));
        assert_eq!(account.to_string(), "work (id)");
    }
}
