pub mod account;
pub mod legacy;
pub mod manager;
pub mod monitor;
pub mod profile_file;
pub mod provider;
pub mod sdk_credential;

pub use account::{AccountBacking, AccountInfo};
pub use manager::{AccountEvent, AccountManager};
pub use monitor::CredentialsFileMonitor;

pub trait Credential {
    type CredentialType;

    fn get_credential(&self) -> Self::CredentialType;
}
