use aws_sdk_s3::config::Credentials;
use crate::utils::credential::account::AccountInfo;
use crate::utils::credential::Credential;

const PROVIDER_NAME: &str = "AwsToolkitAccount";

impl Credential for AccountInfo {
    type CredentialType = Credentials;

    /// Static SDK credentials of the account. The session token is only passed when the
    /// account is set to use one.
    fn get_credential(&self) -> Self::CredentialType {
        let session_token = if self.use_session_token() {
            self.session_token().map(|token| token.to_string())
        } else {
            None
        };

        Credentials::new(
            self.access_key(),
            self.secret_key(),
            session_token,
            None,
            PROVIDER_NAME)
    }
}
