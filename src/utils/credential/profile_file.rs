use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use log::{debug, info, warn};
use crate::errors::ToolkitError::CredentialsFileError;
use crate::errors::ToolkitResult;

pub const DEFAULT_PROFILE_NAME: &str = "default";
pub const AWS_ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const AWS_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const AWS_SESSION_TOKEN: &str = "aws_session_token";

/// One `[name]` section of a shared credentials file.
///
/// Properties keep file order; keys other than the credential ones (`region`,
/// `role_arn`, ...) are carried through a rewrite untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialProfile {
    name: String,
    properties: Vec<(String, String)>,
}

impl CredentialProfile {
    pub fn new(name: &str, access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        let mut profile = Self::empty(name);
        profile.set_credentials(access_key_id, secret_access_key, session_token);
        profile
    }

    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Missing keys read as empty.
    pub fn access_key_id(&self) -> &str {
        self.property(AWS_ACCESS_KEY_ID).unwrap_or_default()
    }

    pub fn secret_access_key(&self) -> &str {
        self.property(AWS_SECRET_ACCESS_KEY).unwrap_or_default()
    }

    pub fn session_token(&self) -> Option<&str> {
        self.property(AWS_SESSION_TOKEN).filter(|token| !token.is_empty())
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        match self.properties.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.properties.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove_property(&mut self, key: &str) {
        self.properties.retain(|(k, _)| k != key);
    }

    pub fn set_credentials(&mut self, access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) {
        self.set_property(AWS_ACCESS_KEY_ID, access_key_id);
        self.set_property(AWS_SECRET_ACCESS_KEY, secret_access_key);
        match session_token {
            Some(token) => self.set_property(AWS_SESSION_TOKEN, token),
            None => self.remove_property(AWS_SESSION_TOKEN),
        }
    }
}

impl std::fmt::Debug for CredentialProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.properties.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>();
        f.debug_struct("CredentialProfile")
            .field("name", &self.name)
            .field("keys", &keys)
            .finish()
    }
}

/// Parse the shared credentials file format, returning profiles in file order.
///
/// Blank lines and lines starting with `#` or `;` are skipped, as are comments trailing
/// a header or a value. A `[profile name]` header is read as `[name]` and a section
/// appearing twice is merged.
///
/// # Errors
/// [CredentialsFileError] on a property outside any section, a line that is neither
/// a header nor `key = value`, or an empty profile name.
pub fn parse_credentials(content: &str) -> ToolkitResult<Vec<CredentialProfile>> {
    let mut profiles: Vec<CredentialProfile> = Vec::new();
    let mut current: Option<usize> = None;

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let (name, rest) = header.split_once(']')
                .ok_or_else(|| CredentialsFileError(format!("Line {}: unclosed profile header", line_number)))?;
            if !is_comment(rest.trim_start()) {
                return Err(CredentialsFileError(format!("Line {}: unexpected text after profile header", line_number)));
            }
            let name = name.trim();
            let name = name.strip_prefix("profile ").map(str::trim).unwrap_or(name);
            if name.is_empty() {
                return Err(CredentialsFileError(format!("Line {}: empty profile name", line_number)));
            }

            current = match profiles.iter().position(|profile| profile.name == name) {
                Some(position) => {
                    warn!("Profile [{}] is defined more than once, merging", name);
                    Some(position)
                }
                None => {
                    profiles.push(CredentialProfile::empty(name));
                    Some(profiles.len() - 1)
                }
            };
            continue;
        }

        let (key, value) = line.split_once('=')
            .ok_or_else(|| CredentialsFileError(format!("Line {}: expected `key = value`", line_number)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CredentialsFileError(format!("Line {}: empty property name", line_number)));
        }
        let Some(position) = current else {
            return Err(CredentialsFileError(format!("Line {}: property {} outside of any profile", line_number, key)));
        };
        profiles[position].set_property(&key.to_lowercase(), strip_inline_comment(value));
    }

    Ok(profiles)
}

fn is_comment(text: &str) -> bool {
    text.is_empty() || text.starts_with('#') || text.starts_with(';')
}

/// Drop a trailing `# ...` or `; ...` comment. The marker only counts after whitespace,
/// so secret keys containing `#` or `;` are kept whole.
fn strip_inline_comment(value: &str) -> &str {
    let value = value.trim();
    let cut = value
        .char_indices()
        .zip(value.chars().skip(1))
        .find(|((_, c), next)| c.is_whitespace() && (*next == '#' || *next == ';'))
        .map(|((index, _), _)| index);
    match cut {
        Some(index) => value[..index].trim_end(),
        None => value,
    }
}

pub fn render_credentials(profiles: &[CredentialProfile]) -> String {
    let mut content = String::new();
    for (index, profile) in profiles.iter().enumerate() {
        if index > 0 {
            content.push('\n');
        }
        content.push_str(&format!("[{}]\n", profile.name));
        for (key, value) in profile.properties.iter() {
            content.push_str(&format!("{}={}\n", key, value));
        }
    }
    content
}

pub fn load_credentials_file(path: &Path) -> ToolkitResult<Vec<CredentialProfile>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CredentialsFileError(format!("Failed to read {}: {}", path.display(), e)))?;
    let profiles = parse_credentials(&content)?;
    debug!("Loaded {} profiles from {}", profiles.len(), path.display());
    Ok(profiles)
}

/// Replace the file content, keeping it readable by the owner only.
pub fn write_credentials_file(path: &Path, profiles: &[CredentialProfile]) -> ToolkitResult<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        // mode() only applies when the file is created.
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(render_credentials(profiles).as_bytes())?;
    file.flush()?;

    Ok(())
}

/// Create `path` with a single `[default]` profile holding empty keys.
pub fn bootstrap_credentials_file(path: &Path) -> ToolkitResult<()> {
    info!("Creating credentials file {}", path.display());
    write_credentials_file(path, &[CredentialProfile::new(DEFAULT_PROFILE_NAME, "", "", None)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# shared credentials
[default]
aws_access_key_id = AKIADEFAULT
aws_secret_access_key = secret/default
region = us-west-2

; work account
[profile work]
AWS_ACCESS_KEY_ID=AKIAWORK
aws_secret_access_key=secret=work
aws_session_token = token
";

    #[test]
    fn test_parse_credentials() {
        let profiles = parse_credentials(SAMPLE).unwrap();
        assert_eq!(profiles.len(), 2);

        assert_eq!(profiles[0].name(), "default");
        assert_eq!(profiles[0].access_key_id(), "AKIADEFAULT");
        assert_eq!(profiles[0].secret_access_key(), "secret/default");
        assert_eq!(profiles[0].property("region"), Some("us-west-2"));
        assert_eq!(profiles[0].session_token(), None);

        assert_eq!(profiles[1].name(), "work");
        assert_eq!(profiles[1].access_key_id(), "AKIAWORK");
        assert_eq!(profiles[1].secret_access_key(), "secret=work");
        assert_eq!(profiles[1].session_token(), Some("token"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_credentials("aws_access_key_id=x"), Err(CredentialsFileError(_))));
        assert!(matches!(parse_credentials("[default]\nnot a property"), Err(CredentialsFileError(_))));
        assert!(matches!(parse_credentials("[ ]"), Err(CredentialsFileError(_))));
        assert!(matches!(parse_credentials("[default"), Err(CredentialsFileError(_))));
        assert!(matches!(parse_credentials("[default] main"), Err(CredentialsFileError(_))));
        assert!(parse_credentials("").unwrap().is_empty());
    }

    #[test]
    fn test_trailing_comments() {
        let content = "[default] # main account\naws_access_key_id = AKIAMAIN ; rotated monthly\naws_secret_access_key = se#cr;et\n\n[profile work];old\naws_access_key_id=AKIAWORK\naws_secret_access_key=secret #\n";
        let profiles = parse_credentials(content).unwrap();

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name(), "default");
        assert_eq!(profiles[0].access_key_id(), "AKIAMAIN");
        assert_eq!(profiles[0].secret_access_key(), "se#cr;et");
        assert_eq!(profiles[1].name(), "work");
        assert_eq!(profiles[1].secret_access_key(), "secret");
    }

    #[test]
    fn test_duplicate_sections_merge() {
        let profiles = parse_credentials("[a]\nx=1\n[b]\ny=2\n[a]\nx=3\nz=4").unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].property("x"), Some("3"));
        assert_eq!(profiles[0].property("z"), Some("4"));
    }

    #[test]
    fn test_rewrite_keeps_other_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        let mut profiles = parse_credentials(SAMPLE).unwrap();
        profiles[1].set_credentials("AKIANEW", "newsecret", None);

        write_credentials_file(&path, &profiles).unwrap();
        let reloaded = load_credentials_file(&path).unwrap();
        assert_eq!(reloaded[0].property("region"), Some("us-west-2"));
        assert_eq!(reloaded[1].access_key_id(), "AKIANEW");
        assert_eq!(reloaded[1].session_token(), None);
    }

    #[test]
    fn test_bootstrap_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".aws/credentials");

        bootstrap_credentials_file(&path).unwrap();
        let profiles = load_credentials_file(&path).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name(), DEFAULT_PROFILE_NAME);
        assert_eq!(profiles[0].access_key_id(), "");
        assert_eq!(profiles[0].secret_access_key(), "");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
