use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use validator::ValidateUrl;

use crate::pkcs8::{self, PemError};

/// Error type for building settings
#[derive(Debug, thiserror::Error)]
pub enum SettingError {
    /// A mandatory field is empty or only contains whitespace
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// The redirect URI is not a valid URL
    #[error("redirect_uri is not a valid URL: {0}")]
    InvalidRedirectUri(CompactString),
    /// A mandatory environment variable is not set
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    /// The private key file could not be read
    #[error("failed to read private key file {}: {source}", path.display())]
    KeyFile {
        /// Path of the key file
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

fn non_empty(value: impl Into<CompactString>, name: &'static str) -> Result<CompactString, SettingError> {
    let value = value.into();
    if value.trim().is_empty() {
        return Err(SettingError::Empty(name));
    }
    Ok(value)
}

/// Identity of the service registered for Sign in with Apple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSetting {
    team_id: CompactString,
    client_id: CompactString,
    redirect_uri: CompactString,
    scope: Option<CompactString>,
}

impl AuthSetting {
    /// Creates a new [AuthSetting]
    ///
    /// - `team_id`: the team identifier of the developer account
    /// - `client_id`: the services identifier or bundle id
    /// - `redirect_uri`: where the provider posts the authorization response
    /// - `scope`: space separated scopes to request, e.g. `name email`
    pub fn new(
        team_id: impl Into<CompactString>,
        client_id: impl Into<CompactString>,
        redirect_uri: impl Into<CompactString>,
        scope: Option<CompactString>,
    ) -> Result<Self, SettingError> {
        let team_id = non_empty(team_id, "team_id")?;
        let client_id = non_empty(client_id, "client_id")?;
        let redirect_uri = non_empty(redirect_uri, "redirect_uri")?;
        if !redirect_uri.as_str().validate_url() {
            return Err(SettingError::InvalidRedirectUri(redirect_uri));
        }
        let scope = scope.filter(|scope| !scope.trim().is_empty());

        Ok(Self {
            team_id,
            client_id,
            redirect_uri,
            scope,
        })
    }

    /// The team identifier
    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// The services identifier or bundle id
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The OAuth redirect URI
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// The requested scope, if any
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

/// The private key created for Sign in with Apple
#[derive(Clone, PartialEq, Eq)]
pub struct KeySetting {
    key_id: CompactString,
    private_key: String,
}

impl std::fmt::Debug for KeySetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetting")
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl KeySetting {
    /// Creates a new [KeySetting] from the key id and the PEM contents of the `.p8` file
    pub fn new(
        key_id: impl Into<CompactString>,
        private_key: impl Into<String>,
    ) -> Result<Self, SettingError> {
        let key_id = non_empty(key_id, "key_id")?;
        let private_key = private_key.into();
        if private_key.trim().is_empty() {
            return Err(SettingError::Empty("private_key"));
        }
        Ok(Self {
            key_id,
            private_key,
        })
    }

    /// The key identifier
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The PEM contents of the key
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// The base64 body of the key, without PEM delimiters and line breaks
    pub fn private_key_body(&self) -> Result<String, PemError> {
        pkcs8::extract_body(&self.private_key)
    }
}

/// Raw configuration, as read from a file or the environment
///
/// Either `private_key` (PEM contents) or `private_key_path` must be set.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppleAuthConfig {
    pub team_id: CompactString,
    pub client_id: CompactString,
    pub redirect_uri: CompactString,
    pub scope: Option<CompactString>,
    pub key_id: CompactString,
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
}

impl AppleAuthConfig {
    /// Read the configuration from `APPLE_*` environment variables
    pub fn from_env() -> Result<Self, SettingError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingError> {
        let required = |name: &'static str| {
            lookup(name)
                .map(CompactString::from)
                .ok_or(SettingError::MissingEnv(name))
        };

        Ok(Self {
            team_id: required("APPLE_TEAM_ID")?,
            client_id: required("APPLE_CLIENT_ID")?,
            redirect_uri: required("APPLE_REDIRECT_URI")?,
            scope: lookup("APPLE_SCOPE").map(CompactString::from),
            key_id: required("APPLE_KEY_ID")?,
            private_key: lookup("APPLE_PRIVATE_KEY"),
            private_key_path: lookup("APPLE_PRIVATE_KEY_PATH").map(PathBuf::from),
        })
    }

    /// Validate the configuration and load the private key
    pub fn into_settings(self) -> Result<(AuthSetting, KeySetting), SettingError> {
        let auth = AuthSetting::new(self.team_id, self.client_id, self.redirect_uri, self.scope)?;

        let private_key = match (self.private_key, self.private_key_path) {
            (Some(pem), _) if !pem.trim().is_empty() => pem,
            (_, Some(path)) => std::fs::read_to_string(&path)
                .map_err(|source| SettingError::KeyFile { path, source })?,
            _ => return Err(SettingError::Empty("private_key")),
        };
        let key = KeySetting::new(self.key_id, private_key)?;

        Ok((auth, key))
    }
}
