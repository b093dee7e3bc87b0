use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::client_secret::{ClientSecretError, ClientSecretGenerator, ClientSecretSigner};
use crate::open_id::OpenIdProvider;
use crate::response::{self, ProviderError, ResponseError};
use crate::setting::{AuthSetting, KeySetting};
use crate::state::AuthorizationState;

/// The token object returned by a successful exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessTokenResponse {
    /// The access token as issued by the authorization server
    pub access_token: Option<CompactString>,
    /// Lifetime of the access token in seconds
    pub expires_in: Option<u64>,
    /// Identity token of the user
    pub id_token: Option<CompactString>,
    /// Used to obtain new access tokens
    pub refresh_token: Option<CompactString>,
    /// Type of the token, `bearer`
    pub token_type: Option<CompactString>,
}

/// Error type for token endpoint calls
#[derive(Debug, thiserror::Error)]
pub enum TokenExchangeError {
    /// Missing input, detected before any request is sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The client secret could not be generated
    #[error(transparent)]
    ClientSecret(#[from] ClientSecretError),
    /// The request could not be sent or the body could not be read
    #[error("Failed to exchange token: {0}")]
    Request(#[source] reqwest::Error),
    /// The provider answered with a non-success status
    #[error(transparent)]
    Provider(ProviderError),
    /// The body is not a token response
    #[error("Failed to decode token response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<ResponseError> for TokenExchangeError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Request(err) => TokenExchangeError::Request(err),
            ResponseError::Provider(err) => TokenExchangeError::Provider(err),
            ResponseError::Decode(err) => TokenExchangeError::Decode(err),
        }
    }
}

/// URL to send the user to, with the state to check on return
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUri {
    /// The authorization URL
    pub uri: String,
    /// The `state` parameter embedded in `uri`
    pub state: AuthorizationState,
}

/// Build the URL of the authorization request
pub fn build_authorization_uri(
    setting: &AuthSetting,
    provider: &OpenIdProvider,
    state: &AuthorizationState,
) -> String {
    let mut params = vec![
        ("response_type", "code id_token"),
        ("client_id", setting.client_id()),
        ("redirect_uri", setting.redirect_uri()),
        ("state", state.as_ref()),
    ];
    if let Some(scope) = setting.scope() {
        params.push(("scope", scope));
    }
    params.push(("response_mode", "form_post"));

    let query = params
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", provider.authorization_url, query)
}

/// Client of the Sign in with Apple token endpoint
#[derive(Debug, Clone)]
pub struct AppleAuthClient<G = ClientSecretSigner> {
    setting: AuthSetting,
    secret_generator: G,
    provider: OpenIdProvider,
    http_client: reqwest::Client,
}

impl AppleAuthClient<ClientSecretSigner> {
    /// Creates a client signing its secrets with `key`
    pub fn new(setting: AuthSetting, key: KeySetting) -> Self {
        let signer = ClientSecretSigner::from_setting(&setting, key);
        Self::with_secret_generator(setting, signer)
    }
}

impl<G: ClientSecretGenerator> AppleAuthClient<G> {
    /// Creates a client using a custom client secret generator
    pub fn with_secret_generator(setting: AuthSetting, secret_generator: G) -> Self {
        Self {
            setting,
            secret_generator,
            provider: OpenIdProvider::apple(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Use a shared or preconfigured HTTP client (timeouts, proxies, ...)
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Target another provider
    pub fn with_provider(mut self, provider: OpenIdProvider) -> Self {
        self.provider = provider;
        self
    }

    /// The service settings
    pub fn setting(&self) -> &AuthSetting {
        &self.setting
    }

    /// Create the login URL with a fresh state
    pub fn create_login_uri(&self) -> LoginUri {
        let state = AuthorizationState::default();
        let uri = build_authorization_uri(&self.setting, &self.provider, &state);
        LoginUri { uri, state }
    }

    /// Exchange the authorization code posted to the redirect URI.
    ///
    /// Codes are single use: exchanging the same code twice fails with
    /// [TokenExchangeError::Provider].
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
    ) -> Result<AccessTokenResponse, TokenExchangeError> {
        if code.trim().is_empty() {
            return Err(TokenExchangeError::InvalidArgument("code must not be empty"));
        }
        self.post_token_request("authorization_code", ("code", code))
            .await
    }

    /// Get a new access token from a refresh token
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<AccessTokenResponse, TokenExchangeError> {
        if refresh_token.trim().is_empty() {
            return Err(TokenExchangeError::InvalidArgument(
                "refresh_token must not be empty",
            ));
        }
        self.post_token_request("refresh_token", ("refresh_token", refresh_token))
            .await
    }

    async fn post_token_request(
        &self,
        grant_type: &str,
        grant: (&str, &str),
    ) -> Result<AccessTokenResponse, TokenExchangeError> {
        let client_secret = self.secret_generator.generate()?;
        tracing::debug!(grant_type, url = %self.provider.token_url, "Requesting token");

        let response = self
            .http_client
            .post(self.provider.token_url.as_str())
            .form(&[
                ("grant_type", grant_type),
                grant,
                ("redirect_uri", self.setting.redirect_uri()),
                ("client_id", self.setting.client_id()),
                ("client_secret", client_secret.as_str()),
            ])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(TokenExchangeError::Request)?;

        Ok(response::read_json(response).await?)
    }
}
