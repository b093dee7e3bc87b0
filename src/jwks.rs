use compact_str::CompactString;
use jsonwebtoken::jwk::Jwk;
use serde::Deserialize;

use crate::open_id::OpenIdProvider;
use crate::response::{self, ProviderError, ResponseError};

/// Error type for fetching the provider's public keys
#[derive(Debug, thiserror::Error)]
pub enum FetchJwkError {
    /// The request could not be sent or the body could not be read
    #[error("Failed to fetch JWK: {0}")]
    Request(#[source] reqwest::Error),
    /// The provider answered with a non-success status
    #[error(transparent)]
    Provider(ProviderError),
    /// The body is not a JWK set
    #[error("Failed to decode JWK: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<ResponseError> for FetchJwkError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Request(err) => FetchJwkError::Request(err),
            ResponseError::Provider(err) => FetchJwkError::Provider(err),
            ResponseError::Decode(err) => FetchJwkError::Decode(err),
        }
    }
}

/// Public keys published by the provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeySet {
    #[serde(default, deserialize_with = "deserialize_keys")]
    keys: Vec<Jwk>,
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Jwk>>::deserialize(deserializer)?.unwrap_or_default())
}

impl KeySet {
    /// Creates a [KeySet] from already parsed keys
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    /// Find a key by its `kid`
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
    }

    /// All keys, in the order the provider published them
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Whether the set has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Fetches the provider's JWK set.
///
/// Keys are not cached: every call performs a request.
#[derive(Debug, Clone)]
pub struct KeySetResolver {
    jwks_url: CompactString,
    http_client: reqwest::Client,
}

impl KeySetResolver {
    /// Creates a new [KeySetResolver] for the given JWKS endpoint
    pub fn new(jwks_url: impl Into<CompactString>, http_client: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http_client,
        }
    }

    /// Creates a new [KeySetResolver] for the provider's JWKS endpoint
    pub fn for_provider(provider: &OpenIdProvider, http_client: reqwest::Client) -> Self {
        Self::new(provider.open_id_jwks_url.clone(), http_client)
    }

    /// Fetch the current key set
    pub async fn fetch_key_set(&self) -> Result<KeySet, FetchJwkError> {
        tracing::debug!(url = %self.jwks_url, "Fetching JWK set");

        let response = self
            .http_client
            .get(self.jwks_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(FetchJwkError::Request)?;

        let key_set: KeySet = response::read_json(response).await?;
        tracing::debug!(keys = key_set.keys.len(), "Fetched JWK set");
        Ok(key_set)
    }
}

/// Fetch the JWK set from the specified url
pub async fn fetch_jwk(url: impl AsRef<str>) -> Result<KeySet, FetchJwkError> {
    KeySetResolver::new(url.as_ref(), reqwest::Client::new())
        .fetch_key_set()
        .await
}
