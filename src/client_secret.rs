use std::time::Duration;

use compact_str::CompactString;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair};
use serde::{Deserialize, Serialize};

use crate::open_id::APPLE_ISSUER;
use crate::pkcs8::{self, PemError};
use crate::setting::{AuthSetting, KeySetting};

/// Default validity of a client secret
pub const DEFAULT_CLIENT_SECRET_VALIDITY: Duration = Duration::from_secs(10 * 60);

/// Error type for client secret generation
#[derive(Debug, thiserror::Error)]
pub enum ClientSecretError {
    /// Missing or malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The PEM body of the key could not be decoded
    #[error("Failed to decode private key: {0}")]
    KeyDecode(#[from] PemError),
    /// The key is not a PKCS#8 P-256 EC private key
    #[error("Private key rejected: {0}")]
    KeyRejected(String),
    /// Signing the token failed
    #[error("Failed to sign client secret: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl ClientSecretError {
    /// Whether the error comes from the key material or the signature primitive
    pub fn is_crypto(&self) -> bool {
        !matches!(self, ClientSecretError::InvalidArgument(_))
    }
}

/// Claims of the client secret JWT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecretClaims {
    /// Team identifier
    pub iss: CompactString,
    /// Services identifier or bundle id
    pub sub: CompactString,
    /// Provider issuer
    pub aud: CompactString,
    /// Issued at, seconds since the epoch
    pub iat: u64,
    /// Expiration, seconds since the epoch
    pub exp: u64,
}

/// Generates the `client_secret` sent to the token endpoint
pub trait ClientSecretGenerator {
    /// Generate a client secret valid for [DEFAULT_CLIENT_SECRET_VALIDITY]
    fn generate(&self) -> Result<String, ClientSecretError> {
        self.generate_with_validity(DEFAULT_CLIENT_SECRET_VALIDITY)
    }

    /// Generate a client secret valid for `validity`
    fn generate_with_validity(&self, validity: Duration) -> Result<String, ClientSecretError>;
}

/// Signs client secrets with the private key registered for Sign in with Apple
#[derive(Debug, Clone)]
pub struct ClientSecretSigner {
    team_id: CompactString,
    client_id: CompactString,
    audience: CompactString,
    key: KeySetting,
}

impl ClientSecretSigner {
    /// Creates a new [ClientSecretSigner] for the Apple issuer
    pub fn new(
        team_id: impl Into<CompactString>,
        client_id: impl Into<CompactString>,
        key: KeySetting,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            client_id: client_id.into(),
            audience: APPLE_ISSUER.into(),
            key,
        }
    }

    /// Creates a new [ClientSecretSigner] from the service settings
    pub fn from_setting(setting: &AuthSetting, key: KeySetting) -> Self {
        Self::new(setting.team_id(), setting.client_id(), key)
    }

    /// Override the `aud` claim
    pub fn with_audience(mut self, audience: impl Into<CompactString>) -> Self {
        self.audience = audience.into();
        self
    }
}

impl ClientSecretGenerator for ClientSecretSigner {
    fn generate_with_validity(&self, validity: Duration) -> Result<String, ClientSecretError> {
        sign_client_secret(
            &self.team_id,
            &self.client_id,
            &self.audience,
            &self.key,
            validity,
        )
    }
}

/// Sign a client secret JWT (ES256)
///
/// The key is parsed on every call and no signing state outlives it, so the
/// function can be called any number of times, from any thread.
pub fn sign_client_secret(
    team_id: &str,
    client_id: &str,
    audience: &str,
    key: &KeySetting,
    validity: Duration,
) -> Result<String, ClientSecretError> {
    if team_id.trim().is_empty() {
        return Err(ClientSecretError::InvalidArgument("team_id must not be empty"));
    }
    if client_id.trim().is_empty() {
        return Err(ClientSecretError::InvalidArgument("client_id must not be empty"));
    }
    if validity.as_secs() == 0 {
        return Err(ClientSecretError::InvalidArgument(
            "validity must be at least one second",
        ));
    }

    let der = pkcs8::decode_body(key.private_key())?;
    // only P-256 keys are accepted for ES256
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &der, &SystemRandom::new())
        .map_err(|err| ClientSecretError::KeyRejected(err.to_string()))?;

    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key.key_id().to_owned());

    let iat = jsonwebtoken::get_current_timestamp();
    let claims = ClientSecretClaims {
        iss: team_id.into(),
        sub: client_id.into(),
        aud: audience.into(),
        iat,
        exp: iat + validity.as_secs(),
    };

    let token = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_ec_der(&der))?;
    tracing::debug!(kid = key.key_id(), exp = claims.exp, "signed client secret");
    Ok(token)
}
