#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

/// PKCS#8 PEM key parsing
pub mod pkcs8;

/// Service and key settings, and their loading
pub mod setting;

/// Client secret (ES256 client assertion) signing
pub mod client_secret;

/// Provider public key set fetching
pub mod jwks;

/// Identity token verification
pub mod open_id;

/// Claims of verified identity tokens
pub mod claims;

/// Authorization URL and token endpoint exchanges
pub mod oauth;

/// Random `state` values for authorization requests
pub mod state;

mod response;

pub use claims::{Audience, RealUserStatus, ValidatedClaims};
pub use client_secret::{ClientSecretError, ClientSecretGenerator, ClientSecretSigner};
pub use jwks::{FetchJwkError, KeySet, KeySetResolver};
pub use oauth::{AccessTokenResponse, AppleAuthClient, LoginUri, TokenExchangeError};
pub use open_id::{IdTokenVerifier, OpenIdProvider, VerifyIdTokenError};
pub use response::ProviderError;
pub use setting::{AppleAuthConfig, AuthSetting, KeySetting, SettingError};
pub use state::AuthorizationState;
