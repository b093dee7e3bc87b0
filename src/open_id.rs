use compact_str::CompactString;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode_header};

use crate::claims::{IdTokenPayload, ValidatedClaims};
use crate::jwks::{FetchJwkError, KeySetResolver};

/// Issuer of Apple identity tokens, also the audience of client secrets
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Default clock skew tolerated when checking `exp`, `nbf` and `iat`, in seconds
pub const DEFAULT_LEEWAY: u64 = 60;

/// Endpoints of an OpenID provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenIdProvider {
    /// Where the user is redirected to sign in
    pub authorization_url: CompactString,
    /// Where codes and refresh tokens are exchanged
    pub token_url: CompactString,
    /// Expected `iss` of identity tokens
    pub open_id_issuer: CompactString,
    /// Where the public signing keys are published
    pub open_id_jwks_url: CompactString,
}

impl OpenIdProvider {
    /// Sign in with Apple
    pub fn apple() -> Self {
        Self {
            authorization_url: "https://appleid.apple.com/auth/authorize".into(),
            token_url: "https://appleid.apple.com/auth/token".into(),
            open_id_issuer: APPLE_ISSUER.into(),
            open_id_jwks_url: "https://appleid.apple.com/auth/keys".into(),
        }
    }
}

impl Default for OpenIdProvider {
    fn default() -> Self {
        Self::apple()
    }
}

/// Error type for identity token verification
#[derive(Debug, thiserror::Error)]
pub enum VerifyIdTokenError {
    /// The token is not a well-formed signed JWT
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The public keys could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchJwkError),
    /// No published key matches the `kid` of the token
    #[error("kid {0} not found in apple public keys")]
    KeyNotFound(String),
    /// The published key cannot verify tokens
    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),
    /// The signature does not match the key
    #[error("Invalid signature")]
    SignatureInvalid,
    /// `exp` is in the past
    #[error("Token expired")]
    TokenExpired,
    /// `nbf` or `iat` is in the future
    #[error("Token not yet valid")]
    TokenNotYetValid,
    /// `aud` does not match the expected client id
    #[error("Audience mismatch")]
    AudienceMismatch,
    /// `iss` does not match the provider issuer
    #[error("Issuer mismatch")]
    IssuerMismatch,
    /// The payload misses mandatory claims or is malformed
    #[error("Invalid claims: {0}")]
    InvalidClaims(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for VerifyIdTokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                VerifyIdTokenError::SignatureInvalid
            }
            ErrorKind::ExpiredSignature => VerifyIdTokenError::TokenExpired,
            ErrorKind::ImmatureSignature => VerifyIdTokenError::TokenNotYetValid,
            ErrorKind::InvalidAudience => VerifyIdTokenError::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => {
                VerifyIdTokenError::AudienceMismatch
            }
            ErrorKind::InvalidIssuer => VerifyIdTokenError::IssuerMismatch,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                VerifyIdTokenError::InvalidArgument(err.to_string())
            }
            ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => VerifyIdTokenError::UnsupportedKey(err.to_string()),
            _ => VerifyIdTokenError::InvalidClaims(err),
        }
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=')
}

/// Check that `token` looks like a signed compact JWT
///
/// Unsigned tokens (`alg: none`, empty signature) are never accepted.
pub fn check_token_shape(token: &str) -> Result<(), VerifyIdTokenError> {
    if token.trim().is_empty() {
        return Err(VerifyIdTokenError::InvalidArgument(
            "token must not be empty".into(),
        ));
    }

    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(VerifyIdTokenError::InvalidArgument(
            "token must have three segments".into(),
        ));
    };
    if header.is_empty() || payload.is_empty() {
        return Err(VerifyIdTokenError::InvalidArgument(
            "token header and payload must not be empty".into(),
        ));
    }
    if signature.is_empty() {
        return Err(VerifyIdTokenError::InvalidArgument(
            "unsigned tokens are not accepted".into(),
        ));
    }
    if ![header, payload, signature]
        .iter()
        .all(|segment| segment.chars().all(is_segment_char))
    {
        return Err(VerifyIdTokenError::InvalidArgument(
            "token segments must be base64url encoded".into(),
        ));
    }
    Ok(())
}

/// Read the `kid` of a token header, without verifying anything
pub fn get_id_token_kid(id_token: impl AsRef<str>) -> Result<String, VerifyIdTokenError> {
    let header = decode_header(id_token.as_ref())
        .map_err(|err| VerifyIdTokenError::InvalidArgument(format!("malformed header: {err}")))?;
    header
        .kid
        .ok_or_else(|| VerifyIdTokenError::InvalidArgument("missing kid in header".into()))
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, VerifyIdTokenError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa_params) => {
            DecodingKey::from_rsa_components(&rsa_params.n, &rsa_params.e)
        }
        AlgorithmParameters::EllipticCurve(ec_params) => {
            DecodingKey::from_ec_components(&ec_params.x, &ec_params.y)
        }
        AlgorithmParameters::OctetKeyPair(okp_params) => {
            DecodingKey::from_ed_components(&okp_params.x)
        }
        AlgorithmParameters::OctetKey(_) => {
            return Err(VerifyIdTokenError::UnsupportedKey(
                "symmetric keys cannot verify identity tokens".into(),
            ));
        }
    }
    .map_err(|err| VerifyIdTokenError::UnsupportedKey(err.to_string()))
}

fn key_algorithm(jwk: &Jwk) -> Result<Option<Algorithm>, VerifyIdTokenError> {
    let Some(alg) = jwk.common.key_algorithm else {
        return Ok(None);
    };
    let alg = match alg {
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        KeyAlgorithm::ES256 => Algorithm::ES256,
        KeyAlgorithm::ES384 => Algorithm::ES384,
        KeyAlgorithm::EdDSA => Algorithm::EdDSA,
        other => {
            return Err(VerifyIdTokenError::UnsupportedKey(format!(
                "unsupported key algorithm {other:?}"
            )));
        }
    };
    Ok(Some(alg))
}

/// Verify an identity token against an already resolved key
///
/// - `expected_issuer`: the `iss` the token must carry
/// - `expected_audience`: the client id the token must be issued for; `None`
///   skips the audience check
/// - `leeway`: tolerated clock skew in seconds
pub fn verify_id_token_with_jwk(
    id_token: &str,
    expected_issuer: &str,
    expected_audience: Option<&str>,
    jwk: &Jwk,
    leeway: u64,
) -> Result<ValidatedClaims, VerifyIdTokenError> {
    let header = decode_header(id_token)
        .map_err(|err| VerifyIdTokenError::InvalidArgument(format!("malformed header: {err}")))?;
    let alg = key_algorithm(jwk)?.unwrap_or(header.alg);
    let decoding_key = decoding_key(jwk)?;

    let mut validation = Validation::new(alg);
    validation.leeway = leeway;
    validation.validate_nbf = true;
    validation.set_issuer(&[expected_issuer]);
    match expected_audience {
        Some(audience) => {
            validation.set_audience(&[audience]);
            validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        }
        None => {
            validation.validate_aud = false;
            validation.set_required_spec_claims(&["exp", "iss"]);
        }
    }

    let token = jsonwebtoken::decode::<IdTokenPayload>(id_token, &decoding_key, &validation)?;
    let claims = ValidatedClaims::new(token.claims);

    if let Some(iat) = claims.iat() {
        if iat > jsonwebtoken::get_current_timestamp().saturating_add(leeway) {
            return Err(VerifyIdTokenError::TokenNotYetValid);
        }
    }

    Ok(claims)
}

/// Verifies identity tokens against the provider's published keys.
///
/// The key set is fetched again for every token.
#[derive(Debug, Clone)]
pub struct IdTokenVerifier {
    provider: OpenIdProvider,
    resolver: KeySetResolver,
    leeway: u64,
}

impl Default for IdTokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IdTokenVerifier {
    /// Creates a verifier for Apple identity tokens
    pub fn new() -> Self {
        Self::with_http_client(reqwest::Client::new())
    }

    /// Creates a verifier for Apple identity tokens using `http_client`
    pub fn with_http_client(http_client: reqwest::Client) -> Self {
        Self::with_provider(OpenIdProvider::apple(), http_client)
    }

    /// Creates a verifier for another provider
    pub fn with_provider(provider: OpenIdProvider, http_client: reqwest::Client) -> Self {
        let resolver = KeySetResolver::for_provider(&provider, http_client);
        Self {
            provider,
            resolver,
            leeway: DEFAULT_LEEWAY,
        }
    }

    /// Override the tolerated clock skew, in seconds
    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    /// Verify `id_token`
    ///
    /// The audience is only checked when `client_id` is given.
    pub async fn verify(
        &self,
        id_token: &str,
        client_id: Option<&str>,
    ) -> Result<ValidatedClaims, VerifyIdTokenError> {
        check_token_shape(id_token)?;
        let kid = get_id_token_kid(id_token)?;

        let key_set = self.resolver.fetch_key_set().await?;
        let jwk = key_set
            .find(&kid)
            .ok_or_else(|| VerifyIdTokenError::KeyNotFound(kid.clone()))?;

        let result = verify_id_token_with_jwk(
            id_token,
            &self.provider.open_id_issuer,
            client_id,
            jwk,
            self.leeway,
        );
        match &result {
            Ok(claims) => tracing::debug!(%kid, sub = claims.sub(), "Verified identity token"),
            Err(err) => tracing::warn!(%kid, error = %err, "Identity token rejected"),
        }
        result
    }

    /// Verify `id_token` without checking its audience
    pub async fn verify_without_audience(
        &self,
        id_token: &str,
    ) -> Result<ValidatedClaims, VerifyIdTokenError> {
        self.verify(id_token, None).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    use super::*;

    const FAKE_KEY: &str = include_str!("../tests/fixtures/fake-key.p8");
    const OTHER_KEY: &str = include_str!("../tests/fixtures/other-key.p8");
    const CLIENT_ID: &str = "com.golap.app";

    fn jwk(alg: Option<&str>) -> Jwk {
        let mut value = json!({
            "kty": "EC",
            "kid": "test-kid",
            "crv": "P-256",
            "x": "YlNIeWELIFdXV40QrPtu0qzm5pjzGaw8IFodHF2QHTQ",
            "y": "WPe1ibAktiuttAJ2MoapRxumpqCMqVFzSKmRibrmxqY",
        });
        if let Some(alg) = alg {
            value["alg"] = json!(alg);
        }
        serde_json::from_value(value).unwrap()
    }

    fn sign(pem: &str, claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some("test-kid".into());
        let key = EncodingKey::from_ec_pem(pem.as_bytes()).unwrap();
        jsonwebtoken::encode(&header, &claims, &key).unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        let now = jsonwebtoken::get_current_timestamp();
        json!({
            "iss": APPLE_ISSUER,
            "aud": CLIENT_ID,
            "sub": "001234.abcdef",
            "iat": now,
            "exp": now + 600,
            "email": "user@privaterelay.appleid.com",
            "email_verified": "true",
        })
    }

    #[test]
    fn shape_check_rejects_malformed_tokens() {
        for token in ["", "   ", "...", "a.b", "a.b.c.d", "a.b.", "a!.b.c", ".b.c"] {
            assert!(
                matches!(check_token_shape(token), Err(VerifyIdTokenError::InvalidArgument(_))),
                "{token:?}"
            );
        }
        assert!(check_token_shape("eyJh.eyJp.c2ln").is_ok());
    }

    #[test]
    fn get_id_token_kid_reads_header() {
        let token = sign(FAKE_KEY, valid_claims());
        assert_eq!(get_id_token_kid(&token).unwrap(), "test-kid");
    }

    #[test]
    fn get_id_token_kid_requires_kid() {
        let key = EncodingKey::from_ec_pem(FAKE_KEY.as_bytes()).unwrap();
        let token =
            jsonwebtoken::encode(&Header::new(Algorithm::ES256), &valid_claims(), &key).unwrap();
        assert!(matches!(
            get_id_token_kid(&token),
            Err(VerifyIdTokenError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unsigned_header_is_rejected() {
        // {"alg":"none","kid":"test-kid"}
        let token = "eyJhbGciOiJub25lIiwia2lkIjoidGVzdC1raWQifQ.eyJpc3MiOiJ4In0.c2ln";
        assert!(matches!(
            get_id_token_kid(token),
            Err(VerifyIdTokenError::InvalidArgument(_))
        ));
    }

    #[test]
    fn verifies_valid_token() {
        let token = sign(FAKE_KEY, valid_claims());

        let claims =
            verify_id_token_with_jwk(&token, APPLE_ISSUER, Some(CLIENT_ID), &jwk(Some("ES256")), 60)
                .unwrap();

        assert_eq!(claims.iss(), APPLE_ISSUER);
        assert_eq!(claims.sub(), Some("001234.abcdef"));
        assert_eq!(claims.email_verified(), Some(true));
        assert_eq!(claims.is_private_email(), Some(true));
    }

    #[test]
    fn falls_back_to_header_algorithm() {
        let token = sign(FAKE_KEY, valid_claims());
        assert!(verify_id_token_with_jwk(&token, APPLE_ISSUER, None, &jwk(None), 60).is_ok());
    }

    #[test]
    fn rejects_foreign_signature() {
        let token = sign(OTHER_KEY, valid_claims());
        let err =
            verify_id_token_with_jwk(&token, APPLE_ISSUER, Some(CLIENT_ID), &jwk(Some("ES256")), 60)
                .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::SignatureInvalid));
    }

    #[test]
    fn rejects_algorithm_mismatch() {
        let token = sign(FAKE_KEY, valid_claims());
        let err =
            verify_id_token_with_jwk(&token, APPLE_ISSUER, None, &jwk(Some("ES384")), 60)
                .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::SignatureInvalid));
    }

    #[test]
    fn rejects_expired_token() {
        let mut claims = valid_claims();
        let now = jsonwebtoken::get_current_timestamp();
        claims["iat"] = json!(now - 7200);
        claims["exp"] = json!(now - 3600);

        let err = verify_id_token_with_jwk(&sign(FAKE_KEY, claims), APPLE_ISSUER, None, &jwk(None), 60)
            .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::TokenExpired));
    }

    #[test]
    fn rejects_token_issued_in_the_future() {
        let mut claims = valid_claims();
        let now = jsonwebtoken::get_current_timestamp();
        claims["iat"] = json!(now + 3600);
        claims["exp"] = json!(now + 7200);

        let err = verify_id_token_with_jwk(&sign(FAKE_KEY, claims), APPLE_ISSUER, None, &jwk(None), 60)
            .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::TokenNotYetValid));
    }

    #[test]
    fn rejects_token_not_yet_valid() {
        let mut claims = valid_claims();
        let now = jsonwebtoken::get_current_timestamp();
        claims["nbf"] = json!(now + 3600);
        claims["exp"] = json!(now + 7200);

        let err = verify_id_token_with_jwk(&sign(FAKE_KEY, claims), APPLE_ISSUER, None, &jwk(None), 60)
            .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::TokenNotYetValid));
    }

    #[test]
    fn leeway_tolerates_recent_expiry() {
        let mut claims = valid_claims();
        let now = jsonwebtoken::get_current_timestamp();
        claims["iat"] = json!(now - 600);
        claims["exp"] = json!(now - 30);
        let token = sign(FAKE_KEY, claims);

        assert!(verify_id_token_with_jwk(&token, APPLE_ISSUER, None, &jwk(None), DEFAULT_LEEWAY).is_ok());
        let err = verify_id_token_with_jwk(&token, APPLE_ISSUER, None, &jwk(None), 0).unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::TokenExpired));
    }

    #[test]
    fn rejects_wrong_issuer() {
        let mut claims = valid_claims();
        claims["iss"] = json!("https://evil.example.com");

        let err = verify_id_token_with_jwk(&sign(FAKE_KEY, claims), APPLE_ISSUER, None, &jwk(None), 60)
            .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::IssuerMismatch));
    }

    #[test]
    fn audience_is_checked_only_when_given() {
        let token = sign(FAKE_KEY, valid_claims());

        let err = verify_id_token_with_jwk(&token, APPLE_ISSUER, Some("badAud"), &jwk(None), 60)
            .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::AudienceMismatch));
        assert!(verify_id_token_with_jwk(&token, APPLE_ISSUER, None, &jwk(None), 60).is_ok());
    }

    #[test]
    fn missing_audience_fails_audience_check() {
        let mut claims = valid_claims();
        claims.as_object_mut().unwrap().remove("aud");

        let err = verify_id_token_with_jwk(&sign(FAKE_KEY, claims), APPLE_ISSUER, Some(CLIENT_ID), &jwk(None), 60)
            .unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::AudienceMismatch));
    }

    #[test]
    fn symmetric_keys_are_unsupported() {
        let token = sign(FAKE_KEY, valid_claims());
        let jwk: Jwk = serde_json::from_value(json!({
            "kty": "oct",
            "kid": "test-kid",
            "k": "c2VjcmV0",
        }))
        .unwrap();

        let err = verify_id_token_with_jwk(&token, APPLE_ISSUER, None, &jwk, 60).unwrap_err();
        assert!(matches!(err, VerifyIdTokenError::UnsupportedKey(_)));
    }
}
