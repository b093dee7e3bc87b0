use compact_str::CompactString;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Suffix of the addresses handed out by the private email relay service
pub const PRIVATE_RELAY_EMAIL_SUFFIX: &str = "@privaterelay.appleid.com";

/// Whether the user appears to be a real person, as reported by Apple.
///
/// Apple combines on-device machine learning, account history and hardware
/// attestation to compute it. Use it to mitigate fraud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealUserStatus {
    /// Only supported on iOS 14, macOS 11, watchOS 7, tvOS 14 and later
    Unsupported = 0,
    /// The system can't determine whether the user is a real person
    Unknown = 1,
    /// The user appears to be a real person
    LikelyReal = 2,
}

impl RealUserStatus {
    fn from_claim(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_u64().and_then(Self::from_code),
            Value::String(text) => {
                let text = text.trim();
                match text {
                    "Unsupported" => Some(Self::Unsupported),
                    "Unknown" => Some(Self::Unknown),
                    "LikelyReal" => Some(Self::LikelyReal),
                    _ => text.parse().ok().and_then(Self::from_code),
                }
            }
            _ => None,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Unsupported),
            1 => Some(Self::Unknown),
            2 => Some(Self::LikelyReal),
            _ => None,
        }
    }
}

/// The `aud` claim, either a single audience or a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    #[allow(missing_docs)]
    Single(CompactString),
    #[allow(missing_docs)]
    Multiple(Vec<CompactString>),
}

impl Audience {
    /// Whether `audience` is one of the audiences of the token
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct IdTokenPayload {
    iss: CompactString,
    sub: Option<CompactString>,
    aud: Option<Audience>,
    iat: Option<u64>,
    exp: u64,
    nonce: Option<CompactString>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Claims of an identity token whose signature, issuer, audience and
/// lifetime have been checked.
///
/// Only produced by [crate::open_id::IdTokenVerifier] and
/// [crate::open_id::verify_id_token_with_jwk].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedClaims {
    payload: IdTokenPayload,
}

impl ValidatedClaims {
    pub(crate) fn new(payload: IdTokenPayload) -> Self {
        Self { payload }
    }

    /// Issuer
    pub fn iss(&self) -> &str {
        &self.payload.iss
    }

    /// Subject, the stable identifier of the user
    pub fn sub(&self) -> Option<&str> {
        self.payload.sub.as_deref()
    }

    /// Audience
    pub fn aud(&self) -> Option<&Audience> {
        self.payload.aud.as_ref()
    }

    /// Issued at, seconds since the epoch
    pub fn iat(&self) -> Option<u64> {
        self.payload.iat
    }

    /// Expiration, seconds since the epoch
    pub fn exp(&self) -> u64 {
        self.payload.exp
    }

    /// Nonce sent in the authorization request
    pub fn nonce(&self) -> Option<&str> {
        self.payload.nonce.as_deref()
    }

    /// Any other claim of the payload
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.extra.get(name)
    }

    /// The user's real email address or the relay address, depending on
    /// whether they chose to hide it
    pub fn email(&self) -> Option<&str> {
        self.claim("email").and_then(Value::as_str)
    }

    /// Apple only returns verified addresses, so this is `Some(true)`
    /// whenever an email is present
    pub fn email_verified(&self) -> Option<bool> {
        self.bool_claim("email_verified")
    }

    /// Whether the email is a private relay address.
    ///
    /// Deduced from the email domain when the claim itself is absent.
    pub fn is_private_email(&self) -> Option<bool> {
        self.bool_claim("is_private_email").or_else(|| {
            self.email().map(|email| {
                email.len() >= PRIVATE_RELAY_EMAIL_SUFFIX.len()
                    && email.is_char_boundary(email.len() - PRIVATE_RELAY_EMAIL_SUFFIX.len())
                    && email[email.len() - PRIVATE_RELAY_EMAIL_SUFFIX.len()..]
                        .eq_ignore_ascii_case(PRIVATE_RELAY_EMAIL_SUFFIX)
            })
        })
    }

    /// Whether the transaction is on a nonce-supported platform
    pub fn nonce_supported(&self) -> Option<bool> {
        self.bool_claim("nonce_supported")
    }

    /// Whether the user appears to be a real person
    pub fn real_user_status(&self) -> Option<RealUserStatus> {
        self.claim("real_user_status")
            .and_then(RealUserStatus::from_claim)
    }

    // Apple sends booleans both as JSON booleans and as strings
    fn bool_claim(&self, name: &str) -> Option<bool> {
        match self.claim(name)? {
            Value::Bool(value) => Some(*value),
            Value::String(text) => {
                let text = text.trim();
                if text.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if text.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
