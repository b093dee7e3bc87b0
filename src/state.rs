use compact_str::CompactString;
use rand::Rng;
use subtle::ConstantTimeEq;

/// Default number of random bytes in an authorization state
pub const DEFAULT_STATE_SIZE: usize = 15;

/// Random value sent as the `state` parameter of an authorization request.
///
/// The caller keeps it (e.g. in a cookie) and compares it with the `state`
/// posted back to the redirect URI to reject forged responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizationState(CompactString);

impl AsRef<str> for AuthorizationState {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AuthorizationState {
    /// Generate a state from `N` random bytes, hex encoded
    pub fn generate<const N: usize>() -> Self {
        Self::generate_with_rng::<N>(&mut rand::rng())
    }

    /// Generate a state with a custom rng
    pub fn generate_with_rng<const N: usize>(rng: &mut impl Rng) -> Self {
        const { assert!(N > 0, "state must carry at least one random byte") };
        let mut bytes = [0u8; N];
        rng.fill(&mut bytes);
        Self(hex::encode(bytes).into())
    }

    /// Check a state received from the redirect against this one
    pub fn matches(&self, received: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(received.as_bytes()))
    }
}

impl Default for AuthorizationState {
    fn default() -> Self {
        Self::generate::<DEFAULT_STATE_SIZE>()
    }
}
