#![allow(dead_code)]

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use kanau_apple_auth::OpenIdProvider;
use serde_json::{Value, json};
use wiremock::MockServer;

pub const FAKE_KEY: &str = include_str!("../fixtures/fake-key.p8");
pub const OTHER_KEY: &str = include_str!("../fixtures/other-key.p8");
pub const FAKE_KEY_X: &str = "YlNIeWELIFdXV40QrPtu0qzm5pjzGaw8IFodHF2QHTQ";
pub const FAKE_KEY_Y: &str = "WPe1ibAktiuttAJ2MoapRxumpqCMqVFzSKmRibrmxqY";

pub const KID: &str = "fake-kid";
pub const TEAM_ID: &str = "123456789X";
pub const CLIENT_ID: &str = "com.golap.app";
pub const KEY_ID: &str = "X987654321";
pub const ISSUER: &str = "https://appleid.apple.com";

/// Apple endpoints, served by the mock server
pub fn provider(server: &MockServer) -> OpenIdProvider {
    OpenIdProvider {
        authorization_url: format!("{}/auth/authorize", server.uri()).into(),
        token_url: format!("{}/auth/token", server.uri()).into(),
        open_id_issuer: ISSUER.into(),
        open_id_jwks_url: format!("{}/auth/keys", server.uri()).into(),
    }
}

pub fn jwks() -> Value {
    json!({
        "keys": [{
            "kty": "EC",
            "kid": KID,
            "use": "sig",
            "alg": "ES256",
            "crv": "P-256",
            "x": FAKE_KEY_X,
            "y": FAKE_KEY_Y,
        }]
    })
}

pub fn id_token_claims() -> Value {
    let now = jsonwebtoken::get_current_timestamp();
    json!({
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "sub": "001234.5678abcd",
        "iat": now,
        "exp": now + 600,
        "email": "someone@privaterelay.appleid.com",
        "email_verified": "true",
        "real_user_status": 2,
        "nonce_supported": true,
    })
}

pub fn sign_id_token(pem: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid.to_owned());
    let key = EncodingKey::from_ec_pem(pem.as_bytes()).expect("fixture key");
    jsonwebtoken::encode(&header, claims, &key).expect("fixture token")
}

/// Replace the signature with the one of another token
pub fn tamper_signature(token: &str, other: &str) -> String {
    let (signed, _) = token.rsplit_once('.').expect("three segments");
    let (_, signature) = other.rsplit_once('.').expect("three segments");
    format!("{signed}.{signature}")
}
