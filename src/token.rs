use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use std::fmt;

use crate::error::{KeystoneError, Result};
use crate::time::Timestamp;

/// Claims consulted client-side. Everything else in the payload is ignored.
#[derive(Debug, Clone, Deserialize)]
struct Claims {
    exp: Timestamp,
}

fn expiry_validation() -> Validation {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);
    validation
}

/// Decode the `exp` claim of a JWT without verifying its signature.
///
/// Signature checks are the server's job; the client only needs the
/// expiry for local bookkeeping.
pub fn decode_expiry(token: &str) -> Result<Timestamp> {
    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &expiry_validation())
        .map_err(|e| KeystoneError::Decode(e.to_string()))?;
    Ok(data.claims.exp)
}

/// TokenPair holds the access and refresh JWTs of one authenticated
/// session, together with their expiries decoded once at assignment.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    access: String,
    refresh: String,
    access_expiry: Timestamp,
    refresh_expiry: Timestamp,
}

impl TokenPair {
    /// Create a new TokenPair, decoding the expiry of both tokens
    pub fn new(access: String, refresh: String) -> Result<Self> {
        let access_expiry = decode_expiry(&access)?;
        let refresh_expiry = decode_expiry(&refresh)?;
        Ok(TokenPair {
            access,
            refresh,
            access_expiry,
            refresh_expiry,
        })
    }

    /// The access token string
    pub fn access(&self) -> &str {
        &self.access
    }

    /// The refresh token string
    pub fn refresh(&self) -> &str {
        &self.refresh
    }

    pub fn access_expiry(&self) -> Timestamp {
        self.access_expiry
    }

    pub fn refresh_expiry(&self) -> Timestamp {
        self.refresh_expiry
    }

    /// Return a pair carrying `refresh` as its refresh token. The access
    /// token and its expiry are left untouched.
    pub fn with_refresh(&self, refresh: String) -> Result<Self> {
        let refresh_expiry = decode_expiry(&refresh)?;
        Ok(TokenPair {
            access: self.access.clone(),
            refresh,
            access_expiry: self.access_expiry,
            refresh_expiry,
        })
    }
}

// Token strings are credentials; keep them out of debug output
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use jsonwebtoken::{EncodingKey, Header};

    /// Sign `claims` with a key the client never sees
    pub(crate) fn make_jwt(claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .expect("Failed to encode token")
    }

    pub(crate) fn jwt_expiring_at(exp: i64) -> String {
        make_jwt(serde_json::json!({"token_type": "access", "exp": exp, "user_id": 1}))
    }

    #[test]
    fn test_token_pair_creation() {
        let pair = TokenPair::new(jwt_expiring_at(1_700_000_000), jwt_expiring_at(1_800_000_000))
            .unwrap();

        assert_eq!(pair.access_expiry().unix(), 1_700_000_000);
        assert_eq!(pair.refresh_expiry().unix(), 1_800_000_000);
    }

    #[test]
    fn test_with_refresh_keeps_access() {
        let access = jwt_expiring_at(1_700_000_000);
        let pair = TokenPair::new(access.clone(), jwt_expiring_at(1_800_000_000)).unwrap();

        let renewed = pair.with_refresh(jwt_expiring_at(1_900_000_000)).unwrap();
        assert_eq!(renewed.access(), access);
        assert_eq!(renewed.access_expiry(), pair.access_expiry());
        assert_eq!(renewed.refresh_expiry().unix(), 1_900_000_000);
    }

    #[test]
    fn test_with_refresh_rejects_garbage() {
        let pair = TokenPair::new(jwt_expiring_at(1_700_000_000), jwt_expiring_at(1_800_000_000))
            .unwrap();
        assert!(matches!(
            pair.with_refresh("garbage".to_string()),
            Err(KeystoneError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_missing_exp() {
        let token = make_jwt(serde_json::json!({"user_id": 1}));
        assert!(matches!(decode_expiry(&token), Err(KeystoneError::Decode(_))));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_expiry("").is_err());
        assert!(decode_expiry("only.two").is_err());
        assert!(decode_expiry("a.b.c.d").is_err());
        assert!(matches!(
            decode_expiry("header.!!!.sig"),
            Err(KeystoneError::Decode(_))
        ));

        let token = jwt_expiring_at(1_700_000_000);
        let header = token.split('.').next().unwrap();
        let not_json = format!("{}.bm90IGpzb24.c2ln", header);
        assert!(matches!(decode_expiry(&not_json), Err(KeystoneError::Decode(_))));
    }

    #[test]
    fn test_decode_ignores_signature_and_claim_checks() {
        // Wrong signature, foreign audience and a long expired `exp`
        let token = make_jwt(serde_json::json!({"exp": 1_000, "aud": "someone-else"}));
        let (unsigned, _) = token.rsplit_once('.').unwrap();
        let resigned = format!("{}.c2lnbmF0dXJl", unsigned);

        assert_eq!(decode_expiry(&token).unwrap().unix(), 1_000);
        assert_eq!(decode_expiry(&resigned).unwrap().unix(), 1_000);
    }

    #[test]
    fn test_decode_non_numeric_exp() {
        let token = make_jwt(serde_json::json!({"exp": "tomorrow"}));
        assert!(matches!(decode_expiry(&token), Err(KeystoneError::Decode(_))));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let access = jwt_expiring_at(1_700_000_000);
        let pair = TokenPair::new(access.clone(), jwt_expiring_at(1_800_000_000)).unwrap();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains(&access));
    }
}
