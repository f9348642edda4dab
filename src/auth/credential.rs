//! Signed, time-limited bearer credential.
//!
//! Wire format: `base64url(claims-json) "." base64url(hmac-sha256)`, where
//! the MAC covers the encoded claims segment. Three logical claims: `sub`
//! (user id), `fam` (optional active family id), `exp` (unix seconds).
//!
//! The codec is a pure encode/verify/decode transform — no I/O, no
//! knowledge of membership. Whether the `fam` claim still corresponds to a
//! real membership is the session resolver's job, re-checked per request.

use crate::error::ApiError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id.
    pub sub: String,
    /// Active family id. Absent means "no family selected yet".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fam: Option<String>,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Stateless token mint + verifier.
pub struct CredentialCodec {
    key: Vec<u8>,
    ttl_secs: u64,
}

impl CredentialCodec {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    /// Mint a token for `user_id` with an optional active family. Every call
    /// produces a fresh expiry of "now + TTL" — switching family re-issues
    /// rather than mutating an existing token.
    pub fn issue(&self, user_id: &str, family_id: Option<&str>) -> String {
        let claims = Claims {
            sub: user_id.to_owned(),
            fam: family_id.map(ToOwned::to_owned),
            exp: epoch_secs() + self.ttl_secs as i64,
        };
        // Claims is a plain struct of owned strings; serialization cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(&payload);
        let sig = self.sign(encoded.as_bytes());
        format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(sig))
    }

    /// Verify and decode. Fails with `InvalidCredential` when the token is
    /// structurally malformed, the signature does not verify, or the expiry
    /// has passed.
    pub fn decode(&self, token: &str) -> Result<Claims, ApiError> {
        let (payload_b64, sig_b64) = token
            .split_once('.')
            .ok_or(ApiError::InvalidCredential)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| ApiError::InvalidCredential)?;

        // Constant-time verification via the Mac trait.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return Err(ApiError::InvalidCredential);
        };
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig)
            .map_err(|_| ApiError::InvalidCredential)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| ApiError::InvalidCredential)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| ApiError::InvalidCredential)?;

        if claims.exp <= epoch_secs() {
            return Err(ApiError::InvalidCredential);
        }
        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            // HMAC accepts keys of any length; unreachable in practice.
            return Vec::new();
        };
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CredentialCodec {
        CredentialCodec::new("test-signing-secret", 1800)
    }

    #[test]
    fn issue_decode_roundtrip_with_family() {
        let codec = codec();
        let token = codec.issue("user-1", Some("family-9"));
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.fam.as_deref(), Some("family-9"));
        assert!(claims.exp > epoch_secs());
    }

    #[test]
    fn issue_decode_roundtrip_without_family() {
        let codec = codec();
        let token = codec.issue("user-1", None);
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.fam.is_none());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let codec = codec();
        let token = codec.issue("user-1", Some("family-9"));
        let (payload, sig) = token.split_once('.').unwrap();

        // Re-encode a forged claim set under the original signature.
        let forged_claims = Claims {
            sub: "user-1".into(),
            fam: Some("family-of-someone-else".into()),
            exp: epoch_secs() + 3600,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        assert_ne!(forged_payload, payload);

        let forged = format!("{forged_payload}.{sig}");
        assert!(matches!(
            codec.decode(&forged),
            Err(ApiError::InvalidCredential)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = codec().issue("user-1", None);
        let other = CredentialCodec::new("a-different-secret", 1800);
        assert!(matches!(
            other.decode(&token),
            Err(ApiError::InvalidCredential)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = CredentialCodec::new("test-signing-secret", 0);
        let token = codec.issue("user-1", None);
        assert!(matches!(
            codec.decode(&token),
            Err(ApiError::InvalidCredential)
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let codec = codec();
        for token in ["", "no-dot-here", "only.two.dots", "!!!.###", "a."] {
            assert!(
                matches!(codec.decode(token), Err(ApiError::InvalidCredential)),
                "token {token:?} should be rejected"
            );
        }
    }

    #[test]
    fn reissue_produces_fresh_token() {
        let codec = codec();
        let first = codec.issue("user-1", Some("family-9"));
        let second = codec.issue("user-1", Some("family-2"));
        // Both decode independently; the first stays valid after the second
        // is issued (stateless tokens cannot be revoked).
        assert_eq!(
            codec.decode(&first).unwrap().fam.as_deref(),
            Some("family-9")
        );
        assert_eq!(
            codec.decode(&second).unwrap().fam.as_deref(),
            Some("family-2")
        );
    }
}
