use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand_core::OsRng;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("hashing error")]
    Hash,
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
}

/// 32 random bytes, URL-safe base64. Used for bearer tokens and tickets.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| CryptoError::Hash)
}

/// False for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// HMAC-SHA256 signer for short, self-expiring values such as the OAuth
/// `state` parameter. Token layout: `base64(payload|exp).base64(sig)`.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(key: Vec<u8>) -> Result<Self, CryptoError> {
        if key.len() < 16 {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self { key })
    }

    pub fn sign(&self, payload: &str, ttl: Duration) -> Result<String, CryptoError> {
        let exp = Utc::now() + ttl;
        let body = format!("{}|{}", payload, exp.timestamp());
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKey)?;
        mac.update(body.as_bytes());
        let sig = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(body.as_bytes()),
            general_purpose::URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    /// Returns the signed payload if the signature holds and it hasn't expired.
    pub fn verify(&self, token: &str) -> Result<String, CryptoError> {
        let (body_b64, sig_b64) = token.split_once('.').ok_or(CryptoError::Invalid)?;
        let body = general_purpose::URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| CryptoError::Invalid)?;
        let sig = general_purpose::URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| CryptoError::Invalid)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKey)?;
        mac.update(&body);
        mac.verify_slice(&sig).map_err(|_| CryptoError::Signature)?;

        let body = String::from_utf8(body).map_err(|_| CryptoError::Invalid)?;
        let (payload, exp) = body.rsplit_once('|').ok_or(CryptoError::Invalid)?;
        let exp: i64 = exp.parse().map_err(|_| CryptoError::Invalid)?;
        if Utc::now().timestamp() > exp {
            return Err(CryptoError::Expired);
        }
        Ok(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new(b"0123456789abcdef0123456789abcdef".to_vec()).unwrap()
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn signed_value_verifies() {
        let s = signer();
        let token = s.sign("nonce-1", Duration::minutes(5)).unwrap();
        assert_eq!(s.verify(&token).unwrap(), "nonce-1");
    }

    #[test]
    fn tampered_value_is_rejected() {
        let s = signer();
        let token = s.sign("nonce-1", Duration::minutes(5)).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_body = general_purpose::URL_SAFE_NO_PAD.encode("nonce-2|9999999999");
        let forged = format!("{forged_body}.{sig}");
        assert!(matches!(s.verify(&forged), Err(CryptoError::Signature)));
    }

    #[test]
    fn expired_value_is_rejected() {
        let s = signer();
        let token = s.sign("nonce-1", Duration::seconds(-1)).unwrap();
        assert!(matches!(s.verify(&token), Err(CryptoError::Expired)));
    }

    #[test]
    fn short_keys_are_refused() {
        assert!(matches!(Signer::new(vec![1; 8]), Err(CryptoError::InvalidKey)));
    }
}
