//! Ed25519 signer for the v3 ("Parker") response, grounded on
//! `original_source/wgkex/broker/signer.py`.
//!
//! The signing key loaded at startup may be hex- or base64-encoded, and may
//! be either a raw 32-byte Ed25519 seed or a 104-byte signify secret-key
//! blob, from which the seed sits at `bytes[40..72]` (Python's
//! `privkey_bytes[-64:-32]`). The *output* signature appended to a v3
//! response is the plain base64-encoded 64-byte Ed25519 signature, as the
//! source produces it — not a signify `"Ed" || fingerprint || sig` frame;
//! see DESIGN.md's "v3 signature framing" decision.

use ed25519_dalek::{Signer as _, SigningKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("signing key is neither valid hex nor valid base64")]
    InvalidEncoding,

    #[error("signing key must decode to 32 or 104 bytes, got {0}")]
    InvalidLength(usize),
}

pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Parses a signing key from its configured string form (`broker_signing_key`).
    pub fn from_config_str(key_config: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(key_config)
            .or_else(|_| base64::decode(key_config))
            .map_err(|_| SignerError::InvalidEncoding)?;

        let seed: [u8; 32] = match bytes.len() {
            32 => bytes.try_into().unwrap(),
            104 => bytes[40..72].try_into().unwrap(),
            other => return Err(SignerError::InvalidLength(other)),
        };

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Signs `data` and returns the base64-encoded signature, ready to be
    /// appended to a v3 response body.
    pub fn sign(&self, data: &[u8]) -> String {
        let signature = self.signing_key.sign(data);
        base64::encode(signature.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_seed_base64() -> String {
        base64::encode([7u8; 32])
    }

    #[test]
    fn parses_raw_32_byte_base64_key() {
        assert!(Ed25519Signer::from_config_str(&raw_seed_base64()).is_ok());
    }

    #[test]
    fn parses_raw_32_byte_hex_key() {
        let hex_key = hex::encode([7u8; 32]);
        assert!(Ed25519Signer::from_config_str(&hex_key).is_ok());
    }

    #[test]
    fn parses_signify_104_byte_key() {
        let blob = base64::encode([9u8; 104]);
        assert!(Ed25519Signer::from_config_str(&blob).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        let blob = base64::encode([9u8; 16]);
        assert!(matches!(
            Ed25519Signer::from_config_str(&blob),
            Err(SignerError::InvalidLength(16))
        ));
    }

    #[test]
    fn signature_is_deterministic_and_base64() {
        let signer = Ed25519Signer::from_config_str(&raw_seed_base64()).unwrap();
        let a = signer.sign(b"hello\n");
        let b = signer.sign(b"hello\n");
        assert_eq!(a, b);
        assert!(base64::decode(&a).is_ok());
    }
}
