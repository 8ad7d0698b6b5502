//! HMAC-SHA256 signing for status reports handed to settlement.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::core::SchedulerError;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies payloads with a shared provider key.
#[derive(Clone)]
pub struct ReportSigner {
    key_id: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for ReportSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ReportSigner {
    /// Create a signer from a key identifier and raw key material.
    pub fn new(key_id: impl Into<String>, key: impl AsRef<[u8]>) -> Result<Self, SchedulerError> {
        let mac = HmacSha256::new_from_slice(key.as_ref())
            .map_err(|e| SchedulerError::Config(format!("report signing key rejected: {e}")))?;
        Ok(Self {
            key_id: key_id.into(),
            mac,
        })
    }

    /// Identifier published alongside every signature.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Hex-encoded HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a hex signature produced by [`ReportSigner::sign`] in constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(given) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&given).is_ok()
    }
}

/// Hex SHA-256 digest of `input`.
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc4231_case_2() {
        let signer = ReportSigner::new("k", b"Jefe").unwrap();
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signer = ReportSigner::new("k", b"secret").unwrap();
        let sig = signer.sign(b"payload");
        assert!(signer.verify(b"payload", &sig));
        assert!(!signer.verify(b"payload2", &sig));
        assert!(!signer.verify(b"payload", "not-hex"));
        assert!(!signer.verify(b"payload", &sig[..32]));
    }

    #[test]
    fn long_keys_are_hashed_first() {
        let long = vec![0xaa_u8; 131];
        let signer = ReportSigner::new("k", &long).unwrap();
        assert_eq!(
            signer.sign(b"Test Using Larger Than Block-Size Key - Hash Key First"),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }
}
