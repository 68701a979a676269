use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};

use crate::constants::SESSION_KEY_SIZE;
use crate::error::CryptoError;

pub type SessionKey = [u8; SESSION_KEY_SIZE];

pub fn generate_session_key() -> SessionKey {
    let mut key = [0u8; SESSION_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Parse a DER public key: X.509 SubjectPublicKeyInfo first, bare PKCS#1 second.
pub fn parse_public_key(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(der))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

// RSA-OAEP with SHA-1, the default OAEP parameters on the client side
pub fn rsa_encrypt(public_key_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = parse_public_key(public_key_der)?;
    key.encrypt(&mut rand::rngs::OsRng, Oaep::new::<sha1::Sha1>(), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Incremental CRC-32 over a file arriving in chunks.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32").field("value", &self.value()).finish()
    }
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn reset(&mut self) {
        self.hasher.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn test_session_keys_are_random() {
        assert_ne!(generate_session_key(), generate_session_key());
    }

    #[test]
    fn test_rsa_encrypt_roundtrip_spki() {
        let (private, public) = keypair();
        let der = public.to_public_key_der().unwrap();
        let key = generate_session_key();

        let encrypted = rsa_encrypt(der.as_bytes(), &key).unwrap();
        assert_eq!(encrypted.len(), 128);

        let decrypted = private.decrypt(Oaep::new::<sha1::Sha1>(), &encrypted).unwrap();
        assert_eq!(decrypted, key);
    }

    #[test]
    fn test_rsa_accepts_pkcs1() {
        let (_, public) = keypair();
        let der = public.to_pkcs1_der().unwrap();
        assert!(rsa_encrypt(der.as_bytes(), b"k").is_ok());
    }

    #[test]
    fn test_garbage_key_rejected() {
        assert!(matches!(
            rsa_encrypt(&[1, 2, 3, 4], b"k"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_incremental_crc_matches_oneshot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut crc = Crc32::new();
        for chunk in data.chunks(777) {
            crc.update(chunk);
        }
        assert_eq!(crc.value(), crc32(&data));

        crc.reset();
        assert_eq!(crc.value(), crc32(&[]));
    }

    #[test]
    fn test_crc32_check_value() {
        // IEEE CRC-32 of "123456789"
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
