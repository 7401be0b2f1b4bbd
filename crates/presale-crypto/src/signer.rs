//! Ed25519 keys for operator grant issuers.
//!
//! Issuers sign 32-byte [`Digest`]s produced by a domain-separated
//! [`ContentHasher`](crate::ContentHasher), never raw payloads. Public keys
//! and signatures are carried as hex in config files and grant JSON.

use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use presale_types::Digest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// Issuer secret key.
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Issuer public key, as listed in `trusted_operators`.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SigningKey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()))
    }

    pub fn from_bytes(secret: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&secret))
    }

    /// Load a secret from 64 hex digits, `0x` optional.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        decode_hex::<32>(s)
            .map(Self::from_bytes)
            .map_err(CryptoError::InvalidKey)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    pub fn sign_digest(&self, digest: &Digest) -> Signature {
        Signature(self.0.sign(digest.as_bytes()))
    }
}

impl VerifyingKey {
    pub fn verify_digest(&self, digest: &Digest, signature: &Signature) -> Result<(), CryptoError> {
        self.0
            .verify(digest.as_bytes(), &signature.0)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse 64 hex digits, `0x` optional. Rejects points that are not valid
    /// curve points.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_hex::<32>(s).map_err(CryptoError::InvalidKey)?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl Signature {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_hex::<64>(s).map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&bytes)))
    }
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| e.to_string())?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| format!("expected {N} bytes, got {len}"))
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(issuer {})", &self.verifying_key().to_hex()[..16])
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..16])
    }
}

impl Serialize for VerifyingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}
