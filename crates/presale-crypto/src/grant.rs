use presale_types::Capability;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::hasher::ContentHasher;
use crate::signer::{Signature, SigningKey, VerifyingKey};

/// A [`Capability`] signed by an issuer key.
///
/// The signature covers the domain-separated hash of the capability's JSON
/// form, so any change to operator, scope, permissions, or expiry breaks it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorGrant {
    pub capability: Capability,
    pub issuer: VerifyingKey,
    pub signature: Signature,
}

impl OperatorGrant {
    /// Sign `capability` with `issuer_key`.
    pub fn issue(capability: Capability, issuer_key: &SigningKey) -> Result<Self, CryptoError> {
        let digest = ContentHasher::GRANT.hash_json(&capability)?;
        Ok(Self {
            signature: issuer_key.sign_digest(&digest),
            issuer: issuer_key.verifying_key(),
            capability,
        })
    }

    /// Check the signature against the embedded issuer key. Whether that
    /// issuer is trusted is the caller's decision.
    pub fn verify_signature(&self) -> Result<(), CryptoError> {
        let digest = ContentHasher::GRANT.hash_json(&self.capability)?;
        self.issuer.verify_digest(&digest, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use presale_types::{Address, CapabilityScope, Permission};

    use super::*;

    fn capability() -> Capability {
        Capability::new(
            Address::from_bytes([0xad; 20]),
            CapabilityScope::Global,
            vec![Permission::Finalize, Permission::Settle],
        )
    }

    #[test]
    fn issued_grant_verifies() {
        let key = SigningKey::generate();
        let grant = OperatorGrant::issue(capability(), &key).unwrap();
        assert!(grant.verify_signature().is_ok());
        assert_eq!(grant.issuer, key.verifying_key());
    }

    #[test]
    fn widened_permissions_break_signature() {
        let key = SigningKey::generate();
        let mut grant = OperatorGrant::issue(capability(), &key).unwrap();
        grant.capability.permissions.push(Permission::Cancel);
        assert_eq!(grant.verify_signature(), Err(CryptoError::InvalidSignature));
    }

    #[test]
    fn swapped_issuer_breaks_signature() {
        let key = SigningKey::generate();
        let mut grant = OperatorGrant::issue(capability(), &key).unwrap();
        grant.issuer = SigningKey::generate().verifying_key();
        assert!(grant.verify_signature().is_err());
    }

    #[test]
    fn grant_json_roundtrip() {
        let grant = OperatorGrant::issue(capability(), &SigningKey::generate()).unwrap();
        let json = serde_json::to_string(&grant).unwrap();
        let parsed: OperatorGrant = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, grant);
        assert!(parsed.verify_signature().is_ok());
    }
}
