use presale_types::{Address, Amount, ChainId, Digest, ScheduleSalt};
use serde::{Deserialize, Serialize};

use crate::hasher::ContentHasher;

/// Context every leaf of a round is bound to.
///
/// A proof only verifies for the vault, chain, and salt it was built
/// against, which rules out replay across rounds or vaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafBinding {
    pub vesting_vault: Address,
    pub chain_id: ChainId,
    pub salt: ScheduleSalt,
}

impl LeafBinding {
    pub fn new(vesting_vault: Address, chain_id: ChainId, salt: ScheduleSalt) -> Self {
        Self {
            vesting_vault,
            chain_id,
            salt,
        }
    }
}

/// A (beneficiary, total allocation) pair before hashing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLeaf {
    pub beneficiary: Address,
    pub amount: Amount,
}

impl AllocationLeaf {
    /// Byte length of [`encode`](Self::encode).
    pub const ENCODED_LEN: usize = 20 + 8 + 32 + 20 + 16;

    pub fn new(beneficiary: Address, amount: Amount) -> Self {
        Self {
            beneficiary,
            amount,
        }
    }

    /// Padding leaf used when a round has a single beneficiary. It names the
    /// zero address, which can never claim.
    pub fn padding() -> Self {
        Self::new(Address::ZERO, 0)
    }

    /// Fixed-width big-endian encoding:
    /// `vault(20) || chain_id(8) || salt(32) || beneficiary(20) || amount(16)`.
    pub fn encode(&self, binding: &LeafBinding) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..20].copy_from_slice(binding.vesting_vault.as_bytes());
        out[20..28].copy_from_slice(&binding.chain_id.0.to_be_bytes());
        out[28..60].copy_from_slice(binding.salt.as_bytes());
        out[60..80].copy_from_slice(self.beneficiary.as_bytes());
        out[80..].copy_from_slice(&self.amount.to_be_bytes());
        out
    }

    pub fn hash(&self, binding: &LeafBinding) -> Digest {
        ContentHasher::LEAF.hash(&self.encode(binding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> LeafBinding {
        LeafBinding::new(
            Address::from_bytes([0xaa; 20]),
            ChainId(1),
            ScheduleSalt::from_bytes([0x55; 32]),
        )
    }

    #[test]
    fn encoding_layout() {
        let leaf = AllocationLeaf::new(Address::from_bytes([0xbb; 20]), 0x0102);
        let bytes = leaf.encode(&binding());
        assert_eq!(&bytes[..20], &[0xaa; 20]);
        assert_eq!(&bytes[20..28], &1u64.to_be_bytes());
        assert_eq!(&bytes[28..60], &[0x55; 32]);
        assert_eq!(&bytes[60..80], &[0xbb; 20]);
        assert_eq!(bytes[94], 0x01);
        assert_eq!(bytes[95], 0x02);
    }

    #[test]
    fn binding_changes_hash() {
        let leaf = AllocationLeaf::new(Address::from_bytes([0xbb; 20]), 10);
        let base = leaf.hash(&binding());

        let mut other_chain = binding();
        other_chain.chain_id = ChainId(56);
        assert_ne!(base, leaf.hash(&other_chain));

        let mut other_vault = binding();
        other_vault.vesting_vault = Address::from_bytes([0xcc; 20]);
        assert_ne!(base, leaf.hash(&other_vault));

        let mut other_salt = binding();
        other_salt.salt = ScheduleSalt::from_bytes([0x56; 32]);
        assert_ne!(base, leaf.hash(&other_salt));
    }

    #[test]
    fn amount_changes_hash() {
        let b = binding();
        let beneficiary = Address::from_bytes([0xbb; 20]);
        assert_ne!(
            AllocationLeaf::new(beneficiary, 10).hash(&b),
            AllocationLeaf::new(beneficiary, 11).hash(&b)
        );
    }
}
