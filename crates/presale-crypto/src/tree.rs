use std::collections::BTreeMap;

use presale_types::{Address, Allocation, Amount, Digest};

use crate::error::CryptoError;
use crate::hasher::hash_sorted_pair;
use crate::leaf::{AllocationLeaf, LeafBinding};

/// Merkle commitment over a round's allocations.
///
/// Leaves are ordered by hash and internal nodes use sorted-pair hashing, so
/// the root depends only on the set of allocations and never on input order.
/// An odd node at the end of a level is carried up unchanged. A round with a
/// single beneficiary is padded with [`AllocationLeaf::padding`] so every
/// tree has at least two leaves.
#[derive(Clone, Debug)]
pub struct AllocationTree {
    binding: LeafBinding,
    root: Digest,
    /// Level 0 = sorted leaf hashes, last level = `[root]`.
    levels: Vec<Vec<Digest>>,
    /// Beneficiary -> (position in level 0, allocated amount).
    positions: BTreeMap<Address, (usize, Amount)>,
    padded: bool,
}

impl AllocationTree {
    /// Build a tree over `allocations`, bound to `binding`.
    pub fn build(binding: LeafBinding, allocations: &[Allocation]) -> Result<Self, CryptoError> {
        if allocations.is_empty() {
            return Err(CryptoError::EmptyTree);
        }

        let mut hashed: Vec<(Digest, Option<(Address, Amount)>)> =
            Vec::with_capacity(allocations.len().max(2));
        let mut seen = BTreeMap::new();
        for allocation in allocations {
            if allocation.beneficiary.is_zero() {
                return Err(CryptoError::ZeroBeneficiary);
            }
            if seen.insert(allocation.beneficiary, ()).is_some() {
                return Err(CryptoError::DuplicateBeneficiary(allocation.beneficiary));
            }
            let leaf = AllocationLeaf::new(allocation.beneficiary, allocation.total);
            hashed.push((
                leaf.hash(&binding),
                Some((allocation.beneficiary, allocation.total)),
            ));
        }

        let padded = hashed.len() == 1;
        if padded {
            hashed.push((AllocationLeaf::padding().hash(&binding), None));
        }

        hashed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut positions = BTreeMap::new();
        for (index, (_, owner)) in hashed.iter().enumerate() {
            if let Some((address, amount)) = owner {
                positions.insert(*address, (index, *amount));
            }
        }

        let leaves: Vec<Digest> = hashed.into_iter().map(|(digest, _)| digest).collect();
        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| {
                    if pair.len() == 2 {
                        hash_sorted_pair(&pair[0], &pair[1])
                    } else {
                        // Odd node: carried up as-is
                        pair[0]
                    }
                })
                .collect();
            levels.push(next);
        }

        let root = levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .ok_or(CryptoError::EmptyTree)?;

        Ok(Self {
            binding,
            root,
            levels,
            positions,
            padded,
        })
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn binding(&self) -> &LeafBinding {
        &self.binding
    }

    /// Number of leaves, including the padding leaf if present.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Number of real beneficiaries.
    pub fn beneficiary_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_padded(&self) -> bool {
        self.padded
    }

    /// Allocated amount committed for `wallet`.
    pub fn amount_of(&self, wallet: &Address) -> Option<Amount> {
        self.positions.get(wallet).map(|(_, amount)| *amount)
    }

    /// Sibling hashes from the wallet's leaf up to the root.
    ///
    /// Returns `None` for a wallet that is not in the tree.
    pub fn proof(&self, wallet: &Address) -> Option<Vec<Digest>> {
        let (mut idx, _) = *self.positions.get(wallet)?;
        let mut siblings = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            if let Some(sibling) = level.get(idx ^ 1) {
                siblings.push(*sibling);
            }
            idx /= 2;
        }
        Some(siblings)
    }

    /// Every beneficiary with its amount and proof, ordered by address.
    pub fn proofs(&self) -> impl Iterator<Item = (Address, Amount, Vec<Digest>)> + '_ {
        self.positions.iter().filter_map(move |(address, (_, amount))| {
            self.proof(address).map(|siblings| (*address, *amount, siblings))
        })
    }

    /// The leaf hash the vault would compute for `wallet` claiming `amount`.
    pub fn leaf_hash(&self, wallet: Address, amount: Amount) -> Digest {
        AllocationLeaf::new(wallet, amount).hash(&self.binding)
    }
}

/// Recompute the root from a leaf and its sibling path.
pub fn verify_proof(root: &Digest, siblings: &[Digest], leaf: &Digest) -> bool {
    let computed = siblings
        .iter()
        .fold(*leaf, |acc, sibling| hash_sorted_pair(&acc, sibling));
    computed == *root
}

#[cfg(test)]
mod tests {
    use presale_types::{ChainId, RoundId, ScheduleSalt};
    use proptest::prelude::*;

    use super::*;

    fn binding() -> LeafBinding {
        LeafBinding::new(
            Address::from_bytes([0xee; 20]),
            ChainId(11155111),
            ScheduleSalt::from_bytes([7; 32]),
        )
    }

    fn addr(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    fn allocations(round: RoundId, n: u8) -> Vec<Allocation> {
        (1..=n)
            .map(|i| Allocation::new(round, addr(i), u128::from(i) * 1_000))
            .collect()
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(
            AllocationTree::build(binding(), &[]).unwrap_err(),
            CryptoError::EmptyTree
        );
    }

    #[test]
    fn duplicate_beneficiary_is_rejected() {
        let round = RoundId::new();
        let allocs = vec![
            Allocation::new(round, addr(1), 10),
            Allocation::new(round, addr(1), 20),
        ];
        assert_eq!(
            AllocationTree::build(binding(), &allocs).unwrap_err(),
            CryptoError::DuplicateBeneficiary(addr(1))
        );
    }

    #[test]
    fn zero_beneficiary_is_rejected() {
        let allocs = vec![Allocation::new(RoundId::new(), Address::ZERO, 10)];
        assert_eq!(
            AllocationTree::build(binding(), &allocs).unwrap_err(),
            CryptoError::ZeroBeneficiary
        );
    }

    #[test]
    fn single_beneficiary_is_padded() {
        let allocs = allocations(RoundId::new(), 1);
        let tree = AllocationTree::build(binding(), &allocs).unwrap();
        assert!(tree.is_padded());
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.beneficiary_count(), 1);

        let proof = tree.proof(&addr(1)).unwrap();
        assert_eq!(proof.len(), 1);
        let leaf = tree.leaf_hash(addr(1), 1_000);
        assert_ne!(leaf, tree.root());
        assert!(verify_proof(&tree.root(), &proof, &leaf));
        assert!(tree.proof(&Address::ZERO).is_none());
    }

    #[test]
    fn proof_verifies_for_all_leaves() {
        let allocs = allocations(RoundId::new(), 7);
        let tree = AllocationTree::build(binding(), &allocs).unwrap();
        for alloc in &allocs {
            let proof = tree.proof(&alloc.beneficiary).unwrap();
            let leaf = tree.leaf_hash(alloc.beneficiary, alloc.total);
            assert!(verify_proof(&tree.root(), &proof, &leaf));
        }
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let allocs = allocations(RoundId::new(), 4);
        let tree = AllocationTree::build(binding(), &allocs).unwrap();
        let proof = tree.proof(&addr(2)).unwrap();
        let forged = tree.leaf_hash(addr(2), 2_001);
        assert!(!verify_proof(&tree.root(), &proof, &forged));
    }

    #[test]
    fn unknown_wallet_has_no_proof() {
        let tree = AllocationTree::build(binding(), &allocations(RoundId::new(), 2)).unwrap();
        assert!(tree.proof(&addr(3)).is_none());
        assert_eq!(tree.amount_of(&addr(3)), None);
        assert_eq!(tree.amount_of(&addr(2)), Some(2_000));
    }

    #[test]
    fn root_is_independent_of_input_order() {
        let round = RoundId::new();
        let allocs = allocations(round, 9);
        let mut reversed = allocs.clone();
        reversed.reverse();
        let a = AllocationTree::build(binding(), &allocs).unwrap();
        let b = AllocationTree::build(binding(), &reversed).unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn binding_changes_root() {
        let allocs = allocations(RoundId::new(), 3);
        let a = AllocationTree::build(binding(), &allocs).unwrap();
        let mut other = binding();
        other.salt = ScheduleSalt::from_bytes([8; 32]);
        let b = AllocationTree::build(other, &allocs).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn proof_from_other_round_does_not_verify() {
        let allocs = allocations(RoundId::new(), 3);
        let a = AllocationTree::build(binding(), &allocs).unwrap();
        let mut other = binding();
        other.chain_id = ChainId(1);
        let b = AllocationTree::build(other, &allocs).unwrap();

        let proof = a.proof(&addr(1)).unwrap();
        let leaf = a.leaf_hash(addr(1), 1_000);
        assert!(!verify_proof(&b.root(), &proof, &leaf));
    }

    #[test]
    fn proofs_iterates_every_beneficiary() {
        let tree = AllocationTree::build(binding(), &allocations(RoundId::new(), 5)).unwrap();
        let listed: Vec<Address> = tree.proofs().map(|(a, _, _)| a).collect();
        assert_eq!(listed, (1..=5).map(addr).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn every_beneficiary_verifies(amounts in proptest::collection::vec(1u128..u128::MAX / 2, 1..40)) {
            let round = RoundId::new();
            let allocs: Vec<Allocation> = amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| {
                    let mut bytes = [0u8; 20];
                    bytes[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                    Allocation::new(round, Address::from_bytes(bytes), *amount)
                })
                .collect();
            let tree = AllocationTree::build(binding(), &allocs).unwrap();
            for alloc in &allocs {
                let proof = tree.proof(&alloc.beneficiary).unwrap();
                prop_assert!(verify_proof(&tree.root(), &proof, &tree.leaf_hash(alloc.beneficiary, alloc.total)));
                prop_assert!(!verify_proof(&tree.root(), &proof, &tree.leaf_hash(alloc.beneficiary, alloc.total + 1)));
            }
        }
    }
}
