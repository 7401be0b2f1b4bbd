//! Cryptographic primitives for the presale engine.
//!
//! Provides domain-separated BLAKE3 hashing, the allocation leaf encoding,
//! a sorted-pair Merkle tree with per-beneficiary proofs, and Ed25519
//! signing for operator grants.
//!
//! All crypto operations wrap established libraries. No custom cryptography.

pub mod error;
pub mod grant;
pub mod hasher;
pub mod leaf;
pub mod signer;
pub mod tree;

pub use error::CryptoError;
pub use grant::OperatorGrant;
pub use hasher::ContentHasher;
pub use leaf::{AllocationLeaf, LeafBinding};
pub use signer::{Signature, SigningKey, VerifyingKey};
pub use tree::{verify_proof, AllocationTree};
