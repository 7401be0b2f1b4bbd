use presale_types::Address;
use thiserror::Error;

/// Errors from tree construction, hashing, and signing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("cannot build an allocation tree with no leaves")]
    EmptyTree,

    #[error("beneficiary {0} appears more than once")]
    DuplicateBeneficiary(Address),

    #[error("the zero address cannot be a beneficiary")]
    ZeroBeneficiary,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid key: {0}")]
    InvalidKey(String),
}
