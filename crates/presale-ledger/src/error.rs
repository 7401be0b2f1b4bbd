use presale_store::StoreError;
use presale_types::RoundId;

/// Errors produced while assembling a contribution snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The event source could not report its head block.
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("contribution scan failed: all {chunks} chunks failed, last error: {last_error}")]
    ScanFailed { chunks: usize, last_error: String },

    #[error("contribution scan incomplete: {failed} of {chunks} chunks failed")]
    ScanIncomplete { failed: usize, chunks: usize },

    #[error("no contributions found for round {0}")]
    NoContributions(RoundId),

    #[error("contribution total overflowed for {0}")]
    Overflow(String),

    #[error("invalid scan config: {0}")]
    InvalidConfig(String),
}
