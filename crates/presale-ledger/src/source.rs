use presale_types::{Address, Amount};
use serde::{Deserialize, Serialize};

/// One contribution event emitted by a sale contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionEvent {
    pub block: u64,
    pub contributor: Address,
    #[serde(with = "presale_types::amount")]
    pub amount: Amount,
}

/// Failure from the event source, e.g. an RPC timeout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SourceError(pub String);

/// Read boundary for the append-only contribution event log.
pub trait ContributionEventSource: Send + Sync {
    /// Highest block the source can serve.
    fn latest_block(&self) -> Result<u64, SourceError>;

    /// Events emitted by `sale_contract` in `from..=to`.
    fn contribution_events(
        &self,
        sale_contract: &Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<ContributionEvent>, SourceError>;
}
