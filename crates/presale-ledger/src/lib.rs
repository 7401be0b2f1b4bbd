//! Contribution ledger for the presale engine.
//!
//! Answers one question for finalization: who contributed how much to a
//! round. The persisted snapshot is authoritative when present. Rounds whose
//! snapshot was never written are recovered by scanning the sale contract's
//! contribution events in fixed-size block windows over a capped range, and
//! the recovered totals are written back.
//!
//! A scan that cannot see the whole range never turns into "zero
//! contributors": every-chunk failure is [`LedgerError::ScanFailed`], an
//! empty result is [`LedgerError::NoContributions`].

pub mod error;
pub mod ledger;
pub mod scan;
pub mod source;

pub use error::LedgerError;
pub use ledger::{ContributionLedger, LedgerSnapshot, SnapshotSource};
pub use scan::{EventScanner, ScanConfig, ScanOutcome, ScanReport};
pub use source::{ContributionEvent, ContributionEventSource, SourceError};
