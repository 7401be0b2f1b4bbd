use std::collections::BTreeMap;

use presale_types::{Address, Amount, ContributorTotal, RoundId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::source::{ContributionEventSource, SourceError};

/// Bounds for the event-log fallback scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Blocks per request window.
    pub chunk_size: u64,
    /// How far back from the head block the scan reaches.
    pub max_lookback: u64,
    /// Extra attempts per chunk before it is skipped.
    pub chunk_retries: u32,
    /// Treat any skipped chunk as a hard failure.
    pub require_full_scan: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2_000,
            max_lookback: 200_000,
            chunk_retries: 2,
            require_full_scan: false,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.chunk_size == 0 {
            return Err(LedgerError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.max_lookback == 0 {
            return Err(LedgerError::InvalidConfig("max_lookback must be > 0".into()));
        }
        Ok(())
    }
}

/// What a scan covered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub from_block: u64,
    pub to_block: u64,
    pub chunks: usize,
    /// Inclusive block ranges that failed every attempt.
    pub failed_ranges: Vec<(u64, u64)>,
    pub events_seen: usize,
}

impl ScanReport {
    pub fn is_complete(&self) -> bool {
        self.failed_ranges.is_empty()
    }
}

/// Aggregated totals plus the report of how they were obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Per-contributor totals, ordered by address.
    pub totals: Vec<ContributorTotal>,
    pub report: ScanReport,
}

/// Bounded, synchronous scan over a sale contract's contribution events.
pub struct EventScanner<'a, S: ContributionEventSource + ?Sized> {
    source: &'a S,
    config: ScanConfig,
}

impl<'a, S: ContributionEventSource + ?Sized> EventScanner<'a, S> {
    pub fn new(source: &'a S, config: ScanConfig) -> Self {
        Self { source, config }
    }

    /// Scan the last `max_lookback` blocks for `sale_contract` events.
    ///
    /// Each chunk is tried `1 + chunk_retries` times. A chunk that still
    /// fails is logged and skipped.
    pub fn scan(&self, round: &RoundId, sale_contract: &Address) -> Result<ScanOutcome, LedgerError> {
        self.config.validate()?;

        let head = self
            .source
            .latest_block()
            .map_err(|e| LedgerError::SourceUnavailable(e.0))?;
        let from = head.saturating_sub(self.config.max_lookback.saturating_sub(1));

        let mut report = ScanReport {
            from_block: from,
            to_block: head,
            ..ScanReport::default()
        };
        let mut totals: BTreeMap<Address, Amount> = BTreeMap::new();
        let mut last_error: Option<SourceError> = None;

        let mut start = from;
        loop {
            let end = start
                .saturating_add(self.config.chunk_size - 1)
                .min(head);
            report.chunks += 1;

            match self.fetch_chunk(sale_contract, start, end) {
                Ok(events) => {
                    report.events_seen += events.len();
                    for event in events {
                        let entry = totals.entry(event.contributor).or_default();
                        *entry = entry
                            .checked_add(event.amount)
                            .ok_or_else(|| LedgerError::Overflow(event.contributor.to_hex()))?;
                    }
                }
                Err(e) => {
                    warn!(
                        round = %round,
                        from = start,
                        to = end,
                        error = %e,
                        "contribution scan chunk failed, skipping"
                    );
                    report.failed_ranges.push((start, end));
                    last_error = Some(e);
                }
            }

            if end >= head {
                break;
            }
            start = end + 1;
        }

        let failed = report.failed_ranges.len();
        if failed == report.chunks {
            return Err(LedgerError::ScanFailed {
                chunks: report.chunks,
                last_error: last_error.map(|e| e.0).unwrap_or_default(),
            });
        }
        if failed > 0 && (self.config.require_full_scan || totals.is_empty()) {
            return Err(LedgerError::ScanIncomplete {
                failed,
                chunks: report.chunks,
            });
        }
        if totals.is_empty() {
            return Err(LedgerError::NoContributions(*round));
        }

        debug!(
            round = %round,
            chunks = report.chunks,
            failed,
            contributors = totals.len(),
            "contribution scan finished"
        );

        Ok(ScanOutcome {
            totals: totals
                .into_iter()
                .map(|(address, amount)| ContributorTotal::new(address, amount))
                .collect(),
            report,
        })
    }

    fn fetch_chunk(
        &self,
        sale_contract: &Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<crate::source::ContributionEvent>, SourceError> {
        let mut attempt = 0;
        loop {
            match self.source.contribution_events(sale_contract, from, to) {
                Ok(events) => return Ok(events),
                Err(e) if attempt < self.config.chunk_retries => {
                    debug!(from, to, attempt, error = %e, "retrying scan chunk");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
