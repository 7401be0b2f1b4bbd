use presale_store::{ContributionStore, RoundStore};
use presale_types::{Amount, ContributorTotal, RoundId};
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::scan::{EventScanner, ScanConfig, ScanReport};
use crate::source::ContributionEventSource;

/// Where a snapshot came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Read from the store.
    Store,
    /// Recovered from the event log. Written back only when the scan
    /// covered every chunk.
    EventLog(ScanReport),
}

/// Confirmed contributions for one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub round: RoundId,
    /// Per-contributor totals, ordered by address.
    pub totals: Vec<ContributorTotal>,
    pub total_raised: Amount,
    pub source: SnapshotSource,
}

impl LedgerSnapshot {
    pub fn contributor_count(&self) -> usize {
        self.totals.len()
    }

    /// `false` when an event-log scan skipped chunks, so the totals may
    /// undercount.
    pub fn is_complete(&self) -> bool {
        match &self.source {
            SnapshotSource::Store => true,
            SnapshotSource::EventLog(report) => report.is_complete(),
        }
    }

    /// Refuse a snapshot that may undercount. Anything that commits the
    /// round's outcome must go through this.
    pub fn require_complete(self) -> Result<Self, LedgerError> {
        match &self.source {
            SnapshotSource::EventLog(report) if !report.is_complete() => {
                Err(LedgerError::ScanIncomplete {
                    failed: report.failed_ranges.len(),
                    chunks: report.chunks,
                })
            }
            _ => Ok(self),
        }
    }
}

/// Read-only view over a round's contributions with event-log fallback.
pub struct ContributionLedger<'a, St: ?Sized, Src: ?Sized> {
    store: &'a St,
    source: &'a Src,
    config: ScanConfig,
}

impl<'a, St, Src> ContributionLedger<'a, St, Src>
where
    St: RoundStore + ContributionStore + ?Sized,
    Src: ContributionEventSource + ?Sized,
{
    pub fn new(store: &'a St, source: &'a Src, config: ScanConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// Confirmed per-contributor totals for `round`.
    ///
    /// Uses the persisted snapshot when one exists. Otherwise scans the sale
    /// contract's events. A complete scan is written back and its sum becomes
    /// the round's total raised. A scan that skipped chunks is returned as
    /// is and leaves the store untouched.
    pub fn snapshot(&self, round: &RoundId) -> Result<LedgerSnapshot, LedgerError> {
        let record = self
            .store
            .get_round(round)?
            .ok_or(LedgerError::RoundNotFound(*round))?;

        if let Some(totals) = self.store.contribution_snapshot(round)? {
            if !totals.is_empty() {
                let total_raised = sum_totals(&totals)?;
                if total_raised != record.total_raised {
                    warn!(
                        round = %round,
                        snapshot = total_raised,
                        recorded = record.total_raised,
                        "snapshot total differs from recorded total raised"
                    );
                }
                return Ok(LedgerSnapshot {
                    round: *round,
                    totals,
                    total_raised,
                    source: SnapshotSource::Store,
                });
            }
        }

        info!(round = %round, "no contribution snapshot, scanning event log");
        let outcome =
            EventScanner::new(self.source, self.config.clone()).scan(round, &record.terms.sale_contract)?;
        let total_raised = if outcome.report.is_complete() {
            self.store.write_snapshot(round, outcome.totals.clone())?
        } else {
            warn!(
                round = %round,
                failed = outcome.report.failed_ranges.len(),
                chunks = outcome.report.chunks,
                "partial contribution scan, not writing it back"
            );
            sum_totals(&outcome.totals)?
        };

        Ok(LedgerSnapshot {
            round: *round,
            totals: outcome.totals,
            total_raised,
            source: SnapshotSource::EventLog(outcome.report),
        })
    }
}

fn sum_totals(totals: &[ContributorTotal]) -> Result<Amount, LedgerError> {
    totals.iter().try_fold(0u128, |acc, t| {
        acc.checked_add(t.amount)
            .ok_or_else(|| LedgerError::Overflow("snapshot total".into()))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use presale_store::InMemoryLaunchStore;
    use presale_types::{
        Address, ChainId, Contribution, RaiseAsset, Round, RoundTerms, ScheduleSalt,
    };

    use super::*;
    use crate::source::{ContributionEvent, SourceError};

    fn addr(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    struct StaticLog {
        events: Vec<ContributionEvent>,
        up: bool,
    }

    impl ContributionEventSource for StaticLog {
        fn latest_block(&self) -> Result<u64, SourceError> {
            if self.up {
                Ok(100)
            } else {
                Err(SourceError("connection refused".into()))
            }
        }

        fn contribution_events(
            &self,
            sale_contract: &Address,
            from: u64,
            to: u64,
        ) -> Result<Vec<ContributionEvent>, SourceError> {
            assert_eq!(*sale_contract, addr(0xa1));
            Ok(self
                .events
                .iter()
                .filter(|e| e.block >= from && e.block <= to)
                .cloned()
                .collect())
        }
    }

    fn store_with_round() -> (InMemoryLaunchStore, RoundId) {
        let store = InMemoryLaunchStore::new();
        let round = Round::new(
            RoundId::new(),
            RoundTerms {
                chain_id: ChainId(1),
                raise_asset: RaiseAsset::Native,
                token: addr(0xa0),
                token_decimals: 18,
                sale_contract: addr(0xa1),
                vesting_vault: addr(0xa2),
                owner: addr(0xa3),
                start_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                end_at: Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
                soft_cap: 100,
                hard_cap: None,
                price_per_token: 10,
                tokens_for_sale: 1_000_000,
                total_supply: None,
                liquidity_bps: 5_000,
                lock_duration_secs: 60,
                fee_bps: 0,
                team_allocation: None,
                team_wallets: vec![],
                schedule_salt: ScheduleSalt::from_bytes([1; 32]),
            },
        );
        let id = round.id;
        store.insert_round(round).unwrap();
        (store, id)
    }

    #[test]
    fn persisted_snapshot_wins() {
        let (store, id) = store_with_round();
        let c = Contribution::new(id, addr(1), 60, Utc::now());
        let cid = c.id;
        store.insert_contribution(c).unwrap();
        store.confirm_contribution(&cid).unwrap();

        let log = StaticLog {
            events: vec![],
            up: false,
        };
        let ledger = ContributionLedger::new(&store, &log, ScanConfig::default());
        let snapshot = ledger.snapshot(&id).unwrap();
        assert_eq!(snapshot.source, SnapshotSource::Store);
        assert_eq!(snapshot.total_raised, 60);
        assert_eq!(snapshot.contributor_count(), 1);
    }

    #[test]
    fn falls_back_to_scan_and_writes_back() {
        let (store, id) = store_with_round();
        let log = StaticLog {
            events: vec![
                ContributionEvent {
                    block: 10,
                    contributor: addr(2),
                    amount: 30,
                },
                ContributionEvent {
                    block: 90,
                    contributor: addr(2),
                    amount: 20,
                },
            ],
            up: true,
        };
        let ledger = ContributionLedger::new(&store, &log, ScanConfig::default());
        let snapshot = ledger.snapshot(&id).unwrap();

        assert!(snapshot.is_complete());
        assert!(matches!(snapshot.source, SnapshotSource::EventLog(_)));
        assert_eq!(snapshot.totals, vec![ContributorTotal::new(addr(2), 50)]);
        assert_eq!(store.get_round(&id).unwrap().unwrap().total_raised, 50);
        assert_eq!(
            store.contribution_snapshot(&id).unwrap(),
            Some(vec![ContributorTotal::new(addr(2), 50)])
        );
    }

    /// Serves every event except those in a block range that always errors.
    struct GappyLog {
        events: Vec<ContributionEvent>,
        gap: (u64, u64),
    }

    impl ContributionEventSource for GappyLog {
        fn latest_block(&self) -> Result<u64, SourceError> {
            Ok(100)
        }

        fn contribution_events(
            &self,
            _sale_contract: &Address,
            from: u64,
            to: u64,
        ) -> Result<Vec<ContributionEvent>, SourceError> {
            if from <= self.gap.1 && to >= self.gap.0 {
                return Err(SourceError("range unavailable".into()));
            }
            Ok(self
                .events
                .iter()
                .filter(|e| e.block >= from && e.block <= to)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn partial_scan_is_not_written_back() {
        let (store, id) = store_with_round();
        let log = GappyLog {
            events: vec![
                ContributionEvent {
                    block: 10,
                    contributor: addr(2),
                    amount: 30,
                },
                ContributionEvent {
                    block: 90,
                    contributor: addr(3),
                    amount: 20,
                },
            ],
            gap: (50, 99),
        };
        let config = ScanConfig {
            chunk_size: 50,
            ..ScanConfig::default()
        };
        let snapshot = ContributionLedger::new(&store, &log, config)
            .snapshot(&id)
            .unwrap();

        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.total_raised, 30);
        assert_eq!(store.get_round(&id).unwrap().unwrap().total_raised, 0);
        assert_eq!(store.contribution_snapshot(&id).unwrap(), None);
        assert_eq!(
            snapshot.require_complete().unwrap_err(),
            LedgerError::ScanIncomplete {
                failed: 1,
                chunks: 3
            }
        );
    }

    #[test]
    fn unavailable_source_is_distinct_error() {
        let (store, id) = store_with_round();
        let log = StaticLog {
            events: vec![],
            up: false,
        };
        let err = ContributionLedger::new(&store, &log, ScanConfig::default())
            .snapshot(&id)
            .unwrap_err();
        assert!(matches!(err, LedgerError::SourceUnavailable(_)));
    }

    #[test]
    fn unknown_round() {
        let store = InMemoryLaunchStore::new();
        let log = StaticLog {
            events: vec![],
            up: true,
        };
        let id = RoundId::new();
        let err = ContributionLedger::new(&store, &log, ScanConfig::default())
            .snapshot(&id)
            .unwrap_err();
        assert_eq!(err, LedgerError::RoundNotFound(id));
    }
}
