use presale_ledger::ContributionEventSource;
use presale_store::LaunchStore;
use presale_types::{Address, Amount, RefundRecord, RoundId, TxRef};
use serde::Serialize;
use tracing::{info, warn};

use crate::chain::Chain;
use crate::engine::LaunchEngine;
use crate::error::{EngineResult, IdempotencyViolation, PreconditionError};

/// A completed refund payout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefundReceipt {
    pub round: RoundId,
    pub contributor: Address,
    #[serde(with = "presale_types::amount")]
    pub amount: Amount,
    pub tx: TxRef,
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    /// Pay a contributor back after a failed or cancelled round.
    ///
    /// Called by the contributor. Pays exactly the recorded amount once; a
    /// second call fails with nothing to refund. The record is reserved
    /// before the payout and released again if the chain call fails.
    pub fn refund(&self, id: &RoundId, contributor: &Address) -> EngineResult<RefundReceipt> {
        let round = self.round(id)?;
        if !round.status.is_refundable() {
            return Err(PreconditionError::NotRefundable {
                round: *id,
                status: round.status,
            }
            .into());
        }

        let nothing = || IdempotencyViolation::NothingToRefund {
            round: *id,
            contributor: *contributor,
        };
        let record = self.store.refund(id, contributor)?.ok_or_else(nothing)?;
        if record.is_paid() || record.amount == 0 {
            return Err(nothing().into());
        }

        let reserved = self.store.reserve_refund(id, contributor)?;
        let tx = match self
            .chain
            .refund(&round.terms.sale_contract, contributor, reserved.amount)
        {
            Ok(tx) => tx,
            Err(err) => {
                warn!(round = %id, contributor = %contributor, error = %err, "refund payout failed, releasing");
                self.store.release_refund(id, contributor)?;
                return Err(err.during("refund"));
            }
        };
        let completed = self.store.complete_refund(id, contributor, tx.clone())?;
        info!(
            round = %id,
            contributor = %contributor,
            amount = completed.paid,
            tx = %tx,
            "refund paid"
        );

        Ok(RefundReceipt {
            round: *id,
            contributor: *contributor,
            amount: completed.paid,
            tx,
        })
    }

    /// Refund records for a round.
    pub fn refunds(&self, id: &RoundId) -> EngineResult<Vec<RefundRecord>> {
        Ok(self.store.refunds_for_round(id)?)
    }

    /// One pending refund per contributor with a confirmed total. Records
    /// that already exist are left alone, so this is safe to repeat.
    pub(crate) fn open_refunds(&self, id: &RoundId) -> EngineResult<usize> {
        let totals = self.store.contribution_snapshot(id)?.unwrap_or_default();
        let records = totals
            .into_iter()
            .filter(|t| t.amount > 0)
            .map(|t| RefundRecord::pending(*id, t.address, t.amount))
            .collect();
        Ok(self.store.open_refunds(records)?)
    }
}

#[cfg(test)]
mod tests {
    use presale_store::RefundStore;

    use super::*;
    use crate::chain::ChainError;
    use crate::engine::testkit::*;
    use crate::error::EngineError;
    use crate::machine::FinalizeOutcome;

    fn failed_round() -> Harness {
        let h = Harness::new(terms());
        h.run_sale(&[(addr(1), 3 * ETH / 10)]);
        let outcome = h.engine.finalize(&h.round, &h.admin()).unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Failed(_)));
        h
    }

    #[test]
    fn refund_pays_exactly_once() {
        let h = failed_round();
        let before = h.engine.chain().asset_balance(&addr(1));

        let receipt = h.engine.refund(&h.round, &addr(1)).unwrap();
        assert_eq!(receipt.amount, 3 * ETH / 10);
        assert_eq!(h.engine.chain().asset_balance(&addr(1)), before + 3 * ETH / 10);

        let err = h.engine.refund(&h.round, &addr(1)).unwrap_err();
        assert_eq!(
            err,
            EngineError::Idempotency(IdempotencyViolation::NothingToRefund {
                round: h.round,
                contributor: addr(1)
            })
        );
        assert_eq!(h.engine.chain().asset_balance(&addr(1)), before + 3 * ETH / 10);

        let record = h.engine.store().refund(&h.round, &addr(1)).unwrap().unwrap();
        assert_eq!(record.amount, 0);
        assert_eq!(record.paid, 3 * ETH / 10);
    }

    #[test]
    fn non_contributor_has_nothing_to_refund() {
        let h = failed_round();
        assert!(matches!(
            h.engine.refund(&h.round, &addr(9)),
            Err(EngineError::Idempotency(IdempotencyViolation::NothingToRefund { .. }))
        ));
    }

    #[test]
    fn failed_payout_can_be_retried() {
        let h = failed_round();
        h.engine
            .chain()
            .fail_next("refund", ChainError::Unavailable("timeout".into()));
        let err = h.engine.refund(&h.round, &addr(1)).unwrap_err();
        assert!(err.is_retryable());

        let receipt = h.engine.refund(&h.round, &addr(1)).unwrap();
        assert_eq!(receipt.amount, 3 * ETH / 10);
    }

    #[test]
    fn refunds_closed_on_live_round() {
        let h = Harness::new(terms());
        h.engine.advance_clock(&h.round, start()).unwrap();
        assert!(matches!(
            h.engine.refund(&h.round, &addr(1)),
            Err(EngineError::Precondition(PreconditionError::NotRefundable { .. }))
        ));
    }

    #[test]
    fn reopening_refunds_creates_nothing_new() {
        let h = failed_round();
        assert_eq!(h.engine.refunds(&h.round).unwrap().len(), 1);
        assert_eq!(h.engine.open_refunds(&h.round).unwrap(), 0);
    }
}
