//! Whole-lifecycle scenarios over the in-memory store and simulated chain.

use chrono::Duration;
use presale_crypto::{verify_proof, AllocationLeaf, LeafBinding};
use presale_ledger::ContributionEventSource;
use presale_store::{ContributionStore, ProofStore};
use presale_types::{Amount, ContributorTotal, RoundStatus, SettlementStep};
use proptest::prelude::*;

use crate::chain::ChainReader;
use crate::engine::testkit::*;
use crate::error::{EngineError, IdempotencyViolation};
use crate::machine::FinalizeOutcome;

#[test]
fn successful_round_end_to_end() {
    let h = Harness::new(terms());
    h.run_sale_with_referrers(&[
        (addr(1), 6 * ETH / 10, Some(addr(0x31))),
        (addr(2), 5 * ETH / 10, None),
    ]);

    let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
    assert_eq!(prepared.leaf_count, 2);

    let outcome = h.engine.finalize(&h.round, &h.admin()).unwrap();
    let FinalizeOutcome::Success(receipt) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(receipt.root, prepared.root);
    assert_eq!(
        h.engine.chain().vesting_root(&VAULT).unwrap(),
        Some(prepared.root)
    );
    assert_eq!(
        h.engine.round(&h.round).unwrap().status,
        RoundStatus::FinalizedSuccess
    );

    let run = h.engine.settle_all(&h.round, &h.admin()).unwrap();
    assert!(run.is_complete());
    let referrals = h.engine.distribute_referrals(&h.round, &h.admin()).unwrap();
    assert_eq!(referrals.payouts.len(), 1);
    assert_eq!(referrals.treasury, 0);

    for (wallet, amount) in [(addr(1), 6_000 * ETH), (addr(2), 5_000 * ETH)] {
        assert_eq!(h.engine.claim(&h.round, &wallet, end()).unwrap().amount, amount);
    }
    assert_eq!(h.engine.chain().token_balance(&TOKEN, &VAULT).unwrap(), 0);
    assert_eq!(h.engine.proof(&h.round, &addr(3)).unwrap(), None);

    let round = h.engine.round(&h.round).unwrap();
    assert_eq!(round.settlement, SettlementStep::FundsDistributed);
}

#[test]
fn failed_round_refunds_exactly_once() {
    let h = Harness::new(terms());
    h.run_sale(&[(addr(1), 3 * ETH / 10)]);

    let FinalizeOutcome::Failed(receipt) = h.engine.finalize(&h.round, &h.admin()).unwrap() else {
        panic!("expected failure path");
    };
    assert_eq!(receipt.status, RoundStatus::FinalizedFailed);
    assert_eq!(receipt.refunds_opened, 1);
    let records = h.engine.refunds(&h.round).unwrap();
    assert_eq!(records[0].amount, 3 * ETH / 10);

    assert_eq!(
        h.engine.refund(&h.round, &addr(1)).unwrap().amount,
        3 * ETH / 10
    );
    assert_eq!(
        h.engine.refund(&h.round, &addr(1)).unwrap_err(),
        EngineError::Idempotency(IdempotencyViolation::NothingToRefund {
            round: h.round,
            contributor: addr(1)
        })
    );
}

#[test]
fn historical_round_recovered_from_event_log() {
    let h = Harness::new(terms());
    h.engine
        .advance_clock(&h.round, start() + Duration::hours(1))
        .unwrap();
    let chain = h.engine.chain();
    chain.receive_contribution(SALE, addr(1), 4 * ETH / 10);
    chain.mine(10);
    chain.receive_contribution(SALE, addr(2), 5 * ETH / 10);
    chain.receive_contribution(SALE, addr(1), 2 * ETH / 10);
    h.engine.advance_clock(&h.round, end()).unwrap();
    assert_eq!(h.engine.round(&h.round).unwrap().total_raised, 0);

    let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
    assert_eq!(prepared.settlement.total_raised, 11 * ETH / 10);
    assert_eq!(
        h.engine.round(&h.round).unwrap().total_raised,
        11 * ETH / 10
    );
    assert_eq!(
        h.engine.proof(&h.round, &addr(1)).unwrap().unwrap().amount,
        6_000 * ETH
    );

    assert!(matches!(
        h.engine.finalize(&h.round, &h.admin()).unwrap(),
        FinalizeOutcome::Success(_)
    ));
}

#[test]
fn scan_outage_never_reads_as_empty_round() {
    let h = Harness::new(terms());
    h.engine
        .advance_clock(&h.round, start() + Duration::hours(1))
        .unwrap();
    h.engine.chain().receive_contribution(SALE, addr(1), 2 * ETH);
    h.engine.advance_clock(&h.round, end()).unwrap();
    let head = h.engine.chain().latest_block().unwrap();
    h.engine.chain().fail_event_blocks(0, head);

    let err = h.engine.prepare(&h.round, &h.admin()).unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert_eq!(h.engine.round(&h.round).unwrap().merkle_root, None);

    // Finalizing must not fall through to the failure path on zero raised.
    let err = h.engine.finalize(&h.round, &h.admin()).unwrap_err();
    assert!(err.is_retryable(), "{err}");
    let round = h.engine.round(&h.round).unwrap();
    assert_eq!(round.status, RoundStatus::Ended);
    assert!(h.engine.refunds(&h.round).unwrap().is_empty());
}

#[test]
fn partial_scan_neither_routes_nor_persists() {
    let h = Harness::new(terms());
    h.engine
        .advance_clock(&h.round, start() + Duration::hours(1))
        .unwrap();
    let chain = h.engine.chain();
    chain.receive_contribution(SALE, addr(1), 3 * ETH / 10);
    chain.mine(3_000);
    chain.receive_contribution(SALE, addr(2), 8 * ETH / 10);
    h.engine.advance_clock(&h.round, end()).unwrap();

    // The chunk holding the first contribution is unreachable. What is
    // left (0.8 ETH) is below the soft cap and must not read as a failed
    // round.
    chain.fail_event_blocks(0, 1_999);
    let err = h.engine.finalize(&h.round, &h.admin()).unwrap_err();
    assert!(err.is_retryable(), "{err}");
    let round = h.engine.round(&h.round).unwrap();
    assert_eq!(round.status, RoundStatus::Ended);
    assert_eq!(round.total_raised, 0);
    assert!(h.engine.refunds(&h.round).unwrap().is_empty());
    assert_eq!(h.engine.store().contribution_snapshot(&h.round).unwrap(), None);
    assert!(h.engine.prepare(&h.round, &h.admin()).unwrap_err().is_retryable());

    chain.heal_event_blocks();
    let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
    assert_eq!(prepared.settlement.total_raised, 11 * ETH / 10);
    assert!(matches!(
        h.engine.finalize(&h.round, &h.admin()).unwrap(),
        FinalizeOutcome::Success(_)
    ));
}

#[test]
fn cancelled_round_refunds_confirmed_contributors() {
    let h = Harness::new(terms());
    let during = start() + Duration::hours(1);
    h.engine.advance_clock(&h.round, during).unwrap();
    for (who, amount) in [(addr(1), ETH / 4), (addr(2), ETH / 2)] {
        h.engine.chain().receive_contribution(SALE, who, amount);
        let c = h.engine.contribute(&h.round, who, amount, None, during).unwrap();
        h.engine.confirm_contribution(&c.id).unwrap();
    }

    let receipt = h.engine.cancel(&h.round, &h.admin_at(during)).unwrap();
    assert_eq!(receipt.refunds_opened, 2);
    assert_eq!(h.engine.refund(&h.round, &addr(2)).unwrap().amount, ETH / 2);
    assert_eq!(h.engine.refund(&h.round, &addr(1)).unwrap().amount, ETH / 4);
    assert_eq!(h.engine.chain().asset_balance(&SALE), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_beneficiary_proof_verifies(
        amounts in prop::collection::vec(1u128..800, 1..6),
    ) {
        let mut t = terms();
        t.soft_cap = 1;
        t.hard_cap = None;
        t.tokens_for_sale = 100_000 * ETH;
        let binding = LeafBinding::new(t.vesting_vault, t.chain_id, t.schedule_salt);
        let h = Harness::new(t.clone());
        let contributions: Vec<_> = amounts
            .iter()
            .enumerate()
            .map(|(i, milli)| (addr(i as u8 + 1), milli * ETH / 1_000))
            .collect();
        h.run_sale(&contributions);

        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
        let allocations = h.engine.store().allocations(&h.round).unwrap();
        let sum: Amount = allocations.iter().map(|a| a.total).sum();
        prop_assert_eq!(sum, prepared.settlement.total_vesting_allocation);

        let s = &prepared.settlement;
        prop_assert!(s.unsold_to_burn + s.tokens_for_lp + s.tokens_sold <= t.tokens_for_sale);

        for (wallet, _) in &contributions {
            let found = h.engine.proof(&h.round, wallet).unwrap().unwrap();
            let leaf = AllocationLeaf::new(*wallet, found.amount).hash(&binding);
            prop_assert!(verify_proof(&prepared.root, &found.siblings, &leaf));
            let forged = AllocationLeaf::new(*wallet, found.amount + 1).hash(&binding);
            prop_assert!(!verify_proof(&prepared.root, &found.siblings, &forged));
        }

        let totals: Vec<ContributorTotal> = h.engine.store().contribution_snapshot(&h.round).unwrap().unwrap();
        prop_assert_eq!(totals.len(), contributions.len());
    }
}
