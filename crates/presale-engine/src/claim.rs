use chrono::{DateTime, Utc};
use presale_crypto::{verify_proof, AllocationLeaf, LeafBinding};
use presale_ledger::ContributionEventSource;
use presale_store::LaunchStore;
use presale_types::{Address, Amount, ClaimRecord, RoundId, RoundStatus, TxRef};
use serde::Serialize;
use tracing::{info, warn};

use crate::chain::Chain;
use crate::engine::LaunchEngine;
use crate::error::{EngineError, EngineResult, IdempotencyViolation, PreconditionError};

/// A completed allocation claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClaimReceipt {
    pub round: RoundId,
    pub wallet: Address,
    #[serde(with = "presale_types::amount")]
    pub amount: Amount,
    pub tx: TxRef,
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    /// Claim a beneficiary's whole allocation from the vesting vault.
    ///
    /// The first call claims the total allocation; every later call for the
    /// same wallet is rejected. A wallet with no allocation gets
    /// [`PreconditionError::NotBeneficiary`].
    pub fn claim(
        &self,
        id: &RoundId,
        wallet: &Address,
        now: DateTime<Utc>,
    ) -> EngineResult<ClaimReceipt> {
        let round = self.round(id)?;
        if round.status != RoundStatus::FinalizedSuccess {
            return Err(PreconditionError::NotClaimable {
                round: *id,
                status: round.status,
            }
            .into());
        }
        let root = round.merkle_root.ok_or(PreconditionError::NotPrepared(*id))?;
        let proof = self
            .store
            .proof(id, wallet)?
            .ok_or(PreconditionError::NotBeneficiary {
                round: *id,
                wallet: *wallet,
            })?;
        if self.store.claim(id, wallet)?.is_some() {
            return Err(IdempotencyViolation::AlreadyClaimed {
                round: *id,
                wallet: *wallet,
            }
            .into());
        }

        let terms = &round.terms;
        let binding = LeafBinding::new(terms.vesting_vault, terms.chain_id, terms.schedule_salt);
        let leaf = AllocationLeaf::new(*wallet, proof.amount).hash(&binding);
        if !verify_proof(&root, &proof.siblings, &leaf) {
            // Stored proofs are derived data; a mismatch means they need rebuilding.
            return Err(EngineError::Reverted {
                call: "claim",
                reason: format!("stored proof for {wallet} does not verify against {root}"),
            });
        }

        self.store.reserve_claim(id, wallet)?;
        let tx = match self
            .chain
            .claim(&terms.vesting_vault, wallet, proof.amount, &proof.siblings)
        {
            Ok(tx) => tx,
            Err(err) => {
                warn!(round = %id, wallet = %wallet, error = %err, "claim failed, releasing");
                self.store.release_claim(id, wallet)?;
                return Err(err.during("claim"));
            }
        };
        self.store.complete_claim(ClaimRecord {
            round: *id,
            wallet: *wallet,
            amount: proof.amount,
            tx: tx.clone(),
            claimed_at: now,
        })?;
        info!(round = %id, wallet = %wallet, amount = proof.amount, "allocation claimed");

        Ok(ClaimReceipt {
            round: *id,
            wallet: *wallet,
            amount: proof.amount,
            tx,
        })
    }
}
