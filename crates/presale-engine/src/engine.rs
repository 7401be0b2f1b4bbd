use presale_alloc::{max_raise, ValidationError};
use presale_ledger::ContributionEventSource;
use presale_store::LaunchStore;
use presale_types::{Permission, Round, RoundId, RoundStatus};
use tracing::info;

use crate::authority::{Authorization, TrustedIssuers};
use crate::chain::Chain;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, PreconditionError};

/// The finalization engine.
///
/// One instance drives every round in its store. Each round is an explicit
/// state machine keyed by [`RoundId`]: every transition reads the round,
/// checks its status precondition, acts on the chain, and commits the new
/// status with a compare-and-set, so a transition attempted from the wrong
/// status fails closed.
///
/// Operations are spread over the modules that own them:
///
/// | module       | operations                                                     |
/// |--------------|----------------------------------------------------------------|
/// | `machine`    | `advance_clock`, `contribute`, `confirm_contribution`, `finalize*`, `cancel` |
/// | `prepare`    | `prepare`, `proof`, `rebuild_proofs`                           |
/// | `settlement` | `execute_step`, `settle_all`                                   |
/// | `refund`     | `refund`                                                       |
/// | `claim`      | `claim`                                                        |
/// | `referral`   | `distribute_referrals`                                         |
pub struct LaunchEngine<S, C> {
    pub(crate) store: S,
    pub(crate) chain: C,
    pub(crate) config: EngineConfig,
    pub(crate) issuers: TrustedIssuers,
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    pub fn new(store: S, chain: C, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let issuers = TrustedIssuers::new(config.trusted_keys()?);
        if issuers.is_empty() {
            info!("no trusted operators configured, admin transitions will be refused");
        }
        Ok(Self {
            store,
            chain,
            config,
            issuers,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a submitted round. It starts `Upcoming`.
    ///
    /// A hard cap above what the tokens for sale can settle is refused, so
    /// an accepted round can always reach one of its finalized states.
    pub fn submit_round(&self, round: Round) -> EngineResult<RoundId> {
        let id = round.id;
        let terms = &round.terms;
        let capacity = max_raise(
            terms.tokens_for_sale,
            terms.liquidity_bps,
            terms.token_decimals,
            terms.price_per_token,
        )?;
        if let Some(hard_cap) = terms.hard_cap.filter(|cap| *cap > capacity) {
            return Err(ValidationError::HardCapExceedsCapacity {
                hard_cap,
                max_raise: capacity,
            }
            .into());
        }
        self.store.insert_round(round)?;
        info!(round = %id, "round submitted");
        Ok(id)
    }

    pub fn round(&self, id: &RoundId) -> EngineResult<Round> {
        self.store
            .get_round(id)?
            .ok_or(EngineError::RoundNotFound(*id))
    }

    pub(crate) fn authorize(
        &self,
        auth: &Authorization,
        permission: Permission,
        round: &RoundId,
    ) -> EngineResult<()> {
        self.issuers.check(auth, permission, round)?;
        Ok(())
    }

    pub(crate) fn require_status(&self, round: &Round, expected: RoundStatus) -> EngineResult<()> {
        if round.status == expected {
            return Ok(());
        }
        if round.status.is_finalized() && expected == RoundStatus::Ended {
            return Err(PreconditionError::AlreadyFinalized {
                round: round.id,
                status: round.status,
            }
            .into());
        }
        Err(PreconditionError::WrongStatus {
            round: round.id,
            expected,
            actual: round.status,
        }
        .into())
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared fixtures for engine tests.

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use presale_crypto::{OperatorGrant, SigningKey};
    use presale_store::InMemoryLaunchStore;
    use presale_types::{
        Address, Capability, CapabilityScope, ChainId, Contribution, RaiseAsset, RoundTerms,
        ScheduleSalt, TeamAllocation, TeamWalletShare,
    };

    use super::*;
    use crate::simulated::SimulatedChain;

    pub const ETH: u128 = 1_000_000_000_000_000_000;
    pub const PRICE: u128 = 100_000_000_000_000;

    pub const TOKEN: Address = Address::from_bytes([0xa0; 20]);
    pub const SALE: Address = Address::from_bytes([0xa1; 20]);
    pub const VAULT: Address = Address::from_bytes([0xa2; 20]);
    pub const OWNER: Address = Address::from_bytes([0xa3; 20]);

    pub fn addr(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    pub fn end() -> DateTime<Utc> {
        start() + Duration::days(7)
    }

    pub fn terms() -> RoundTerms {
        RoundTerms {
            chain_id: ChainId(1),
            raise_asset: RaiseAsset::Native,
            token: TOKEN,
            token_decimals: 18,
            sale_contract: SALE,
            vesting_vault: VAULT,
            owner: OWNER,
            start_at: start(),
            end_at: end(),
            soft_cap: ETH,
            hard_cap: Some(13 * ETH / 10),
            price_per_token: PRICE,
            tokens_for_sale: 20_000 * ETH,
            total_supply: Some(1_000_000 * ETH),
            liquidity_bps: 5_000,
            lock_duration_secs: 30 * 86_400,
            fee_bps: 200,
            team_allocation: None,
            team_wallets: vec![],
            schedule_salt: ScheduleSalt::from_bytes([7; 32]),
        }
    }

    pub fn with_team(mut terms: RoundTerms, team: TeamAllocation, wallets: Vec<TeamWalletShare>) -> RoundTerms {
        terms.team_allocation = Some(team);
        terms.team_wallets = wallets;
        terms
    }

    pub struct Harness {
        pub engine: LaunchEngine<InMemoryLaunchStore, SimulatedChain>,
        pub issuer: SigningKey,
        pub round: RoundId,
    }

    impl Harness {
        pub fn new(terms: RoundTerms) -> Self {
            let issuer = SigningKey::generate();
            let config = EngineConfig::default().trust(&issuer.verifying_key());
            let chain = SimulatedChain::new();
            chain.register_token(terms.token, terms.token_decimals);
            chain.register_sale(terms.sale_contract, terms.token);
            chain.register_vault(terms.vesting_vault, terms.token, terms.chain_id, terms.schedule_salt);
            chain.mint(terms.token, terms.sale_contract, terms.tokens_for_sale * 2);

            let engine = LaunchEngine::new(InMemoryLaunchStore::new(), chain, config).unwrap();
            let round = engine.submit_round(Round::new(RoundId::new(), terms)).unwrap();
            Self {
                engine,
                issuer,
                round,
            }
        }

        pub fn admin(&self) -> Authorization {
            self.admin_at(end() + Duration::hours(1))
        }

        pub fn admin_at(&self, at: DateTime<Utc>) -> Authorization {
            let mut cap = Capability::new(
                addr(0xad),
                CapabilityScope::Global,
                vec![
                    Permission::Prepare,
                    Permission::Finalize,
                    Permission::Settle,
                    Permission::Cancel,
                    Permission::DistributeReferrals,
                ],
            );
            // Granted before every test clock.
            cap.granted_at = start() - Duration::days(30);
            let grant = OperatorGrant::issue(cap, &self.issuer).unwrap();
            Authorization::new(grant, at)
        }

        /// Open the round, record confirmed contributions paid on chain, and
        /// end it.
        pub fn run_sale(&self, contributions: &[(Address, u128)]) {
            self.run_sale_with_referrers(
                &contributions
                    .iter()
                    .map(|(a, v)| (*a, *v, None))
                    .collect::<Vec<_>>(),
            );
        }

        pub fn run_sale_with_referrers(&self, contributions: &[(Address, u128, Option<Address>)]) {
            let during = start() + Duration::hours(1);
            self.engine.advance_clock(&self.round, during).unwrap();
            for (contributor, amount, referrer) in contributions {
                self.engine
                    .chain()
                    .receive_contribution(SALE, *contributor, *amount);
                let c = self
                    .engine
                    .contribute(&self.round, *contributor, *amount, *referrer, during)
                    .unwrap();
                self.engine.confirm_contribution(&c.id).unwrap();
            }
            self.engine.advance_clock(&self.round, end()).unwrap();
        }

        pub fn pending(&self, contributor: Address, amount: u128) -> Contribution {
            self.engine
                .contribute(&self.round, contributor, amount, None, start() + Duration::hours(2))
                .unwrap()
        }
    }
}
