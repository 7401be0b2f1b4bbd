//! Scenario files and the simulated deployment they run against.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use presale_crypto::{OperatorGrant, SigningKey};
use presale_engine::{
    Authorization, EngineConfig, ErrorKind, FeeConfig, LaunchEngine, PreparedRound, SimulatedChain,
};
use presale_store::InMemoryLaunchStore;
use presale_types::{
    amount, Address, Amount, Capability, CapabilityScope, Permission, Round, RoundId, RoundTerms,
};
use serde::Deserialize;
use tracing::{debug, info};

/// Operator address the simulation signs its own grant for.
const OPERATOR: Address = Address::from_bytes([0xad; 20]);

/// A round plus what happens to it.
///
/// ```toml
/// [round]
/// chain_id = 1
/// raise_asset = "native"
/// # ...every RoundTerms field...
///
/// [[contributions]]
/// contributor = "0x1111111111111111111111111111111111111111"
/// amount = "600000000000000000"
/// ```
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub round: RoundTerms,
    #[serde(default)]
    pub contributions: Vec<ScenarioContribution>,
    #[serde(default)]
    pub chain: ChainSetup,
    /// Cancel the round once contributions are in instead of letting it end.
    #[serde(default)]
    pub cancel: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioContribution {
    pub contributor: Address,
    #[serde(with = "amount")]
    pub amount: Amount,
    #[serde(default)]
    pub referrer: Option<Address>,
    /// Paid on chain but never recorded by the engine, so finalization has
    /// to recover it from the event log.
    #[serde(default)]
    pub unrecorded: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChainSetup {
    pub fee: Option<FeeConfig>,
    /// Sale tokens deposited in the sale contract. Twice the tokens for sale
    /// when unset.
    #[serde(default, with = "amount::opt")]
    pub sale_token_balance: Option<Amount>,
}

impl Scenario {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }
}

/// An engine wired to a fresh simulated chain with one submitted round.
pub struct Simulation {
    pub engine: LaunchEngine<InMemoryLaunchStore, SimulatedChain>,
    pub round: RoundId,
    issuer: SigningKey,
    terms: RoundTerms,
}

impl Simulation {
    pub fn new(scenario: &Scenario, config: EngineConfig) -> anyhow::Result<Self> {
        let terms = scenario.round.clone();
        let issuer = SigningKey::generate();
        let config = config.trust(&issuer.verifying_key());

        let chain = SimulatedChain::new();
        chain.register_token(terms.token, terms.token_decimals);
        chain.register_sale(terms.sale_contract, terms.token);
        chain.register_vault(terms.vesting_vault, terms.token, terms.chain_id, terms.schedule_salt);
        if let Some(fee) = scenario.chain.fee {
            chain.set_fee_config(fee);
        }
        let deposit = match scenario.chain.sale_token_balance {
            Some(balance) => balance,
            None => terms
                .tokens_for_sale
                .checked_mul(2)
                .context("tokens_for_sale too large to simulate")?,
        };
        chain.mint(terms.token, terms.sale_contract, deposit);

        let engine = LaunchEngine::new(InMemoryLaunchStore::new(), chain, config)?;
        let round = engine.submit_round(Round::new(RoundId::new(), terms.clone()))?;
        debug!(round = %round, deposit, "simulation ready");
        Ok(Self {
            engine,
            round,
            issuer,
            terms,
        })
    }

    /// A moment after the round's end, when admin steps run.
    pub fn after_end(&self) -> DateTime<Utc> {
        self.terms.end_at + Duration::hours(1)
    }

    /// Operator authority evaluated at `at`.
    pub fn authorization(&self, at: DateTime<Utc>) -> anyhow::Result<Authorization> {
        let mut capability = Capability::new(
            OPERATOR,
            CapabilityScope::Round(self.round),
            vec![
                Permission::Prepare,
                Permission::Finalize,
                Permission::Settle,
                Permission::Cancel,
                Permission::DistributeReferrals,
            ],
        );
        capability.granted_at = self.terms.start_at - Duration::days(1);
        let grant = OperatorGrant::issue(capability, &self.issuer)?;
        Ok(Authorization::new(grant, at))
    }

    /// Open the round, take every contribution, then end or cancel it.
    pub fn run_sale(&self, scenario: &Scenario) -> anyhow::Result<()> {
        let during = self.terms.start_at;
        self.engine.advance_clock(&self.round, during)?;
        for c in &scenario.contributions {
            self.engine
                .chain()
                .receive_contribution(self.terms.sale_contract, c.contributor, c.amount);
            if c.unrecorded {
                continue;
            }
            let recorded = self
                .engine
                .contribute(&self.round, c.contributor, c.amount, c.referrer, during)?;
            self.engine.confirm_contribution(&recorded.id)?;
        }

        if scenario.cancel {
            self.engine.cancel(&self.round, &self.authorization(during)?)?;
            return Ok(());
        }
        self.engine.advance_clock(&self.round, self.terms.end_at)?;
        Ok(())
    }

    /// Prepare the ended round. `None` when it missed its soft cap and has
    /// nothing to allocate.
    pub fn prepare(&self) -> anyhow::Result<Option<PreparedRound>> {
        match self
            .engine
            .prepare(&self.round, &self.authorization(self.after_end())?)
        {
            Ok(prepared) => Ok(Some(prepared)),
            Err(err) if err.kind() == ErrorKind::Economic => {
                info!(round = %self.round, reason = %err, "round not prepared");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn terms(&self) -> &RoundTerms {
        &self.terms
    }
}
