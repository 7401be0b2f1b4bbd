use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use presale_crypto::{verify_proof, AllocationLeaf, LeafBinding};
use presale_ledger::{ContributionEvent, ContributionEventSource, SourceError};
use presale_types::{
    Address, Amount, ChainId, Digest, FeeSplit, ScheduleSalt, SettlementStep, TxRef,
};
use tracing::debug;

use crate::chain::{
    ChainError, ChainReader, ChainWriter, FeeConfig, FundsRelease, LiquidityOrder, LpPosition,
    SaleOutcome, SaleState,
};

/// Fee destination accounts used by [`SimulatedChain`].
pub const TREASURY: Address = Address::from_bytes([0xfe; 20]);
pub const REFERRAL_POOL: Address = Address::from_bytes([0xfd; 20]);
pub const STAKING: Address = Address::from_bytes([0xfc; 20]);
pub const LIQUIDITY_POOL: Address = Address::from_bytes([0xfb; 20]);

#[derive(Clone, Debug)]
struct SaleRecord {
    token: Address,
    state: SaleState,
}

#[derive(Clone, Debug)]
struct VaultRecord {
    token: Address,
    binding: LeafBinding,
    root: Option<Digest>,
    claimed: HashSet<Address>,
}

struct ChainState {
    decimals: HashMap<Address, u8>,
    fee: FeeConfig,
    /// (token, holder) -> balance
    tokens: HashMap<(Address, Address), Amount>,
    /// Raise-asset balances.
    assets: HashMap<Address, Amount>,
    sales: HashMap<Address, SaleRecord>,
    vaults: HashMap<Address, VaultRecord>,
    events: Vec<(Address, ContributionEvent)>,
    head: u64,
    offline: bool,
    queued_failures: HashMap<&'static str, VecDeque<ChainError>>,
    failing_blocks: Vec<(u64, u64)>,
    calls: BTreeMap<&'static str, usize>,
    tx_counter: u64,
}

/// In-process chain for tests and the CLI.
///
/// Tracks token and raise-asset balances, sale contract lifecycle, vesting
/// vault roots, and an append-only contribution event log. Contracts enforce
/// their own ordering, so replaying a call the engine should have skipped
/// reverts instead of silently moving funds twice.
pub struct SimulatedChain {
    state: RwLock<ChainState>,
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState {
                decimals: HashMap::new(),
                fee: FeeConfig {
                    fee_bps: 200,
                    referral_share_bps: 2_500,
                    staking_share_bps: 2_500,
                },
                tokens: HashMap::new(),
                assets: HashMap::new(),
                sales: HashMap::new(),
                vaults: HashMap::new(),
                events: Vec::new(),
                head: 0,
                offline: false,
                queued_failures: HashMap::new(),
                failing_blocks: Vec::new(),
                calls: BTreeMap::new(),
                tx_counter: 0,
            }),
        }
    }

    // ---- Setup ----

    pub fn register_token(&self, token: Address, decimals: u8) {
        let mut state = self.state.write().expect("lock poisoned");
        state.decimals.insert(token, decimals);
    }

    pub fn register_sale(&self, sale_contract: Address, token: Address) {
        let mut state = self.state.write().expect("lock poisoned");
        state.sales.insert(
            sale_contract,
            SaleRecord {
                token,
                state: SaleState::default(),
            },
        );
    }

    pub fn register_vault(&self, vault: Address, token: Address, chain: ChainId, salt: ScheduleSalt) {
        let mut state = self.state.write().expect("lock poisoned");
        state.vaults.insert(
            vault,
            VaultRecord {
                token,
                binding: LeafBinding::new(vault, chain, salt),
                root: None,
                claimed: HashSet::new(),
            },
        );
    }

    pub fn set_fee_config(&self, fee: FeeConfig) {
        self.state.write().expect("lock poisoned").fee = fee;
    }

    pub fn mint(&self, token: Address, holder: Address, amount: Amount) {
        let mut state = self.state.write().expect("lock poisoned");
        *state.tokens.entry((token, holder)).or_default() += amount;
    }

    /// A contributor pays into a sale contract. Credits the contract and
    /// appends a contribution event in a new block.
    pub fn receive_contribution(&self, sale_contract: Address, contributor: Address, amount: Amount) {
        let mut state = self.state.write().expect("lock poisoned");
        *state.assets.entry(sale_contract).or_default() += amount;
        state.head += 1;
        let block = state.head;
        state.events.push((
            sale_contract,
            ContributionEvent {
                block,
                contributor,
                amount,
            },
        ));
    }

    /// Move the head forward without new events.
    pub fn mine(&self, blocks: u64) {
        self.state.write().expect("lock poisoned").head += blocks;
    }

    // ---- Failure injection ----

    /// Every call fails as unavailable until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.state.write().expect("lock poisoned").offline = offline;
    }

    /// Fail the next invocation of `call` with `error`.
    pub fn fail_next(&self, call: &'static str, error: ChainError) {
        let mut state = self.state.write().expect("lock poisoned");
        state.queued_failures.entry(call).or_default().push_back(error);
    }

    /// Event queries overlapping `from..=to` fail.
    pub fn fail_event_blocks(&self, from: u64, to: u64) {
        self.state.write().expect("lock poisoned").failing_blocks.push((from, to));
    }

    /// Event queries succeed again everywhere.
    pub fn heal_event_blocks(&self) {
        self.state.write().expect("lock poisoned").failing_blocks.clear();
    }

    // ---- Inspection ----

    pub fn asset_balance(&self, holder: &Address) -> Amount {
        let state = self.state.read().expect("lock poisoned");
        state.assets.get(holder).copied().unwrap_or(0)
    }

    /// How many times `call` reached the chain and succeeded.
    pub fn call_count(&self, call: &str) -> usize {
        let state = self.state.read().expect("lock poisoned");
        state.calls.get(call).copied().unwrap_or(0)
    }

    pub fn head(&self) -> u64 {
        self.state.read().expect("lock poisoned").head
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("SimulatedChain")
            .field("head", &state.head)
            .field("sales", &state.sales.len())
            .field("vaults", &state.vaults.len())
            .finish()
    }
}

impl ChainState {
    /// Common prologue for every call: availability and injected failures.
    fn enter(&mut self, call: &'static str) -> Result<(), ChainError> {
        if self.offline {
            return Err(ChainError::Unavailable("node offline".into()));
        }
        if let Some(err) = self.queued_failures.get_mut(call).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn commit(&mut self, call: &'static str) -> TxRef {
        self.tx_counter += 1;
        *self.calls.entry(call).or_default() += 1;
        let tx = TxRef::new(format!("0x{:064x}", self.tx_counter));
        debug!(call, tx = %tx, "simulated transaction");
        tx
    }

    fn sale_mut(&mut self, sale: &Address) -> Result<&mut SaleRecord, ChainError> {
        self.sales
            .get_mut(sale)
            .ok_or_else(|| ChainError::Reverted(format!("unknown sale contract {sale}")))
    }

    fn debit_token(&mut self, token: Address, holder: Address, amount: Amount) -> Result<(), ChainError> {
        let balance = self.tokens.entry((token, holder)).or_default();
        if *balance < amount {
            return Err(ChainError::Reverted(format!(
                "insufficient token balance: {balance} < {amount}"
            )));
        }
        *balance -= amount;
        Ok(())
    }

    fn credit_token(&mut self, token: Address, holder: Address, amount: Amount) {
        *self.tokens.entry((token, holder)).or_default() += amount;
    }

    fn debit_asset(&mut self, holder: Address, amount: Amount) -> Result<(), ChainError> {
        let balance = self.assets.entry(holder).or_default();
        if *balance < amount {
            return Err(ChainError::Reverted(format!(
                "insufficient asset balance: {balance} < {amount}"
            )));
        }
        *balance -= amount;
        Ok(())
    }

    fn credit_asset(&mut self, holder: Address, amount: Amount) {
        *self.assets.entry(holder).or_default() += amount;
    }

    fn require_step(
        &mut self,
        sale: &Address,
        expected: SettlementStep,
    ) -> Result<&mut SaleRecord, ChainError> {
        let record = self.sale_mut(sale)?;
        if record.state.outcome != Some(SaleOutcome::Success) {
            return Err(ChainError::Reverted("sale not finalized as success".into()));
        }
        if record.state.step != expected {
            return Err(ChainError::Reverted(format!(
                "settlement at {}, expected {}",
                record.state.step, expected
            )));
        }
        Ok(record)
    }
}

impl ChainReader for SimulatedChain {
    fn token_decimals(&self, token: &Address) -> Result<u8, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("token_decimals")?;
        state
            .decimals
            .get(token)
            .copied()
            .ok_or_else(|| ChainError::Reverted(format!("unknown token {token}")))
    }

    fn fee_config(&self, _chain: ChainId) -> Result<FeeConfig, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("fee_config")?;
        Ok(state.fee)
    }

    fn token_balance(&self, token: &Address, holder: &Address) -> Result<Amount, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("token_balance")?;
        Ok(state.tokens.get(&(*token, *holder)).copied().unwrap_or(0))
    }

    fn sale_state(&self, sale_contract: &Address) -> Result<SaleState, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("sale_state")?;
        Ok(state.sale_mut(sale_contract)?.state.clone())
    }

    fn vesting_root(&self, vault: &Address) -> Result<Option<Digest>, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("vesting_root")?;
        state
            .vaults
            .get(vault)
            .map(|v| v.root)
            .ok_or_else(|| ChainError::Reverted(format!("unknown vault {vault}")))
    }
}

impl ChainWriter for SimulatedChain {
    fn set_vesting_root(
        &self,
        vault: &Address,
        root: Digest,
        _total_allocation: Amount,
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("set_vesting_root")?;
        let record = state
            .vaults
            .get_mut(vault)
            .ok_or_else(|| ChainError::Reverted(format!("unknown vault {vault}")))?;
        match record.root {
            Some(existing) if existing != root => {
                return Err(ChainError::Reverted("root already set".into()))
            }
            _ => record.root = Some(root),
        }
        Ok(state.commit("set_vesting_root"))
    }

    fn fund_vault(
        &self,
        sale_contract: &Address,
        vault: &Address,
        amount: Amount,
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("fund_vault")?;
        let token = state.sale_mut(sale_contract)?.token;
        state.debit_token(token, *sale_contract, amount)?;
        state.credit_token(token, *vault, amount);
        Ok(state.commit("fund_vault"))
    }

    fn finalize_sale(&self, sale_contract: &Address, outcome: SaleOutcome) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("finalize_sale")?;
        let record = state.sale_mut(sale_contract)?;
        if record.state.outcome.is_some() {
            return Err(ChainError::Reverted("sale already finalized".into()));
        }
        record.state.outcome = Some(outcome);
        Ok(state.commit("finalize_sale"))
    }

    fn distribute_fee(&self, sale_contract: &Address, split: &FeeSplit) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("distribute_fee")?;
        state.require_step(sale_contract, SettlementStep::None)?;
        state.debit_asset(*sale_contract, split.total)?;
        state.credit_asset(TREASURY, split.treasury);
        state.credit_asset(REFERRAL_POOL, split.referral_pool);
        state.credit_asset(STAKING, split.staking);
        state.sale_mut(sale_contract)?.state.step = SettlementStep::FeeDistributed;
        Ok(state.commit("distribute_fee"))
    }

    fn add_liquidity(
        &self,
        sale_contract: &Address,
        order: LiquidityOrder,
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("add_liquidity")?;
        let token = state
            .require_step(sale_contract, SettlementStep::FeeDistributed)?
            .token;
        if order.tokens < order.min_tokens || order.asset < order.min_asset {
            return Err(ChainError::Reverted("liquidity below slippage minimum".into()));
        }
        state.debit_token(token, *sale_contract, order.tokens)?;
        state.debit_asset(*sale_contract, order.asset)?;
        state.credit_token(token, LIQUIDITY_POOL, order.tokens);
        state.credit_asset(LIQUIDITY_POOL, order.asset);
        let record = state.sale_mut(sale_contract)?;
        record.state.liquidity = Some(LpPosition {
            lp_token: LIQUIDITY_POOL,
            amount: order.asset,
            locked: false,
        });
        record.state.step = SettlementStep::LiquidityAdded;
        Ok(state.commit("add_liquidity"))
    }

    fn lock_liquidity(
        &self,
        sale_contract: &Address,
        duration_secs: u64,
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("lock_liquidity")?;
        let record = state.require_step(sale_contract, SettlementStep::LiquidityAdded)?;
        let position = record
            .state
            .liquidity
            .as_mut()
            .ok_or_else(|| ChainError::Reverted("no liquidity position".into()))?;
        position.locked = true;
        record.state.step = SettlementStep::LpLocked;
        debug!(duration_secs, "liquidity locked");
        Ok(state.commit("lock_liquidity"))
    }

    fn release_funds(&self, sale_contract: &Address, release: FundsRelease) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("release_funds")?;
        let token = state.require_step(sale_contract, SettlementStep::LpLocked)?.token;
        state.debit_asset(*sale_contract, release.amount)?;
        state.credit_asset(release.owner, release.amount);
        state.debit_token(token, *sale_contract, release.burn)?;
        state.credit_token(token, Address::ZERO, release.burn);
        state.sale_mut(sale_contract)?.state.step = SettlementStep::FundsDistributed;
        Ok(state.commit("release_funds"))
    }

    fn refund(
        &self,
        sale_contract: &Address,
        contributor: &Address,
        amount: Amount,
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("refund")?;
        let outcome = state.sale_mut(sale_contract)?.state.outcome;
        if !matches!(outcome, Some(SaleOutcome::Failed | SaleOutcome::Cancelled)) {
            return Err(ChainError::Reverted("refunds not open".into()));
        }
        state.debit_asset(*sale_contract, amount)?;
        state.credit_asset(*contributor, amount);
        Ok(state.commit("refund"))
    }

    fn claim(
        &self,
        vault: &Address,
        wallet: &Address,
        amount: Amount,
        proof: &[Digest],
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("claim")?;
        let record = state
            .vaults
            .get_mut(vault)
            .ok_or_else(|| ChainError::Reverted(format!("unknown vault {vault}")))?;
        let root = record
            .root
            .ok_or_else(|| ChainError::Reverted("vault has no root".into()))?;
        let leaf = AllocationLeaf::new(*wallet, amount).hash(&record.binding);
        if !verify_proof(&root, proof, &leaf) {
            return Err(ChainError::Reverted("invalid proof".into()));
        }
        if !record.claimed.insert(*wallet) {
            return Err(ChainError::Reverted("already claimed".into()));
        }
        let token = record.token;
        state.debit_token(token, *vault, amount)?;
        state.credit_token(token, *wallet, amount);
        Ok(state.commit("claim"))
    }

    fn pay_referrals(
        &self,
        _sale_contract: &Address,
        payouts: &[(Address, Amount)],
        treasury: Amount,
    ) -> Result<TxRef, ChainError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.enter("pay_referrals")?;
        let total = payouts
            .iter()
            .try_fold(treasury, |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or_else(|| ChainError::Reverted("payout overflow".into()))?;
        state.debit_asset(REFERRAL_POOL, total)?;
        for (referrer, amount) in payouts {
            state.credit_asset(*referrer, *amount);
        }
        state.credit_asset(TREASURY, treasury);
        Ok(state.commit("pay_referrals"))
    }
}

impl ContributionEventSource for SimulatedChain {
    fn latest_block(&self) -> Result<u64, SourceError> {
        let state = self.state.read().expect("lock poisoned");
        if state.offline {
            return Err(SourceError("node offline".into()));
        }
        Ok(state.head)
    }

    fn contribution_events(
        &self,
        sale_contract: &Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<ContributionEvent>, SourceError> {
        let state = self.state.read().expect("lock poisoned");
        if state.offline {
            return Err(SourceError("node offline".into()));
        }
        if state
            .failing_blocks
            .iter()
            .any(|(lo, hi)| *lo <= to && from <= *hi)
        {
            return Err(SourceError(format!("timeout querying blocks {from}..={to}")));
        }
        Ok(state
            .events
            .iter()
            .filter(|(sale, e)| sale == sale_contract && e.block >= from && e.block <= to)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    #[test]
    fn contribution_events_are_appended_per_block() {
        let chain = SimulatedChain::new();
        chain.receive_contribution(addr(1), addr(2), 10);
        chain.receive_contribution(addr(1), addr(3), 20);
        chain.receive_contribution(addr(9), addr(3), 99);

        assert_eq!(chain.latest_block().unwrap(), 3);
        let events = chain.contribution_events(&addr(1), 0, 3).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(chain.asset_balance(&addr(1)), 30);
    }

    #[test]
    fn failing_blocks_fail_overlapping_queries() {
        let chain = SimulatedChain::new();
        chain.mine(100);
        chain.fail_event_blocks(40, 60);
        assert!(chain.contribution_events(&addr(1), 0, 39).is_ok());
        assert!(chain.contribution_events(&addr(1), 50, 70).is_err());
        chain.heal_event_blocks();
        assert!(chain.contribution_events(&addr(1), 50, 70).is_ok());
    }

    #[test]
    fn injected_failure_is_consumed_once() {
        let chain = SimulatedChain::new();
        chain.fail_next("fee_config", ChainError::Unavailable("timeout".into()));
        assert!(chain.fee_config(ChainId(1)).is_err());
        assert_eq!(chain.fee_config(ChainId(1)).unwrap().fee_bps, 200);
    }

    #[test]
    fn settlement_calls_enforce_order() {
        let chain = SimulatedChain::new();
        let sale = addr(1);
        chain.register_sale(sale, addr(2));
        chain.finalize_sale(&sale, SaleOutcome::Success).unwrap();

        let err = chain.lock_liquidity(&sale, 60).unwrap_err();
        assert!(matches!(err, ChainError::Reverted(_)));
        assert!(chain.finalize_sale(&sale, SaleOutcome::Failed).is_err());
    }

    #[test]
    fn offline_fails_everything() {
        let chain = SimulatedChain::new();
        chain.set_offline(true);
        assert!(matches!(
            chain.token_decimals(&addr(1)),
            Err(ChainError::Unavailable(_))
        ));
        assert!(chain.latest_block().is_err());
    }
}
