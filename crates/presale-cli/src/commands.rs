use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use presale_crypto::{verify_proof, AllocationLeaf, LeafBinding};
use presale_engine::{
    ClaimReceipt, EngineConfig, FinalizeOutcome, PreparedRound, ReferralReceipt, RefundReceipt,
    StepReceipt,
};
use presale_types::{
    amount::parse_amount, Address, Amount, ChainId, Digest, RoundId, RoundStatus, ScheduleSalt,
};
use serde::Serialize;

use crate::cli::*;
use crate::scenario::{Scenario, Simulation};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, format),
        Command::Prepare(args) => cmd_prepare(args, format),
        Command::Proof(args) => cmd_proof(args, format),
        Command::Verify(args) => cmd_verify(args, format),
    }
}

/// Everything a simulated lifecycle did.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub round: RoundId,
    pub status: RoundStatus,
    pub prepared: Option<PreparedRound>,
    pub finalize: Option<FinalizeOutcome>,
    pub settlement: Vec<StepReceipt>,
    /// Step and error that stopped settlement, if any.
    pub settlement_error: Option<String>,
    pub referrals: Option<ReferralReceipt>,
    pub claims: Vec<ClaimReceipt>,
    pub refunds: Vec<RefundReceipt>,
}

fn load(args: &ScenarioArgs) -> anyhow::Result<(Scenario, EngineConfig)> {
    let scenario = Scenario::load(&args.scenario)?;
    let config = load_config(args.config.as_deref())?;
    Ok((scenario, config))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

/// Drive `scenario` from submission to claims or refunds.
pub fn simulate(
    scenario: &Scenario,
    config: EngineConfig,
    settle: bool,
) -> anyhow::Result<SimulationReport> {
    let sim = Simulation::new(scenario, config)?;
    sim.run_sale(scenario)?;
    let engine = &sim.engine;
    let auth = sim.authorization(sim.after_end())?;

    let mut report = SimulationReport {
        round: sim.round,
        status: RoundStatus::Upcoming,
        prepared: None,
        finalize: None,
        settlement: Vec::new(),
        settlement_error: None,
        referrals: None,
        claims: Vec::new(),
        refunds: Vec::new(),
    };

    if !scenario.cancel {
        report.prepared = sim.prepare()?;
        report.finalize = Some(engine.finalize(&sim.round, &auth)?);
    }

    if settle {
        match &report.finalize {
            Some(FinalizeOutcome::Success(_)) => {
                let run = engine.settle_all(&sim.round, &auth)?;
                report.settlement = run.receipts;
                if let Some((step, err)) = run.failure {
                    report.settlement_error = Some(format!("{step}: {err}"));
                } else {
                    report.referrals = Some(engine.distribute_referrals(&sim.round, &auth)?);
                }
                let wallets: Vec<Address> = report
                    .prepared
                    .iter()
                    .flat_map(|p| p.proofs.iter().map(|proof| proof.wallet))
                    .collect();
                for wallet in wallets {
                    report
                        .claims
                        .push(engine.claim(&sim.round, &wallet, sim.after_end())?);
                }
            }
            _ => {
                for record in engine.refunds(&sim.round)? {
                    report
                        .refunds
                        .push(engine.refund(&sim.round, &record.contributor)?);
                }
            }
        }
    }

    report.status = engine.round(&sim.round)?.status;
    Ok(report)
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (scenario, config) = load(&args.scenario)?;
    let report = simulate(&scenario, config, !args.no_settle)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let decimals = scenario.round.token_decimals;
    println!("Round {}", report.round.to_string().yellow().bold());
    if let Some(prepared) = &report.prepared {
        print_prepared(prepared, decimals);
    }
    match &report.finalize {
        Some(FinalizeOutcome::Success(r)) => {
            println!("{} Finalized as success (root {})", "✓".green().bold(), r.root.short_hex().cyan());
        }
        Some(FinalizeOutcome::Failed(r)) => {
            println!("{} Finalized as failed, {} refunds opened", "✗".red().bold(), r.refunds_opened);
        }
        None => println!("{} Cancelled before the round ended", "✗".red().bold()),
    }
    for step in &report.settlement {
        println!("  step {} {:<18} {:?}", step.index, step.step.to_string().cyan(), step.outcome);
    }
    if let Some(err) = &report.settlement_error {
        println!("  {} settlement stopped at {}", "!".yellow().bold(), err);
    }
    if let Some(referrals) = &report.referrals {
        println!(
            "  referrals: {} paid, {} to treasury",
            referrals.payouts.len(),
            referrals.treasury
        );
    }
    for claim in &report.claims {
        println!("  claimed {} {}", claim.wallet.short().bold(), format_units(claim.amount, decimals));
    }
    for refund in &report.refunds {
        println!("  refunded {} {} base units", refund.contributor.short().bold(), refund.amount);
    }
    println!("Status: {}", report.status.to_string().bold());
    Ok(())
}

fn cmd_prepare(args: ScenarioArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (scenario, config) = load(&args)?;
    let sim = Simulation::new(&scenario, config)?;
    sim.run_sale(&scenario)?;
    let Some(prepared) = sim.prepare()? else {
        let round = sim.engine.round(&sim.round)?;
        bail!(
            "round raised {} below its soft cap {}, nothing to prepare",
            round.total_raised,
            round.terms.soft_cap
        );
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
    } else {
        print_prepared(&prepared, sim.terms().token_decimals);
        for proof in &prepared.proofs {
            println!(
                "  {} {} ({} siblings)",
                proof.wallet.to_string().bold(),
                format_units(proof.amount, sim.terms().token_decimals),
                proof.siblings.len()
            );
        }
    }
    Ok(())
}

fn cmd_proof(args: ProofArgs, format: OutputFormat) -> anyhow::Result<()> {
    let wallet: Address = args
        .wallet
        .parse()
        .with_context(|| format!("invalid wallet {}", args.wallet))?;
    let (scenario, config) = load(&args.scenario)?;
    let sim = Simulation::new(&scenario, config)?;
    sim.run_sale(&scenario)?;
    sim.prepare()?;
    let found = sim.engine.proof(&sim.round, &wallet)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }
    match found {
        Some(lookup) => {
            println!("Wallet {}", lookup.wallet.to_string().bold());
            println!("  Amount: {}", format_units(lookup.amount, sim.terms().token_decimals));
            println!("  Root:   {}", lookup.root.to_string().cyan());
            for sibling in &lookup.siblings {
                println!("  - {sibling}");
            }
        }
        None => println!("{} {} not found", "✗".red(), wallet),
    }
    Ok(())
}

#[derive(Serialize)]
struct Verification {
    valid: bool,
    leaf: Digest,
    root: Digest,
}

fn cmd_verify(args: VerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let root = Digest::from_hex(&args.root).context("invalid root")?;
    let wallet: Address = args.wallet.parse().context("invalid wallet")?;
    let amount = parse_amount(&args.amount).context("invalid amount")?;
    let proof = args
        .proof
        .iter()
        .map(|s| Digest::from_hex(s).with_context(|| format!("invalid proof hash {s}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let vault: Address = args.vault.parse().context("invalid vault")?;
    let salt = ScheduleSalt::from_hex(&args.salt).context("invalid salt")?;

    let binding = LeafBinding::new(vault, ChainId(args.chain_id), salt);
    let leaf = AllocationLeaf::new(wallet, amount).hash(&binding);
    let valid = verify_proof(&root, &proof, &leaf);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&Verification { valid, leaf, root })?);
    } else if valid {
        println!("{} proof valid for {}", "✓".green().bold(), wallet);
    } else {
        println!("{} proof invalid for {}", "✗".red().bold(), wallet);
    }
    if !valid {
        bail!("proof does not verify against {root}");
    }
    Ok(())
}

fn print_prepared(prepared: &PreparedRound, decimals: u8) {
    let s = &prepared.settlement;
    println!("{} Prepared", "✓".green().bold());
    println!("  Root:        {}", prepared.root.to_string().cyan());
    println!(
        "  Leaves:      {}{}",
        prepared.leaf_count,
        if prepared.padded { " (padded)" } else { "" }
    );
    println!("  Raised:      {} base units", s.total_raised);
    println!("  Fee:         {} base units ({} bps)", s.fee_amount, s.fee_bps);
    println!("  Allocation:  {}", format_units(prepared.total_allocation, decimals));
    println!("  Liquidity:   {}", format_units(s.tokens_for_lp, decimals));
    println!("  Burn:        {}", format_units(s.unsold_to_burn, decimals));
    for wallet in &prepared.zero_token_contributors {
        println!("  {} {} bought zero tokens", "!".yellow(), wallet);
    }
}

/// Render base units as a decimal token quantity.
fn format_units(amount: Amount, decimals: u8) -> String {
    let Some(scale) = 10u128.checked_pow(u32::from(decimals)) else {
        return amount.to_string();
    };
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0width$}", width = usize::from(decimals));
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
