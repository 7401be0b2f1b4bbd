use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "presale",
    about = "Presale finalization engine: allocations, Merkle proofs, settlement",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a scenario through its whole lifecycle on a simulated chain
    Simulate(SimulateArgs),
    /// Compute allocations and the Merkle root for a scenario
    Prepare(ScenarioArgs),
    /// Look up one wallet's allocation proof
    Proof(ProofArgs),
    /// Check a proof against a root without running anything
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct ScenarioArgs {
    /// Scenario TOML file
    pub scenario: PathBuf,
    /// Engine configuration TOML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,
    /// Stop after finalization; skip settlement, claims, and refunds
    #[arg(long)]
    pub no_settle: bool,
}

#[derive(Args)]
pub struct ProofArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,
    /// Wallet address (0x-prefixed hex)
    pub wallet: String,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[arg(long)]
    pub root: String,
    #[arg(long)]
    pub wallet: String,
    /// Allocation in token base units
    #[arg(long)]
    pub amount: String,
    /// Sibling hashes, leaf to root
    #[arg(long, value_delimiter = ',')]
    pub proof: Vec<String>,
    #[arg(long)]
    pub vault: String,
    #[arg(long)]
    pub chain_id: u64,
    #[arg(long)]
    pub salt: String,
}
