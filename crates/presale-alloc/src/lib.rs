//! Allocation calculator for the presale engine.
//!
//! A pure function from a round's confirmed contributions and sale
//! parameters to per-beneficiary token allocations plus the fee, liquidity,
//! and burn quantities settlement acts on.
//!
//! All arithmetic is integer. Products go through [`mul_div`], which keeps a
//! 256-bit intermediate so `amount * 10^decimals` cannot overflow, and every
//! division truncates. Nothing here rounds up, so the sum of allocations can
//! never exceed what the sale parameters allow.

pub mod calculator;
pub mod error;
pub mod liquidity;
pub mod math;
pub mod team;

pub use calculator::{AllocationCalculator, AllocationInputs, AllocationPlan};
pub use error::ValidationError;
pub use liquidity::{liquidity_plan, max_raise, LiquidityPlan};
pub use math::{apply_bps, mul_div, pow10, tokens_for_amount};
pub use team::{distribute_team_tokens, resolve_team_tokens, validate_team_wallets, ResolvedTeam};
