use presale_types::{Address, Amount, TeamAllocationFormat};

/// Input that cannot produce a safe allocation. Raised before any tree is
/// built or any chain call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("tokens for sale is zero")]
    ZeroTokensForSale,

    #[error("price per token is zero")]
    ZeroPrice,

    #[error("round has no contributors")]
    NoContributors,

    #[error("no beneficiary is owed any tokens")]
    NoAllocations,

    #[error("token decimals {0} is out of range (max 36)")]
    InvalidDecimals(u8),

    #[error("{field} is {value} bps, above 10000")]
    BpsOutOfRange { field: &'static str, value: u16 },

    #[error("{field} is zero")]
    ZeroAmount { field: &'static str },

    #[error("{field} is the zero address")]
    ZeroAddress { field: &'static str },

    #[error("team shares sum to {sum}%, expected 100%")]
    TeamShareSum { sum: u32 },

    #[error("team wallet {0} is listed more than once")]
    DuplicateTeamWallet(Address),

    #[error("team wallets are set but the round has no team allocation")]
    TeamWalletsWithoutAllocation,

    #[error("team allocation {0} is set but the round has no team wallets")]
    TeamAllocationWithoutWallets(Amount),

    #[error("team allocation {value} has no declared format")]
    MissingTeamFormat { value: Amount },

    #[error("team allocation {value} is ambiguous: between 50 and 10000 with no supply to read it against")]
    AmbiguousTeamAllocation { value: Amount },

    #[error("team allocation {value} is out of range for format {format}")]
    TeamAllocationOutOfRange {
        value: Amount,
        format: TeamAllocationFormat,
    },

    #[error("team allocation format {0} needs a total supply")]
    MissingTotalSupply(TeamAllocationFormat),

    #[error("sold {sold} plus liquidity {for_lp} exceeds tokens for sale {for_sale}")]
    TokenSupplyExceeded {
        sold: Amount,
        for_lp: Amount,
        for_sale: Amount,
    },

    #[error("hard cap {hard_cap} is above the {max_raise} the tokens for sale can settle")]
    HardCapExceedsCapacity { hard_cap: Amount, max_raise: Amount },

    #[error("arithmetic overflow computing {0}")]
    ArithmeticOverflow(&'static str),

    #[error("division by zero computing {0}")]
    DivisionByZero(&'static str),
}
