//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.

// ═══════════════════════════════════════════════════════════════════════════════
// ASSET CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Settlement asset decimals (USDC-style)
pub const SETTLEMENT_DECIMALS: u8 = 6;

/// One whole unit of the settlement asset
pub const SETTLEMENT_UNIT: u128 = 1_000_000;

/// One whole unit of the governance token (18 decimals)
pub const GOVERNANCE_UNIT: u128 = 1_000_000_000_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// FEE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Basis points divisor (10000 = 100%)
pub const BPS_DIVISOR: u128 = 10_000;

/// Origination fee - 0.8% (80 basis points)
pub const ORIGINATION_FEE_BPS: u128 = 80;

/// Denominator that reserves room for the origination fee in the max loan
pub const ORIGINATION_BUFFER_DENOMINATOR: u128 = BPS_DIVISOR + ORIGINATION_FEE_BPS;

/// Default protocol fee on harvested rewards - 5%
pub const DEFAULT_PROTOCOL_FEE_BPS: u128 = 500;

/// Default lender premium on harvested rewards - 20%
pub const DEFAULT_LENDER_PREMIUM_BPS: u128 = 2000;

/// Default fee on funds routed once a position is debt-free - 1%
pub const DEFAULT_ZERO_BALANCE_FEE_BPS: u128 = 100;

/// Upper bound for protocol fee + lender premium - 50%
pub const MAX_COMBINED_FEE_BPS: u128 = 5000;

/// Default flash loan fee (none)
pub const DEFAULT_FLASH_LOAN_FEE_BPS: u128 = 0;

// ═══════════════════════════════════════════════════════════════════════════════
// CAPACITY CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Divisor applied to the rewards rate
pub const REWARDS_RATE_DIVISOR: u128 = 1_000_000;

/// Scaling from governance-token weight (18 decimals) to settlement units (6 decimals)
pub const WEIGHT_TO_SETTLEMENT_SCALE: u128 = 1_000_000_000_000;

/// Default rewards rate (divided by REWARDS_RATE_DIVISOR)
pub const DEFAULT_REWARDS_RATE: u128 = 11_300;

/// Default capacity multiplier
pub const DEFAULT_MULTIPLIER: u128 = 12;

/// Pool utilization ceiling - 80%
pub const MAX_UTILIZATION_BPS: u128 = 8000;

/// Borrows must be strictly larger than 0.01 settlement units
pub const MIN_INCREASE_AMOUNT: u128 = SETTLEMENT_UNIT / 100;

/// Auto-reinvest share cannot exceed 100%
pub const MAX_INCREASE_PERCENTAGE_BPS: u128 = 10_000;

/// Auto-reinvest share cap while the position still carries debt - 25%
pub const MAX_INCREASE_PERCENTAGE_WITH_DEBT_BPS: u128 = 2500;

// ═══════════════════════════════════════════════════════════════════════════════
// SWAP CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Slippage tolerance on harvest swaps - 5%
pub const DEFAULT_SLIPPAGE_BPS: u128 = 500;

/// Number of observations used for TWAP quotes
pub const DEFAULT_TWAP_GRANULARITY: u32 = 3;

/// Maximum number of intermediate tokens considered for 2-hop routes
pub const MAX_SUPPORTED_INTERMEDIATES: usize = 3;

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Oracle price precision (8 decimals)
pub const PRICE_PRECISION: u128 = 100_000_000;

/// Lowest accepted settlement asset price - $0.999
pub const DEFAULT_PEG_FLOOR: u128 = 99_900_000;

/// Maximum price staleness in seconds (1 day)
pub const DEFAULT_MAX_PRICE_STALENESS_SECS: u64 = 86_400;

// ═══════════════════════════════════════════════════════════════════════════════
// TIME CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Length of a voting epoch - one week
pub const EPOCH_DURATION_SECS: u64 = 7 * 24 * 3600;

/// Votes are closed during the first and last hour of an epoch
pub const VOTE_WINDOW_BUFFER_SECS: u64 = 3600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_constants() {
        assert!(ORIGINATION_FEE_BPS < BPS_DIVISOR);
        assert!(DEFAULT_PROTOCOL_FEE_BPS + DEFAULT_LENDER_PREMIUM_BPS <= MAX_COMBINED_FEE_BPS);
        assert_eq!(ORIGINATION_BUFFER_DENOMINATOR, 10_080);
    }

    #[test]
    fn test_increase_caps() {
        assert!(MAX_INCREASE_PERCENTAGE_WITH_DEBT_BPS < MAX_INCREASE_PERCENTAGE_BPS);
        assert!(MAX_UTILIZATION_BPS < BPS_DIVISOR);
    }

    #[test]
    fn test_vote_window_fits_epoch() {
        assert!(2 * VOTE_WINDOW_BUFFER_SECS < EPOCH_DURATION_SECS);
    }
}
