//! Borrowing capacity.
//!
//! Capacity comes from two independent limits:
//! - Collateral: escrow weight times rewards rate and multiplier, less a
//!   reservation for the origination fee
//! - Liquidity: the vault may not be utilized beyond its ceiling
//!
//! The calculation is pure and is recomputed from live state on every borrow.

use serde::{Deserialize, Serialize};

use crate::core::config::RateParameters;
use crate::error::Result;
use crate::utils::constants::*;
use crate::utils::math::*;

/// Inputs to the capacity calculation, read fresh at the moment of use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityInputs {
    /// Current escrow weight of the collateral
    pub weight: u128,
    /// Amount the position already owes
    pub balance: u128,
    /// Settlement asset held by the vault
    pub pool_balance: u128,
    /// Principal lent out across all positions
    pub total_outstanding_capital: u128,
}

/// Result of the capacity calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaxLoan {
    /// Additional amount the position may borrow now
    pub max_loan: u128,
    /// Collateral-derived capacity before fee reservation and pool limits
    pub max_loan_ignoring_supply: u128,
}

/// Collateral-derived capacity, ignoring the vault
pub fn capacity_from_weight(weight: u128, rates: &RateParameters) -> Result<u128> {
    let scaled = mul_div(weight, rates.rewards_rate, REWARDS_RATE_DIVISOR)?;
    mul_div(scaled, rates.multiplier, WEIGHT_TO_SETTLEMENT_SCALE)
}

/// Smallest escrow weight whose collateral-derived capacity reaches `capacity`
pub fn weight_for_capacity(capacity: u128, rates: &RateParameters) -> Result<u128> {
    let scaled = mul_div_up(capacity, WEIGHT_TO_SETTLEMENT_SCALE, rates.multiplier)?;
    mul_div_up(scaled, REWARDS_RATE_DIVISOR, rates.rewards_rate)
}

/// Highest principal the vault can have lent out
pub fn utilization_ceiling(
    pool_balance: u128,
    total_outstanding_capital: u128,
    max_utilization_bps: u128,
) -> Result<u128> {
    let total_assets = safe_add(pool_balance, total_outstanding_capital)?;
    mul_div(total_assets, max_utilization_bps, BPS_DIVISOR)
}

/// Compute the borrowing capacity of a position
pub fn calculate_max_loan(
    inputs: CapacityInputs,
    rates: &RateParameters,
    max_utilization_bps: u128,
) -> Result<MaxLoan> {
    let max_loan_ignoring_supply = capacity_from_weight(inputs.weight, rates)?;
    let collateral_cap = mul_div(
        max_loan_ignoring_supply,
        BPS_DIVISOR,
        ORIGINATION_BUFFER_DENOMINATOR,
    )?;

    let ceiling = utilization_ceiling(
        inputs.pool_balance,
        inputs.total_outstanding_capital,
        max_utilization_bps,
    )?;

    if inputs.total_outstanding_capital > ceiling || inputs.balance > collateral_cap {
        return Ok(MaxLoan {
            max_loan: 0,
            max_loan_ignoring_supply,
        });
    }

    let max_loan = (collateral_cap - inputs.balance)
        .min(ceiling - inputs.total_outstanding_capital)
        .min(inputs.pool_balance);

    tracing::debug!(
        weight = %inputs.weight,
        balance = %inputs.balance,
        collateral_cap = %collateral_cap,
        ceiling = %ceiling,
        max_loan = %max_loan,
        "capacity computed"
    );

    Ok(MaxLoan {
        max_loan,
        max_loan_ignoring_supply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_for(usdc: u128) -> u128 {
        weight_for_capacity(usdc * SETTLEMENT_UNIT, &RateParameters::default()).unwrap()
    }

    fn liquid(weight: u128) -> CapacityInputs {
        CapacityInputs {
            weight,
            balance: 0,
            pool_balance: 1_000_000 * SETTLEMENT_UNIT,
            total_outstanding_capital: 0,
        }
    }

    #[test]
    fn test_fee_reservation() {
        let rates = RateParameters::default();
        let result = calculate_max_loan(liquid(weight_for(1_000)), &rates, MAX_UTILIZATION_BPS).unwrap();

        assert_eq!(result.max_loan_ignoring_supply, 1_000 * SETTLEMENT_UNIT);
        // 1000 * 10000 / 10080
        assert_eq!(result.max_loan, 992_063_492);
    }

    #[test]
    fn test_existing_balance_reduces_capacity() {
        let rates = RateParameters::default();
        let mut inputs = liquid(weight_for(1_000));
        inputs.balance = 500 * SETTLEMENT_UNIT;
        let result = calculate_max_loan(inputs, &rates, MAX_UTILIZATION_BPS).unwrap();
        assert_eq!(result.max_loan, 492_063_492);

        inputs.balance = 993 * SETTLEMENT_UNIT;
        let result = calculate_max_loan(inputs, &rates, MAX_UTILIZATION_BPS).unwrap();
        assert_eq!(result.max_loan, 0);
        assert_eq!(result.max_loan_ignoring_supply, 1_000 * SETTLEMENT_UNIT);
    }

    #[test]
    fn test_utilization_ceiling() {
        let rates = RateParameters::default();
        let inputs = CapacityInputs {
            weight: weight_for(10_000),
            balance: 0,
            pool_balance: 300 * SETTLEMENT_UNIT,
            total_outstanding_capital: 700 * SETTLEMENT_UNIT,
        };
        // ceiling = 800, already lent 700
        let result = calculate_max_loan(inputs, &rates, MAX_UTILIZATION_BPS).unwrap();
        assert_eq!(result.max_loan, 100 * SETTLEMENT_UNIT);
    }

    #[test]
    fn test_over_utilized_pool() {
        let rates = RateParameters::default();
        let inputs = CapacityInputs {
            weight: weight_for(10_000),
            balance: 0,
            pool_balance: 100 * SETTLEMENT_UNIT,
            total_outstanding_capital: 900 * SETTLEMENT_UNIT,
        };
        let result = calculate_max_loan(inputs, &rates, MAX_UTILIZATION_BPS).unwrap();
        assert_eq!(result.max_loan, 0);
        assert_eq!(result.max_loan_ignoring_supply, 10_000 * SETTLEMENT_UNIT);
    }

    #[test]
    fn test_weight_for_capacity_is_tight() {
        let rates = RateParameters::default();
        for usdc in [1u128, 7, 1_000, 123_456] {
            let weight = weight_for(usdc);
            assert_eq!(capacity_from_weight(weight, &rates).unwrap(), usdc * SETTLEMENT_UNIT);
            assert!(capacity_from_weight(weight - 1, &rates).unwrap() < usdc * SETTLEMENT_UNIT);
        }
    }

    #[test]
    fn test_zero_weight() {
        let rates = RateParameters::default();
        let result = calculate_max_loan(liquid(0), &rates, MAX_UTILIZATION_BPS).unwrap();
        assert_eq!(result, MaxLoan::default());
    }
}
