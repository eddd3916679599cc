//! Input validation utilities.
//!
//! Validation functions to ensure inputs meet engine requirements before
//! any state is touched.

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::ids::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an amount is non-zero
pub fn validate_non_zero(amount: u128) -> Result<()> {
    if amount == 0 {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

/// Validate a borrow amount is above the minimum increase
pub fn validate_increase_amount(amount: u128) -> Result<()> {
    if amount <= MIN_INCREASE_AMOUNT {
        return Err(Error::AmountTooSmall {
            amount,
            minimum: MIN_INCREASE_AMOUNT,
        });
    }
    Ok(())
}

/// Validate a basis-point value does not exceed 100%
pub fn validate_bps(value: u128, name: &str) -> Result<()> {
    if value > BPS_DIVISOR {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: format!("{} bps exceeds {}", value, BPS_DIVISOR),
        });
    }
    Ok(())
}

/// Validate an auto-reinvest percentage
pub fn validate_increase_percentage(pct_bps: u128) -> Result<()> {
    if pct_bps > MAX_INCREASE_PERCENTAGE_BPS {
        return Err(Error::InvalidParameter {
            name: "increase_percentage".into(),
            reason: format!("{} bps exceeds {}", pct_bps, MAX_INCREASE_PERCENTAGE_BPS),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate an address is set
pub fn validate_address(address: &Address, name: &str) -> Result<()> {
    if address.is_zero() {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: "zero address".into(),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOTE VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate a pool/weight vote vector
pub fn validate_vote(pools: &[Address], weights: &[u128]) -> Result<()> {
    if pools.is_empty() {
        return Err(Error::InvalidParameter {
            name: "pools".into(),
            reason: "at least one pool required".into(),
        });
    }
    if pools.len() != weights.len() {
        return Err(Error::InvalidParameter {
            name: "weights".into(),
            reason: format!("{} pools but {} weights", pools.len(), weights.len()),
        });
    }
    if weights.iter().any(|w| *w == 0) {
        return Err(Error::InvalidParameter {
            name: "weights".into(),
            reason: "weights must be non-zero".into(),
        });
    }
    for (i, pool) in pools.iter().enumerate() {
        validate_address(pool, "pool")?;
        if pools[..i].contains(pool) {
            return Err(Error::InvalidParameter {
                name: "pools".into(),
                reason: format!("duplicate pool {}", pool),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_increase_amount() {
        assert!(validate_increase_amount(MIN_INCREASE_AMOUNT).is_err());
        assert!(validate_increase_amount(MIN_INCREASE_AMOUNT + 1).is_ok());
    }

    #[test]
    fn test_validate_bps() {
        assert!(validate_bps(10_000, "fee").is_ok());
        assert!(validate_bps(10_001, "fee").is_err());
    }

    #[test]
    fn test_validate_vote() {
        let a = Address::from_low_u64(1);
        let b = Address::from_low_u64(2);
        assert!(validate_vote(&[a, b], &[50, 50]).is_ok());
        assert!(validate_vote(&[], &[]).is_err());
        assert!(validate_vote(&[a], &[1, 2]).is_err());
        assert!(validate_vote(&[a, a], &[1, 2]).is_err());
        assert!(validate_vote(&[a], &[0]).is_err());
        assert!(validate_vote(&[Address::ZERO], &[1]).is_err());
    }
}
