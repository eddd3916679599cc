//! Checked arithmetic for settlement amounts and escrow weights.
//!
//! All amounts are `u128` so 18-decimal escrow weights and 6-decimal settlement
//! amounts share one representation. Every operation reports overflow instead
//! of wrapping.

use crate::error::{Error, Result};
use crate::utils::constants::{BPS_DIVISOR, EPOCH_DURATION_SECS};

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn safe_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

/// Computes `(a * b) / c`, rounding down
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }
    Ok(safe_mul(a, b)? / c)
}

/// Computes `(a * b) / c`, rounding up
pub fn mul_div_up(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }
    let numerator = safe_mul(a, b)?;
    Ok(numerator / c + u128::from(numerator % c != 0))
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEE CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Calculate fee in basis points
pub fn calculate_fee_bps(amount: u128, fee_bps: u128) -> Result<u128> {
    mul_div(amount, fee_bps, BPS_DIVISOR)
}

/// Calculate amount after fee deduction
pub fn amount_after_fee(amount: u128, fee_bps: u128) -> Result<u128> {
    let fee = calculate_fee_bps(amount, fee_bps)?;
    safe_sub(amount, fee)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EPOCH HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Start of the epoch containing `timestamp`
pub fn epoch_start(timestamp: u64) -> u64 {
    timestamp - timestamp % EPOCH_DURATION_SECS
}

/// Start of the epoch following the one containing `timestamp`
pub fn epoch_next(timestamp: u64) -> u64 {
    epoch_start(timestamp) + EPOCH_DURATION_SECS
}

/// Sequential epoch number for `timestamp`
pub fn epoch_index(timestamp: u64) -> u64 {
    timestamp / EPOCH_DURATION_SECS
}
