//! Lending vault share accounting.
//!
//! The vault's on-hand liquidity lives in the token ledger; this module only
//! tracks lender shares against `total_assets = on_hand + outstanding_capital`:
//! - Deposits mint shares, redemptions and withdrawals burn them
//! - Withdrawals are bounded by on-hand liquidity
//! - Lender premiums are recorded per epoch as realized yield

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::ids::Address;
use crate::utils::math::*;

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT ASSETS
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the assets backing vault shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VaultAssets {
    /// Settlement asset held by the vault
    pub on_hand: u128,
    /// Principal lent to positions
    pub outstanding_capital: u128,
}

impl VaultAssets {
    /// Create a snapshot
    pub fn new(on_hand: u128, outstanding_capital: u128) -> Self {
        Self {
            on_hand,
            outstanding_capital,
        }
    }

    /// Assets backing shares
    pub fn total(&self) -> Result<u128> {
        safe_add(self.on_hand, self.outstanding_capital)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LENDING VAULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Share ledger of the lending vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingVault {
    /// Shares by holder
    shares: BTreeMap<Address, u128>,
    /// Sum of all shares
    total_shares: u128,
    /// Lender premium received per epoch
    epoch_rewards: BTreeMap<u64, u128>,
}

impl LendingVault {
    /// Create an empty vault
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares minted for `assets`, rounding down
    pub fn convert_to_shares(&self, assets: u128, vault: VaultAssets) -> Result<u128> {
        let total = vault.total()?;
        if self.total_shares == 0 || total == 0 {
            return Ok(assets);
        }
        mul_div(assets, self.total_shares, total)
    }

    /// Assets redeemable for `shares`, rounding down
    pub fn convert_to_assets(&self, shares: u128, vault: VaultAssets) -> Result<u128> {
        if self.total_shares == 0 {
            return Ok(shares);
        }
        mul_div(shares, vault.total()?, self.total_shares)
    }

    /// Shares burned to withdraw exactly `assets`, rounding up
    pub fn preview_withdraw(&self, assets: u128, vault: VaultAssets) -> Result<u128> {
        let total = vault.total()?;
        if self.total_shares == 0 || total == 0 {
            return Ok(assets);
        }
        mul_div_up(assets, self.total_shares, total)
    }

    /// Mint shares for a deposit of `assets`
    ///
    /// `vault` must describe the state before the deposit lands.
    pub fn deposit(&mut self, assets: u128, receiver: Address, vault: VaultAssets) -> Result<u128> {
        if assets == 0 {
            return Err(Error::ZeroAmount);
        }
        let shares = self.convert_to_shares(assets, vault)?;
        if shares == 0 {
            return Err(Error::InvalidParameter {
                name: "assets".into(),
                reason: "deposit too small to mint shares".into(),
            });
        }
        self.mint(receiver, shares)?;
        Ok(shares)
    }

    /// Burn `shares` and return the assets owed
    pub fn redeem(&mut self, shares: u128, owner: Address, vault: VaultAssets) -> Result<u128> {
        if shares == 0 {
            return Err(Error::ZeroAmount);
        }
        let assets = self.convert_to_assets(shares, vault)?;
        Self::check_liquidity(assets, vault)?;
        self.burn(owner, shares)?;
        Ok(assets)
    }

    /// Burn the shares needed to withdraw exactly `assets`
    pub fn withdraw(&mut self, assets: u128, owner: Address, vault: VaultAssets) -> Result<u128> {
        if assets == 0 {
            return Err(Error::ZeroAmount);
        }
        Self::check_liquidity(assets, vault)?;
        let shares = self.preview_withdraw(assets, vault)?;
        self.burn(owner, shares)?;
        Ok(shares)
    }

    /// Largest amount `owner` can withdraw right now
    pub fn max_withdraw(&self, owner: &Address, vault: VaultAssets) -> Result<u128> {
        let assets = self.convert_to_assets(self.shares_of(owner), vault)?;
        Ok(assets.min(vault.on_hand))
    }

    /// Shares held by an account
    pub fn shares_of(&self, owner: &Address) -> u128 {
        self.shares.get(owner).copied().unwrap_or(0)
    }

    /// Total shares outstanding
    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    /// Record lender premium received during an epoch
    pub fn record_epoch_rewards(&mut self, epoch: u64, amount: u128) -> Result<()> {
        let entry = self.epoch_rewards.entry(epoch).or_insert(0);
        *entry = safe_add(*entry, amount)?;
        Ok(())
    }

    /// Lender premium received during an epoch
    pub fn epoch_rewards(&self, epoch: u64) -> u128 {
        self.epoch_rewards.get(&epoch).copied().unwrap_or(0)
    }

    /// Verify the share ledger sums to the total
    pub fn verify_invariant(&self) -> bool {
        let sum: u128 = self.shares.values().sum();
        sum == self.total_shares
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn check_liquidity(assets: u128, vault: VaultAssets) -> Result<()> {
        if assets > vault.on_hand {
            return Err(Error::InsufficientLiquidity {
                required: assets,
                available: vault.on_hand,
            });
        }
        Ok(())
    }

    fn mint(&mut self, receiver: Address, shares: u128) -> Result<()> {
        let total = safe_add(self.total_shares, shares)?;
        let entry = self.shares.entry(receiver).or_insert(0);
        *entry = safe_add(*entry, shares)?;
        self.total_shares = total;
        Ok(())
    }

    fn burn(&mut self, owner: Address, shares: u128) -> Result<()> {
        let held = self.shares_of(&owner);
        if held < shares {
            return Err(Error::InsufficientBalance {
                token: "vault shares".into(),
                required: shares,
                available: held,
            });
        }
        if held == shares {
            self.shares.remove(&owner);
        } else {
            self.shares.insert(owner, held - shares);
        }
        self.total_shares = safe_sub(self.total_shares, shares)?;
        Ok(())
    }
}
