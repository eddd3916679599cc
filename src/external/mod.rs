//! Interfaces to the services the engine depends on.
//!
//! The engine never owns tokens, escrow locks or votes itself; it drives them
//! through these traits:
//! - **TokenLedger**: fungible balances and allowances
//! - **VotingEscrow**: collateral NFTs, locks and escrow weight
//! - **Voter**: epoch votes and fee/bribe claims
//! - **RebaseDistributor**: rebase issuance to lock holders
//! - **SwapVenue**: pool lookup, TWAP quotes and swaps
//! - **PriceOracle**: settlement asset price
//! - **Clock** and **Transactional**: time and atomicity of the host
//!
//! [`memory::SimulatedChain`] implements all of them in memory.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::ids::{Address, TokenId};

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Fungible token balances
pub trait TokenLedger {
    /// Balance of `account` in `token`
    fn balance_of(&self, token: &Address, account: &Address) -> u128;

    /// Move tokens out of an account the engine controls
    fn transfer(&mut self, token: &Address, from: &Address, to: &Address, amount: u128) -> Result<()>;

    /// Set the amount `spender` may pull from `owner`
    fn approve(&mut self, token: &Address, owner: &Address, spender: &Address, amount: u128);

    /// Amount `spender` may pull from `owner`
    fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> u128;

    /// Pull tokens from `from` using the allowance granted to `spender`
    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOTING ESCROW
// ═══════════════════════════════════════════════════════════════════════════════

/// Lock backing a voting-escrow NFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockedBalance {
    /// Governance tokens locked
    pub amount: u128,
    /// Unlock time; ignored for permanent locks
    pub end: u64,
    /// Lock never decays
    pub is_permanent: bool,
}

impl LockedBalance {
    /// Check if a finite lock has run out at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        !self.is_permanent && self.end <= now
    }
}

/// Voting-escrow NFTs used as collateral
pub trait VotingEscrow {
    /// Governance token held by the escrow
    fn escrow_token(&self) -> Address;

    /// Current holder of an NFT
    fn owner_of(&self, id: TokenId) -> Result<Address>;

    /// Lock behind an NFT
    fn locked(&self, id: TokenId) -> Result<LockedBalance>;

    /// Convert a finite lock to a permanent one
    fn lock_permanent(&mut self, id: TokenId) -> Result<()>;

    /// Voting weight of an NFT at `timestamp`
    fn balance_of_nft_at(&self, id: TokenId, timestamp: u64) -> u128;

    /// Add governance tokens from `payer` to an existing lock
    fn increase_amount(&mut self, payer: &Address, id: TokenId, amount: u128) -> Result<()>;

    /// Fold the lock of `from` into `to`, burning `from`; `caller` must hold both
    fn merge(&mut self, caller: &Address, from: TokenId, to: TokenId) -> Result<()>;

    /// Move an NFT between holders (`transferFrom` on the escrow)
    fn transfer_nft(&mut self, from: &Address, to: &Address, id: TokenId) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Epoch voting and reward claims
pub trait Voter {
    /// Cast the NFT's vote for this epoch
    fn vote(&mut self, id: TokenId, pools: &[Address], weights: &[u128]) -> Result<()>;

    /// Refresh an existing vote with the NFT's current weight
    fn poke(&mut self, id: TokenId) -> Result<()>;

    /// Timestamp of the NFT's last vote (0 if never)
    fn last_voted(&self, id: TokenId) -> u64;

    /// Gauge attached to a pool
    fn gauges(&self, pool: &Address) -> Option<Address>;

    /// Fee reward contract of a gauge
    fn gauge_to_fees(&self, gauge: &Address) -> Option<Address>;

    /// Bribe reward contract of a gauge
    fn gauge_to_bribe(&self, gauge: &Address) -> Option<Address>;

    /// Claim `tokens` from each reward contract into the NFT holder's account
    fn claim_fees(&mut self, reward_contracts: &[Address], tokens: &[Vec<Address>], id: TokenId) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// REBASE DISTRIBUTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Rebase issuance credited to escrow locks
pub trait RebaseDistributor {
    /// Rebase claimable by an NFT
    fn claimable(&self, id: TokenId) -> u128;

    /// Claim the rebase into the NFT's lock, returning the amount added
    fn claim(&mut self, id: TokenId) -> Result<u128>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SWAP VENUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Pools and router used to convert reward tokens
pub trait SwapVenue {
    /// Check if a pool exists between two tokens
    fn has_pool(&self, token_a: &Address, token_b: &Address) -> bool;

    /// Time-weighted quote for one hop over `granularity` observations
    fn quote(&self, from: &Address, to: &Address, amount_in: u128, granularity: u32) -> Result<u128>;

    /// Expected outputs along `path` at spot prices (`getAmountsOut`)
    fn get_amounts_out(&self, amount_in: u128, path: &[Address]) -> Result<Vec<u128>>;

    /// Swap along `path`, pulling from `payer` and paying `recipient`
    /// (`swapExactTokensForTokens`); fails if output is below `amount_out_min`
    fn swap_exact_tokens_for_tokens(
        &mut self,
        amount_in: u128,
        amount_out_min: u128,
        path: &[Address],
        payer: &Address,
        recipient: &Address,
    ) -> Result<u128>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE ORACLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Price observation (1e8 scale)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceData {
    /// Price in USD with 8 decimals
    pub price: u128,
    /// When the price was published
    pub updated_at: u64,
}

/// Settlement asset price feed
pub trait PriceOracle {
    /// Latest price of `asset`
    fn latest_price(&self, asset: &Address) -> Result<PriceData>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST
// ═══════════════════════════════════════════════════════════════════════════════

/// Host time source
pub trait Clock {
    /// Current timestamp in seconds
    fn now(&self) -> u64;
}

/// Host-level atomicity; sections may nest
pub trait Transactional {
    /// Open an atomic section
    fn begin(&mut self);

    /// Keep the effects of the innermost section
    fn commit(&mut self);

    /// Undo the effects of the innermost section
    fn rollback(&mut self);
}

/// Everything the engine needs from its host
pub trait Environment:
    TokenLedger + VotingEscrow + Voter + RebaseDistributor + SwapVenue + PriceOracle + Clock + Transactional
{
}

impl<T> Environment for T where
    T: TokenLedger + VotingEscrow + Voter + RebaseDistributor + SwapVenue + PriceOracle + Clock + Transactional
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expiry() {
        let finite = LockedBalance {
            amount: 10,
            end: 100,
            is_permanent: false,
        };
        assert!(!finite.is_expired(99));
        assert!(finite.is_expired(100));

        let permanent = LockedBalance {
            is_permanent: true,
            ..finite
        };
        assert!(!permanent.is_expired(1_000));
    }
}
