//! Collateral positions and the registry that tracks them.
//!
//! This module implements the per-collateral accounting:
//! - Position creation and debt bookkeeping
//! - Payment splitting (fees first, then principal, then excess)
//! - Global totals for outstanding capital and escrow weight

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::ids::{Address, Hash, TokenId};
use crate::utils::math::*;
use crate::utils::validation::validate_increase_percentage;

// ═══════════════════════════════════════════════════════════════════════════════
// ZERO BALANCE OPTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Routing policy for harvested funds once a position owes nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZeroBalanceOption {
    /// Leave harvesting idle
    #[default]
    DoNothing,
    /// Deposit into the lending vault on behalf of the borrower
    InvestToVault,
    /// Transfer to the borrower, optionally in a preferred token
    PayToOwner,
    /// Swap into the governance token and grow the collateral lock
    ReinvestIntoCollateral,
}

impl ZeroBalanceOption {
    /// Check if harvesting is disabled for debt-free positions
    pub fn is_idle(&self) -> bool {
        matches!(self, ZeroBalanceOption::DoNothing)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Borrower-selected settings supplied when a loan is requested
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionOptions {
    /// Zero-balance routing policy
    pub zero_balance_option: ZeroBalanceOption,
    /// Share of harvested rewards compounded into the lock (bps)
    pub increase_percentage: u128,
    /// Payout token while debt-free under `PayToOwner`
    pub preferred_token: Option<Address>,
    /// Re-borrow to capacity after automated repayments
    pub top_up: bool,
}

impl PositionOptions {
    /// Options with a zero-balance policy and nothing else
    pub fn with_policy(zero_balance_option: ZeroBalanceOption) -> Self {
        Self {
            zero_balance_option,
            ..Self::default()
        }
    }

    /// Set the auto-reinvest share (builder style)
    pub fn increase_percentage(mut self, pct_bps: u128) -> Self {
        self.increase_percentage = pct_bps;
        self
    }

    /// Set the preferred token (builder style)
    pub fn preferred_token(mut self, token: Address) -> Self {
        self.preferred_token = Some(token);
        self
    }

    /// Enable automatic top-up (builder style)
    pub fn top_up(mut self, enabled: bool) -> Self {
        self.top_up = enabled;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Loan secured by one voting-escrow NFT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Collateral identifier
    pub token_id: TokenId,
    /// Beneficiary of the position
    pub borrower: Address,
    /// Total owed: principal plus unpaid origination fees
    pub balance: u128,
    /// Principal component of `balance`
    pub outstanding_capital: u128,
    /// Origination fees not yet collected
    pub unpaid_fees: u128,
    /// Escrow weight accounted to this position
    pub weight: u128,
    /// Routing policy once the position is debt-free
    pub zero_balance_option: ZeroBalanceOption,
    /// Payout token for `PayToOwner` while debt-free
    pub preferred_token: Option<Address>,
    /// Share of harvested rewards compounded into the lock (bps)
    pub increase_percentage: u128,
    /// Re-borrow to capacity after automated repayments
    pub top_up: bool,
    /// Borrower-selected pools; empty means the defaults apply
    pub pools: Vec<Address>,
    /// Weights matching `pools`
    pub pool_weights: Vec<u128>,
    /// Last successful vote
    pub vote_timestamp: u64,
    /// Last harvest
    pub claim_timestamp: u64,
    /// Creation time
    pub start_timestamp: u64,
}

/// How a payment was split across the debt components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentBreakdown {
    /// Portion collected as origination fees
    pub fees: u128,
    /// Portion returned to the vault as principal
    pub principal: u128,
    /// Portion beyond the balance owed
    pub excess: u128,
}

impl PaymentBreakdown {
    /// Total applied against the balance
    pub fn applied(&self) -> u128 {
        self.fees + self.principal
    }
}

impl Position {
    /// Create a debt-free position
    pub fn new(
        token_id: TokenId,
        borrower: Address,
        weight: u128,
        options: PositionOptions,
        timestamp: u64,
    ) -> Result<Self> {
        validate_increase_percentage(options.increase_percentage)?;
        Ok(Self {
            token_id,
            borrower,
            balance: 0,
            outstanding_capital: 0,
            unpaid_fees: 0,
            weight,
            zero_balance_option: options.zero_balance_option,
            preferred_token: options.preferred_token,
            increase_percentage: options.increase_percentage,
            top_up: options.top_up,
            pools: Vec::new(),
            pool_weights: Vec::new(),
            vote_timestamp: 0,
            claim_timestamp: 0,
            start_timestamp: timestamp,
        })
    }

    /// Check if nothing is owed
    pub fn is_debt_free(&self) -> bool {
        self.balance == 0
    }

    /// Check whether a caller is the recorded borrower
    pub fn is_borrower(&self, caller: &Address) -> bool {
        !self.borrower.is_zero() && self.borrower == *caller
    }

    /// Fail unless `caller` is the recorded borrower
    pub fn verify_borrower(&self, caller: &Address) -> Result<()> {
        if !self.is_borrower(caller) {
            return Err(Error::NotBorrower {
                token_id: self.token_id.to_string(),
                caller: caller.to_string(),
            });
        }
        Ok(())
    }

    /// Check whether the borrower picked their own pools
    pub fn has_custom_vote(&self) -> bool {
        !self.pools.is_empty()
    }

    /// Auto-reinvest share in effect; capped while debt remains
    pub fn effective_increase_percentage(&self) -> u128 {
        if self.balance > 0 {
            self.increase_percentage.min(MAX_INCREASE_PERCENTAGE_WITH_DEBT_BPS)
        } else {
            self.increase_percentage
        }
    }

    /// Add a borrow and its origination fee
    fn record_borrow(&mut self, amount: u128, fee: u128) -> Result<()> {
        self.balance = safe_add(self.balance, safe_add(amount, fee)?)?;
        self.unpaid_fees = safe_add(self.unpaid_fees, fee)?;
        self.outstanding_capital = safe_add(self.outstanding_capital, amount)?;
        Ok(())
    }

    /// Split a payment: unpaid fees first, then principal, remainder is excess
    fn apply_payment(&mut self, amount: u128) -> Result<PaymentBreakdown> {
        let fees = amount.min(self.unpaid_fees);
        let applied = amount.min(self.balance);

        self.unpaid_fees = safe_sub(self.unpaid_fees, fees)?;
        self.balance = safe_sub(self.balance, applied)?;

        let principal = safe_sub(applied, fees)?;
        self.outstanding_capital = self.outstanding_capital.saturating_sub(principal);

        Ok(PaymentBreakdown {
            fees,
            principal,
            excess: safe_sub(amount, applied)?,
        })
    }

    /// Check the per-position accounting invariants
    pub fn verify_invariant(&self) -> Result<()> {
        if self.balance < self.outstanding_capital {
            return Err(Error::InvariantViolation(format!(
                "position {}: balance {} < outstanding capital {}",
                self.token_id, self.balance, self.outstanding_capital
            )));
        }
        if self.unpaid_fees > self.balance {
            return Err(Error::InvariantViolation(format!(
                "position {}: unpaid fees {} > balance {}",
                self.token_id, self.unpaid_fees, self.balance
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// All active positions plus the global totals derived from them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRegistry {
    /// Positions keyed by collateral id
    positions: BTreeMap<TokenId, Position>,
    /// Position each borrower directs surplus rewards to
    payoff_tokens: BTreeMap<Address, TokenId>,
    /// Sum of `outstanding_capital` across positions
    total_outstanding_capital: u128,
    /// Sum of `weight` across positions
    total_weight: u128,
    /// Rewards harvested per epoch (settlement asset)
    epoch_harvest: BTreeMap<u64, u128>,
}

impl PositionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created position
    pub fn register(&mut self, position: Position) -> Result<()> {
        if self.positions.contains_key(&position.token_id) {
            return Err(Error::PositionAlreadyActive(position.token_id.to_string()));
        }
        self.total_weight = safe_add(self.total_weight, position.weight)?;
        self.positions.insert(position.token_id, position);
        Ok(())
    }

    /// Get a position by id
    pub fn get(&self, id: &TokenId) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Get a mutable position by id
    ///
    /// Only settings may be changed through this handle; debt and weight go
    /// through the registry so the totals stay consistent.
    pub fn get_mut(&mut self, id: &TokenId) -> Option<&mut Position> {
        self.positions.get_mut(id)
    }

    /// Get a position or fail with `PositionNotFound`
    pub fn require(&self, id: &TokenId) -> Result<&Position> {
        self.positions
            .get(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_string()))
    }

    /// Mutable variant of [`require`](Self::require)
    pub fn require_mut(&mut self, id: &TokenId) -> Result<&mut Position> {
        self.positions
            .get_mut(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_string()))
    }

    /// Check if a position exists
    pub fn contains(&self, id: &TokenId) -> bool {
        self.positions.contains_key(id)
    }

    /// Delete a position, releasing its weight and any payoff designation
    pub fn remove(&mut self, id: &TokenId) -> Option<Position> {
        let position = self.positions.remove(id)?;
        self.total_weight = self.total_weight.saturating_sub(position.weight);
        self.total_outstanding_capital = self
            .total_outstanding_capital
            .saturating_sub(position.outstanding_capital);
        if self.payoff_tokens.get(&position.borrower) == Some(id) {
            self.payoff_tokens.remove(&position.borrower);
        }
        Some(position)
    }

    /// Positions held by a borrower
    pub fn get_by_borrower(&self, borrower: &Address) -> Vec<&Position> {
        self.positions
            .values()
            .filter(|p| p.borrower == *borrower)
            .collect()
    }

    /// All positions, ordered by id
    pub fn all_positions(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }

    /// Number of active positions
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if there are no positions
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEBT ACCOUNTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a borrow on a position and in the global total
    pub fn record_borrow(&mut self, id: &TokenId, amount: u128, fee: u128) -> Result<()> {
        let total = safe_add(self.total_outstanding_capital, amount)?;
        self.require_mut(id)?.record_borrow(amount, fee)?;
        self.total_outstanding_capital = total;
        Ok(())
    }

    /// Apply a payment to a position and the global total
    pub fn apply_payment(&mut self, id: &TokenId, amount: u128) -> Result<PaymentBreakdown> {
        let position = self.require_mut(id)?;
        let before = position.outstanding_capital;
        let breakdown = position.apply_payment(amount)?;
        let reduced = before - position.outstanding_capital;
        self.total_outstanding_capital = safe_sub(self.total_outstanding_capital, reduced)?;
        Ok(breakdown)
    }

    /// Sum of outstanding principal
    pub fn total_outstanding_capital(&self) -> u128 {
        self.total_outstanding_capital
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WEIGHT ACCOUNTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add escrow weight to a position and the global total
    pub fn add_weight(&mut self, id: &TokenId, delta: u128) -> Result<()> {
        let total = safe_add(self.total_weight, delta)?;
        let position = self.require_mut(id)?;
        position.weight = safe_add(position.weight, delta)?;
        self.total_weight = total;
        Ok(())
    }

    /// Sum of accounted escrow weight
    pub fn total_weight(&self) -> u128 {
        self.total_weight
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PAYOFF TOKENS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Position a borrower directs surplus rewards to
    pub fn payoff_token(&self, borrower: &Address) -> Option<TokenId> {
        self.payoff_tokens.get(borrower).copied()
    }

    /// Set or clear a borrower's payoff position
    pub fn set_payoff_token(&mut self, borrower: Address, id: Option<TokenId>) {
        match id {
            Some(id) => {
                self.payoff_tokens.insert(borrower, id);
            }
            None => {
                self.payoff_tokens.remove(&borrower);
            }
        }
    }

    /// Clear a borrower's payoff designation if it points at `id`
    pub fn clear_payoff_token_if(&mut self, borrower: &Address, id: &TokenId) {
        if self.payoff_tokens.get(borrower) == Some(id) {
            self.payoff_tokens.remove(borrower);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EPOCH HARVEST
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record rewards harvested during an epoch
    pub fn record_harvest(&mut self, epoch: u64, amount: u128) -> Result<()> {
        let entry = self.epoch_harvest.entry(epoch).or_insert(0);
        *entry = safe_add(*entry, amount)?;
        Ok(())
    }

    /// Rewards harvested during an epoch
    pub fn epoch_harvest(&self, epoch: u64) -> u128 {
        self.epoch_harvest.get(&epoch).copied().unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INVARIANTS AND STATISTICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Check per-position and global invariants
    pub fn verify_invariants(&self) -> Result<()> {
        let mut capital = 0u128;
        let mut weight = 0u128;
        for position in self.positions.values() {
            position.verify_invariant()?;
            capital = safe_add(capital, position.outstanding_capital)?;
            weight = safe_add(weight, position.weight)?;
        }
        if capital != self.total_outstanding_capital {
            return Err(Error::InvariantViolation(format!(
                "sum of outstanding capital {} != total {}",
                capital, self.total_outstanding_capital
            )));
        }
        if weight != self.total_weight {
            return Err(Error::InvariantViolation(format!(
                "sum of weights {} != total {}",
                weight, self.total_weight
            )));
        }
        Ok(())
    }

    /// Calculate aggregate statistics
    pub fn statistics(&self) -> RegistryStatistics {
        let mut total_balance = 0u128;
        let mut total_unpaid_fees = 0u128;
        let mut indebted_positions = 0u64;

        for position in self.positions.values() {
            total_balance = total_balance.saturating_add(position.balance);
            total_unpaid_fees = total_unpaid_fees.saturating_add(position.unpaid_fees);
            if !position.is_debt_free() {
                indebted_positions += 1;
            }
        }

        RegistryStatistics {
            total_positions: self.positions.len() as u64,
            indebted_positions,
            total_balance,
            total_unpaid_fees,
            total_outstanding_capital: self.total_outstanding_capital,
            total_weight: self.total_weight,
        }
    }

    /// Serialize registry to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize registry from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Deterministic fingerprint of all positions and totals
    pub fn state_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.to_bytes()?))
    }
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_positions: u64,
    pub indebted_positions: u64,
    pub total_balance: u128,
    pub total_unpaid_fees: u128,
    pub total_outstanding_capital: u128,
    pub total_weight: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borrower() -> Address {
        Address::from_low_u64(0xb0)
    }

    fn test_position(id: u64, weight: u128) -> Position {
        Position::new(TokenId(id), borrower(), weight, PositionOptions::default(), 1_000).unwrap()
    }

    #[test]
    fn test_position_creation() {
        let position = test_position(1, 500);
        assert!(position.is_debt_free());
        assert!(position.is_borrower(&borrower()));
        assert!(!position.is_borrower(&Address::from_low_u64(1)));
        assert_eq!(position.start_timestamp, 1_000);
    }

    #[test]
    fn test_rejects_excessive_increase_percentage() {
        let options = PositionOptions::default().increase_percentage(10_001);
        assert!(Position::new(TokenId(1), borrower(), 0, options, 0).is_err());
    }

    #[test]
    fn test_increase_percentage_capped_with_debt() {
        let mut registry = PositionRegistry::new();
        let options = PositionOptions::default().increase_percentage(8_000);
        let position = Position::new(TokenId(1), borrower(), 0, options, 0).unwrap();
        registry.register(position).unwrap();

        assert_eq!(registry.get(&TokenId(1)).unwrap().effective_increase_percentage(), 8_000);
        registry.record_borrow(&TokenId(1), 100, 1).unwrap();
        assert_eq!(registry.get(&TokenId(1)).unwrap().effective_increase_percentage(), 2_500);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = PositionRegistry::new();
        registry.register(test_position(1, 10)).unwrap();
        let result = registry.register(test_position(1, 10));
        assert!(matches!(result, Err(Error::PositionAlreadyActive(_))));
    }

    #[test]
    fn test_borrow_and_payment_waterfall() {
        let mut registry = PositionRegistry::new();
        registry.register(test_position(1, 10)).unwrap();
        let id = TokenId(1);

        registry.record_borrow(&id, 992_000_000, 7_936_000).unwrap();
        let position = registry.get(&id).unwrap();
        assert_eq!(position.balance, 999_936_000);
        assert_eq!(position.outstanding_capital, 992_000_000);
        assert_eq!(registry.total_outstanding_capital(), 992_000_000);

        // Smaller than the unpaid fees: principal untouched
        let split = registry.apply_payment(&id, 5_000_000).unwrap();
        assert_eq!(split.fees, 5_000_000);
        assert_eq!(split.principal, 0);
        let position = registry.get(&id).unwrap();
        assert_eq!(position.balance, 994_936_000);
        assert_eq!(position.outstanding_capital, 992_000_000);

        // Overpayment: fees, then principal, then excess
        let split = registry.apply_payment(&id, 1_000_000_000).unwrap();
        assert_eq!(split.fees, 2_936_000);
        assert_eq!(split.principal, 992_000_000);
        assert_eq!(split.excess, 1_000_000_000 - 994_936_000);
        assert!(registry.get(&id).unwrap().is_debt_free());
        assert_eq!(registry.total_outstanding_capital(), 0);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn test_remove_releases_totals() {
        let mut registry = PositionRegistry::new();
        registry.register(test_position(1, 300)).unwrap();
        registry.register(test_position(2, 200)).unwrap();
        registry.set_payoff_token(borrower(), Some(TokenId(1)));
        assert_eq!(registry.total_weight(), 500);

        let removed = registry.remove(&TokenId(1)).unwrap();
        assert_eq!(removed.weight, 300);
        assert_eq!(registry.total_weight(), 200);
        assert_eq!(registry.payoff_token(&borrower()), None);
        assert!(registry.remove(&TokenId(1)).is_none());
    }

    #[test]
    fn test_weight_accounting() {
        let mut registry = PositionRegistry::new();
        registry.register(test_position(1, 100)).unwrap();
        registry.add_weight(&TokenId(1), 25).unwrap();
        assert_eq!(registry.get(&TokenId(1)).unwrap().weight, 125);
        assert_eq!(registry.total_weight(), 125);
        assert!(registry.add_weight(&TokenId(9), 1).is_err());
    }

    #[test]
    fn test_state_hash_changes_with_state() {
        let mut registry = PositionRegistry::new();
        let empty = registry.state_hash().unwrap();
        registry.register(test_position(1, 100)).unwrap();
        assert_ne!(empty, registry.state_hash().unwrap());

        let bytes = registry.to_bytes().unwrap();
        let restored = PositionRegistry::from_bytes(&bytes).unwrap();
        assert_eq!(restored.state_hash().unwrap(), registry.state_hash().unwrap());
    }

    #[test]
    fn test_statistics() {
        let mut registry = PositionRegistry::new();
        registry.register(test_position(1, 100)).unwrap();
        registry.register(test_position(2, 100)).unwrap();
        registry.record_borrow(&TokenId(2), 1_000, 8).unwrap();

        let stats = registry.statistics();
        assert_eq!(stats.total_positions, 2);
        assert_eq!(stats.indebted_positions, 1);
        assert_eq!(stats.total_balance, 1_008);
        assert_eq!(stats.total_unpaid_fees, 8);
    }
}
