//! Loan engine - core orchestration of positions, vault and host.
//!
//! The engine is the central coordinator for all lending operations. Every
//! public mutating operation runs as one atomic section: if it fails, engine
//! state, emitted events and host state are all restored.
//!
//! Operations are spread over several modules:
//! - this module: lifecycle, voting, vault liquidity and views
//! - `waterfall`: payment application and zero-balance routing
//! - `harvest::claim`: reward harvesting
//! - `market`, `admin`: market integration and configuration

use serde::{Deserialize, Serialize};

use crate::core::config::EngineConfig;
use crate::core::max_loan::{calculate_max_loan, CapacityInputs, MaxLoan};
use crate::core::position::{Position, PositionOptions, PositionRegistry, RegistryStatistics, ZeroBalanceOption};
use crate::core::vault::{LendingVault, VaultAssets};
use crate::error::{Error, Result};
use crate::external::Environment;
use crate::protocol::events::*;
use crate::protocol::guard::ReentrancyGuard;
use crate::utils::constants::*;
use crate::utils::ids::{Address, Hash, TokenId};
use crate::utils::math::*;
use crate::utils::validation::*;

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent engine state, snapshotted around every operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Configuration
    pub config: EngineConfig,
    /// Positions and global totals
    pub registry: PositionRegistry,
    /// Lender share ledger
    pub vault: LendingVault,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOAN ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Lending engine over voting-escrow collateral
pub struct LoanEngine<E: Environment> {
    /// Host services
    pub(crate) env: E,
    /// Positions, vault shares and configuration
    pub(crate) state: EngineState,
    /// Events since the last drain
    pub(crate) events: EventLog,
    /// Lock around value-moving operations
    pub(crate) guard: ReentrancyGuard,
    /// Lock around flash loans
    pub(crate) flash_guard: ReentrancyGuard,
}

impl<E: Environment> LoanEngine<E> {
    /// Create an engine over `env`
    pub fn new(config: EngineConfig, env: E) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            owner = %config.owner,
            engine = %config.engine,
            vault = %config.vault,
            "loan engine initialized"
        );
        Ok(Self {
            env,
            state: EngineState {
                config,
                registry: PositionRegistry::new(),
                vault: LendingVault::new(),
            },
            events: EventLog::new(),
            guard: ReentrancyGuard::new(),
            flash_guard: ReentrancyGuard::new(),
        })
    }

    /// Restore an engine from serialized state
    pub fn from_bytes(bytes: &[u8], env: E) -> Result<Self> {
        let state: EngineState =
            bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        state.config.validate()?;
        state.registry.verify_invariants()?;
        Ok(Self {
            env,
            state,
            events: EventLog::new(),
            guard: ReentrancyGuard::new(),
            flash_guard: ReentrancyGuard::new(),
        })
    }

    /// Serialize engine state
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.state).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deterministic fingerprint of engine state
    pub fn state_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.to_bytes()?))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATOMICITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run `op` atomically: on error, engine state, events and host are restored
    pub(crate) fn atomic<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.state.clone();
        let events = self.events.len();
        self.env.begin();

        match op(self) {
            Ok(value) => {
                self.env.commit();
                Ok(value)
            }
            Err(e) => {
                self.state = snapshot;
                self.events.truncate(events);
                self.env.rollback();
                tracing::debug!(error = %e, code = e.code(), "operation reverted");
                Err(e)
            }
        }
    }

    /// Run `op` atomically under the reentrancy lock
    pub(crate) fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.guard.enter()?;
        let result = self.atomic(op);
        self.guard.exit();
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit a voting-escrow NFT as collateral and optionally borrow
    ///
    /// With `top_up` set, `amount` is replaced by the fresh maximum loan.
    /// Returns the amount borrowed.
    pub fn request_loan(
        &mut self,
        caller: Address,
        id: TokenId,
        amount: u128,
        options: PositionOptions,
    ) -> Result<u128> {
        self.guarded(|engine| engine.open_position(caller, id, amount, options))
    }

    fn open_position(
        &mut self,
        caller: Address,
        id: TokenId,
        amount: u128,
        options: PositionOptions,
    ) -> Result<u128> {
        if self.state.registry.contains(&id) {
            return Err(Error::PositionAlreadyActive(id.to_string()));
        }
        if self.env.owner_of(id)? != caller {
            return Err(Error::NotTokenOwner {
                token_id: id.to_string(),
                caller: caller.to_string(),
            });
        }
        if let Some(token) = options.preferred_token {
            self.verify_approved_token(&token)?;
        }

        let now = self.env.now();
        let lock = self.env.locked(id)?;
        if lock.is_expired(now) {
            return Err(Error::TokenLockExpired(id.to_string()));
        }
        if !lock.is_permanent {
            self.env.lock_permanent(id)?;
        }

        let engine = self.state.config.engine;
        self.env.transfer_nft(&caller, &engine, id)?;
        self.verify_custody(id)?;

        let weight = self.env.balance_of_nft_at(id, now);
        let top_up = options.top_up;
        let position = Position::new(id, caller, weight, options, now)?;
        self.state.registry.register(position)?;

        tracing::info!(token_id = %id, borrower = %caller, weight = %weight, "loan requested");

        self.vote_if_eligible(id);

        let amount = if top_up { self.get_max_loan(id)?.max_loan } else { amount };
        self.emit(LoanEvent::LoanRequested(LoanRequestedEvent {
            token_id: id,
            borrower: caller,
            weight,
            amount,
            timestamp: now,
        }));

        if amount == 0 || (top_up && amount <= MIN_INCREASE_AMOUNT) {
            return Ok(0);
        }
        self.borrow(id, amount, caller, false)?;
        Ok(amount)
    }

    /// Borrow more against an existing position
    ///
    /// The caller must be the borrower or an authorized market; funds go to
    /// the caller.
    pub fn increase_loan(&mut self, caller: Address, id: TokenId, amount: u128) -> Result<()> {
        self.guarded(|engine| {
            let position = engine.state.registry.require(&id)?;
            engine.verify_can_act(position, &caller)?;
            engine.verify_custody(id)?;
            engine.vote_if_eligible(id);
            engine.borrow(id, amount, caller, false)
        })
    }

    /// Repay a position from the caller's funds; `amount == 0` repays the full balance
    ///
    /// Returns the amount pulled from the caller.
    pub fn pay(&mut self, caller: Address, id: TokenId, amount: u128) -> Result<u128> {
        self.guarded(|engine| engine.pay_from(caller, id, amount))
    }

    /// Repay the full balance of several positions
    pub fn pay_multiple(&mut self, caller: Address, ids: &[TokenId]) -> Result<u128> {
        self.guarded(|engine| {
            let mut total = 0u128;
            for id in ids {
                total = safe_add(total, engine.pay_from(caller, *id, 0)?)?;
            }
            Ok(total)
        })
    }

    fn pay_from(&mut self, caller: Address, id: TokenId, amount: u128) -> Result<u128> {
        let position = self.state.registry.require(&id)?;
        let amount = if amount == 0 { position.balance } else { amount };
        if amount == 0 {
            return Ok(0);
        }

        let asset = self.state.config.settlement_asset;
        let engine = self.state.config.engine;
        self.env.transfer_from(&asset, &engine, &caller, &engine, amount)?;
        self.pay_internal(id, amount, true)?;
        Ok(amount)
    }

    /// Release the collateral of a debt-free position to its borrower
    pub fn claim_collateral(&mut self, caller: Address, id: TokenId) -> Result<()> {
        self.guarded(|engine| {
            let position = engine.state.registry.require(&id)?;
            position.verify_borrower(&caller)?;
            if position.balance > 0 {
                return Err(Error::OutstandingBalance {
                    token_id: id.to_string(),
                    balance: position.balance,
                });
            }

            let engine_address = engine.state.config.engine;
            engine.env.transfer_nft(&engine_address, &caller, id)?;
            let removed = engine
                .state
                .registry
                .remove(&id)
                .ok_or_else(|| Error::PositionNotFound(id.to_string()))?;

            tracing::info!(token_id = %id, borrower = %caller, "collateral claimed");
            let timestamp = engine.env.now();
            engine.emit(LoanEvent::CollateralClaimed(CollateralClaimedEvent {
                token_id: id,
                borrower: caller,
                weight: removed.weight,
                timestamp,
            }));
            Ok(())
        })
    }

    /// Fold another lock held by the borrower into a collateral position
    pub fn merge(&mut self, caller: Address, from: TokenId, into: TokenId) -> Result<u128> {
        self.guarded(|engine| {
            engine.state.registry.require(&into)?.verify_borrower(&caller)?;
            if engine.state.registry.contains(&from) {
                return Err(Error::PositionAlreadyActive(from.to_string()));
            }
            if engine.env.owner_of(from)? != caller {
                return Err(Error::NotTokenOwner {
                    token_id: from.to_string(),
                    caller: caller.to_string(),
                });
            }
            engine.verify_custody(into)?;

            let now = engine.env.now();
            let engine_address = engine.state.config.engine;
            let before = engine.env.balance_of_nft_at(into, now);
            engine.env.transfer_nft(&caller, &engine_address, from)?;
            engine.env.merge(&engine_address, from, into)?;
            let weight_added = engine.env.balance_of_nft_at(into, now).saturating_sub(before);
            engine.state.registry.add_weight(&into, weight_added)?;
            engine.poke(into);

            tracing::info!(token_id = %into, merged = %from, weight_added = %weight_added, "collateral merged");
            engine.emit(LoanEvent::CollateralMerged(CollateralMergedEvent {
                token_id: into,
                merged_from: from,
                weight_added,
                timestamp: now,
            }));
            Ok(weight_added)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BORROWING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Borrowing capacity of a position from live weight and vault liquidity
    pub fn get_max_loan(&self, id: TokenId) -> Result<MaxLoan> {
        let position = self.state.registry.require(&id)?;
        let config = &self.state.config;
        let inputs = CapacityInputs {
            weight: self.env.balance_of_nft_at(id, self.env.now()),
            balance: position.balance,
            pool_balance: self.env.balance_of(&config.settlement_asset, &config.vault),
            total_outstanding_capital: self.state.registry.total_outstanding_capital(),
        };
        calculate_max_loan(inputs, &config.rates, config.max_utilization_bps)
    }

    /// Disburse `amount` from the vault to `recipient` and book the debt
    pub(crate) fn borrow(&mut self, id: TokenId, amount: u128, recipient: Address, top_up: bool) -> Result<()> {
        validate_increase_amount(amount)?;
        self.check_peg()?;

        let max = self.get_max_loan(id)?;
        if amount > max.max_loan {
            return Err(Error::ExceedsMaxLoan {
                requested: amount,
                max_loan: max.max_loan,
            });
        }

        let fee = calculate_fee_bps(amount, ORIGINATION_FEE_BPS)?;
        self.state.registry.record_borrow(&id, amount, fee)?;

        let config = &self.state.config;
        let (asset, vault) = (config.settlement_asset, config.vault);
        self.env.transfer(&asset, &vault, &recipient, amount)?;

        let balance = self.state.registry.require(&id)?.balance;
        tracing::info!(token_id = %id, amount = %amount, fee = %fee, balance = %balance, top_up, "loan increased");
        let timestamp = self.env.now();
        self.emit(LoanEvent::LoanIncreased(LoanIncreasedEvent {
            token_id: id,
            recipient,
            amount,
            origination_fee: fee,
            balance,
            top_up,
            timestamp,
        }));
        Ok(())
    }

    /// Fail unless the settlement asset is fresh and on peg
    pub fn check_peg(&self) -> Result<()> {
        let config = &self.state.config;
        let data = self.env.latest_price(&config.settlement_asset)?;
        let age = self.env.now().saturating_sub(data.updated_at);
        if age > config.max_price_staleness_secs {
            return Err(Error::StalePrice {
                age,
                max_age: config.max_price_staleness_secs,
            });
        }
        if data.price < config.peg_floor {
            return Err(Error::PegDeviation {
                price: data.price,
                floor: config.peg_floor,
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSITION SETTINGS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Change the zero-balance policy
    pub fn set_zero_balance_option(&mut self, caller: Address, id: TokenId, option: ZeroBalanceOption) -> Result<()> {
        self.borrower_position_mut(&caller, &id)?.zero_balance_option = option;
        Ok(())
    }

    /// Change the auto-reinvest share
    pub fn set_increase_percentage(&mut self, caller: Address, id: TokenId, pct_bps: u128) -> Result<()> {
        validate_increase_percentage(pct_bps)?;
        self.borrower_position_mut(&caller, &id)?.increase_percentage = pct_bps;
        Ok(())
    }

    /// Change or clear the preferred payout token
    pub fn set_preferred_token(&mut self, caller: Address, id: TokenId, token: Option<Address>) -> Result<()> {
        if let Some(token) = token {
            self.verify_approved_token(&token)?;
        }
        self.borrower_position_mut(&caller, &id)?.preferred_token = token;
        Ok(())
    }

    /// Enable or disable automatic top-up
    pub fn set_top_up(&mut self, caller: Address, id: TokenId, enabled: bool) -> Result<()> {
        self.borrower_position_mut(&caller, &id)?.top_up = enabled;
        Ok(())
    }

    /// Direct (or stop directing) the borrower's surplus rewards to this position
    pub fn set_payoff_token(&mut self, caller: Address, id: TokenId, enabled: bool) -> Result<()> {
        self.borrower_position_mut(&caller, &id)?;
        if enabled {
            self.state.registry.set_payoff_token(caller, Some(id));
        } else {
            self.state.registry.clear_payoff_token_if(&caller, &id);
        }
        Ok(())
    }

    fn borrower_position_mut(&mut self, caller: &Address, id: &TokenId) -> Result<&mut Position> {
        let position = self.state.registry.require_mut(id)?;
        position.verify_borrower(caller)?;
        Ok(position)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VOTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Select pools for the position's vote; empty lists restore the defaults
    pub fn vote(&mut self, caller: Address, id: TokenId, pools: Vec<Address>, weights: Vec<u128>) -> Result<bool> {
        self.guarded(|engine| {
            if !(pools.is_empty() && weights.is_empty()) {
                validate_vote(&pools, &weights)?;
            }
            let position = engine.borrower_position_mut(&caller, &id)?;
            position.pools = pools;
            position.pool_weights = weights;
            position.vote_timestamp = 0;
            Ok(engine.vote_if_eligible(id))
        })
    }

    /// Check whether the position should and may vote now
    ///
    /// Votes are closed during the first and last hour of an epoch. A position
    /// votes once per epoch, and again when the defaults it follows change or
    /// its own selection changes.
    pub fn can_vote(&self, id: TokenId) -> bool {
        let Some(position) = self.state.registry.get(&id) else {
            return false;
        };
        let now = self.env.now();
        let start = epoch_start(now);
        let in_window = now >= start + VOTE_WINDOW_BUFFER_SECS && epoch_next(now) - now > VOTE_WINDOW_BUFFER_SECS;
        if !in_window {
            return false;
        }

        let config = &self.state.config;
        if !position.has_custom_vote() && config.default_pools.is_empty() {
            return false;
        }
        let stale_defaults =
            !position.has_custom_vote() && position.vote_timestamp < config.default_pool_change_time;
        position.vote_timestamp == 0 || self.env.last_voted(id) < start || stale_defaults
    }

    /// Cast the position's vote if eligible; failures are swallowed
    pub(crate) fn vote_if_eligible(&mut self, id: TokenId) -> bool {
        if !self.can_vote(id) {
            return false;
        }
        let Some(position) = self.state.registry.get(&id) else {
            return false;
        };
        let default_vote = !position.has_custom_vote();
        let (pools, weights) = if default_vote {
            let config = &self.state.config;
            (config.default_pools.clone(), config.default_weights.clone())
        } else {
            (position.pools.clone(), position.pool_weights.clone())
        };

        let now = self.env.now();
        match self.env.vote(id, &pools, &weights) {
            Ok(()) => {
                if let Some(position) = self.state.registry.get_mut(&id) {
                    position.vote_timestamp = now;
                }
                tracing::debug!(token_id = %id, pools = pools.len(), default_vote, "voted");
                self.emit(LoanEvent::Voted(VotedEvent {
                    token_id: id,
                    pools,
                    weights,
                    default_vote,
                    timestamp: now,
                }));
                true
            }
            Err(e) => {
                self.skip_external(Some(id), "vote", &e);
                false
            }
        }
    }

    /// Refresh the position's vote weight; failures are swallowed
    pub(crate) fn poke(&mut self, id: TokenId) {
        if self.env.last_voted(id) == 0 {
            return;
        }
        if let Err(e) = self.env.poke(id) {
            self.skip_external(Some(id), "poke", &e);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VAULT LIQUIDITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Assets backing vault shares right now
    pub fn vault_assets(&self) -> VaultAssets {
        let config = &self.state.config;
        VaultAssets::new(
            self.env.balance_of(&config.settlement_asset, &config.vault),
            self.state.registry.total_outstanding_capital(),
        )
    }

    /// Total assets: vault balance plus outstanding capital
    pub fn total_assets(&self) -> Result<u128> {
        self.vault_assets().total()
    }

    /// Deposit liquidity, minting shares to `receiver`
    pub fn deposit(&mut self, caller: Address, assets: u128, receiver: Address) -> Result<u128> {
        self.guarded(|engine| {
            engine.verify_no_flash_loan()?;
            let vault_assets = engine.vault_assets();
            let shares = engine.state.vault.deposit(assets, receiver, vault_assets)?;
            let (asset, vault) = (engine.state.config.settlement_asset, engine.state.config.vault);
            engine.env.transfer_from(&asset, &vault, &caller, &vault, assets)?;

            tracing::info!(caller = %caller, receiver = %receiver, assets = %assets, shares = %shares, "vault deposit");
            let timestamp = engine.env.now();
            engine.emit(LoanEvent::VaultDeposit(VaultDepositEvent {
                caller,
                receiver,
                assets,
                shares,
                timestamp,
            }));
            Ok(shares)
        })
    }

    /// Burn `shares` owned by the caller, paying assets to `receiver`
    pub fn redeem(&mut self, caller: Address, shares: u128, receiver: Address) -> Result<u128> {
        self.guarded(|engine| {
            engine.verify_no_flash_loan()?;
            let vault_assets = engine.vault_assets();
            let assets = engine.state.vault.redeem(shares, caller, vault_assets)?;
            engine.pay_out_of_vault(caller, receiver, assets, shares)?;
            Ok(assets)
        })
    }

    /// Withdraw exactly `assets` to `receiver`, burning the caller's shares
    pub fn withdraw(&mut self, caller: Address, assets: u128, receiver: Address) -> Result<u128> {
        self.guarded(|engine| {
            engine.verify_no_flash_loan()?;
            let vault_assets = engine.vault_assets();
            let shares = engine.state.vault.withdraw(assets, caller, vault_assets)?;
            engine.pay_out_of_vault(caller, receiver, assets, shares)?;
            Ok(shares)
        })
    }

    fn pay_out_of_vault(&mut self, owner: Address, receiver: Address, assets: u128, shares: u128) -> Result<()> {
        let (asset, vault) = (self.state.config.settlement_asset, self.state.config.vault);
        self.env.transfer(&asset, &vault, &receiver, assets)?;

        tracing::info!(owner = %owner, receiver = %receiver, assets = %assets, shares = %shares, "vault withdrawal");
        let timestamp = self.env.now();
        self.emit(LoanEvent::VaultWithdraw(VaultWithdrawEvent {
            owner,
            receiver,
            assets,
            shares,
            timestamp,
        }));
        Ok(())
    }

    /// Share price is undefined while flash-loaned liquidity is out
    pub(crate) fn verify_no_flash_loan(&self) -> Result<()> {
        if self.flash_guard.is_entered() {
            return Err(Error::Reentrancy);
        }
        Ok(())
    }

    /// Largest amount `owner` can withdraw now
    pub fn max_withdraw(&self, owner: &Address) -> Result<u128> {
        self.state.vault.max_withdraw(owner, self.vault_assets())
    }

    /// Shares minted for `assets` at the current price
    pub fn convert_to_shares(&self, assets: u128) -> Result<u128> {
        self.state.vault.convert_to_shares(assets, self.vault_assets())
    }

    /// Assets redeemable for `shares` at the current price
    pub fn convert_to_assets(&self, shares: u128) -> Result<u128> {
        self.state.vault.convert_to_assets(shares, self.vault_assets())
    }

    /// Vault shares held by `owner`
    pub fn shares_of(&self, owner: &Address) -> u128 {
        self.state.vault.shares_of(owner)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get a position
    pub fn position(&self, id: TokenId) -> Option<&Position> {
        self.state.registry.get(&id)
    }

    /// Position registry
    pub fn registry(&self) -> &PositionRegistry {
        &self.state.registry
    }

    /// Lender share ledger
    pub fn vault(&self) -> &LendingVault {
        &self.state.vault
    }

    /// Current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    /// Full engine state
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Host services
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Host services, mutable (fixtures and time travel)
    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Events since the last drain
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Take all recorded events
    pub fn drain_events(&mut self) -> Vec<LoanEvent> {
        self.events.drain()
    }

    /// Weight accounted to a position (0 if none)
    pub fn get_loan_weight(&self, id: TokenId) -> u128 {
        self.state.registry.get(&id).map(|p| p.weight).unwrap_or(0)
    }

    /// Principal currently lent out
    pub fn active_assets(&self) -> u128 {
        self.state.registry.total_outstanding_capital()
    }

    /// Rewards harvested in `epoch` per unit of total weight, in rewards-rate units
    pub fn realized_rewards_rate(&self, epoch: u64) -> Result<u128> {
        let total_weight = self.state.registry.total_weight();
        if total_weight == 0 {
            return Ok(0);
        }
        let harvested = self.state.registry.epoch_harvest(epoch);
        let scaled = safe_mul(harvested, REWARDS_RATE_DIVISOR)?;
        mul_div(scaled, WEIGHT_TO_SETTLEMENT_SCALE, total_weight)
    }

    /// Check if the position was harvested during the current epoch
    pub fn has_claimed_this_epoch(&self, id: TokenId) -> bool {
        self.state
            .registry
            .get(&id)
            .map(|p| p.claim_timestamp > 0 && p.claim_timestamp >= epoch_start(self.env.now()))
            .unwrap_or(false)
    }

    /// Aggregate position statistics
    pub fn statistics(&self) -> RegistryStatistics {
        self.state.registry.statistics()
    }

    /// Check accounting invariants and collateral custody
    pub fn verify_invariants(&self) -> Result<()> {
        self.state.registry.verify_invariants()?;
        if !self.state.vault.verify_invariant() {
            return Err(Error::InvariantViolation("vault shares do not sum to total".into()));
        }
        for position in self.state.registry.all_positions() {
            self.verify_custody(position.token_id)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn emit(&mut self, event: LoanEvent) {
        self.events.push(event);
    }

    /// Record a swallowed failure of a best-effort call
    pub(crate) fn skip_external(&mut self, id: Option<TokenId>, call: &str, error: &Error) {
        tracing::warn!(token_id = ?id, call, error = %error, "external call failed, skipping");
        let timestamp = self.env.now();
        self.emit(LoanEvent::ExternalCallSkipped(ExternalCallSkippedEvent {
            token_id: id,
            call: call.to_string(),
            reason: error.to_string(),
            timestamp,
        }));
    }

    /// Check that the engine holds the collateral
    pub(crate) fn verify_custody(&self, id: TokenId) -> Result<()> {
        match self.env.owner_of(id) {
            Ok(owner) if owner == self.state.config.engine => Ok(()),
            _ => Err(Error::CollateralNotInCustody(id.to_string())),
        }
    }

    /// Borrower or an authorized market acting for them
    pub(crate) fn verify_can_act(&self, position: &Position, caller: &Address) -> Result<()> {
        if position.is_borrower(caller) || self.state.config.is_authorized_market(caller) {
            return Ok(());
        }
        Err(Error::NotBorrower {
            token_id: position.token_id.to_string(),
            caller: caller.to_string(),
        })
    }

    fn verify_approved_token(&self, token: &Address) -> Result<()> {
        if !self.state.config.is_approved_token(token) {
            return Err(Error::InvalidParameter {
                name: "preferred_token".into(),
                reason: format!("{} is not approved", token),
            });
        }
        Ok(())
    }
}
