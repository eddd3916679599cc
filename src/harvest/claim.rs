//! Reward harvesting.
//!
//! A harvest claims fees and bribes earned by a collateral lock, converts
//! them into the payout asset, and settles the proceeds:
//! - Indebted positions pay the protocol fee and lender premium, optionally
//!   reinvest a share into the lock, then repay the borrower's payoff
//!   position and finally this position
//! - Debt-free positions reinvest their share and route the rest by their
//!   zero-balance policy
//!
//! The rebase is claimed on every harvest. Reward contracts, swaps, votes
//! and the rebase are best-effort: their failures are logged and skipped.

use serde::{Deserialize, Serialize};

use crate::core::position::ZeroBalanceOption;
use crate::error::{Error, Result};
use crate::external::Environment;
use crate::harvest::swap::{swap_or_return, SwapOutcome};
use crate::protocol::engine::LoanEngine;
use crate::protocol::events::*;
use crate::utils::ids::{Address, TokenId};
use crate::utils::math::*;

/// Reward contract and the tokens to claim from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    /// Fee or bribe reward contract
    pub contract: Address,
    /// Tokens to claim
    pub tokens: Vec<Address>,
}

impl RewardClaim {
    /// Create a claim
    pub fn new(contract: Address, tokens: Vec<Address>) -> Self {
        Self { contract, tokens }
    }
}

impl<E: Environment> LoanEngine<E> {
    /// Harvest rewards for a position and settle them
    ///
    /// Callable by anyone. Returns the rewards received in the payout asset;
    /// positions that are gone, out of custody, or debt-free with
    /// `DoNothing` return 0 without side effects.
    pub fn claim(&mut self, id: TokenId, claims: &[RewardClaim]) -> Result<u128> {
        self.guarded(|engine| engine.harvest(id, claims))
    }

    fn harvest(&mut self, id: TokenId, claims: &[RewardClaim]) -> Result<u128> {
        let Some(position) = self.state.registry.get(&id) else {
            return Ok(0);
        };
        if position.borrower.is_zero() || self.verify_custody(id).is_err() {
            return Ok(0);
        }
        if position.is_debt_free() && position.zero_balance_option == ZeroBalanceOption::DoNothing {
            return Ok(0);
        }

        let borrower = position.borrower;
        let debt_free = position.is_debt_free();
        let config = &self.state.config;
        let payoff = self
            .state
            .registry
            .payoff_token(&borrower)
            .filter(|p| *p != id)
            .filter(|p| self.state.registry.get(p).map(|p| p.balance > 0).unwrap_or(false));
        let asset = match (debt_free, payoff, position.zero_balance_option, position.preferred_token) {
            (true, None, ZeroBalanceOption::PayToOwner, Some(token)) => token,
            _ => config.settlement_asset,
        };
        let engine = config.engine;

        let total = self.collect_rewards(id, claims, asset, borrower)?;

        if total > 0 {
            let now = self.env.now();
            if asset == self.state.config.settlement_asset {
                self.state.registry.record_harvest(epoch_start(now), total)?;
            }
            if debt_free && payoff.is_none() {
                self.settle_debt_free(id, total, asset)?;
            } else {
                self.settle_indebted(id, total, payoff)?;
            }
        }

        self.claim_rebase(id)?;

        if self.env.owner_of(id).ok() != Some(engine) {
            return Err(Error::InvariantViolation(format!(
                "collateral {} left custody during harvest",
                id
            )));
        }

        let now = self.env.now();
        self.state.registry.require_mut(&id)?.claim_timestamp = now;
        tracing::info!(token_id = %id, asset = %asset, total_rewards = %total, "rewards claimed");
        self.emit(LoanEvent::RewardsClaimed(RewardsClaimedEvent {
            token_id: id,
            asset,
            total_rewards: total,
            timestamp: now,
        }));
        Ok(total)
    }

    /// Claim from every reward contract and convert proceeds into `asset`
    ///
    /// Returns the engine's balance increase in `asset`.
    fn collect_rewards(&mut self, id: TokenId, claims: &[RewardClaim], asset: Address, borrower: Address) -> Result<u128> {
        let engine = self.state.config.engine;
        let mut tokens: Vec<Address> = claims
            .iter()
            .flat_map(|c| c.tokens.iter().copied())
            .filter(|t| *t != asset)
            .collect();
        tokens.sort();
        tokens.dedup();

        let asset_before = self.env.balance_of(&asset, &engine);
        let before: Vec<(Address, u128)> = tokens
            .iter()
            .map(|t| (*t, self.env.balance_of(t, &engine)))
            .collect();

        for claim in claims {
            let result = self
                .env
                .claim_fees(&[claim.contract], std::slice::from_ref(&claim.tokens), id);
            if let Err(e) = result {
                self.skip_external(Some(id), "claim_fees", &e);
            }
        }

        for (token, balance_before) in before {
            let received = self.env.balance_of(&token, &engine).saturating_sub(balance_before);
            if received == 0 {
                continue;
            }
            let outcome = swap_or_return(&mut self.env, &self.state.config, &token, received, &asset, &borrower)?;
            match outcome {
                SwapOutcome::Swapped { amount_out, .. } => {
                    tracing::debug!(token_id = %id, token = %token, amount_in = %received, amount_out = %amount_out, "reward swapped");
                }
                SwapOutcome::Returned { amount, .. } => {
                    let timestamp = self.env.now();
                    self.emit(LoanEvent::SwapFallback(SwapFallbackEvent {
                        token_id: id,
                        token,
                        amount,
                        recipient: borrower,
                        timestamp,
                    }));
                }
            }
        }

        Ok(self.env.balance_of(&asset, &engine).saturating_sub(asset_before))
    }

    /// Settle rewards of a position that owes nothing
    fn settle_debt_free(&mut self, id: TokenId, total: u128, asset: Address) -> Result<()> {
        let position = self.state.registry.require(&id)?;
        let mut remaining = total;

        if position.zero_balance_option != ZeroBalanceOption::ReinvestIntoCollateral {
            let share = calculate_fee_bps(total, position.effective_increase_percentage())?;
            remaining -= self.try_reinvest(id, share, asset);
        }
        if remaining > 0 {
            self.handle_zero_balance(id, remaining, asset)?;
        }
        Ok(())
    }

    /// Settle rewards against debt: fees, reinvestment, payoff position, this position
    fn settle_indebted(&mut self, id: TokenId, total: u128, payoff: Option<TokenId>) -> Result<()> {
        let position = self.state.registry.require(&id)?;
        let balance = position.balance;
        let increase_pct = position.effective_increase_percentage();
        let payoff_balance = match payoff {
            Some(p) => self.state.registry.require(&p)?.balance,
            None => 0,
        };

        let config = &self.state.config;
        let (asset, owner, vault) = (config.settlement_asset, config.owner, config.vault);
        let fee_eligible = total.min(balance);
        let protocol_fee = calculate_fee_bps(fee_eligible, config.rates.protocol_fee_bps)?;
        let lender_premium = calculate_fee_bps(fee_eligible, config.rates.lender_premium_bps)?;

        tracing::debug!(
            token_id = %id,
            total = %total,
            fee_eligible = %fee_eligible,
            protocol_fee = %protocol_fee,
            lender_premium = %lender_premium,
            "settling rewards against debt"
        );

        self.transfer_fee(Some(id), FeeKind::Protocol, asset, owner, protocol_fee)?;
        self.transfer_fee(Some(id), FeeKind::LenderPremium, asset, vault, lender_premium)?;
        let epoch = epoch_start(self.env.now());
        self.state.vault.record_epoch_rewards(epoch, lender_premium)?;

        let mut remaining = safe_sub(total, safe_add(protocol_fee, lender_premium)?)?;
        let share = calculate_fee_bps(total, increase_pct)?.min(remaining);
        remaining -= self.try_reinvest(id, share, asset);

        if let Some(payoff) = payoff {
            let portion = remaining.min(payoff_balance);
            if portion > 0 {
                self.pay_internal(payoff, portion, false)?;
                remaining -= portion;
            }
        }
        if remaining > 0 {
            self.pay_internal(id, remaining, false)?;
        }
        Ok(())
    }

    /// Reinvest `amount` in its own atomic section; returns the amount consumed
    fn try_reinvest(&mut self, id: TokenId, amount: u128, asset: Address) -> u128 {
        if amount == 0 {
            return 0;
        }
        match self.atomic(|engine| engine.reinvest(id, amount, asset)) {
            Ok(_) => amount,
            Err(e) => {
                self.skip_external(Some(id), "reinvest", &e);
                0
            }
        }
    }

    /// Claim the lock's rebase and account the added weight
    fn claim_rebase(&mut self, id: TokenId) -> Result<()> {
        if self.env.claimable(id) == 0 {
            return Ok(());
        }
        let now = self.env.now();
        let before = self.env.balance_of_nft_at(id, now);
        match self.env.claim(id) {
            Ok(amount) if amount > 0 => {
                let weight_added = self.env.balance_of_nft_at(id, now).saturating_sub(before);
                self.state.registry.add_weight(&id, weight_added)?;
                self.poke(id);
                tracing::debug!(token_id = %id, amount = %amount, weight_added = %weight_added, "rebase claimed");
                self.emit(LoanEvent::RebaseClaimed(RebaseClaimedEvent {
                    token_id: id,
                    amount,
                    timestamp: now,
                }));
            }
            Ok(_) => {}
            Err(e) => self.skip_external(Some(id), "rebase_claim", &e),
        }
        Ok(())
    }
}
