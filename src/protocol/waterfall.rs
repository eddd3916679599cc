//! Payment waterfall and zero-balance routing.
//!
//! Funds held by the engine are applied to a position in strict order:
//! 1. Unpaid origination fees, paid to the protocol owner
//! 2. Principal, returned to the vault
//! 3. Excess beyond the balance, routed by the position's zero-balance policy
//!
//! Automated payments may then top the loan back up to capacity.

use crate::core::position::{PaymentBreakdown, ZeroBalanceOption};
use crate::error::{Error, Result};
use crate::external::Environment;
use crate::harvest::swap::swap_best_route;
use crate::protocol::engine::LoanEngine;
use crate::protocol::events::*;
use crate::utils::constants::MIN_INCREASE_AMOUNT;
use crate::utils::ids::{Address, TokenId};
use crate::utils::math::*;

impl<E: Environment> LoanEngine<E> {
    // ═══════════════════════════════════════════════════════════════════════════
    // PAYMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Apply `amount` of settlement asset held by the engine to a position
    ///
    /// Manual payments never trigger a top-up.
    pub(crate) fn pay_internal(&mut self, id: TokenId, amount: u128, manual: bool) -> Result<PaymentBreakdown> {
        let breakdown = self.state.registry.apply_payment(&id, amount)?;
        let (asset, owner, vault) = {
            let config = &self.state.config;
            (config.settlement_asset, config.owner, config.vault)
        };

        tracing::debug!(
            token_id = %id,
            amount = %amount,
            fees = %breakdown.fees,
            principal = %breakdown.principal,
            excess = %breakdown.excess,
            manual,
            "applying payment"
        );

        self.transfer_fee(Some(id), FeeKind::Origination, asset, owner, breakdown.fees)?;
        let engine = self.state.config.engine;
        self.env.transfer(&asset, &engine, &vault, breakdown.principal)?;
        if breakdown.excess > 0 {
            self.handle_zero_balance(id, breakdown.excess, asset)?;
        }

        let position = self.state.registry.require(&id)?;
        let (borrower, top_up) = (position.borrower, position.top_up);
        if !manual && top_up {
            self.top_up(id, borrower)?;
        }

        let balance = self.state.registry.require(&id)?.balance;
        if balance > 0 && self.state.registry.payoff_token(&borrower).is_none() {
            self.state.registry.set_payoff_token(borrower, Some(id));
        }

        let timestamp = self.env.now();
        self.emit(LoanEvent::LoanPaid(LoanPaidEvent {
            token_id: id,
            amount,
            fees: breakdown.fees,
            principal: breakdown.principal,
            excess: breakdown.excess,
            manual,
            balance,
            timestamp,
        }));
        Ok(breakdown)
    }

    /// Re-borrow up to capacity after an automated payment
    ///
    /// Capacity is recomputed from live state. A failing peg check skips the
    /// top-up instead of failing the payment.
    fn top_up(&mut self, id: TokenId, borrower: Address) -> Result<()> {
        if let Err(e) = self.check_peg() {
            tracing::warn!(token_id = %id, error = %e, "top-up skipped");
            return Ok(());
        }
        let max_loan = self.get_max_loan(id)?.max_loan;
        if max_loan <= MIN_INCREASE_AMOUNT {
            return Ok(());
        }
        self.borrow(id, max_loan, borrower, true)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ZERO BALANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Route funds of a debt-free position according to its policy
    ///
    /// The zero-balance fee goes to the protocol owner first.
    pub(crate) fn handle_zero_balance(&mut self, id: TokenId, amount: u128, token: Address) -> Result<()> {
        let position = self.state.registry.require(&id)?;
        let (borrower, option) = (position.borrower, position.zero_balance_option);
        let config = &self.state.config;
        let (owner, settlement) = (config.owner, config.settlement_asset);

        let fee = calculate_fee_bps(amount, config.rates.zero_balance_fee_bps)?;
        self.transfer_fee(Some(id), FeeKind::ZeroBalance, token, owner, fee)?;
        let remaining = safe_sub(amount, fee)?;

        tracing::debug!(token_id = %id, amount = %amount, fee = %fee, option = ?option, "routing zero-balance funds");

        match option {
            ZeroBalanceOption::InvestToVault if token == settlement => {
                if let Err(e) = self.atomic(|engine| engine.invest_for(borrower, remaining)) {
                    tracing::warn!(token_id = %id, error = %e, "vault deposit failed, paying borrower");
                    self.pay_borrower(token, borrower, remaining)?;
                }
            }
            ZeroBalanceOption::ReinvestIntoCollateral => {
                if let Err(e) = self.atomic(|engine| engine.reinvest(id, remaining, token)) {
                    self.skip_external(Some(id), "reinvest", &e);
                    self.pay_borrower(token, borrower, remaining)?;
                }
            }
            _ => self.pay_borrower(token, borrower, remaining)?,
        }

        let timestamp = self.env.now();
        self.emit(LoanEvent::ZeroBalanceDistributed(ZeroBalanceDistributedEvent {
            token_id: id,
            option,
            token,
            amount: remaining,
            fee,
            timestamp,
        }));
        Ok(())
    }

    /// Deposit engine-held settlement funds into the vault on behalf of `receiver`
    fn invest_for(&mut self, receiver: Address, amount: u128) -> Result<u128> {
        self.verify_no_flash_loan()?;
        let vault_assets = self.vault_assets();
        let shares = self.state.vault.deposit(amount, receiver, vault_assets)?;
        let (asset, engine, vault) = {
            let config = &self.state.config;
            (config.settlement_asset, config.engine, config.vault)
        };
        self.env.transfer(&asset, &engine, &vault, amount)?;

        let timestamp = self.env.now();
        self.emit(LoanEvent::VaultDeposit(VaultDepositEvent {
            caller: engine,
            receiver,
            assets: amount,
            shares,
            timestamp,
        }));
        Ok(shares)
    }

    fn pay_borrower(&mut self, token: Address, borrower: Address, amount: u128) -> Result<()> {
        let engine = self.state.config.engine;
        self.env.transfer(&token, &engine, &borrower, amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REINVESTMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Convert `amount` of `token` into governance tokens and add them to the lock
    ///
    /// Returns the weight added. Callers run this inside its own atomic section
    /// so a failed swap or lock increase leaves the funds in place.
    pub(crate) fn reinvest(&mut self, id: TokenId, amount: u128, token: Address) -> Result<u128> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let governance = self.env.escrow_token();
        let engine = self.state.config.engine;
        let locked_amount = if token == governance {
            amount
        } else {
            swap_best_route(&mut self.env, &self.state.config, &token, &governance, amount, &engine)?
        };

        let now = self.env.now();
        let before = self.env.balance_of_nft_at(id, now);
        self.env.increase_amount(&engine, id, locked_amount)?;
        let weight_added = self.env.balance_of_nft_at(id, now).saturating_sub(before);
        self.state.registry.add_weight(&id, weight_added)?;
        self.poke(id);

        tracing::debug!(token_id = %id, amount_in = %amount, locked = %locked_amount, weight_added = %weight_added, "reinvested into collateral");
        self.emit(LoanEvent::CollateralReinvested(CollateralReinvestedEvent {
            token_id: id,
            token,
            amount_in: amount,
            weight_added,
            timestamp: now,
        }));
        Ok(weight_added)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FEES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pay a fee out of engine funds; zero fees are not recorded
    pub(crate) fn transfer_fee(
        &mut self,
        token_id: Option<TokenId>,
        kind: FeeKind,
        token: Address,
        recipient: Address,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let engine = self.state.config.engine;
        self.env.transfer(&token, &engine, &recipient, amount)?;

        let timestamp = self.env.now();
        self.emit(LoanEvent::FeePaid(FeePaidEvent {
            token_id,
            kind,
            token,
            recipient,
            amount,
            timestamp,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::position::ZeroBalanceOption;
    use crate::error::Error;
    use crate::external::VotingEscrow;
    use crate::protocol::fixture::*;
    use crate::utils::constants::*;

    #[test]
    fn test_payment_below_unpaid_fees() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 500 * SETTLEMENT_UNIT);
        fx.fund_and_approve(fx.borrower, SETTLEMENT_UNIT);

        // 4 USDC fee outstanding, pay 1
        fx.engine.pay(fx.borrower, id, SETTLEMENT_UNIT).unwrap();
        let position = fx.engine.position(id).unwrap();
        assert_eq!(position.unpaid_fees, 3 * SETTLEMENT_UNIT);
        assert_eq!(position.balance, 503 * SETTLEMENT_UNIT);
        assert_eq!(position.outstanding_capital, 500 * SETTLEMENT_UNIT);
        assert_eq!(fx.balance(&fx.usdc, &fx.config.owner), SETTLEMENT_UNIT);
    }

    #[test]
    fn test_full_payment_returns_principal_to_vault() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 500 * SETTLEMENT_UNIT);
        let vault_before = fx.balance(&fx.usdc, &fx.config.vault);
        fx.fund_and_approve(fx.borrower, 504 * SETTLEMENT_UNIT);

        let paid = fx.engine.pay(fx.borrower, id, 0).unwrap();
        assert_eq!(paid, 504 * SETTLEMENT_UNIT);
        assert_eq!(
            fx.balance(&fx.usdc, &fx.config.vault),
            vault_before + 500 * SETTLEMENT_UNIT
        );
        assert_eq!(fx.engine.active_assets(), 0);
        assert!(fx.engine.position(id).unwrap().is_debt_free());
    }

    #[test]
    fn test_overpayment_goes_to_borrower_less_fee() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 100 * SETTLEMENT_UNIT);
        fx.fund_and_approve(fx.borrower, 200_800_000);

        fx.engine.pay(fx.borrower, id, 200_800_000).unwrap();
        // 100 USDC excess, 1% zero-balance fee
        assert_eq!(
            fx.balance(&fx.usdc, &fx.borrower),
            100 * SETTLEMENT_UNIT + 99 * SETTLEMENT_UNIT
        );
        assert_eq!(
            fx.balance(&fx.usdc, &fx.config.owner),
            800_000 + SETTLEMENT_UNIT
        );
    }

    #[test]
    fn test_manual_payment_never_tops_up() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 100 * SETTLEMENT_UNIT);
        fx.engine.set_top_up(fx.borrower, id, true).unwrap();
        fx.fund_and_approve(fx.borrower, 100_800_000);

        fx.engine.pay(fx.borrower, id, 0).unwrap();
        assert_eq!(fx.engine.position(id).unwrap().balance, 0);
        assert_eq!(fx.engine.events().filter_by_type("LoanIncreased").len(), 1);
    }

    #[test]
    fn test_payment_defaults_payoff_token() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 100 * SETTLEMENT_UNIT);
        fx.fund_and_approve(fx.borrower, 10 * SETTLEMENT_UNIT);
        assert_eq!(fx.engine.registry().payoff_token(&fx.borrower), None);

        fx.engine.pay(fx.borrower, id, 10 * SETTLEMENT_UNIT).unwrap();
        assert_eq!(fx.engine.registry().payoff_token(&fx.borrower), Some(id));
    }

    #[test]
    fn test_excess_invested_into_vault() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 0);
        fx.engine
            .set_zero_balance_option(fx.borrower, id, ZeroBalanceOption::InvestToVault)
            .unwrap();
        fx.fund_and_approve(fx.borrower, 100 * SETTLEMENT_UNIT);

        fx.engine.pay(fx.borrower, id, 100 * SETTLEMENT_UNIT).unwrap();
        assert_eq!(fx.engine.shares_of(&fx.borrower), 99 * SETTLEMENT_UNIT);
        assert_eq!(fx.balance(&fx.usdc, &fx.borrower), 0);
    }

    #[test]
    fn test_excess_reinvested_into_collateral() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 0);
        fx.engine
            .set_zero_balance_option(fx.borrower, id, ZeroBalanceOption::ReinvestIntoCollateral)
            .unwrap();
        let weight_before = fx.engine.get_loan_weight(id);
        fx.fund_and_approve(fx.borrower, 100 * SETTLEMENT_UNIT);

        fx.engine.pay(fx.borrower, id, 100 * SETTLEMENT_UNIT).unwrap();
        let added = 99 * GOVERNANCE_UNIT;
        assert_eq!(fx.engine.get_loan_weight(id), weight_before + added);
        assert_eq!(fx.engine.registry().total_weight(), weight_before + added);
        assert_eq!(fx.engine.env().locked(id).unwrap().amount, weight_before + added);
    }

    #[test]
    fn test_failed_reinvest_pays_borrower() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 0);
        fx.engine
            .set_zero_balance_option(fx.borrower, id, ZeroBalanceOption::ReinvestIntoCollateral)
            .unwrap();
        fx.engine.env_mut().failures_mut().swaps = true;
        fx.fund_and_approve(fx.borrower, 100 * SETTLEMENT_UNIT);

        fx.engine.pay(fx.borrower, id, 100 * SETTLEMENT_UNIT).unwrap();
        assert_eq!(fx.balance(&fx.usdc, &fx.borrower), 99 * SETTLEMENT_UNIT);
        assert_eq!(fx.engine.events().filter_by_type("ExternalCallSkipped").len(), 1);
        assert_eq!(fx.engine.events().filter_by_type("CollateralReinvested").len(), 0);
    }

    #[test]
    fn test_payment_without_allowance_reverts() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 100 * SETTLEMENT_UNIT);

        let result = fx.engine.pay(fx.borrower, id, 10 * SETTLEMENT_UNIT);
        assert!(matches!(result, Err(Error::InsufficientAllowance { .. })));
        assert_eq!(fx.engine.position(id).unwrap().balance, 100_800_000);
    }
}
