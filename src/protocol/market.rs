//! Marketplace integration.
//!
//! Authorized market contracts may reassign the borrower of a position as
//! part of a sale, read loan details, and take flash loans from the vault to
//! settle a seller's debt and open the buyer's within one atomic flow.

use serde::{Deserialize, Serialize};

use crate::core::max_loan::MaxLoan;
use crate::core::position::ZeroBalanceOption;
use crate::error::{Error, Result};
use crate::external::Environment;
use crate::protocol::engine::LoanEngine;
use crate::protocol::events::*;
use crate::utils::ids::{Address, TokenId};
use crate::utils::math::*;
use crate::utils::validation::*;

// ═══════════════════════════════════════════════════════════════════════════════
// LOAN DETAILS
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only summary of a position for market listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDetails {
    pub token_id: TokenId,
    pub borrower: Address,
    pub balance: u128,
    pub outstanding_capital: u128,
    pub unpaid_fees: u128,
    pub weight: u128,
    pub zero_balance_option: ZeroBalanceOption,
    pub top_up: bool,
    /// Capacity at the time of the query
    pub max_loan: MaxLoan,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLASH LOANS
// ═══════════════════════════════════════════════════════════════════════════════

/// Receiver of a flash loan
///
/// The callback may call back into the engine (repay, borrow, transfer
/// ownership) but may not start another flash loan. Before it returns the
/// receiver must have approved the vault for `amount + fee`.
pub trait FlashBorrower<E: Environment> {
    /// Use the borrowed funds
    fn on_flash_loan(
        &mut self,
        engine: &mut LoanEngine<E>,
        receiver: Address,
        amount: u128,
        fee: u128,
    ) -> Result<()>;
}

impl<E: Environment> LoanEngine<E> {
    // ═══════════════════════════════════════════════════════════════════════════
    // OWNERSHIP
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reassign the borrower of a position; authorized markets only
    ///
    /// Debt is unchanged. The previous borrower's payoff designation is cleared
    /// if it pointed at this position.
    pub fn transfer_loan_ownership(&mut self, caller: Address, id: TokenId, new_borrower: Address) -> Result<()> {
        self.guarded(|engine| {
            if !engine.state.config.is_authorized_market(&caller) {
                return Err(Error::Unauthorized(format!("{} is not an authorized market", caller)));
            }
            validate_address(&new_borrower, "new_borrower")?;

            let position = engine.state.registry.require_mut(&id)?;
            let previous = position.borrower;
            position.borrower = new_borrower;
            engine.state.registry.clear_payoff_token_if(&previous, &id);

            tracing::info!(token_id = %id, from = %previous, to = %new_borrower, market = %caller, "loan ownership transferred");
            let timestamp = engine.env.now();
            engine.emit(LoanEvent::OwnershipTransferred(OwnershipTransferredEvent {
                token_id: id,
                from: previous,
                to: new_borrower,
                market: caller,
                timestamp,
            }));
            Ok(())
        })
    }

    /// Same as [`transfer_loan_ownership`](Self::transfer_loan_ownership)
    pub fn set_borrower(&mut self, caller: Address, id: TokenId, new_borrower: Address) -> Result<()> {
        self.transfer_loan_ownership(caller, id, new_borrower)
    }

    /// Summary of a position
    pub fn get_loan_details(&self, id: TokenId) -> Result<LoanDetails> {
        let position = self.state.registry.require(&id)?;
        Ok(LoanDetails {
            token_id: id,
            borrower: position.borrower,
            balance: position.balance,
            outstanding_capital: position.outstanding_capital,
            unpaid_fees: position.unpaid_fees,
            weight: position.weight,
            zero_balance_option: position.zero_balance_option,
            top_up: position.top_up,
            max_loan: self.get_max_loan(id)?,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FLASH LOAN
    // ═══════════════════════════════════════════════════════════════════════════

    /// Lend vault liquidity to `receiver` for the duration of a callback
    ///
    /// After the callback the vault pulls `amount + fee` from `receiver` and
    /// its total assets must have grown by at least the fee. Returns the fee.
    pub fn flash_loan<B>(&mut self, borrower: &mut B, receiver: Address, amount: u128) -> Result<u128>
    where
        B: FlashBorrower<E> + ?Sized,
    {
        self.flash_guard.enter()?;
        let result = self.atomic(|engine| engine.run_flash_loan(borrower, receiver, amount));
        self.flash_guard.exit();
        result
    }

    fn run_flash_loan<B>(&mut self, borrower: &mut B, receiver: Address, amount: u128) -> Result<u128>
    where
        B: FlashBorrower<E> + ?Sized,
    {
        validate_non_zero(amount)?;
        let (asset, vault) = (self.state.config.settlement_asset, self.state.config.vault);
        let fee = calculate_fee_bps(amount, self.state.config.flash_loan_fee_bps)?;

        let assets_before = self.vault_assets();
        if amount > assets_before.on_hand {
            return Err(Error::InsufficientLiquidity {
                required: amount,
                available: assets_before.on_hand,
            });
        }

        self.env.transfer(&asset, &vault, &receiver, amount)?;
        borrower.on_flash_loan(self, receiver, amount, fee)?;
        self.env
            .transfer_from(&asset, &vault, &receiver, &vault, safe_add(amount, fee)?)?;

        let required = safe_add(assets_before.total()?, fee)?;
        let total_after = self.vault_assets().total()?;
        if total_after < required {
            return Err(Error::InsufficientBalance {
                token: asset.to_string(),
                required,
                available: total_after,
            });
        }

        tracing::info!(receiver = %receiver, amount = %amount, fee = %fee, "flash loan repaid");
        let timestamp = self.env.now();
        if fee > 0 {
            self.emit(LoanEvent::FeePaid(FeePaidEvent {
                token_id: None,
                kind: FeeKind::FlashLoan,
                token: asset,
                recipient: vault,
                amount: fee,
                timestamp,
            }));
        }
        self.emit(LoanEvent::FlashLoan(FlashLoanEvent {
            receiver,
            amount,
            fee,
            timestamp,
        }));
        Ok(fee)
    }
}
