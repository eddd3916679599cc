//! Owner-gated configuration.
//!
//! Every change is applied to a copy of the configuration, validated as a
//! whole, and only then installed.

use crate::core::config::{EngineConfig, RateParameters};
use crate::error::{Error, Result};
use crate::external::Environment;
use crate::protocol::engine::LoanEngine;
use crate::protocol::events::*;
use crate::utils::ids::Address;
use crate::utils::validation::*;

impl<E: Environment> LoanEngine<E> {
    fn update_config(
        &mut self,
        caller: Address,
        parameter: &str,
        value: String,
        update: impl FnOnce(&mut EngineConfig, u64) -> Result<()>,
    ) -> Result<()> {
        if caller != self.state.config.owner {
            return Err(Error::Unauthorized(format!("{} is not the owner", caller)));
        }
        let now = self.env.now();
        let mut config = self.state.config.clone();
        update(&mut config, now)?;
        config.validate()?;
        self.state.config = config;

        tracing::info!(parameter, value = %value, "configuration changed");
        self.emit(LoanEvent::ConfigChanged(ConfigChangedEvent {
            parameter: parameter.to_string(),
            value,
            timestamp: now,
        }));
        Ok(())
    }

    /// Replace fee split and capacity parameters
    pub fn set_rate_parameters(&mut self, caller: Address, rates: RateParameters) -> Result<()> {
        let value = format!("{:?}", rates);
        self.update_config(caller, "rates", value, |config, _| {
            rates.validate()?;
            config.rates = rates;
            Ok(())
        })
    }

    /// Replace the default vote
    ///
    /// Advances the change watermark so positions on the defaults re-vote.
    pub fn set_default_pools(&mut self, caller: Address, pools: Vec<Address>, weights: Vec<u128>) -> Result<()> {
        validate_vote(&pools, &weights)?;
        let value = format!("{} pools", pools.len());
        self.update_config(caller, "default_pools", value, |config, now| {
            config.default_pool_change_time = now.max(config.default_pool_change_time + 1);
            config.default_pools = pools;
            config.default_weights = weights;
            Ok(())
        })
    }

    /// Allow or disallow a preferred payout token
    pub fn set_approved_token(&mut self, caller: Address, token: Address, approved: bool) -> Result<()> {
        validate_address(&token, "token")?;
        self.update_config(caller, "approved_token", format!("{}={}", token, approved), |config, _| {
            if approved {
                config.approved_tokens.insert(token);
            } else {
                config.approved_tokens.remove(&token);
            }
            Ok(())
        })
    }

    /// Authorize or revoke a market contract
    pub fn set_authorized_market(&mut self, caller: Address, market: Address, authorized: bool) -> Result<()> {
        validate_address(&market, "market")?;
        self.update_config(caller, "authorized_market", format!("{}={}", market, authorized), |config, _| {
            if authorized {
                config.authorized_markets.insert(market);
            } else {
                config.authorized_markets.remove(&market);
            }
            Ok(())
        })
    }

    /// Replace the intermediate tokens tried for 2-hop swaps
    pub fn set_supported_intermediates(&mut self, caller: Address, tokens: Vec<Address>) -> Result<()> {
        let value = format!("{} tokens", tokens.len());
        self.update_config(caller, "intermediate_tokens", value, |config, _| {
            config.intermediate_tokens = tokens;
            Ok(())
        })
    }

    /// Set the lowest accepted settlement asset price (1e8 scale)
    pub fn set_peg_floor(&mut self, caller: Address, floor: u128) -> Result<()> {
        self.update_config(caller, "peg_floor", floor.to_string(), |config, _| {
            config.peg_floor = floor;
            Ok(())
        })
    }

    /// Set the flash loan fee
    pub fn set_flash_loan_fee(&mut self, caller: Address, fee_bps: u128) -> Result<()> {
        self.update_config(caller, "flash_loan_fee_bps", fee_bps.to_string(), |config, _| {
            config.flash_loan_fee_bps = fee_bps;
            Ok(())
        })
    }

    /// Hand administration and protocol fee collection to a new owner
    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<()> {
        self.update_config(caller, "owner", new_owner.to_string(), |config, _| {
            config.owner = new_owner;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::RateParameters;
    use crate::error::Error;
    use crate::external::Voter;
    use crate::protocol::fixture::*;
    use crate::utils::constants::*;
    use crate::utils::ids::Address;

    #[test]
    fn test_admin_requires_owner() {
        let mut fx = Fixture::new();
        let result = fx.engine.set_peg_floor(fx.borrower, 0);
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert!(fx.engine.events().is_empty());
    }

    #[test]
    fn test_invalid_rates_rejected() {
        let mut fx = Fixture::new();
        let owner = fx.config.owner;
        let rates = RateParameters {
            protocol_fee_bps: 3_000,
            lender_premium_bps: 2_500,
            ..RateParameters::default()
        };
        assert!(fx.engine.set_rate_parameters(owner, rates).is_err());
        assert_eq!(fx.engine.config().rates, RateParameters::default());
    }

    #[test]
    fn test_too_many_intermediates_rejected() {
        let mut fx = Fixture::new();
        let owner = fx.config.owner;
        let tokens = (1..=4).map(|n| Address::from_low_u64(0x700 + n)).collect();
        assert!(fx.engine.set_supported_intermediates(owner, tokens).is_err());
    }

    #[test]
    fn test_default_pool_change_forces_revote() {
        let mut fx = Fixture::new();
        let id = fx.lock_for_borrower(1_000);
        fx.open(id, 0);
        assert!(!fx.engine.can_vote(id));

        fx.engine.env_mut().advance(60);
        let owner = fx.config.owner;
        let second = fx.second_pool;
        fx.engine.set_default_pools(owner, vec![second], vec![1]).unwrap();
        let watermark = fx.engine.config().default_pool_change_time;
        assert!(fx.engine.can_vote(id));

        fx.engine.increase_loan(fx.borrower, id, 10 * SETTLEMENT_UNIT).unwrap();
        assert_eq!(fx.engine.env().vote_of(id).unwrap().0, vec![second]);
        assert!(fx.engine.position(id).unwrap().vote_timestamp >= watermark);
        assert!(fx.engine.env().last_voted(id) > 0);
    }

    #[test]
    fn test_ownership_transfer() {
        let mut fx = Fixture::new();
        let owner = fx.config.owner;
        let next = Address::from_low_u64(0x0b);
        fx.engine.transfer_ownership(owner, next).unwrap();
        assert!(matches!(fx.engine.set_peg_floor(owner, 1), Err(Error::Unauthorized(_))));
        fx.engine.set_peg_floor(next, 1).unwrap();
        assert_eq!(fx.engine.config().peg_floor, 1);
    }
}
