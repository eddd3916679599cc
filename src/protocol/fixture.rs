//! Shared engine fixture for unit tests.

use crate::core::config::EngineConfig;
use crate::core::max_loan::weight_for_capacity;
use crate::core::position::PositionOptions;
use crate::external::memory::{GaugeSet, SimulatedChain};
use crate::external::TokenLedger;
use crate::protocol::engine::LoanEngine;
use crate::utils::constants::*;
use crate::utils::ids::{Address, TokenId};

/// Wednesday of epoch 2900
pub(crate) const START_TIME: u64 = 2_900 * EPOCH_DURATION_SECS + 3 * 86_400;

/// Liquidity seeded into the vault
pub(crate) const SEED_LIQUIDITY: u128 = 1_000_000 * SETTLEMENT_UNIT;

pub(crate) struct Fixture {
    pub engine: LoanEngine<SimulatedChain>,
    pub config: EngineConfig,
    pub borrower: Address,
    pub lender: Address,
    pub usdc: Address,
    pub bribe_token: Address,
    pub pool: Address,
    pub second_pool: Address,
    pub gauge: GaugeSet,
}

impl Fixture {
    pub fn new() -> Self {
        let owner = Address::from_low_u64(0x0a);
        let engine_address = Address::from_low_u64(0xe0);
        let vault = Address::from_low_u64(0xfa);
        let usdc = Address::from_low_u64(0xc0);
        let bribe_token = Address::from_low_u64(0xb1);
        let pool = Address::from_low_u64(0x9001);
        let second_pool = Address::from_low_u64(0x9002);

        let mut chain = SimulatedChain::new(START_TIME);
        chain.set_price(&usdc, PRICE_PRECISION);
        let gauge = chain.add_gauge(&pool);
        chain.add_gauge(&second_pool);
        let governance = chain.governance_token();
        // 1 governance token = 1 USDC
        chain.add_pool(&governance, &usdc, 1, GOVERNANCE_UNIT / SETTLEMENT_UNIT);
        chain.add_pool(&bribe_token, &usdc, 1, 1);

        let config = EngineConfig::new(owner, engine_address, vault, usdc)
            .with_default_vote(vec![pool], vec![100]);
        let engine = LoanEngine::new(config.clone(), chain).unwrap();

        let mut fixture = Self {
            engine,
            config,
            borrower: Address::from_low_u64(0xb0),
            lender: Address::from_low_u64(0x1e),
            usdc,
            bribe_token,
            pool,
            second_pool,
            gauge,
        };
        let lender = fixture.lender;
        fixture.fund_and_approve_vault(lender, SEED_LIQUIDITY);
        fixture.engine.deposit(lender, SEED_LIQUIDITY, lender).unwrap();
        fixture.engine.drain_events();
        fixture
    }

    /// Escrow weight worth `usdc` whole units of collateral capacity
    pub fn weight_for(&self, usdc: u128) -> u128 {
        weight_for_capacity(usdc * SETTLEMENT_UNIT, &self.config.rates).unwrap()
    }

    /// Permanent lock owned by the borrower
    pub fn lock_for_borrower(&mut self, usdc: u128) -> TokenId {
        let weight = self.weight_for(usdc);
        let borrower = self.borrower;
        self.engine.env_mut().create_permanent_lock(&borrower, weight)
    }

    /// Open a position with default options and borrow `amount`
    pub fn open(&mut self, id: TokenId, amount: u128) {
        self.engine
            .request_loan(self.borrower, id, amount, PositionOptions::default())
            .unwrap();
    }

    /// Give `who` settlement tokens and let the engine pull them
    pub fn fund_and_approve(&mut self, who: Address, amount: u128) {
        let (usdc, engine) = (self.usdc, self.config.engine);
        let env = self.engine.env_mut();
        env.mint(&usdc, &who, amount);
        let current = env.allowance(&usdc, &who, &engine);
        env.approve(&usdc, &who, &engine, current + amount);
    }

    /// Give `who` settlement tokens and let the vault pull them
    pub fn fund_and_approve_vault(&mut self, who: Address, amount: u128) {
        let (usdc, vault) = (self.usdc, self.config.vault);
        let env = self.engine.env_mut();
        env.mint(&usdc, &who, amount);
        let current = env.allowance(&usdc, &who, &vault);
        env.approve(&usdc, &who, &vault, current + amount);
    }

    /// Make `amount` of `token` claimable by `id` from the pool's bribe contract
    pub fn add_bribe(&mut self, id: TokenId, token: Address, amount: u128) {
        let bribe = self.gauge.bribe;
        self.engine.env_mut().add_reward(&bribe, id, &token, amount);
    }

    pub fn balance(&self, token: &Address, account: &Address) -> u128 {
        self.engine.env().balance_of(token, account)
    }
}
