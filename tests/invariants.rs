//! Property tests for the accounting invariants.
//!
//! Random operation sequences are applied to a fresh engine; after every
//! step the per-position and global accounting must still hold.

use proptest::prelude::*;

use veloan::core::max_loan::weight_for_capacity;
use veloan::external::memory::GaugeSet;
use veloan::prelude::*;
use veloan::utils::constants::*;

const START_TIME: u64 = 2_900 * EPOCH_DURATION_SECS + 3 * 86_400;
const LIQUIDITY: u128 = 100_000 * SETTLEMENT_UNIT;
const POSITIONS: u64 = 3;

// ═══════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Op {
    Borrow { slot: usize, amount: u128 },
    Pay { slot: usize, amount: u128 },
    Harvest { slot: usize, amount: u128 },
    Advance { seconds: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..POSITIONS as usize, 1u128..20_000_000_000).prop_map(|(slot, amount)| Op::Borrow { slot, amount }),
        (0..POSITIONS as usize, 0u128..20_000_000_000).prop_map(|(slot, amount)| Op::Pay { slot, amount }),
        (0..POSITIONS as usize, 1u128..5_000_000_000).prop_map(|(slot, amount)| Op::Harvest { slot, amount }),
        (1u64..3 * 86_400).prop_map(|seconds| Op::Advance { seconds }),
    ]
}

struct World {
    engine: LoanEngine<SimulatedChain>,
    borrower: Address,
    usdc: Address,
    gauge: GaugeSet,
    ids: Vec<TokenId>,
}

impl World {
    fn new() -> Self {
        let owner = Address::from_low_u64(0x0a);
        let engine_account = Address::from_low_u64(0xe0);
        let vault = Address::from_low_u64(0xfa);
        let usdc = Address::from_low_u64(0xc0);
        let pool = Address::from_low_u64(0x9001);
        let lender = Address::from_low_u64(0x1e);
        let borrower = Address::from_low_u64(0xb0);

        let mut chain = SimulatedChain::new(START_TIME);
        chain.set_price(&usdc, PRICE_PRECISION);
        let gauge = chain.add_gauge(&pool);
        chain.mint(&usdc, &lender, LIQUIDITY);
        chain.approve(&usdc, &lender, &vault, LIQUIDITY);
        chain.mint(&usdc, &borrower, LIQUIDITY);
        chain.approve(&usdc, &borrower, &engine_account, u128::MAX);

        let weight = weight_for_capacity(25_000 * SETTLEMENT_UNIT, &RateParameters::default()).unwrap();
        let ids = (0..POSITIONS)
            .map(|_| chain.create_permanent_lock(&borrower, weight))
            .collect::<Vec<_>>();

        let config = EngineConfig::new(owner, engine_account, vault, usdc).with_default_vote(vec![pool], vec![1]);
        let mut engine = LoanEngine::new(config, chain).unwrap();
        engine.deposit(lender, LIQUIDITY, lender).unwrap();
        for id in &ids {
            engine
                .request_loan(borrower, *id, 0, PositionOptions::with_policy(ZeroBalanceOption::PayToOwner))
                .unwrap();
        }

        Self {
            engine,
            borrower,
            usdc,
            gauge,
            ids,
        }
    }

    fn apply(&mut self, op: &Op) {
        // Rejected operations must leave no trace, so their errors are ignored
        match *op {
            Op::Borrow { slot, amount } => {
                let _ = self.engine.increase_loan(self.borrower, self.ids[slot], amount);
            }
            Op::Pay { slot, amount } => {
                let _ = self.engine.pay(self.borrower, self.ids[slot], amount);
            }
            Op::Harvest { slot, amount } => {
                let (bribe, usdc, id) = (self.gauge.bribe, self.usdc, self.ids[slot]);
                self.engine.env_mut().add_reward(&bribe, id, &usdc, amount);
                let claims = vec![RewardClaim::new(bribe, vec![usdc])];
                let _ = self.engine.claim(id, &claims);
            }
            Op::Advance { seconds } => {
                self.engine.env_mut().advance(seconds);
                let usdc = self.usdc;
                self.engine.env_mut().set_price(&usdc, PRICE_PRECISION);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_accounting_holds_after_any_sequence(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let mut world = World::new();
        for op in &ops {
            let hash_before = world.engine.state_hash().unwrap();
            let events_before = world.engine.events().len();
            world.apply(op);

            let registry = world.engine.registry();
            let sum: u128 = registry.all_positions().iter().map(|p| p.outstanding_capital).sum();
            prop_assert_eq!(sum, registry.total_outstanding_capital());
            for position in registry.all_positions() {
                prop_assert!(position.balance >= position.outstanding_capital);
                prop_assert!(position.unpaid_fees <= position.balance);
            }
            prop_assert!(world.engine.verify_invariants().is_ok());
            prop_assert_eq!(world.engine.env().balance_of(&world.usdc, &Address::from_low_u64(0xe0)), 0);
            prop_assert_eq!(world.engine.env().open_sections(), 0);

            if world.engine.events().len() == events_before {
                prop_assert_eq!(world.engine.state_hash().unwrap(), hash_before);
            }
        }
    }

    #[test]
    fn prop_max_loan_respects_utilization(
        weight in 0u128..1_000_000 * GOVERNANCE_UNIT,
        balance in 0u128..2_000_000 * SETTLEMENT_UNIT,
        pool_balance in 0u128..5_000_000 * SETTLEMENT_UNIT,
        outstanding in 0u128..5_000_000 * SETTLEMENT_UNIT,
    ) {
        let inputs = CapacityInputs {
            weight,
            balance,
            pool_balance,
            total_outstanding_capital: outstanding,
        };
        let result = calculate_max_loan(inputs, &RateParameters::default(), MAX_UTILIZATION_BPS).unwrap();

        prop_assert!(result.max_loan <= pool_balance);
        let ceiling = (pool_balance + outstanding) * MAX_UTILIZATION_BPS / BPS_DIVISOR;
        prop_assert!(outstanding + result.max_loan <= ceiling.max(outstanding));
        let cap = result.max_loan_ignoring_supply * BPS_DIVISOR / ORIGINATION_BUFFER_DENOMINATOR;
        if result.max_loan > 0 {
            let fee = result.max_loan * ORIGINATION_FEE_BPS / BPS_DIVISOR;
            prop_assert!(balance + result.max_loan <= cap);
            prop_assert!(balance + result.max_loan + fee <= result.max_loan_ignoring_supply);
        }
    }

    #[test]
    fn prop_vault_shares_never_exceed_deposits_value(
        deposit in 1_000_000u128..1_000_000_000_000,
        premium in 0u128..10_000_000_000,
    ) {
        let lender = Address::from_low_u64(0x1e);
        let mut vault = LendingVault::new();
        let shares = vault.deposit(deposit, lender, VaultAssets::new(0, 0)).unwrap();
        let assets = VaultAssets::new(deposit + premium, 0);
        let redeemable = vault.convert_to_assets(shares, assets).unwrap();
        prop_assert!(redeemable <= deposit + premium);
        prop_assert!(redeemable >= deposit);
        prop_assert!(vault.verify_invariant());
    }
}
