//! Best-route selection and swaps of harvested tokens.
//!
//! A route is either the direct pool or a 2-hop path through one of the
//! configured intermediate tokens. Candidates are quoted with TWAP quotes and
//! the highest output wins. Swaps never execute with a zero expected output;
//! when no route exists or the router fails, the raw token goes to the
//! borrower instead.

use serde::{Deserialize, Serialize};

use crate::core::config::EngineConfig;
use crate::error::{Error, Result};
use crate::external::{Environment, SwapVenue, TokenLedger};
use crate::utils::ids::Address;
use crate::utils::math::amount_after_fee;

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTES
// ═══════════════════════════════════════════════════════════════════════════════

/// Quoted swap path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRoute {
    /// Tokens visited, input first
    pub path: Vec<Address>,
    /// Quoted output
    pub expected_out: u128,
}

impl SwapRoute {
    /// Minimum accepted output under `slippage_bps`
    pub fn min_out(&self, slippage_bps: u128) -> Result<u128> {
        amount_after_fee(self.expected_out, slippage_bps)
    }

    /// Number of pools traversed
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Quote a path hop by hop; `None` if any hop is missing or fails
fn quote_path<V: SwapVenue + ?Sized>(
    venue: &V,
    path: &[Address],
    amount_in: u128,
    granularity: u32,
) -> Option<u128> {
    let mut amount = amount_in;
    for hop in path.windows(2) {
        if !venue.has_pool(&hop[0], &hop[1]) {
            return None;
        }
        amount = venue.quote(&hop[0], &hop[1], amount, granularity).ok()?;
    }
    Some(amount)
}

/// Pick the route with the highest positive quoted output
pub fn best_route<V: SwapVenue + ?Sized>(
    venue: &V,
    from: &Address,
    to: &Address,
    amount_in: u128,
    intermediates: &[Address],
    granularity: u32,
) -> Option<SwapRoute> {
    let mut candidates = vec![vec![*from, *to]];
    candidates.extend(
        intermediates
            .iter()
            .filter(|mid| *mid != from && *mid != to)
            .map(|mid| vec![*from, *mid, *to]),
    );

    candidates
        .into_iter()
        .filter_map(|path| {
            let expected_out = quote_path(venue, &path, amount_in, granularity)?;
            Some(SwapRoute { path, expected_out })
        })
        .filter(|route| route.expected_out > 0)
        .max_by(|a, b| {
            // prefer fewer hops on ties
            a.expected_out
                .cmp(&b.expected_out)
                .then_with(|| b.hops().cmp(&a.hops()))
        })
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of converting one harvested token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapOutcome {
    /// Converted into the target token
    Swapped {
        /// Input token
        token: Address,
        /// Input amount
        amount_in: u128,
        /// Output received by the engine
        amount_out: u128,
    },
    /// Sent unconverted to the borrower
    Returned {
        /// Token returned
        token: Address,
        /// Amount returned
        amount: u128,
        /// Why the swap did not happen
        reason: String,
    },
}

/// Swap `amount` of `from` held by the engine into `to` along the best route
///
/// Fails with `NoSwapRoute` when no positive-output route exists; router
/// errors are passed through unchanged.
pub fn swap_best_route<E: Environment + ?Sized>(
    env: &mut E,
    config: &EngineConfig,
    from: &Address,
    to: &Address,
    amount: u128,
    recipient: &Address,
) -> Result<u128> {
    let route = best_route(
        &*env,
        from,
        to,
        amount,
        &config.intermediate_tokens,
        config.twap_granularity,
    )
    .ok_or_else(|| Error::NoSwapRoute {
        from: from.to_string(),
        to: to.to_string(),
    })?;

    let min_out = route.min_out(config.slippage_bps)?;
    tracing::debug!(
        from = %from,
        to = %to,
        amount_in = %amount,
        expected_out = %route.expected_out,
        min_out = %min_out,
        hops = route.hops(),
        "swapping along best route"
    );
    env.swap_exact_tokens_for_tokens(amount, min_out, &route.path, &config.engine, recipient)
}

/// Convert a harvested token into `target`, or hand it to `borrower` as is
pub fn swap_or_return<E: Environment + ?Sized>(
    env: &mut E,
    config: &EngineConfig,
    token: &Address,
    amount: u128,
    target: &Address,
    borrower: &Address,
) -> Result<SwapOutcome> {
    match swap_best_route(env, config, token, target, amount, &config.engine) {
        Ok(amount_out) => Ok(SwapOutcome::Swapped {
            token: *token,
            amount_in: amount,
            amount_out,
        }),
        Err(e) => {
            tracing::warn!(
                token = %token,
                amount = %amount,
                error = %e,
                "swap failed, returning token to borrower"
            );
            env.transfer(token, &config.engine, borrower, amount)?;
            Ok(SwapOutcome::Returned {
                token: *token,
                amount,
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::memory::SimulatedChain;

    fn token(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    fn config(intermediates: Vec<Address>) -> EngineConfig {
        EngineConfig::new(token(1), token(2), token(3), token(4)).with_intermediates(intermediates)
    }

    #[test]
    fn test_prefers_better_two_hop_route() {
        let mut chain = SimulatedChain::new(0);
        let (bribe, weth, usdc) = (token(0x10), token(0x11), token(4));
        chain.add_pool(&bribe, &usdc, 1, 1);
        chain.add_pool(&bribe, &weth, 3, 1);
        chain.add_pool(&weth, &usdc, 1, 1);

        let route = best_route(&chain, &bribe, &usdc, 100, &[weth], 3).unwrap();
        assert_eq!(route.path, vec![bribe, weth, usdc]);
        assert_eq!(route.expected_out, 300);
        assert_eq!(route.min_out(500).unwrap(), 285);
    }

    #[test]
    fn test_zero_output_route_rejected() {
        let mut chain = SimulatedChain::new(0);
        let (dust, usdc) = (token(0x10), token(4));
        chain.add_pool(&dust, &usdc, 0, 1);
        assert!(best_route(&chain, &dust, &usdc, 1_000, &[], 3).is_none());
    }

    #[test]
    fn test_swap_or_return_falls_back() {
        let cfg = config(vec![]);
        let mut chain = SimulatedChain::new(0);
        let (bribe, usdc, borrower) = (token(0x10), token(4), token(0xb0));
        chain.mint(&bribe, &cfg.engine, 50);

        let outcome = swap_or_return(&mut chain, &cfg, &bribe, 50, &usdc, &borrower).unwrap();
        assert!(matches!(outcome, SwapOutcome::Returned { amount: 50, .. }));
        assert_eq!(chain.balance_of(&bribe, &borrower), 50);
        assert_eq!(chain.balance_of(&bribe, &cfg.engine), 0);
    }

    #[test]
    fn test_swap_or_return_swaps() {
        let cfg = config(vec![]);
        let mut chain = SimulatedChain::new(0);
        let (bribe, usdc, borrower) = (token(0x10), token(4), token(0xb0));
        chain.add_pool(&bribe, &usdc, 2, 1);
        chain.mint(&bribe, &cfg.engine, 50);

        let outcome = swap_or_return(&mut chain, &cfg, &bribe, 50, &usdc, &borrower).unwrap();
        assert!(matches!(outcome, SwapOutcome::Swapped { amount_out: 100, .. }));
        assert_eq!(chain.balance_of(&usdc, &cfg.engine), 100);
    }

    #[test]
    fn test_router_failure_falls_back() {
        let cfg = config(vec![]);
        let mut chain = SimulatedChain::new(0);
        let (bribe, usdc, borrower) = (token(0x10), token(4), token(0xb0));
        chain.add_pool(&bribe, &usdc, 2, 1);
        chain.mint(&bribe, &cfg.engine, 50);
        chain.failures_mut().swaps = true;

        let outcome = swap_or_return(&mut chain, &cfg, &bribe, 50, &usdc, &borrower).unwrap();
        assert!(matches!(outcome, SwapOutcome::Returned { .. }));
        assert_eq!(chain.balance_of(&bribe, &borrower), 50);
    }
}
