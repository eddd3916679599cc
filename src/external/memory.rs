//! In-memory host implementing every collaborator interface.
//!
//! `SimulatedChain` keeps one shared ledger for tokens, escrow locks, votes,
//! reward claims, pools and prices so that the engine can be driven end to end
//! without a real chain. Failures of the best-effort services can be injected
//! through [`Failures`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::external::*;
use crate::utils::ids::{Address, TokenId};
use crate::utils::math::*;

/// Longest finite lock; weight decays linearly over it
pub const MAX_LOCK_DURATION_SECS: u64 = 4 * 365 * 86_400;

const GOVERNANCE_TOKEN_ID: u64 = 0x0e10;
const ESCROW_ACCOUNT_ID: u64 = 0x0e5c;
const FIRST_GENERATED_ADDRESS: u64 = 0x1_0000;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Injected failures of external services
#[derive(Debug, Clone, Default)]
pub struct Failures {
    /// `vote` and `poke` fail
    pub votes: bool,
    /// Rebase `claim` fails
    pub rebase: bool,
    /// Swaps fail after quoting
    pub swaps: bool,
    /// `claim_fees` fails for these reward contracts
    pub reward_contracts: BTreeSet<Address>,
}

#[derive(Debug, Clone)]
struct Nft {
    owner: Address,
    lock: LockedBalance,
}

#[derive(Debug, Clone)]
struct CastVote {
    pools: Vec<Address>,
    weights: Vec<u128>,
    timestamp: u64,
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    now: u64,
    balances: HashMap<(Address, Address), u128>,
    allowances: HashMap<(Address, Address, Address), u128>,
    nfts: BTreeMap<TokenId, Nft>,
    next_token_id: u64,
    next_address: u64,
    votes: BTreeMap<TokenId, CastVote>,
    gauges: HashMap<Address, Address>,
    fee_rewards: HashMap<Address, Address>,
    bribe_rewards: HashMap<Address, Address>,
    pending_rewards: HashMap<(Address, TokenId, Address), u128>,
    rebases: BTreeMap<TokenId, u128>,
    rates: HashMap<(Address, Address), (u128, u128)>,
    prices: HashMap<Address, PriceData>,
    failures: Failures,
}

/// Reward contracts attached to a pool's gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaugeSet {
    /// Gauge address
    pub gauge: Address,
    /// Trading-fee reward contract
    pub fees: Address,
    /// Bribe reward contract
    pub bribe: Address,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATED CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory host for tests and simulations
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    state: ChainState,
    snapshots: Vec<ChainState>,
    governance_token: Address,
    escrow_account: Address,
}

impl SimulatedChain {
    /// Create an empty chain starting at `timestamp`
    pub fn new(timestamp: u64) -> Self {
        let state = ChainState {
            now: timestamp,
            next_token_id: 1,
            next_address: FIRST_GENERATED_ADDRESS,
            ..ChainState::default()
        };
        Self {
            state,
            snapshots: Vec::new(),
            governance_token: Address::from_low_u64(GOVERNANCE_TOKEN_ID),
            escrow_account: Address::from_low_u64(ESCROW_ACCOUNT_ID),
        }
    }

    /// Governance token locked in the escrow
    pub fn governance_token(&self) -> Address {
        self.governance_token
    }

    /// Set the current time
    pub fn set_time(&mut self, timestamp: u64) {
        self.state.now = timestamp;
    }

    /// Move time forward
    pub fn advance(&mut self, seconds: u64) {
        self.state.now += seconds;
    }

    /// Injected failures
    pub fn failures_mut(&mut self) -> &mut Failures {
        &mut self.state.failures
    }

    /// Number of open atomic sections
    pub fn open_sections(&self) -> usize {
        self.snapshots.len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FIXTURES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Credit tokens to an account
    pub fn mint(&mut self, token: &Address, account: &Address, amount: u128) {
        *self.state.balances.entry((*token, *account)).or_insert(0) += amount;
    }

    /// Create a finite lock of `amount` for `owner`
    pub fn create_lock(&mut self, owner: &Address, amount: u128, duration: u64) -> TokenId {
        let end = self.state.now + duration;
        self.insert_nft(*owner, amount, end, false)
    }

    /// Create a permanent lock of `amount` for `owner`
    pub fn create_permanent_lock(&mut self, owner: &Address, amount: u128) -> TokenId {
        self.insert_nft(*owner, amount, 0, true)
    }

    /// Attach a gauge with fee and bribe contracts to `pool`
    pub fn add_gauge(&mut self, pool: &Address) -> GaugeSet {
        let set = GaugeSet {
            gauge: self.next_address(),
            fees: self.next_address(),
            bribe: self.next_address(),
        };
        self.state.gauges.insert(*pool, set.gauge);
        self.state.fee_rewards.insert(set.gauge, set.fees);
        self.state.bribe_rewards.insert(set.gauge, set.bribe);
        set
    }

    /// Make `amount` of `token` claimable by `id` from `reward_contract`
    pub fn add_reward(&mut self, reward_contract: &Address, id: TokenId, token: &Address, amount: u128) {
        *self
            .state
            .pending_rewards
            .entry((*reward_contract, id, *token))
            .or_insert(0) += amount;
    }

    /// Make a rebase claimable by `id`
    pub fn add_rebase(&mut self, id: TokenId, amount: u128) {
        *self.state.rebases.entry(id).or_insert(0) += amount;
    }

    /// Create a pool trading `token_a` for `token_b` at `numerator / denominator`
    pub fn add_pool(&mut self, token_a: &Address, token_b: &Address, numerator: u128, denominator: u128) {
        self.state.rates.insert((*token_a, *token_b), (numerator, denominator));
        self.state.rates.insert((*token_b, *token_a), (denominator, numerator));
    }

    /// Publish a price for `asset`
    pub fn set_price(&mut self, asset: &Address, price: u128) {
        let updated_at = self.state.now;
        self.state.prices.insert(*asset, PriceData { price, updated_at });
    }

    /// Publish a price observed at a given time
    pub fn set_price_at(&mut self, asset: &Address, price: u128, updated_at: u64) {
        self.state.prices.insert(*asset, PriceData { price, updated_at });
    }

    /// Pools and weights of an NFT's current vote
    pub fn vote_of(&self, id: TokenId) -> Option<(Vec<Address>, Vec<u128>)> {
        self.state
            .votes
            .get(&id)
            .map(|v| (v.pools.clone(), v.weights.clone()))
    }

    fn insert_nft(&mut self, owner: Address, amount: u128, end: u64, is_permanent: bool) -> TokenId {
        let id = TokenId(self.state.next_token_id);
        self.state.next_token_id += 1;
        self.state.nfts.insert(
            id,
            Nft {
                owner,
                lock: LockedBalance {
                    amount,
                    end,
                    is_permanent,
                },
            },
        );
        id
    }

    fn next_address(&mut self) -> Address {
        let address = Address::from_low_u64(self.state.next_address);
        self.state.next_address += 1;
        address
    }

    fn nft(&self, id: TokenId) -> Result<&Nft> {
        self.state
            .nfts
            .get(&id)
            .ok_or_else(|| Error::external("voting escrow", format!("token {} does not exist", id)))
    }

    fn nft_mut(&mut self, id: TokenId) -> Result<&mut Nft> {
        self.state
            .nfts
            .get_mut(&id)
            .ok_or_else(|| Error::external("voting escrow", format!("token {} does not exist", id)))
    }

    fn debit(&mut self, token: &Address, account: &Address, amount: u128) -> Result<()> {
        let available = self.balance_of(token, account);
        if available < amount {
            return Err(Error::InsufficientBalance {
                token: token.to_string(),
                required: amount,
                available,
            });
        }
        self.state.balances.insert((*token, *account), available - amount);
        Ok(())
    }

    fn path_output(&self, amount_in: u128, path: &[Address]) -> Result<Vec<u128>> {
        if path.len() < 2 {
            return Err(Error::external("router", "path needs at least two tokens"));
        }
        let mut amounts = Vec::with_capacity(path.len());
        amounts.push(amount_in);
        let mut current = amount_in;
        for hop in path.windows(2) {
            let (numerator, denominator) = self
                .state
                .rates
                .get(&(hop[0], hop[1]))
                .copied()
                .ok_or_else(|| Error::external("router", format!("no pool {} -> {}", hop[0], hop[1])))?;
            current = if denominator == 0 {
                0
            } else {
                mul_div(current, numerator, denominator)?
            };
            amounts.push(current);
        }
        Ok(amounts)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRAIT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════════

impl TokenLedger for SimulatedChain {
    fn balance_of(&self, token: &Address, account: &Address) -> u128 {
        self.state
            .balances
            .get(&(*token, *account))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(&mut self, token: &Address, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        self.debit(token, from, amount)?;
        self.mint(token, to, amount);
        Ok(())
    }

    fn approve(&mut self, token: &Address, owner: &Address, spender: &Address, amount: u128) {
        self.state.allowances.insert((*token, *owner, *spender), amount);
    }

    fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> u128 {
        self.state
            .allowances
            .get(&(*token, *owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<()> {
        let approved = self.allowance(token, from, spender);
        if approved < amount {
            return Err(Error::InsufficientAllowance {
                token: token.to_string(),
                required: amount,
                approved,
            });
        }
        self.transfer(token, from, to, amount)?;
        self.approve(token, from, spender, approved - amount);
        Ok(())
    }
}

impl VotingEscrow for SimulatedChain {
    fn escrow_token(&self) -> Address {
        self.governance_token
    }

    fn owner_of(&self, id: TokenId) -> Result<Address> {
        Ok(self.nft(id)?.owner)
    }

    fn locked(&self, id: TokenId) -> Result<LockedBalance> {
        Ok(self.nft(id)?.lock)
    }

    fn lock_permanent(&mut self, id: TokenId) -> Result<()> {
        let now = self.state.now;
        let nft = self.nft_mut(id)?;
        if nft.lock.is_expired(now) {
            return Err(Error::external("voting escrow", "lock expired"));
        }
        nft.lock.is_permanent = true;
        nft.lock.end = 0;
        Ok(())
    }

    fn balance_of_nft_at(&self, id: TokenId, timestamp: u64) -> u128 {
        let Ok(nft) = self.nft(id) else {
            return 0;
        };
        let lock = nft.lock;
        if lock.is_permanent {
            return lock.amount;
        }
        if timestamp >= lock.end {
            return 0;
        }
        let remaining = (lock.end - timestamp).min(MAX_LOCK_DURATION_SECS);
        lock.amount * u128::from(remaining) / u128::from(MAX_LOCK_DURATION_SECS)
    }

    fn increase_amount(&mut self, payer: &Address, id: TokenId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::external("voting escrow", "zero increase"));
        }
        let now = self.state.now;
        if self.nft(id)?.lock.is_expired(now) {
            return Err(Error::external("voting escrow", "lock expired"));
        }
        let token = self.governance_token;
        let escrow = self.escrow_account;
        self.transfer(&token, payer, &escrow, amount)?;
        let nft = self.nft_mut(id)?;
        nft.lock.amount = safe_add(nft.lock.amount, amount)?;
        Ok(())
    }

    fn merge(&mut self, caller: &Address, from: TokenId, to: TokenId) -> Result<()> {
        if from == to {
            return Err(Error::external("voting escrow", "cannot merge a token into itself"));
        }
        let now = self.state.now;
        let source = self.nft(from)?.clone();
        let target = self.nft(to)?.clone();
        if source.owner != *caller || target.owner != *caller {
            return Err(Error::external("voting escrow", "caller must hold both tokens"));
        }
        if target.lock.is_expired(now) {
            return Err(Error::external("voting escrow", "target lock expired"));
        }
        self.state.nfts.remove(&from);
        self.state.votes.remove(&from);
        let nft = self.nft_mut(to)?;
        nft.lock.amount = safe_add(nft.lock.amount, source.lock.amount)?;
        Ok(())
    }

    fn transfer_nft(&mut self, from: &Address, to: &Address, id: TokenId) -> Result<()> {
        let nft = self.nft_mut(id)?;
        if nft.owner != *from {
            return Err(Error::external("voting escrow", format!("{} does not hold {}", from, id)));
        }
        nft.owner = *to;
        Ok(())
    }
}

impl Voter for SimulatedChain {
    fn vote(&mut self, id: TokenId, pools: &[Address], weights: &[u128]) -> Result<()> {
        if self.state.failures.votes {
            return Err(Error::external("voter", "vote rejected"));
        }
        self.nft(id)?;
        if pools.is_empty() || pools.len() != weights.len() {
            return Err(Error::external("voter", "pool/weight mismatch"));
        }
        if let Some(pool) = pools.iter().find(|p| !self.state.gauges.contains_key(*p)) {
            return Err(Error::external("voter", format!("pool {} has no gauge", pool)));
        }
        let timestamp = self.state.now;
        self.state.votes.insert(
            id,
            CastVote {
                pools: pools.to_vec(),
                weights: weights.to_vec(),
                timestamp,
            },
        );
        Ok(())
    }

    fn poke(&mut self, id: TokenId) -> Result<()> {
        if self.state.failures.votes {
            return Err(Error::external("voter", "poke rejected"));
        }
        if !self.state.votes.contains_key(&id) {
            return Err(Error::external("voter", format!("{} has not voted", id)));
        }
        Ok(())
    }

    fn last_voted(&self, id: TokenId) -> u64 {
        self.state.votes.get(&id).map(|v| v.timestamp).unwrap_or(0)
    }

    fn gauges(&self, pool: &Address) -> Option<Address> {
        self.state.gauges.get(pool).copied()
    }

    fn gauge_to_fees(&self, gauge: &Address) -> Option<Address> {
        self.state.fee_rewards.get(gauge).copied()
    }

    fn gauge_to_bribe(&self, gauge: &Address) -> Option<Address> {
        self.state.bribe_rewards.get(gauge).copied()
    }

    fn claim_fees(&mut self, reward_contracts: &[Address], tokens: &[Vec<Address>], id: TokenId) -> Result<()> {
        if reward_contracts.len() != tokens.len() {
            return Err(Error::external("voter", "contract/token list mismatch"));
        }
        if let Some(bad) = reward_contracts
            .iter()
            .find(|c| self.state.failures.reward_contracts.contains(*c))
        {
            return Err(Error::external("voter", format!("claim from {} reverted", bad)));
        }
        let owner = self.owner_of(id)?;
        for (contract, contract_tokens) in reward_contracts.iter().zip(tokens) {
            for token in contract_tokens {
                if let Some(amount) = self.state.pending_rewards.remove(&(*contract, id, *token)) {
                    self.mint(token, &owner, amount);
                }
            }
        }
        Ok(())
    }
}

impl RebaseDistributor for SimulatedChain {
    fn claimable(&self, id: TokenId) -> u128 {
        self.state.rebases.get(&id).copied().unwrap_or(0)
    }

    fn claim(&mut self, id: TokenId) -> Result<u128> {
        if self.state.failures.rebase {
            return Err(Error::external("rebase distributor", "claim reverted"));
        }
        let amount = self.state.rebases.remove(&id).unwrap_or(0);
        if amount > 0 {
            let nft = self.nft_mut(id)?;
            nft.lock.amount = safe_add(nft.lock.amount, amount)?;
        }
        Ok(amount)
    }
}

impl SwapVenue for SimulatedChain {
    fn has_pool(&self, token_a: &Address, token_b: &Address) -> bool {
        self.state.rates.contains_key(&(*token_a, *token_b))
    }

    fn quote(&self, from: &Address, to: &Address, amount_in: u128, granularity: u32) -> Result<u128> {
        if granularity == 0 {
            return Err(Error::external("router", "granularity must be positive"));
        }
        let amounts = self.path_output(amount_in, &[*from, *to])?;
        Ok(amounts[1])
    }

    fn get_amounts_out(&self, amount_in: u128, path: &[Address]) -> Result<Vec<u128>> {
        self.path_output(amount_in, path)
    }

    fn swap_exact_tokens_for_tokens(
        &mut self,
        amount_in: u128,
        amount_out_min: u128,
        path: &[Address],
        payer: &Address,
        recipient: &Address,
    ) -> Result<u128> {
        if self.state.failures.swaps {
            return Err(Error::external("router", "swap reverted"));
        }
        let amounts = self.path_output(amount_in, path)?;
        let out = amounts.last().copied().unwrap_or(0);
        if out < amount_out_min {
            return Err(Error::external(
                "router",
                format!("insufficient output: {} < {}", out, amount_out_min),
            ));
        }
        self.debit(&path[0], payer, amount_in)?;
        self.mint(&path[path.len() - 1], recipient, out);
        Ok(out)
    }
}

impl PriceOracle for SimulatedChain {
    fn latest_price(&self, asset: &Address) -> Result<PriceData> {
        self.state
            .prices
            .get(asset)
            .copied()
            .ok_or_else(|| Error::external("oracle", format!("no price for {}", asset)))
    }
}

impl Clock for SimulatedChain {
    fn now(&self) -> u64 {
        self.state.now
    }
}

impl Transactional for SimulatedChain {
    fn begin(&mut self) {
        self.snapshots.push(self.state.clone());
    }

    fn commit(&mut self) {
        self.snapshots.pop();
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshots.pop() {
            self.state = snapshot;
        }
    }
}
