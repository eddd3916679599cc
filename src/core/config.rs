//! Engine configuration and rate parameters.
//!
//! Parameters are divided into:
//! - Rate parameters: fee split and capacity inputs, owner-adjustable
//! - Wiring: addresses of the engine, vault and settlement asset
//! - Policy: default votes, approved tokens, authorized markets, swap tuning
//!
//! Configuration files are versioned; older layouts are migrated on load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::ids::Address;
use crate::utils::validation::{validate_address, validate_bps, validate_vote};

// ═══════════════════════════════════════════════════════════════════════════════
// RATE PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Externally configurable rates consumed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateParameters {
    /// Share of harvested rewards paid to the protocol owner
    pub protocol_fee_bps: u128,
    /// Share of harvested rewards paid into the vault as lender yield
    pub lender_premium_bps: u128,
    /// Rewards rate per unit of weight (divided by 1e6)
    pub rewards_rate: u128,
    /// Fee charged on funds routed after a position is debt-free
    pub zero_balance_fee_bps: u128,
    /// Capacity multiplier applied on top of the rewards rate
    pub multiplier: u128,
}

impl Default for RateParameters {
    fn default() -> Self {
        Self {
            protocol_fee_bps: DEFAULT_PROTOCOL_FEE_BPS,
            lender_premium_bps: DEFAULT_LENDER_PREMIUM_BPS,
            rewards_rate: DEFAULT_REWARDS_RATE,
            zero_balance_fee_bps: DEFAULT_ZERO_BALANCE_FEE_BPS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RateParameters {
    /// Combined share taken from harvested rewards before debt reduction
    pub fn combined_fee_bps(&self) -> u128 {
        self.protocol_fee_bps + self.lender_premium_bps
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        let combined = self.combined_fee_bps();
        if combined == 0 || combined > MAX_COMBINED_FEE_BPS {
            return Err(Error::InvalidParameter {
                name: "protocol_fee_bps + lender_premium_bps".into(),
                reason: format!("{} must be in (0, {}]", combined, MAX_COMBINED_FEE_BPS),
            });
        }
        validate_bps(self.zero_balance_fee_bps, "zero_balance_fee_bps")?;
        if self.rewards_rate == 0 {
            return Err(Error::InvalidParameter {
                name: "rewards_rate".into(),
                reason: "cannot be zero".into(),
            });
        }
        if self.multiplier == 0 {
            return Err(Error::InvalidParameter {
                name: "multiplier".into(),
                reason: "cannot be zero".into(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Current configuration layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admin allowed to mutate configuration; receives protocol fees
    pub owner: Address,
    /// Account holding collateral and in-flight funds
    pub engine: Address,
    /// Account holding lendable liquidity
    pub vault: Address,
    /// Stablecoin borrowed and repaid
    pub settlement_asset: Address,
    /// Fee split and capacity inputs
    pub rates: RateParameters,
    /// Pools voted for positions that do not vote themselves
    pub default_pools: Vec<Address>,
    /// Weights matching `default_pools`
    pub default_weights: Vec<u128>,
    /// Timestamp of the last default-pool change; forces re-votes
    pub default_pool_change_time: u64,
    /// Tokens a borrower may select as preferred payout token
    pub approved_tokens: BTreeSet<Address>,
    /// Market contracts allowed to act on behalf of borrowers
    pub authorized_markets: BTreeSet<Address>,
    /// Intermediate tokens tried for 2-hop swap routes
    pub intermediate_tokens: Vec<Address>,
    /// Slippage tolerance for harvest swaps
    pub slippage_bps: u128,
    /// Observations used for TWAP quotes
    pub twap_granularity: u32,
    /// Lowest accepted settlement asset price (1e8 scale)
    pub peg_floor: u128,
    /// Maximum accepted oracle price age
    pub max_price_staleness_secs: u64,
    /// Fee charged on flash loans, paid to the vault
    pub flash_loan_fee_bps: u128,
    /// Pool utilization ceiling for new borrows
    pub max_utilization_bps: u128,
}

impl EngineConfig {
    /// Create a configuration with default rates and policy
    pub fn new(owner: Address, engine: Address, vault: Address, settlement_asset: Address) -> Self {
        let mut approved_tokens = BTreeSet::new();
        approved_tokens.insert(settlement_asset);
        Self {
            owner,
            engine,
            vault,
            settlement_asset,
            rates: RateParameters::default(),
            default_pools: Vec::new(),
            default_weights: Vec::new(),
            default_pool_change_time: 0,
            approved_tokens,
            authorized_markets: BTreeSet::new(),
            intermediate_tokens: Vec::new(),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            twap_granularity: DEFAULT_TWAP_GRANULARITY,
            peg_floor: DEFAULT_PEG_FLOOR,
            max_price_staleness_secs: DEFAULT_MAX_PRICE_STALENESS_SECS,
            flash_loan_fee_bps: DEFAULT_FLASH_LOAN_FEE_BPS,
            max_utilization_bps: MAX_UTILIZATION_BPS,
        }
    }

    /// Replace the rate parameters (builder style)
    pub fn with_rates(mut self, rates: RateParameters) -> Self {
        self.rates = rates;
        self
    }

    /// Replace the default vote (builder style)
    pub fn with_default_vote(mut self, pools: Vec<Address>, weights: Vec<u128>) -> Self {
        self.default_pools = pools;
        self.default_weights = weights;
        self
    }

    /// Replace the swap intermediates (builder style)
    pub fn with_intermediates(mut self, tokens: Vec<Address>) -> Self {
        self.intermediate_tokens = tokens;
        self
    }

    /// Validate configuration is consistent
    pub fn validate(&self) -> Result<()> {
        self.rates.validate()?;
        validate_address(&self.owner, "owner")?;
        validate_address(&self.engine, "engine")?;
        validate_address(&self.vault, "vault")?;
        validate_address(&self.settlement_asset, "settlement_asset")?;

        if !self.default_pools.is_empty() || !self.default_weights.is_empty() {
            validate_vote(&self.default_pools, &self.default_weights)?;
        }
        if self.intermediate_tokens.len() > MAX_SUPPORTED_INTERMEDIATES {
            return Err(Error::InvalidParameter {
                name: "intermediate_tokens".into(),
                reason: format!(
                    "{} tokens exceeds maximum {}",
                    self.intermediate_tokens.len(),
                    MAX_SUPPORTED_INTERMEDIATES
                ),
            });
        }
        validate_bps(self.slippage_bps, "slippage_bps")?;
        validate_bps(self.flash_loan_fee_bps, "flash_loan_fee_bps")?;
        validate_bps(self.max_utilization_bps, "max_utilization_bps")?;
        if self.twap_granularity == 0 {
            return Err(Error::InvalidParameter {
                name: "twap_granularity".into(),
                reason: "cannot be zero".into(),
            });
        }
        Ok(())
    }

    /// Check whether a token may be used as preferred payout token
    pub fn is_approved_token(&self, token: &Address) -> bool {
        self.approved_tokens.contains(token)
    }

    /// Check whether a caller is an authorized market
    pub fn is_authorized_market(&self, caller: &Address) -> bool {
        self.authorized_markets.contains(caller)
    }

    /// Load from a JSON file, migrating older layouts
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let versioned: VersionedConfig =
            serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        let config = versioned.migrate();
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file in the current layout
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(&VersionedConfig::V2(self.clone()))
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Override rate parameters from `VELOAN_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        fn read(name: &str) -> Result<Option<u128>> {
            match std::env::var(name) {
                Ok(value) => value
                    .trim()
                    .parse::<u128>()
                    .map(Some)
                    .map_err(|e| Error::Config(format!("{}: {}", name, e))),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = read("VELOAN_PROTOCOL_FEE_BPS")? {
            self.rates.protocol_fee_bps = v;
        }
        if let Some(v) = read("VELOAN_LENDER_PREMIUM_BPS")? {
            self.rates.lender_premium_bps = v;
        }
        if let Some(v) = read("VELOAN_REWARDS_RATE")? {
            self.rates.rewards_rate = v;
        }
        if let Some(v) = read("VELOAN_ZERO_BALANCE_FEE_BPS")? {
            self.rates.zero_balance_fee_bps = v;
        }
        if let Some(v) = read("VELOAN_MULTIPLIER")? {
            self.rates.multiplier = v;
        }
        self.rates.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VERSIONED LAYOUTS
// ═══════════════════════════════════════════════════════════════════════════════

/// First configuration layout: no zero-balance fee, no swap tuning, no markets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigV1 {
    /// Admin address
    pub owner: Address,
    /// Engine custody account
    pub engine: Address,
    /// Vault account
    pub vault: Address,
    /// Settlement asset
    pub settlement_asset: Address,
    /// Protocol fee share
    pub protocol_fee_bps: u128,
    /// Lender premium share
    pub lender_premium_bps: u128,
    /// Rewards rate
    pub rewards_rate: u128,
    /// Capacity multiplier
    pub multiplier: u128,
    /// Default pools
    #[serde(default)]
    pub default_pools: Vec<Address>,
    /// Default weights
    #[serde(default)]
    pub default_weights: Vec<u128>,
}

/// Configuration file envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VersionedConfig {
    /// Legacy layout
    V1(ConfigV1),
    /// Current layout
    V2(EngineConfig),
}

impl VersionedConfig {
    /// Layout version number
    pub fn version(&self) -> u32 {
        match self {
            VersionedConfig::V1(_) => 1,
            VersionedConfig::V2(_) => 2,
        }
    }

    /// Upgrade to the current layout
    pub fn migrate(self) -> EngineConfig {
        match self {
            VersionedConfig::V1(v1) => {
                let mut config = EngineConfig::new(v1.owner, v1.engine, v1.vault, v1.settlement_asset);
                config.rates = RateParameters {
                    protocol_fee_bps: v1.protocol_fee_bps,
                    lender_premium_bps: v1.lender_premium_bps,
                    rewards_rate: v1.rewards_rate,
                    zero_balance_fee_bps: DEFAULT_ZERO_BALANCE_FEE_BPS,
                    multiplier: v1.multiplier,
                };
                config.default_pools = v1.default_pools;
                config.default_weights = v1.default_weights;
                config
            }
            VersionedConfig::V2(config) => config,
        }
    }
}
