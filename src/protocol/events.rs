//! Engine events for state change notifications.
//!
//! Every lifecycle step, fee movement and swallowed external failure is
//! recorded so callers can reconstruct what an operation did. Events of a
//! failed operation are discarded together with its state changes.

use serde::{Deserialize, Serialize};

use crate::core::position::ZeroBalanceOption;
use crate::error::{Error, Result};
use crate::utils::ids::{Address, Hash, TokenId};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All engine event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    // Lifecycle Events
    /// Collateral deposited and position opened
    LoanRequested(LoanRequestedEvent),
    /// Debt increased
    LoanIncreased(LoanIncreasedEvent),
    /// Payment applied to a position
    LoanPaid(LoanPaidEvent),
    /// Collateral released and position deleted
    CollateralClaimed(CollateralClaimedEvent),
    /// Another lock folded into the collateral
    CollateralMerged(CollateralMergedEvent),
    /// Borrower reassigned by a market
    OwnershipTransferred(OwnershipTransferredEvent),

    // Harvest Events
    /// Rewards harvested for a position
    RewardsClaimed(RewardsClaimedEvent),
    /// Fee collected
    FeePaid(FeePaidEvent),
    /// Funds routed by the zero-balance policy
    ZeroBalanceDistributed(ZeroBalanceDistributedEvent),
    /// Funds compounded into the collateral lock
    CollateralReinvested(CollateralReinvestedEvent),
    /// Rebase added to the collateral lock
    RebaseClaimed(RebaseClaimedEvent),
    /// Harvested token handed to the borrower unswapped
    SwapFallback(SwapFallbackEvent),
    /// Vote cast for a position
    Voted(VotedEvent),
    /// Best-effort external call failed and was skipped
    ExternalCallSkipped(ExternalCallSkippedEvent),

    // Vault Events
    /// Liquidity deposited
    VaultDeposit(VaultDepositEvent),
    /// Liquidity withdrawn
    VaultWithdraw(VaultWithdrawEvent),
    /// Flash loan settled
    FlashLoan(FlashLoanEvent),

    // Admin Events
    /// Configuration changed
    ConfigChanged(ConfigChangedEvent),
}

impl LoanEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LoanRequested(_) => "LoanRequested",
            Self::LoanIncreased(_) => "LoanIncreased",
            Self::LoanPaid(_) => "LoanPaid",
            Self::CollateralClaimed(_) => "CollateralClaimed",
            Self::CollateralMerged(_) => "CollateralMerged",
            Self::OwnershipTransferred(_) => "OwnershipTransferred",
            Self::RewardsClaimed(_) => "RewardsClaimed",
            Self::FeePaid(_) => "FeePaid",
            Self::ZeroBalanceDistributed(_) => "ZeroBalanceDistributed",
            Self::CollateralReinvested(_) => "CollateralReinvested",
            Self::RebaseClaimed(_) => "RebaseClaimed",
            Self::SwapFallback(_) => "SwapFallback",
            Self::Voted(_) => "Voted",
            Self::ExternalCallSkipped(_) => "ExternalCallSkipped",
            Self::VaultDeposit(_) => "VaultDeposit",
            Self::VaultWithdraw(_) => "VaultWithdraw",
            Self::FlashLoan(_) => "FlashLoan",
            Self::ConfigChanged(_) => "ConfigChanged",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::LoanRequested(e) => e.timestamp,
            Self::LoanIncreased(e) => e.timestamp,
            Self::LoanPaid(e) => e.timestamp,
            Self::CollateralClaimed(e) => e.timestamp,
            Self::CollateralMerged(e) => e.timestamp,
            Self::OwnershipTransferred(e) => e.timestamp,
            Self::RewardsClaimed(e) => e.timestamp,
            Self::FeePaid(e) => e.timestamp,
            Self::ZeroBalanceDistributed(e) => e.timestamp,
            Self::CollateralReinvested(e) => e.timestamp,
            Self::RebaseClaimed(e) => e.timestamp,
            Self::SwapFallback(e) => e.timestamp,
            Self::Voted(e) => e.timestamp,
            Self::ExternalCallSkipped(e) => e.timestamp,
            Self::VaultDeposit(e) => e.timestamp,
            Self::VaultWithdraw(e) => e.timestamp,
            Self::FlashLoan(e) => e.timestamp,
            Self::ConfigChanged(e) => e.timestamp,
        }
    }

    /// Position the event concerns, if any
    pub fn token_id(&self) -> Option<TokenId> {
        match self {
            Self::LoanRequested(e) => Some(e.token_id),
            Self::LoanIncreased(e) => Some(e.token_id),
            Self::LoanPaid(e) => Some(e.token_id),
            Self::CollateralClaimed(e) => Some(e.token_id),
            Self::CollateralMerged(e) => Some(e.token_id),
            Self::OwnershipTransferred(e) => Some(e.token_id),
            Self::RewardsClaimed(e) => Some(e.token_id),
            Self::FeePaid(e) => e.token_id,
            Self::ZeroBalanceDistributed(e) => Some(e.token_id),
            Self::CollateralReinvested(e) => Some(e.token_id),
            Self::RebaseClaimed(e) => Some(e.token_id),
            Self::SwapFallback(e) => Some(e.token_id),
            Self::Voted(e) => Some(e.token_id),
            Self::ExternalCallSkipped(e) => e.token_id,
            Self::VaultDeposit(_)
            | Self::VaultWithdraw(_)
            | Self::FlashLoan(_)
            | Self::ConfigChanged(_) => None,
        }
    }

    /// Compute hash of event
    pub fn hash(&self) -> Result<Hash> {
        let bytes = bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Hash::sha256(&bytes))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when a position is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequestedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Borrower
    pub borrower: Address,
    /// Escrow weight at creation
    pub weight: u128,
    /// Amount borrowed on creation
    pub amount: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when debt is increased
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanIncreasedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Recipient of the borrowed funds
    pub recipient: Address,
    /// Amount disbursed
    pub amount: u128,
    /// Origination fee added to the balance
    pub origination_fee: u128,
    /// Balance after the increase
    pub balance: u128,
    /// Automated top-up rather than an explicit request
    pub top_up: bool,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a payment is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPaidEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Amount applied
    pub amount: u128,
    /// Portion collected as origination fees
    pub fees: u128,
    /// Portion returned to the vault
    pub principal: u128,
    /// Portion beyond the balance
    pub excess: u128,
    /// Paid by a caller rather than from harvested rewards
    pub manual: bool,
    /// Balance after the payment
    pub balance: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when collateral is released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralClaimedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Borrower receiving the NFT
    pub borrower: Address,
    /// Weight removed from the total
    pub weight: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a lock is merged into collateral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralMergedEvent {
    /// Collateral id receiving the lock
    pub token_id: TokenId,
    /// Merged (burned) NFT
    pub merged_from: TokenId,
    /// Weight added
    pub weight_added: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a market reassigns the borrower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransferredEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Previous borrower
    pub from: Address,
    /// New borrower
    pub to: Address,
    /// Market performing the transfer
    pub market: Address,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted after a harvest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsClaimedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Token the rewards were consolidated into
    pub asset: Address,
    /// Rewards received in `asset`
    pub total_rewards: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Kind of fee collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeKind {
    /// Origination fee repaid
    Origination,
    /// Protocol share of harvested rewards
    Protocol,
    /// Lender share of harvested rewards
    LenderPremium,
    /// Fee on zero-balance distributions
    ZeroBalance,
    /// Flash loan fee
    FlashLoan,
}

/// Event emitted when a fee is collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePaidEvent {
    /// Collateral id, if the fee is tied to a position
    pub token_id: Option<TokenId>,
    /// Fee kind
    pub kind: FeeKind,
    /// Token the fee was paid in
    pub token: Address,
    /// Fee recipient
    pub recipient: Address,
    /// Amount
    pub amount: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when funds are routed by the zero-balance policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroBalanceDistributedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Policy applied
    pub option: ZeroBalanceOption,
    /// Token distributed
    pub token: Address,
    /// Amount after the zero-balance fee
    pub amount: u128,
    /// Zero-balance fee charged
    pub fee: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when funds grow the collateral lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralReinvestedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Token spent
    pub token: Address,
    /// Amount spent
    pub amount_in: u128,
    /// Weight added to the position
    pub weight_added: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a rebase is claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseClaimedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Weight added
    pub amount: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a harvested token cannot be swapped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFallbackEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Token returned
    pub token: Address,
    /// Amount returned
    pub amount: u128,
    /// Borrower receiving it
    pub recipient: Address,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a vote is cast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedEvent {
    /// Collateral id
    pub token_id: TokenId,
    /// Pools voted
    pub pools: Vec<Address>,
    /// Weights voted
    pub weights: Vec<u128>,
    /// Default vote rather than a borrower selection
    pub default_vote: bool,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a best-effort call fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCallSkippedEvent {
    /// Collateral id, if any
    pub token_id: Option<TokenId>,
    /// Call that failed
    pub call: String,
    /// Failure reason
    pub reason: String,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a vault deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDepositEvent {
    /// Account providing the assets
    pub caller: Address,
    /// Account receiving shares
    pub receiver: Address,
    /// Assets deposited
    pub assets: u128,
    /// Shares minted
    pub shares: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a vault withdrawal or redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultWithdrawEvent {
    /// Share owner
    pub owner: Address,
    /// Account receiving assets
    pub receiver: Address,
    /// Assets paid out
    pub assets: u128,
    /// Shares burned
    pub shares: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted after a flash loan is repaid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanEvent {
    /// Account that received the funds
    pub receiver: Address,
    /// Amount lent
    pub amount: u128,
    /// Fee paid to the vault
    pub fee: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when configuration changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangedEvent {
    /// Parameter name
    pub parameter: String,
    /// New value, rendered
    pub value: String,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered collection of emitted events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<LoanEvent>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn push(&mut self, event: LoanEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[LoanEvent] {
        &self.events
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&LoanEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events concerning one position
    pub fn for_token(&self, id: TokenId) -> Vec<&LoanEvent> {
        self.events
            .iter()
            .filter(|e| e.token_id() == Some(id))
            .collect()
    }

    /// Get the number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop events recorded after the first `len`
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    /// Take all events, leaving the log empty
    pub fn drain(&mut self) -> Vec<LoanEvent> {
        std::mem::take(&mut self.events)
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Fingerprint of the ordered event sequence
    pub fn digest(&self) -> Result<Hash> {
        let mut bytes = Vec::with_capacity(self.events.len() * 32);
        for event in &self.events {
            bytes.extend_from_slice(event.hash()?.as_bytes());
        }
        Ok(Hash::sha256(&bytes))
    }
}
