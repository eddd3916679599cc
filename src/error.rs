//! Error types for the veloan engine.
//!
//! Errors are grouped the way callers react to them: hard failures unwind the
//! whole operation, while the soft ones are swallowed by best-effort paths
//! (voting, rebase claims, swaps) and surface only through events.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the veloan engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Caller is not allowed to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Caller is not the recorded borrower of the position
    #[error("Caller {caller} is not the borrower of position {token_id}")]
    NotBorrower {
        /// Position identifier
        token_id: String,
        /// Offending caller
        caller: String,
    },

    /// Caller does not own the collateral NFT
    #[error("Caller {caller} does not own token {token_id}")]
    NotTokenOwner {
        /// Collateral identifier
        token_id: String,
        /// Offending caller
        caller: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Capacity Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Requested amount exceeds the borrowing capacity
    #[error("Requested {requested} exceeds max loan {max_loan}")]
    ExceedsMaxLoan {
        /// Requested amount
        requested: u128,
        /// Capacity at the time of the request
        max_loan: u128,
    },

    /// Amount below the minimum accepted for a borrow
    #[error("Amount {amount} must exceed minimum {minimum}")]
    AmountTooSmall {
        /// Requested amount
        amount: u128,
        /// Exclusive minimum
        minimum: u128,
    },

    /// Vault does not hold enough liquidity
    #[error("Insufficient vault liquidity: required {required}, available {available}")]
    InsufficientLiquidity {
        /// Required amount
        required: u128,
        /// Available amount
        available: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invalid State Errors
    // ═══════════════════════════════════════════════════════════════════

    /// No position exists for the collateral id
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    /// A position is already active for the collateral id
    #[error("Position already active: {0}")]
    PositionAlreadyActive(String),

    /// Collateral cannot be released while debt remains
    #[error("Position {token_id} still owes {balance}")]
    OutstandingBalance {
        /// Position identifier
        token_id: String,
        /// Remaining balance
        balance: u128,
    },

    /// Collateral is not held by the engine
    #[error("Collateral {0} is not in engine custody")]
    CollateralNotInCustody(String),

    /// Voting-escrow lock has expired and cannot be made permanent
    #[error("Lock for token {0} has expired")]
    TokenLockExpired(String),

    /// Guarded section was re-entered
    #[error("Reentrant call rejected")]
    Reentrancy,

    // ═══════════════════════════════════════════════════════════════════
    // External Dependency Errors
    // ═══════════════════════════════════════════════════════════════════

    /// An external collaborator call failed
    #[error("External call to {service} failed: {reason}")]
    ExternalCall {
        /// Collaborator name
        service: String,
        /// Failure reason
        reason: String,
    },

    /// No route with positive output exists for a swap
    #[error("No swap route from {from} to {to}")]
    NoSwapRoute {
        /// Input token
        from: String,
        /// Output token
        to: String,
    },

    /// Account balance too low for a transfer
    #[error("Insufficient balance of {token}: required {required}, available {available}")]
    InsufficientBalance {
        /// Token address
        token: String,
        /// Required amount
        required: u128,
        /// Available amount
        available: u128,
    },

    /// Allowance too low for a pull transfer
    #[error("Insufficient allowance of {token}: required {required}, approved {approved}")]
    InsufficientAllowance {
        /// Token address
        token: String,
        /// Required amount
        required: u128,
        /// Approved amount
        approved: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Settlement asset is off its peg
    #[error("Settlement asset price {price} below peg floor {floor}")]
    PegDeviation {
        /// Observed price (1e8 scale)
        price: u128,
        /// Minimum accepted price (1e8 scale)
        floor: u128,
    },

    /// Price is stale (not updated recently)
    #[error("Price is stale: last update {age}s ago, max allowed {max_age}s")]
    StalePrice {
        /// Seconds since last update
        age: u64,
        /// Maximum allowed age in seconds
        max_age: u64,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Serialization / Configuration Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Shorthand for an external collaborator failure
    pub fn external(service: &str, reason: impl Into<String>) -> Self {
        Error::ExternalCall {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if best-effort paths may swallow this error
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::ExternalCall { .. } | Error::NoSwapRoute { .. }
        )
    }

    /// Returns true if this is an authorization failure
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_) | Error::NotBorrower { .. } | Error::NotTokenOwner { .. }
        )
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_) | Error::Overflow { .. } | Error::Underflow { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Authorization errors: 1xxx
            Error::Unauthorized(_) => 1001,
            Error::NotBorrower { .. } => 1002,
            Error::NotTokenOwner { .. } => 1003,

            // Capacity errors: 2xxx
            Error::ExceedsMaxLoan { .. } => 2001,
            Error::AmountTooSmall { .. } => 2002,
            Error::InsufficientLiquidity { .. } => 2003,

            // State errors: 3xxx
            Error::PositionNotFound(_) => 3001,
            Error::PositionAlreadyActive(_) => 3002,
            Error::OutstandingBalance { .. } => 3003,
            Error::CollateralNotInCustody(_) => 3004,
            Error::TokenLockExpired(_) => 3005,
            Error::Reentrancy => 3006,

            // External errors: 4xxx
            Error::ExternalCall { .. } => 4001,
            Error::NoSwapRoute { .. } => 4002,
            Error::InsufficientBalance { .. } => 4003,
            Error::InsufficientAllowance { .. } => 4004,

            // Oracle errors: 5xxx
            Error::PegDeviation { .. } => 5001,
            Error::StalePrice { .. } => 5002,

            // Validation errors: 6xxx
            Error::InvalidParameter { .. } => 6001,
            Error::ZeroAmount => 6002,
            Error::Overflow { .. } => 6003,
            Error::Underflow { .. } => 6004,

            // Serialization / config errors: 7xxx
            Error::Serialization(_) => 7001,
            Error::Deserialization(_) => 7002,
            Error::Config(_) => 7003,

            // Internal errors: 9xxx
            Error::InvariantViolation(_) => 9001,
        }
    }
}
