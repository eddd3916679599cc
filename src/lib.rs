//! # veloan
//!
//! Loan accounting and rewards-settlement engine for vote-escrowed NFT
//! collateral. Borrowers lock veNFTs with the engine, borrow a stablecoin
//! against their voting weight, and the engine harvests the lock's fees,
//! bribes and rebases to service the debt.
//!
//! ## Architecture
//!
//! - **Core**: configuration, positions and their registry, borrowing
//!   capacity, and the lending vault's share ledger
//! - **External**: interfaces to the escrow, voter, router, oracle and token
//!   ledger, plus an in-memory host implementing all of them
//! - **Harvest**: reward claims, best-route swaps and settlement
//! - **Protocol**: the `LoanEngine`, payment waterfall, market integration,
//!   administration and events
//!
//! Every public mutating operation is atomic: on error, engine state, events
//! and host state are restored.
//!
//! ## Example
//!
//! ```rust,ignore
//! use veloan::prelude::*;
//!
//! let mut engine = LoanEngine::new(config, chain)?;
//! engine.request_loan(borrower, token_id, 500_000_000, PositionOptions::default())?;
//! let harvested = engine.claim(token_id, &[RewardClaim::new(bribe, vec![usdc])])?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod external;
pub mod harvest;
pub mod protocol;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::{EngineConfig, RateParameters, VersionedConfig},
        max_loan::{calculate_max_loan, CapacityInputs, MaxLoan},
        position::{PaymentBreakdown, Position, PositionOptions, PositionRegistry, ZeroBalanceOption},
        vault::{LendingVault, VaultAssets},
    };
    pub use crate::error::{Error, Result};
    pub use crate::external::{
        memory::SimulatedChain, Clock, Environment, LockedBalance, PriceData, PriceOracle,
        RebaseDistributor, SwapVenue, TokenLedger, Transactional, Voter, VotingEscrow,
    };
    pub use crate::harvest::{claim::RewardClaim, swap::SwapOutcome};
    pub use crate::protocol::{
        engine::{EngineState, LoanEngine},
        events::{EventLog, FeeKind, LoanEvent},
        market::{FlashBorrower, LoanDetails},
    };
    pub use crate::utils::ids::{Address, Hash, TokenId};
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const ENGINE_NAME: &str = "veloan";
