//! Protocol module - Loan engine and orchestration.
//!
//! This module provides the engine that runs every lending operation
//! atomically: position lifecycle, the payment waterfall, market
//! integration, owner-gated configuration and the typed event log.

pub mod admin;
pub mod engine;
pub mod events;
pub mod guard;
pub mod market;
pub mod waterfall;

#[cfg(test)]
pub(crate) mod fixture;

pub use engine::*;
pub use events::*;
pub use guard::*;
pub use market::*;
