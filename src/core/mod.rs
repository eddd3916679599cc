//! Core modules for the veloan engine.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and rate parameters
//! - Collateral positions and their registry
//! - Borrowing capacity
//! - Lending vault share accounting

pub mod config;
pub mod max_loan;
pub mod position;
pub mod vault;

pub use config::*;
pub use max_loan::*;
pub use position::*;
pub use vault::*;
