//! Utility modules for the veloan engine.
//!
//! This module contains shared utilities used across the engine:
//! - Identifier types
//! - Checked arithmetic
//! - Validation helpers
//! - Constants

pub mod constants;
pub mod ids;
pub mod math;
pub mod validation;

pub use constants::*;
pub use ids::*;
pub use math::*;
pub use validation::*;
