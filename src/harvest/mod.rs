//! Reward harvesting and conversion.
//!
//! - `swap`: best-route selection over direct and 2-hop paths, with fallback
//!   to returning the raw token
//! - `claim`: the harvest pipeline that settles rewards against a position

pub mod claim;
pub mod swap;

pub use claim::*;
pub use swap::*;
