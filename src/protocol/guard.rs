//! Reentrancy lock.
//!
//! A guarded section may not be entered again until it exits. The engine keeps
//! one lock for value-moving operations and a separate one for flash loans, so
//! borrowing and repaying stay callable from inside a flash loan callback.

use crate::error::{Error, Result};

/// Mutual-exclusion flag around a guarded section
#[derive(Debug, Clone, Default)]
pub struct ReentrancyGuard {
    entered: bool,
}

impl ReentrancyGuard {
    /// Create an unlocked guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the guarded section
    pub fn enter(&mut self) -> Result<()> {
        if self.entered {
            return Err(Error::Reentrancy);
        }
        self.entered = true;
        Ok(())
    }

    /// Leave the guarded section
    pub fn exit(&mut self) {
        self.entered = false;
    }

    /// Check if the section is currently entered
    pub fn is_entered(&self) -> bool {
        self.entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejects_reentry() {
        let mut guard = ReentrancyGuard::new();
        guard.enter().unwrap();
        assert!(guard.is_entered());
        assert_eq!(guard.enter(), Err(Error::Reentrancy));

        guard.exit();
        assert!(!guard.is_entered());
        assert!(guard.enter().is_ok());
    }
}
