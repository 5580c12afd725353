//! Aggregate token budget per workflow.
//!
//! Every LLM call charges its usage; once the budget is exhausted the
//! orchestrator skips non-critical agents (tests, docs) instead of spending
//! further.

use std::sync::atomic::{AtomicU32, Ordering};

/// Shared, lock-free token accounting.
#[derive(Debug)]
pub struct TokenBudget {
    limit: u32,
    used: AtomicU32,
}

impl TokenBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Record spent tokens.
    pub fn charge(&self, tokens: u32) {
        self.used.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn exhausted(&self) -> bool {
        self.used() >= self.limit
    }

    /// Per-call cap: never hand an agent more than what is left.
    pub fn remaining_for_call(&self, requested: u32) -> u32 {
        let remaining = self.limit.saturating_sub(self.used());
        requested.min(remaining.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_accumulate_to_exhaustion() {
        let budget = TokenBudget::new(1000);
        assert!(!budget.exhausted());

        budget.charge(400);
        budget.charge(400);
        assert!(!budget.exhausted());
        assert_eq!(budget.remaining_for_call(500), 200);

        budget.charge(300);
        assert!(budget.exhausted());
        // Even exhausted, a call gets a floor of one token so error paths
        // stay well-formed.
        assert_eq!(budget.remaining_for_call(500), 1);
    }
}
