//! The shared budget bounding how many queries a worker pool runs.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// How workers claim a unit of work from a [`WorkBudget`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    /// Claims decrement only a positive counter, in one atomic step.
    ///
    /// The pool runs exactly as many queries as the budget allows.
    #[default]
    Exact,
    /// Claims check the counter and decrement it in two separate steps.
    ///
    /// Several workers can see the same positive value and all decrement it, so the pool may run
    /// up to `workers - 1` queries more than the budget allows.
    Racy,
}

/// A counter of remaining query executions, shared by all workers of one run.
#[derive(Debug)]
pub struct WorkBudget {
    remaining: AtomicI64,
    policy: BudgetPolicy,
}

impl WorkBudget {
    /// Creates a budget of `total` executions.
    pub fn new(total: i64, policy: BudgetPolicy) -> Self {
        Self {
            remaining: AtomicI64::new(total),
            policy,
        }
    }

    /// The claim policy of this budget.
    pub fn policy(&self) -> BudgetPolicy {
        self.policy
    }

    /// Current counter value. Negative after a racy overshoot.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Tries to claim one execution. Returns `false` once the budget is used up.
    pub fn claim(&self) -> bool {
        match self.policy {
            BudgetPolicy::Exact => self
                .remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                    (remaining > 0).then(|| remaining - 1)
                })
                .is_ok(),
            BudgetPolicy::Racy => {
                if !self.has_remaining() {
                    return false;
                }
                // Another worker may have taken the last unit since the check above.
                self.take();
                true
            }
        }
    }

    /// The check half of a racy claim.
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// The decrement half of a racy claim. Does not look at the current value.
    pub fn take(&self) {
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn exact_stops_at_zero() {
        let budget = WorkBudget::new(3, BudgetPolicy::Exact);
        let claimed = (0..10).filter(|_| budget.claim()).count();

        assert_eq!(claimed, 3);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn empty_and_negative_budgets_claim_nothing() {
        for policy in [BudgetPolicy::Exact, BudgetPolicy::Racy] {
            assert!(!WorkBudget::new(0, policy).claim());
            assert!(!WorkBudget::new(-4, policy).claim());
        }
    }

    #[test]
    fn keeps_its_policy() {
        assert_eq!(WorkBudget::new(1, BudgetPolicy::Exact).policy(), BudgetPolicy::Exact);
        assert_eq!(WorkBudget::new(1, BudgetPolicy::Racy).policy(), BudgetPolicy::Racy);
    }

    #[test]
    fn racy_sequential_claims_are_exact() {
        let budget = WorkBudget::new(2, BudgetPolicy::Racy);
        let claimed = (0..5).filter(|_| budget.claim()).count();

        assert_eq!(claimed, 2);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn racy_interleaving_overshoots() {
        // Two workers both pass the check before either decrements.
        let budget = WorkBudget::new(1, BudgetPolicy::Racy);
        let first = budget.has_remaining();
        let second = budget.has_remaining();
        assert!(first && second);

        budget.take();
        budget.take();
        assert_eq!(budget.remaining(), -1);
        assert!(!budget.claim());
    }

    #[test]
    fn exact_under_contention() {
        let budget = Arc::new(WorkBudget::new(10_000, BudgetPolicy::Exact));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    let mut claimed = 0u64;
                    while budget.claim() {
                        claimed += 1;
                    }
                    claimed
                })
            })
            .collect();

        let total: u64 = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, 10_000);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn racy_under_contention_stays_bounded() {
        let workers = 8;
        let budget = Arc::new(WorkBudget::new(10_000, BudgetPolicy::Racy));
        let threads: Vec<_> = (0..workers)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    let mut claimed = 0u64;
                    while budget.claim() {
                        claimed += 1;
                    }
                    claimed
                })
            })
            .collect();

        let total: u64 = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert!(total >= 10_000);
        assert!(total < 10_000 + workers);
        assert_eq!(budget.remaining(), 10_000 - total as i64);
    }
}
