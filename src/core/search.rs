use super::error::{PlanError, PlanResult};

/// Default number of pivots or node expansions a single solve may spend.
pub const DEFAULT_SEARCH_BUDGET: u64 = 5_000_000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchBudget {
    used: u64,
    limit: u64,
}

impl SearchBudget {
    pub(crate) fn new(limit: u64) -> Self {
        Self { used: 0, limit }
    }

    pub(crate) fn charge(&mut self) -> PlanResult<()> {
        self.used += 1;
        if self.used > self.limit {
            return Err(PlanError::SearchBudgetExhausted { steps: self.used });
        }
        Ok(())
    }

    pub(crate) fn used(&self) -> u64 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_fails_on_the_first_step_past_the_limit() {
        let mut budget = SearchBudget::new(2);
        assert!(budget.charge().is_ok());
        assert!(budget.charge().is_ok());
        assert_eq!(
            budget.charge(),
            Err(PlanError::SearchBudgetExhausted { steps: 3 })
        );
        assert_eq!(budget.used(), 3);
    }
}
