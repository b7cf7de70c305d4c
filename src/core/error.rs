use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("infeasible: {0}")]
    Infeasible(String),
    #[error("search budget exhausted after {steps} steps")]
    SearchBudgetExhausted { steps: u64 },
}

pub type PlanResult<T> = Result<T, PlanError>;

impl PlanError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn infeasible(msg: impl Into<String>) -> Self {
        Self::Infeasible(msg.into())
    }

    /// Short machine-readable tag used by the command line error document.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid-input",
            Self::Infeasible(_) => "infeasible",
            Self::SearchBudgetExhausted { .. } => "search-budget-exhausted",
        }
    }
}

pub(crate) fn ensure_finite(value: f64, label: &str) -> PlanResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PlanError::invalid(format!("{label} must be a finite number")))
    }
}

pub(crate) fn ensure_non_negative(value: f64, label: &str) -> PlanResult<()> {
    ensure_finite(value, label)?;
    if value < 0.0 {
        return Err(PlanError::invalid(format!("{label} must be >= 0")));
    }
    Ok(())
}

pub(crate) fn ensure_fraction(value: f64, label: &str) -> PlanResult<()> {
    ensure_finite(value, label)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(PlanError::invalid(format!("{label} must be between 0 and 1")));
    }
    Ok(())
}
