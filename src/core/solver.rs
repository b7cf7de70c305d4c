use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PlanError, PlanResult};
use super::retirement::goal_probability_for_contribution;
use super::types::{InvestorProfile, MarketAssumptions};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContributionSolveConfig {
    /// Required share of paths reaching the goal, in percent.
    pub target_probability: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub path_count: usize,
    pub seed: u64,
}

impl Default for ContributionSolveConfig {
    fn default() -> Self {
        Self {
            target_probability: 80.0,
            search_min: 0.0,
            search_max: 20_000.0,
            tolerance: 1.0,
            max_iterations: 40,
            path_count: 2_000,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub goal_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSolveResult {
    pub target_probability: f64,
    pub monthly_contribution: f64,
    pub achieved_probability: f64,
    pub iterations: Vec<SolveIteration>,
    pub converged: bool,
    pub message: String,
}

/// Bisects the monthly contribution needed for the goal probability to reach
/// the target. Every candidate is evaluated on the same seeded paths, so the
/// probability is monotone in the contribution.
pub fn solve_required_contribution(
    profile: &InvestorProfile,
    market: &MarketAssumptions,
    config: &ContributionSolveConfig,
) -> PlanResult<ContributionSolveResult> {
    profile.validate()?;
    market.validate()?;
    validate_config(config)?;

    let evaluate = |value: f64| {
        goal_probability_for_contribution(profile, market, value, config.path_count, config.seed)
    };

    let low_probability = evaluate(config.search_min)?;
    if low_probability + 1e-12 >= config.target_probability {
        return Ok(ContributionSolveResult {
            target_probability: config.target_probability,
            monthly_contribution: config.search_min,
            achieved_probability: low_probability,
            iterations: Vec::new(),
            converged: true,
            message: "Already meets target at lower contribution bound.".to_string(),
        });
    }

    let high_probability = evaluate(config.search_max)?;
    if high_probability + 1e-12 < config.target_probability {
        warn!(
            target = config.target_probability,
            best = high_probability,
            "goal unreachable within contribution bounds"
        );
        return Err(PlanError::infeasible(format!(
            "goal probability reaches only {high_probability}% at the upper contribution bound of {}",
            config.search_max
        )));
    }

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut lo = config.search_min;
    let mut hi = config.search_max;
    let mut hi_probability = high_probability;
    let mut converged = false;
    let mut it = 0;
    while it < config.max_iterations {
        it += 1;
        let mid = (lo + hi) * 0.5;
        let probability = evaluate(mid)?;
        iterations.push(SolveIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_value: mid,
            goal_probability: probability,
        });

        if probability + 1e-12 >= config.target_probability {
            hi = mid;
            hi_probability = probability;
        } else {
            lo = mid;
        }

        if (hi - lo).abs() <= config.tolerance {
            converged = true;
            break;
        }
    }

    debug!(iterations = it, converged, value = hi, "contribution solve finished");

    Ok(ContributionSolveResult {
        target_probability: config.target_probability,
        monthly_contribution: hi,
        achieved_probability: hi_probability,
        iterations,
        converged,
        message: if converged {
            "Solved required monthly contribution.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate."
                .to_string()
        },
    })
}

fn validate_config(config: &ContributionSolveConfig) -> PlanResult<()> {
    if !(0.0..=100.0).contains(&config.target_probability) {
        return Err(PlanError::invalid(
            "target probability must be between 0 and 100",
        ));
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(PlanError::invalid("search bounds must be finite"));
    }
    if config.search_min < 0.0 {
        return Err(PlanError::invalid("search min must be >= 0"));
    }
    if config.search_max <= config.search_min {
        return Err(PlanError::invalid(
            "search max must be greater than search min",
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(PlanError::invalid("tolerance must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(PlanError::invalid("max iterations must be > 0"));
    }
    if config.path_count == 0 {
        return Err(PlanError::invalid("path count must be > 0"));
    }
    Ok(())
}
