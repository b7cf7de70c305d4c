use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{PlanError, PlanResult, ensure_non_negative};
use super::money::round_dp;
use super::monte_carlo::{
    DistributionSummary, GrowthParams, PercentileBands, simulate, simulate_bands_and_finals,
};
use super::random::NormalSource;
use super::types::{InvestorProfile, MarketAssumptions};
use super::withdrawal::{StrategyOutcome, StrategyParams, WithdrawalParams, compare_strategies};

pub const FULL_RETIREMENT_AGE: u32 = 67;
pub const EARLIEST_CLAIM_AGE: u32 = 62;
pub const LATEST_CLAIM_AGE: u32 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectionConfig {
    pub path_count: usize,
    pub seed: u64,
    pub withdrawal: StrategyParams,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            path_count: 10_000,
            seed: 42,
            withdrawal: StrategyParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementProjection {
    pub accumulation_years: u32,
    pub starting_balance: f64,
    pub annual_contribution: f64,
    pub bands: PercentileBands,
    pub at_retirement: DistributionSummary,
    pub retirement_goal: f64,
    pub goal_probability: f64,
    pub retirement_years: u32,
    pub decumulation: Vec<StrategyOutcome>,
}

fn growth_params(
    profile: &InvestorProfile,
    market: &MarketAssumptions,
    path_count: usize,
) -> GrowthParams {
    GrowthParams {
        starting_balance: profile.account_balances.total(),
        annual_contribution: profile.monthly_contribution * 12.0,
        mean_return: market.mean_return,
        stddev: market.volatility,
        years: i64::from(profile.accumulation_years()),
        path_count,
    }
}

/// Accumulates to the retirement age, then compares the named withdrawal
/// strategies starting from the median balance at retirement.
pub fn project_retirement(
    profile: &InvestorProfile,
    market: &MarketAssumptions,
    config: &ProjectionConfig,
) -> PlanResult<RetirementProjection> {
    profile.validate()?;
    market.validate()?;

    let params = growth_params(profile, market, config.path_count);
    let mut source = NormalSource::seeded(config.seed);
    let (bands, finals) = simulate_bands_and_finals(&mut source, &params)?;
    let at_retirement = DistributionSummary::from_sorted(&finals);
    let goal_probability = goal_probability(&finals, profile.retirement_goal);

    let retirement_years = profile.retirement_years();
    let decumulation = if retirement_years == 0 {
        Vec::new()
    } else {
        compare_strategies(
            &WithdrawalParams {
                start_balance: at_retirement.p50,
                years: retirement_years,
                path_count: config.path_count,
                mean_return: market.mean_return,
                stddev: market.volatility,
            },
            &config.withdrawal,
            config.seed.wrapping_add(1),
        )?
    };

    debug!(
        years = params.years,
        goal_probability, "retirement projection complete"
    );

    Ok(RetirementProjection {
        accumulation_years: profile.accumulation_years(),
        starting_balance: params.starting_balance,
        annual_contribution: params.annual_contribution,
        bands,
        at_retirement,
        retirement_goal: profile.retirement_goal,
        goal_probability,
        retirement_years,
        decumulation,
    })
}

/// Percentage of paths reaching the goal at retirement, for a given monthly
/// contribution. Used by the contribution solver with a fixed seed per call.
pub(crate) fn goal_probability_for_contribution(
    profile: &InvestorProfile,
    market: &MarketAssumptions,
    monthly_contribution: f64,
    path_count: usize,
    seed: u64,
) -> PlanResult<f64> {
    let mut params = growth_params(profile, market, path_count);
    params.annual_contribution = monthly_contribution * 12.0;
    let finals = simulate(&mut NormalSource::seeded(seed), &params)?;
    Ok(goal_probability(&finals, profile.retirement_goal))
}

fn goal_probability(sorted_finals: &[f64], goal: f64) -> f64 {
    if sorted_finals.is_empty() {
        return 0.0;
    }
    let reached = sorted_finals.len() - sorted_finals.partition_point(|&b| b < goal);
    round_dp(reached as f64 / sorted_finals.len() as f64 * 100.0, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurityEstimate {
    pub claim_age: u32,
    pub adjustment_factor: f64,
    pub monthly_benefit: f64,
    pub annual_benefit: f64,
}

/// Adjusts the benefit payable at full retirement age for an earlier or
/// later claim. Early claims lose 5/9 % per month for the first 36 months
/// and 5/12 % per month after that; delayed claims gain 8 % per year.
pub fn social_security_benefit(
    full_benefit: f64,
    claim_age: u32,
) -> PlanResult<SocialSecurityEstimate> {
    ensure_non_negative(full_benefit, "full retirement benefit")?;
    if !(EARLIEST_CLAIM_AGE..=LATEST_CLAIM_AGE).contains(&claim_age) {
        return Err(PlanError::invalid(format!(
            "claim age must be between {EARLIEST_CLAIM_AGE} and {LATEST_CLAIM_AGE}"
        )));
    }

    let adjustment_factor = if claim_age < FULL_RETIREMENT_AGE {
        let months_early = f64::from((FULL_RETIREMENT_AGE - claim_age) * 12);
        let first = months_early.min(36.0);
        let beyond = (months_early - 36.0).max(0.0);
        1.0 - first * 5.0 / 900.0 - beyond * 5.0 / 1200.0
    } else {
        1.0 + f64::from(claim_age - FULL_RETIREMENT_AGE) * 0.08
    };

    let monthly_benefit = round_dp(full_benefit * adjustment_factor, 2);
    Ok(SocialSecurityEstimate {
        claim_age,
        adjustment_factor: round_dp(adjustment_factor, 4),
        monthly_benefit,
        annual_benefit: round_dp(monthly_benefit * 12.0, 2),
    })
}

pub fn claiming_schedule(full_benefit: f64) -> PlanResult<Vec<SocialSecurityEstimate>> {
    (EARLIEST_CLAIM_AGE..=LATEST_CLAIM_AGE)
        .map(|age| social_security_benefit(full_benefit, age))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccountBalances, RiskConstraints};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_profile() -> InvestorProfile {
        InvestorProfile {
            age: 40,
            retirement_age: 65,
            life_expectancy: 90,
            monthly_contribution: 1_000.0,
            account_balances: AccountBalances {
                taxable: 50_000.0,
                roth: 30_000.0,
                traditional: 120_000.0,
            },
            risk: RiskConstraints::default(),
            retirement_goal: 1_500_000.0,
        }
    }

    #[test]
    fn claiming_at_62_pays_seventy_percent() {
        let estimate = social_security_benefit(2_000.0, 62).expect("ok");
        assert_approx(estimate.adjustment_factor, 0.70);
        assert_approx(estimate.monthly_benefit, 1_400.0);
        assert_approx(estimate.annual_benefit, 16_800.0);
    }

    #[test]
    fn claiming_at_64_uses_first_tier_only() {
        let estimate = social_security_benefit(1_800.0, 64).expect("ok");
        assert_approx(estimate.adjustment_factor, 0.80);
        assert_approx(estimate.monthly_benefit, 1_440.0);
    }

    #[test]
    fn delayed_claim_earns_credits_up_to_seventy() {
        assert_approx(
            social_security_benefit(1_000.0, 70).expect("ok").monthly_benefit,
            1_240.0,
        );
        assert_approx(
            social_security_benefit(1_000.0, 67).expect("ok").monthly_benefit,
            1_000.0,
        );
        assert!(social_security_benefit(1_000.0, 71).is_err());
        assert!(social_security_benefit(1_000.0, 61).is_err());
    }

    #[test]
    fn claiming_schedule_is_monotonic() {
        let schedule = claiming_schedule(2_500.0).expect("ok");
        assert_eq!(schedule.len(), 9);
        assert!(
            schedule
                .windows(2)
                .all(|w| w[0].monthly_benefit < w[1].monthly_benefit)
        );
    }

    #[test]
    fn deterministic_projection_hits_goal_exactly_when_reachable() {
        let mut profile = sample_profile();
        profile.retirement_goal = 200_000.0 + 25.0 * 12_000.0;
        let market = MarketAssumptions {
            mean_return: 0.0,
            volatility: 0.0,
        };
        let config = ProjectionConfig {
            path_count: 200,
            ..ProjectionConfig::default()
        };
        let projection = project_retirement(&profile, &market, &config).expect("ok");
        assert_eq!(projection.accumulation_years, 25);
        assert_eq!(projection.bands.len(), 26);
        assert_approx(projection.at_retirement.p50, 500_000.0);
        assert_approx(projection.goal_probability, 100.0);
        assert_eq!(projection.retirement_years, 25);
        assert_eq!(projection.decumulation.len(), 3);

        profile.retirement_goal += 1.0;
        let missed = project_retirement(&profile, &market, &config).expect("ok");
        assert_approx(missed.goal_probability, 0.0);
    }

    #[test]
    fn projection_without_retirement_years_skips_decumulation() {
        let mut profile = sample_profile();
        profile.life_expectancy = profile.retirement_age;
        let market = MarketAssumptions {
            mean_return: 0.06,
            volatility: 0.15,
        };
        let config = ProjectionConfig {
            path_count: 100,
            ..ProjectionConfig::default()
        };
        let projection = project_retirement(&profile, &market, &config).expect("ok");
        assert!(projection.decumulation.is_empty());
        assert!((0.0..=100.0).contains(&projection.goal_probability));
    }
}
