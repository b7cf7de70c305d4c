use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{PlanError, PlanResult, ensure_finite, ensure_non_negative};
use super::money::round_dp;
use super::monte_carlo::{median_of_sorted, sort_ascending};
use super::random::{NormalSource, validate_params};

/// Decides how much to withdraw at the start of a year.
pub trait WithdrawalPolicy {
    fn withdrawal(&self, balance: f64, year: u32, initial_balance: f64) -> f64;
}

impl<F> WithdrawalPolicy for F
where
    F: Fn(f64, u32, f64) -> f64,
{
    fn withdrawal(&self, balance: f64, year: u32, initial_balance: f64) -> f64 {
        self(balance, year, initial_balance)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalStrategy {
    FixedReal,
    DynamicPercentage,
    Guardrails,
}

impl WithdrawalStrategy {
    pub const ALL: [WithdrawalStrategy; 3] = [
        WithdrawalStrategy::FixedReal,
        WithdrawalStrategy::DynamicPercentage,
        WithdrawalStrategy::Guardrails,
    ];

    pub fn label(self) -> &'static str {
        match self {
            WithdrawalStrategy::FixedReal => "fixed-real",
            WithdrawalStrategy::DynamicPercentage => "dynamic-percentage",
            WithdrawalStrategy::Guardrails => "guardrails",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyParams {
    pub rate: f64,
    pub guardrail_floor: f64,
    pub guardrail_ceiling: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rate: 0.04,
            guardrail_floor: 0.8,
            guardrail_ceiling: 1.2,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> PlanResult<()> {
        ensure_non_negative(self.rate, "withdrawal rate")?;
        ensure_non_negative(self.guardrail_floor, "guardrail floor")?;
        ensure_non_negative(self.guardrail_ceiling, "guardrail ceiling")?;
        if self.guardrail_floor > self.guardrail_ceiling {
            return Err(PlanError::invalid(
                "guardrail floor cannot exceed guardrail ceiling",
            ));
        }
        Ok(())
    }
}

/// A named strategy bound to its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyPolicy {
    pub strategy: WithdrawalStrategy,
    pub params: StrategyParams,
}

impl WithdrawalPolicy for StrategyPolicy {
    fn withdrawal(&self, balance: f64, _year: u32, initial_balance: f64) -> f64 {
        let rate = self.params.rate;
        match self.strategy {
            WithdrawalStrategy::FixedReal => initial_balance * rate,
            WithdrawalStrategy::DynamicPercentage => balance * rate,
            WithdrawalStrategy::Guardrails => {
                let base = initial_balance * rate;
                let floor = base * self.params.guardrail_floor;
                let ceiling = base * self.params.guardrail_ceiling;
                (balance * rate).clamp(floor, ceiling)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalParams {
    pub start_balance: f64,
    pub years: u32,
    pub path_count: usize,
    pub mean_return: f64,
    pub stddev: f64,
}

impl WithdrawalParams {
    pub fn validate(&self) -> PlanResult<()> {
        if self.path_count == 0 {
            return Err(PlanError::invalid("path count must be > 0"));
        }
        if self.years == 0 {
            return Err(PlanError::invalid("years must be > 0"));
        }
        ensure_finite(self.start_balance, "start balance")?;
        validate_params(self.mean_return, self.stddev)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalOutcome {
    pub success_rate: f64,
    pub median_annual_income: f64,
    pub median_remaining_balance: f64,
    pub depleted_paths: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOutcome {
    pub strategy: WithdrawalStrategy,
    #[serde(flatten)]
    pub outcome: WithdrawalOutcome,
}

struct PathResult {
    total_income: f64,
    final_balance: f64,
    depleted: bool,
}

pub fn simulate_withdrawals<R, P>(
    source: &mut NormalSource<R>,
    params: &WithdrawalParams,
    policy: &P,
) -> PlanResult<WithdrawalOutcome>
where
    R: Rng,
    P: WithdrawalPolicy + ?Sized,
{
    params.validate()?;

    let mut incomes = Vec::with_capacity(params.path_count);
    let mut finals = Vec::with_capacity(params.path_count);
    let mut successes = 0usize;
    let mut depleted_paths = 0usize;

    let mut returns = vec![0.0; params.years as usize];
    for _ in 0..params.path_count {
        source.fill_into(&mut returns, params.mean_return, params.stddev)?;
        let path = run_path(&returns, params, policy)?;
        if path.depleted {
            depleted_paths += 1;
        } else if path.final_balance > 0.0 {
            successes += 1;
        }
        incomes.push(path.total_income);
        finals.push(path.final_balance);
    }

    sort_ascending(&mut incomes);
    sort_ascending(&mut finals);

    let outcome = WithdrawalOutcome {
        success_rate: round_dp(successes as f64 / params.path_count as f64 * 100.0, 1),
        median_annual_income: median_of_sorted(&incomes) / params.years as f64,
        median_remaining_balance: median_of_sorted(&finals),
        depleted_paths,
    };
    debug!(
        paths = params.path_count,
        years = params.years,
        success_rate = outcome.success_rate,
        "withdrawal simulation complete"
    );
    Ok(outcome)
}

/// Walks one path over its pre-drawn yearly returns. Every path consumes a
/// full block of draws, so depletion never shifts the paths after it.
fn run_path<P>(returns: &[f64], params: &WithdrawalParams, policy: &P) -> PlanResult<PathResult>
where
    P: WithdrawalPolicy + ?Sized,
{
    let mut balance = params.start_balance;
    let mut total_income = 0.0;

    for (year, r) in (0..params.years).zip(returns) {
        if balance <= 0.0 {
            return Ok(PathResult {
                total_income,
                final_balance: 0.0,
                depleted: true,
            });
        }
        let requested = policy.withdrawal(balance, year, params.start_balance);
        if !requested.is_finite() {
            return Err(PlanError::invalid(format!(
                "withdrawal policy returned a non-finite amount in year {year}"
            )));
        }
        let withdrawn = requested.clamp(0.0, balance);
        balance -= withdrawn;
        total_income += withdrawn;

        balance = (balance * (1.0 + r)).max(0.0);
    }

    Ok(PathResult {
        total_income,
        final_balance: balance,
        depleted: false,
    })
}

/// Runs every named strategy against the same seeded market paths.
pub fn compare_strategies(
    params: &WithdrawalParams,
    strategy_params: &StrategyParams,
    seed: u64,
) -> PlanResult<Vec<StrategyOutcome>> {
    params.validate()?;
    strategy_params.validate()?;

    WithdrawalStrategy::ALL[..]
        .par_iter()
        .map(|&strategy| {
            let policy = StrategyPolicy {
                strategy,
                params: *strategy_params,
            };
            let mut source = NormalSource::seeded(seed);
            let outcome = simulate_withdrawals(&mut source, params, &policy)?;
            Ok(StrategyOutcome { strategy, outcome })
        })
        .collect()
}
