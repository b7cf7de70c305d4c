use rand::Rng;
use serde::Serialize;
use tracing::debug;

use super::error::{PlanError, PlanResult, ensure_finite};
use super::random::{NormalSource, validate_params};

pub const BAND_PERCENTILES: [f64; 5] = [0.10, 0.25, 0.50, 0.75, 0.90];

/// Growth run parameters shared by both simulation modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthParams {
    pub starting_balance: f64,
    pub annual_contribution: f64,
    pub mean_return: f64,
    pub stddev: f64,
    /// Signed so that a negative horizon from the caller is rejected, not wrapped.
    pub years: i64,
    pub path_count: usize,
}

impl GrowthParams {
    pub fn validate(&self) -> PlanResult<()> {
        if self.path_count == 0 {
            return Err(PlanError::invalid("path count must be > 0"));
        }
        if self.years < 0 {
            return Err(PlanError::invalid("years must be >= 0"));
        }
        ensure_finite(self.starting_balance, "starting balance")?;
        ensure_finite(self.annual_contribution, "annual contribution")?;
        validate_params(self.mean_return, self.stddev)
    }

    fn year_count(&self) -> usize {
        self.years as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBands {
    pub p10: Vec<f64>,
    pub p25: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p90: Vec<f64>,
}

impl PercentileBands {
    fn with_capacity(len: usize) -> Self {
        Self {
            p10: Vec::with_capacity(len),
            p25: Vec::with_capacity(len),
            p50: Vec::with_capacity(len),
            p75: Vec::with_capacity(len),
            p90: Vec::with_capacity(len),
        }
    }

    fn push_sorted(&mut self, sorted: &[f64]) {
        self.p10.push(percentile_at(sorted, BAND_PERCENTILES[0]));
        self.p25.push(percentile_at(sorted, BAND_PERCENTILES[1]));
        self.p50.push(percentile_at(sorted, BAND_PERCENTILES[2]));
        self.p75.push(percentile_at(sorted, BAND_PERCENTILES[3]));
        self.p90.push(percentile_at(sorted, BAND_PERCENTILES[4]));
    }

    pub fn len(&self) -> usize {
        self.p50.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p50.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub paths: usize,
    pub min: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub max: f64,
    pub mean: f64,
}

impl DistributionSummary {
    /// Expects an ascending, non-empty slice.
    pub fn from_sorted(sorted: &[f64]) -> Self {
        let n = sorted.len();
        let mean = if n == 0 {
            0.0
        } else {
            sorted.iter().sum::<f64>() / n as f64
        };
        Self {
            paths: n,
            min: sorted.first().copied().unwrap_or(0.0),
            p10: percentile_at(sorted, 0.10),
            p25: percentile_at(sorted, 0.25),
            p50: percentile_at(sorted, 0.50),
            p75: percentile_at(sorted, 0.75),
            p90: percentile_at(sorted, 0.90),
            max: sorted.last().copied().unwrap_or(0.0),
            mean,
        }
    }
}

/// Order-statistic lookup `sorted[floor(N * p)]`, never interpolated.
///
/// Only `p = 1.0` can index past the end; it is clamped to the last element.
pub fn percentile_at(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Middle element at `N / 2`; even-length inputs are not averaged.
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted[sorted.len() / 2]
}

pub(crate) fn sort_ascending(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Runs `path_count` growth paths and returns the final balances sorted ascending.
pub fn simulate<R: Rng>(
    source: &mut NormalSource<R>,
    params: &GrowthParams,
) -> PlanResult<Vec<f64>> {
    params.validate()?;

    let mut balances = vec![params.starting_balance; params.path_count];
    let mut returns = vec![0.0; params.path_count];
    for _ in 0..params.year_count() {
        step_year(source, params, &mut balances, &mut returns)?;
    }
    sort_ascending(&mut balances);

    debug!(
        paths = params.path_count,
        years = params.years,
        median = median_of_sorted(&balances),
        "growth simulation complete"
    );
    Ok(balances)
}

/// Same update loop as [`simulate`], re-extracting the five bands after every year.
///
/// Index 0 of every band is the starting balance.
pub fn simulate_with_yearly_percentiles<R: Rng>(
    source: &mut NormalSource<R>,
    params: &GrowthParams,
) -> PlanResult<PercentileBands> {
    let (bands, _) = simulate_bands_and_finals(source, params)?;
    Ok(bands)
}

pub(crate) fn simulate_bands_and_finals<R: Rng>(
    source: &mut NormalSource<R>,
    params: &GrowthParams,
) -> PlanResult<(PercentileBands, Vec<f64>)> {
    params.validate()?;

    let years = params.year_count();
    let mut bands = PercentileBands::with_capacity(years + 1);
    let mut balances = vec![params.starting_balance; params.path_count];
    let mut returns = vec![0.0; params.path_count];
    let mut sorted = balances.clone();
    bands.push_sorted(&sorted);

    for _ in 0..years {
        step_year(source, params, &mut balances, &mut returns)?;
        sorted.copy_from_slice(&balances);
        sort_ascending(&mut sorted);
        bands.push_sorted(&sorted);
    }

    debug!(
        paths = params.path_count,
        years = params.years,
        "banded growth simulation complete"
    );
    Ok((bands, sorted))
}

fn step_year<R: Rng>(
    source: &mut NormalSource<R>,
    params: &GrowthParams,
    balances: &mut [f64],
    returns: &mut [f64],
) -> PlanResult<()> {
    source.fill_into(returns, params.mean_return, params.stddev)?;
    for (balance, r) in balances.iter_mut().zip(returns.iter()) {
        *balance = *balance * (1.0 + r) + params.annual_contribution;
    }
    Ok(())
}
