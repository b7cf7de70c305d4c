use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PlanError, PlanResult, ensure_finite};
use super::money::round_dp;
use super::search::DEFAULT_SEARCH_BUDGET;
use super::simplex::{LinearProgram, LpOutcome, Relation};
use super::types::{Asset, RiskConstraints};

pub const RISK_FREE_RATE: f64 = 0.04;
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

const SNAP_TO_ZERO: f64 = 1e-9;
/// Upper limit on caps evaluated by one frontier sweep.
pub const MAX_FRONTIER_POINTS: usize = 10_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    pub fn volatility_cap(self) -> f64 {
        match self {
            RiskLevel::Conservative => 0.10,
            RiskLevel::Moderate => 0.15,
            RiskLevel::Aggressive => 0.20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetWeight {
    pub symbol: String,
    pub weight: f64,
}

/// Portfolio figures derived from a weight vector.
///
/// Volatility is the weighted sum of asset volatilities. Correlations are
/// ignored on purpose; every cap and report in this module uses the same
/// linear proxy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub bond_weight: f64,
    pub sector_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub weights: Vec<AssetWeight>,
    pub max_volatility: f64,
    #[serde(flatten)]
    pub stats: PortfolioStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrontierRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for FrontierRange {
    fn default() -> Self {
        Self {
            start: 0.05,
            end: 0.30,
            step: 0.01,
        }
    }
}

impl FrontierRange {
    fn caps(&self) -> PlanResult<Vec<f64>> {
        ensure_finite(self.start, "frontier start")?;
        ensure_finite(self.end, "frontier end")?;
        ensure_finite(self.step, "frontier step")?;
        if self.start <= 0.0 {
            return Err(PlanError::invalid("frontier start must be > 0"));
        }
        if self.end < self.start {
            return Err(PlanError::invalid("frontier end must be >= start"));
        }
        if self.step <= 0.0 {
            return Err(PlanError::invalid("frontier step must be > 0"));
        }
        let spans = ((self.end - self.start) / self.step + 1e-9).floor();
        if spans >= MAX_FRONTIER_POINTS as f64 {
            return Err(PlanError::invalid(format!(
                "frontier range yields more than {MAX_FRONTIER_POINTS} points"
            )));
        }
        let count = spans as usize + 1;
        Ok((0..count)
            .map(|k| self.start + k as f64 * self.step)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierPoint {
    pub max_volatility_pct: f64,
    pub volatility_pct: f64,
    pub return_pct: f64,
}

fn sector_key(asset: &Asset) -> String {
    asset.sector.trim().to_ascii_lowercase()
}

fn validate_assets(assets: &[Asset]) -> PlanResult<()> {
    if assets.is_empty() {
        return Err(PlanError::invalid("at least one asset is required"));
    }
    let mut seen = HashSet::with_capacity(assets.len());
    for asset in assets {
        asset.validate()?;
        if !seen.insert(asset.symbol.as_str()) {
            return Err(PlanError::invalid(format!(
                "duplicate asset symbol {}",
                asset.symbol
            )));
        }
    }
    Ok(())
}

pub fn optimize(
    assets: &[Asset],
    risk: &RiskConstraints,
    max_volatility: f64,
) -> PlanResult<AllocationResult> {
    optimize_with_budget(assets, risk, max_volatility, DEFAULT_SEARCH_BUDGET)
}

/// Maximises expected return under position, sector, bond-floor and
/// volatility caps.
pub fn optimize_with_budget(
    assets: &[Asset],
    risk: &RiskConstraints,
    max_volatility: f64,
    max_pivots: u64,
) -> PlanResult<AllocationResult> {
    validate_assets(assets)?;
    risk.validate()?;
    ensure_finite(max_volatility, "max volatility")?;
    if max_volatility <= 0.0 {
        return Err(PlanError::invalid("max volatility must be > 0"));
    }

    let lp = build_program(assets, risk, max_volatility);
    let weights = match lp.solve(max_pivots)? {
        LpOutcome::Optimal { x, .. } => x,
        LpOutcome::Infeasible => {
            warn!(
                assets = assets.len(),
                max_volatility, "allocation constraints are infeasible"
            );
            return Err(PlanError::infeasible(
                "no allocation satisfies the position, sector, bond and volatility constraints",
            ));
        }
        LpOutcome::Unbounded => {
            return Err(PlanError::infeasible("allocation program is unbounded"));
        }
    };

    let weights: Vec<f64> = weights
        .into_iter()
        .map(|w| {
            if w < SNAP_TO_ZERO {
                0.0
            } else {
                w.min(risk.max_single_position)
            }
        })
        .collect();
    let stats = stats(assets, &weights)?;
    verify(&weights, &stats, risk, max_volatility)?;

    debug!(
        assets = assets.len(),
        max_volatility,
        expected_return = stats.expected_return,
        volatility = stats.volatility,
        "allocation optimised"
    );

    Ok(AllocationResult {
        weights: assets
            .iter()
            .zip(&weights)
            .map(|(asset, &weight)| AssetWeight {
                symbol: asset.symbol.clone(),
                weight,
            })
            .collect(),
        max_volatility,
        stats,
    })
}

fn build_program(assets: &[Asset], risk: &RiskConstraints, max_volatility: f64) -> LinearProgram {
    let n = assets.len();
    let mut lp = LinearProgram::maximize(assets.iter().map(|a| a.expected_return).collect());

    lp.constrain(vec![1.0; n], Relation::Eq, 1.0);

    for i in 0..n {
        let mut row = vec![0.0; n];
        row[i] = 1.0;
        lp.constrain(row, Relation::LessEq, risk.max_single_position);
    }

    let mut sectors: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, asset) in assets.iter().enumerate() {
        sectors.entry(sector_key(asset)).or_default().push(i);
    }
    for members in sectors.values() {
        let mut row = vec![0.0; n];
        for &i in members {
            row[i] = 1.0;
        }
        lp.constrain(row, Relation::LessEq, risk.max_sector_weight);
    }

    if risk.min_bond_allocation > 0.0 {
        let row = assets
            .iter()
            .map(|a| if a.is_bond() { 1.0 } else { 0.0 })
            .collect();
        lp.constrain(row, Relation::GreaterEq, risk.min_bond_allocation);
    }

    lp.constrain(
        assets.iter().map(|a| a.volatility).collect(),
        Relation::LessEq,
        max_volatility,
    );
    lp
}

fn verify(
    weights: &[f64],
    stats: &PortfolioStats,
    risk: &RiskConstraints,
    max_volatility: f64,
) -> PlanResult<()> {
    let total: f64 = weights.iter().sum();
    let violated = (total - 1.0).abs() > WEIGHT_TOLERANCE
        || stats
            .sector_weights
            .values()
            .any(|&w| w > risk.max_sector_weight + WEIGHT_TOLERANCE)
        || stats.bond_weight < risk.min_bond_allocation - WEIGHT_TOLERANCE
        || stats.volatility > max_volatility + WEIGHT_TOLERANCE;
    if violated {
        warn!(total, "solver vertex failed constraint verification");
        return Err(PlanError::infeasible(
            "solver could not produce an allocation within tolerance",
        ));
    }
    Ok(())
}

/// Expected return, linear volatility proxy, Sharpe ratio and sector totals
/// for an arbitrary weight vector.
pub fn stats(assets: &[Asset], weights: &[f64]) -> PlanResult<PortfolioStats> {
    validate_assets(assets)?;
    if weights.len() != assets.len() {
        return Err(PlanError::invalid(format!(
            "expected {} weights, got {}",
            assets.len(),
            weights.len()
        )));
    }
    for (asset, &w) in assets.iter().zip(weights) {
        ensure_finite(w, &format!("{} weight", asset.symbol))?;
    }

    let expected_return = assets
        .iter()
        .zip(weights)
        .map(|(a, w)| a.expected_return * w)
        .sum();
    let volatility: f64 = assets.iter().zip(weights).map(|(a, w)| a.volatility * w).sum();
    let sharpe_ratio = if volatility == 0.0 {
        0.0
    } else {
        (expected_return - RISK_FREE_RATE) / volatility
    };

    let mut sector_weights = BTreeMap::new();
    let mut bond_weight = 0.0;
    for (asset, &w) in assets.iter().zip(weights) {
        *sector_weights.entry(sector_key(asset)).or_insert(0.0) += w;
        if asset.is_bond() {
            bond_weight += w;
        }
    }

    Ok(PortfolioStats {
        expected_return,
        volatility,
        sharpe_ratio,
        bond_weight,
        sector_weights,
    })
}

/// Sweeps the volatility cap and keeps the feasible points in ascending order.
pub fn frontier(
    assets: &[Asset],
    risk: &RiskConstraints,
    range: &FrontierRange,
) -> PlanResult<Vec<FrontierPoint>> {
    validate_assets(assets)?;
    risk.validate()?;
    let caps = range.caps()?;

    let points: Vec<Option<FrontierPoint>> = caps
        .par_iter()
        .map(|&cap| match optimize(assets, risk, cap) {
            Ok(result) => Ok(Some(FrontierPoint {
                max_volatility_pct: round_dp(cap * 100.0, 2),
                volatility_pct: round_dp(result.stats.volatility * 100.0, 2),
                return_pct: round_dp(result.stats.expected_return * 100.0, 2),
            })),
            Err(PlanError::Infeasible(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .collect::<PlanResult<_>>()?;

    let points: Vec<FrontierPoint> = points.into_iter().flatten().collect();
    debug!(
        requested = caps.len(),
        feasible = points.len(),
        "frontier sweep complete"
    );
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};
    use proptest::collection::vec as prop_vec;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn asset(symbol: &str, ret: f64, vol: f64, sector: &str) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            expected_return: ret,
            volatility: vol,
            dividend_yield: 0.0,
            sector: sector.to_string(),
        }
    }

    fn weight_of(result: &AllocationResult, symbol: &str) -> f64 {
        result
            .weights
            .iter()
            .find(|w| w.symbol == symbol)
            .map(|w| w.weight)
            .expect("symbol present")
    }

    fn sample_assets() -> Vec<Asset> {
        vec![
            asset("QQQ", 0.12, 0.22, "Technology"),
            asset("VGT", 0.11, 0.20, "Technology"),
            asset("XLV", 0.08, 0.14, "Healthcare"),
            asset("XLU", 0.06, 0.12, "Utilities"),
            asset("BND", 0.04, 0.05, "Bonds"),
            asset("TIP", 0.035, 0.04, "Fixed Income"),
        ]
    }

    #[test]
    fn fills_best_returns_up_to_position_caps() {
        let assets = vec![
            asset("A", 0.10, 0.2, "Equity-A"),
            asset("B", 0.08, 0.2, "Equity-B"),
            asset("C", 0.06, 0.2, "Equity-C"),
            asset("D", 0.03, 0.05, "Bonds"),
        ];
        let risk = RiskConstraints {
            max_volatility: 1.0,
            max_single_position: 0.5,
            max_sector_weight: 1.0,
            min_bond_allocation: 0.2,
        };
        let result = optimize(&assets, &risk, 1.0).expect("feasible");
        assert_approx(weight_of(&result, "A"), 0.5);
        assert_approx(weight_of(&result, "B"), 0.3);
        assert_approx(weight_of(&result, "C"), 0.0);
        assert_approx(weight_of(&result, "D"), 0.2);
        assert_approx(result.stats.expected_return, 0.08);
    }

    #[test]
    fn volatility_cap_binds_the_mix() {
        let assets = vec![
            asset("STK", 0.10, 0.20, "Equity"),
            asset("BND", 0.04, 0.04, "Bonds"),
        ];
        let risk = RiskConstraints {
            max_volatility: 0.12,
            max_single_position: 1.0,
            max_sector_weight: 1.0,
            min_bond_allocation: 0.0,
        };
        let result = optimize(&assets, &risk, 0.12).expect("feasible");
        assert_approx(weight_of(&result, "STK"), 0.5);
        assert_approx(result.stats.volatility, 0.12);
        assert_approx(result.stats.expected_return, 0.07);
        assert_approx(result.stats.sharpe_ratio, 0.25);
    }

    #[test]
    fn position_caps_that_cannot_sum_to_one_are_infeasible() {
        let assets = vec![
            asset("A", 0.10, 0.1, "A"),
            asset("B", 0.09, 0.1, "B"),
            asset("C", 0.08, 0.1, "C"),
        ];
        let risk = RiskConstraints {
            max_volatility: 0.5,
            max_single_position: 0.3,
            max_sector_weight: 1.0,
            min_bond_allocation: 0.0,
        };
        let err = optimize(&assets, &risk, 0.5).expect_err("infeasible");
        assert!(matches!(err, PlanError::Infeasible(_)));
    }

    #[test]
    fn bond_floor_beyond_bond_caps_is_infeasible() {
        let assets = vec![
            asset("A", 0.10, 0.1, "Equity"),
            asset("B", 0.09, 0.1, "Equity2"),
            asset("BND", 0.04, 0.05, "Bonds"),
        ];
        let risk = RiskConstraints {
            max_volatility: 0.5,
            max_single_position: 0.4,
            max_sector_weight: 1.0,
            min_bond_allocation: 0.5,
        };
        let err = optimize(&assets, &risk, 0.5).expect_err("infeasible");
        assert!(matches!(err, PlanError::Infeasible(_)));
    }

    #[test]
    fn optimize_rejects_malformed_inputs() {
        let risk = RiskConstraints::default();
        assert!(matches!(
            optimize(&[], &risk, 0.1),
            Err(PlanError::InvalidInput(_))
        ));
        let dupes = vec![asset("A", 0.1, 0.1, "X"), asset("A", 0.1, 0.1, "Y")];
        assert!(matches!(
            optimize(&dupes, &risk, 0.1),
            Err(PlanError::InvalidInput(_))
        ));
        let negative = vec![asset("A", 0.1, -0.1, "X")];
        assert!(matches!(
            optimize(&negative, &risk, 0.1),
            Err(PlanError::InvalidInput(_))
        ));
        assert!(matches!(
            optimize(&sample_assets(), &risk, 0.0),
            Err(PlanError::InvalidInput(_))
        ));
    }

    #[test]
    fn default_profile_allocation_respects_every_cap() {
        let assets = sample_assets();
        let risk = RiskConstraints::default();
        let result = optimize(&assets, &risk, RiskLevel::Moderate.volatility_cap()).expect("ok");
        let total: f64 = result.weights.iter().map(|w| w.weight).sum();
        assert_approx(total, 1.0);
        assert!(result.stats.volatility <= 0.15 + WEIGHT_TOLERANCE);
        assert!(result.stats.bond_weight >= 0.10 - WEIGHT_TOLERANCE);
        assert!(
            result
                .stats
                .sector_weights
                .values()
                .all(|&w| w <= risk.max_sector_weight + WEIGHT_TOLERANCE)
        );
    }

    #[test]
    fn stats_rejects_length_mismatch_and_handles_zero_volatility() {
        let assets = vec![asset("CASH", 0.02, 0.0, "Cash")];
        let s = stats(&assets, &[1.0]).expect("ok");
        assert_approx(s.sharpe_ratio, 0.0);
        assert_approx(s.expected_return, 0.02);
        let err = stats(&assets, &[0.5, 0.5]).expect_err("mismatch");
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn stats_rejects_invalid_assets() {
        let negative = vec![asset("A", 0.1, -0.5, "Tech")];
        let err = stats(&negative, &[1.0]).expect_err("negative volatility");
        assert!(matches!(err, PlanError::InvalidInput(_)));

        let duplicated = vec![asset("A", 0.1, 0.2, "Tech"), asset("A", 0.05, 0.1, "Tech")];
        let err = stats(&duplicated, &[0.5, 0.5]).expect_err("duplicate symbol");
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn stats_groups_sectors_case_insensitively() {
        let assets = vec![
            asset("A", 0.1, 0.2, "Tech"),
            asset("B", 0.1, 0.2, "tech "),
            asset("C", 0.04, 0.05, "Bonds"),
        ];
        let s = stats(&assets, &[0.3, 0.3, 0.4]).expect("ok");
        assert_approx(s.sector_weights["tech"], 0.6);
        assert_approx(s.bond_weight, 0.4);
    }

    #[test]
    fn frontier_skips_infeasible_caps_and_is_non_decreasing() {
        let assets = sample_assets();
        let risk = RiskConstraints::default();
        let range = FrontierRange {
            start: 0.02,
            end: 0.30,
            step: 0.01,
        };
        let points = frontier(&assets, &risk, &range).expect("ok");
        assert!(!points.is_empty());
        assert!(points.len() < 29);
        assert!(points.iter().all(|p| p.max_volatility_pct >= 3.0));
        assert!(
            points
                .windows(2)
                .all(|w| w[0].max_volatility_pct < w[1].max_volatility_pct
                    && w[0].return_pct <= w[1].return_pct + 1e-9)
        );
        assert!(points.iter().all(|p| p.volatility_pct <= p.max_volatility_pct + 1e-6));
    }

    #[test]
    fn frontier_rejects_bad_ranges() {
        let range = FrontierRange {
            start: 0.1,
            end: 0.05,
            step: 0.01,
        };
        assert!(frontier(&sample_assets(), &RiskConstraints::default(), &range).is_err());

        let dense = FrontierRange {
            start: 0.05,
            end: 0.30,
            step: 1e-12,
        };
        let err = frontier(&sample_assets(), &RiskConstraints::default(), &dense)
            .expect_err("too many points");
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn risk_levels_map_to_fixed_caps() {
        assert_approx(RiskLevel::Conservative.volatility_cap(), 0.10);
        assert_approx(RiskLevel::Moderate.volatility_cap(), 0.15);
        assert_approx(RiskLevel::Aggressive.volatility_cap(), 0.20);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_optimizer_output_satisfies_constraints_and_round_trips(
            specs in prop_vec((0u32..2_000, 1u32..4_000, 0usize..4), 2..12),
            single_pct in 20u32..101,
            sector_pct in 30u32..101,
            bond_pct in 0u32..40,
            cap_bp in 300u32..3_000,
        ) {
            let sectors = ["Technology", "Healthcare", "Energy", "Bonds"];
            let assets: Vec<Asset> = specs
                .iter()
                .enumerate()
                .map(|(i, &(ret, vol, sector))| {
                    asset(&format!("S{i}"), ret as f64 / 10_000.0, vol as f64 / 10_000.0, sectors[sector])
                })
                .collect();
            let risk = RiskConstraints {
                max_volatility: cap_bp as f64 / 10_000.0,
                max_single_position: single_pct as f64 / 100.0,
                max_sector_weight: sector_pct as f64 / 100.0,
                min_bond_allocation: bond_pct as f64 / 100.0,
            };
            let cap = risk.max_volatility;
            let reachable = assets.len() as f64 * risk.max_single_position;
            match optimize(&assets, &risk, cap) {
                Ok(result) => {
                    prop_assert!(reachable >= 1.0 - WEIGHT_TOLERANCE);
                    let weights: Vec<f64> = result.weights.iter().map(|w| w.weight).collect();
                    let total: f64 = weights.iter().sum();
                    prop_assert!((total - 1.0).abs() <= WEIGHT_TOLERANCE);
                    prop_assert!(weights.iter().all(|&w| (0.0..=risk.max_single_position).contains(&w)));
                    prop_assert!(result.stats.sector_weights.values().all(|&w| w <= risk.max_sector_weight + WEIGHT_TOLERANCE));
                    prop_assert!(result.stats.bond_weight >= risk.min_bond_allocation - WEIGHT_TOLERANCE);

                    let again = stats(&assets, &weights).expect("same length");
                    prop_assert!(again.volatility <= cap + WEIGHT_TOLERANCE);
                    prop_assert!(again.expected_return == result.stats.expected_return);
                }
                Err(PlanError::Infeasible(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
