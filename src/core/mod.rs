mod allocation;
mod error;
mod harvest;
mod location;
mod money;
mod monte_carlo;
mod random;
mod retirement;
mod search;
mod simplex;
mod solver;
mod types;
mod withdrawal;

pub use allocation::{
    AllocationResult, AssetWeight, FrontierPoint, FrontierRange, MAX_FRONTIER_POINTS, PortfolioStats,
    RISK_FREE_RATE, RiskLevel, WEIGHT_TOLERANCE, frontier, optimize, optimize_with_budget, stats,
};
pub use error::{PlanError, PlanResult};
pub use harvest::{
    HarvestCandidate, HarvestOptions, HarvestPlan, HarvestStatus, ORDINARY_TAX_RATE,
    WASH_SALE_WINDOW_DAYS, WashSaleExclusion, find_harvest_candidates,
};
pub use location::{
    BOND_PENALTY, LocationPlan, LocationRecommendation, MAX_PLACEMENT_COST_BP, optimize_location,
    optimize_location_with_budget, placement_cost_bp,
};
pub use money::{from_cents, round_dp, to_cents};
pub use monte_carlo::{
    BAND_PERCENTILES, DistributionSummary, GrowthParams, PercentileBands, median_of_sorted,
    percentile_at, simulate, simulate_with_yearly_percentiles,
};
pub use random::NormalSource;
pub use retirement::{
    EARLIEST_CLAIM_AGE, FULL_RETIREMENT_AGE, LATEST_CLAIM_AGE, ProjectionConfig,
    RetirementProjection, SocialSecurityEstimate, claiming_schedule, project_retirement,
    social_security_benefit,
};
pub use search::DEFAULT_SEARCH_BUDGET;
pub use simplex::{LinearProgram, LpOutcome, Relation};
pub use solver::{
    ContributionSolveConfig, ContributionSolveResult, SolveIteration, solve_required_contribution,
};
pub use types::{
    AccountBalances, AccountType, Asset, Holding, InvestorProfile, MarketAssumptions,
    RiskConstraints, TaxLot,
};
pub use withdrawal::{
    StrategyOutcome, StrategyParams, StrategyPolicy, WithdrawalOutcome, WithdrawalParams,
    WithdrawalPolicy, WithdrawalStrategy, compare_strategies, simulate_withdrawals,
};
