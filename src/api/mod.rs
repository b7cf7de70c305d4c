use std::fs;
use std::io::{self, Read};

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::{
    AccountBalances, Asset, ContributionSolveConfig, DEFAULT_SEARCH_BUDGET, DistributionSummary,
    FrontierRange, GrowthParams, HarvestOptions, Holding, InvestorProfile, MarketAssumptions,
    NormalSource, PercentileBands, PlanError, PlanResult, ProjectionConfig, RiskConstraints,
    RiskLevel, StrategyOutcome, StrategyParams, StrategyPolicy, TaxLot, WithdrawalParams,
    WithdrawalStrategy, claiming_schedule, compare_strategies, find_harvest_candidates, frontier,
    optimize_location_with_budget, optimize_with_budget, project_retirement, simulate,
    simulate_with_yearly_percentiles, simulate_withdrawals, social_security_benefit,
    solve_required_contribution, stats,
};

const DEFAULT_PATH_COUNT: usize = 10_000;
const DEFAULT_SEED: u64 = 42;

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Portfolio planning: Monte Carlo projections, allocation, tax-loss harvesting and asset location"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    #[arg(
        long,
        global = true,
        env = "NESTEGG_SEED",
        help = "Overrides the seed of any stochastic request"
    )]
    pub seed: Option<u64>,
    #[arg(
        long,
        global = true,
        env = "NESTEGG_SEARCH_BUDGET",
        default_value_t = DEFAULT_SEARCH_BUDGET,
        help = "Maximum simplex pivots or search nodes per solve"
    )]
    pub search_budget: u64,
}

#[derive(Args, Debug, Clone)]
pub struct IoArgs {
    #[arg(long, default_value = "-", help = "Request document path, or - for stdin")]
    pub input: String,
    #[arg(long, help = "Pretty-print the JSON result")]
    pub pretty: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Final balance distribution of a growth simulation
    Simulate(IoArgs),
    /// Yearly p10/p25/p50/p75/p90 balance bands
    Bands(IoArgs),
    /// Withdrawal success rates, one strategy or all of them
    Withdrawals(IoArgs),
    /// Accumulation and decumulation projection for an investor profile
    Project(IoArgs),
    /// Monthly contribution needed to reach the goal with a target probability
    SolveContribution(IoArgs),
    /// Return-maximising allocation under risk constraints
    Optimize(IoArgs),
    /// Feasible points of the volatility-capped efficient frontier
    Frontier(IoArgs),
    /// Return, volatility, Sharpe ratio and sector weights of given weights
    Stats(IoArgs),
    /// Tax-loss harvest selection with wash-sale exclusions
    Harvest(IoArgs),
    /// Account placement of holdings
    Locate(IoArgs),
    /// Social Security benefit by claiming age
    SocialSecurity(IoArgs),
}

impl Command {
    pub fn io(&self) -> &IoArgs {
        match self {
            Command::Simulate(io)
            | Command::Bands(io)
            | Command::Withdrawals(io)
            | Command::Project(io)
            | Command::SolveContribution(io)
            | Command::Optimize(io)
            | Command::Frontier(io)
            | Command::Stats(io)
            | Command::Harvest(io)
            | Command::Locate(io)
            | Command::SocialSecurity(io) => io,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Simulate(_) => "simulate",
            Command::Bands(_) => "bands",
            Command::Withdrawals(_) => "withdrawals",
            Command::Project(_) => "project",
            Command::SolveContribution(_) => "solve-contribution",
            Command::Optimize(_) => "optimize",
            Command::Frontier(_) => "frontier",
            Command::Stats(_) => "stats",
            Command::Harvest(_) => "harvest",
            Command::Locate(_) => "locate",
            Command::SocialSecurity(_) => "social-security",
        }
    }
}

/// Settings that apply to every command regardless of the request document.
#[derive(Copy, Clone, Debug)]
pub struct RunOptions {
    pub seed: Option<u64>,
    pub search_budget: u64,
    pub today: NaiveDate,
}

impl RunOptions {
    fn seed_or(&self, requested: u64) -> u64 {
        self.seed.unwrap_or(requested)
    }
}

fn default_path_count() -> usize {
    DEFAULT_PATH_COUNT
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrowthPayload {
    starting_balance: f64,
    #[serde(default)]
    annual_contribution: f64,
    mean_return: f64,
    stddev: f64,
    years: i64,
    #[serde(default = "default_path_count")]
    path_count: usize,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default)]
    include_paths: bool,
}

impl GrowthPayload {
    fn params(&self) -> GrowthParams {
        GrowthParams {
            starting_balance: self.starting_balance,
            annual_contribution: self.annual_contribution,
            mean_return: self.mean_return,
            stddev: self.stddev,
            years: self.years,
            path_count: self.path_count,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalsPayload {
    start_balance: f64,
    years: u32,
    #[serde(default = "default_path_count")]
    path_count: usize,
    mean_return: f64,
    stddev: f64,
    #[serde(default = "default_seed")]
    seed: u64,
    strategy: Option<WithdrawalStrategy>,
    #[serde(default)]
    strategy_params: StrategyParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPayload {
    profile: InvestorProfile,
    market: MarketAssumptions,
    #[serde(default)]
    config: ProjectionConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolvePayload {
    profile: InvestorProfile,
    market: MarketAssumptions,
    #[serde(default)]
    config: ContributionSolveConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizePayload {
    assets: Vec<Asset>,
    #[serde(default)]
    risk: RiskConstraints,
    max_volatility: Option<f64>,
    risk_level: Option<RiskLevel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrontierPayload {
    assets: Vec<Asset>,
    #[serde(default)]
    risk: RiskConstraints,
    #[serde(default)]
    range: FrontierRange,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsPayload {
    assets: Vec<Asset>,
    weights: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarvestPayload {
    lots: Vec<TaxLot>,
    #[serde(default)]
    target_amount: f64,
    max_lots: Option<usize>,
    as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocatePayload {
    holdings: Vec<Holding>,
    market_data: Vec<Asset>,
    balances: AccountBalances,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialSecurityPayload {
    full_benefit: f64,
    claim_age: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    seed: u64,
    summary: DistributionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_balances: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BandsResponse {
    seed: u64,
    bands: PercentileBands,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalsResponse {
    seed: u64,
    outcomes: Vec<StrategyOutcome>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: String,
    kind: &'a str,
}

/// Reads the request document named by the command and returns the rendered result.
pub fn run(cli: &Cli) -> PlanResult<String> {
    let io = cli.command.io();
    let json = read_input(&io.input)?;
    let options = RunOptions {
        seed: cli.seed,
        search_budget: cli.search_budget,
        today: Utc::now().date_naive(),
    };
    let value = execute(&cli.command, &json, &options)?;
    render(&value, io.pretty)
}

pub fn execute(command: &Command, json: &str, options: &RunOptions) -> PlanResult<Value> {
    debug!(command = command.name(), bytes = json.len(), "request received");
    let value = match command {
        Command::Simulate(_) => {
            let payload: GrowthPayload = parse_payload(json)?;
            let seed = options.seed_or(payload.seed);
            let finals = simulate(&mut NormalSource::seeded(seed), &payload.params())?;
            to_json(&SimulateResponse {
                seed,
                summary: DistributionSummary::from_sorted(&finals),
                final_balances: payload.include_paths.then_some(finals),
            })?
        }
        Command::Bands(_) => {
            let payload: GrowthPayload = parse_payload(json)?;
            let seed = options.seed_or(payload.seed);
            let bands =
                simulate_with_yearly_percentiles(&mut NormalSource::seeded(seed), &payload.params())?;
            to_json(&BandsResponse { seed, bands })?
        }
        Command::Withdrawals(_) => {
            let payload: WithdrawalsPayload = parse_payload(json)?;
            let seed = options.seed_or(payload.seed);
            let params = WithdrawalParams {
                start_balance: payload.start_balance,
                years: payload.years,
                path_count: payload.path_count,
                mean_return: payload.mean_return,
                stddev: payload.stddev,
            };
            let outcomes = match payload.strategy {
                Some(strategy) => {
                    payload.strategy_params.validate()?;
                    let policy = StrategyPolicy {
                        strategy,
                        params: payload.strategy_params,
                    };
                    let outcome =
                        simulate_withdrawals(&mut NormalSource::seeded(seed), &params, &policy)?;
                    vec![StrategyOutcome { strategy, outcome }]
                }
                None => compare_strategies(&params, &payload.strategy_params, seed)?,
            };
            to_json(&WithdrawalsResponse { seed, outcomes })?
        }
        Command::Project(_) => {
            let mut payload: ProjectPayload = parse_payload(json)?;
            payload.config.seed = options.seed_or(payload.config.seed);
            to_json(&project_retirement(
                &payload.profile,
                &payload.market,
                &payload.config,
            )?)?
        }
        Command::SolveContribution(_) => {
            let mut payload: SolvePayload = parse_payload(json)?;
            payload.config.seed = options.seed_or(payload.config.seed);
            to_json(&solve_required_contribution(
                &payload.profile,
                &payload.market,
                &payload.config,
            )?)?
        }
        Command::Optimize(_) => {
            let payload: OptimizePayload = parse_payload(json)?;
            let cap = resolve_volatility_cap(&payload)?;
            to_json(&optimize_with_budget(
                &payload.assets,
                &payload.risk,
                cap,
                options.search_budget,
            )?)?
        }
        Command::Frontier(_) => {
            let payload: FrontierPayload = parse_payload(json)?;
            to_json(&frontier(&payload.assets, &payload.risk, &payload.range)?)?
        }
        Command::Stats(_) => {
            let payload: StatsPayload = parse_payload(json)?;
            to_json(&stats(&payload.assets, &payload.weights)?)?
        }
        Command::Harvest(_) => {
            let payload: HarvestPayload = parse_payload(json)?;
            let harvest = HarvestOptions {
                target_amount: payload.target_amount,
                max_lots: payload.max_lots,
                as_of: payload.as_of.unwrap_or(options.today),
                search_budget: options.search_budget,
            };
            to_json(&find_harvest_candidates(&payload.lots, &harvest)?)?
        }
        Command::Locate(_) => {
            let payload: LocatePayload = parse_payload(json)?;
            to_json(&optimize_location_with_budget(
                &payload.holdings,
                &payload.market_data,
                &payload.balances,
                options.search_budget,
            )?)?
        }
        Command::SocialSecurity(_) => {
            let payload: SocialSecurityPayload = parse_payload(json)?;
            match payload.claim_age {
                Some(age) => to_json(&social_security_benefit(payload.full_benefit, age)?)?,
                None => to_json(&claiming_schedule(payload.full_benefit)?)?,
            }
        }
    };
    info!(command = command.name(), "request complete");
    Ok(value)
}

/// An explicit cap wins over a risk level; giving both is ambiguous.
fn resolve_volatility_cap(payload: &OptimizePayload) -> PlanResult<f64> {
    match (payload.max_volatility, payload.risk_level) {
        (Some(_), Some(_)) => Err(PlanError::invalid(
            "maxVolatility and riskLevel are mutually exclusive",
        )),
        (Some(cap), None) => Ok(cap),
        (None, Some(level)) => Ok(level.volatility_cap()),
        (None, None) => Ok(payload.risk.max_volatility),
    }
}

pub fn error_document(err: &PlanError) -> String {
    let body = ErrorResponse {
        error: err.to_string(),
        kind: err.kind(),
    };
    serde_json::to_string(&body).unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", err.kind()))
}

/// Process exit status for a failed request.
pub fn exit_code(err: &PlanError) -> u8 {
    match err {
        PlanError::InvalidInput(_) => 1,
        PlanError::Infeasible(_) | PlanError::SearchBudgetExhausted { .. } => 2,
    }
}

fn read_input(path: &str) -> PlanResult<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| PlanError::invalid(format!("failed to read request from stdin: {e}")))?;
        return Ok(buf);
    }
    fs::read_to_string(path)
        .map_err(|e| PlanError::invalid(format!("failed to read request file {path}: {e}")))
}

fn parse_payload<T: DeserializeOwned>(json: &str) -> PlanResult<T> {
    serde_json::from_str(json)
        .map_err(|e| PlanError::invalid(format!("invalid request document: {e}")))
}

fn to_json<T: Serialize>(body: &T) -> PlanResult<Value> {
    serde_json::to_value(body)
        .map_err(|e| PlanError::invalid(format!("failed to encode result: {e}")))
}

fn render(value: &Value, pretty: bool) -> PlanResult<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.map_err(|e| PlanError::invalid(format!("failed to encode result: {e}")))
}
