//! Account placement of holdings under per-account capacity.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::error::{PlanError, PlanResult};
use super::harvest::ORDINARY_TAX_RATE;
use super::money::{apply_rate_cents, checked_sum_cents, from_cents, to_cents};
use super::search::{DEFAULT_SEARCH_BUDGET, SearchBudget};
use super::types::{AccountBalances, AccountType, Asset, Holding};

/// Extra taxable cost of bond interest taxed as ordinary income.
pub const BOND_PENALTY: f64 = 0.02;

/// Largest placement score accepted for one holding in one account.
pub const MAX_PLACEMENT_COST_BP: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecommendation {
    pub symbol: String,
    pub value: f64,
    pub current_account: AccountType,
    pub recommended_account: AccountType,
    pub changed: bool,
    /// Positive when the recommended placement lowers the yearly dividend tax.
    pub annual_tax_difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPlan {
    pub recommendations: Vec<LocationRecommendation>,
    pub current_annual_drag: f64,
    pub optimized_annual_drag: f64,
    pub annual_savings: f64,
    pub moves: usize,
    pub optimizer_cost_bp: i64,
}

/// Placement score in basis points of yield. Not a dollar figure.
pub fn placement_cost_bp(asset: &Asset, account: AccountType) -> PlanResult<i64> {
    let penalty = if asset.is_bond() { BOND_PENALTY } else { 0.0 };
    let dy = asset.dividend_yield;
    let growth = asset.expected_return;
    let cost = match account {
        AccountType::Taxable => dy + penalty,
        AccountType::Roth => (dy - growth).max(0.0),
        AccountType::Traditional => (growth - dy - penalty).max(0.0),
    };
    let bp = (cost * 10_000.0).round();
    if !bp.is_finite() || bp.abs() > MAX_PLACEMENT_COST_BP as f64 {
        return Err(PlanError::invalid(format!(
            "{} placement cost in {} accounts is out of range",
            asset.symbol,
            account.label()
        )));
    }
    Ok(bp as i64)
}

pub fn optimize_location(
    holdings: &[Holding],
    market_data: &[Asset],
    balances: &AccountBalances,
) -> PlanResult<LocationPlan> {
    optimize_location_with_budget(holdings, market_data, balances, DEFAULT_SEARCH_BUDGET)
}

pub fn optimize_location_with_budget(
    holdings: &[Holding],
    market_data: &[Asset],
    balances: &AccountBalances,
    max_steps: u64,
) -> PlanResult<LocationPlan> {
    balances.validate()?;
    let assets = index_assets(market_data)?;

    let mut items = Vec::with_capacity(holdings.len());
    for (position, holding) in holdings.iter().enumerate() {
        holding.validate()?;
        let asset = assets.get(holding.symbol.as_str()).ok_or_else(|| {
            PlanError::invalid(format!("no market data for holding {}", holding.symbol))
        })?;
        let costs = [
            placement_cost_bp(asset, AccountType::Taxable)?,
            placement_cost_bp(asset, AccountType::Roth)?,
            placement_cost_bp(asset, AccountType::Traditional)?,
        ];
        items.push(Item {
            position,
            holding,
            asset,
            value_cents: to_cents(holding.value())?,
            cheapest: costs.iter().copied().min().unwrap_or(0),
            costs,
        });
    }
    items.sort_by(|a, b| {
        b.value_cents
            .cmp(&a.value_cents)
            .then(a.position.cmp(&b.position))
    });

    let capacity = [
        to_cents(balances.taxable)?,
        to_cents(balances.roth)?,
        to_cents(balances.traditional)?,
    ];
    // Partial sums in the search never exceed these totals.
    checked_sum_cents(capacity, "total account balance")?;
    checked_sum_cents(items.iter().map(|i| i.value_cents), "total holding value")?;
    checked_sum_cents(
        items.iter().map(|i| i.costs.iter().copied().max().unwrap_or(0)),
        "total placement cost",
    )?;
    let mut search = AssignmentSearch::new(&items, capacity, max_steps);
    if let Err(err) = search.explore(0, 0) {
        warn!(
            holdings = items.len(),
            steps = search.budget.used(),
            "location search budget exhausted"
        );
        return Err(err);
    }
    let Some((cost, assignment)) = search.best else {
        warn!(holdings = items.len(), "holdings do not fit the account balances");
        return Err(PlanError::infeasible(
            "holdings cannot be placed without exceeding an account balance",
        ));
    };
    debug!(
        holdings = items.len(),
        cost_bp = cost,
        steps = search.budget.used(),
        "location search complete"
    );

    let mut placed: Vec<(&Item<'_>, AccountType)> = items.iter().zip(assignment).collect();
    placed.sort_by_key(|(item, _)| item.position);

    let mut current_total = 0i64;
    let mut optimized_total = 0i64;
    let mut recommendations = Vec::with_capacity(placed.len());
    for (item, recommended) in placed {
        let current = item.holding.account;
        let before = annual_drag_cents(item, current)?;
        let after = annual_drag_cents(item, recommended)?;
        current_total = checked_sum_cents([current_total, before], "current annual drag")?;
        optimized_total = checked_sum_cents([optimized_total, after], "optimized annual drag")?;
        recommendations.push(LocationRecommendation {
            symbol: item.holding.symbol.clone(),
            value: from_cents(item.value_cents),
            current_account: current,
            recommended_account: recommended,
            changed: current != recommended,
            annual_tax_difference: from_cents(before - after),
        });
    }

    Ok(LocationPlan {
        moves: recommendations.iter().filter(|r| r.changed).count(),
        recommendations,
        current_annual_drag: from_cents(current_total),
        optimized_annual_drag: from_cents(optimized_total),
        annual_savings: from_cents(current_total - optimized_total),
        optimizer_cost_bp: cost,
    })
}

fn index_assets(market_data: &[Asset]) -> PlanResult<HashMap<&str, &Asset>> {
    let mut assets = HashMap::with_capacity(market_data.len());
    for asset in market_data {
        asset.validate()?;
        if assets.insert(asset.symbol.as_str(), asset).is_some() {
            return Err(PlanError::invalid(format!(
                "duplicate market data for {}",
                asset.symbol
            )));
        }
    }
    Ok(assets)
}

/// Dividend tax owed per year; only taxable accounts pay it.
fn annual_drag_cents(item: &Item<'_>, account: AccountType) -> PlanResult<i64> {
    match account {
        AccountType::Taxable => apply_rate_cents(
            item.value_cents,
            item.asset.dividend_yield * ORDINARY_TAX_RATE,
        ),
        AccountType::Roth | AccountType::Traditional => Ok(0),
    }
}

struct Item<'a> {
    position: usize,
    holding: &'a Holding,
    asset: &'a Asset,
    value_cents: i64,
    costs: [i64; 3],
    cheapest: i64,
}

impl Item<'_> {
    /// Current account first, then the fixed account order.
    fn account_order(&self) -> impl Iterator<Item = AccountType> + '_ {
        let current = self.holding.account;
        std::iter::once(current).chain(AccountType::ALL.into_iter().filter(move |a| *a != current))
    }
}

struct AssignmentSearch<'a> {
    items: &'a [Item<'a>],
    /// Sum of the cheapest costs from each index to the end.
    floor: Vec<i64>,
    /// Total holding value from each index to the end.
    value_left: Vec<i64>,
    remaining: [i64; 3],
    budget: SearchBudget,
    current: Vec<AccountType>,
    best: Option<(i64, Vec<AccountType>)>,
}

impl<'a> AssignmentSearch<'a> {
    fn new(items: &'a [Item<'a>], capacity: [i64; 3], max_steps: u64) -> Self {
        let mut floor = vec![0; items.len() + 1];
        let mut value_left = vec![0; items.len() + 1];
        for i in (0..items.len()).rev() {
            floor[i] = floor[i + 1] + items[i].cheapest;
            value_left[i] = value_left[i + 1] + items[i].value_cents;
        }
        Self {
            items,
            floor,
            value_left,
            remaining: capacity,
            budget: SearchBudget::new(max_steps),
            current: Vec::with_capacity(items.len()),
            best: None,
        }
    }

    fn explore(&mut self, idx: usize, cost: i64) -> PlanResult<()> {
        self.budget.charge()?;

        if self
            .best
            .as_ref()
            .is_some_and(|(best, _)| cost + self.floor[idx] >= *best)
        {
            return Ok(());
        }
        if self.value_left[idx] > self.remaining.iter().sum::<i64>() {
            return Ok(());
        }
        let items = self.items;
        let Some(item) = items.get(idx) else {
            self.best = Some((cost, self.current.clone()));
            return Ok(());
        };

        for account in item.account_order() {
            let slot = account.index();
            if item.value_cents > self.remaining[slot] {
                continue;
            }
            self.remaining[slot] -= item.value_cents;
            self.current.push(account);
            let result = self.explore(idx + 1, cost + item.costs[slot]);
            self.current.pop();
            self.remaining[slot] += item.value_cents;
            result?;
        }
        Ok(())
    }
}
