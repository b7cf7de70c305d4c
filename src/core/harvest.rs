//! Tax-loss harvest selection with wash-sale exclusions.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{PlanError, PlanResult, ensure_finite};
use super::money::{apply_rate_cents, checked_sum_cents, from_cents, to_cents, to_cents_ceil};
use super::search::{DEFAULT_SEARCH_BUDGET, SearchBudget};
use super::types::TaxLot;

pub const ORDINARY_TAX_RATE: f64 = 0.22;
pub const WASH_SALE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarvestOptions {
    /// Minimum total loss to realize; zero or less harvests everything eligible.
    pub target_amount: f64,
    /// Optional cap on the number of lots sold.
    pub max_lots: Option<usize>,
    pub as_of: NaiveDate,
    pub search_budget: u64,
}

impl HarvestOptions {
    pub fn maximize(as_of: NaiveDate) -> Self {
        Self {
            target_amount: 0.0,
            max_lots: None,
            as_of,
            search_budget: DEFAULT_SEARCH_BUDGET,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarvestStatus {
    Harvest,
    NoCandidates,
    AllExcluded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestCandidate {
    pub lot_id: String,
    pub symbol: String,
    pub shares: f64,
    pub purchase_price: f64,
    pub current_price: f64,
    pub loss: f64,
    pub tax_savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WashSaleExclusion {
    pub lot_id: String,
    pub symbol: String,
    pub loss: f64,
    pub triggering_lot_id: String,
    pub triggering_purchase_date: NaiveDate,
    pub warning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestPlan {
    pub status: HarvestStatus,
    pub as_of: NaiveDate,
    pub target_amount: f64,
    pub eligible_lots: usize,
    pub selected: Vec<HarvestCandidate>,
    pub excluded: Vec<WashSaleExclusion>,
    pub total_loss: f64,
    pub total_tax_savings: f64,
}

struct Candidate<'a> {
    position: usize,
    lot: &'a TaxLot,
    loss_cents: i64,
}

pub fn find_harvest_candidates(lots: &[TaxLot], options: &HarvestOptions) -> PlanResult<HarvestPlan> {
    validate_lots(lots)?;
    ensure_finite(options.target_amount, "target amount")?;

    let eligible: Vec<(usize, &TaxLot)> = lots
        .iter()
        .enumerate()
        .filter(|(_, lot)| lot.is_loss_eligible())
        .collect();

    let mut plan = HarvestPlan {
        status: HarvestStatus::Harvest,
        as_of: options.as_of,
        target_amount: options.target_amount,
        eligible_lots: eligible.len(),
        selected: Vec::new(),
        excluded: Vec::new(),
        total_loss: 0.0,
        total_tax_savings: 0.0,
    };
    if eligible.is_empty() {
        plan.status = HarvestStatus::NoCandidates;
        debug!(lots = lots.len(), "no loss-eligible lots");
        return Ok(plan);
    }

    let mut candidates = Vec::with_capacity(eligible.len());
    for (position, lot) in eligible {
        let loss_cents = to_cents(lot.unrealized_loss())?;
        match wash_sale_trigger(lot, lots, options.as_of) {
            Some(trigger) => plan.excluded.push(WashSaleExclusion {
                lot_id: lot.lot_id.clone(),
                symbol: lot.symbol.clone(),
                loss: from_cents(loss_cents),
                triggering_lot_id: trigger.lot_id.clone(),
                triggering_purchase_date: trigger.purchase_date,
                warning: format!(
                    "Wash sale risk: {} lot {} was purchased on {}, within {} days of {}; selling lot {} at a loss would be disallowed",
                    trigger.symbol,
                    trigger.lot_id,
                    trigger.purchase_date,
                    WASH_SALE_WINDOW_DAYS,
                    options.as_of,
                    lot.lot_id
                ),
            }),
            None => candidates.push(Candidate {
                position,
                lot,
                loss_cents,
            }),
        }
    }

    if candidates.is_empty() && options.target_amount <= 0.0 {
        plan.status = HarvestStatus::AllExcluded;
        return Ok(plan);
    }

    // Every subset sum in the search is bounded by this total.
    checked_sum_cents(candidates.iter().map(|c| c.loss_cents), "total harvestable loss")?;

    let target_cents = if options.target_amount > 0.0 {
        to_cents_ceil(options.target_amount)?
    } else {
        0
    };
    let chosen = select_lots(&candidates, target_cents, options)?;

    let mut total_loss = 0i64;
    let mut total_savings = 0i64;
    for candidate in candidates.iter().filter(|c| chosen.contains(&c.position)) {
        let savings = apply_rate_cents(candidate.loss_cents, ORDINARY_TAX_RATE)?;
        total_loss += candidate.loss_cents;
        total_savings += savings;
        plan.selected.push(HarvestCandidate {
            lot_id: candidate.lot.lot_id.clone(),
            symbol: candidate.lot.symbol.clone(),
            shares: candidate.lot.shares,
            purchase_price: candidate.lot.purchase_price,
            current_price: candidate.lot.current_price,
            loss: from_cents(candidate.loss_cents),
            tax_savings: from_cents(savings),
        });
    }
    plan.total_loss = from_cents(total_loss);
    plan.total_tax_savings = from_cents(total_savings);

    debug!(
        eligible = plan.eligible_lots,
        excluded = plan.excluded.len(),
        selected = plan.selected.len(),
        total_loss = plan.total_loss,
        "harvest plan built"
    );
    Ok(plan)
}

fn validate_lots(lots: &[TaxLot]) -> PlanResult<()> {
    let mut ids = HashSet::with_capacity(lots.len());
    for lot in lots {
        lot.validate()?;
        if !ids.insert(lot.lot_id.as_str()) {
            return Err(PlanError::invalid(format!("duplicate lot id {}", lot.lot_id)));
        }
    }
    Ok(())
}

/// Another lot of the same symbol bought within the window around `as_of`,
/// in any account, blocks the loss.
fn wash_sale_trigger<'a>(lot: &TaxLot, all: &'a [TaxLot], as_of: NaiveDate) -> Option<&'a TaxLot> {
    all.iter().find(|other| {
        other.symbol == lot.symbol
            && other.lot_id != lot.lot_id
            && (other.purchase_date - as_of).num_days().abs() <= WASH_SALE_WINDOW_DAYS
    })
}

/// Returns the input positions of the chosen lots.
fn select_lots(
    candidates: &[Candidate<'_>],
    target_cents: i64,
    options: &HarvestOptions,
) -> PlanResult<HashSet<usize>> {
    if options.target_amount <= 0.0 && options.max_lots.is_none() {
        return Ok(candidates.iter().map(|c| c.position).collect());
    }

    let mut order: Vec<&Candidate<'_>> = candidates.iter().collect();
    order.sort_by(|a, b| b.loss_cents.cmp(&a.loss_cents).then(a.position.cmp(&b.position)));
    let losses: Vec<i64> = order.iter().map(|c| c.loss_cents).collect();

    let mut search = SubsetSearch {
        losses: &losses,
        prefix: prefix_sums(&losses)?,
        target: target_cents,
        max_count: options.max_lots.unwrap_or(losses.len()),
        budget: SearchBudget::new(options.search_budget),
        current: Vec::with_capacity(losses.len()),
        best: None,
    };
    if let Err(err) = search.explore(0, 0) {
        warn!(
            lots = losses.len(),
            steps = search.budget.used(),
            "harvest search budget exhausted"
        );
        return Err(err);
    }

    let Some((_, picked)) = search.best else {
        warn!(target = options.target_amount, "harvest target unreachable");
        return Err(PlanError::infeasible(format!(
            "no combination of eligible lots realizes at least {:.2} in losses",
            options.target_amount
        )));
    };
    debug!(steps = search.budget.used(), "harvest search complete");
    Ok(picked.into_iter().map(|i| order[i].position).collect())
}

fn prefix_sums(values: &[i64]) -> PlanResult<Vec<i64>> {
    let mut prefix = Vec::with_capacity(values.len() + 1);
    let mut running = 0i64;
    prefix.push(running);
    for &v in values {
        running = running
            .checked_add(v)
            .ok_or_else(|| PlanError::invalid("cumulative lot losses overflow"))?;
        prefix.push(running);
    }
    Ok(prefix)
}

/// Depth-first branch and bound over lots sorted by loss, largest first.
struct SubsetSearch<'a> {
    losses: &'a [i64],
    prefix: Vec<i64>,
    target: i64,
    max_count: usize,
    budget: SearchBudget,
    current: Vec<usize>,
    best: Option<(i64, Vec<usize>)>,
}

impl SubsetSearch<'_> {
    fn explore(&mut self, idx: usize, sum: i64) -> PlanResult<()> {
        self.budget.charge()?;

        if sum >= self.target && self.best.as_ref().is_none_or(|(best, _)| sum > *best) {
            self.best = Some((sum, self.current.clone()));
        }

        let slots = self.max_count.saturating_sub(self.current.len());
        let reach = (idx + slots).min(self.losses.len());
        let bound = sum + (self.prefix[reach] - self.prefix[idx]);
        if bound < self.target || self.best.as_ref().is_some_and(|(best, _)| bound <= *best) {
            return Ok(());
        }
        if idx == self.losses.len() || slots == 0 {
            return Ok(());
        }

        self.current.push(idx);
        self.explore(idx + 1, sum + self.losses[idx])?;
        self.current.pop();
        self.explore(idx + 1, sum)
    }
}
