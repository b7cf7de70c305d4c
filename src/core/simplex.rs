//! Dense two-phase simplex for the small allocation programs.
//!
//! Variables are implicitly non-negative. Pivoting follows Bland's rule, which
//! cannot cycle, and every pivot is charged against a caller-supplied budget.

use super::error::PlanResult;
use super::search::SearchBudget;

const EPS: f64 = 1e-9;
const FEASIBILITY_EPS: f64 = 1e-7;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Relation {
    LessEq,
    Eq,
    GreaterEq,
}

#[derive(Debug, Clone)]
struct Constraint {
    coefficients: Vec<f64>,
    relation: Relation,
    rhs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LpOutcome {
    Optimal { x: Vec<f64>, objective: f64 },
    Infeasible,
    Unbounded,
}

#[derive(Debug, Clone)]
pub struct LinearProgram {
    objective: Vec<f64>,
    constraints: Vec<Constraint>,
}

impl LinearProgram {
    /// Maximises `objective · x`.
    pub fn maximize(objective: Vec<f64>) -> Self {
        Self {
            objective,
            constraints: Vec::new(),
        }
    }

    pub fn variable_count(&self) -> usize {
        self.objective.len()
    }

    pub fn constrain(&mut self, coefficients: Vec<f64>, relation: Relation, rhs: f64) {
        debug_assert_eq!(coefficients.len(), self.objective.len());
        self.constraints.push(Constraint {
            coefficients,
            relation,
            rhs,
        });
    }

    pub fn solve(&self, max_pivots: u64) -> PlanResult<LpOutcome> {
        let mut tableau = Tableau::build(self, max_pivots);

        if tableau.artificial_start < tableau.cols {
            let phase_one: Vec<f64> = (0..tableau.cols)
                .map(|j| if j >= tableau.artificial_start { -1.0 } else { 0.0 })
                .collect();
            // Phase one is bounded above by zero, so it always reaches an optimum.
            tableau.run(&phase_one, |_| true)?;
            if tableau.objective_value(&phase_one) < -FEASIBILITY_EPS {
                return Ok(LpOutcome::Infeasible);
            }
            tableau.drive_out_artificials();
        }

        let mut phase_two = self.objective.clone();
        phase_two.resize(tableau.cols, 0.0);
        let artificial_start = tableau.artificial_start;
        match tableau.run(&phase_two, |j| j < artificial_start)? {
            PhaseEnd::Unbounded => Ok(LpOutcome::Unbounded),
            PhaseEnd::Optimal => {
                let x = tableau.solution(self.variable_count());
                let objective = self.objective.iter().zip(&x).map(|(c, v)| c * v).sum();
                Ok(LpOutcome::Optimal { x, objective })
            }
        }
    }
}

enum PhaseEnd {
    Optimal,
    Unbounded,
}

struct Tableau {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    cols: usize,
    artificial_start: usize,
    budget: SearchBudget,
}

impl Tableau {
    fn build(lp: &LinearProgram, max_pivots: u64) -> Self {
        let n = lp.variable_count();
        let normalized: Vec<Constraint> = lp
            .constraints
            .iter()
            .map(|c| {
                if c.rhs < 0.0 {
                    Constraint {
                        coefficients: c.coefficients.iter().map(|a| -a).collect(),
                        relation: match c.relation {
                            Relation::LessEq => Relation::GreaterEq,
                            Relation::Eq => Relation::Eq,
                            Relation::GreaterEq => Relation::LessEq,
                        },
                        rhs: -c.rhs,
                    }
                } else {
                    c.clone()
                }
            })
            .collect();

        let slack_count = normalized
            .iter()
            .filter(|c| c.relation != Relation::Eq)
            .count();
        let artificial_count = normalized
            .iter()
            .filter(|c| c.relation != Relation::LessEq)
            .count();
        let artificial_start = n + slack_count;
        let cols = artificial_start + artificial_count;

        let mut rows = Vec::with_capacity(normalized.len());
        let mut basis = Vec::with_capacity(normalized.len());
        let mut next_slack = n;
        let mut next_artificial = artificial_start;
        for c in &normalized {
            let mut row = vec![0.0; cols + 1];
            row[..n].copy_from_slice(&c.coefficients);
            row[cols] = c.rhs;
            match c.relation {
                Relation::LessEq => {
                    row[next_slack] = 1.0;
                    basis.push(next_slack);
                    next_slack += 1;
                }
                Relation::GreaterEq => {
                    row[next_slack] = -1.0;
                    next_slack += 1;
                    row[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    next_artificial += 1;
                }
                Relation::Eq => {
                    row[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    next_artificial += 1;
                }
            }
            rows.push(row);
        }

        Self {
            rows,
            basis,
            cols,
            artificial_start,
            budget: SearchBudget::new(max_pivots),
        }
    }

    fn rhs(&self, row: usize) -> f64 {
        self.rows[row][self.cols]
    }

    fn objective_value(&self, cost: &[f64]) -> f64 {
        self.basis
            .iter()
            .enumerate()
            .map(|(i, &b)| cost[b] * self.rhs(i))
            .sum()
    }

    fn reduced_cost(&self, cost: &[f64], col: usize) -> f64 {
        let z: f64 = self
            .basis
            .iter()
            .enumerate()
            .map(|(i, &b)| cost[b] * self.rows[i][col])
            .sum();
        cost[col] - z
    }

    fn run(&mut self, cost: &[f64], allowed: impl Fn(usize) -> bool) -> PlanResult<PhaseEnd> {
        loop {
            let entering = (0..self.cols)
                .filter(|&j| allowed(j) && !self.basis.contains(&j))
                .find(|&j| self.reduced_cost(cost, j) > EPS);
            let Some(entering) = entering else {
                return Ok(PhaseEnd::Optimal);
            };

            let mut leaving: Option<(usize, f64)> = None;
            for i in 0..self.rows.len() {
                let a = self.rows[i][entering];
                if a <= EPS {
                    continue;
                }
                let ratio = self.rhs(i).max(0.0) / a;
                leaving = match leaving {
                    None => Some((i, ratio)),
                    Some((best, best_ratio)) => {
                        if ratio < best_ratio - EPS
                            || ((ratio - best_ratio).abs() <= EPS
                                && self.basis[i] < self.basis[best])
                        {
                            Some((i, ratio))
                        } else {
                            Some((best, best_ratio))
                        }
                    }
                };
            }
            let Some((leaving, _)) = leaving else {
                return Ok(PhaseEnd::Unbounded);
            };

            self.budget.charge()?;
            self.pivot(leaving, entering);
        }
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let pivot = self.rows[row][col];
        for v in self.rows[row].iter_mut() {
            *v /= pivot;
        }
        let pivot_row = self.rows[row].clone();
        for (i, other) in self.rows.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = other[col];
            if factor.abs() <= f64::EPSILON {
                continue;
            }
            for (v, p) in other.iter_mut().zip(&pivot_row) {
                *v -= factor * p;
            }
        }
        self.basis[row] = col;
    }

    /// Replaces zero-level artificial basics with structural or slack
    /// columns. Rows with no such column are redundant and keep their
    /// artificial, which phase two never lets re-enter.
    fn drive_out_artificials(&mut self) {
        for i in 0..self.rows.len() {
            if self.basis[i] < self.artificial_start {
                continue;
            }
            let replacement = (0..self.artificial_start)
                .filter(|j| !self.basis.contains(j))
                .find(|&j| self.rows[i][j].abs() > EPS);
            if let Some(j) = replacement {
                self.pivot(i, j);
            }
        }
    }

    fn solution(&self, n: usize) -> Vec<f64> {
        let mut x = vec![0.0; n];
        for (i, &b) in self.basis.iter().enumerate() {
            if b < n {
                x[b] = self.rhs(i).max(0.0);
            }
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PlanError;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn optimal(outcome: LpOutcome) -> (Vec<f64>, f64) {
        match outcome {
            LpOutcome::Optimal { x, objective } => (x, objective),
            other => panic!("expected optimal, got {other:?}"),
        }
    }

    #[test]
    fn solves_textbook_maximisation() {
        let mut lp = LinearProgram::maximize(vec![3.0, 2.0]);
        lp.constrain(vec![1.0, 1.0], Relation::LessEq, 4.0);
        lp.constrain(vec![1.0, 3.0], Relation::LessEq, 6.0);
        lp.constrain(vec![1.0, 0.0], Relation::LessEq, 3.0);
        let (x, objective) = optimal(lp.solve(1_000).expect("ok"));
        assert_approx(x[0], 3.0);
        assert_approx(x[1], 1.0);
        assert_approx(objective, 11.0);
    }

    #[test]
    fn handles_equality_and_lower_bound_rows() {
        let mut lp = LinearProgram::maximize(vec![1.0, 2.0]);
        lp.constrain(vec![1.0, 1.0], Relation::Eq, 1.0);
        lp.constrain(vec![1.0, 0.0], Relation::GreaterEq, 0.6);
        let (x, objective) = optimal(lp.solve(1_000).expect("ok"));
        assert_approx(x[0], 0.6);
        assert_approx(x[1], 0.4);
        assert_approx(objective, 1.4);
    }

    #[test]
    fn negative_rhs_rows_are_normalised() {
        let mut lp = LinearProgram::maximize(vec![-1.0]);
        lp.constrain(vec![-1.0], Relation::LessEq, -2.0);
        let (x, _) = optimal(lp.solve(1_000).expect("ok"));
        assert_approx(x[0], 2.0);
    }

    #[test]
    fn detects_infeasible_program() {
        let mut lp = LinearProgram::maximize(vec![1.0, 1.0]);
        lp.constrain(vec![1.0, 1.0], Relation::Eq, 1.0);
        lp.constrain(vec![1.0, 0.0], Relation::GreaterEq, 0.8);
        lp.constrain(vec![0.0, 1.0], Relation::GreaterEq, 0.5);
        assert_eq!(lp.solve(1_000).expect("ok"), LpOutcome::Infeasible);
    }

    #[test]
    fn detects_unbounded_program() {
        let mut lp = LinearProgram::maximize(vec![1.0, 0.0]);
        lp.constrain(vec![1.0, -1.0], Relation::LessEq, 1.0);
        assert_eq!(lp.solve(1_000).expect("ok"), LpOutcome::Unbounded);
    }

    #[test]
    fn redundant_equalities_do_not_break_phase_two() {
        let mut lp = LinearProgram::maximize(vec![1.0, 3.0]);
        lp.constrain(vec![1.0, 1.0], Relation::Eq, 1.0);
        lp.constrain(vec![2.0, 2.0], Relation::Eq, 2.0);
        lp.constrain(vec![0.0, 1.0], Relation::LessEq, 0.5);
        let (x, objective) = optimal(lp.solve(1_000).expect("ok"));
        assert_approx(x[0], 0.5);
        assert_approx(x[1], 0.5);
        assert_approx(objective, 2.0);
    }

    #[test]
    fn exhausted_pivot_budget_is_reported() {
        let mut lp = LinearProgram::maximize(vec![3.0, 2.0]);
        lp.constrain(vec![1.0, 1.0], Relation::LessEq, 4.0);
        lp.constrain(vec![1.0, 3.0], Relation::LessEq, 6.0);
        let err = lp.solve(0).expect_err("budget of zero pivots");
        assert!(matches!(err, PlanError::SearchBudgetExhausted { .. }));
    }
}
