//! ILP solver interface and reference implementation
//!
//! `IlpSystem` is the sole boundary between IPET construction and whatever
//! actually solves the resulting linear program - a production build would
//! swap in an FFI binding to `lp_solve`, CPLEX or Coin-OR here. This module
//! also ships [`ReferenceIlpSystem`], a small dense-tableau Big-M simplex
//! good enough for the scale of a single analysed task: IPET's constraint
//! matrix is totally unimodular, so the LP relaxation it solves is already
//! integral and no branch-and-bound is needed.

use crate::error::{Result, WcetError};

/// Handle to a structural variable, opaque outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

/// Handle to a constraint, opaque outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub u32);

/// Constraint comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Le,
    Ge,
    Eq,
}

/// Marker that `solve` succeeded; values are then read back through
/// `value_of`/`objective_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution;

/// The solver boundary the IPET builder programs against.
pub trait IlpSystem {
    fn new_var(&mut self, name: &str) -> Var;
    fn new_constraint(&mut self, cmp: Cmp, rhs: f64) -> ConstraintId;
    fn add_to_constraint(&mut self, constraint: ConstraintId, coef: f64, var: Var);
    fn add_to_objective(&mut self, coef: f64, var: Var);
    fn set_maximize(&mut self, maximize: bool);
    fn solve(&mut self) -> Result<Solution>;
    fn value_of(&self, var: Var) -> f64;
    fn objective_value(&self) -> f64;
}

#[derive(Debug, Clone)]
struct RawConstraint {
    cmp: Cmp,
    rhs: f64,
    coeffs: Vec<f64>,
}

/// Dense-tableau, nonnegative-variable-only ILP/LP system, built up
/// incrementally through the [`IlpSystem`] calls and solved in one shot on
/// [`solve`](IlpSystem::solve).
#[derive(Debug, Default)]
pub struct ReferenceIlpSystem {
    var_names: Vec<String>,
    constraints: Vec<RawConstraint>,
    objective: Vec<f64>,
    maximize: bool,
    values: Vec<f64>,
    objective_value: f64,
}

impl ReferenceIlpSystem {
    pub fn new() -> Self {
        ReferenceIlpSystem::default()
    }
}

impl IlpSystem for ReferenceIlpSystem {
    fn new_var(&mut self, name: &str) -> Var {
        let id = self.var_names.len() as u32;
        self.var_names.push(name.to_string());
        self.objective.push(0.0);
        for constraint in &mut self.constraints {
            constraint.coeffs.push(0.0);
        }
        self.values.push(0.0);
        Var(id)
    }

    fn new_constraint(&mut self, cmp: Cmp, rhs: f64) -> ConstraintId {
        let id = self.constraints.len() as u32;
        self.constraints.push(RawConstraint { cmp, rhs, coeffs: vec![0.0; self.var_names.len()] });
        ConstraintId(id)
    }

    fn add_to_constraint(&mut self, constraint: ConstraintId, coef: f64, var: Var) {
        self.constraints[constraint.0 as usize].coeffs[var.0 as usize] += coef;
    }

    fn add_to_objective(&mut self, coef: f64, var: Var) {
        self.objective[var.0 as usize] += coef;
    }

    fn set_maximize(&mut self, maximize: bool) {
        self.maximize = maximize;
    }

    fn solve(&mut self) -> Result<Solution> {
        let outcome = simplex::solve(&self.constraints, &self.objective, self.maximize)?;
        self.values = outcome.values;
        self.objective_value = outcome.objective_value;
        Ok(Solution)
    }

    fn value_of(&self, var: Var) -> f64 {
        self.values[var.0 as usize]
    }

    fn objective_value(&self) -> f64 {
        self.objective_value
    }
}

/// A minimal Big-M simplex over nonnegative variables, using Bland's rule
/// for both entering and leaving variable selection to guarantee
/// termination even on degenerate IPET tableaux (ties are common: every
/// flow-conservation constraint is an equality).
mod simplex {
    use super::{Cmp, RawConstraint, WcetError};
    use crate::error::Result;

    const BIG_M: f64 = 1.0e7;
    const EPS: f64 = 1.0e-7;

    pub struct Outcome {
        pub values: Vec<f64>,
        pub objective_value: f64,
    }

    pub fn solve(constraints: &[RawConstraint], objective: &[f64], maximize: bool) -> Result<Outcome> {
        let n_structural = objective.len();

        // Normalize every row to a nonnegative right-hand side.
        let rows: Vec<(Cmp, f64, Vec<f64>)> = constraints
            .iter()
            .map(|c| {
                if c.rhs < 0.0 {
                    let cmp = match c.cmp {
                        Cmp::Le => Cmp::Ge,
                        Cmp::Ge => Cmp::Le,
                        Cmp::Eq => Cmp::Eq,
                    };
                    (cmp, -c.rhs, c.coeffs.iter().map(|&v| -v).collect())
                } else {
                    (c.cmp, c.rhs, c.coeffs.clone())
                }
            })
            .collect();
        let m = rows.len();

        // Assign a slack/surplus and/or artificial column to each row.
        let mut slack_col: Vec<Option<usize>> = Vec::with_capacity(m);
        let mut artificial_col: Vec<Option<usize>> = Vec::with_capacity(m);
        let mut col = n_structural;
        for (cmp, _, _) in &rows {
            match cmp {
                Cmp::Le => {
                    slack_col.push(Some(col));
                    col += 1;
                    artificial_col.push(None);
                }
                Cmp::Ge => {
                    slack_col.push(Some(col));
                    col += 1;
                    artificial_col.push(Some(col));
                    col += 1;
                }
                Cmp::Eq => {
                    slack_col.push(None);
                    artificial_col.push(Some(col));
                    col += 1;
                }
            }
        }
        let n_total_vars = col;
        let n_cols = n_total_vars + 1;
        let rhs_col = n_total_vars;

        let mut tableau: Vec<Vec<f64>> = vec![vec![0.0; n_cols]; m + 1];
        let mut basis: Vec<usize> = vec![0; m];

        for (i, (cmp, rhs, coeffs)) in rows.iter().enumerate() {
            for (j, &v) in coeffs.iter().enumerate() {
                tableau[i][j] = v;
            }
            tableau[i][rhs_col] = *rhs;
            match cmp {
                Cmp::Le => {
                    let s = slack_col[i].expect("Le row always has a slack column");
                    tableau[i][s] = 1.0;
                    basis[i] = s;
                }
                Cmp::Ge => {
                    let s = slack_col[i].expect("Ge row always has a surplus column");
                    tableau[i][s] = -1.0;
                    let a = artificial_col[i].expect("Ge row always has an artificial column");
                    tableau[i][a] = 1.0;
                    basis[i] = a;
                }
                Cmp::Eq => {
                    let a = artificial_col[i].expect("Eq row always has an artificial column");
                    tableau[i][a] = 1.0;
                    basis[i] = a;
                }
            }
        }

        // Objective row holds reduced costs for a minimization of -objective
        // (so maximizing the real objective), with artificial variables
        // penalized by BIG_M; basic columns are then zeroed out by row
        // elimination so the row reads true reduced costs.
        let sign = if maximize { 1.0 } else { -1.0 };
        for j in 0..n_structural {
            tableau[m][j] = -sign * objective[j];
        }
        for i in 0..m {
            if let Some(a) = artificial_col[i] {
                tableau[m][a] = BIG_M;
            }
        }
        for i in 0..m {
            let basis_col = basis[i];
            let factor = tableau[m][basis_col];
            if factor != 0.0 {
                for j in 0..n_cols {
                    tableau[m][j] -= factor * tableau[i][j];
                }
            }
        }

        for _ in 0..(m + n_total_vars) * 50 + 50 {
            let Some(enter) = (0..n_total_vars).find(|&j| tableau[m][j] < -EPS) else {
                break;
            };

            let mut leave: Option<usize> = None;
            let mut best_ratio = f64::INFINITY;
            for i in 0..m {
                let coef = tableau[i][enter];
                if coef <= EPS {
                    continue;
                }
                let ratio = tableau[i][rhs_col] / coef;
                let better = match leave {
                    None => true,
                    Some(l) => ratio < best_ratio - EPS || ((ratio - best_ratio).abs() <= EPS && basis[i] < basis[l]),
                };
                if better {
                    leave = Some(i);
                    best_ratio = ratio;
                }
            }
            let Some(leave) = leave else {
                return Err(WcetError::analysis(0, "ILP objective is unbounded"));
            };

            let pivot = tableau[leave][enter];
            for j in 0..n_cols {
                tableau[leave][j] /= pivot;
            }
            for i in 0..=m {
                if i == leave {
                    continue;
                }
                let factor = tableau[i][enter];
                if factor != 0.0 {
                    for j in 0..n_cols {
                        tableau[i][j] -= factor * tableau[leave][j];
                    }
                }
            }
            basis[leave] = enter;
        }

        for i in 0..m {
            if let Some(a) = artificial_col[i] {
                if basis[i] == a && tableau[i][rhs_col] > EPS {
                    return Err(WcetError::analysis(0, "ILP constraints are infeasible"));
                }
            }
        }

        let mut values = vec![0.0; n_structural];
        for i in 0..m {
            if basis[i] < n_structural {
                values[basis[i]] = tableau[i][rhs_col].max(0.0);
            }
        }
        let objective_value: f64 = (0..n_structural).map(|j| objective[j] * values[j]).sum();
        Ok(Outcome { values, objective_value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maximizes_a_simple_bounded_objective() {
        let mut ilp = ReferenceIlpSystem::new();
        let x = ilp.new_var("x");
        let y = ilp.new_var("y");
        // x + y <= 10, x <= 6, maximize 2x + 3y -> x=0, y=10, obj=30.
        let c1 = ilp.new_constraint(Cmp::Le, 10.0);
        ilp.add_to_constraint(c1, 1.0, x);
        ilp.add_to_constraint(c1, 1.0, y);
        let c2 = ilp.new_constraint(Cmp::Le, 6.0);
        ilp.add_to_constraint(c2, 1.0, x);
        ilp.add_to_objective(2.0, x);
        ilp.add_to_objective(3.0, y);
        ilp.set_maximize(true);
        ilp.solve().unwrap();
        assert!((ilp.objective_value() - 30.0).abs() < 1e-6);
        assert!((ilp.value_of(y) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn equality_constraints_pin_flow_conservation() {
        let mut ilp = ReferenceIlpSystem::new();
        let entry = ilp.new_var("entry");
        let body = ilp.new_var("body");
        // entry = 1 (flow-conservation root), body = entry.
        let c1 = ilp.new_constraint(Cmp::Eq, 1.0);
        ilp.add_to_constraint(c1, 1.0, entry);
        let c2 = ilp.new_constraint(Cmp::Eq, 0.0);
        ilp.add_to_constraint(c2, 1.0, body);
        ilp.add_to_constraint(c2, -1.0, entry);
        ilp.add_to_objective(5.0, body);
        ilp.set_maximize(true);
        ilp.solve().unwrap();
        assert!((ilp.value_of(entry) - 1.0).abs() < 1e-6);
        assert!((ilp.value_of(body) - 1.0).abs() < 1e-6);
        assert!((ilp.objective_value() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn reports_infeasible_constraints() {
        let mut ilp = ReferenceIlpSystem::new();
        let x = ilp.new_var("x");
        let c1 = ilp.new_constraint(Cmp::Ge, 5.0);
        ilp.add_to_constraint(c1, 1.0, x);
        let c2 = ilp.new_constraint(Cmp::Le, 2.0);
        ilp.add_to_constraint(c2, 1.0, x);
        ilp.set_maximize(true);
        let err = ilp.solve().unwrap_err();
        assert!(matches!(err, WcetError::Analysis { .. }));
    }
}
