use std::collections::HashMap;

use log::warn;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{Factorize, LeastSquaresSvd, Solve};

use crate::config::NmfConfig;
use crate::factor::update_rules::clamp_nonnegative;

/// Solver for the complementary initial factor:
/// min ||A*X - B||_F^2 s.t. X >= 0, with A: (m, n), B: (m, k), X: (n, k).
pub trait ConstrainedSolver: Send + Sync {
    fn solve(&self, a: &Array2<f64>, b: &Array2<f64>, config: &NmfConfig) -> Array2<f64>;
}

/// Block principal pivoting (Kim & Park 2011, SISC 33(6) pp. 3261-3281)
#[derive(Debug, Clone)]
pub struct BlockPivotSolver {
    /// Pivoting rounds allowed per unknown
    pub rounds_per_unknown: usize,
}

impl Default for BlockPivotSolver {
    fn default() -> Self {
        Self {
            rounds_per_unknown: 5,
        }
    }
}

impl ConstrainedSolver for BlockPivotSolver {
    fn solve(&self, a: &Array2<f64>, b: &Array2<f64>, _config: &NmfConfig) -> Array2<f64> {
        let ata = a.t().dot(a);
        let atb = a.t().dot(b);
        let max_rounds = self.rounds_per_unknown * ata.nrows().max(1);
        let mut result = nnls_block_pivot(&ata, &atb, None, max_rounds);
        if !result.converged {
            warn!(
                "NNLS block pivoting stopped after {} rounds without converging",
                result.rounds
            );
        }
        clamp_nonnegative(&mut result.x);
        result.x
    }
}

/// Outcome of [`nnls_block_pivot`]
pub struct NnlsResult {
    pub x: Array2<f64>,
    pub rounds: usize,
    pub converged: bool,
}

/// Block-pivoting NNLS on precomputed A^T*A (n x n) and A^T*B (n x k).
/// Every column of B is an independent problem; columns sharing a passive
/// set are solved together.
pub fn nnls_block_pivot(
    ata: &Array2<f64>,
    atb: &Array2<f64>,
    init: Option<&Array2<f64>>,
    max_rounds: usize,
) -> NnlsResult {
    let (n, k) = atb.dim();
    const FULL_EXCHANGE_BUDGET: i32 = 3;

    let mut passive: Array2<bool>;
    let mut x: Array2<f64>;
    let mut y: Array2<f64>;
    match init {
        Some(x0) => {
            passive = x0.mapv(|v| v > 0.0);
            let all: Vec<usize> = (0..k).collect();
            x = Array2::zeros((n, k));
            solve_columns(ata, atb, &passive, &all, &mut x);
            y = ata.dot(&x) - atb;
        }
        None => {
            passive = Array2::from_elem((n, k), false);
            x = Array2::zeros((n, k));
            y = -atb.clone();
        }
    }

    let mut budget = vec![FULL_EXCHANGE_BUDGET; k];
    let mut best_violations = vec![n + 1; k];

    let mut violations = count_violations(&x, &y, &passive, None);
    let mut pending: Vec<usize> = (0..k).filter(|&c| violations[c] > 0).collect();
    let mut rounds = 0;

    while !pending.is_empty() {
        rounds += 1;
        if rounds > max_rounds {
            return NnlsResult {
                x,
                rounds: rounds - 1,
                converged: false,
            };
        }

        for &c in &pending {
            if violations[c] < best_violations[c] {
                // progress: reset the budget and exchange every violating index
                budget[c] = FULL_EXCHANGE_BUDGET;
                best_violations[c] = violations[c];
                exchange_all(&x, &y, &mut passive, c);
            } else if budget[c] >= 1 {
                budget[c] -= 1;
                exchange_all(&x, &y, &mut passive, c);
            } else {
                // backup rule: flip only the last violating index
                if let Some(row) = (0..n).rev().find(|&r| is_violating(&x, &y, &passive, r, c)) {
                    passive[[row, c]] = !passive[[row, c]];
                }
            }
        }

        solve_columns(ata, atb, &passive, &pending, &mut x);
        for &c in &pending {
            let y_col = ata.dot(&x.column(c)) - &atb.column(c);
            y.column_mut(c).assign(&y_col);
        }
        x.mapv_inplace(chop);
        y.mapv_inplace(chop);

        violations = count_violations(&x, &y, &passive, Some(&pending));
        pending.retain(|&c| violations[c] > 0);
    }

    NnlsResult {
        x,
        rounds,
        converged: true,
    }
}

fn chop(v: f64) -> f64 {
    if v.abs() < 1e-12 {
        0.0
    } else {
        v
    }
}

/// Dual infeasible in the active set, or primal infeasible in the passive set
fn is_violating(x: &Array2<f64>, y: &Array2<f64>, passive: &Array2<bool>, r: usize, c: usize) -> bool {
    (y[[r, c]] < 0.0 && !passive[[r, c]]) || (x[[r, c]] < 0.0 && passive[[r, c]])
}

fn exchange_all(x: &Array2<f64>, y: &Array2<f64>, passive: &mut Array2<bool>, c: usize) {
    for r in 0..x.nrows() {
        if y[[r, c]] < 0.0 && !passive[[r, c]] {
            passive[[r, c]] = true;
        } else if x[[r, c]] < 0.0 && passive[[r, c]] {
            passive[[r, c]] = false;
        }
    }
}

fn count_violations(
    x: &Array2<f64>,
    y: &Array2<f64>,
    passive: &Array2<bool>,
    only: Option<&[usize]>,
) -> Vec<usize> {
    let k = x.ncols();
    let mut counts = vec![0; k];
    let cols: Vec<usize> = match only {
        Some(cols) => cols.to_vec(),
        None => (0..k).collect(),
    };
    for c in cols {
        counts[c] = (0..x.nrows())
            .filter(|&r| is_violating(x, y, passive, r, c))
            .count();
    }
    counts
}

/// Solve the normal equations restricted to each column's passive set,
/// writing the result (zeros outside the passive set) into `x`.
fn solve_columns(
    ata: &Array2<f64>,
    atb: &Array2<f64>,
    passive: &Array2<bool>,
    cols: &[usize],
    x: &mut Array2<f64>,
) {
    let mut groups: HashMap<Vec<bool>, Vec<usize>> = HashMap::new();
    for &c in cols {
        groups.entry(passive.column(c).to_vec()).or_default().push(c);
    }

    for (pattern, group) in groups {
        let free: Vec<usize> = pattern
            .iter()
            .enumerate()
            .filter(|(_, &p)| p)
            .map(|(i, _)| i)
            .collect();
        for &c in &group {
            x.column_mut(c).fill(0.0);
        }
        if free.is_empty() {
            continue;
        }

        let sub_ata = ata.select(Axis(0), &free).select(Axis(1), &free);
        let sub_atb = atb.select(Axis(0), &free).select(Axis(1), &group);
        let sub_x = solve_linear(&sub_ata, sub_atb.view());

        for (gi, &c) in group.iter().enumerate() {
            for (fi, &r) in free.iter().enumerate() {
                x[[r, c]] = sub_x[[fi, gi]];
            }
        }
    }
}

/// LU solve with a tiny ridge; SVD least squares when LU fails
fn solve_linear(a: &Array2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let (n, k) = (a.nrows(), b.ncols());
    let mut x = Array2::zeros((n, k));
    if n == 0 || k == 0 {
        return x;
    }

    let mut a_reg = a.clone();
    a_reg.diag_mut().mapv_inplace(|v| v + 1e-10);

    match a_reg.factorize() {
        Ok(lu) => {
            for (j, mut x_col) in x.axis_iter_mut(Axis(1)).enumerate() {
                let b_col = b.column(j).to_owned();
                match lu.solve(&b_col) {
                    Ok(sol) => x_col.assign(&sol),
                    Err(_) => x_col.assign(&least_squares_column(&a_reg, &b_col)),
                }
            }
        }
        Err(_) => {
            for (j, mut x_col) in x.axis_iter_mut(Axis(1)).enumerate() {
                let b_col = b.column(j).to_owned();
                x_col.assign(&least_squares_column(&a_reg, &b_col));
            }
        }
    }
    x
}

fn least_squares_column(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    match a.least_squares(b) {
        Ok(result) => result.solution,
        Err(_) => Array1::zeros(a.ncols()),
    }
}
