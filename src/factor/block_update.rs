use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut2, Axis, Zip};

use crate::config::NmfConfig;

use super::normalization::rebalance_rows;
use super::operator::{QuadraticOperator, VarianceTerm};
use super::regularizers::{
    combined_curvature, combined_gradient, combined_penalty, spatial_terms, temporal_terms,
    GradientTerm,
};
use super::update_rules::{clamp_nonnegative, nan_to_num};

const MAX_HALVINGS: usize = 40;

/// Reduction axis of the exact line search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSize {
    /// One step for the whole block
    Global,
    /// One step per column of the updated factor (per frame of T, per pixel of S)
    Pointwise,
}

/// Everything that differs between the spatial and the temporal update
pub struct BlockRole<'a> {
    pub name: &'static str,
    pub l1: f64,
    pub terms: Vec<Box<dyn GradientTerm>>,
    /// Put the updated factor's rows on the unit sphere first
    pub renormalize: bool,
    pub step: StepSize,
    pub variance: VarianceTerm,
    /// Restricts the columns of the fixed factor (rows of Y) that enter the fit
    pub active: Option<&'a [bool]>,
}

impl<'a> BlockRole<'a> {
    /// Role for updating T with S fixed
    pub fn temporal(config: &'a NmfConfig) -> Self {
        Self {
            name: "temporal",
            l1: config.weights.l1_temporal,
            terms: temporal_terms(&config.weights),
            renormalize: config.weights.corr > 0.0,
            step: step_size(config),
            variance: if config.use_std {
                VarianceTerm::Updated
            } else {
                VarianceTerm::Off
            },
            active: config.active_rows(),
        }
    }

    /// Role for updating S (as S^T) with T fixed. Every row of S is fitted,
    /// held-out rows included: they do not influence T.
    pub fn spatial(config: &'a NmfConfig) -> Self {
        Self {
            name: "spatial",
            l1: config.weights.l1_spatial,
            terms: spatial_terms(&config.weights, config.image_shape),
            renormalize: config.weights.has_orthogonality(),
            step: step_size(config),
            variance: if config.use_std {
                VarianceTerm::Fixed
            } else {
                VarianceTerm::Off
            },
            active: None,
        }
    }
}

fn step_size(config: &NmfConfig) -> StepSize {
    if config.pointwise {
        StepSize::Pointwise
    } else {
        StepSize::Global
    }
}

/// What one block update did
#[derive(Debug, Clone)]
pub struct BlockReport {
    /// Squared norm of the projected gradient
    pub projected_sq_norm: f64,
    /// Largest step size used (0.0 when nothing moved)
    pub max_step: f64,
    /// Times the exact step was halved before the objective stopped rising
    pub halvings: usize,
    /// False when a non-finite direction forced the update to be skipped
    pub applied: bool,
}

/// Entries free to move: F > 0, or the gradient points into the feasible region
pub fn project_gradient(f: &Array2<f64>, df: &Array2<f64>) -> Array2<f64> {
    let mut projected = df.clone();
    Zip::from(&mut projected).and(f).for_each(|d, &x| {
        if !(x > 0.0 || *d < 0.0) {
            *d = 0.0;
        }
    });
    projected
}

/// Closed-form minimizer of the quadratic along `direction`:
/// sum(d^2) / (sum(d .* apply(d)) + curvature of the quadratic penalties),
/// reduced per column when pointwise. Where the penalties make the
/// denominator non-positive the data curvature is used alone.
/// Ratios that are not finite become 0.0.
pub fn exact_step(
    op: &QuadraticOperator,
    terms: &[Box<dyn GradientTerm>],
    direction: &Array2<f64>,
    step: StepSize,
) -> Array1<f64> {
    let data_curvature = direction * &op.apply(direction);
    let penalty_curvature = combined_curvature(terms, direction);

    let reduce = |a: &Array2<f64>| match step {
        StepSize::Global => Array1::from_elem(1, a.sum()),
        StepSize::Pointwise => a.sum_axis(Axis(0)),
    };
    let numer = reduce(&direction.mapv(|v| v * v));
    let data_denom = reduce(&data_curvature);
    let denom = match &penalty_curvature {
        Some(extra) => &data_denom + &reduce(extra),
        None => data_denom.clone(),
    };

    let mut alpha = Array1::zeros(numer.len());
    Zip::from(&mut alpha)
        .and(&numer)
        .and(&denom)
        .and(&data_denom)
        .for_each(|a, &n, &d, &d_data| {
            let ratio = if d > 0.0 { n / d } else { n / d_data };
            *a = if ratio.is_finite() && ratio >= 0.0 { ratio } else { 0.0 };
        });
    alpha
}

/// 1/2 <F, apply(F)> - <cross, F> + l1 * sum(F) + penalties: the full
/// objective up to terms that do not depend on F
pub fn block_objective(op: &QuadraticOperator, role: &BlockRole, f: &Array2<f64>) -> f64 {
    0.5 * op.quadratic_form(f) - (op.cross() * f).sum()
        + role.l1 * f.sum()
        + combined_penalty(&role.terms, f)
}

fn take_step(f: &Array2<f64>, direction: &Array2<f64>, alpha: &Array1<f64>, step: StepSize) -> Array2<f64> {
    let mut next = f.clone();
    match step {
        StepSize::Global => {
            let a = alpha[0];
            if a != 0.0 {
                next.scaled_add(-a, direction);
            }
        }
        StepSize::Pointwise => {
            Zip::from(next.axis_iter_mut(Axis(1)))
                .and(direction.axis_iter(Axis(1)))
                .and(alpha)
                .for_each(|mut col, dir, &a| {
                    if a != 0.0 {
                        col.scaled_add(-a, &dir);
                    }
                });
        }
    }
    clamp_nonnegative(&mut next);
    next
}

/// Projected gradient step with exact line search on the updated factor.
///
/// `f` is R x K, `other` is R x L (components along axis 0 for both),
/// `data` is L x K. `other` is only touched by the renormalization, which
/// keeps other^T * f unchanged.
pub fn block_update(
    data: ArrayView2<f64>,
    f: &mut Array2<f64>,
    mut other: ArrayViewMut2<f64>,
    role: &BlockRole,
) -> BlockReport {
    nan_to_num(f);
    nan_to_num(&mut other);

    if role.renormalize {
        rebalance_rows(f.view_mut(), other.view_mut());
    }

    let op = QuadraticOperator::new(data, other.view(), role.active, role.variance);

    let mut df = op.apply(f) - op.cross();
    if role.l1 != 0.0 {
        df += role.l1;
    }
    if let Some(reg) = combined_gradient(&role.terms, f) {
        df += &reg;
    }

    let projected = project_gradient(f, &df);
    let projected_sq_norm = projected.mapv(|v| v * v).sum();

    if !projected_sq_norm.is_finite() {
        warn!(
            "{} update skipped: non-finite projected gradient",
            role.name
        );
        clamp_nonnegative(f);
        return BlockReport {
            projected_sq_norm,
            max_step: 0.0,
            halvings: 0,
            applied: false,
        };
    }

    let mut alpha = exact_step(&op, &role.terms, &projected, role.step);

    // The exact step ignores the clamp and any non-quadratic penalty, so the
    // clamped candidate is accepted only if the block objective does not rise.
    let current = block_objective(&op, role, f);
    let mut halvings = 0;
    if alpha.iter().any(|&a| a != 0.0) {
        loop {
            let candidate = take_step(f, &projected, &alpha, role.step);
            let value = block_objective(&op, role, &candidate);
            if !current.is_finite() || value <= current + 1e-12 * (1.0 + current.abs()) {
                *f = candidate;
                break;
            }
            if halvings == MAX_HALVINGS {
                debug!("{} update: no decrease along the projected gradient", role.name);
                alpha.fill(0.0);
                break;
            }
            alpha.mapv_inplace(|a| 0.5 * a);
            halvings += 1;
        }
    }
    clamp_nonnegative(f);
    let max_step = alpha.iter().cloned().fold(0.0, f64::max);

    debug!(
        "{} update: |proj grad|^2 = {:.3e}, step = {:.3e} after {} halvings",
        role.name, projected_sq_norm, max_step, halvings
    );

    BlockReport {
        projected_sq_norm,
        max_step,
        halvings,
        applied: true,
    }
}

/// Update T (R x M) with S (N x R) fixed
pub fn update_temporal(
    y: &Array2<f64>,
    s: &mut Array2<f64>,
    t: &mut Array2<f64>,
    role: &BlockRole,
) -> BlockReport {
    block_update(y.view(), t, s.view_mut().reversed_axes(), role)
}

/// Update S (N x R) with T (R x M) fixed
pub fn update_spatial(
    y: &Array2<f64>,
    s: &mut Array2<f64>,
    t: &mut Array2<f64>,
    role: &BlockRole,
) -> BlockReport {
    let mut f = s.t().to_owned();
    let report = block_update(y.t(), &mut f, t.view_mut(), role);
    s.assign(&f.t());
    report
}
