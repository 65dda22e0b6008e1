use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::config::RegularizerWeights;

/// A smooth penalty on the updated factor F (components along axis 0).
///
/// `gradient` must be the derivative of `penalty`, both already scaled by
/// the term's weight. Terms are only built for non-zero weights.
pub trait GradientTerm: Send + Sync {
    fn name(&self) -> &'static str;
    fn penalty(&self, f: &Array2<f64>) -> f64;
    fn gradient(&self, f: &Array2<f64>) -> Array2<f64>;

    /// Entrywise d .* H*d for terms whose gradient is linear in F (H the
    /// Hessian), so that summing gives the curvature along `d`.
    /// None for terms without a constant Hessian.
    fn curvature(&self, _direction: &Array2<f64>) -> Option<Array2<f64>> {
        None
    }
}

/// Sum the gradients of all terms; None when there are no terms
pub fn combined_gradient(terms: &[Box<dyn GradientTerm>], f: &Array2<f64>) -> Option<Array2<f64>> {
    terms
        .par_iter()
        .map(|term| term.gradient(f))
        .reduce_with(|a, b| a + b)
}

/// Entrywise curvature of the quadratic terms along `direction`
pub fn combined_curvature(terms: &[Box<dyn GradientTerm>], direction: &Array2<f64>) -> Option<Array2<f64>> {
    terms
        .iter()
        .filter_map(|term| term.curvature(direction))
        .reduce(|a, b| a + b)
}

pub fn combined_penalty(terms: &[Box<dyn GradientTerm>], f: &Array2<f64>) -> f64 {
    terms.iter().map(|term| term.penalty(f)).sum()
}

/// Terms acting on T
pub fn temporal_terms(weights: &RegularizerWeights) -> Vec<Box<dyn GradientTerm>> {
    let mut terms: Vec<Box<dyn GradientTerm>> = Vec::new();
    if weights.corr > 0.0 {
        terms.push(Box::new(CorrelationPenalty {
            weight: weights.corr,
        }));
    }
    if weights.tv_temporal > 0.0 {
        terms.push(Box::new(TotalVariation {
            weight: weights.tv_temporal,
            shape: SignalShape::Sequence,
        }));
    }
    terms
}

/// Terms acting on S^T (each row a spatial map)
pub fn spatial_terms(
    weights: &RegularizerWeights,
    image_shape: Option<(usize, usize)>,
) -> Vec<Box<dyn GradientTerm>> {
    let mut terms: Vec<Box<dyn GradientTerm>> = Vec::new();
    if weights.ortho_l1 > 0.0 {
        terms.push(Box::new(OrthogonalityL1 {
            weight: weights.ortho_l1,
        }));
    }
    if weights.ortho_l2 > 0.0 {
        terms.push(Box::new(OrthogonalityL2 {
            weight: weights.ortho_l2,
        }));
    }
    if weights.tv_spatial > 0.0 {
        if let Some((height, width)) = image_shape {
            terms.push(Box::new(TotalVariation {
                weight: weights.tv_spatial,
                shape: SignalShape::Image { height, width },
            }));
        }
    }
    terms
}

/// Penalty on corrcoef(F) - I, weight/4 * sum_{i != j} c_ij^2
pub struct CorrelationPenalty {
    pub weight: f64,
}

/// Center each row and scale it to unit norm, so that Z*Z^T is the
/// correlation matrix. Rows without spread get a zero row and a zero norm.
fn standardize_rows(f: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let k = f.ncols().max(1) as f64;
    let mut z = f.clone();
    let mut norms = Array1::zeros(f.nrows());

    for (i, mut row) in z.axis_iter_mut(Axis(0)).enumerate() {
        let scale = row.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let mean = row.sum() / k;
        row.mapv_inplace(|v| v - mean);
        let norm = row.mapv(|v| v * v).sum().sqrt();
        if norm.is_finite() && norm > 1e-12 * (1.0 + scale) {
            row.mapv_inplace(|v| v / norm);
            norms[i] = norm;
        } else {
            row.fill(0.0);
        }
    }
    (z, norms)
}

impl GradientTerm for CorrelationPenalty {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn penalty(&self, f: &Array2<f64>) -> f64 {
        let (z, _) = standardize_rows(f);
        let corr = z.dot(&z.t());
        let off_diag: f64 = corr
            .indexed_iter()
            .filter(|((i, j), _)| i != j)
            .map(|(_, &c)| c * c)
            .sum();
        0.25 * self.weight * off_diag
    }

    fn gradient(&self, f: &Array2<f64>) -> Array2<f64> {
        let (z, norms) = standardize_rows(f);
        let corr = z.dot(&z.t());
        // d/dZ of the penalty: Z*Z^T*Z - Z
        let gz = corr.dot(&z) - &z;

        let k = f.ncols().max(1) as f64;
        let mut grad = Array2::zeros(f.raw_dim());
        for (i, mut g_row) in grad.axis_iter_mut(Axis(0)).enumerate() {
            let norm = norms[i];
            if norm == 0.0 {
                continue;
            }
            let gz_row = gz.row(i);
            let z_row = z.row(i);
            // back through the unit-norm scaling, then through the centering
            let radial = gz_row.dot(&z_row);
            g_row.assign(&((&gz_row - &(&z_row * radial)) / norm));
            let mean = g_row.sum() / k;
            g_row.mapv_inplace(|v| self.weight * (v - mean));
        }
        grad
    }
}

/// Layout of each row of F when measuring smoothness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalShape {
    Sequence,
    /// Row-major image of `height * width` pixels
    Image { height: usize, width: usize },
}

/// Smoothness penalty on adjacent elements, weight/2 * sum (x_{k+1} - x_k)^2
pub struct TotalVariation {
    pub weight: f64,
    pub shape: SignalShape,
}

/// Convolve with [-1, 2, -1] after reflecting the second and second-to-last
/// values as padding, cropped back to the input length
pub fn second_difference(x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    if n < 2 {
        return Array1::zeros(n);
    }
    let mut padded = Array1::zeros(n + 2);
    padded[0] = x[1];
    padded.slice_mut(ndarray::s![1..=n]).assign(&x);
    padded[n + 1] = x[n - 2];

    padded
        .windows(3)
        .into_iter()
        .map(|w| -w[0] + 2.0 * w[1] - w[2])
        .collect()
}

fn squared_differences(x: ArrayView1<f64>) -> f64 {
    x.windows(2)
        .into_iter()
        .map(|w| (w[1] - w[0]) * (w[1] - w[0]))
        .sum()
}

fn second_difference_along(img: &Array2<f64>, axis: Axis) -> Array2<f64> {
    let mut out = Array2::zeros(img.raw_dim());
    for (src, mut dst) in img.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        dst.assign(&second_difference(src));
    }
    out
}

impl TotalVariation {
    fn as_image(&self, row: ArrayView1<f64>) -> Option<Array2<f64>> {
        match self.shape {
            SignalShape::Image { height, width } => {
                Array2::from_shape_vec((height, width), row.to_vec()).ok()
            }
            SignalShape::Sequence => None,
        }
    }
}

impl GradientTerm for TotalVariation {
    fn name(&self) -> &'static str {
        "total-variation"
    }

    fn penalty(&self, f: &Array2<f64>) -> f64 {
        let total: f64 = f
            .axis_iter(Axis(0))
            .map(|row| match self.shape {
                SignalShape::Sequence => squared_differences(row),
                SignalShape::Image { .. } => match self.as_image(row) {
                    Some(img) => {
                        let across: f64 = img.rows().into_iter().map(squared_differences).sum();
                        let down: f64 = img.columns().into_iter().map(squared_differences).sum();
                        across + down
                    }
                    None => 0.0,
                },
            })
            .sum();
        0.5 * self.weight * total
    }

    fn gradient(&self, f: &Array2<f64>) -> Array2<f64> {
        let mut grad = Array2::zeros(f.raw_dim());
        for (row, mut g_row) in f.axis_iter(Axis(0)).zip(grad.axis_iter_mut(Axis(0))) {
            match self.shape {
                SignalShape::Sequence => g_row.assign(&second_difference(row)),
                SignalShape::Image { .. } => {
                    if let Some(img) = self.as_image(row) {
                        let lap = second_difference_along(&img, Axis(1))
                            + second_difference_along(&img, Axis(0));
                        g_row
                            .iter_mut()
                            .zip(lap.iter())
                            .for_each(|(g, &v)| *g = v);
                    }
                }
            }
        }
        grad.mapv_inplace(|v| self.weight * v);
        grad
    }

    fn curvature(&self, direction: &Array2<f64>) -> Option<Array2<f64>> {
        Some(direction * &self.gradient(direction))
    }
}

/// Off-diagonal mask that leaves component 0 (background) unpenalized
pub fn background_mask(r: usize) -> Array2<f64> {
    Array2::from_shape_fn((r, r), |(i, j)| {
        if i != j && i > 0 && j > 0 {
            1.0
        } else {
            0.0
        }
    })
}

/// weight/2 * sum(W .* F*F^T); overlap of non-negative maps
pub struct OrthogonalityL1 {
    pub weight: f64,
}

impl GradientTerm for OrthogonalityL1 {
    fn name(&self) -> &'static str {
        "orthogonality-l1"
    }

    fn penalty(&self, f: &Array2<f64>) -> f64 {
        let mask = background_mask(f.nrows());
        0.5 * self.weight * (&mask * &f.dot(&f.t())).sum()
    }

    fn gradient(&self, f: &Array2<f64>) -> Array2<f64> {
        background_mask(f.nrows()).dot(f) * self.weight
    }

    fn curvature(&self, direction: &Array2<f64>) -> Option<Array2<f64>> {
        Some(direction * &self.gradient(direction))
    }
}

/// weight/4 * sum((W .* F*F^T)^2)
pub struct OrthogonalityL2 {
    pub weight: f64,
}

impl GradientTerm for OrthogonalityL2 {
    fn name(&self) -> &'static str {
        "orthogonality-l2"
    }

    fn penalty(&self, f: &Array2<f64>) -> f64 {
        let masked = background_mask(f.nrows()) * f.dot(&f.t());
        0.25 * self.weight * masked.mapv(|v| v * v).sum()
    }

    fn gradient(&self, f: &Array2<f64>) -> Array2<f64> {
        let masked = background_mask(f.nrows()) * f.dot(&f.t());
        masked.dot(f) * self.weight
    }
}
