use log::{info, warn};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::config::{InitMethod, NmfConfig};
use crate::factor::update_rules::clamp_nonnegative;

/// Seeds the first factor guess; returns (T, S) with T: R x M, S: N x R
pub trait Initializer: Send + Sync {
    fn initialize(&self, y: &Array2<f64>, rank: usize, config: &NmfConfig) -> (Array2<f64>, Array2<f64>);
}

pub fn initializer_for(method: InitMethod) -> Box<dyn Initializer> {
    match method {
        InitMethod::Pca => Box::new(PcaInitializer),
        InitMethod::Rand => Box::new(RandomTraceInitializer::default()),
    }
}

/// Copy an ndarray view into a nalgebra matrix
pub fn to_dmatrix(view: ArrayView2<f64>) -> DMatrix<f64> {
    let (rows, cols) = view.dim();
    DMatrix::from_row_iterator(rows, cols, view.iter().cloned())
}

/// Absolute values of the leading singular vectors, each pair balanced by sqrt(sigma)
pub struct PcaInitializer;

impl Initializer for PcaInitializer {
    fn initialize(&self, y: &Array2<f64>, rank: usize, config: &NmfConfig) -> (Array2<f64>, Array2<f64>) {
        let (n, m) = y.dim();
        let svd = to_dmatrix(y.view()).svd(true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => {
                warn!("SVD did not return singular vectors, falling back to random seeding");
                return RandomTraceInitializer::default().initialize(y, rank, config);
            }
        };

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut t = Array2::zeros((rank, m));
        let mut s = Array2::zeros((n, rank));
        for (r, &idx) in order.iter().take(rank).enumerate() {
            let weight = svd.singular_values[idx].max(0.0).sqrt();
            if weight < 1e-12 {
                // no energy left in this direction; a flat start keeps it movable
                t.row_mut(r).fill(1e-3);
                s.column_mut(r).fill(1e-3);
                continue;
            }
            for j in 0..m {
                t[[r, j]] = v_t[(idx, j)].abs() * weight;
            }
            for i in 0..n {
                s[[i, r]] = u[(i, idx)].abs() * weight;
            }
        }

        info!("PCA seeding with {} components", rank);
        (t, s)
    }
}

/// Uniform random traces smoothed by a centered moving average; S is the
/// non-negative part of Y*T^T scaled by each trace's squared norm.
#[derive(Debug, Clone, Default)]
pub struct RandomTraceInitializer {
    /// Moving-average width; defaults to a tenth of the trace length
    pub window: Option<usize>,
}

/// Centered moving average, truncated at the edges
pub fn moving_average(x: &Array1<f64>, window: usize) -> Array1<f64> {
    let n = x.len();
    let half = window / 2;
    Array1::from_shape_fn(n, |i| {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        x.slice(ndarray::s![lo..hi]).mean().unwrap_or(0.0)
    })
}

impl Initializer for RandomTraceInitializer {
    fn initialize(&self, y: &Array2<f64>, rank: usize, config: &NmfConfig) -> (Array2<f64>, Array2<f64>) {
        let m = y.ncols();
        let window = self.window.unwrap_or(m / 10).max(1);
        let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or(42));

        let raw = Array2::random_using((rank, m), Uniform::new(0.0, 1.0), &mut rng);
        let mut t = Array2::zeros((rank, m));
        for (src, mut dst) in raw.axis_iter(Axis(0)).zip(t.axis_iter_mut(Axis(0))) {
            dst.assign(&moving_average(&src.to_owned(), window));
        }

        let mut s = y.dot(&t.t());
        for (r, mut col) in s.axis_iter_mut(Axis(1)).enumerate() {
            let sq = t.row(r).mapv(|v| v * v).sum();
            if sq > 1e-30 {
                col.mapv_inplace(|v| v / sq);
            }
        }
        clamp_nonnegative(&mut s);

        info!("Random smoothed-trace seeding with window {}", window);
        (t, s)
    }
}
