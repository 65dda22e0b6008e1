use ndarray::{Array1, Array2, ArrayViewMut2, Axis, Zip};
use statrs::statistics::Statistics;

use super::update_rules::nan_to_num;

/// How the data matrix was scaled before fitting
#[derive(Debug, Clone, PartialEq)]
pub enum DataScaling {
    /// Y / ||Y||_F
    Global { norm: f64 },
    /// Each row divided by its population std, then centered.
    /// `mean` holds the row means of the scaled (uncentered) data.
    PerRow { std: Array1<f64>, mean: Array1<f64> },
}

/// Data matrix as seen by the optimizer, together with the scaling that produced it
#[derive(Debug, Clone)]
pub struct NormalizedData {
    pub data: Array2<f64>,
    pub scaling: DataScaling,
}

impl NormalizedData {
    /// Map a matrix in normalized units back to the caller's units.
    /// For per-row scaling the row mean is added back before un-scaling.
    pub fn denormalize(scaling: &DataScaling, approx: &Array2<f64>) -> Array2<f64> {
        match scaling {
            DataScaling::Global { norm } => approx * *norm,
            DataScaling::PerRow { std, mean } => {
                let mut out = approx.clone();
                for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
                    let (sd, mu) = (std[i], mean[i]);
                    row.mapv_inplace(|v| (v + mu) * sd);
                }
                out
            }
        }
    }
}

/// Normalize Y once before the iterations start.
///
/// Global: divide by the Frobenius norm (an all-zero matrix is left as is).
/// Per-row (`use_std`): divide every row by its population standard
/// deviation, keep the row mean, and center. Constant rows keep a scale of 1.
pub fn normalize_data(y: &Array2<f64>, use_std: bool) -> NormalizedData {
    if !use_std {
        let norm = y.mapv(|v| v * v).sum().sqrt();
        let norm = if norm > 1e-30 { norm } else { 1.0 };
        let mut data = y / norm;
        nan_to_num(&mut data);
        return NormalizedData {
            data,
            scaling: DataScaling::Global { norm },
        };
    }

    let n = y.nrows();
    let mut std = Array1::ones(n);
    let mut mean = Array1::zeros(n);
    let mut data = y.clone();

    for (i, mut row) in data.axis_iter_mut(Axis(0)).enumerate() {
        let sd = row.iter().population_std_dev();
        if sd.is_finite() && sd > 1e-30 {
            std[i] = sd;
            row.mapv_inplace(|v| v / sd);
        }
        let mu = row.iter().mean();
        mean[i] = if mu.is_finite() { mu } else { 0.0 };
        let mu = mean[i];
        row.mapv_inplace(|v| v - mu);
    }
    nan_to_num(&mut data);

    NormalizedData {
        data,
        scaling: DataScaling::PerRow { std, mean },
    }
}

/// Rescale each row of `f` to unit norm and multiply the matching row of
/// `partner` by the removed norm, so that partner^T * f is unchanged.
///
/// Both views hold components along axis 0. Zero rows are left untouched.
/// Returns the norms that were removed.
pub fn rebalance_rows(mut f: ArrayViewMut2<f64>, mut partner: ArrayViewMut2<f64>) -> Array1<f64> {
    let norms: Array1<f64> = f
        .axis_iter(Axis(0))
        .map(|row| row.mapv(|v| v * v).sum().sqrt())
        .collect();

    Zip::from(f.axis_iter_mut(Axis(0)))
        .and(partner.axis_iter_mut(Axis(0)))
        .and(&norms)
        .for_each(|mut f_row, mut p_row, &norm| {
            if norm > 1e-30 && norm.is_finite() {
                f_row.mapv_inplace(|v| v / norm);
                p_row.mapv_inplace(|v| v * norm);
            }
        });

    norms
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_global_normalization_unit_norm() {
        let y = array![[3.0, 0.0], [0.0, 4.0]];
        let nd = normalize_data(&y, false);
        let norm = nd.data.mapv(|v| v * v).sum().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
        assert_eq!(nd.scaling, DataScaling::Global { norm: 5.0 });
        let back = NormalizedData::denormalize(&nd.scaling, &nd.data);
        assert!((&back - &y).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_per_row_normalization() {
        let y = array![[1.0, 3.0, 5.0], [2.0, 2.0, 2.0]];
        let nd = normalize_data(&y, true);
        // first row: centered, unit population std
        let row = nd.data.row(0);
        assert!(row.sum().abs() < 1e-12);
        let var = row.mapv(|v| v * v).sum() / 3.0;
        assert!((var - 1.0).abs() < 1e-12);
        // constant row: scale stays 1, centered to zero
        assert!(nd.data.row(1).iter().all(|v| v.abs() < 1e-12));
        let back = NormalizedData::denormalize(&nd.scaling, &nd.data);
        assert!((&back - &y).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_rebalance_preserves_product() {
        let mut s = array![[1.0, 2.0], [0.5, 0.0], [3.0, 1.0]];
        let mut t = array![[2.0, 0.0, 1.0, 4.0], [0.0, 3.0, 3.0, 1.0]];
        let before = s.dot(&t);

        rebalance_rows(t.view_mut(), s.view_mut().reversed_axes());

        let after = s.dot(&t);
        assert!((&after - &before).iter().all(|v| v.abs() < 1e-12));
        for row in t.axis_iter(Axis(0)) {
            assert!((row.mapv(|v| v * v).sum().sqrt() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rebalance_round_trip_arbitrary_scale() {
        let s = array![[1.0_f64, 2.0], [0.5, 0.25]];
        let t = array![[2.0_f64, 1.0], [1.0, 3.0]];
        let before = s.dot(&t);
        for &k in &[1e-3, 0.5, 7.0, -2.0] {
            let (mut s2, mut t2) = (s.clone(), t.clone());
            t2.row_mut(1).mapv_inplace(|v| v * k);
            s2.column_mut(1).mapv_inplace(|v| v / k);
            let after = s2.dot(&t2);
            assert!((&after - &before).iter().all(|v| v.abs() < 1e-9));
        }
    }

    #[test]
    fn test_rebalance_skips_zero_rows() {
        let mut f = array![[0.0, 0.0], [3.0, 4.0]];
        let mut p = array![[1.0], [1.0]];
        let norms = rebalance_rows(f.view_mut(), p.view_mut());
        assert_eq!(norms, array![0.0, 5.0]);
        assert_eq!(f.row(0), array![0.0, 0.0]);
        assert_eq!(p, array![[1.0], [5.0]]);
    }
}
