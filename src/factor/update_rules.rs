use ndarray::{Array2, ArrayBase, DataMut, Dimension};

/// Replace NaN and Inf with 0.0 in-place
pub fn nan_to_num<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    a.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
}

/// Project back onto the feasible set: negative entries become exactly 0.0
pub fn clamp_nonnegative<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    a.mapv_inplace(|v| if v < 0.0 { 0.0 } else { v });
}

/// Frobenius norm squared: ||Y - S*T||_F^2
pub fn reconstruction_error(y: &Array2<f64>, s: &Array2<f64>, t: &Array2<f64>) -> f64 {
    let approx = s.dot(t);
    let diff = y - &approx;
    diff.mapv(|v| v * v).sum()
}

/// Number of entries that are negative or not finite
pub fn count_infeasible(a: &Array2<f64>) -> usize {
    a.iter().filter(|&&v| !(v >= 0.0) || !v.is_finite()).count()
}
