use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Where the variance-normalized objective puts its temporal centering term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceTerm {
    /// Plain least squares
    Off,
    /// The updated factor runs along time: apply(X) = G*X - (G*rowsum(X))/M
    Updated,
    /// The fixed factor runs along time: G = T*P*T^T with P = I - 11^T/M
    Fixed,
}

/// Second-order term of the block least-squares objective.
///
/// Both factors are laid out with components along axis 0: the updated
/// factor F is R x K, the fixed factor is R x L, and the data seen by the
/// block is L x K. Then
///   gram  = other * other^T      (R x R, active L-indices only)
///   cross = other * data         (R x K, active L-indices only)
/// and the block objective is 1/2 <F, apply(F)> - <cross, F>.
#[derive(Debug, Clone)]
pub struct QuadraticOperator {
    gram: Array2<f64>,
    cross: Array2<f64>,
    variance: VarianceTerm,
}

impl QuadraticOperator {
    pub fn new(
        data: ArrayView2<f64>,
        other: ArrayView2<f64>,
        active: Option<&[bool]>,
        variance: VarianceTerm,
    ) -> Self {
        let selected;
        let (other, data) = match active {
            Some(mask) => {
                let idx: Vec<usize> = mask
                    .iter()
                    .enumerate()
                    .filter(|(_, &keep)| keep)
                    .map(|(i, _)| i)
                    .collect();
                selected = (other.select(Axis(1), &idx), data.select(Axis(0), &idx));
                (selected.0.view(), selected.1.view())
            }
            None => (other.view(), data.view()),
        };

        let gram = other.dot(&other.t());
        let cross = other.dot(&data);
        let gram = match variance {
            VarianceTerm::Fixed => {
                let l = other.ncols().max(1) as f64;
                let sums: Array1<f64> = other.sum_axis(Axis(1));
                let mean_term = outer(&sums, &sums) / l;
                gram - &mean_term
            }
            _ => gram,
        };

        Self {
            gram,
            cross,
            variance,
        }
    }

    /// apply(X) = G*X, minus the column-mean term when the updated factor runs along time
    pub fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        let gx = self.gram.dot(x);
        match self.variance {
            VarianceTerm::Updated => {
                let m = x.ncols().max(1) as f64;
                let correction = self.gram.dot(&x.sum_axis(Axis(1))) / m;
                gx - &correction.insert_axis(Axis(1))
            }
            _ => gx,
        }
    }

    pub fn gram(&self) -> &Array2<f64> {
        &self.gram
    }

    pub fn cross(&self) -> &Array2<f64> {
        &self.cross
    }

    /// <X, apply(X)>, the curvature of the block objective along X
    pub fn quadratic_form(&self, x: &Array2<f64>) -> f64 {
        (x * &self.apply(x)).sum()
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_apply_plain_is_gram_product() {
        // S: 3 x 2  -> other = S^T
        let s = array![[1.0, 0.0], [2.0, 1.0], [0.0, 3.0]];
        let y = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let op = QuadraticOperator::new(y.view(), s.t(), None, VarianceTerm::Off);
        assert_eq!(op.gram(), &s.t().dot(&s));
        assert_eq!(op.cross(), &s.t().dot(&y));
        let x = array![[1.0, 0.5], [0.0, 2.0]];
        assert_eq!(op.apply(&x), s.t().dot(&s).dot(&x));
        // <X, S^T S X> = ||S X||^2
        let sx = s.dot(&x);
        assert!((op.quadratic_form(&x) - sx.mapv(|v| v * v).sum()).abs() < 1e-12);
    }

    #[test]
    fn test_active_rows_restrict_gram_and_cross() {
        let s = array![[1.0, 0.0], [2.0, 1.0], [0.0, 3.0]];
        let y = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mask = [true, false, true];
        let op = QuadraticOperator::new(y.view(), s.t(), Some(&mask), VarianceTerm::Off);

        let s_a = array![[1.0, 0.0], [0.0, 3.0]];
        let y_a = array![[1.0, 2.0], [5.0, 6.0]];
        assert_eq!(op.gram(), &s_a.t().dot(&s_a));
        assert_eq!(op.cross(), &s_a.t().dot(&y_a));
    }

    #[test]
    fn test_empty_active_set_gives_zero_operator() {
        let s = array![[1.0, 0.0], [2.0, 1.0]];
        let y = array![[1.0, 2.0], [3.0, 4.0]];
        let mask = [false, false];
        let op = QuadraticOperator::new(y.view(), s.t(), Some(&mask), VarianceTerm::Off);
        assert!(op.gram().iter().all(|&v| v == 0.0));
        assert!(op.cross().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_updated_variance_term_matches_centering_projector() {
        // apply(X) must equal G * X * P with P = I - 11^T/M
        let s = array![[1.0, 0.5], [0.2, 1.0], [0.3, 0.3]];
        let y = Array2::zeros((3, 4));
        let op = QuadraticOperator::new(y.view(), s.t(), None, VarianceTerm::Updated);
        let x = array![[1.0, 2.0, 0.0, 3.0], [0.5, 0.0, 1.0, 1.0]];
        let p = Array2::<f64>::eye(4) - Array2::from_elem((4, 4), 0.25);
        let expected = s.t().dot(&s).dot(&x).dot(&p);
        assert!((&op.apply(&x) - &expected).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_fixed_variance_term_centers_gram() {
        // other = T (R x M); gram must be T * P * T^T
        let t = array![[1.0, 2.0, 0.0, 3.0], [0.5, 0.0, 1.0, 1.0]];
        let y_t = Array2::zeros((4, 3));
        let op = QuadraticOperator::new(y_t.view(), t.view(), None, VarianceTerm::Fixed);
        let p = Array2::<f64>::eye(4) - Array2::from_elem((4, 4), 0.25);
        let expected = t.dot(&p).dot(&t.t());
        assert!((op.gram() - &expected).iter().all(|v| v.abs() < 1e-12));
    }
}
