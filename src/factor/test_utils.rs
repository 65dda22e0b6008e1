/// Shared test fixtures for the factorization core
use ndarray::Array2;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

/// Exactly low-rank non-negative data Y = S * T with random factors.
/// Returns (Y, S, T) with Y: n x m, S: n x r, T: r x m.
pub fn make_low_rank(n: usize, m: usize, r: usize, seed: u64) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let s = Array2::random_using((n, r), Uniform::new(0.0, 1.0), &mut rng);
    let t = Array2::random_using((r, m), Uniform::new(0.0, 1.0), &mut rng);
    (s.dot(&t), s, t)
}

/// Strictly positive starting factors
pub fn seeded_factors(n: usize, m: usize, r: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let s = Array2::random_using((n, r), Uniform::new(0.1, 1.0), &mut rng);
    let t = Array2::random_using((r, m), Uniform::new(0.1, 1.0), &mut rng);
    (s, t)
}

/// 4 x 4 block matrix of rank 2: rows 0-1 load on cols 0-1, rows 2-3 on cols 2-3.
/// The blocks differ in magnitude so the leading singular vectors are unique.
pub fn make_block_identity() -> Array2<f64> {
    let mut y = Array2::zeros((4, 4));
    for i in 0..2 {
        for j in 0..2 {
            y[[i, j]] = 1.0;
            y[[i + 2, j + 2]] = 0.6;
        }
    }
    y
}

/// Step signal of length `m`: 0.2 on the first half, 1.0 on the second
pub fn make_step_signal(m: usize) -> Array2<f64> {
    Array2::from_shape_fn((1, m), |(_, j)| if j < m / 2 { 0.2 } else { 1.0 })
}
