use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::collab::init::initializer_for;
use crate::config::{CrossValidationConfig, NmfConfig};
use crate::factor::driver::Factorizer;

/// Tunes the configuration before the main run. Factors are never touched.
pub trait CrossValidator: Send + Sync {
    fn tune(&self, y: &Array2<f64>, config: &NmfConfig) -> NmfConfig;
}

/// k-fold row hold-out grid search over one regularizer weight.
///
/// For every candidate and fold, the held-out rows are excluded from the fit
/// of T (through the active-row mask), their spatial loadings are still fitted
/// against that T, and the score is the mean squared error on the held-out rows.
/// Each fold starts from a temporal seed computed on its training rows only.
#[derive(Debug, Clone, Default)]
pub struct HoldoutCrossValidator;

impl CrossValidator for HoldoutCrossValidator {
    fn tune(&self, y: &Array2<f64>, config: &NmfConfig) -> NmfConfig {
        let cv = match &config.cross_validation {
            Some(cv) => cv,
            None => return config.clone(),
        };
        let folds = assign_folds(y.nrows(), cv.folds, cv.seed.or(config.seed));
        let seeds: Vec<Array2<f64>> = (0..cv.folds)
            .map(|fold| seed_from_training_rows(y, config, &folds, fold))
            .collect();

        let scores: Vec<(f64, f64)> = cv
            .candidates
            .par_iter()
            .map(|&candidate| (candidate, score_candidate(y, config, cv, &folds, &seeds, candidate)))
            .collect();

        for (candidate, score) in &scores {
            debug!("{:?} = {:.3e}: held-out error {:.6e}", cv.weight, candidate, score);
        }

        let best = scores
            .iter()
            .filter(|(_, score)| score.is_finite())
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut tuned = config.clone();
        match best {
            Some(&(candidate, score)) => {
                info!(
                    "Cross-validation picked {:?} = {:.3e} (held-out error {:.6e})",
                    cv.weight, candidate, score
                );
                tuned.weights.set(cv.weight, candidate);
            }
            None => warn!("Cross-validation found no finite score, keeping configured weights"),
        }
        tuned
    }
}

/// Fold index for every row, balanced and shuffled
pub fn assign_folds(n_rows: usize, n_folds: usize, seed: Option<u64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n_rows).collect();
    let mut rng = StdRng::seed_from_u64(seed.unwrap_or(42));
    order.shuffle(&mut rng);

    let mut folds = vec![0; n_rows];
    for (position, &row) in order.iter().enumerate() {
        folds[row] = position % n_folds.max(1);
    }
    folds
}

/// Temporal seed computed from the rows outside `fold` only, so the
/// held-out rows never shape the starting point of their own evaluation
pub fn seed_from_training_rows(
    y: &Array2<f64>,
    config: &NmfConfig,
    folds: &[usize],
    fold: usize,
) -> Array2<f64> {
    let train: Vec<usize> = (0..folds.len()).filter(|&i| folds[i] != fold).collect();
    let (t, _) = initializer_for(config.init).initialize(&y.select(Axis(0), &train), config.rank, config);
    t
}

fn score_candidate(
    y: &Array2<f64>,
    config: &NmfConfig,
    cv: &CrossValidationConfig,
    folds: &[usize],
    seeds: &[Array2<f64>],
    candidate: f64,
) -> f64 {
    let mut total = 0.0;
    for fold in 0..cv.folds {
        let held_out: Vec<usize> = (0..folds.len()).filter(|&i| folds[i] == fold).collect();
        if held_out.is_empty() {
            continue;
        }

        let mut trial = config.clone();
        trial.weights.set(cv.weight, candidate);
        trial.max_iter = cv.max_iter;
        trial.cross_validation = None;
        trial.display = false;
        trial.track_objective = false;
        trial.active_rows = Some(
            folds
                .iter()
                .enumerate()
                .map(|(i, &f)| f != fold && config.active_rows().map_or(true, |mask| mask[i]))
                .collect(),
        );

        // S, held-out rows included, is solved against the training-row seed
        let fit = match Factorizer::new(trial).factorize(y, Some(seeds[fold].clone()), None) {
            Ok(fit) => fit,
            Err(e) => {
                warn!("Cross-validation fit failed: {}", e);
                return f64::INFINITY;
            }
        };

        let approx = fit.reconstruct();
        let residual = y.select(Axis(0), &held_out) - approx.select(Axis(0), &held_out);
        total += residual.mapv(|v| v * v).sum() / residual.len().max(1) as f64;
    }
    total / cv.folds as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightKind;
    use crate::factor::test_utils::make_low_rank;

    #[test]
    fn test_assign_folds_balanced_and_deterministic() {
        let folds = assign_folds(10, 3, Some(1));
        assert_eq!(folds.len(), 10);
        let counts: Vec<usize> = (0..3).map(|f| folds.iter().filter(|&&x| x == f).count()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 10);
        assert!(counts.iter().all(|&c| c == 3 || c == 4));
        assert_eq!(folds, assign_folds(10, 3, Some(1)));
    }

    #[test]
    fn test_seed_ignores_held_out_rows() {
        let (mut y, _, _) = make_low_rank(9, 12, 2, 6);
        let config = NmfConfig::with_rank(2);
        let folds = assign_folds(9, 3, Some(5));
        let seed = seed_from_training_rows(&y, &config, &folds, 0);
        assert_eq!(seed.dim(), (2, 12));

        // whatever the held-out rows contain, the seed stays the same
        for i in (0..9).filter(|&i| folds[i] == 0) {
            y.row_mut(i).fill(100.0);
        }
        assert_eq!(seed_from_training_rows(&y, &config, &folds, 0), seed);
    }

    #[test]
    fn test_tune_without_cross_validation_is_identity() {
        let (y, _, _) = make_low_rank(6, 8, 2, 2);
        let config = NmfConfig::with_rank(2);
        let tuned = HoldoutCrossValidator.tune(&y, &config);
        assert_eq!(tuned.weights, config.weights);
    }

    #[test]
    fn test_tune_picks_one_of_the_candidates() {
        let (y, _, _) = make_low_rank(12, 15, 2, 4);
        let mut config = NmfConfig::with_rank(2);
        let mut cv = CrossValidationConfig::new(WeightKind::L1Temporal, vec![0.0, 5.0]);
        cv.max_iter = 30;
        cv.seed = Some(3);
        config.cross_validation = Some(cv);

        let tuned = HoldoutCrossValidator.tune(&y, &config);
        // a huge L1 weight wipes out T, so the unregularized fit must win
        assert_eq!(tuned.weights.l1_temporal, 0.0);
        assert!(tuned.cross_validation.is_some());
    }
}
