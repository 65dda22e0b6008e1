use log::{debug, info, warn};
use ndarray::{Array2, Axis};

use crate::collab::{
    initializer_for, BlockPivotSolver, ConstrainedSolver, CrossValidator, HoldoutCrossValidator,
    Initializer, LoggingObserver, Observer,
};
use crate::config::{check_finite, ConfigError, NmfConfig};

use super::block_update::{update_spatial, update_temporal, BlockRole};
use super::normalization::{normalize_data, rebalance_rows, DataScaling, NormalizedData};
use super::regularizers::combined_penalty;
use super::update_rules::{clamp_nonnegative, count_infeasible, nan_to_num};

/// Result of a run: Y ≈ S * T in normalized units
#[derive(Debug, Clone)]
pub struct Factorization {
    /// N x R, columns are spatial components
    pub s: Array2<f64>,
    /// R x M, unit-norm rows
    pub t: Array2<f64>,
    pub scaling: DataScaling,
    /// Configuration actually used (after tuning)
    pub config: NmfConfig,
    /// Objective after every iteration, when tracking was requested
    pub objective_trace: Vec<f64>,
    pub iterations: usize,
}

impl Factorization {
    /// S * T mapped back to the units of the data that was factorized
    pub fn reconstruct(&self) -> Array2<f64> {
        let approx = model(&self.s, &self.t, self.config.use_std);
        NormalizedData::denormalize(&self.scaling, &approx)
    }

    /// ||Y - reconstruct()||_F / ||Y||_F
    pub fn relative_error(&self, y: &Array2<f64>) -> f64 {
        let diff = y - &self.reconstruct();
        let err = diff.mapv(|v| v * v).sum().sqrt();
        let y_norm = y.mapv(|v| v * v).sum().sqrt();
        if y_norm > 0.0 {
            err / y_norm
        } else {
            err
        }
    }
}

/// S * T, centered in time for the variance-normalized objective
fn model(s: &Array2<f64>, t: &Array2<f64>, use_std: bool) -> Array2<f64> {
    let mut approx = s.dot(t);
    if use_std {
        for mut row in approx.axis_iter_mut(Axis(0)) {
            let mean = row.mean().unwrap_or(0.0);
            row.mapv_inplace(|v| v - mean);
        }
    }
    approx
}

/// 1/2 ||(Y - S*T)_active||^2 plus every active penalty
pub fn objective(
    data: &Array2<f64>,
    s: &Array2<f64>,
    t: &Array2<f64>,
    config: &NmfConfig,
    spatial: &BlockRole,
    temporal: &BlockRole,
) -> f64 {
    let residual = data - &model(s, t, config.use_std);
    let fit: f64 = residual
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(i, _)| config.active_rows().map_or(true, |mask| mask[*i]))
        .map(|(_, row)| row.mapv(|v| v * v).sum())
        .sum();

    let s_t = s.t().to_owned();
    0.5 * fit
        + spatial.l1 * s.sum()
        + temporal.l1 * t.sum()
        + combined_penalty(&spatial.terms, &s_t)
        + combined_penalty(&temporal.terms, t)
}

/// State handed from the Initializing phase to the iterations
struct Initialized {
    data: Array2<f64>,
    scaling: DataScaling,
    s: Array2<f64>,
    t: Array2<f64>,
    config: NmfConfig,
}

/// Alternating projected-gradient NMF with pluggable collaborators
pub struct Factorizer {
    config: NmfConfig,
    initializer: Box<dyn Initializer>,
    solver: Box<dyn ConstrainedSolver>,
    tuner: Box<dyn CrossValidator>,
    observers: Vec<Box<dyn Observer>>,
}

impl Factorizer {
    pub fn new(config: NmfConfig) -> Self {
        let mut observers: Vec<Box<dyn Observer>> = Vec::new();
        if config.display {
            observers.push(Box::new(LoggingObserver::new(1)));
        }
        Self {
            initializer: initializer_for(config.init),
            solver: Box::new(BlockPivotSolver::default()),
            tuner: Box::new(HoldoutCrossValidator),
            observers,
            config,
        }
    }

    pub fn with_initializer(mut self, initializer: Box<dyn Initializer>) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn with_solver(mut self, solver: Box<dyn ConstrainedSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_cross_validator(mut self, tuner: Box<dyn CrossValidator>) -> Self {
        self.tuner = tuner;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &NmfConfig {
        &self.config
    }

    /// Factorize Y (N x M) into S (N x R) and T (R x M).
    ///
    /// Supplied initial factors are taken as given; when only one is
    /// supplied the other comes from the constrained solver.
    pub fn factorize(
        &mut self,
        y: &Array2<f64>,
        t_init: Option<Array2<f64>>,
        s_init: Option<Array2<f64>>,
    ) -> Result<Factorization, ConfigError> {
        let Initialized {
            data,
            scaling,
            mut s,
            mut t,
            config,
        } = self.initialize(y, t_init, s_init)?;

        let objective_trace = self.iterate(&data, &mut s, &mut t, &config);

        // unit-norm temporal components, compensated in S
        rebalance_rows(t.view_mut(), s.view_mut().reversed_axes());
        info!("Factorization finished after {} iterations", config.max_iter);

        Ok(Factorization {
            s,
            t,
            scaling,
            iterations: config.max_iter,
            config,
            objective_trace,
        })
    }

    /// Validate, normalize, seed and tune; nothing is iterated yet
    fn initialize(
        &mut self,
        y: &Array2<f64>,
        t_init: Option<Array2<f64>>,
        s_init: Option<Array2<f64>>,
    ) -> Result<Initialized, ConfigError> {
        let (n, m) = y.dim();
        self.config.validate(n, m)?;
        check_finite(y)?;
        check_initial_shapes(n, m, self.config.rank, t_init.as_ref(), s_init.as_ref())?;

        info!(
            "Factorizing {}x{} data at rank {} ({} iterations)",
            n, m, self.config.rank, self.config.max_iter
        );
        let NormalizedData { data, scaling } = normalize_data(y, self.config.use_std);

        let (mut s, mut t) = self.initial_factors(&data, t_init, s_init);
        let infeasible = count_infeasible(&s) + count_infeasible(&t);
        if infeasible > 0 {
            debug!("Zeroing {} infeasible entries of the initial factors", infeasible);
        }
        nan_to_num(&mut s);
        nan_to_num(&mut t);
        clamp_nonnegative(&mut s);
        clamp_nonnegative(&mut t);

        let config = if self.config.cross_validation.is_some() {
            let tuned = self.tuner.tune(&data, &self.config);
            tuned.validate(n, m)?;
            tuned
        } else {
            self.config.clone()
        };

        if config.weights.has_orthogonality() {
            // unit-norm spatial components, compensated in T
            rebalance_rows(s.view_mut().reversed_axes(), t.view_mut());
        }

        Ok(Initialized {
            data,
            scaling,
            s,
            t,
            config,
        })
    }

    fn initial_factors(
        &self,
        data: &Array2<f64>,
        t_init: Option<Array2<f64>>,
        s_init: Option<Array2<f64>>,
    ) -> (Array2<f64>, Array2<f64>) {
        match (t_init, s_init) {
            (Some(t), Some(s)) => {
                info!("Using caller-supplied S and T");
                (s, t)
            }
            (Some(t), None) => {
                info!("Deriving S from the supplied T by non-negative least squares");
                let s_t = self
                    .solver
                    .solve(&t.t().to_owned(), &data.t().to_owned(), &self.config);
                (s_t.reversed_axes(), t)
            }
            (None, Some(s)) => {
                info!("Deriving T from the supplied S by non-negative least squares");
                let t = self.solver.solve(&s, data, &self.config);
                (s, t)
            }
            (None, None) => {
                let (t, s) = self
                    .initializer
                    .initialize(data, self.config.rank, &self.config);
                (s, t)
            }
        }
    }

    /// S-update then T-update, `max_iter` times
    fn iterate(
        &mut self,
        data: &Array2<f64>,
        s: &mut Array2<f64>,
        t: &mut Array2<f64>,
        config: &NmfConfig,
    ) -> Vec<f64> {
        let spatial = BlockRole::spatial(config);
        let temporal = BlockRole::temporal(config);
        let report_objective = config.track_objective || !self.observers.is_empty();
        let mut trace = Vec::new();
        let mut skipped = 0;

        for iteration in 0..config.max_iter {
            let s_report = update_spatial(data, s, t, &spatial);
            let t_report = update_temporal(data, s, t, &temporal);
            skipped += usize::from(!s_report.applied) + usize::from(!t_report.applied);

            if report_objective {
                let value = objective(data, s, t, config, &spatial, &temporal);
                debug!("iteration {}: objective {:.6e}", iteration, value);
                for observer in self.observers.iter_mut() {
                    observer.report(iteration, s, t, value);
                }
                if config.track_objective {
                    trace.push(value);
                }
            }
        }
        if skipped > 0 {
            warn!("{} block updates were skipped over {} iterations", skipped, config.max_iter);
        }
        trace
    }
}

fn check_initial_shapes(
    n: usize,
    m: usize,
    rank: usize,
    t_init: Option<&Array2<f64>>,
    s_init: Option<&Array2<f64>>,
) -> Result<(), ConfigError> {
    if let Some(t) = t_init {
        if t.dim() != (rank, m) {
            return Err(ConfigError::DimensionMismatch(format!(
                "initial T is {:?}, expected {:?}",
                t.dim(),
                (rank, m)
            )));
        }
    }
    if let Some(s) = s_init {
        if s.dim() != (n, rank) {
            return Err(ConfigError::DimensionMismatch(format!(
                "initial S is {:?}, expected {:?}",
                s.dim(),
                (n, rank)
            )));
        }
    }
    Ok(())
}

/// Entry point with the default collaborators
pub fn factorize(
    y: &Array2<f64>,
    config: NmfConfig,
    t_init: Option<Array2<f64>>,
    s_init: Option<Array2<f64>>,
) -> Result<Factorization, ConfigError> {
    Factorizer::new(config).factorize(y, t_init, s_init)
}
