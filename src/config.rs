use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How the first factor guess is seeded when the caller supplies none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitMethod {
    /// Leading singular vectors of the data
    #[default]
    Pca,
    /// Random temporal traces smoothed by a moving average
    Rand,
}

impl FromStr for InitMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pca" => Ok(InitMethod::Pca),
            "rand" => Ok(InitMethod::Rand),
            other => Err(ConfigError::UnknownInitMethod(other.to_string())),
        }
    }
}

/// Regularizer weights, all default 0 (inactive)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegularizerWeights {
    pub l1_spatial: f64,
    pub l1_temporal: f64,
    /// Temporal correlation penalty
    pub corr: f64,
    pub ortho_l1: f64,
    pub ortho_l2: f64,
    pub tv_spatial: f64,
    pub tv_temporal: f64,
}

/// Names one field of [`RegularizerWeights`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightKind {
    L1Spatial,
    L1Temporal,
    Corr,
    OrthoL1,
    OrthoL2,
    TvSpatial,
    TvTemporal,
}

impl RegularizerWeights {
    pub fn get(&self, kind: WeightKind) -> f64 {
        match kind {
            WeightKind::L1Spatial => self.l1_spatial,
            WeightKind::L1Temporal => self.l1_temporal,
            WeightKind::Corr => self.corr,
            WeightKind::OrthoL1 => self.ortho_l1,
            WeightKind::OrthoL2 => self.ortho_l2,
            WeightKind::TvSpatial => self.tv_spatial,
            WeightKind::TvTemporal => self.tv_temporal,
        }
    }

    pub fn set(&mut self, kind: WeightKind, value: f64) {
        let slot = match kind {
            WeightKind::L1Spatial => &mut self.l1_spatial,
            WeightKind::L1Temporal => &mut self.l1_temporal,
            WeightKind::Corr => &mut self.corr,
            WeightKind::OrthoL1 => &mut self.ortho_l1,
            WeightKind::OrthoL2 => &mut self.ortho_l2,
            WeightKind::TvSpatial => &mut self.tv_spatial,
            WeightKind::TvTemporal => &mut self.tv_temporal,
        };
        *slot = value;
    }

    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("l1_spatial", self.l1_spatial),
            ("l1_temporal", self.l1_temporal),
            ("corr", self.corr),
            ("ortho_l1", self.ortho_l1),
            ("ortho_l2", self.ortho_l2),
            ("tv_spatial", self.tv_spatial),
            ("tv_temporal", self.tv_temporal),
        ]
    }

    pub fn has_orthogonality(&self) -> bool {
        self.ortho_l1 > 0.0 || self.ortho_l2 > 0.0
    }
}

/// Grid search over one regularizer weight with k-fold row hold-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationConfig {
    pub weight: WeightKind,
    pub candidates: Vec<f64>,
    pub folds: usize,
    pub max_iter: usize,
    pub seed: Option<u64>,
}

impl CrossValidationConfig {
    pub fn new(weight: WeightKind, candidates: Vec<f64>) -> Self {
        Self {
            weight,
            candidates,
            folds: 3,
            max_iter: 100,
            seed: None,
        }
    }
}

/// Per-run settings of the factorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmfConfig {
    pub rank: usize,
    pub weights: RegularizerWeights,
    pub max_iter: usize,
    /// Rows of Y that enter the least-squares fit; None means all rows
    pub active_rows: Option<Vec<bool>>,
    pub use_std: bool,
    /// Per-column step size instead of one step for the whole block
    pub pointwise: bool,
    pub init: InitMethod,
    /// (height, width) of the image each spatial component is laid out on
    pub image_shape: Option<(usize, usize)>,
    /// Log the objective every iteration
    pub display: bool,
    /// Record the objective every iteration in the result
    pub track_objective: bool,
    pub seed: Option<u64>,
    pub cross_validation: Option<CrossValidationConfig>,
}

impl Default for NmfConfig {
    fn default() -> Self {
        Self {
            rank: 1,
            weights: RegularizerWeights::default(),
            max_iter: 600,
            active_rows: None,
            use_std: false,
            pointwise: false,
            init: InitMethod::Pca,
            image_shape: None,
            display: false,
            track_objective: false,
            seed: None,
            cross_validation: None,
        }
    }
}

impl NmfConfig {
    pub fn with_rank(rank: usize) -> Self {
        Self {
            rank,
            ..Default::default()
        }
    }

    pub fn active_rows(&self) -> Option<&[bool]> {
        self.active_rows.as_deref()
    }

    /// Check every setting against an N x M data matrix before anything runs
    pub fn validate(&self, n_rows: usize, n_cols: usize) -> Result<(), ConfigError> {
        if n_rows == 0 || n_cols == 0 {
            return Err(ConfigError::EmptyData);
        }
        if self.rank == 0 || self.rank > n_rows.min(n_cols) {
            return Err(ConfigError::InvalidRank {
                rank: self.rank,
                max: n_rows.min(n_cols),
            });
        }
        for (name, value) in self.weights.named() {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeWeight(name, value));
            }
        }
        if self.weights.tv_spatial > 0.0 {
            match self.image_shape {
                None => return Err(ConfigError::MissingImageShape),
                Some((h, w)) if h * w != n_rows => {
                    return Err(ConfigError::ImageShapeMismatch {
                        shape: (h, w),
                        n_rows,
                    })
                }
                Some(_) => {}
            }
        }
        if let Some(mask) = &self.active_rows {
            if mask.len() != n_rows {
                return Err(ConfigError::ActiveMaskLength {
                    expected: n_rows,
                    got: mask.len(),
                });
            }
        }
        if let Some(cv) = &self.cross_validation {
            if cv.candidates.is_empty() {
                return Err(ConfigError::InvalidCrossValidation(
                    "no candidate weights".to_string(),
                ));
            }
            if cv.candidates.iter().any(|c| !c.is_finite() || *c < 0.0) {
                return Err(ConfigError::InvalidCrossValidation(
                    "candidate weights must be finite and non-negative".to_string(),
                ));
            }
            if cv.folds < 2 || cv.folds > n_rows {
                return Err(ConfigError::InvalidCrossValidation(format!(
                    "{} folds for {} rows",
                    cv.folds, n_rows
                )));
            }
            if cv.weight == WeightKind::TvSpatial && self.image_shape.is_none() {
                return Err(ConfigError::MissingImageShape);
            }
        }
        Ok(())
    }
}

/// Reject NaN and infinite data entries before anything is scaled
pub fn check_finite(y: &Array2<f64>) -> Result<(), ConfigError> {
    match y.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), _)) => Err(ConfigError::NonFiniteData { row, col }),
        None => Ok(()),
    }
}

/// Positional command-line arguments of the binary
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub data_path: PathBuf,
    pub rank: usize,
    pub max_iter: usize,
    pub output_path: PathBuf,
}

impl RunArgs {
    /// # Examples
    /// ```bash
    /// $ cargo run -- data/movie.npy 4 600 out.npz
    /// ```
    pub fn new(mut args: impl Iterator<Item = String>) -> Result<RunArgs, ConfigError> {
        // 0: program name, 1: data path, 2: rank, 3: max_iter (opt), 4: output (opt)
        args.next();
        let data_path = PathBuf::from(
            args.next()
                .ok_or(ConfigError::MissingArgument("data path"))?,
        );
        let rank = parse_arg(args.next().ok_or(ConfigError::MissingArgument("rank"))?, "rank")?;
        let max_iter = match args.next() {
            Some(raw) => parse_arg(raw, "max_iter")?,
            None => NmfConfig::default().max_iter,
        };
        let output_path = args
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_path.with_extension("nmf.npz"));

        Ok(RunArgs {
            data_path,
            rank,
            max_iter,
            output_path,
        })
    }

    pub fn to_config(&self) -> NmfConfig {
        NmfConfig {
            rank: self.rank,
            max_iter: self.max_iter,
            display: true,
            ..Default::default()
        }
    }
}

fn parse_arg(raw: String, name: &'static str) -> Result<usize, ConfigError> {
    raw.parse::<usize>()
        .map_err(|_| ConfigError::InvalidArgument(name, raw))
}

/// Errors surfaced before the optimizer starts
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidRank { rank: usize, max: usize },
    NegativeWeight(&'static str, f64),
    MissingImageShape,
    ImageShapeMismatch { shape: (usize, usize), n_rows: usize },
    ActiveMaskLength { expected: usize, got: usize },
    EmptyData,
    NonFiniteData { row: usize, col: usize },
    DimensionMismatch(String),
    InvalidCrossValidation(String),
    UnknownInitMethod(String),
    MissingArgument(&'static str),
    InvalidArgument(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidRank { rank, max } => {
                write!(f, "Invalid rank {} (must be between 1 and {})", rank, max)
            }
            ConfigError::NegativeWeight(name, value) => {
                write!(f, "Weight {} must be finite and non-negative, got {}", name, value)
            }
            ConfigError::MissingImageShape => {
                write!(f, "Spatial total variation requires an image shape")
            }
            ConfigError::ImageShapeMismatch { shape, n_rows } => write!(
                f,
                "Image shape {}x{} does not cover {} rows",
                shape.0, shape.1, n_rows
            ),
            ConfigError::ActiveMaskLength { expected, got } => {
                write!(f, "Active row mask has length {}, expected {}", got, expected)
            }
            ConfigError::EmptyData => write!(f, "Data matrix is empty"),
            ConfigError::NonFiniteData { row, col } => {
                write!(f, "Data entry ({}, {}) is NaN or infinite", row, col)
            }
            ConfigError::DimensionMismatch(msg) => write!(f, "Dimension mismatch: {}", msg),
            ConfigError::InvalidCrossValidation(msg) => {
                write!(f, "Invalid cross-validation settings: {}", msg)
            }
            ConfigError::UnknownInitMethod(name) => {
                write!(f, "Unknown init method '{}' (expected pca or rand)", name)
            }
            ConfigError::MissingArgument(name) => write!(f, "Missing argument: {}", name),
            ConfigError::InvalidArgument(name, raw) => {
                write!(f, "Invalid value '{}' for {}", raw, name)
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NmfConfig::default();
        assert_eq!(config.max_iter, 600);
        assert_eq!(config.init, InitMethod::Pca);
        assert!(!config.use_std);
        assert!(!config.pointwise);
        assert_eq!(config.weights, RegularizerWeights::default());
        assert!(config.validate(10, 10).is_ok());
    }

    #[test]
    fn test_spatial_tv_requires_image_shape() {
        let mut config = NmfConfig::with_rank(2);
        config.weights.tv_spatial = 0.1;
        assert_eq!(config.validate(12, 5), Err(ConfigError::MissingImageShape));

        config.image_shape = Some((3, 5));
        assert!(matches!(
            config.validate(12, 5),
            Err(ConfigError::ImageShapeMismatch { .. })
        ));

        config.image_shape = Some((3, 4));
        assert!(config.validate(12, 5).is_ok());
    }

    #[test]
    fn test_rank_and_weight_checks() {
        let config = NmfConfig::with_rank(0);
        assert!(matches!(config.validate(4, 4), Err(ConfigError::InvalidRank { .. })));
        let config = NmfConfig::with_rank(5);
        assert!(matches!(config.validate(4, 8), Err(ConfigError::InvalidRank { .. })));

        let mut config = NmfConfig::with_rank(2);
        config.weights.corr = -1.0;
        assert_eq!(
            config.validate(4, 4),
            Err(ConfigError::NegativeWeight("corr", -1.0))
        );
    }

    #[test]
    fn test_non_finite_data_is_rejected() {
        let mut y = Array2::<f64>::ones((3, 4));
        assert!(check_finite(&y).is_ok());
        y[[1, 2]] = f64::NAN;
        assert_eq!(check_finite(&y), Err(ConfigError::NonFiniteData { row: 1, col: 2 }));
        y[[1, 2]] = 1.0;
        y[[0, 3]] = f64::INFINITY;
        assert_eq!(check_finite(&y), Err(ConfigError::NonFiniteData { row: 0, col: 3 }));
    }

    #[test]
    fn test_active_mask_length() {
        let mut config = NmfConfig::with_rank(1);
        config.active_rows = Some(vec![true, false]);
        assert_eq!(
            config.validate(3, 3),
            Err(ConfigError::ActiveMaskLength {
                expected: 3,
                got: 2
            })
        );
        // an all-inactive mask is accepted, the optimizer simply does not move
        config.active_rows = Some(vec![false; 3]);
        assert!(config.validate(3, 3).is_ok());
    }

    #[test]
    fn test_cross_validation_checks() {
        let mut config = NmfConfig::with_rank(1);
        config.cross_validation = Some(CrossValidationConfig::new(WeightKind::Corr, vec![]));
        assert!(matches!(
            config.validate(6, 6),
            Err(ConfigError::InvalidCrossValidation(_))
        ));
        config.cross_validation = Some(CrossValidationConfig::new(WeightKind::Corr, vec![0.0, 0.1]));
        assert!(config.validate(6, 6).is_ok());
    }

    #[test]
    fn test_init_method_from_str() {
        assert_eq!("pca".parse::<InitMethod>(), Ok(InitMethod::Pca));
        assert_eq!("RAND".parse::<InitMethod>(), Ok(InitMethod::Rand));
        assert!("svd".parse::<InitMethod>().is_err());
    }

    #[test]
    fn test_weights_get_set() {
        let mut weights = RegularizerWeights::default();
        weights.set(WeightKind::TvTemporal, 0.5);
        assert_eq!(weights.get(WeightKind::TvTemporal), 0.5);
        assert_eq!(weights.tv_temporal, 0.5);
        assert!(!weights.has_orthogonality());
        weights.set(WeightKind::OrthoL2, 0.1);
        assert!(weights.has_orthogonality());
    }

    #[test]
    fn test_run_args() {
        let args = vec![
            "target/debug/st_nmf".to_string(),
            "data/movie.npy".to_string(),
            "4".to_string(),
            "50".to_string(),
        ];
        let run = RunArgs::new(args.into_iter()).unwrap();
        assert_eq!(run.rank, 4);
        assert_eq!(run.max_iter, 50);
        assert_eq!(run.data_path, PathBuf::from("data/movie.npy"));
        assert_eq!(run.output_path, PathBuf::from("data/movie.nmf.npz"));
        assert_eq!(run.to_config().rank, 4);

        let missing = vec!["st_nmf".to_string(), "data.npy".to_string()];
        assert_eq!(
            RunArgs::new(missing.into_iter()).unwrap_err(),
            ConfigError::MissingArgument("rank")
        );
        let bad = vec!["st_nmf".to_string(), "data.npy".to_string(), "four".to_string()];
        assert!(matches!(
            RunArgs::new(bad.into_iter()),
            Err(ConfigError::InvalidArgument("rank", _))
        ));
    }
}
