//! Spatio-temporal non-negative matrix factorization.
//!
//! Y (N pixels x M time points) is approximated by S (N x R) times
//! T (R x M), alternating projected-gradient updates with an exact line
//! search on S and T, optionally regularized by L1, temporal decorrelation,
//! total variation and spatial orthogonality terms.
pub mod collab;
pub mod config;
pub mod factor;

use log::LevelFilter;
use simple_logger::SimpleLogger;

pub use config::{ConfigError, CrossValidationConfig, InitMethod, NmfConfig, RegularizerWeights, WeightKind};
pub use factor::{factorize, Factorization, Factorizer};

/// Install the process-wide logger; a second call is a no-op
pub fn init_logger(level: LevelFilter) {
    let _ = SimpleLogger::new().with_level(level).init();
}
