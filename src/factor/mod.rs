pub mod normalization;
pub mod operator;
pub mod regularizers;
pub mod update_rules;

pub mod block_update;
pub mod driver;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenience
pub use block_update::{block_objective, block_update, update_spatial, update_temporal, BlockReport, BlockRole, StepSize};
pub use driver::{factorize, objective, Factorization, Factorizer};
pub use normalization::{normalize_data, rebalance_rows, DataScaling, NormalizedData};
pub use operator::{QuadraticOperator, VarianceTerm};
