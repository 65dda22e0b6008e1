//! Default collaborators of the optimizer: seeding, the constrained solver
//! for the complementary factor, weight tuning and per-iteration observers.
pub mod cross_validation;
pub mod init;
pub mod nnls;
pub mod observer;

pub use cross_validation::{CrossValidator, HoldoutCrossValidator};
pub use init::{initializer_for, Initializer, PcaInitializer, RandomTraceInitializer};
pub use nnls::{BlockPivotSolver, ConstrainedSolver};
pub use observer::{LoggingObserver, Observer};
