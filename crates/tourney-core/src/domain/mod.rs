//! Domain model for the validator core.
//!
//! - `Period`: stage of a tournament, derived from its schedule
//! - `ValidatorState`: what the control loop remembers between iterations
//! - `TaskConfig`: the evaluation task handed to the engine

pub mod error;
pub mod period;
pub mod state;
pub mod task;

pub use error::{ConfigError, EvaluationError, Result, SetupError, TourneyError, WeightError};
pub use period::{classify, Clock, Period, SystemClock};
pub use state::{EvaluationStats, ValidatorState};
pub use task::{EnvScene, TaskConfig};
