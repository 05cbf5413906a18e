//! Optimization-driven control for the EVC workspace.
//!
//! Provides:
//! - Control signals with allocation samples and intensity costs
//! - Evaluation functions, including the expected value of control
//! - The optimization control mechanism that searches allocation policies

pub mod evaluation;
pub mod mechanism;
pub mod signal;

pub use evaluation::{
    control_cost, evaluation_fn, EvaluationFn, EvaluationFunction, EvcEvaluator, EvcRecord,
};
pub use mechanism::OptimizationControlMechanism;
pub use signal::{exponential_cost, ControlSignal, IntensityCost};
