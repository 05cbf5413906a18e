use thiserror::Error;

/// Main error type for the EVC control workspace
#[derive(Error, Debug)]
pub enum EvcError {
    #[error("Sample error: {0}")]
    Sample(#[from] SampleError),

    #[error("Optimization error: {0}")]
    Optimization(#[from] OptimizationError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while describing or drawing from a sample sequence
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("Invalid sample specification: {message}")]
    InvalidSpec { message: String },

    #[error("Sample sequence exhausted after {num_steps} steps")]
    Exhausted { num_steps: usize },

    #[error("Sample sequence is unbounded and cannot be materialized")]
    Unbounded,

    #[error("Sample sequence must contain at least one value")]
    EmptySequence,
}

impl SampleError {
    /// True when the sequence legitimately ran out of values.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SampleError::Exhausted { .. })
    }
}

/// Errors raised by optimization functions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizationError {
    #[error("Invalid configuration for {owner}: {message}")]
    Configuration { owner: String, message: String },

    #[error("Expired grid in {owner} (iteration: {iteration}; expected iterations: {expected})")]
    GridExhausted {
        owner: String,
        iteration: usize,
        expected: usize,
    },

    #[error("Sample dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },

    #[error(transparent)]
    Sample(#[from] SampleError),
}

impl OptimizationError {
    pub fn configuration(owner: impl Into<String>, message: impl Into<String>) -> Self {
        OptimizationError::Configuration {
            owner: owner.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by control mechanisms
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("{mechanism} must provide an evaluation function before it can execute")]
    MissingEvaluationFunction { mechanism: String },

    #[error("{mechanism} has no control signals to allocate")]
    NoControlSignals { mechanism: String },

    #[error("Invalid control signal {name}: {message}")]
    InvalidSignal { name: String, message: String },

    #[error("Policy has {policy} entries but {costs} intensity costs were supplied")]
    CostMismatch { policy: usize, costs: usize },

    #[error(transparent)]
    Optimization(#[from] OptimizationError),
}

/// Result type alias for workspace-level operations
pub type EvcResult<T> = Result<T, EvcError>;

/// Result type alias for sample sequence operations
pub type SampleResult<T> = Result<T, SampleError>;

/// Result type alias for optimization functions
pub type OptResult<T> = Result<T, OptimizationError>;

/// Result type alias for control mechanisms
pub type ControlResult<T> = Result<T, ControlError>;

/// Macro for creating optimization configuration errors
#[macro_export]
macro_rules! config_error {
    ($owner:expr, $($arg:tt)*) => {
        $crate::OptimizationError::Configuration {
            owner: ($owner).to_string(),
            message: format!($($arg)*),
        }
    };
}

/// Macro for creating sample specification errors
#[macro_export]
macro_rules! spec_error {
    ($($arg:tt)*) => {
        $crate::SampleError::InvalidSpec {
            message: format!($($arg)*),
        }
    };
}
