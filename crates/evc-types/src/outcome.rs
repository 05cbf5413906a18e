//! Results and non-fatal diagnostics produced by an optimization run.

use serde::{Deserialize, Serialize};

use crate::Sample;

/// Why an objective function is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationPhase {
    /// Seeds the search loop with the value of the initial sample. Recording
    /// collaborators must not treat it as a data point.
    Probe,
    /// A regular sample drawn by the search function.
    Search,
}

/// Which pluggable role of an optimization function is being referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionRole {
    ObjectiveFunction,
    SearchFunction,
    SearchTerminationFunction,
    SearchSpace,
}

impl std::fmt::Display for FunctionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ObjectiveFunction => "objective_function",
            Self::SearchFunction => "search_function",
            Self::SearchTerminationFunction => "search_termination_function",
            Self::SearchSpace => "search_space",
        };
        f.write_str(name)
    }
}

/// A recoverable anomaly observed during a run. Logged and attached to the
/// result instead of being raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizationWarning {
    /// The iteration bound was hit before the termination function said stop.
    ConvergenceFailure { owner: String, max_iterations: usize },
    /// Placeholder functions were substituted for roles never bound.
    UnspecifiedDefaults {
        owner: String,
        roles: Vec<FunctionRole>,
    },
    /// Gradient following degraded to a no-op.
    GradientUnavailable { owner: String, reason: String },
}

impl std::fmt::Display for OptimizationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConvergenceFailure {
                owner,
                max_iterations,
            } => write!(f, "{owner} failed to converge after {max_iterations} iterations"),
            Self::UnspecifiedDefaults { owner, roles } => {
                let names: Vec<String> = roles.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "The following arg(s) were not specified for {owner}: {} -- using default(s)",
                    names.join(", ")
                )
            }
            Self::GradientUnavailable { owner, reason } => {
                write!(f, "Unable to differentiate objective of {owner}: {reason}")
            }
        }
    }
}

/// Outcome of one `optimize` call.
///
/// `saved_samples`/`saved_values` are empty unless the corresponding save flag
/// was set for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub sample: Sample,
    pub value: f64,
    pub saved_samples: Vec<Sample>,
    pub saved_values: Vec<f64>,
    /// Number of search iterations actually executed.
    pub iterations: usize,
    pub warnings: Vec<OptimizationWarning>,
}

impl OptimizationResult {
    /// The `(optimal_sample, optimal_value, all_samples, all_values)` tuple.
    pub fn into_parts(self) -> (Sample, f64, Vec<Sample>, Vec<f64>) {
        (self.sample, self.value, self.saved_samples, self.saved_values)
    }

    pub fn converged(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, OptimizationWarning::ConvergenceFailure { .. }))
    }
}
