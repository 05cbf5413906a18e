//! Serializable configuration records.
//!
//! Callables never live here; they are attached later through a binding so
//! that a configuration can be written out and reloaded as plain JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ConvergenceCriterion, Direction, EvcResult};

/// Load any configuration record from a JSON document.
pub fn from_json_str<T: DeserializeOwned>(json: &str) -> EvcResult<T> {
    Ok(serde_json::from_str(json)?)
}

/// Settings shared by every optimization function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Name used in log records, warnings and errors.
    pub name: String,
    pub direction: Direction,
    /// Upper bound on search iterations; `None` leaves the search unbounded.
    pub max_iterations: Option<usize>,
    pub save_samples: bool,
    pub save_values: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            name: "OptimizationFunction".to_string(),
            direction: Direction::Maximize,
            max_iterations: None,
            save_samples: false,
            save_values: false,
        }
    }
}

impl OptimizationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn with_save_samples(mut self, save: bool) -> Self {
        self.save_samples = save;
        self
    }

    pub fn with_save_values(mut self, save: bool) -> Self {
        self.save_values = save;
        self
    }
}

/// Settings for gradient ascent/descent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    pub name: String,
    /// `Ascent` or `Descent`.
    pub direction: Direction,
    pub step_size: f64,
    pub convergence_criterion: ConvergenceCriterion,
    pub convergence_threshold: f64,
    pub max_iterations: Option<usize>,
    pub save_samples: bool,
    pub save_values: bool,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            name: "GradientOptimization".to_string(),
            direction: Direction::Ascent,
            step_size: 1.0,
            convergence_criterion: ConvergenceCriterion::Value,
            convergence_threshold: 0.001,
            max_iterations: Some(1000),
            save_samples: false,
            save_values: false,
        }
    }
}

impl GradientConfig {
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_convergence(mut self, criterion: ConvergenceCriterion, threshold: f64) -> Self {
        self.convergence_criterion = criterion;
        self.convergence_threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, n: Option<usize>) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_save_samples(mut self, save: bool) -> Self {
        self.save_samples = save;
        self
    }

    pub fn with_save_values(mut self, save: bool) -> Self {
        self.save_values = save;
        self
    }

    /// The engine-level view of these settings.
    pub fn optimization(&self) -> OptimizationConfig {
        OptimizationConfig {
            name: self.name.clone(),
            direction: self.direction,
            max_iterations: self.max_iterations,
            save_samples: self.save_samples,
            save_values: self.save_values,
        }
    }
}

/// Settings for exhaustive grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub name: String,
    /// `Maximize` or `Minimize`.
    pub direction: Direction,
    /// Worker count for the partitioned evaluation mode; `None` runs the
    /// sequential search loop.
    pub workers: Option<usize>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            name: "GridSearch".to_string(),
            direction: Direction::Maximize,
            workers: None,
        }
    }
}

impl GridConfig {
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn optimization(&self) -> OptimizationConfig {
        OptimizationConfig {
            name: self.name.clone(),
            direction: self.direction,
            max_iterations: None,
            save_samples: true,
            save_values: true,
        }
    }
}

/// Settings for the Gaussian-process search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianProcessConfig {
    pub name: String,
    pub direction: Direction,
    pub max_iterations: Option<usize>,
}

impl Default for GaussianProcessConfig {
    fn default() -> Self {
        Self {
            name: "GaussianProcess".to_string(),
            direction: Direction::Maximize,
            max_iterations: Some(1000),
        }
    }
}

impl GaussianProcessConfig {
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn optimization(&self) -> OptimizationConfig {
        OptimizationConfig {
            name: self.name.clone(),
            direction: self.direction,
            max_iterations: self.max_iterations,
            save_samples: true,
            save_values: true,
        }
    }
}

/// Settings for an optimization control mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanismConfig {
    pub name: String,
    /// Print a progress line for every search the mechanism runs.
    pub report_progress: bool,
}

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            name: "OptimizationControlMechanism".to_string(),
            report_progress: false,
        }
    }
}

impl MechanismConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, report: bool) -> Self {
        self.report_progress = report;
        self
    }
}
