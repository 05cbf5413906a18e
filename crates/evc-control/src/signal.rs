//! Control signals: one allocatable quantity each, with the samples a
//! mechanism may choose from and the cost of an allocation.

use std::fmt;
use std::sync::Arc;

use evc_optimizer::{SampleIterator, SampleSpec};
use evc_types::{ControlError, ControlResult};

/// Cost of allocating a given intensity to a signal.
pub type IntensityCost = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// The default intensity cost, `exp(intensity)`.
pub fn exponential_cost() -> IntensityCost {
    Arc::new(f64::exp)
}

#[derive(Clone)]
pub struct ControlSignal {
    name: String,
    allocation_samples: SampleIterator,
    allocation: f64,
    cost: IntensityCost,
}

impl ControlSignal {
    /// A signal choosing among the values of `allocation_samples`.
    ///
    /// The sequence must be finite; the initial allocation is its first value.
    pub fn new(name: impl Into<String>, allocation_samples: SampleIterator) -> ControlResult<Self> {
        let name = name.into();
        if !allocation_samples.is_bounded() {
            return Err(ControlError::InvalidSignal {
                name,
                message: "allocation samples must be a finite sequence".to_string(),
            });
        }
        Ok(Self {
            allocation: allocation_samples.begin(),
            name,
            allocation_samples,
            cost: exponential_cost(),
        })
    }

    pub fn from_values(name: impl Into<String>, values: Vec<f64>) -> ControlResult<Self> {
        let name = name.into();
        let samples = SampleIterator::from_values(values).map_err(|e| ControlError::InvalidSignal {
            name: name.clone(),
            message: e.to_string(),
        })?;
        Self::new(name, samples)
    }

    pub fn from_spec(name: impl Into<String>, spec: &SampleSpec) -> ControlResult<Self> {
        Self::new(name, SampleIterator::from_spec(spec))
    }

    /// Replace the default `exp` intensity cost.
    pub fn with_cost<F>(mut self, cost: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.cost = Arc::new(cost);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allocation_samples(&self) -> &SampleIterator {
        &self.allocation_samples
    }

    /// Allocation chosen by the most recent execution.
    pub fn allocation(&self) -> f64 {
        self.allocation
    }

    pub(crate) fn set_allocation(&mut self, allocation: f64) {
        self.allocation = allocation;
    }

    pub fn cost(&self, intensity: f64) -> f64 {
        (self.cost)(intensity)
    }

    pub fn cost_function(&self) -> IntensityCost {
        Arc::clone(&self.cost)
    }
}

impl fmt::Debug for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSignal")
            .field("name", &self.name)
            .field("allocation_samples", &self.allocation_samples)
            .field("allocation", &self.allocation)
            .finish()
    }
}
