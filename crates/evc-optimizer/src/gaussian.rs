//! Ask/tell search driven by an external proposal sampler.
//!
//! [`GaussianProcess`] owns the loop and the bookkeeping; the model that
//! decides where to look next lives behind [`ProposalSampler`]. Scores passed
//! to the sampler are always "higher is better": values are multiplied by the
//! direction's sign before being observed.

use std::sync::Arc;

use evc_types::{
    config_error, Direction, GaussianProcessConfig, OptResult, OptimizationError,
    OptimizationResult, Sample,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{OptimizationFunction, Optimizer};
use crate::function::{
    FunctionBinding, SearchContext, SearchFunction, SearchPhase, TerminationFunction,
};
use crate::progress::ProgressReporter;

/// A model that proposes samples and learns from their scores.
pub trait ProposalSampler: Send {
    /// Next sample to evaluate, one value per `(low, high)` bound.
    fn propose_next(&mut self, bounds: &[(f64, f64)]) -> OptResult<Sample>;

    /// Score of a previously proposed sample; higher is better.
    fn observe(&mut self, _sample: &[f64], _score: f64) {}

    /// `true` once the sampler wants no more proposals after `iteration`
    /// evaluations.
    fn is_satisfied(&self, iteration: usize) -> bool;

    /// Forget everything observed; called before every run.
    fn reset(&mut self) {}
}

struct Propose<S> {
    sampler: Arc<Mutex<S>>,
    bounds: Vec<(f64, f64)>,
}

impl<S: ProposalSampler> SearchFunction for Propose<S> {
    fn reset(&mut self, ctx: &mut SearchContext<'_>) -> OptResult<()> {
        let mut bounds = Vec::with_capacity(ctx.search_space.len());
        for (index, dimension) in ctx.search_space.iter().enumerate() {
            let bound = dimension.bounds().ok_or_else(|| {
                config_error!(ctx.owner, "dimension {index} of the search space has no bounds")
            })?;
            bounds.push(bound);
        }
        self.bounds = bounds;
        self.sampler.lock().reset();
        Ok(())
    }

    fn search(
        &mut self,
        ctx: &mut SearchContext<'_>,
        sample: &[f64],
        _iteration: usize,
    ) -> OptResult<Sample> {
        if ctx.phase == SearchPhase::Initializing {
            return Ok(sample.to_vec());
        }
        let proposal = self.sampler.lock().propose_next(&self.bounds)?;
        if proposal.len() != self.bounds.len() {
            return Err(OptimizationError::DimensionMismatch {
                expected: self.bounds.len(),
                actual: proposal.len(),
            });
        }
        Ok(proposal)
    }
}

struct Satisfied<S> {
    sampler: Arc<Mutex<S>>,
    sign: f64,
}

impl<S: ProposalSampler> TerminationFunction for Satisfied<S> {
    fn should_continue(&mut self, sample: &[f64], value: f64, iteration: usize) -> bool {
        let mut sampler = self.sampler.lock();
        // Iteration 0 carries the probe of the initial sample.
        if iteration > 0 {
            sampler.observe(sample, self.sign * value);
        }
        !sampler.is_satisfied(iteration)
    }
}

/// Model-guided search over a bounded continuous space.
pub struct GaussianProcess<S> {
    config: GaussianProcessConfig,
    function: OptimizationFunction,
    sampler: Arc<Mutex<S>>,
}

impl<S: ProposalSampler + 'static> GaussianProcess<S> {
    pub fn new(config: GaussianProcessConfig, sampler: S) -> OptResult<Self> {
        if !config.direction.is_selection() {
            return Err(config_error!(
                config.name,
                "direction must be maximize or minimize, got {}",
                config.direction
            ));
        }

        let sampler = Arc::new(Mutex::new(sampler));
        let binding = FunctionBinding::new()
            .search_function(Propose {
                sampler: Arc::clone(&sampler),
                bounds: Vec::new(),
            })
            .search_termination_function(Satisfied {
                sampler: Arc::clone(&sampler),
                sign: config.direction.sign(),
            });
        let function = OptimizationFunction::with_binding(config.optimization(), binding)?;

        Ok(Self {
            config,
            function,
            sampler,
        })
    }

    pub fn config(&self) -> &GaussianProcessConfig {
        &self.config
    }

    pub fn function(&self) -> &OptimizationFunction {
        &self.function
    }

    /// Inspect the sampler between runs.
    pub fn with_sampler<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.sampler.lock())
    }
}

impl<S: ProposalSampler + 'static> Optimizer for GaussianProcess<S> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn direction(&self) -> Direction {
        self.config.direction
    }

    fn bind(&mut self, binding: FunctionBinding) -> OptResult<()> {
        self.function.bind(binding)
    }

    fn optimize(&mut self, initial: Option<&[f64]>) -> OptResult<OptimizationResult> {
        let mut result = match initial {
            Some(initial) => self.function.optimize(initial)?,
            None => self.function.run()?,
        };
        if let Some(index) = self.config.direction.select_first(&result.saved_values) {
            result.sample = result.saved_samples[index].clone();
            result.value = result.saved_values[index];
        }
        Ok(result)
    }

    fn initialization_sample(&mut self, default: &[f64]) -> OptResult<Sample> {
        self.function.initialization_sample(default)
    }

    fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.function.set_progress_reporter(reporter);
    }
}

impl<S> std::fmt::Debug for GaussianProcess<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaussianProcess")
            .field("config", &self.config)
            .field("function", &self.function)
            .finish()
    }
}

/// Draws proposals uniformly within the bounds from a seeded generator and
/// stops after a fixed number of evaluations.
#[derive(Debug, Clone)]
pub struct UniformProposal {
    seed: u64,
    budget: usize,
    rng: StdRng,
    observations: Vec<(Sample, f64)>,
}

impl UniformProposal {
    pub fn new(seed: u64, budget: usize) -> Self {
        Self {
            seed,
            budget,
            rng: StdRng::seed_from_u64(seed),
            observations: Vec::new(),
        }
    }

    pub fn observations(&self) -> &[(Sample, f64)] {
        &self.observations
    }

    /// Highest-scoring observation so far.
    pub fn best(&self) -> Option<&(Sample, f64)> {
        self.observations
            .iter()
            .filter(|(_, score)| !score.is_nan())
            .fold(None, |best: Option<&(Sample, f64)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            })
    }
}

impl ProposalSampler for UniformProposal {
    fn propose_next(&mut self, bounds: &[(f64, f64)]) -> OptResult<Sample> {
        Ok(bounds
            .iter()
            .map(|&(low, high)| {
                if low < high {
                    self.rng.random_range(low..=high)
                } else {
                    low
                }
            })
            .collect())
    }

    fn observe(&mut self, sample: &[f64], score: f64) {
        self.observations.push((sample.to_vec(), score));
    }

    fn is_satisfied(&self, iteration: usize) -> bool {
        iteration >= self.budget
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.observations.clear();
    }
}
