//! Gradient ascent and descent.

use std::sync::Arc;

use evc_types::{
    config_error, ConvergenceCriterion, Direction, FunctionRole, GradientConfig, OptResult,
    OptimizationResult, OptimizationWarning, Sample,
};
use finitediff::FiniteDiff;

use crate::engine::{OptimizationFunction, Optimizer};
use crate::function::{
    FunctionBinding, SearchContext, SearchFunction, SearchPhase, TerminationFunction,
};
use crate::progress::ProgressReporter;
use crate::sample::SampleIterator;

/// `(previous_step_size, iteration) -> step_size`, applied from the second
/// iteration on.
pub type Annealing = Arc<dyn Fn(f64, usize) -> f64 + Send + Sync>;

/// Moves the sample one step along the objective's gradient.
///
/// Uses the bound analytic gradient when there is one and central finite
/// differences otherwise. A gradient that cannot be used turns the step into
/// a no-op for the rest of the run.
pub struct FollowGradient {
    sign: f64,
    initial_step: f64,
    step_size: f64,
    annealing: Option<Annealing>,
    disabled: bool,
}

impl FollowGradient {
    pub fn new(direction: Direction, step_size: f64, annealing: Option<Annealing>) -> Self {
        Self {
            sign: direction.sign(),
            initial_step: step_size,
            step_size,
            annealing,
            disabled: false,
        }
    }

    /// Step size used by the most recent step.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    fn disable(&mut self, ctx: &mut SearchContext<'_>, reason: String) {
        self.disabled = true;
        let owner = ctx.owner.to_string();
        ctx.warn(OptimizationWarning::GradientUnavailable { owner, reason });
    }
}

impl SearchFunction for FollowGradient {
    fn reset(&mut self, _ctx: &mut SearchContext<'_>) -> OptResult<()> {
        self.step_size = self.initial_step;
        self.disabled = false;
        Ok(())
    }

    fn search(
        &mut self,
        ctx: &mut SearchContext<'_>,
        sample: &[f64],
        iteration: usize,
    ) -> OptResult<Sample> {
        if ctx.phase == SearchPhase::Initializing {
            return Ok(sample.to_vec());
        }
        if iteration != 0 {
            if let Some(annealing) = &self.annealing {
                self.step_size = annealing(self.step_size, iteration);
            }
        }
        if self.disabled || !ctx.objective_bound {
            return Ok(sample.to_vec());
        }

        let gradient = match ctx.gradient {
            Some(gradient) => gradient.call(sample),
            None => {
                let objective = ctx.objective;
                sample
                    .to_vec()
                    .central_diff(&|x: &Vec<f64>| objective.probe(x))
            }
        };

        if gradient.len() != sample.len() {
            self.disable(
                ctx,
                format!(
                    "gradient has {} components for a sample of {}",
                    gradient.len(),
                    sample.len()
                ),
            );
            return Ok(sample.to_vec());
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            self.disable(ctx, format!("non-finite gradient {gradient:?} at {sample:?}"));
            return Ok(sample.to_vec());
        }

        Ok(sample
            .iter()
            .zip(&gradient)
            .map(|(x, g)| x + self.sign * self.step_size * g)
            .collect())
    }
}

/// Stops once successive iterates differ by no more than a threshold.
pub struct ConvergenceCheck {
    criterion: ConvergenceCriterion,
    threshold: f64,
    previous: Option<(Sample, f64)>,
}

impl ConvergenceCheck {
    pub fn new(criterion: ConvergenceCriterion, threshold: f64) -> Self {
        Self {
            criterion,
            threshold,
            previous: None,
        }
    }

    fn metric(&self, sample: &[f64], value: f64) -> Option<f64> {
        let (previous_sample, previous_value) = self.previous.as_ref()?;
        let metric = match self.criterion {
            ConvergenceCriterion::Value => (value - previous_value).abs(),
            ConvergenceCriterion::Variable => sample
                .iter()
                .zip(previous_sample)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max),
        };
        Some(metric)
    }
}

impl TerminationFunction for ConvergenceCheck {
    fn reset(&mut self, _owner: &str, _search_space: &[SampleIterator]) -> OptResult<()> {
        self.previous = None;
        Ok(())
    }

    fn should_continue(&mut self, sample: &[f64], value: f64, iteration: usize) -> bool {
        let metric = if iteration == 0 {
            None
        } else {
            self.metric(sample, value)
        };
        self.previous = Some((sample.to_vec(), value));
        metric.map_or(true, |m| m > self.threshold)
    }
}

/// Follows the objective's gradient until convergence.
///
/// Returns the last iterate, not the best sample seen along the way.
#[derive(Debug)]
pub struct GradientOptimization {
    config: GradientConfig,
    function: OptimizationFunction,
}

impl GradientOptimization {
    pub fn new(config: GradientConfig) -> OptResult<Self> {
        Self::build(config, None)
    }

    /// Gradient following whose step size is updated by `annealing` on every
    /// iteration after the first.
    pub fn annealed<F>(config: GradientConfig, annealing: F) -> OptResult<Self>
    where
        F: Fn(f64, usize) -> f64 + Send + Sync + 'static,
    {
        Self::build(config, Some(Arc::new(annealing)))
    }

    fn build(config: GradientConfig, annealing: Option<Annealing>) -> OptResult<Self> {
        if !config.direction.is_gradient() {
            return Err(config_error!(
                config.name,
                "direction must be ascent or descent, got {}",
                config.direction
            ));
        }
        if !config.step_size.is_finite() || config.step_size <= 0.0 {
            return Err(config_error!(
                config.name,
                "step_size must be positive, got {}",
                config.step_size
            ));
        }
        if config.convergence_threshold.is_nan() || config.convergence_threshold < 0.0 {
            return Err(config_error!(
                config.name,
                "convergence_threshold must be non-negative, got {}",
                config.convergence_threshold
            ));
        }

        let binding = FunctionBinding::new()
            .search_function(FollowGradient::new(
                config.direction,
                config.step_size,
                annealing,
            ))
            .search_termination_function(ConvergenceCheck::new(
                config.convergence_criterion,
                config.convergence_threshold,
            ));
        let mut function = OptimizationFunction::with_binding(config.optimization(), binding)?;
        // Gradient following walks a continuous space of its own.
        function.waive(FunctionRole::SearchSpace);

        Ok(Self { config, function })
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    pub fn function(&self) -> &OptimizationFunction {
        &self.function
    }
}

impl Optimizer for GradientOptimization {
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
        match initial {
            Some(initial) => self.function.optimize(initial),
            None => self.function.run(),
        }
    }

    fn initialization_sample(&mut self, default: &[f64]) -> OptResult<Sample> {
        self.function.initialization_sample(default)
    }

    fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.function.set_progress_reporter(reporter);
    }
}
