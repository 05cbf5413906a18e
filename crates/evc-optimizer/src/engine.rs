//! The generic check-then-step optimization loop.

use evc_types::{
    Direction, FunctionRole, OptResult, OptimizationConfig, OptimizationResult,
    OptimizationWarning, Sample,
};
use tracing::{debug, debug_span, info, warn};

use crate::function::{
    FunctionBinding, GradientFunction, IdentitySearch, NoSearch, ObjectiveFunction,
    SearchContext, SearchFunction, SearchPhase, TerminationFunction,
};
use crate::progress::ProgressReporter;
use crate::sample::SampleIterator;

/// Common surface of every optimization function.
pub trait Optimizer: Send {
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// Late-bind roles; fields absent from `binding` keep their current value.
    fn bind(&mut self, binding: FunctionBinding) -> OptResult<()>;

    /// Run one search starting from `initial`, or from the bound default
    /// variable when `None`.
    fn optimize(&mut self, initial: Option<&[f64]>) -> OptResult<OptimizationResult>;

    /// The sample the function reports while its owner is still being set up.
    fn initialization_sample(&mut self, default: &[f64]) -> OptResult<Sample>;

    fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>);
}

/// Owns the pluggable roles and runs the search loop.
///
/// Roles not supplied at construction are filled with placeholders: an
/// objective returning `0.0`, an identity search, a termination function
/// that never takes a step and a single-point search space. The first run
/// reports which placeholders are still in place.
pub struct OptimizationFunction {
    config: OptimizationConfig,
    objective: ObjectiveFunction,
    gradient: Option<GradientFunction>,
    search_function: Box<dyn SearchFunction>,
    termination: Box<dyn TerminationFunction>,
    search_space: Vec<SampleIterator>,
    search_space_bound: bool,
    default_variable: Option<Sample>,
    unspecified: Vec<FunctionRole>,
    saved_samples: Vec<Sample>,
    saved_values: Vec<f64>,
    iterations: usize,
    progress: Option<Box<dyn ProgressReporter>>,
}

impl OptimizationFunction {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            config,
            objective: ObjectiveFunction::new(|_| 0.0),
            gradient: None,
            search_function: Box::new(IdentitySearch),
            termination: Box::new(NoSearch),
            search_space: vec![placeholder_dimension()],
            search_space_bound: false,
            default_variable: None,
            unspecified: vec![
                FunctionRole::ObjectiveFunction,
                FunctionRole::SearchFunction,
                FunctionRole::SearchTerminationFunction,
                FunctionRole::SearchSpace,
            ],
            saved_samples: Vec::new(),
            saved_values: Vec::new(),
            iterations: 0,
            progress: None,
        }
    }

    pub fn with_binding(config: OptimizationConfig, binding: FunctionBinding) -> OptResult<Self> {
        let mut function = Self::new(config);
        function.bind(binding)?;
        Ok(function)
    }

    /// Replace the roles present in `binding`.
    pub fn bind(&mut self, binding: FunctionBinding) -> OptResult<()> {
        if let Some(space) = &binding.search_space {
            if space.is_empty() {
                return Err(evc_types::config_error!(
                    self.config.name,
                    "search_space must have at least one dimension"
                ));
            }
        }
        let space = match &binding.search_space {
            Some(space) => Some(space.as_slice()),
            None if self.search_space_bound => Some(self.search_space.as_slice()),
            None => None,
        };
        if let (Some(default), Some(space)) = (&binding.default_variable, space) {
            if default.len() != space.len() {
                return Err(evc_types::OptimizationError::DimensionMismatch {
                    expected: space.len(),
                    actual: default.len(),
                });
            }
        }
        // A newly bound space must still fit a default variable bound earlier.
        if let (None, Some(space), Some(default)) = (
            &binding.default_variable,
            &binding.search_space,
            &self.default_variable,
        ) {
            if default.len() != space.len() {
                return Err(evc_types::OptimizationError::DimensionMismatch {
                    expected: space.len(),
                    actual: default.len(),
                });
            }
        }

        if let Some(default) = binding.default_variable {
            self.default_variable = Some(default);
        }
        if let Some(objective) = binding.objective_function {
            self.objective = objective;
            // A gradient belongs to the objective it was derived from.
            self.gradient = binding.gradient_function;
            self.waive(FunctionRole::ObjectiveFunction);
        } else if let Some(gradient) = binding.gradient_function {
            self.gradient = Some(gradient);
        }
        if let Some(search) = binding.search_function {
            self.search_function = search;
            self.waive(FunctionRole::SearchFunction);
        }
        if let Some(termination) = binding.search_termination_function {
            self.termination = termination;
            self.waive(FunctionRole::SearchTerminationFunction);
        }
        if let Some(space) = binding.search_space {
            self.search_space = space;
            self.search_space_bound = true;
            self.waive(FunctionRole::SearchSpace);
        }
        Ok(())
    }

    /// Run the search loop from `initial`.
    ///
    /// The initial sample is evaluated once as a probe; every later
    /// evaluation is a regular search sample. The returned sample and value
    /// are the last ones visited; specializations select their own optimum.
    pub fn optimize(&mut self, initial: &[f64]) -> OptResult<OptimizationResult> {
        let owner = self.config.name.clone();
        let mut warnings = Vec::new();
        if let Some(warning) = self.take_unspecified_warning() {
            warnings.push(warning);
        }

        self.saved_samples.clear();
        self.saved_values.clear();
        self.iterations = 0;

        let objective_bound = self.objective_bound();
        {
            let mut ctx = SearchContext::new(
                &owner,
                SearchPhase::Running,
                &mut self.search_space,
                &self.objective,
                objective_bound,
                self.gradient.as_ref(),
                &mut warnings,
            );
            self.search_function.reset(&mut ctx)?;
        }
        self.termination.reset(&owner, &self.search_space)?;

        let mut current_sample = initial.to_vec();
        let mut current_value = {
            let _span = debug_span!("probe", owner = %owner).entered();
            self.objective.probe(&current_sample)
        };

        let total = match (self.termination.expected_iterations(), self.config.max_iterations) {
            (Some(expected), Some(max_iterations)) => Some(expected.min(max_iterations)),
            (expected, _) => expected,
        };
        if let Some(progress) = self.progress.as_mut() {
            progress.on_start(&owner, total);
        }

        let mut iteration = 0;
        while self
            .termination
            .should_continue(&current_sample, current_value, iteration)
        {
            if let Some(max_iterations) = self.config.max_iterations {
                if iteration >= max_iterations {
                    let warning = OptimizationWarning::ConvergenceFailure {
                        owner: owner.clone(),
                        max_iterations,
                    };
                    warn!(owner = %owner, "{}", warning);
                    warnings.push(warning);
                    break;
                }
            }

            let new_sample = {
                let mut ctx = SearchContext::new(
                    &owner,
                    SearchPhase::Running,
                    &mut self.search_space,
                    &self.objective,
                    objective_bound,
                    self.gradient.as_ref(),
                    &mut warnings,
                );
                self.search_function
                    .search(&mut ctx, &current_sample, iteration)?
            };
            let new_value = self.objective.evaluate(&new_sample);
            debug!(owner = %owner, iteration, value = new_value, "search step");

            if self.config.save_samples {
                self.saved_samples.push(new_sample.clone());
            }
            if self.config.save_values {
                self.saved_values.push(new_value);
            }
            if let Some(progress) = self.progress.as_mut() {
                progress.on_iteration(iteration, new_value);
            }

            iteration += 1;
            current_sample = new_sample;
            current_value = new_value;
        }

        self.iterations = iteration;
        if let Some(progress) = self.progress.as_mut() {
            progress.on_finish(iteration);
        }
        info!(
            owner = %owner,
            iterations = iteration,
            value = current_value,
            "optimization finished"
        );

        Ok(OptimizationResult {
            sample: current_sample,
            value: current_value,
            saved_samples: self.saved_samples.clone(),
            saved_values: self.saved_values.clone(),
            iterations: iteration,
            warnings,
        })
    }

    /// Optimize from the bound default variable, or from the search space's
    /// first point when none was bound.
    pub fn run(&mut self) -> OptResult<OptimizationResult> {
        let initial = self.starting_sample();
        self.optimize(&initial)
    }

    pub(crate) fn starting_sample(&self) -> Sample {
        self.default_variable
            .clone()
            .unwrap_or_else(|| self.search_space.iter().map(SampleIterator::begin).collect())
    }

    /// Ask the search function for its sample without running a search.
    pub fn initialization_sample(&mut self, default: &[f64]) -> OptResult<Sample> {
        let owner = self.config.name.clone();
        let objective_bound = self.objective_bound();
        let mut warnings = Vec::new();
        let mut ctx = SearchContext::new(
            &owner,
            SearchPhase::Initializing,
            &mut self.search_space,
            &self.objective,
            objective_bound,
            self.gradient.as_ref(),
            &mut warnings,
        );
        self.search_function.search(&mut ctx, default, 0)
    }

    /// Number of points in the search space, `None` if any dimension is
    /// unbounded.
    pub fn search_space_size(&self) -> Option<usize> {
        self.search_space
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(dim.num_steps()?))
    }

    pub fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.progress = Some(reporter);
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn search_space(&self) -> &[SampleIterator] {
        &self.search_space
    }

    pub fn default_variable(&self) -> Option<&[f64]> {
        self.default_variable.as_deref()
    }

    /// Samples saved by the last run; empty unless `save_samples` is set.
    pub fn saved_samples(&self) -> &[Sample] {
        &self.saved_samples
    }

    /// Values saved by the last run; empty unless `save_values` is set.
    pub fn saved_values(&self) -> &[f64] {
        &self.saved_values
    }

    /// Iterations executed by the last run.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Roles still held by placeholders.
    pub fn unspecified_roles(&self) -> &[FunctionRole] {
        &self.unspecified
    }

    pub(crate) fn objective(&self) -> &ObjectiveFunction {
        &self.objective
    }

    pub(crate) fn objective_bound(&self) -> bool {
        !self.unspecified.contains(&FunctionRole::ObjectiveFunction)
    }

    pub(crate) fn search_space_mut(&mut self) -> &mut [SampleIterator] {
        &mut self.search_space
    }

    pub(crate) fn progress_mut(&mut self) -> Option<&mut (dyn ProgressReporter + 'static)> {
        self.progress.as_deref_mut()
    }

    pub(crate) fn record_trajectory(&mut self, samples: Vec<Sample>, values: Vec<f64>) {
        self.iterations = values.len();
        self.saved_samples = if self.config.save_samples {
            samples
        } else {
            Vec::new()
        };
        self.saved_values = if self.config.save_values {
            values
        } else {
            Vec::new()
        };
    }

    /// Mark a role as intentionally left to its placeholder.
    pub(crate) fn waive(&mut self, role: FunctionRole) {
        self.unspecified.retain(|r| *r != role);
    }

    /// One-time report of roles still held by placeholders.
    pub(crate) fn take_unspecified_warning(&mut self) -> Option<OptimizationWarning> {
        if self.unspecified.is_empty() {
            return None;
        }
        let warning = OptimizationWarning::UnspecifiedDefaults {
            owner: self.config.name.clone(),
            roles: std::mem::take(&mut self.unspecified),
        };
        warn!(owner = %self.config.name, "{}", warning);
        Some(warning)
    }
}

fn placeholder_dimension() -> SampleIterator {
    SampleIterator::constant(0.0)
}

impl std::fmt::Debug for OptimizationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationFunction")
            .field("config", &self.config)
            .field("search_space", &self.search_space)
            .field("default_variable", &self.default_variable)
            .field("unspecified", &self.unspecified)
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl Optimizer for OptimizationFunction {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn direction(&self) -> Direction {
        self.config.direction
    }

    fn bind(&mut self, binding: FunctionBinding) -> OptResult<()> {
        OptimizationFunction::bind(self, binding)
    }

    fn optimize(&mut self, initial: Option<&[f64]>) -> OptResult<OptimizationResult> {
        match initial {
            Some(initial) => OptimizationFunction::optimize(self, initial),
            None => self.run(),
        }
    }

    fn initialization_sample(&mut self, default: &[f64]) -> OptResult<Sample> {
        OptimizationFunction::initialization_sample(self, default)
    }

    fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        OptimizationFunction::set_progress_reporter(self, reporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{search_fn, termination_fn};
    use crate::progress::{ChannelProgress, ProgressEvent};
    use evc_types::EvaluationPhase;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_search() -> FunctionBinding {
        FunctionBinding::new()
            .objective(|s| s[0])
            .search_function(search_fn(|s, _| vec![s[0] + 1.0]))
            .search_termination_function(termination_fn(|_, value, _| value < 5.0))
            .search_space(vec![SampleIterator::from_values(vec![0.0]).unwrap()])
    }

    #[test]
    fn check_then_step_loop() {
        let config = OptimizationConfig::new("counter")
            .with_save_samples(true)
            .with_save_values(true);
        let mut function = OptimizationFunction::with_binding(config, counting_search()).unwrap();

        let result = function.optimize(&[0.0]).unwrap();
        assert_eq!(result.sample, vec![5.0]);
        assert_eq!(result.value, 5.0);
        assert_eq!(result.iterations, 5);
        assert_eq!(result.saved_values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn max_iterations_degrades_to_warning() {
        let config = OptimizationConfig::new("endless")
            .with_max_iterations(10)
            .with_save_values(true);
        let binding = FunctionBinding::new()
            .objective(|s| s[0])
            .search_function(search_fn(|s, _| vec![s[0] + 1.0]))
            .search_termination_function(termination_fn(|_, _, _| true))
            .search_space(vec![SampleIterator::from_values(vec![0.0]).unwrap()]);
        let mut function = OptimizationFunction::with_binding(config, binding).unwrap();

        let result = function.optimize(&[0.0]).unwrap();
        assert_eq!(result.iterations, 10);
        assert_eq!(result.saved_values.len(), 10);
        assert!(!result.converged());
    }

    #[test]
    fn save_flags_control_trajectory() {
        let mut function = OptimizationFunction::with_binding(
            OptimizationConfig::new("quiet"),
            counting_search(),
        )
        .unwrap();
        let result = function.optimize(&[0.0]).unwrap();
        assert!(result.saved_samples.is_empty());
        assert!(result.saved_values.is_empty());
        assert!(function.saved_values().is_empty());
    }

    #[test]
    fn probe_is_tagged_and_not_saved() {
        let probes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&probes);
        let binding = counting_search().objective_function(ObjectiveFunction::phase_aware(
            move |s, phase| {
                if phase == EvaluationPhase::Probe {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                s[0]
            },
        ));
        let config = OptimizationConfig::new("probe").with_save_values(true);
        let mut function = OptimizationFunction::with_binding(config, binding).unwrap();

        let result = function.optimize(&[3.0]).unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(result.saved_values, vec![4.0, 5.0]);
    }

    #[test]
    fn placeholders_stop_immediately_and_warn_once() {
        let mut function = OptimizationFunction::new(OptimizationConfig::default());
        assert_eq!(function.unspecified_roles().len(), 4);

        let result = function.optimize(&[1.0]).unwrap();
        assert_eq!(result.iterations, 0);
        assert_eq!(result.sample, vec![1.0]);
        assert_eq!(result.value, 0.0);
        assert!(matches!(
            result.warnings.as_slice(),
            [OptimizationWarning::UnspecifiedDefaults { roles, .. }] if roles.len() == 4
        ));

        let again = function.optimize(&[1.0]).unwrap();
        assert!(again.warnings.is_empty());
    }

    #[test]
    fn rebinding_keeps_absent_fields() {
        let mut function = OptimizationFunction::new(OptimizationConfig::new("late"));
        function
            .bind(FunctionBinding::new().objective(|s| s[0] * 2.0))
            .unwrap();
        assert_eq!(function.unspecified_roles().len(), 3);

        function.bind(counting_search()).unwrap();
        assert!(function.unspecified_roles().is_empty());

        function
            .bind(FunctionBinding::new().default_variable(vec![4.0]))
            .unwrap();
        // objective from counting_search is kept: 4 -> 5 stops at value 5
        let result = function.run().unwrap();
        assert_eq!(result.sample, vec![5.0]);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn empty_search_space_rejected() {
        let mut function = OptimizationFunction::new(OptimizationConfig::new("empty"));
        let err = function
            .bind(FunctionBinding::new().search_space(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, evc_types::OptimizationError::Configuration { .. }));
    }

    #[test]
    fn default_variable_must_match_space() {
        let mut function = OptimizationFunction::new(OptimizationConfig::new("dims"));
        let err = function
            .bind(
                FunctionBinding::new()
                    .default_variable(vec![0.0, 0.0])
                    .search_space(vec![SampleIterator::from_values(vec![0.0]).unwrap()]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            evc_types::OptimizationError::DimensionMismatch {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn progress_sees_only_search_samples() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut function = OptimizationFunction::with_binding(
            OptimizationConfig::new("progress"),
            counting_search(),
        )
        .unwrap();
        function.set_progress_reporter(Box::new(ChannelProgress::new(tx)));

        function.optimize(&[3.0]).unwrap();
        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ProgressEvent::Started { total: None, .. }));
        assert_eq!(events[3], ProgressEvent::Finished { iterations: 2 });
    }

    #[test]
    fn open_ended_search_reports_unknown_total() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut function = OptimizationFunction::with_binding(
            OptimizationConfig::new("climb").with_max_iterations(1000),
            counting_search(),
        )
        .unwrap();
        function.set_progress_reporter(Box::new(ChannelProgress::new(tx)));

        function.optimize(&[0.0]).unwrap();
        let started = rx.try_iter().next();
        assert!(matches!(started, Some(ProgressEvent::Started { total: None, .. })));
    }

    #[test]
    fn late_default_variable_checked_against_bound_space() {
        let mut function =
            OptimizationFunction::with_binding(OptimizationConfig::new("dims"), counting_search())
                .unwrap();
        let err = function
            .bind(FunctionBinding::new().default_variable(vec![1.0, 2.0]))
            .unwrap_err();
        assert_eq!(
            err,
            evc_types::OptimizationError::DimensionMismatch {
                expected: 1,
                actual: 2
            }
        );
        assert_eq!(function.default_variable(), None);

        function
            .bind(FunctionBinding::new().default_variable(vec![2.0]))
            .unwrap();
        let err = function
            .bind(FunctionBinding::new().search_space(vec![
                SampleIterator::from_values(vec![0.0]).unwrap(),
                SampleIterator::from_values(vec![0.0]).unwrap(),
            ]))
            .unwrap_err();
        assert!(matches!(err, evc_types::OptimizationError::DimensionMismatch { .. }));
    }

    #[test]
    fn default_variable_before_space_is_accepted() {
        let mut function = OptimizationFunction::new(OptimizationConfig::new("early"));
        function
            .bind(FunctionBinding::new().default_variable(vec![1.0, 2.0]))
            .unwrap();
        assert_eq!(function.default_variable(), Some(&[1.0, 2.0][..]));
    }
}
