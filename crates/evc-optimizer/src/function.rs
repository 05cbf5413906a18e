//! Pluggable roles of an optimization function and the binding record used
//! to wire them in after construction.

use std::fmt;
use std::sync::Arc;

use evc_types::{EvaluationPhase, OptResult, OptimizationWarning, Sample};
use tracing::warn;

use crate::sample::SampleIterator;

/// The function being maximized or minimized.
///
/// Must be a pure function of its sample and safe to call from several
/// workers at once.
#[derive(Clone)]
pub struct ObjectiveFunction {
    inner: Arc<dyn Fn(&[f64], EvaluationPhase) -> f64 + Send + Sync>,
}

impl ObjectiveFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(move |sample: &[f64], _phase: EvaluationPhase| f(sample)),
        }
    }

    /// An objective that is told whether a call is a probe or a search
    /// sample, for collaborators that record evaluations.
    pub fn phase_aware<F>(f: F) -> Self
    where
        F: Fn(&[f64], EvaluationPhase) -> f64 + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn call(&self, sample: &[f64], phase: EvaluationPhase) -> f64 {
        (self.inner)(sample, phase)
    }

    pub fn evaluate(&self, sample: &[f64]) -> f64 {
        self.call(sample, EvaluationPhase::Search)
    }

    pub fn probe(&self, sample: &[f64]) -> f64 {
        self.call(sample, EvaluationPhase::Probe)
    }
}

impl fmt::Debug for ObjectiveFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObjectiveFunction(<fn>)")
    }
}

/// Analytic gradient of an objective function.
#[derive(Clone)]
pub struct GradientFunction {
    inner: Arc<dyn Fn(&[f64]) -> Sample + Send + Sync>,
}

impl GradientFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[f64]) -> Sample + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn call(&self, sample: &[f64]) -> Sample {
        (self.inner)(sample)
    }
}

impl fmt::Debug for GradientFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GradientFunction(<fn>)")
    }
}

/// Whether the search is being primed or actually running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Initializing,
    Running,
}

/// Everything a search function may consult while producing a sample.
pub struct SearchContext<'a> {
    pub owner: &'a str,
    pub phase: SearchPhase,
    pub search_space: &'a mut [SampleIterator],
    pub objective: &'a ObjectiveFunction,
    /// `false` while the objective is still the unbound placeholder.
    pub objective_bound: bool,
    pub gradient: Option<&'a GradientFunction>,
    warnings: &'a mut Vec<OptimizationWarning>,
}

impl<'a> SearchContext<'a> {
    pub(crate) fn new(
        owner: &'a str,
        phase: SearchPhase,
        search_space: &'a mut [SampleIterator],
        objective: &'a ObjectiveFunction,
        objective_bound: bool,
        gradient: Option<&'a GradientFunction>,
        warnings: &'a mut Vec<OptimizationWarning>,
    ) -> Self {
        Self {
            owner,
            phase,
            search_space,
            objective,
            objective_bound,
            gradient,
            warnings,
        }
    }

    /// Log a non-fatal anomaly and attach it to the run's result.
    pub fn warn(&mut self, warning: OptimizationWarning) {
        warn!(owner = self.owner, "{}", warning);
        self.warnings.push(warning);
    }
}

/// Produces the next sample from the current one.
pub trait SearchFunction: Send {
    /// Called once at the start of every `optimize` call.
    fn reset(&mut self, _ctx: &mut SearchContext<'_>) -> OptResult<()> {
        Ok(())
    }

    fn search(
        &mut self,
        ctx: &mut SearchContext<'_>,
        sample: &[f64],
        iteration: usize,
    ) -> OptResult<Sample>;
}

/// Decides whether the search loop takes another step.
pub trait TerminationFunction: Send {
    /// Called once at the start of every `optimize` call.
    fn reset(&mut self, _owner: &str, _search_space: &[SampleIterator]) -> OptResult<()> {
        Ok(())
    }

    /// `true` to keep searching.
    fn should_continue(&mut self, sample: &[f64], value: f64, iteration: usize) -> bool;

    /// Iterations the run will take, when known once `reset` has returned.
    fn expected_iterations(&self) -> Option<usize> {
        None
    }
}

/// Adapts a closure `(sample, iteration) -> sample` into a search function.
pub struct SearchFn<F>(F);

pub fn search_fn<F>(f: F) -> SearchFn<F>
where
    F: FnMut(&[f64], usize) -> Sample + Send,
{
    SearchFn(f)
}

impl<F> SearchFunction for SearchFn<F>
where
    F: FnMut(&[f64], usize) -> Sample + Send,
{
    fn search(
        &mut self,
        _ctx: &mut SearchContext<'_>,
        sample: &[f64],
        iteration: usize,
    ) -> OptResult<Sample> {
        Ok((self.0)(sample, iteration))
    }
}

/// Adapts a closure `(sample, value, iteration) -> bool` into a termination
/// function.
pub struct TerminationFn<F>(F);

pub fn termination_fn<F>(f: F) -> TerminationFn<F>
where
    F: FnMut(&[f64], f64, usize) -> bool + Send,
{
    TerminationFn(f)
}

impl<F> TerminationFunction for TerminationFn<F>
where
    F: FnMut(&[f64], f64, usize) -> bool + Send,
{
    fn should_continue(&mut self, sample: &[f64], value: f64, iteration: usize) -> bool {
        (self.0)(sample, value, iteration)
    }
}

/// Placeholder search: returns the sample unchanged.
pub(crate) struct IdentitySearch;

impl SearchFunction for IdentitySearch {
    fn search(
        &mut self,
        _ctx: &mut SearchContext<'_>,
        sample: &[f64],
        _iteration: usize,
    ) -> OptResult<Sample> {
        Ok(sample.to_vec())
    }
}

/// Placeholder termination: never takes a step.
pub(crate) struct NoSearch;

impl TerminationFunction for NoSearch {
    fn should_continue(&mut self, _sample: &[f64], _value: f64, _iteration: usize) -> bool {
        false
    }
}

/// Late-binding record for an optimization function.
///
/// Only the fields that are set replace what the function already holds.
#[derive(Default)]
pub struct FunctionBinding {
    pub(crate) default_variable: Option<Sample>,
    pub(crate) objective_function: Option<ObjectiveFunction>,
    pub(crate) gradient_function: Option<GradientFunction>,
    pub(crate) search_function: Option<Box<dyn SearchFunction>>,
    pub(crate) search_termination_function: Option<Box<dyn TerminationFunction>>,
    pub(crate) search_space: Option<Vec<SampleIterator>>,
}

impl FunctionBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial sample used when `optimize` is called without one.
    pub fn default_variable(mut self, sample: Sample) -> Self {
        self.default_variable = Some(sample);
        self
    }

    pub fn objective_function(mut self, objective: ObjectiveFunction) -> Self {
        self.objective_function = Some(objective);
        self
    }

    pub fn objective<F>(self, f: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        self.objective_function(ObjectiveFunction::new(f))
    }

    pub fn gradient_function(mut self, gradient: GradientFunction) -> Self {
        self.gradient_function = Some(gradient);
        self
    }

    pub fn search_function(mut self, search: impl SearchFunction + 'static) -> Self {
        self.search_function = Some(Box::new(search));
        self
    }

    pub fn search_termination_function(
        mut self,
        termination: impl TerminationFunction + 'static,
    ) -> Self {
        self.search_termination_function = Some(Box::new(termination));
        self
    }

    pub fn search_space(mut self, space: Vec<SampleIterator>) -> Self {
        self.search_space = Some(space);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.default_variable.is_none()
            && self.objective_function.is_none()
            && self.gradient_function.is_none()
            && self.search_function.is_none()
            && self.search_termination_function.is_none()
            && self.search_space.is_none()
    }
}

impl fmt::Debug for FunctionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionBinding")
            .field("default_variable", &self.default_variable)
            .field("objective_function", &self.objective_function.is_some())
            .field("gradient_function", &self.gradient_function.is_some())
            .field("search_function", &self.search_function.is_some())
            .field(
                "search_termination_function",
                &self.search_termination_function.is_some(),
            )
            .field("search_space", &self.search_space.as_ref().map(Vec::len))
            .finish()
    }
}
