//! Optimization control mechanism: chooses the allocation policy that
//! maximizes an evaluation function over the signals' allocation samples.
//!
//! Every [`OptimizationControlMechanism::execute`] call rebuilds the search
//! space from the current control signals, late-binds the owned optimizer
//! with it and runs one search. The winning policy is written back to the
//! signals, and the evaluated policies are kept as [`EvcRecord`]s until the
//! next execution.

use std::sync::Arc;

use evc_optimizer::{
    CartesianGrid, DotProgress, FunctionBinding, ObjectiveFunction, Optimizer, SampleIterator,
};
use evc_types::{
    ControlError, ControlResult, MechanismConfig, OptimizationError, OptimizationResult, Sample,
};
use tracing::{debug, info};

use crate::evaluation::{EvaluationFunction, EvcRecord};
use crate::signal::{ControlSignal, IntensityCost};

pub struct OptimizationControlMechanism {
    config: MechanismConfig,
    function: Box<dyn Optimizer>,
    control_signals: Vec<ControlSignal>,
    evaluation_function: Option<Arc<dyn EvaluationFunction>>,
    evc: Option<f64>,
    last_result: Option<OptimizationResult>,
    evaluations: Vec<EvcRecord>,
}

impl OptimizationControlMechanism {
    pub fn new(config: MechanismConfig, mut function: Box<dyn Optimizer>) -> Self {
        if config.report_progress {
            function.set_progress_reporter(Box::new(DotProgress::stderr()));
        }
        Self {
            config,
            function,
            control_signals: Vec::new(),
            evaluation_function: None,
            evc: None,
            last_result: None,
            evaluations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Add a signal; names must be unique within the mechanism.
    pub fn add_control_signal(&mut self, signal: ControlSignal) -> ControlResult<()> {
        if self.control_signals.iter().any(|s| s.name() == signal.name()) {
            return Err(ControlError::InvalidSignal {
                name: signal.name().to_string(),
                message: format!("{} already has a signal with this name", self.config.name),
            });
        }
        self.control_signals.push(signal);
        Ok(())
    }

    pub fn with_control_signal(mut self, signal: ControlSignal) -> ControlResult<Self> {
        self.add_control_signal(signal)?;
        Ok(self)
    }

    pub fn set_evaluation_function(&mut self, evaluation: Arc<dyn EvaluationFunction>) {
        self.evaluation_function = Some(evaluation);
    }

    pub fn control_signals(&self) -> &[ControlSignal] {
        &self.control_signals
    }

    /// Current allocation of every signal, in signal order.
    pub fn allocation_policy(&self) -> Sample {
        self.control_signals
            .iter()
            .map(ControlSignal::allocation)
            .collect()
    }

    /// EVC of the policy chosen by the last execution.
    pub fn evc(&self) -> Option<f64> {
        self.evc
    }

    pub fn last_result(&self) -> Option<&OptimizationResult> {
        self.last_result.as_ref()
    }

    /// Policies scored by the last execution, in generation order.
    ///
    /// Empty unless the optimizer saves both samples and values.
    pub fn evaluations(&self) -> &[EvcRecord] {
        &self.evaluations
    }

    /// Intensity cost of every signal, in signal order.
    pub fn costs(&self) -> Vec<IntensityCost> {
        self.control_signals
            .iter()
            .map(ControlSignal::cost_function)
            .collect()
    }

    pub fn function(&self) -> &dyn Optimizer {
        self.function.as_ref()
    }

    /// One search dimension per control signal.
    pub fn search_space(&self) -> Vec<SampleIterator> {
        self.control_signals
            .iter()
            .map(|s| s.allocation_samples().clone())
            .collect()
    }

    /// Number of distinct allocation policies.
    pub fn search_space_size(&self) -> usize {
        if self.control_signals.is_empty() {
            return 0;
        }
        self.control_signals
            .iter()
            .filter_map(|s| s.allocation_samples().num_steps())
            .product()
    }

    /// Every allocation policy: one entry per signal, the last signal
    /// varying fastest.
    pub fn allocation_policy_search_space(&self) -> ControlResult<Vec<Sample>> {
        let mut space = self.search_space();
        let grid = CartesianGrid::from_space(&mut space).map_err(OptimizationError::from)?;
        Ok(grid.collect())
    }

    /// Wire the current policy, evaluation function and search space into the
    /// optimizer.
    pub fn bind_function(&mut self) -> ControlResult<()> {
        if self.control_signals.is_empty() {
            return Err(ControlError::NoControlSignals {
                mechanism: self.config.name.clone(),
            });
        }
        let evaluation = self.evaluation_function.clone().ok_or_else(|| {
            ControlError::MissingEvaluationFunction {
                mechanism: self.config.name.clone(),
            }
        })?;

        let costs: Arc<[IntensityCost]> = self.costs().into();
        let objective = ObjectiveFunction::new(move |policy| evaluation.evaluate(policy, &costs));
        let binding = FunctionBinding::new()
            .default_variable(self.allocation_policy())
            .objective_function(objective)
            .search_space(self.search_space());
        self.function.bind(binding)?;
        debug!(
            mechanism = %self.config.name,
            signals = self.control_signals.len(),
            policies = self.search_space_size(),
            "optimizer bound"
        );
        Ok(())
    }

    /// The policy the optimizer reports before any search has run.
    pub fn initialize(&mut self) -> ControlResult<Sample> {
        self.bind_function()?;
        let current = self.allocation_policy();
        Ok(self.function.initialization_sample(&current)?)
    }

    /// Search for the best allocation policy and adopt it.
    pub fn execute(&mut self) -> ControlResult<Sample> {
        self.evaluations.clear();
        self.bind_function()?;
        let result = self.function.optimize(None)?;

        if result.sample.len() != self.control_signals.len() {
            return Err(OptimizationError::DimensionMismatch {
                expected: self.control_signals.len(),
                actual: result.sample.len(),
            }
            .into());
        }
        for (signal, allocation) in self.control_signals.iter_mut().zip(&result.sample) {
            signal.set_allocation(*allocation);
        }

        info!(
            mechanism = %self.config.name,
            optimizer = self.function.name(),
            evc = result.value,
            policy = ?result.sample,
            evaluated = result.iterations,
            "allocation policy selected"
        );
        let costs = self.costs();
        self.evaluations = result
            .saved_samples
            .iter()
            .zip(&result.saved_values)
            .map(|(policy, evc)| EvcRecord::from_evc(policy.clone(), *evc, &costs))
            .collect::<ControlResult<Vec<_>>>()?;

        let policy = result.sample.clone();
        self.evc = Some(result.value);
        self.last_result = Some(result);
        Ok(policy)
    }
}

impl std::fmt::Debug for OptimizationControlMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationControlMechanism")
            .field("config", &self.config)
            .field("optimizer", &self.function.name())
            .field("control_signals", &self.control_signals)
            .field("evc", &self.evc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{evaluation_fn, EvcEvaluator};
    use approx::assert_abs_diff_eq;
    use evc_optimizer::GridSearch;
    use evc_types::GridConfig;

    fn grid_mechanism() -> OptimizationControlMechanism {
        let grid = GridSearch::new(GridConfig::default()).unwrap();
        OptimizationControlMechanism::new(MechanismConfig::new("evc"), Box::new(grid))
            .with_control_signal(ControlSignal::from_values("a", vec![0.0, 1.0, 2.0]).unwrap())
            .unwrap()
            .with_control_signal(ControlSignal::from_values("b", vec![10.0, 20.0]).unwrap())
            .unwrap()
    }

    #[test]
    fn policy_space_is_cartesian_product() {
        let mechanism = grid_mechanism();
        assert_eq!(mechanism.search_space_size(), 6);
        let policies = mechanism.allocation_policy_search_space().unwrap();
        assert_eq!(policies.len(), 6);
        assert_eq!(policies[0], vec![0.0, 10.0]);
        assert_eq!(policies[1], vec![0.0, 20.0]);
        assert_eq!(policies[5], vec![2.0, 20.0]);
    }

    #[test]
    fn execute_requires_evaluation_function() {
        let mut mechanism = grid_mechanism();
        let err = mechanism.execute().unwrap_err();
        assert_eq!(
            err,
            ControlError::MissingEvaluationFunction {
                mechanism: "evc".into()
            }
        );
    }

    #[test]
    fn execute_requires_signals() {
        let grid = GridSearch::new(GridConfig::default()).unwrap();
        let mut mechanism =
            OptimizationControlMechanism::new(MechanismConfig::default(), Box::new(grid));
        mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| p[0])));
        assert!(matches!(
            mechanism.execute(),
            Err(ControlError::NoControlSignals { .. })
        ));
    }

    #[test]
    fn duplicate_signal_names_rejected() {
        let mut mechanism = grid_mechanism();
        let err = mechanism
            .add_control_signal(ControlSignal::from_values("a", vec![5.0]).unwrap())
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidSignal { .. }));
    }

    #[test]
    fn execute_adopts_best_policy() {
        let mut mechanism = grid_mechanism();
        mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| p.iter().sum())));

        let policy = mechanism.execute().unwrap();
        assert_eq!(policy, vec![2.0, 20.0]);
        assert_eq!(mechanism.evc(), Some(22.0));
        assert_eq!(mechanism.allocation_policy(), vec![2.0, 20.0]);
        assert_eq!(mechanism.control_signals()[1].allocation(), 20.0);
        assert_eq!(mechanism.last_result().unwrap().saved_values.len(), 6);
    }

    #[test]
    fn signal_costs_shift_the_optimum() {
        let grid = GridSearch::new(GridConfig::default()).unwrap();
        let mut mechanism =
            OptimizationControlMechanism::new(MechanismConfig::new("evc"), Box::new(grid))
                .with_control_signal(
                    ControlSignal::from_values("a", vec![0.0, 1.0, 2.0])
                        .unwrap()
                        .with_cost(|_| 0.0),
                )
                .unwrap()
                .with_control_signal(
                    ControlSignal::from_values("b", vec![0.0, 1.0, 2.0])
                        .unwrap()
                        .with_cost(|b| 100.0 * b),
                )
                .unwrap();
        mechanism.set_evaluation_function(Arc::new(EvcEvaluator::new(|p: &[f64]| p[0] + p[1])));

        // Without the cost of b the best policy would be [2, 2].
        let policy = mechanism.execute().unwrap();
        assert_eq!(policy, vec![2.0, 0.0]);
        assert_eq!(mechanism.evc(), Some(2.0));

        let records = mechanism.evaluations();
        assert_eq!(records.len(), 9);
        assert_eq!(records[8].policy, vec![2.0, 2.0]);
        assert_abs_diff_eq!(records[8].cost, 200.0);
        assert_abs_diff_eq!(records[8].outcome, 4.0);
        assert_abs_diff_eq!(records[8].evc, -196.0);
    }

    #[test]
    fn evaluations_are_replaced_by_each_execution() {
        let mut mechanism = grid_mechanism();
        mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| p.iter().sum())));
        for _ in 0..3 {
            mechanism.execute().unwrap();
            assert_eq!(mechanism.evaluations().len(), 6);
        }
    }

    #[test]
    fn initialize_reports_first_policy() {
        let mut mechanism = grid_mechanism();
        mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| p[0])));
        assert_eq!(mechanism.initialize().unwrap(), vec![0.0, 10.0]);
    }
}
