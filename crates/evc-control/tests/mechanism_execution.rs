use std::sync::Arc;

use anyhow::Result;
use approx::assert_abs_diff_eq;
use evc_control::{evaluation_fn, ControlSignal, EvcEvaluator, OptimizationControlMechanism};
use evc_optimizer::{
    ChannelProgress, GaussianProcess, GradientOptimization, GridSearch, Optimizer, ProgressEvent,
    SampleSpec, UniformProposal,
};
use evc_types::{
    from_json_str, ConvergenceCriterion, GaussianProcessConfig, GradientConfig, GridConfig,
    MechanismConfig,
};

#[test]
fn partitioned_grid_mechanism_maximizes_evc() -> Result<()> {
    evc_types::logging::init_test_logging();
    let config: MechanismConfig = from_json_str(r#"{"name": "stroop-control"}"#)?;
    let grid = GridSearch::new(from_json_str::<GridConfig>(r#"{"workers": 2}"#)?)?;

    let gain = ControlSignal::from_spec("gain", &SampleSpec::range(0.0, 2.0, 0.5)?)?;
    let bias = ControlSignal::from_values("bias", vec![-1.0, 0.0, 1.0])?.with_cost(|b| b.abs());
    let evaluator = Arc::new(EvcEvaluator::new(|p: &[f64]| 4.0 * p[0] - p[1] * p[1]));

    let mut mechanism = OptimizationControlMechanism::new(config, Box::new(grid))
        .with_control_signal(gain)?
        .with_control_signal(bias)?;
    mechanism.set_evaluation_function(evaluator);

    assert_eq!(mechanism.allocation_policy_search_space()?.len(), 15);
    let policy = mechanism.execute()?;

    // 4g - e^g peaks at g = ln 4, nearest grid value is 1.5.
    assert_eq!(policy, vec![1.5, 0.0]);
    let evc = mechanism.evc().unwrap_or(f64::NAN);
    assert_abs_diff_eq!(evc, 6.0 - 1.5f64.exp(), epsilon = 1e-12);
    assert_eq!(mechanism.evaluations().len(), 15);

    let persisted = serde_json::to_value(mechanism.last_result())?;
    assert_eq!(persisted["saved_values"].as_array().map(Vec::len), Some(15));
    Ok(())
}

#[test]
fn partitioned_evaluations_follow_generation_order() -> Result<()> {
    let grid = GridSearch::new(GridConfig::default().with_workers(4))?;
    let axis = SampleSpec::stepped(0.0, 0.1, 30)?;
    let mut mechanism =
        OptimizationControlMechanism::new(MechanismConfig::new("ordered"), Box::new(grid))
            .with_control_signal(ControlSignal::from_spec("x", &axis)?.with_cost(|x| x * x))?
            .with_control_signal(ControlSignal::from_spec("y", &axis)?)?;
    mechanism.set_evaluation_function(Arc::new(EvcEvaluator::new(|p: &[f64]| {
        (p[0] * 3.0).sin() + p[1].cos()
    })));

    for _ in 0..5 {
        mechanism.execute()?;
        let result = mechanism
            .last_result()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("execute stored no result"))?;
        let records = mechanism.evaluations();
        assert_eq!(records.len(), 900);
        assert_eq!(result.saved_samples.len(), 900);
        for ((record, sample), value) in records
            .iter()
            .zip(&result.saved_samples)
            .zip(&result.saved_values)
        {
            assert_eq!(&record.policy, sample);
            assert_eq!(record.evc, *value);
            assert_abs_diff_eq!(record.outcome - record.cost, record.evc, epsilon = 1e-9);
        }
    }
    Ok(())
}

#[test]
fn mechanism_signal_costs_are_charged() -> Result<()> {
    let grid = GridSearch::new(GridConfig::default().with_workers(2))?;
    let values: Vec<f64> = (0..50).map(f64::from).collect();
    let mut mechanism =
        OptimizationControlMechanism::new(MechanismConfig::new("charged"), Box::new(grid))
            .with_control_signal(
                ControlSignal::from_values("a", values.clone())?.with_cost(|_| 0.0),
            )?
            .with_control_signal(
                ControlSignal::from_values("b", values)?.with_cost(|b| 100.0 * b),
            )?;
    mechanism.set_evaluation_function(Arc::new(EvcEvaluator::new(|p: &[f64]| p[0] + p[1])));

    assert_eq!(mechanism.execute()?, vec![49.0, 0.0]);
    assert_eq!(mechanism.evc(), Some(49.0));
    Ok(())
}

#[test]
fn gradient_mechanism_follows_evaluation_surface() -> Result<()> {
    let config = GradientConfig::default()
        .with_step_size(0.1)
        .with_convergence(ConvergenceCriterion::Variable, 1e-6);
    let optimizer = GradientOptimization::new(config)?;

    let mut mechanism =
        OptimizationControlMechanism::new(MechanismConfig::new("gradient"), Box::new(optimizer))
            .with_control_signal(ControlSignal::from_values("intensity", vec![0.0, 1.0])?)?;
    mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| -(p[0] - 0.7).powi(2))));

    let policy = mechanism.execute()?;
    assert!((policy[0] - 0.7).abs() < 1e-4);
    assert_eq!(mechanism.control_signals()[0].allocation(), policy[0]);
    Ok(())
}

#[test]
fn proposal_mechanism_stays_within_allocation_bounds() -> Result<()> {
    let process =
        GaussianProcess::new(GaussianProcessConfig::default(), UniformProposal::new(11, 25))?;
    let mut mechanism =
        OptimizationControlMechanism::new(MechanismConfig::new("proposal"), Box::new(process))
            .with_control_signal(ControlSignal::from_values("a", vec![0.0, 0.5, 1.0])?)?
            .with_control_signal(ControlSignal::from_values("b", vec![2.0, 3.0])?)?;
    mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| p[0] * p[1])));

    let policy = mechanism.execute()?;
    assert!((0.0..=1.0).contains(&policy[0]));
    assert!((2.0..=3.0).contains(&policy[1]));
    let result = mechanism.last_result().map(|r| r.saved_values.clone()).unwrap_or_default();
    let best = result.iter().copied().fold(f64::MIN, f64::max);
    assert_eq!(mechanism.evc(), Some(best));
    Ok(())
}

#[test]
fn progress_is_reported_once_per_policy() -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut grid = GridSearch::new(GridConfig::default())?;
    grid.set_progress_reporter(Box::new(ChannelProgress::new(tx)));

    let mut mechanism =
        OptimizationControlMechanism::new(MechanismConfig::default(), Box::new(grid))
            .with_control_signal(ControlSignal::from_values("a", vec![1.0, 2.0, 3.0, 4.0])?)?;
    mechanism.set_evaluation_function(Arc::new(evaluation_fn(|p: &[f64]| -p[0])));

    assert_eq!(mechanism.execute()?, vec![1.0]);
    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    let iterations = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Iteration { .. }))
        .count();
    assert_eq!(iterations, 4);
    assert_eq!(events.last(), Some(&ProgressEvent::Finished { iterations: 4 }));
    Ok(())
}
