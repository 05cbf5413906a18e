use anyhow::Result;
use approx::assert_abs_diff_eq;
use evc_optimizer::{
    search_fn, termination_fn, ChannelProgress, FunctionBinding, GradientOptimization,
    GridSearch, OptimizationFunction, Optimizer, ProgressEvent, SampleIterator, SampleSpec,
};
use evc_types::{
    ConvergenceCriterion, Direction, GradientConfig, GridConfig, OptimizationConfig,
    OptimizationWarning,
};

fn scenario_space() -> Result<Vec<SampleIterator>> {
    Ok(vec![
        SampleIterator::from_values(vec![0.0, 1.0, 2.0])?,
        SampleIterator::from_values(vec![10.0, 20.0])?,
    ])
}

#[test]
fn iterator_bounds_hold_for_inclusive_ranges() -> Result<()> {
    let spec = SampleSpec::range(-2.0, 2.0, 0.5)?;
    let mut it = SampleIterator::from_spec(&spec);

    let values: Vec<f64> = std::iter::from_fn(|| it.advance().ok()).collect();
    assert_eq!(values.len(), 9);
    assert_abs_diff_eq!(values[0], -2.0);
    assert_abs_diff_eq!(values[8], 2.0, epsilon = 1e-12);
    assert!(it.advance().unwrap_err().is_exhausted());

    it.restart_from_head(None);
    assert_eq!(it.materialize()?, values);
    Ok(())
}

#[test]
fn two_by_three_grid_scenario() -> Result<()> {
    let mut search = GridSearch::new(GridConfig::default())?;
    search.bind(
        FunctionBinding::new()
            .objective(|s| s.iter().sum())
            .search_space(scenario_space()?),
    )?;

    let (sample, value, samples, values) = search.optimize(None)?.into_parts();
    assert_eq!(sample, vec![2.0, 20.0]);
    assert_eq!(value, 22.0);
    assert_eq!(values, vec![10.0, 20.0, 11.0, 21.0, 12.0, 22.0]);
    assert_eq!(samples.first(), Some(&vec![0.0, 10.0]));
    assert_eq!(samples.last(), Some(&vec![2.0, 20.0]));
    Ok(())
}

#[test]
fn partitioned_grid_reports_progress_in_order() -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut search = GridSearch::new(GridConfig::default().with_workers(4))?;
    search.set_progress_reporter(Box::new(ChannelProgress::new(tx)));
    search.bind(
        FunctionBinding::new()
            .objective(|s| s.iter().sum())
            .search_space(scenario_space()?),
    )?;

    let result = search.optimize(None)?;
    assert_eq!(result.sample, vec![2.0, 20.0]);

    let iterations: Vec<f64> = rx
        .try_iter()
        .filter_map(|event| match event {
            ProgressEvent::Iteration { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(iterations, vec![10.0, 20.0, 11.0, 21.0, 12.0, 22.0]);
    Ok(())
}

#[test]
fn gradient_ascent_finds_parabola_peak() -> Result<()> {
    let config = GradientConfig::default()
        .with_step_size(0.1)
        .with_convergence(ConvergenceCriterion::Variable, 1e-6);
    let mut optimizer = GradientOptimization::new(config)?;
    optimizer.bind(FunctionBinding::new().objective(|s| -(s[0] - 3.0).powi(2)))?;

    let result = optimizer.optimize(Some(&[0.0]))?;
    assert!((result.sample[0] - 3.0).abs() < 1e-4);
    Ok(())
}

#[test]
fn gradient_descent_mirrors_ascent() -> Result<()> {
    let config = GradientConfig::default()
        .with_direction(Direction::Descent)
        .with_step_size(0.1)
        .with_convergence(ConvergenceCriterion::Variable, 1e-6);
    let mut optimizer = GradientOptimization::new(config)?;
    optimizer.bind(FunctionBinding::new().objective(|s| (s[0] + 1.0).powi(2)))?;

    let result = optimizer.optimize(Some(&[4.0]))?;
    assert!((result.sample[0] + 1.0).abs() < 1e-4);
    Ok(())
}

#[test]
fn max_iterations_is_a_warning_not_an_error() -> Result<()> {
    let config = OptimizationConfig::new("never-done")
        .with_max_iterations(10)
        .with_save_samples(true)
        .with_save_values(true);
    let binding = FunctionBinding::new()
        .objective(|s| s[0])
        .search_function(search_fn(|s, _| vec![s[0] + 0.5]))
        .search_termination_function(termination_fn(|_, _, _| true))
        .search_space(vec![SampleIterator::from_values(vec![0.0])?]);
    let mut function = OptimizationFunction::with_binding(config, binding)?;

    let result = function.optimize(&[0.0])?;
    assert_eq!(result.iterations, 10);
    assert_eq!(result.saved_samples.len(), 10);
    assert_eq!(result.saved_values.len(), 10);
    assert_eq!(
        result.warnings,
        vec![OptimizationWarning::ConvergenceFailure {
            owner: "never-done".into(),
            max_iterations: 10,
        }]
    );
    Ok(())
}

#[test]
fn save_flags_are_independent() -> Result<()> {
    let binding = || -> Result<FunctionBinding> {
        Ok(FunctionBinding::new()
            .objective(|s| s[0])
            .search_function(search_fn(|s, _| vec![s[0] + 1.0]))
            .search_termination_function(termination_fn(|_, _, i| i < 3))
            .search_space(vec![SampleIterator::from_values(vec![0.0])?]))
    };

    let mut samples_only = OptimizationFunction::with_binding(
        OptimizationConfig::new("samples").with_save_samples(true),
        binding()?,
    )?;
    let (_, _, samples, values) = samples_only.optimize(&[0.0])?.into_parts();
    assert_eq!(samples, vec![vec![1.0], vec![2.0], vec![3.0]]);
    assert!(values.is_empty());

    let mut values_only = OptimizationFunction::with_binding(
        OptimizationConfig::new("values").with_save_values(true),
        binding()?,
    )?;
    let (_, _, samples, values) = values_only.optimize(&[0.0])?.into_parts();
    assert!(samples.is_empty());
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
    Ok(())
}
