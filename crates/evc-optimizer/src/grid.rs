//! Exhaustive search over the Cartesian product of the search space.

use std::ops::Range;
use std::sync::Arc;

use evc_types::{
    config_error, Direction, GridConfig, OptResult, OptimizationError, OptimizationResult,
    Sample, SampleResult,
};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::engine::{OptimizationFunction, Optimizer};
use crate::function::{
    FunctionBinding, ObjectiveFunction, SearchContext, SearchFunction, SearchPhase,
    TerminationFunction,
};
use crate::progress::ProgressReporter;
use crate::sample::SampleIterator;

/// Every combination of the materialized dimensions, enumerated in
/// odometer order: the rightmost dimension varies fastest.
#[derive(Debug, Clone, Default)]
pub struct CartesianGrid {
    axes: Vec<Vec<f64>>,
    len: usize,
    cursor: usize,
}

impl CartesianGrid {
    /// Restart every dimension and materialize it.
    pub fn from_space(space: &mut [SampleIterator]) -> SampleResult<Self> {
        let mut axes = Vec::with_capacity(space.len());
        for dimension in space.iter_mut() {
            dimension.restart_from_head(None);
            axes.push(dimension.materialize()?);
        }
        Ok(Self::from_axes(axes))
    }

    pub fn from_axes(axes: Vec<Vec<f64>>) -> Self {
        let len = if axes.is_empty() {
            0
        } else {
            axes.iter().fold(1usize, |acc, axis| acc.saturating_mul(axis.len()))
        };
        Self {
            axes,
            len,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dimensions(&self) -> usize {
        self.axes.len()
    }

    /// Number of points already handed out.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn sample_at(&self, index: usize) -> Option<Sample> {
        if index >= self.len {
            return None;
        }
        let mut remainder = index;
        let mut sample = vec![0.0; self.axes.len()];
        for (slot, axis) in sample.iter_mut().zip(&self.axes).rev() {
            *slot = axis[remainder % axis.len()];
            remainder /= axis.len();
        }
        Some(sample)
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for CartesianGrid {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        let sample = self.sample_at(self.cursor)?;
        self.cursor += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.cursor.min(self.len);
        (remaining, Some(remaining))
    }
}

/// Hands out grid points one per iteration.
///
/// While the owner is initializing, reports the first value of every
/// dimension without touching the grid.
#[derive(Debug, Default)]
pub struct TraverseGrid {
    grid: CartesianGrid,
}

impl TraverseGrid {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchFunction for TraverseGrid {
    fn reset(&mut self, ctx: &mut SearchContext<'_>) -> OptResult<()> {
        self.grid = CartesianGrid::from_space(ctx.search_space)?;
        Ok(())
    }

    fn search(
        &mut self,
        ctx: &mut SearchContext<'_>,
        _sample: &[f64],
        iteration: usize,
    ) -> OptResult<Sample> {
        if ctx.phase == SearchPhase::Initializing {
            return Ok(ctx.search_space.iter().map(SampleIterator::begin).collect());
        }
        self.grid
            .next()
            .ok_or_else(|| OptimizationError::GridExhausted {
                owner: ctx.owner.to_string(),
                iteration,
                expected: self.grid.len(),
            })
    }
}

/// Continues until every grid point has been evaluated.
#[derive(Debug, Default)]
pub struct GridComplete {
    total: usize,
}

impl GridComplete {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl TerminationFunction for GridComplete {
    fn reset(&mut self, owner: &str, search_space: &[SampleIterator]) -> OptResult<()> {
        self.total = grid_size(owner, search_space)?;
        Ok(())
    }

    fn should_continue(&mut self, _sample: &[f64], _value: f64, iteration: usize) -> bool {
        iteration < self.total
    }

    fn expected_iterations(&self) -> Option<usize> {
        Some(self.total)
    }
}

fn build_pool(workers: usize) -> OptResult<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("grid-worker-{index}"))
        .build()
        .map_err(|e| OptimizationError::WorkerPool {
            message: format!("failed to create thread pool: {e}"),
        })
}

fn grid_size(owner: &str, search_space: &[SampleIterator]) -> OptResult<usize> {
    let mut total = 1usize;
    for (index, dimension) in search_space.iter().enumerate() {
        let steps = dimension.num_steps().ok_or_else(|| {
            config_error!(owner, "dimension {index} of the search space is unbounded")
        })?;
        total = total.saturating_mul(steps);
    }
    Ok(total)
}

/// Best point and trajectory of one contiguous slice of the grid.
#[derive(Debug)]
struct Partition {
    best: Option<(usize, f64)>,
    samples: Vec<Sample>,
    values: Vec<f64>,
}

fn evaluate_partition(
    grid: &CartesianGrid,
    objective: &ObjectiveFunction,
    direction: Direction,
    indices: Range<usize>,
) -> Partition {
    let mut partition = Partition {
        best: None,
        samples: Vec::with_capacity(indices.len()),
        values: Vec::with_capacity(indices.len()),
    };
    for index in indices {
        let Some(sample) = grid.sample_at(index) else {
            break;
        };
        let value = objective.evaluate(&sample);
        if !value.is_nan() {
            let better = match partition.best {
                None => true,
                Some((_, incumbent)) => direction.improves(value, incumbent),
            };
            if better {
                partition.best = Some((index, value));
            }
        }
        partition.samples.push(sample);
        partition.values.push(value);
    }
    partition
}

/// Evaluates every point of the search space and returns the first optimal
/// one in generation order.
///
/// With `workers` configured the grid is split into contiguous slices that
/// are evaluated on a dedicated thread pool and reduced in slice order, which
/// yields the same selection and trajectory as the sequential loop. The pool
/// is built once and reused by every run.
#[derive(Debug)]
pub struct GridSearch {
    config: GridConfig,
    function: OptimizationFunction,
    pool: Option<Arc<ThreadPool>>,
}

impl GridSearch {
    pub fn new(config: GridConfig) -> OptResult<Self> {
        if !config.direction.is_selection() {
            return Err(config_error!(
                config.name,
                "direction must be maximize or minimize, got {}",
                config.direction
            ));
        }
        let pool = match config.workers {
            Some(0) => return Err(config_error!(config.name, "workers must be at least 1")),
            Some(workers) => Some(Arc::new(build_pool(workers)?)),
            None => None,
        };

        let binding = FunctionBinding::new()
            .search_function(TraverseGrid::new())
            .search_termination_function(GridComplete::new());
        let function = OptimizationFunction::with_binding(config.optimization(), binding)?;
        Ok(Self {
            config,
            function,
            pool,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn function(&self) -> &OptimizationFunction {
        &self.function
    }

    /// Restart every dimension and build a fresh grid over them.
    pub fn reset_grid(&mut self) -> OptResult<CartesianGrid> {
        Ok(CartesianGrid::from_space(self.function.search_space_mut())?)
    }

    fn select(&self, mut result: OptimizationResult) -> OptimizationResult {
        if let Some(index) = self.config.direction.select_first(&result.saved_values) {
            result.sample = result.saved_samples[index].clone();
            result.value = result.saved_values[index];
        }
        result
    }

    fn optimize_sequential(&mut self, initial: Option<&[f64]>) -> OptResult<OptimizationResult> {
        let result = match initial {
            Some(initial) => self.function.optimize(initial)?,
            None => self.function.run()?,
        };
        Ok(self.select(result))
    }

    fn optimize_partitioned(&mut self, pool: &ThreadPool) -> OptResult<OptimizationResult> {
        let workers = pool.current_num_threads();
        let owner = self.config.name.clone();
        let mut warnings = Vec::new();
        if let Some(warning) = self.function.take_unspecified_warning() {
            warnings.push(warning);
        }

        let grid = self.reset_grid()?;
        let total = grid.len();
        let chunk = total.div_ceil(workers).max(1);
        let objective = self.function.objective().clone();
        let direction = self.config.direction;

        let partitions: Vec<Partition> = pool.install(|| {
            (0..workers)
                .into_par_iter()
                .map(|rank| {
                    let start = (rank * chunk).min(total);
                    let end = ((rank + 1) * chunk).min(total);
                    evaluate_partition(&grid, &objective, direction, start..end)
                })
                .collect()
        });

        let mut best: Option<(usize, f64)> = None;
        let mut samples = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        for (rank, partition) in partitions.into_iter().enumerate() {
            debug!(owner = %owner, rank, evaluated = partition.values.len(), "partition joined");
            if let Some((index, value)) = partition.best {
                let better = match best {
                    None => true,
                    Some((_, incumbent)) => direction.improves(value, incumbent),
                };
                if better {
                    best = Some((index, value));
                }
            }
            samples.extend(partition.samples);
            values.extend(partition.values);
        }

        if let Some(progress) = self.function.progress_mut() {
            progress.on_start(&owner, Some(total));
            for (iteration, value) in values.iter().enumerate() {
                progress.on_iteration(iteration, *value);
            }
            progress.on_finish(total);
        }

        let (sample, value) = match best {
            Some((index, value)) => (samples[index].clone(), value),
            None => (
                samples.last().cloned().unwrap_or_default(),
                values.last().copied().unwrap_or(f64::NAN),
            ),
        };
        info!(
            owner = %owner,
            workers,
            evaluated = total,
            value,
            "partitioned grid search finished"
        );

        self.function.record_trajectory(samples.clone(), values.clone());
        Ok(OptimizationResult {
            sample,
            value,
            saved_samples: samples,
            saved_values: values,
            iterations: total,
            warnings,
        })
    }
}

impl Optimizer for GridSearch {
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
        grid_size(&self.config.name, self.function.search_space())?;
        match self.pool.clone() {
            Some(pool) => self.optimize_partitioned(&pool),
            None => self.optimize_sequential(initial),
        }
    }

    fn initialization_sample(&mut self, default: &[f64]) -> OptResult<Sample> {
        self.function.initialization_sample(default)
    }

    fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.function.set_progress_reporter(reporter);
    }
}
