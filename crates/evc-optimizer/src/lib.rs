//! # evc-optimizer
//!
//! Optimization functions for allocation search.
//!
//! Provides one-dimensional sample sequences, the generic check-then-step
//! optimization loop with late-bound roles, and its gradient, grid and
//! proposal-driven specializations, plus progress reporting.

mod engine;
mod function;
mod gaussian;
mod gradient;
mod grid;
mod progress;
mod sample;

pub use engine::{OptimizationFunction, Optimizer};
pub use function::{
    search_fn, termination_fn, FunctionBinding, GradientFunction, ObjectiveFunction,
    SearchContext, SearchFn, SearchFunction, SearchPhase, TerminationFn, TerminationFunction,
};
pub use gaussian::{GaussianProcess, ProposalSampler, UniformProposal};
pub use gradient::{Annealing, ConvergenceCheck, FollowGradient, GradientOptimization};
pub use grid::{CartesianGrid, GridComplete, GridSearch, TraverseGrid};
pub use progress::{ChannelProgress, DotProgress, ProgressEvent, ProgressReporter};
pub use sample::{Generator, SampleIterator, SampleSpec};
