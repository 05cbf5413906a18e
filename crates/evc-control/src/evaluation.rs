//! Scoring of candidate allocation policies.

use evc_types::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::signal::IntensityCost;

/// Scores an allocation policy; higher is better.
///
/// `costs` holds the intensity cost of every control signal, in policy
/// order. Called concurrently when the mechanism's optimizer evaluates in
/// parallel, so implementations must not accumulate into shared state.
pub trait EvaluationFunction: Send + Sync {
    fn evaluate(&self, policy: &[f64], costs: &[IntensityCost]) -> f64;
}

/// Adapts a closure `policy -> value` into an evaluation function that
/// ignores control costs.
pub struct EvaluationFn<F>(F);

pub fn evaluation_fn<F>(f: F) -> EvaluationFn<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    EvaluationFn(f)
}

impl<F> EvaluationFunction for EvaluationFn<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, policy: &[f64], _costs: &[IntensityCost]) -> f64 {
        (self.0)(policy)
    }
}

/// Total control cost of `policy`: `Σ cost_i(policy_i)`.
pub fn control_cost(policy: &[f64], costs: &[IntensityCost]) -> ControlResult<f64> {
    if policy.len() != costs.len() {
        return Err(ControlError::CostMismatch {
            policy: policy.len(),
            costs: costs.len(),
        });
    }
    Ok(policy
        .iter()
        .zip(costs)
        .map(|(intensity, cost)| cost(*intensity))
        .sum())
}

/// One scored policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvcRecord {
    pub policy: Vec<f64>,
    pub outcome: f64,
    pub cost: f64,
    pub evc: f64,
}

impl EvcRecord {
    /// Record for a policy whose net value is already known; the outcome is
    /// recovered by adding the control cost back.
    pub fn from_evc(policy: Vec<f64>, evc: f64, costs: &[IntensityCost]) -> ControlResult<Self> {
        let cost = control_cost(&policy, costs)?;
        Ok(Self {
            policy,
            outcome: evc + cost,
            cost,
            evc,
        })
    }
}

/// Expected value of control: `outcome(policy) - Σ cost_i(policy_i)`.
pub struct EvcEvaluator<O> {
    outcome: O,
}

impl<O> EvcEvaluator<O>
where
    O: Fn(&[f64]) -> f64 + Send + Sync,
{
    pub fn new(outcome: O) -> Self {
        Self { outcome }
    }

    pub fn score(&self, policy: &[f64], costs: &[IntensityCost]) -> ControlResult<EvcRecord> {
        let cost = control_cost(policy, costs)?;
        let outcome = (self.outcome)(policy);
        Ok(EvcRecord {
            policy: policy.to_vec(),
            outcome,
            cost,
            evc: outcome - cost,
        })
    }
}

impl<O> EvaluationFunction for EvcEvaluator<O>
where
    O: Fn(&[f64]) -> f64 + Send + Sync,
{
    /// A policy that cannot be costed scores NaN and is never selected.
    fn evaluate(&self, policy: &[f64], costs: &[IntensityCost]) -> f64 {
        match self.score(policy, costs) {
            Ok(record) => record.evc,
            Err(e) => {
                warn!(error = %e, "policy could not be scored");
                f64::NAN
            }
        }
    }
}

impl<O> std::fmt::Debug for EvcEvaluator<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvcEvaluator").finish_non_exhaustive()
    }
}
