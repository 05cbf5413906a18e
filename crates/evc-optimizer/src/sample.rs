//! One-dimensional sample sequences used as search-space dimensions.
//!
//! A [`SampleSpec`] describes a sequence declaratively; a [`SampleIterator`]
//! walks it. Each optimization function owns its iterators and restarts them
//! explicitly before every search.

use std::fmt;
use std::sync::Arc;

use evc_types::{spec_error, SampleError, SampleResult};

/// Zero-argument callable producing one value per call.
///
/// Iterable sources are not accepted as generators; pass their values to
/// [`SampleIterator::from_values`] instead.
pub type Generator = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Relative/absolute tolerances used when comparing step and count.
const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Declarative description of a sample sequence.
///
/// Either an explicit arithmetic sequence (`begin` plus `end` and/or
/// `num_steps`) or a generator, never both.
#[derive(Clone)]
pub struct SampleSpec {
    begin: Option<f64>,
    end: Option<f64>,
    step_size: Option<f64>,
    num_steps: Option<usize>,
    generator: Option<Generator>,
}

impl SampleSpec {
    /// Validate and resolve a full specification.
    ///
    /// Accepted explicit forms: `(begin, end, step)`, `(begin, end, count)`,
    /// `(begin, step, count)` and `(begin, end, step, count)` where step and
    /// count must agree. With a generator only `count` may be given.
    pub fn new(
        begin: Option<f64>,
        end: Option<f64>,
        step: Option<f64>,
        count: Option<usize>,
        generator: Option<Generator>,
    ) -> SampleResult<Self> {
        for (label, value) in [("begin", begin), ("end", end), ("step", step)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(spec_error!("{label} must be finite, got {v}"));
                }
            }
        }
        if count == Some(0) {
            return Err(spec_error!("count must be at least 1"));
        }

        if let Some(generator) = generator {
            if begin.is_some() {
                return Err(spec_error!("can't specify both 'begin' and 'generator'"));
            }
            if end.is_some() || step.is_some() {
                return Err(spec_error!(
                    "specification of 'end' or 'step' has no effect when 'generator' is specified"
                ));
            }
            return Ok(Self {
                begin: None,
                end: None,
                step_size: None,
                num_steps: count,
                generator: Some(generator),
            });
        }

        let begin = begin.ok_or_else(|| spec_error!("must specify either 'begin' or 'generator'"))?;
        if end.is_none() && count.is_none() {
            return Err(spec_error!(
                "if 'begin' is specified then either 'end' or 'count' must be specified"
            ));
        }

        let (end, step, count) = match (end, step, count) {
            (Some(end), Some(step), None) => {
                if step == 0.0 {
                    return Err(spec_error!("step must be non-zero"));
                }
                let exact = 1.0 + (end - begin) / step;
                if exact < 1.0 - ATOL {
                    return Err(spec_error!(
                        "step {step} does not lead from {begin} towards {end}"
                    ));
                }
                // Inclusive of `end` only when it is reachable in whole steps.
                let count = (exact + RTOL).floor() as usize;
                (begin + step * (count - 1) as f64, step, count)
            }
            (Some(end), None, Some(count)) => {
                if count == 1 {
                    if !is_close(end, begin) {
                        return Err(spec_error!(
                            "a single-step sequence must end where it begins ({begin} != {end})"
                        ));
                    }
                    (begin, 0.0, 1)
                } else {
                    (end, (end - begin) / (count - 1) as f64, count)
                }
            }
            (Some(end), Some(step), Some(count)) => {
                if step == 0.0 || !is_close(count as f64, 1.0 + (end - begin) / step) {
                    return Err(spec_error!(
                        "the 'step' ({step}) and 'count' ({count}) values specified are not compatible"
                    ));
                }
                (end, step, count)
            }
            (None, Some(step), Some(count)) => (begin + step * (count - 1) as f64, step, count),
            (_, None, None) => {
                return Err(spec_error!("must specify one of 'step', 'count' or 'generator'"));
            }
            (None, None, Some(_)) => {
                return Err(spec_error!("'count' without 'end' requires 'step'"));
            }
            (None, Some(_), None) => {
                return Err(spec_error!("'step' without 'end' requires 'count'"));
            }
        };

        Ok(Self {
            begin: Some(begin),
            end: Some(end),
            step_size: Some(step),
            num_steps: Some(count),
            generator: None,
        })
    }

    /// Inclusive range from `begin` to `end` in increments of `step`.
    pub fn range(begin: f64, end: f64, step: f64) -> SampleResult<Self> {
        Self::new(Some(begin), Some(end), Some(step), None, None)
    }

    /// `count` evenly spaced values from `begin` to `end` inclusive.
    pub fn with_count(begin: f64, end: f64, count: usize) -> SampleResult<Self> {
        Self::new(Some(begin), Some(end), None, Some(count), None)
    }

    /// `count` values starting at `begin` in increments of `step`.
    pub fn stepped(begin: f64, step: f64, count: usize) -> SampleResult<Self> {
        Self::new(Some(begin), None, Some(step), Some(count), None)
    }

    /// Unbounded sequence drawn by calling `generator`.
    pub fn generator<F>(generator: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            begin: None,
            end: None,
            step_size: None,
            num_steps: None,
            generator: Some(Arc::new(generator)),
        }
    }

    /// `count` values drawn by calling `generator`.
    pub fn generator_with_count<F>(generator: F, count: usize) -> SampleResult<Self>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::new(None, None, None, Some(count), Some(Arc::new(generator)))
    }

    pub fn begin(&self) -> Option<f64> {
        self.begin
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn step_size(&self) -> Option<f64> {
        self.step_size
    }

    pub fn num_steps(&self) -> Option<usize> {
        self.num_steps
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }
}

impl fmt::Debug for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleSpec")
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("step_size", &self.step_size)
            .field("num_steps", &self.num_steps)
            .field("generator", &self.generator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Clone)]
enum SampleSource {
    Values(Vec<f64>),
    Arithmetic,
    Generator(Generator),
}

/// Stateful, restartable walk over a sample sequence.
///
/// Clones share a generator but keep independent cursors. A single iterator
/// is meant to be read from one call site at a time.
#[derive(Clone)]
pub struct SampleIterator {
    begin: f64,
    end: Option<f64>,
    step_size: Option<f64>,
    num_steps: Option<usize>,
    current_step: usize,
    head: f64,
    source: SampleSource,
}

impl SampleIterator {
    /// Iterate over an explicit list of values.
    pub fn from_values(values: Vec<f64>) -> SampleResult<Self> {
        let (begin, end) = match (values.first(), values.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(SampleError::EmptySequence),
        };
        Ok(Self {
            begin,
            end: Some(end),
            step_size: None,
            num_steps: Some(values.len()),
            current_step: 0,
            head: begin,
            source: SampleSource::Values(values),
        })
    }

    /// A sequence holding a single value.
    pub fn constant(value: f64) -> Self {
        Self {
            begin: value,
            end: Some(value),
            step_size: None,
            num_steps: Some(1),
            current_step: 0,
            head: value,
            source: SampleSource::Values(vec![value]),
        }
    }

    /// Iterate over the sequence described by `spec`.
    pub fn from_spec(spec: &SampleSpec) -> Self {
        match &spec.generator {
            Some(generator) => Self {
                begin: 0.0,
                end: None,
                step_size: Some(1.0),
                num_steps: spec.num_steps,
                current_step: 0,
                head: 0.0,
                source: SampleSource::Generator(Arc::clone(generator)),
            },
            None => {
                // A validated spec without generator always carries begin.
                let begin = spec.begin.unwrap_or_default();
                Self {
                    begin,
                    end: spec.end,
                    step_size: spec.step_size,
                    num_steps: spec.num_steps,
                    current_step: 0,
                    head: begin,
                    source: SampleSource::Arithmetic,
                }
            }
        }
    }

    /// Produce the next value, or [`SampleError::Exhausted`] once
    /// `num_steps` values have been drawn. Unbounded generators never exhaust.
    pub fn advance(&mut self) -> SampleResult<f64> {
        if let Some(num_steps) = self.num_steps {
            if self.current_step >= num_steps {
                return Err(SampleError::Exhausted { num_steps });
            }
        }
        let value = match &self.source {
            SampleSource::Values(values) => values[self.current_step],
            SampleSource::Arithmetic => {
                self.head + self.step_size.unwrap_or_default() * self.current_step as f64
            }
            SampleSource::Generator(generator) => generator(),
        };
        self.current_step += 1;
        Ok(value)
    }

    /// Rewind the cursor; arithmetic sequences restart from `head`
    /// (`begin` unless given).
    pub fn restart_from_head(&mut self, head: Option<f64>) {
        self.current_step = 0;
        self.head = head.unwrap_or(self.begin);
    }

    /// The full sequence from `begin`, drawn from a private copy so the
    /// caller's cursor is left where it was.
    pub fn materialize(&self) -> SampleResult<Vec<f64>> {
        let num_steps = self.num_steps.ok_or(SampleError::Unbounded)?;
        let mut walker = self.clone();
        walker.restart_from_head(None);
        (0..num_steps).map(|_| walker.advance()).collect()
    }

    /// Smallest and largest value the sequence can produce, when known.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match &self.source {
            SampleSource::Values(values) => {
                let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Some((lo, hi))
            }
            SampleSource::Arithmetic => {
                let end = self.end?;
                Some((self.begin.min(end), self.begin.max(end)))
            }
            SampleSource::Generator(_) => None,
        }
    }

    pub fn begin(&self) -> f64 {
        self.begin
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn step_size(&self) -> Option<f64> {
        self.step_size
    }

    pub fn num_steps(&self) -> Option<usize> {
        self.num_steps
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn head(&self) -> f64 {
        self.head
    }

    pub fn is_bounded(&self) -> bool {
        self.num_steps.is_some()
    }
}

impl Iterator for SampleIterator {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.advance().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.num_steps {
            Some(n) => {
                let remaining = n.saturating_sub(self.current_step);
                (remaining, Some(remaining))
            }
            None => (usize::MAX, None),
        }
    }
}

impl TryFrom<Vec<f64>> for SampleIterator {
    type Error = SampleError;

    fn try_from(values: Vec<f64>) -> SampleResult<Self> {
        Self::from_values(values)
    }
}

impl From<&SampleSpec> for SampleIterator {
    fn from(spec: &SampleSpec) -> Self {
        Self::from_spec(spec)
    }
}

impl fmt::Debug for SampleIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            SampleSource::Values(v) => format!("values[{}]", v.len()),
            SampleSource::Arithmetic => "arithmetic".to_string(),
            SampleSource::Generator(_) => "generator".to_string(),
        };
        f.debug_struct("SampleIterator")
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("step_size", &self.step_size)
            .field("num_steps", &self.num_steps)
            .field("current_step", &self.current_step)
            .field("head", &self.head)
            .field("source", &source)
            .finish()
    }
}
