//! Orientation of "better" for the optimization functions.

use serde::{Deserialize, Serialize};

/// Whether a search climbs or descends, maximizes or minimizes.
///
/// `Ascent`/`Descent` apply to gradient following; `Maximize`/`Minimize`
/// apply to searches that select an optimum among evaluated samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascent,
    Descent,
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// `+1.0` for ascent/maximize, `-1.0` for descent/minimize.
    pub fn sign(self) -> f64 {
        match self {
            Self::Ascent | Self::Maximize => 1.0,
            Self::Descent | Self::Minimize => -1.0,
        }
    }

    pub fn is_gradient(self) -> bool {
        matches!(self, Self::Ascent | Self::Descent)
    }

    pub fn is_selection(self) -> bool {
        matches!(self, Self::Maximize | Self::Minimize)
    }

    /// Strict improvement of `candidate` over `incumbent`. Ties are not
    /// improvements, so the first optimum encountered is kept.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        if self.sign() > 0.0 {
            candidate > incumbent
        } else {
            candidate < incumbent
        }
    }

    /// Index of the first optimal value in `values`, or `None` when empty.
    /// NaN values never win.
    pub fn select_first(self, values: &[f64]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, value) in values.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            match best {
                None => best = Some(index),
                Some(current) if self.improves(*value, values[current]) => best = Some(index),
                _ => {}
            }
        }
        best
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ascent => "ascent",
            Self::Descent => "descent",
            Self::Maximize => "maximize",
            Self::Minimize => "minimize",
        };
        f.write_str(name)
    }
}

/// What a gradient search watches to decide it has converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceCriterion {
    /// Absolute change of the objective value.
    #[default]
    Value,
    /// Largest absolute element-wise change of the sample.
    Variable,
}
