pub mod config;
pub mod direction;
pub mod errors;
pub mod logging;
pub mod outcome;

pub use config::*;
pub use direction::*;
pub use errors::*;
pub use outcome::*;

/// One candidate point in a search space: one entry per sampled dimension.
pub type Sample = Vec<f64>;
