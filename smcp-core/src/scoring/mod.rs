//! Normalization and weighted aggregation into the EvalScore.

pub mod normalize;
pub mod weights;

pub use normalize::{Direction, direction, normalize};
pub use weights::{ScoreCard, WeightDistribution, WeightTable, aggregate};
