//! Maps raw metrics onto a bounded [0, 1] goodness scale.

use serde::{Deserialize, Serialize};

/// Normalization policy of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Already a [0, 1] score; clamped.
    HigherIsBetter,
    /// Unbounded error; mapped through `1 / (1 + value)`.
    LowerIsBetter,
}

/// Policy lookup for every metric the computer can produce.
pub fn direction(metric: &str) -> Option<Direction> {
    match metric {
        "accuracy" | "precision" | "recall" | "f1" | "r2" | "bleu" | "rouge" | "rouge1"
        | "rouge2" | "rouge_l" | "iou" | "dice" | "pixel_accuracy" => {
            Some(Direction::HigherIsBetter)
        }
        "mae" | "mse" | "rmse" | "perplexity" | "log_loss" => Some(Direction::LowerIsBetter),
        _ => None,
    }
}

/// Normalize a raw value with the given policy.
///
/// NaN maps to 0 under either policy. Infinite or negative errors also map to 0.
pub fn normalize_value(direction: Direction, value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    match direction {
        Direction::HigherIsBetter => value.clamp(0.0, 1.0),
        Direction::LowerIsBetter => {
            if value < 0.0 || value.is_infinite() {
                0.0
            } else {
                1.0 / (1.0 + value)
            }
        }
    }
}

/// Normalize a named metric; `None` when the metric has no policy.
pub fn normalize(metric: &str, value: f64) -> Option<f64> {
    direction(metric).map(|d| normalize_value(d, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_is_better_clamps() {
        assert_eq!(normalize("accuracy", 0.8), Some(0.8));
        assert_eq!(normalize("r2", -3.2), Some(0.0));
        assert_eq!(normalize("bleu", 1.7), Some(1.0));
    }

    #[test]
    fn test_lower_is_better_inverts() {
        assert_eq!(normalize("mae", 0.0), Some(1.0));
        assert_eq!(normalize("rmse", 1.0), Some(0.5));
        let mae = normalize("mae", 2.5).unwrap();
        assert!((mae - 1.0 / 3.5).abs() < 1e-12);
        assert_eq!(normalize("perplexity", f64::INFINITY), Some(0.0));
    }

    #[test]
    fn test_degenerate_values() {
        assert_eq!(normalize("f1", f64::NAN), Some(0.0));
        assert_eq!(normalize("mae", f64::NAN), Some(0.0));
        assert_eq!(normalize("mae", -1.0), Some(0.0));
    }

    #[test]
    fn test_unknown_metric() {
        assert_eq!(direction("auc"), None);
        assert_eq!(normalize("auc", 0.9), None);
    }
}
