//! Regression metrics: r2, mae, rmse and mse.

use super::MetricReport;
use crate::error::{SmcpError, ValidationError};
use crate::inference::backends::Prediction;
use crate::types::Domain;

pub fn compute(predictions: &[Prediction], targets: &[String]) -> Result<MetricReport, SmcpError> {
    let y_true = targets
        .iter()
        .enumerate()
        .map(|(i, t)| {
            t.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ValidationError::NonNumericTarget {
                    row: i + 1,
                    value: t.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let y_pred = predictions
        .iter()
        .enumerate()
        .map(|(i, p)| predicted_value(i + 1, p))
        .collect::<Result<Vec<_>, _>>()?;

    let n = y_true.len() as f64;
    let mean = y_true.iter().sum::<f64>() / n;
    let (abs_err, sq_err) = y_true
        .iter()
        .zip(&y_pred)
        .fold((0.0, 0.0), |(a, s), (t, p)| {
            let e = t - p;
            (a + e.abs(), s + e * e)
        });
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    let mae = abs_err / n;
    let mse = sq_err / n;

    let mut report = MetricReport::default();
    report.insert("mae", mae);
    report.insert("mse", mse);
    report.insert("rmse", mse.sqrt());
    // A constant float column can leave ss_tot a tiny positive rounding residue.
    let constant = y_true.windows(2).all(|w| w[0] == w[1]);
    if !constant && ss_tot > 0.0 {
        report.insert("r2", 1.0 - sq_err / ss_tot);
    } else {
        report.insert("r2", 0.0);
        report.flag("r2: target has zero variance; reported as 0");
    }
    Ok(report)
}

fn predicted_value(row: usize, prediction: &Prediction) -> Result<f64, SmcpError> {
    let value = match prediction {
        Prediction::Value(v) => Some(*v),
        Prediction::Label(s) | Prediction::Text(s) => s.trim().parse().ok(),
        Prediction::Mask(_) => None,
    };
    value.filter(|v| v.is_finite()).ok_or_else(|| {
        ValidationError::IncompatiblePrediction {
            row,
            domain: Domain::Regression,
            found: match prediction {
                Prediction::Value(_) => "non-finite value".to_string(),
                other => other.kind().to_string(),
            },
        }
        .into()
    })
}
