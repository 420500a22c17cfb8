//! Hold-out evaluation: fit on a prefix, forecast the remainder and score
//! the forecast against the held-out values.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SarimaError};
use crate::forecast::forecast;
use crate::pipeline::fit_series;
use crate::preprocess::validate_observations;
use crate::types::{BacktestMetrics, FitConfig, FittedModel, ForecastConfig, ForecastPoint, ModelOrder, Observation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub forecast: Vec<ForecastPoint>,
    pub metrics: BacktestMetrics,
    pub model: FittedModel,
    /// Index of the first held-out observation.
    pub split_index: usize,
}

/// MAE, RMSE and MAPE of `predicted` against `actual`.
///
/// MAPE is a percentage over the points where `actual != 0`, and NaN when
/// there are none.
pub fn compute_metrics(actual: &[f64], predicted: &[f64]) -> Result<BacktestMetrics> {
    if actual.len() != predicted.len() {
        return Err(SarimaError::InvalidArgument(format!(
            "{} actual values but {} predictions",
            actual.len(),
            predicted.len()
        )));
    }
    if actual.is_empty() {
        return Err(SarimaError::InvalidArgument("no points to score".into()));
    }
    let n = actual.len() as f64;
    let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();

    let (sum, count) = actual
        .iter()
        .zip(&errors)
        .filter(|(a, _)| **a != 0.0)
        .fold((0.0, 0usize), |(s, c), (a, e)| (s + (e / a).abs(), c + 1));
    let mape = if count == 0 { f64::NAN } else { 100.0 * sum / count as f64 };

    Ok(BacktestMetrics { mae, rmse, mape })
}

/// Index of the first test observation: `floor(len * train_ratio)`.
pub fn split_index(len: usize, train_ratio: f64) -> Result<usize> {
    if !train_ratio.is_finite() {
        return Err(SarimaError::InvalidArgument(format!(
            "train ratio must be finite, got {train_ratio}"
        )));
    }
    let split = (len as f64 * train_ratio).floor();
    if split < 1.0 || split >= len as f64 {
        let train = split.clamp(0.0, len as f64) as usize;
        return Err(SarimaError::InsufficientSplit {
            train,
            test: len - train,
        });
    }
    Ok(split as usize)
}

/// Fit on the first `floor(len * train_ratio)` observations and forecast the rest.
///
/// Forecast points are labelled with the held-out timestamps and aligned
/// with them positionally.
#[tracing::instrument(skip(series, fit_config, forecast_config), fields(n = series.len()))]
pub fn run(
    series: &[Observation],
    order: &ModelOrder,
    train_ratio: f64,
    fit_config: &FitConfig,
    forecast_config: &ForecastConfig,
) -> Result<BacktestResult> {
    let values = validate_observations(series)?;
    let split = split_index(values.len(), train_ratio)?;
    let (train, test) = values.split_at(split);

    let (history, model) = fit_series(train, order, fit_config)?;
    let labels = series[split..].iter().map(|o| o.timestamp.clone()).collect();
    let config = forecast_config.clone().with_future_labels(labels);
    let points = forecast(&model, &history, test.len(), &config)?;

    let predicted: Vec<f64> = points.iter().map(|p| p.point_estimate).collect();
    let metrics = compute_metrics(test, &predicted)?;
    info!(split, mae = metrics.mae, rmse = metrics.rmse, mape = metrics.mape, "backtest complete");

    Ok(BacktestResult {
        forecast: points,
        metrics,
        model,
        split_index: split,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_metrics_known_values() {
        let m = compute_metrics(&[10.0, 20.0, 0.0, 40.0], &[12.0, 18.0, 5.0, 42.0]).unwrap();
        assert_relative_eq!(m.mae, 2.75);
        assert_relative_eq!(m.rmse, 9.25f64.sqrt());
        assert_relative_eq!(m.mape, 35.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mape_nan_when_all_actuals_zero() {
        let m = compute_metrics(&[0.0, 0.0], &[1.0, -1.0]).unwrap();
        assert_relative_eq!(m.mae, 1.0);
        assert!(m.mape.is_nan());
    }

    #[test]
    fn test_metrics_length_mismatch() {
        assert!(compute_metrics(&[1.0], &[1.0, 2.0]).is_err());
        assert!(compute_metrics(&[], &[]).is_err());
    }

    #[test]
    fn test_split_index() {
        assert_eq!(split_index(10, 0.8).unwrap(), 8);
        assert_eq!(split_index(7, 0.5).unwrap(), 3);
        assert_eq!(
            split_index(10, 1.0),
            Err(SarimaError::InsufficientSplit { train: 10, test: 0 })
        );
        assert_eq!(
            split_index(10, 0.05),
            Err(SarimaError::InsufficientSplit { train: 0, test: 10 })
        );
        assert!(matches!(split_index(10, f64::NAN), Err(SarimaError::InvalidArgument(_))));
    }

    #[test]
    fn test_run_on_linear_trend() {
        let series: Vec<Observation> = (0..30)
            .map(|t| Observation::new(format!("2024-01-{:02}", t + 1), 2.0 * t as f64 + 1.0))
            .collect();
        let result = run(
            &series,
            &ModelOrder::arima(0, 1, 0),
            0.8,
            &FitConfig::default(),
            &ForecastConfig::default(),
        )
        .unwrap();
        assert_eq!(result.split_index, 24);
        assert_eq!(result.forecast.len(), 6);
        assert_eq!(result.forecast[0].timestamp, "2024-01-25");
        assert_eq!(result.forecast[5].timestamp, "2024-01-30");
        // Random walk forecast is flat at the last training value.
        assert_relative_eq!(result.forecast[0].point_estimate, 47.0, epsilon = 1e-9);
        assert!(result.metrics.mae > 0.0);
    }
}
