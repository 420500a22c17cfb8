//! End-to-end entry points: difference, fit, forecast and diagnose a
//! series in one call.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{evaluate, Diagnostics};
use crate::error::{Result, SarimaError};
use crate::forecast::forecast;
use crate::labels::continue_labels;
use crate::optimizer::fit;
use crate::preprocess::{difference, validate_observations, DifferencedSeries};
use crate::types::{FitConfig, FittedModel, ForecastConfig, ForecastPoint, ModelOrder, Observation, MIN_OBSERVATIONS};

/// Forecast horizon used when the caller has no preference.
pub const DEFAULT_HORIZON: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub forecast: Vec<ForecastPoint>,
    pub diagnostics: Diagnostics,
    pub model: FittedModel,
}

/// Smallest series length `order` can be fitted on.
pub fn min_series_len(order: &ModelOrder, config: &FitConfig) -> usize {
    let order = order.normalized();
    let needed = order.k_diff() + order.min_differenced_len(config.includes_mean(&order));
    needed.max(MIN_OBSERVATIONS)
}

/// Difference `series` as `order` asks and fit the model.
///
/// Returns the differenced series alongside the model, since forecasting
/// needs both.
pub fn fit_series(series: &[f64], order: &ModelOrder, config: &FitConfig) -> Result<(DifferencedSeries, FittedModel)> {
    let order = order.normalized();
    order.validate()?;
    let min = min_series_len(&order, config);
    if series.len() < min {
        return Err(SarimaError::InsufficientData { n: series.len(), min });
    }
    let differenced = difference(series, order.d, order.dd, order.s)?;
    let model = fit(&differenced, &order, config)?;
    Ok((differenced, model))
}

/// Fit `order` to the observations, forecast `steps` ahead and diagnose the fit.
///
/// When `forecast_config` carries no future labels they are synthesized by
/// continuing the observed timestamps.
#[tracing::instrument(skip(observations, fit_config, forecast_config), fields(n = observations.len()))]
pub fn analyze(
    observations: &[Observation],
    order: &ModelOrder,
    steps: usize,
    fit_config: &FitConfig,
    forecast_config: &ForecastConfig,
) -> Result<AnalysisResult> {
    let values = validate_observations(observations)?;
    let (differenced, model) = fit_series(&values, order, fit_config)?;

    let points = if forecast_config.future_labels.is_empty() {
        let config = forecast_config
            .clone()
            .with_future_labels(continue_labels(observations, steps));
        forecast(&model, &differenced, steps, &config)?
    } else {
        forecast(&model, &differenced, steps, forecast_config)?
    };
    let diagnostics = evaluate(&model, &values)?;

    Ok(AnalysisResult {
        forecast: points,
        diagnostics,
        model,
    })
}
