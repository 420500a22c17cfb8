//! Rayon-based parallel batch processing.
//!
//! Each fit stays single-threaded; parallelism is across independent series
//! or backtest cases. Results come back in input order, one per item, so a
//! failure in one item never hides the others.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backtest::{self, BacktestResult};
use crate::error::Result;
use crate::forecast::forecast;
use crate::pipeline::fit_series;
use crate::types::{FitConfig, FittedModel, ForecastConfig, ForecastPoint, ModelOrder, Observation};

/// Fit the same order to many series in parallel.
#[tracing::instrument(skip(series, config), fields(n_series = series.len()))]
pub fn batch_fit(series: &[Vec<f64>], order: &ModelOrder, config: &FitConfig) -> Vec<Result<FittedModel>> {
    series
        .par_iter()
        .map(|y| fit_series(y, order, config).map(|(_, model)| model))
        .collect()
}

/// Fit and forecast many series in parallel.
///
/// Forecast labels are positional unless `forecast_config` supplies them,
/// in which case every series shares them.
#[tracing::instrument(skip(series, fit_config, forecast_config), fields(n_series = series.len()))]
pub fn batch_forecast(
    series: &[Vec<f64>],
    order: &ModelOrder,
    steps: usize,
    fit_config: &FitConfig,
    forecast_config: &ForecastConfig,
) -> Vec<Result<Vec<ForecastPoint>>> {
    series
        .par_iter()
        .map(|y| {
            let (history, model) = fit_series(y, order, fit_config)?;
            forecast(&model, &history, steps, forecast_config)
        })
        .collect()
}

/// One backtest configuration of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepCase {
    pub order: ModelOrder,
    pub train_ratio: f64,
}

/// Backtest one series under every case in parallel.
#[tracing::instrument(skip(series, cases, fit_config, forecast_config), fields(n_cases = cases.len()))]
pub fn sweep_backtests(
    series: &[Observation],
    cases: &[SweepCase],
    fit_config: &FitConfig,
    forecast_config: &ForecastConfig,
) -> Vec<Result<BacktestResult>> {
    cases
        .par_iter()
        .map(|case| backtest::run(series, &case.order, case.train_ratio, fit_config, forecast_config))
        .collect()
}
