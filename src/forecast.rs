use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::error::{Result, SarimaError};
use crate::polynomial::{differencing_poly, polymul, psi_weights, reduced_ar, reduced_ma};
use crate::preprocess::{integrate, DifferencedSeries};
use crate::types::{FittedModel, ForecastConfig, ForecastPoint, IntervalMethod};

/// H-step ahead forecast on the differenced scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Forecast means for h = 1..steps, intercept included.
    pub mean: Vec<f64>,
    /// Forecast error variances sigma2 * sum_{j<h} psi_j^2.
    pub variance: Vec<f64>,
}

/// Residuals of a fitted model with their standardized counterparts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualReport {
    pub residuals: Vec<f64>,
    /// Residuals divided by the residual standard deviation.
    pub standardized: Vec<f64>,
    /// Leading residuals that are conditioning placeholders.
    pub burn_in: usize,
}

/// Two-sided normal critical value for a confidence level in (0, 1).
pub fn critical_value(confidence_level: f64) -> Result<f64> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(SarimaError::InvalidArgument(format!(
            "confidence level must lie in (0, 1), got {confidence_level}"
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| SarimaError::InvalidArgument(format!("standard normal: {e}")))?;
    Ok(normal.inverse_cdf(0.5 + confidence_level / 2.0))
}

fn check_history(model: &FittedModel, history: &DifferencedSeries) -> Result<()> {
    let (d, dd, s) = history.orders();
    if d != model.order.d || dd != model.order.dd || (dd > 0 && s != model.order.s) {
        return Err(SarimaError::InvalidArgument(format!(
            "history was differenced with (d={d}, D={dd}, s={s}) but the model is {}",
            model.order
        )));
    }
    if history.len() != model.residuals.len() {
        return Err(SarimaError::InvalidArgument(format!(
            "history has {} differenced points but the model was fitted on {}",
            history.len(),
            model.residuals.len()
        )));
    }
    Ok(())
}

/// Point forecasts and error variances on the differenced scale.
///
/// Runs the ARMA recursion forward from the end of `history`, with the
/// model residuals standing in for past innovations and future innovations
/// set to zero.
pub fn forecast_differenced(
    model: &FittedModel,
    history: &DifferencedSeries,
    steps: usize,
) -> Result<ForecastResult> {
    if steps == 0 {
        return Err(SarimaError::InvalidArgument(
            "forecast horizon must be at least 1".into(),
        ));
    }
    check_history(model, history)?;

    let params = model.params();
    let ar = reduced_ar(&params, model.order.s);
    let ma = reduced_ma(&params, model.order.s);
    let mu = model.intercept;

    let n = history.len();
    let mut w: Vec<f64> = history.values().iter().map(|v| v - mu).collect();
    let mut e = model.residuals.clone();
    w.reserve(steps);
    e.reserve(steps);
    for t in n..n + steps {
        let mut pred = 0.0;
        for (i, c) in ar.iter().enumerate().skip(1).take(t) {
            pred -= c * w[t - i];
        }
        for (j, c) in ma.iter().enumerate().skip(1).take(t) {
            pred += c * e[t - j];
        }
        w.push(pred);
        e.push(0.0);
    }

    let psi = psi_weights(&ar, &ma, steps);
    let variance = cumulative_variance(&psi, model.residual_variance);
    Ok(ForecastResult {
        mean: w[n..].iter().map(|v| v + mu).collect(),
        variance,
    })
}

fn cumulative_variance(psi: &[f64], sigma2: f64) -> Vec<f64> {
    psi.iter()
        .scan(0.0, |acc, p| {
            *acc += p * p;
            Some(sigma2 * *acc)
        })
        .collect()
}

/// Forecast `steps` points past the end of the original series.
///
/// Labels come from `config.future_labels` by position; missing ones are
/// the positional index after the original series. Very long horizons are
/// allowed and their intervals keep widening.
///
/// # Errors
/// * `InvalidArgument` for `steps == 0`, a confidence level outside (0, 1),
///   or a history that does not belong to the model
#[tracing::instrument(skip_all, fields(order = %model.order, steps))]
pub fn forecast(
    model: &FittedModel,
    history: &DifferencedSeries,
    steps: usize,
    config: &ForecastConfig,
) -> Result<Vec<ForecastPoint>> {
    let z = critical_value(config.confidence_level)?;
    let diff = forecast_differenced(model, history, steps)?;
    let point = integrate(&diff.mean, history.history());

    let (lower, upper) = match config.interval {
        IntervalMethod::Integrated => {
            let half: Vec<f64> = diff.variance.iter().map(|v| z * v.sqrt()).collect();
            let lower: Vec<f64> = diff.mean.iter().zip(&half).map(|(m, h)| m - h).collect();
            let upper: Vec<f64> = diff.mean.iter().zip(&half).map(|(m, h)| m + h).collect();
            (integrate(&lower, history.history()), integrate(&upper, history.history()))
        }
        IntervalMethod::PsiWeights => {
            let (d, dd, s) = history.orders();
            let params = model.params();
            let full_ar = polymul(&reduced_ar(&params, model.order.s), &differencing_poly(d, dd, s));
            let psi = psi_weights(&full_ar, &reduced_ma(&params, model.order.s), steps);
            let half: Vec<f64> = cumulative_variance(&psi, model.residual_variance)
                .iter()
                .map(|v| z * v.sqrt())
                .collect();
            (
                point.iter().zip(&half).map(|(p, h)| p - h).collect(),
                point.iter().zip(&half).map(|(p, h)| p + h).collect(),
            )
        }
    };

    debug!(first = point.first().copied(), last = point.last().copied(), "forecast");
    let origin = history.original_len();
    Ok((0..steps)
        .map(|h| ForecastPoint {
            timestamp: config
                .future_labels
                .get(h)
                .cloned()
                .unwrap_or_else(|| (origin + h).to_string()),
            point_estimate: point[h],
            lower_bound: lower[h],
            upper_bound: upper[h],
        })
        .collect())
}

/// Residuals of a fitted model, raw and divided by sqrt(sigma2).
pub fn residual_report(model: &FittedModel) -> ResidualReport {
    let sd = model.residual_variance.sqrt();
    let standardized = model
        .residuals
        .iter()
        .map(|e| if sd > 0.0 { e / sd } else { 0.0 })
        .collect();
    ResidualReport {
        residuals: model.residuals.clone(),
        standardized,
        burn_in: model.burn_in,
    }
}
