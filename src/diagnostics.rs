//! Model quality summaries: information criteria, stationarity of the
//! input and a Ljung-Box test on the residuals.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{Result, SarimaError};
use crate::preprocess::{stationarity, StationarityLabel};
use crate::types::FittedModel;

const LJUNG_BOX_MAX_LAGS: usize = 10;
const LJUNG_BOX_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LjungBox {
    pub statistic: f64,
    pub p_value: f64,
    pub lags: usize,
    pub df: usize,
    /// No evidence of residual autocorrelation at the 5% level.
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub aic: f64,
    pub bic: f64,
    pub stationarity: StationarityLabel,
    pub stationarity_statistic: f64,
    pub ljung_box: LjungBox,
    pub description: String,
}

/// Q = n (n + 2) sum_{k=1}^{h} r_k^2 / (n - k), compared with chi-squared(df).
pub fn ljung_box(residuals: &[f64], lags: usize, fitted_coeffs: usize) -> Result<LjungBox> {
    let n = residuals.len();
    if lags == 0 || n <= lags {
        return Err(SarimaError::InsufficientData { n, min: lags + 1 });
    }
    let mean = residuals.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = residuals.iter().map(|e| e - mean).collect();
    let c0: f64 = centered.iter().map(|e| e * e).sum();

    let nf = n as f64;
    let statistic = if c0 > 0.0 {
        let sum: f64 = (1..=lags)
            .map(|k| {
                let ck: f64 = centered.iter().zip(&centered[k..]).map(|(a, b)| a * b).sum();
                let rk = ck / c0;
                rk * rk / (nf - k as f64)
            })
            .sum();
        nf * (nf + 2.0) * sum
    } else {
        0.0
    };

    let df = lags.saturating_sub(fitted_coeffs).max(1);
    let chi2 = ChiSquared::new(df as f64)
        .map_err(|e| SarimaError::InvalidArgument(format!("chi-squared({df}): {e}")))?;
    let p_value = chi2.sf(statistic);
    Ok(LjungBox {
        statistic,
        p_value,
        lags,
        df,
        passed: p_value > LJUNG_BOX_ALPHA,
    })
}

/// Summarize a fitted model against the series it was fitted on.
///
/// `original_series` is the undifferenced input; stationarity is judged on
/// it, while the Ljung-Box test uses the residuals past the burn-in.
pub fn evaluate(model: &FittedModel, original_series: &[f64]) -> Result<Diagnostics> {
    if !model.log_likelihood.is_finite() {
        return Err(SarimaError::DegenerateModel(format!(
            "log-likelihood of {} is not finite",
            model.order
        )));
    }
    let test = stationarity(original_series);

    let residuals = &model.residuals[model.burn_in.min(model.residuals.len())..];
    let lags = (residuals.len() / 5).min(LJUNG_BOX_MAX_LAGS).max(1);
    let lb = ljung_box(residuals, lags, model.order.n_coeffs())?;

    let description = format!(
        "{} fitted by {}: AIC {:.3}, BIC {:.3}; series {} (ADF {:.3}); Ljung-Box Q({}) = {:.3}, p = {:.3}, residuals {}",
        model.order,
        model.method,
        model.aic(),
        model.bic(),
        test.label,
        test.statistic,
        lb.lags,
        lb.statistic,
        lb.p_value,
        if lb.passed { "look like white noise" } else { "show autocorrelation" },
    );

    Ok(Diagnostics {
        aic: model.aic(),
        bic: model.bic(),
        stationarity: test.label,
        stationarity_statistic: test.statistic,
        ljung_box: lb,
        description,
    })
}
