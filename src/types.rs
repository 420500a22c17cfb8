use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SarimaError};
use crate::params::ArmaParams;

/// Upper bound on every individual order component.
pub const MAX_ORDER: usize = 10;
/// Upper bound on the seasonal period.
pub const MAX_SEASONAL_PERIOD: usize = 365;
/// Minimum number of raw observations accepted by the pipeline entry points.
pub const MIN_OBSERVATIONS: usize = 5;
/// Smallest default optimizer budget.
pub const MIN_ITERATION_BUDGET: u64 = 5000;
/// Default optimizer iterations per estimated coefficient.
pub const ITERATIONS_PER_COEFF: u64 = 500;

/// One labelled point of the input series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: String,
    pub value: f64,
}

impl Observation {
    pub fn new(timestamp: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            value,
        }
    }
}

/// SARIMA model order `(p, d, q)(P, D, Q)[s]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ModelOrder {
    pub p: usize, // AR order
    pub d: usize, // differencing order
    pub q: usize, // MA order
    #[serde(rename = "P")]
    pub pp: usize, // seasonal AR order (P)
    #[serde(rename = "D")]
    pub dd: usize, // seasonal differencing order (D)
    #[serde(rename = "Q")]
    pub qq: usize, // seasonal MA order (Q)
    pub s: usize, // seasonal period, 0 = none
}

impl ModelOrder {
    /// Build an order; `s == 0` drops the seasonal terms.
    pub fn new(p: usize, d: usize, q: usize, pp: usize, dd: usize, qq: usize, s: usize) -> Self {
        Self { p, d, q, pp, dd, qq, s }.normalized()
    }

    /// Non-seasonal ARIMA(p, d, q).
    pub fn arima(p: usize, d: usize, q: usize) -> Self {
        Self::new(p, d, q, 0, 0, 0, 0)
    }

    /// Copy with seasonal terms forced to zero when there is no seasonal period.
    pub fn normalized(self) -> Self {
        if self.s == 0 {
            Self {
                pp: 0,
                dd: 0,
                qq: 0,
                ..self
            }
        } else {
            self
        }
    }

    /// Reject degenerate and out-of-range orders.
    pub fn validate(&self) -> Result<()> {
        let o = self.normalized();
        for (name, v) in [
            ("p", o.p),
            ("d", o.d),
            ("q", o.q),
            ("P", o.pp),
            ("D", o.dd),
            ("Q", o.qq),
        ] {
            if v > MAX_ORDER {
                return Err(SarimaError::InvalidOrder(format!(
                    "{name} = {v} exceeds the maximum of {MAX_ORDER}"
                )));
            }
        }
        if o.s > MAX_SEASONAL_PERIOD {
            return Err(SarimaError::InvalidOrder(format!(
                "seasonal period {} exceeds the maximum of {MAX_SEASONAL_PERIOD}",
                o.s
            )));
        }
        if o.s == 1 && o.pp + o.dd + o.qq > 0 {
            return Err(SarimaError::InvalidOrder(
                "seasonal terms require a period of at least 2".into(),
            ));
        }
        if o.n_coeffs() == 0 && o.d + o.dd == 0 {
            return Err(SarimaError::InvalidOrder(format!(
                "{o} has no AR, MA or differencing terms"
            )));
        }
        Ok(())
    }

    /// Extended AR order: p + s*P
    pub fn k_ar(&self) -> usize {
        self.p + self.s * self.pp
    }

    /// Extended MA order: q + s*Q
    pub fn k_ma(&self) -> usize {
        self.q + self.s * self.qq
    }

    /// State dimension of the ARMA block: max(k_ar, k_ma + 1)
    pub fn k_order(&self) -> usize {
        std::cmp::max(self.k_ar(), self.k_ma() + 1)
    }

    /// Observations consumed by differencing: d + s*D
    pub fn k_diff(&self) -> usize {
        self.d + self.s * self.dd
    }

    /// Number of AR/MA coefficients: p + q + P + Q
    pub fn n_coeffs(&self) -> usize {
        self.p + self.q + self.pp + self.qq
    }

    pub fn is_seasonal(&self) -> bool {
        self.s > 1 && self.pp + self.dd + self.qq > 0
    }

    /// Shortest differenced series the estimator accepts.
    pub fn min_differenced_len(&self, include_mean: bool) -> usize {
        self.k_ar() + self.n_coeffs() + usize::from(include_mean) + 1
    }
}

impl fmt::Display for ModelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_seasonal() {
            write!(
                f,
                "SARIMA({},{},{})({},{},{})[{}]",
                self.p, self.d, self.q, self.pp, self.dd, self.qq, self.s
            )
        } else {
            write!(f, "ARIMA({},{},{})", self.p, self.d, self.q)
        }
    }
}

/// Objective minimised by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Exact Gaussian likelihood through the Kalman filter.
    #[default]
    Exact,
    /// Conditional sum of squares after a `p + P*s` warm-up.
    Css,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Exact => f.write_str("exact"),
            Method::Css => f.write_str("css"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Optimizer {
    #[default]
    NelderMead,
    Lbfgs,
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Optimizer::NelderMead => f.write_str("nelder-mead"),
            Optimizer::Lbfgs => f.write_str("lbfgs"),
        }
    }
}

/// Shared flag a caller flips to abort running fits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Estimation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub method: Method,
    pub optimizer: Optimizer,
    /// Iteration cap; `None` scales it with the number of coefficients.
    pub max_iter: Option<u64>,
    pub tolerance: f64,
    pub enforce_stationarity: bool,
    pub enforce_invertibility: bool,
    /// `None` estimates a mean only when the model has no differencing.
    pub include_mean: Option<bool>,
    /// Wall-clock budget for a single fit.
    pub deadline: Option<Duration>,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            method: Method::Exact,
            optimizer: Optimizer::NelderMead,
            max_iter: None,
            tolerance: 1e-8,
            enforce_stationarity: true,
            enforce_invertibility: true,
            include_mean: None,
            deadline: None,
            cancel: None,
        }
    }
}

impl FitConfig {
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_max_iter(mut self, max_iter: u64) -> Self {
        self.max_iter = Some(max_iter);
        self
    }

    /// Iterations allowed for fitting `order`: `max_iter` when set, else
    /// `max(5000, 500 * (p + q + P + Q))`.
    pub fn iteration_budget(&self, order: &ModelOrder) -> u64 {
        self.max_iter.unwrap_or_else(|| {
            MIN_ITERATION_BUDGET.max(ITERATIONS_PER_COEFF * order.n_coeffs() as u64)
        })
    }

    pub fn with_include_mean(mut self, include_mean: bool) -> Self {
        self.include_mean = Some(include_mean);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether the fit for `order` estimates a mean.
    pub fn includes_mean(&self, order: &ModelOrder) -> bool {
        self.include_mean.unwrap_or(order.d + order.dd == 0)
    }
}

/// How forecast intervals are carried back to the original scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntervalMethod {
    /// Integrate point, lower and upper bounds identically.
    #[default]
    Integrated,
    /// Psi weights of the fully integrated polynomial around the integrated point.
    PsiWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub confidence_level: f64,
    pub interval: IntervalMethod,
    /// Labels for the forecast points, used positionally.
    pub future_labels: Vec<String>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            interval: IntervalMethod::Integrated,
            future_labels: Vec::new(),
        }
    }
}

impl ForecastConfig {
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_interval(mut self, interval: IntervalMethod) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_future_labels(mut self, labels: Vec<String>) -> Self {
        self.future_labels = labels;
        self
    }
}

/// Estimated SARIMA model. Immutable once produced by the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub order: ModelOrder,
    pub ar_coeffs: Vec<f64>,
    pub ma_coeffs: Vec<f64>,
    pub seasonal_ar_coeffs: Vec<f64>,
    pub seasonal_ma_coeffs: Vec<f64>,
    pub intercept: f64,
    pub has_intercept: bool,
    pub residual_variance: f64,
    pub log_likelihood: f64,
    /// One residual per differenced observation.
    pub residuals: Vec<f64>,
    /// Leading residuals that are conditioning placeholders, not estimates.
    pub burn_in: usize,
    /// Length of the differenced series used for fitting.
    pub n_obs: usize,
    pub n_iter: u64,
    pub converged: bool,
    pub method: String,
}

impl FittedModel {
    /// Estimated parameter count: p + q + P + Q + intercept.
    pub fn n_params(&self) -> usize {
        self.order.n_coeffs() + usize::from(self.has_intercept)
    }

    pub fn aic(&self) -> f64 {
        2.0 * self.n_params() as f64 - 2.0 * self.log_likelihood
    }

    pub fn bic(&self) -> f64 {
        self.n_params() as f64 * (self.n_obs as f64).ln() - 2.0 * self.log_likelihood
    }

    /// AR/MA coefficients as a structured parameter set.
    pub fn params(&self) -> ArmaParams {
        ArmaParams {
            ar: self.ar_coeffs.clone(),
            ma: self.ma_coeffs.clone(),
            sar: self.seasonal_ar_coeffs.clone(),
            sma: self.seasonal_ma_coeffs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub timestamp: String,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Accuracy of a forecast against held-out actuals. `mape` is a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_dimensions() {
        let order = ModelOrder::new(1, 1, 1, 1, 1, 1, 12);
        assert_eq!(order.k_ar(), 13);
        assert_eq!(order.k_ma(), 13);
        assert_eq!(order.k_order(), 14);
        assert_eq!(order.k_diff(), 13);
        assert_eq!(order.n_coeffs(), 4);
    }

    #[test]
    fn test_zero_period_drops_seasonal_terms() {
        let order = ModelOrder::new(1, 0, 0, 2, 1, 2, 0);
        assert_eq!((order.pp, order.dd, order.qq), (0, 0, 0));
        assert!(!order.is_seasonal());
        assert_eq!(order.to_string(), "ARIMA(1,0,0)");
    }

    #[test]
    fn test_display_seasonal() {
        let order = ModelOrder::new(0, 1, 1, 0, 1, 1, 12);
        assert_eq!(order.to_string(), "SARIMA(0,1,1)(0,1,1)[12]");
    }

    #[test]
    fn test_validate_rejects_degenerate() {
        let err = ModelOrder::new(0, 0, 0, 0, 0, 0, 0).validate().unwrap_err();
        assert!(matches!(err, SarimaError::InvalidOrder(_)));
        assert!(ModelOrder::arima(0, 1, 0).validate().is_ok());
    }

    #[test]
    fn test_validate_bounds() {
        assert!(ModelOrder::arima(11, 0, 0).validate().is_err());
        assert!(ModelOrder::new(1, 0, 0, 1, 0, 0, 366).validate().is_err());
        assert!(ModelOrder::new(1, 0, 0, 1, 0, 0, 1).validate().is_err());
        assert!(ModelOrder::new(1, 0, 0, 1, 0, 0, 365).validate().is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = FitConfig::default();
        assert_eq!(config.method, Method::Exact);
        assert_eq!(config.optimizer, Optimizer::NelderMead);
        assert!(config.enforce_stationarity);
        assert!(config.includes_mean(&ModelOrder::arima(1, 0, 0)));
        assert!(!config.includes_mean(&ModelOrder::arima(1, 1, 0)));
        assert!(config.clone().with_include_mean(true).includes_mean(&ModelOrder::arima(1, 1, 0)));
    }

    #[test]
    fn test_iteration_budget_scales_with_coefficients() {
        let config = FitConfig::default();
        assert_eq!(config.max_iter, None);
        assert_eq!(config.iteration_budget(&ModelOrder::arima(2, 1, 2)), 5000);
        assert_eq!(config.iteration_budget(&ModelOrder::new(3, 0, 3, 2, 0, 2, 12)), 5000);
        assert_eq!(config.iteration_budget(&ModelOrder::new(5, 0, 5, 2, 0, 2, 12)), 7000);
        let capped = config.with_max_iter(40);
        assert_eq!(capped.iteration_budget(&ModelOrder::new(5, 0, 5, 2, 0, 2, 12)), 40);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let config = FitConfig::default().with_cancel_token(token.clone());
        token.cancel();
        assert!(config.cancel.as_ref().is_some_and(CancelToken::is_cancelled));
    }

    #[test]
    fn test_config_from_json() {
        let config: FitConfig =
            serde_json::from_str(r#"{"method": "css", "max_iter": 50}"#).unwrap();
        assert_eq!(config.method, Method::Css);
        assert_eq!(config.max_iter, Some(50));
        assert_eq!(config.tolerance, 1e-8);

        let order: ModelOrder =
            serde_json::from_str(r#"{"p":1,"d":1,"q":0,"P":1,"D":0,"Q":1,"s":4}"#).unwrap();
        assert_eq!(order, ModelOrder::new(1, 1, 0, 1, 0, 1, 4));
    }

    #[test]
    fn test_information_criteria() {
        let model = FittedModel {
            order: ModelOrder::arima(2, 1, 0),
            ar_coeffs: vec![0.5, -0.2],
            ma_coeffs: vec![],
            seasonal_ar_coeffs: vec![],
            seasonal_ma_coeffs: vec![],
            intercept: 0.0,
            has_intercept: false,
            residual_variance: 1.0,
            log_likelihood: -100.0,
            residuals: vec![0.0; 50],
            burn_in: 0,
            n_obs: 50,
            n_iter: 10,
            converged: true,
            method: "exact".into(),
        };
        assert_eq!(model.n_params(), 2);
        assert!((model.aic() - 204.0).abs() < 1e-12);
        assert!((model.bic() - (2.0 * 50f64.ln() + 200.0)).abs() < 1e-12);
    }
}
