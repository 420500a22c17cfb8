//! Series validation, differencing with an integration history, and the
//! unit-root stationarity check.

use std::collections::HashSet;
use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SarimaError};
use crate::types::Observation;

/// 5% critical value of the Dickey-Fuller tau statistic, constant only.
const ADF_CRITICAL_CONSTANT: f64 = -2.86;
/// 5% critical value of the Dickey-Fuller tau statistic, constant and trend.
const ADF_CRITICAL_TREND: f64 = -3.41;
/// Shortest series the unit-root regression is attempted on.
const ADF_MIN_OBSERVATIONS: usize = 8;

/// Extract the values of an observation sequence, rejecting non-finite
/// values and duplicate timestamps.
pub fn validate_observations(observations: &[Observation]) -> Result<Vec<f64>> {
    let mut seen = HashSet::with_capacity(observations.len());
    observations
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            if !obs.value.is_finite() {
                return Err(SarimaError::InvalidArgument(format!(
                    "observation {i} ({}) has non-finite value {}",
                    obs.timestamp, obs.value
                )));
            }
            if !seen.insert(obs.timestamp.as_str()) {
                return Err(SarimaError::InvalidArgument(format!(
                    "duplicate timestamp {:?} at position {i}",
                    obs.timestamp
                )));
            }
            Ok(obs.value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Differencing
// ---------------------------------------------------------------------------

/// One differencing pass at `lag`, with the values needed to undo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffLayer {
    pub lag: usize,
    /// First `lag` values of the series entering this pass.
    pub head: Vec<f64>,
    /// Last `lag` values of the series entering this pass.
    pub tail: Vec<f64>,
}

/// Differencing passes in the order they were applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntegrationHistory {
    layers: Vec<DiffLayer>,
}

impl IntegrationHistory {
    pub fn layers(&self) -> &[DiffLayer] {
        &self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// A series after `d` ordinary and `D` seasonal differences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferencedSeries {
    values: Vec<f64>,
    history: IntegrationHistory,
    original_len: usize,
    d: usize,
    dd: usize,
    s: usize,
}

impl DifferencedSeries {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn history(&self) -> &IntegrationHistory {
        &self.history
    }

    /// Length of the series before differencing.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Differencing orders `(d, D, s)`.
    pub fn orders(&self) -> (usize, usize, usize) {
        (self.d, self.dd, self.s)
    }

    /// Rebuild the original series from the differenced values.
    pub fn restore(&self) -> Vec<f64> {
        let mut level = self.values.clone();
        for layer in self.history.layers.iter().rev() {
            let mut undone = layer.head.clone();
            undone.reserve(level.len());
            for (i, w) in level.iter().enumerate() {
                let base = undone[i];
                undone.push(w + base);
            }
            level = undone;
        }
        level
    }
}

/// Apply `d` lag-1 differences then `D` lag-`s` differences.
pub fn difference(series: &[f64], d: usize, dd: usize, s: usize) -> Result<DifferencedSeries> {
    if let Some(i) = series.iter().position(|v| !v.is_finite()) {
        return Err(SarimaError::InvalidArgument(format!(
            "series value at position {i} is not finite"
        )));
    }
    let dd = if s == 0 { 0 } else { dd };
    if dd > 0 && s < 2 {
        return Err(SarimaError::InvalidOrder(format!(
            "seasonal differencing needs a period of at least 2, got {s}"
        )));
    }
    let consumed = d + dd * s;
    if series.len() <= consumed + 1 {
        return Err(SarimaError::InsufficientData {
            n: series.len(),
            min: consumed + 2,
        });
    }

    let lags = std::iter::repeat(1).take(d).chain(std::iter::repeat(s).take(dd));
    let mut values = series.to_vec();
    let mut layers = Vec::with_capacity(d + dd);
    for lag in lags {
        let layer = DiffLayer {
            lag,
            head: values[..lag].to_vec(),
            tail: values[values.len() - lag..].to_vec(),
        };
        values = lag_difference(&values, lag);
        layers.push(layer);
    }

    Ok(DifferencedSeries {
        values,
        history: IntegrationHistory { layers },
        original_len: series.len(),
        d,
        dd,
        s,
    })
}

/// Carry values that continue a differenced series back to the original scale.
///
/// Layers are undone last-applied first, seeded with the trailing values of
/// each intermediate series.
pub fn integrate(differenced_forecast: &[f64], history: &IntegrationHistory) -> Vec<f64> {
    let mut level = differenced_forecast.to_vec();
    for layer in history.layers.iter().rev() {
        let lag = layer.lag;
        let mut undone: Vec<f64> = Vec::with_capacity(level.len());
        for (h, w) in level.iter().enumerate() {
            let base = if h < lag { layer.tail[h] } else { undone[h - lag] };
            undone.push(w + base);
        }
        level = undone;
    }
    level
}

// ---------------------------------------------------------------------------
// Stationarity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationarityLabel {
    #[serde(rename = "Stationary")]
    Stationary,
    #[serde(rename = "Non-Stationary")]
    NonStationary,
    #[serde(rename = "Trend-Stationary")]
    TrendStationary,
}

impl fmt::Display for StationarityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StationarityLabel::Stationary => "Stationary",
            StationarityLabel::NonStationary => "Non-Stationary",
            StationarityLabel::TrendStationary => "Trend-Stationary",
        })
    }
}

/// Outcome of the augmented Dickey-Fuller decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationarityTest {
    pub label: StationarityLabel,
    /// Tau statistic of the constant-only regression.
    pub statistic: f64,
    /// Tau statistic of the constant-plus-trend regression, when it was run.
    pub trend_statistic: Option<f64>,
    pub lags: usize,
}

/// A lag-`s` difference must leave less than this share of the lag-1
/// difference variance to count as seasonal.
const SEASONAL_VARIANCE_RATIO: f64 = 0.7;

/// Seasonal differences (at most `max_dd`) while differencing at lag `s`
/// removes clearly more variance than differencing at lag 1.
///
/// Both differences remove a trend, so what separates them is the repeating
/// pattern a lag-`s` difference also cancels.
pub fn nsdiffs(series: &[f64], s: usize, max_dd: usize) -> usize {
    if s < 2 {
        return 0;
    }
    let mut current = series.to_vec();
    let mut dd = 0;
    while dd < max_dd && current.len() >= 2 * s + 2 {
        let seasonal = lag_difference(&current, s);
        let ordinary = variance(&lag_difference(&current, 1));
        if !(ordinary > 0.0) || variance(&seasonal) >= SEASONAL_VARIANCE_RATIO * ordinary {
            break;
        }
        current = seasonal;
        dd += 1;
    }
    dd
}

fn lag_difference(values: &[f64], lag: usize) -> Vec<f64> {
    values.iter().zip(&values[lag..]).map(|(a, b)| b - a).collect()
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Augmented Dickey-Fuller decision on a raw series.
///
/// The constant-only regression rejects a unit root below -2.86 (Stationary);
/// otherwise the constant-plus-trend regression rejects below -3.41
/// (Trend-Stationary); otherwise Non-Stationary. Lag count is
/// `floor((n-1)^(1/3))`. Constant series are Stationary; series shorter than
/// 8 points are Non-Stationary.
pub fn stationarity(series: &[f64]) -> StationarityTest {
    let n = series.len();
    let undecided = |lags| StationarityTest {
        label: StationarityLabel::NonStationary,
        statistic: f64::NAN,
        trend_statistic: None,
        lags,
    };

    let (lo, hi) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if n > 0 && hi - lo == 0.0 {
        return StationarityTest {
            label: StationarityLabel::Stationary,
            ..undecided(0)
        };
    }
    if n < ADF_MIN_OBSERVATIONS {
        return undecided(0);
    }

    let lags = ((n - 1) as f64).cbrt().floor() as usize;
    let Some((statistic, lags)) = adf_statistic(series, lags, false) else {
        return undecided(lags);
    };
    if statistic < ADF_CRITICAL_CONSTANT {
        return StationarityTest {
            label: StationarityLabel::Stationary,
            statistic,
            trend_statistic: None,
            lags,
        };
    }

    let trend_statistic = adf_statistic(series, lags, true).map(|(t, _)| t);
    let label = match trend_statistic {
        Some(t) if t < ADF_CRITICAL_TREND => StationarityLabel::TrendStationary,
        _ => StationarityLabel::NonStationary,
    };
    StationarityTest {
        label,
        statistic,
        trend_statistic,
        lags,
    }
}

/// Ordinary differences (at most `max_d`) until the series tests Stationary.
pub fn ndiffs(series: &[f64], max_d: usize) -> usize {
    let mut current = series.to_vec();
    for d in 0..max_d {
        if stationarity(&current).label == StationarityLabel::Stationary {
            return d;
        }
        current = current.windows(2).map(|w| w[1] - w[0]).collect();
    }
    max_d
}

/// Tau statistic of `dy_t = a + b y_{t-1} [+ c t] + sum g_j dy_{t-j} + e_t`.
///
/// Lags are reduced until the regression keeps at least three residual
/// degrees of freedom. Returns the statistic and the lag count used.
fn adf_statistic(y: &[f64], max_lags: usize, trend: bool) -> Option<(f64, usize)> {
    let n = y.len();
    let dy: Vec<f64> = y.windows(2).map(|w| w[1] - w[0]).collect();
    let mut lags = max_lags;
    loop {
        let cols = 2 + lags + usize::from(trend);
        let rows = (n - 1).saturating_sub(lags);
        if rows >= cols + 3 {
            break;
        }
        if lags == 0 {
            return None;
        }
        lags -= 1;
    }

    let cols = 2 + lags + usize::from(trend);
    let rows = n - 1 - lags;
    let mut x = DMatrix::<f64>::zeros(rows, cols);
    let mut b = DVector::<f64>::zeros(rows);
    for (r, t) in (lags + 1..n).enumerate() {
        b[r] = dy[t - 1];
        x[(r, 0)] = 1.0;
        x[(r, 1)] = y[t - 1];
        for j in 1..=lags {
            x[(r, 1 + j)] = dy[t - 1 - j];
        }
        if trend {
            x[(r, cols - 1)] = t as f64;
        }
    }

    let xt = x.transpose();
    let xtx_inv = (&xt * &x).try_inverse()?;
    let beta = &xtx_inv * (&xt * &b);
    let resid = &b - &x * &beta;
    let s2 = resid.norm_squared() / (rows - cols) as f64;
    let se = (s2 * xtx_inv[(1, 1)]).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return None;
    }
    Some((beta[1] / se, lags))
}
