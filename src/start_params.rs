//! Starting values for the optimizer.
//!
//! Works on the differenced, mean-removed series:
//! 1. AR coefficients by Burg's method, Yule-Walker as fallback
//! 2. MA coefficients by the innovations algorithm on the AR residuals
//! 3. Seasonal AR/MA the same way on autocovariances at lags s, 2s, ...
//! 4. Zeros wherever an estimate is unavailable

use tracing::debug;

use crate::error::{Result, SarimaError};
use crate::params::ArmaParams;
use crate::types::ModelOrder;

/// Innovations-algorithm MA estimates are clipped to this magnitude.
const MA_START_BOUND: f64 = 0.99;
const TINY: f64 = 1e-15;

/// Sample autocovariance at lag k.
pub fn autocovariance(y: &[f64], k: usize) -> f64 {
    let n = y.len();
    if k >= n {
        return 0.0;
    }
    let mean = y.iter().sum::<f64>() / n as f64;
    let sum: f64 = y[..n - k]
        .iter()
        .zip(&y[k..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum();
    sum / n as f64
}

/// AR(p) by Burg's method: minimises forward and backward prediction
/// errors directly, so every stage is stationary.
fn burg_ar(y: &[f64], p: usize) -> Option<Vec<f64>> {
    if p == 0 {
        return Some(vec![]);
    }
    let n = y.len();
    if n <= p {
        return None;
    }

    let mean = y.iter().sum::<f64>() / n as f64;
    let mut forward: Vec<f64> = y.iter().map(|&v| v - mean).collect();
    let mut backward = forward.clone();
    let mut a = vec![0.0; p];

    for k in 0..p {
        let (mut num, mut den) = (0.0, 0.0);
        for t in (k + 1)..n {
            num += forward[t] * backward[t - 1];
            den += forward[t] * forward[t] + backward[t - 1] * backward[t - 1];
        }
        if den.abs() < TINY {
            return None;
        }
        let reflection = 2.0 * num / den;
        if reflection.abs() >= 1.0 {
            return None;
        }

        let prev = a[..k].to_vec();
        a[k] = reflection;
        for j in 0..k {
            a[j] = prev[j] - reflection * prev[k - 1 - j];
        }

        // Walk backwards so backward[t-1] is read before it is overwritten.
        for t in ((k + 1)..n).rev() {
            let f = forward[t];
            forward[t] = f - reflection * backward[t - 1];
            backward[t] = backward[t - 1] - reflection * f;
        }
    }
    Some(a)
}

/// Levinson-Durbin solve of the Yule-Walker system from `gammas[0..=p]`.
///
/// The autocovariances may sit at seasonal lags (gammas[k] = gamma(k*s)).
fn levinson(gammas: &[f64], p: usize) -> Option<Vec<f64>> {
    if p == 0 {
        return Some(vec![]);
    }
    if gammas.len() <= p || gammas[0].abs() < TINY {
        return None;
    }

    let mut phi: Vec<f64> = Vec::with_capacity(p);
    let mut var = gammas[0];
    for k in 0..p {
        let num = gammas[k + 1] - (0..k).map(|j| phi[j] * gammas[k - j]).sum::<f64>();
        if var.abs() < TINY {
            return None;
        }
        let lambda = num / var;
        let next: Vec<f64> = (0..k).map(|j| phi[j] - lambda * phi[k - 1 - j]).collect();
        phi = next;
        phi.push(lambda);
        var *= 1.0 - lambda * lambda;
    }
    Some(phi)
}

fn yule_walker(y: &[f64], p: usize) -> Option<Vec<f64>> {
    if y.len() <= p {
        return None;
    }
    let gammas: Vec<f64> = (0..=p).map(|k| autocovariance(y, k)).collect();
    levinson(&gammas, p)
}

/// Innovations algorithm (Brockwell & Davis 5.2): MA(m) coefficients from
/// autocovariances `gamma[0..=m]`.
fn innovations(gamma: &[f64], m: usize) -> Vec<f64> {
    if m == 0 || gamma.len() <= m || gamma[0].abs() < TINY {
        return vec![0.0; m];
    }
    let mut theta = vec![vec![0.0; m]; m + 1];
    let mut v = vec![0.0; m + 1];
    v[0] = gamma[0];

    for i in 1..=m {
        for k in 0..i {
            let mut sum = gamma[i - k];
            for j in 0..k {
                sum -= theta[k][k - 1 - j] * theta[i][i - 1 - j] * v[j];
            }
            theta[i][i - 1 - k] = if v[k].abs() > TINY { sum / v[k] } else { 0.0 };
        }
        v[i] = gamma[0]
            - (0..i)
                .map(|j| theta[i][i - 1 - j].powi(2) * v[j])
                .sum::<f64>();
        v[i] = v[i].max(TINY);
    }

    theta[m]
        .iter()
        .map(|t| t.clamp(-MA_START_BOUND, MA_START_BOUND))
        .collect()
}

/// Residuals of `y` after removing `coeffs` applied at lags step, 2*step, ...
fn filter_ar(y: &[f64], coeffs: &[f64], step: usize) -> Vec<f64> {
    if coeffs.is_empty() || step == 0 {
        return y.to_vec();
    }
    let start = coeffs.len() * step;
    (start..y.len())
        .map(|t| {
            let pred: f64 = coeffs
                .iter()
                .enumerate()
                .map(|(j, c)| c * y[t - (j + 1) * step])
                .sum();
            y[t] - pred
        })
        .collect()
}

fn at_seasonal_lags(y: &[f64], count: usize, s: usize) -> Vec<f64> {
    (0..=count).map(|k| autocovariance(y, k * s)).collect()
}

/// Starting coefficients for `order` on the differenced, mean-removed series.
pub fn compute_start_params(w: &[f64], order: &ModelOrder) -> Result<ArmaParams> {
    let (p, q, pp, qq, s) = (order.p, order.q, order.pp, order.qq, order.s);
    if w.len() < 3 {
        return Ok(ArmaParams::zeros(order));
    }

    let ar = burg_ar(w, p)
        .or_else(|| yule_walker(w, p))
        .unwrap_or_else(|| vec![0.0; p]);
    let ar_resid = filter_ar(w, &ar, 1);

    let ma = if q > 0 && ar_resid.len() > q {
        let gamma: Vec<f64> = (0..=q).map(|k| autocovariance(&ar_resid, k)).collect();
        innovations(&gamma, q)
    } else {
        vec![0.0; q]
    };

    let sar = if pp > 0 && s > 0 && w.len() > pp * s {
        levinson(&at_seasonal_lags(w, pp, s), pp).unwrap_or_else(|| vec![0.0; pp])
    } else {
        vec![0.0; pp]
    };

    let sma = if qq > 0 && s > 0 {
        let base = if pp > 0 { filter_ar(w, &sar, s) } else { ar_resid };
        if base.len() > qq * s {
            innovations(&at_seasonal_lags(&base, qq, s), qq)
        } else {
            vec![0.0; qq]
        }
    } else {
        vec![0.0; qq]
    };

    let params = ArmaParams { ar, ma, sar, sma };
    if params.len() != order.n_coeffs() {
        return Err(SarimaError::ParamLengthMismatch {
            expected: order.n_coeffs(),
            got: params.len(),
        });
    }
    if params.to_flat().iter().any(|v| !v.is_finite()) {
        debug!("non-finite start values, starting from zeros");
        return Ok(ArmaParams::zeros(order));
    }
    debug!(start = ?params.to_flat(), "start parameters");
    Ok(params)
}
