//! Conditional sum of squares.
//!
//! Residuals are computed by the ARMA recursion conditional on the first
//! `p + P*s` observations, with pre-sample innovations set to zero.

use std::f64::consts::PI;

use crate::error::{Result, SarimaError};
use crate::params::ArmaParams;
use crate::polynomial::{reduced_ar, reduced_ma};
use crate::types::ModelOrder;

#[derive(Debug, Clone)]
pub struct CssOutput {
    pub loglike: f64,
    pub sigma2: f64,
    /// One entry per observation; the first `warmup` are zero.
    pub residuals: Vec<f64>,
    pub warmup: usize,
}

/// e_t = w_t + sum_{i>=1} ar_i w_{t-i} - sum_{j>=1} ma_j e_{t-j} for t >= warmup,
/// where `ar` and `ma` are full lag polynomials with leading 1.
pub fn conditional_residuals(w: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let warmup = ar.len().saturating_sub(1);
    let mut e = vec![0.0; w.len()];
    for t in warmup..w.len() {
        let mut v = w[t];
        for (i, c) in ar.iter().enumerate().skip(1) {
            v += c * w[t - i];
        }
        for (j, c) in ma.iter().enumerate().skip(1).take(t) {
            v -= c * e[t - j];
        }
        e[t] = v;
    }
    e
}

/// Gaussian log-likelihood of the conditional residuals with the scale
/// concentrated out: `-n/2 (ln(2 pi sigma2) + 1)`, `n = len - warmup`.
pub fn css_loglike(w: &[f64], params: &ArmaParams, order: &ModelOrder) -> Result<CssOutput> {
    let warmup = order.k_ar();
    if w.len() <= warmup {
        return Err(SarimaError::InsufficientData {
            n: w.len(),
            min: warmup + 1,
        });
    }
    let residuals = conditional_residuals(w, &reduced_ar(params, order.s), &reduced_ma(params, order.s));
    let n = (w.len() - warmup) as f64;
    let sigma2 = residuals[warmup..].iter().map(|e| e * e).sum::<f64>() / n;
    let loglike = -0.5 * n * ((2.0 * PI * sigma2).ln() + 1.0);
    Ok(CssOutput {
        loglike,
        sigma2,
        residuals,
        warmup,
    })
}
