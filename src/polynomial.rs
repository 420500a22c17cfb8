//! Lag polynomials of the multiplicative SARIMA model.
//!
//! Polynomials are stored lowest power first: `[c_0, c_1, ..., c_n]` is
//! `c_0 + c_1 L + ... + c_n L^n`.

use crate::params::ArmaParams;

/// Polynomial multiplication (convolution): c[k] = sum_i a[i]*b[k-i].
pub fn polymul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return vec![];
    }
    let mut r = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            r[i + j] += ai * bj;
        }
    }
    r
}

/// `1 + sign * (c_1 L^step + c_2 L^(2 step) + ...)`.
fn lag_poly(coeffs: &[f64], step: usize, sign: f64) -> Vec<f64> {
    if coeffs.is_empty() || step == 0 {
        return vec![1.0];
    }
    let mut p = vec![0.0; coeffs.len() * step + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().enumerate() {
        p[(i + 1) * step] = sign * c;
    }
    p
}

/// AR polynomial: 1 - phi_1 L - phi_2 L^2 - ...
pub fn ar_poly(coeffs: &[f64]) -> Vec<f64> {
    lag_poly(coeffs, 1, -1.0)
}

/// Seasonal AR polynomial: 1 - Phi_1 L^s - Phi_2 L^(2s) - ...
pub fn seasonal_ar_poly(coeffs: &[f64], s: usize) -> Vec<f64> {
    lag_poly(coeffs, s, -1.0)
}

/// MA polynomial: 1 + theta_1 L + theta_2 L^2 + ...
pub fn ma_poly(coeffs: &[f64]) -> Vec<f64> {
    lag_poly(coeffs, 1, 1.0)
}

/// Seasonal MA polynomial: 1 + Theta_1 L^s + Theta_2 L^(2s) + ...
pub fn seasonal_ma_poly(coeffs: &[f64], s: usize) -> Vec<f64> {
    lag_poly(coeffs, s, 1.0)
}

/// Reduced AR polynomial phi(L) * Phi(L^s), degree p + s*P.
pub fn reduced_ar(params: &ArmaParams, s: usize) -> Vec<f64> {
    polymul(&ar_poly(&params.ar), &seasonal_ar_poly(&params.sar, s))
}

/// Reduced MA polynomial theta(L) * Theta(L^s), degree q + s*Q.
pub fn reduced_ma(params: &ArmaParams, s: usize) -> Vec<f64> {
    polymul(&ma_poly(&params.ma), &seasonal_ma_poly(&params.sma, s))
}

/// Differencing operator (1 - L)^d (1 - L^s)^D.
pub fn differencing_poly(d: usize, dd: usize, s: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = polymul(&poly, &[1.0, -1.0]);
    }
    if s > 0 {
        let seasonal = lag_poly(&[1.0], s, -1.0);
        for _ in 0..dd {
            poly = polymul(&poly, &seasonal);
        }
    }
    poly
}

/// First `n` weights of the MA(infinity) expansion psi(L) = ma(L) / ar(L).
///
/// Both polynomials must have a leading 1.
pub fn psi_weights(ar: &[f64], ma: &[f64], n: usize) -> Vec<f64> {
    let mut psi: Vec<f64> = Vec::with_capacity(n);
    for j in 0..n {
        let mut v = ma.get(j).copied().unwrap_or(0.0);
        for i in 1..ar.len().min(j + 1) {
            v -= ar[i] * psi[j - i];
        }
        psi.push(v);
    }
    psi
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
