use serde::{Deserialize, Serialize};

use crate::error::{Result, SarimaError};
use crate::types::ModelOrder;

/// Factor applied per step when pulling coefficients back inside the stable region.
const SHRINK_FACTOR: f64 = 0.9;
const MAX_SHRINK_STEPS: usize = 200;
/// Partial autocorrelations are kept strictly inside (-1, 1) when inverting.
const PACF_BOUND: f64 = 1.0 - 1e-8;

/// AR/MA coefficients of a multiplicative SARIMA model.
///
/// Flat layout used by the optimizer: `[ar(p) | ma(q) | sar(P) | sma(Q)]`.
/// AR coefficients follow `y_t = sum phi_i y_{t-i} + ...`, MA coefficients
/// follow `... + e_t + sum theta_j e_{t-j}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArmaParams {
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sar: Vec<f64>,
    pub sma: Vec<f64>,
}

impl ArmaParams {
    pub fn zeros(order: &ModelOrder) -> Self {
        Self {
            ar: vec![0.0; order.p],
            ma: vec![0.0; order.q],
            sar: vec![0.0; order.pp],
            sma: vec![0.0; order.qq],
        }
    }

    /// Unpack a flat parameter vector.
    pub fn from_flat(flat: &[f64], order: &ModelOrder) -> Result<Self> {
        let expected = order.n_coeffs();
        if flat.len() != expected {
            return Err(SarimaError::ParamLengthMismatch {
                expected,
                got: flat.len(),
            });
        }
        let (ar, rest) = flat.split_at(order.p);
        let (ma, rest) = rest.split_at(order.q);
        let (sar, sma) = rest.split_at(order.pp);
        Ok(Self {
            ar: ar.to_vec(),
            ma: ma.to_vec(),
            sar: sar.to_vec(),
            sma: sma.to_vec(),
        })
    }

    pub fn to_flat(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.len());
        v.extend(&self.ar);
        v.extend(&self.ma);
        v.extend(&self.sar);
        v.extend(&self.sma);
        v
    }

    pub fn len(&self) -> usize {
        self.ar.len() + self.ma.len() + self.sar.len() + self.sma.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Both AR factors have all roots outside the unit circle.
    pub fn is_stationary(&self) -> bool {
        is_stationary(&self.ar) && is_stationary(&self.sar)
    }

    /// Both MA factors have all roots outside the unit circle.
    pub fn is_invertible(&self) -> bool {
        is_invertible(&self.ma) && is_invertible(&self.sma)
    }

    /// Shrink offending factors toward zero until they satisfy the requested bounds.
    pub fn reprojected(self, stationarity: bool, invertibility: bool) -> Self {
        let ar_bound = |c: Vec<f64>| {
            if stationarity {
                shrink_until_stable(c, is_stationary)
            } else {
                c
            }
        };
        let ma_bound = |c: Vec<f64>| {
            if invertibility {
                shrink_until_stable(c, is_invertible)
            } else {
                c
            }
        };
        Self {
            ar: ar_bound(self.ar),
            ma: ma_bound(self.ma),
            sar: ar_bound(self.sar),
            sma: ma_bound(self.sma),
        }
    }
}

fn shrink_until_stable(mut coeffs: Vec<f64>, stable: fn(&[f64]) -> bool) -> Vec<f64> {
    if coeffs.iter().any(|c| !c.is_finite()) {
        return vec![0.0; coeffs.len()];
    }
    for _ in 0..MAX_SHRINK_STEPS {
        if stable(&coeffs) {
            return coeffs;
        }
        coeffs.iter_mut().for_each(|c| *c *= SHRINK_FACTOR);
    }
    vec![0.0; coeffs.len()]
}

// ---------------------------------------------------------------------------
// Stability checks
// ---------------------------------------------------------------------------

/// Step-down (Schur-Cohn) recursion from AR coefficients to partial
/// autocorrelations. `None` when a reflection coefficient reaches the unit
/// circle, i.e. the polynomial `1 - sum phi_i L^i` has a root on or inside it.
pub fn ar_to_pacf(coeffs: &[f64]) -> Option<Vec<f64>> {
    let n = coeffs.len();
    let mut pacf = vec![0.0; n];
    let mut phi = coeffs.to_vec();
    for k in (0..n).rev() {
        let r = phi[k];
        if !r.is_finite() || r.abs() >= 1.0 {
            return None;
        }
        pacf[k] = r;
        let denom = 1.0 - r * r;
        let prev: Vec<f64> = (0..k).map(|j| (phi[j] + r * phi[k - 1 - j]) / denom).collect();
        phi.truncate(k);
        phi.copy_from_slice(&prev);
    }
    Some(pacf)
}

/// Durbin-Levinson recursion from partial autocorrelations to AR coefficients.
pub fn pacf_to_ar(pacf: &[f64]) -> Vec<f64> {
    let mut phi: Vec<f64> = Vec::with_capacity(pacf.len());
    for (k, &r) in pacf.iter().enumerate() {
        let next: Vec<f64> = (0..k).map(|j| phi[j] - r * phi[k - 1 - j]).collect();
        phi = next;
        phi.push(r);
    }
    phi
}

pub fn is_stationary(ar: &[f64]) -> bool {
    ar_to_pacf(ar).is_some()
}

/// MA coefficients are invertible exactly when their negation is a stationary AR.
pub fn is_invertible(ma: &[f64]) -> bool {
    let negated: Vec<f64> = ma.iter().map(|&m| -m).collect();
    is_stationary(&negated)
}

// ---------------------------------------------------------------------------
// Monahan (1984) / Jones (1980) parameter transformations
// ---------------------------------------------------------------------------

/// Map unconstrained reals to stationary AR coefficients via
/// `r_k = x_k / sqrt(1 + x_k^2)` and Durbin-Levinson.
pub fn constrain_stationary(unconstrained: &[f64]) -> Vec<f64> {
    let pacf: Vec<f64> = unconstrained
        .iter()
        .map(|&x| x / (1.0 + x * x).sqrt())
        .collect();
    pacf_to_ar(&pacf)
}

/// Inverse of [`constrain_stationary`].
pub fn unconstrain_stationary(constrained: &[f64]) -> Vec<f64> {
    let pacf = ar_to_pacf(constrained).unwrap_or_else(|| {
        let clipped: Vec<f64> = constrained
            .iter()
            .map(|c| c.clamp(-PACF_BOUND, PACF_BOUND))
            .collect();
        ar_to_pacf(&clipped).unwrap_or_else(|| vec![0.0; constrained.len()])
    });
    pacf.iter()
        .map(|&r| {
            let r = r.clamp(-PACF_BOUND, PACF_BOUND);
            r / (1.0 - r * r).sqrt()
        })
        .collect()
}

/// Map unconstrained reals to invertible MA coefficients.
pub fn constrain_invertible(unconstrained: &[f64]) -> Vec<f64> {
    constrain_stationary(unconstrained)
        .into_iter()
        .map(|x| -x)
        .collect()
}

/// Inverse of [`constrain_invertible`].
pub fn unconstrain_invertible(constrained: &[f64]) -> Vec<f64> {
    let negated: Vec<f64> = constrained.iter().map(|&x| -x).collect();
    unconstrain_stationary(&negated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flat_to_flat_roundtrip() {
        let order = ModelOrder::new(2, 0, 1, 1, 0, 1, 12);
        let flat = vec![0.5, -0.3, 0.2, 0.4, -0.1];
        let params = ArmaParams::from_flat(&flat, &order).unwrap();
        assert_eq!(params.ar, vec![0.5, -0.3]);
        assert_eq!(params.ma, vec![0.2]);
        assert_eq!(params.sar, vec![0.4]);
        assert_eq!(params.sma, vec![-0.1]);
        assert_eq!(params.to_flat(), flat);
    }

    #[test]
    fn test_from_flat_length_mismatch() {
        let order = ModelOrder::arima(1, 0, 0);
        let err = ArmaParams::from_flat(&[0.5, 0.3], &order).unwrap_err();
        assert_eq!(err, SarimaError::ParamLengthMismatch { expected: 1, got: 2 });
    }

    #[test]
    fn test_stationarity_checks() {
        assert!(is_stationary(&[0.5]));
        assert!(!is_stationary(&[1.0]));
        assert!(!is_stationary(&[-1.2]));
        // AR(2) triangle: phi2 < 1 - |phi1|
        assert!(is_stationary(&[0.5, 0.3]));
        assert!(!is_stationary(&[0.5, 0.6]));
        assert!(!is_stationary(&[0.2, -1.1]));
        assert!(is_stationary(&[]));
    }

    #[test]
    fn test_invertibility_checks() {
        assert!(is_invertible(&[0.8]));
        assert!(is_invertible(&[-0.8]));
        assert!(!is_invertible(&[1.5]));
        assert!(!is_invertible(&[0.5, 1.2]));
    }

    #[test]
    fn test_pacf_roundtrip() {
        let ar = vec![0.6, -0.35, 0.1];
        let pacf = ar_to_pacf(&ar).unwrap();
        let back = pacf_to_ar(&pacf);
        for (a, b) in ar.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn test_monahan_roundtrip() {
        for original in [vec![0.5], vec![0.5, -0.3], vec![1.0, -0.5, 0.2]] {
            let constrained = constrain_stationary(&original);
            assert!(is_stationary(&constrained));
            let unconstrained = unconstrain_stationary(&constrained);
            for (a, b) in original.iter().zip(unconstrained.iter()) {
                assert!((a - b).abs() < 1e-10, "roundtrip failed: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_constrained_values_are_stable_for_large_inputs() {
        let constrained = constrain_stationary(&[25.0, -40.0, 13.0]);
        assert!(is_stationary(&constrained));
        let ma = constrain_invertible(&[-30.0, 8.0]);
        assert!(is_invertible(&ma));
    }

    #[test]
    fn test_constrain_stationary_empty() {
        let empty: Vec<f64> = vec![];
        assert_eq!(constrain_stationary(&[]), empty);
        assert_eq!(unconstrain_stationary(&[]), empty);
    }

    #[test]
    fn test_invertible_roundtrip() {
        let original = vec![0.4, -0.2];
        let constrained = constrain_invertible(&original);
        let unconstrained = unconstrain_invertible(&constrained);
        for (a, b) in original.iter().zip(unconstrained.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_reprojection_shrinks_explosive_factors() {
        let params = ArmaParams {
            ar: vec![1.3],
            ma: vec![2.0],
            sar: vec![0.4],
            sma: vec![],
        }
        .reprojected(true, true);
        assert!(params.is_stationary());
        assert!(params.is_invertible());
        assert_eq!(params.sar, vec![0.4]);
        assert!(params.ar[0] > 0.0 && params.ar[0] < 1.0);
    }

    #[test]
    fn test_reprojection_respects_flags() {
        let params = ArmaParams {
            ar: vec![1.3],
            ma: vec![2.0],
            ..Default::default()
        }
        .reprojected(false, true);
        assert_eq!(params.ar, vec![1.3]);
        assert!(params.is_invertible());
    }
}
