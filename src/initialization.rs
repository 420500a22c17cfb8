use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SarimaError};
use crate::state_space::StateSpace;

const MAX_DOUBLINGS: usize = 64;
const LYAPUNOV_TOL: f64 = 1e-12;

/// Kalman filter initial state and covariance.
pub struct KalmanInit {
    /// Initial state vector a_0 (zeros).
    pub initial_state: DVector<f64>,
    /// Initial state covariance P_0.
    pub initial_state_cov: DMatrix<f64>,
    /// Number of initial observations left out of the likelihood.
    pub loglikelihood_burn: usize,
}

impl KalmanInit {
    /// Unconditional distribution of a stationary state: P_0 solves
    /// `P = T P T' + R R'`.
    ///
    /// Solved by doubling: `P_{j+1} = P_j + A_j P_j A_j'`, `A_{j+1} = A_j^2`,
    /// so after j steps P_j sums the first 2^j terms of the series.
    pub fn stationary(ss: &StateSpace) -> Result<Self> {
        let k = ss.k_states;
        let mut p = ss.disturbance_cov();
        let mut a = ss.transition.clone();

        for _ in 0..MAX_DOUBLINGS {
            let next = &p + &a * &p * a.transpose();
            let delta = (&next - &p).amax();
            p = next;
            if p.iter().any(|v| !v.is_finite()) {
                break;
            }
            if delta <= LYAPUNOV_TOL * p.amax().max(1.0) {
                return Ok(Self {
                    initial_state: DVector::zeros(k),
                    initial_state_cov: p,
                    loglikelihood_burn: 0,
                });
            }
            a = &a * &a;
        }
        Err(SarimaError::DegenerateModel(
            "state covariance does not converge; AR part is not stationary".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ArmaParams;
    use crate::types::ModelOrder;

    #[test]
    fn test_stationary_ar1_variance() {
        // Var(y) = 1 / (1 - phi^2)
        let params = ArmaParams {
            ar: vec![0.8],
            ..Default::default()
        };
        let ss = StateSpace::new(&params, &ModelOrder::arima(1, 0, 0));
        let init = KalmanInit::stationary(&ss).unwrap();
        assert!((init.initial_state_cov[(0, 0)] - 1.0 / 0.36).abs() < 1e-9);
        assert_eq!(init.loglikelihood_burn, 0);
    }

    #[test]
    fn test_stationary_ma1_variance() {
        // Var(y) = 1 + theta^2
        let params = ArmaParams {
            ma: vec![0.5],
            ..Default::default()
        };
        let ss = StateSpace::new(&params, &ModelOrder::arima(0, 0, 1));
        let init = KalmanInit::stationary(&ss).unwrap();
        assert!((init.initial_state_cov[(0, 0)] - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_stationary_solves_lyapunov() {
        let params = ArmaParams {
            ar: vec![0.5, -0.3],
            ma: vec![0.4],
            ..Default::default()
        };
        let ss = StateSpace::new(&params, &ModelOrder::arima(2, 0, 1));
        let p = KalmanInit::stationary(&ss).unwrap().initial_state_cov;
        let rhs = &ss.transition * &p * ss.transition.transpose() + ss.disturbance_cov();
        assert!((&p - rhs).amax() < 1e-9);
    }

    #[test]
    fn test_unit_root_is_rejected() {
        let params = ArmaParams {
            ar: vec![1.0],
            ..Default::default()
        };
        let ss = StateSpace::new(&params, &ModelOrder::arima(1, 0, 0));
        assert!(matches!(
            KalmanInit::stationary(&ss),
            Err(SarimaError::DegenerateModel(_))
        ));
    }
}
