use std::f64::consts::PI;

use crate::error::{Result, SarimaError};
use crate::initialization::KalmanInit;
use crate::params::ArmaParams;
use crate::state_space::StateSpace;
use crate::types::ModelOrder;

/// Output of the Kalman filter likelihood evaluation.
#[derive(Debug, Clone)]
pub struct KalmanOutput {
    /// Concentrated log-likelihood.
    pub loglike: f64,
    /// Concentrated scale sigma2_hat.
    pub scale: f64,
    /// One-step prediction errors v_t.
    pub innovations: Vec<f64>,
    /// Prediction error variances F_t, in units of sigma2.
    pub innovation_vars: Vec<f64>,
    /// Effective number of observations (n - burn).
    pub n_obs_effective: usize,
}

/// Concentrated Gaussian log-likelihood via the Kalman filter.
///
///   - Innovation: v_t = y_t - Z' a_{t|t-1},  F_t = Z' P_{t|t-1} Z
///   - Update: a_{t|t} = a_{t|t-1} + P Z v_t / F_t
///   - Predict: a_{t+1|t} = T a_{t|t},  P_{t+1|t} = T P_{t|t} T' + R R'
///
/// With the scale concentrated out:
///   sigma2_hat = (1/n_eff) * sum(v_t^2 / F_t)
///   loglike = -n_eff/2 ln(2pi) - n_eff/2 ln(sigma2_hat) - n_eff/2 - 1/2 sum(ln F_t)
pub fn kalman_loglike(endog: &[f64], ss: &StateSpace, init: &KalmanInit) -> Result<KalmanOutput> {
    let n = endog.len();
    let burn = init.loglikelihood_burn;
    if n <= burn {
        return Err(SarimaError::InsufficientData { n, min: burn + 1 });
    }
    let n_eff = n - burn;

    let mut a = init.initial_state.clone();
    let mut p = init.initial_state_cov.clone();
    let t_mat = &ss.transition;
    let z = &ss.design;
    let rrt = ss.disturbance_cov();

    let mut sum_log_f = 0.0;
    let mut sum_v2_f = 0.0;
    let mut innovations = Vec::with_capacity(n);
    let mut innovation_vars = Vec::with_capacity(n);

    for (t, &y) in endog.iter().enumerate() {
        let v = y - z.dot(&a);
        let pz = &p * z;
        let f = z.dot(&pz);
        innovations.push(v);
        innovation_vars.push(f);

        if f > 0.0 && f.is_finite() {
            let gain = &pz / f;
            let a_updated = &a + &gain * v;
            let p_updated = &p - &gain * pz.transpose();
            a = t_mat * a_updated;
            p = t_mat * p_updated * t_mat.transpose() + &rrt;
            if t >= burn {
                sum_log_f += f.ln();
                sum_v2_f += v * v / f;
            }
        } else {
            a = t_mat * &a;
            p = t_mat * &p * t_mat.transpose() + &rrt;
        }
        // Keep P symmetric against rounding drift.
        p = (&p + p.transpose()) * 0.5;
    }

    let n_f = n_eff as f64;
    let scale = sum_v2_f / n_f;
    let loglike = -0.5 * n_f * (2.0 * PI).ln() - 0.5 * n_f * scale.ln() - 0.5 * n_f - 0.5 * sum_log_f;

    Ok(KalmanOutput {
        loglike,
        scale,
        innovations,
        innovation_vars,
        n_obs_effective: n_eff,
    })
}

/// Exact likelihood of a zero-mean ARMA series under `params`.
pub fn exact_loglike(w: &[f64], params: &ArmaParams, order: &ModelOrder) -> Result<KalmanOutput> {
    let ss = StateSpace::new(params, order);
    let init = KalmanInit::stationary(&ss)?;
    kalman_loglike(w, &ss, &init)
}
