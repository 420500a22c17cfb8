use nalgebra::{DMatrix, DVector};

use crate::params::ArmaParams;
use crate::polynomial::{reduced_ar, reduced_ma};
use crate::types::ModelOrder;

/// Harvey-form state space of a (multiplicative) ARMA process with unit
/// innovation variance:
///
/// ```text
/// y_t       = Z' a_t
/// a_{t+1}   = T a_t + R e_{t+1},   e ~ N(0, 1)
/// ```
///
/// `T` carries the reduced AR coefficients in its first column with ones on
/// the superdiagonal; `R` is the reduced MA polynomial padded to `k_states`.
#[derive(Debug, Clone)]
pub struct StateSpace {
    pub k_states: usize,
    pub transition: DMatrix<f64>,
    pub design: DVector<f64>,
    pub selection: DVector<f64>,
}

impl StateSpace {
    pub fn new(params: &ArmaParams, order: &ModelOrder) -> Self {
        let k = order.k_order();
        let red_ar = reduced_ar(params, order.s);
        let red_ma = reduced_ma(params, order.s);

        let mut transition = DMatrix::zeros(k, k);
        for (i, c) in red_ar.iter().enumerate().skip(1) {
            transition[(i - 1, 0)] = -c;
        }
        for i in 0..k - 1 {
            transition[(i, i + 1)] = 1.0;
        }

        let mut design = DVector::zeros(k);
        design[0] = 1.0;

        let mut selection = DVector::zeros(k);
        for (i, c) in red_ma.iter().enumerate().take(k) {
            selection[i] = *c;
        }

        Self {
            k_states: k,
            transition,
            design,
            selection,
        }
    }

    /// R R', the state disturbance covariance per unit innovation variance.
    pub fn disturbance_cov(&self) -> DMatrix<f64> {
        &self.selection * self.selection.transpose()
    }
}
