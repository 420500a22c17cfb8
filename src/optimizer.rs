//! Coefficient estimation: start values, parameter transforms and the
//! argmin drivers that minimise the negative log-likelihood.

use std::f64::consts::PI;
use std::time::Instant;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use tracing::{debug, info, warn};

use crate::css::css_loglike;
use crate::error::{Result, SarimaError};
use crate::kalman::exact_loglike;
use crate::params::{self, ArmaParams};
use crate::preprocess::DifferencedSeries;
use crate::start_params::compute_start_params;
use crate::types::{CancelToken, FitConfig, FittedModel, Method, ModelOrder, Optimizer};

/// Cost reported for proposals outside the stationary/invertible region.
const PENALTY: f64 = 1e100;
/// Relative step of the central-difference gradient.
const FD_STEP: f64 = 1e-5;
/// L-BFGS history length.
const LBFGS_MEMORY: usize = 7;

// ---------------------------------------------------------------------------
// Parameter transformations
// ---------------------------------------------------------------------------

/// Unconstrained optimizer vector -> model coefficients.
///
/// With enforcement on, AR factors go through the stationary transform and
/// MA factors through the invertible one; otherwise values pass through.
pub fn transform_params(
    unconstrained: &[f64],
    order: &ModelOrder,
    config: &FitConfig,
) -> Result<ArmaParams> {
    let raw = ArmaParams::from_flat(unconstrained, order)?;
    let ar = |c: Vec<f64>| {
        if config.enforce_stationarity {
            params::constrain_stationary(&c)
        } else {
            c
        }
    };
    let ma = |c: Vec<f64>| {
        if config.enforce_invertibility {
            params::constrain_invertible(&c)
        } else {
            c
        }
    };
    Ok(ArmaParams {
        ar: ar(raw.ar),
        ma: ma(raw.ma),
        sar: ar(raw.sar),
        sma: ma(raw.sma),
    })
}

/// Inverse of [`transform_params`].
pub fn untransform_params(constrained: &ArmaParams, config: &FitConfig) -> Vec<f64> {
    let ar = |c: &[f64]| {
        if config.enforce_stationarity {
            params::unconstrain_stationary(c)
        } else {
            c.to_vec()
        }
    };
    let ma = |c: &[f64]| {
        if config.enforce_invertibility {
            params::unconstrain_invertible(c)
        } else {
            c.to_vec()
        }
    };
    let mut v = ar(&constrained.ar);
    v.extend(ma(&constrained.ma));
    v.extend(ar(&constrained.sar));
    v.extend(ma(&constrained.sma));
    v
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Caller-driven limits checked on every objective evaluation.
#[derive(Debug, Clone)]
struct Budget {
    cancel: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl Budget {
    fn from_config(config: &FitConfig) -> Self {
        Self {
            cancel: config.cancel.clone(),
            deadline: config.deadline.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(SarimaError::Cancelled("cancellation requested".into()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SarimaError::Cancelled("deadline elapsed".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Objective function for argmin
// ---------------------------------------------------------------------------

/// Negative log-likelihood of the centred differenced series.
#[derive(Clone)]
struct SarimaObjective<'a> {
    w: &'a [f64],
    order: ModelOrder,
    method: Method,
    config: &'a FitConfig,
    budget: &'a Budget,
}

impl SarimaObjective<'_> {
    /// `None` for proposals outside the stable region or with a non-finite
    /// likelihood.
    fn negloglike(&self, unconstrained: &[f64]) -> Option<f64> {
        let params = transform_params(unconstrained, &self.order, self.config).ok()?;
        if !params.is_stationary() || !params.is_invertible() {
            return None;
        }
        let loglike = match self.method {
            Method::Exact => exact_loglike(self.w, &params, &self.order).ok()?.loglike,
            Method::Css => css_loglike(self.w, &params, &self.order).ok()?.loglike,
        };
        loglike.is_finite().then_some(-loglike)
    }
}

impl CostFunction for SarimaObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        self.budget.check()?;
        Ok(self.negloglike(param).unwrap_or(PENALTY))
    }
}

impl Gradient for SarimaObjective<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    /// Central differences; coordinates touching the penalty get a zero slope.
    fn gradient(&self, param: &Vec<f64>) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let mut work = param.clone();
        let mut grad = vec![0.0; param.len()];
        for i in 0..param.len() {
            let orig = work[i];
            let h = FD_STEP * orig.abs().max(1.0);
            work[i] = orig + h;
            let f_plus = self.cost(&work)?;
            work[i] = orig - h;
            let f_minus = self.cost(&work)?;
            work[i] = orig;

            let g = (f_plus - f_minus) / (2.0 * h);
            if f_plus < PENALTY && f_minus < PENALTY && g.is_finite() {
                grad[i] = g;
            }
        }
        Ok(grad)
    }
}

#[derive(Debug, Clone)]
struct Solution {
    param: Vec<f64>,
    cost: f64,
    iterations: u64,
    converged: bool,
}

fn solution_from_state<S>(state: &S) -> std::result::Result<Solution, argmin::core::Error>
where
    S: State<Param = Vec<f64>, Float = f64>,
{
    let param = state
        .get_best_param()
        .ok_or_else(|| argmin::core::Error::msg("no best parameter found"))?
        .clone();
    let reason = state.get_termination_reason();
    Ok(Solution {
        param,
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        converged: reason == Some(&TerminationReason::SolverConverged)
            || reason == Some(&TerminationReason::TargetCostReached),
    })
}

// ---------------------------------------------------------------------------
// Nelder-Mead
// ---------------------------------------------------------------------------

fn run_nelder_mead(
    objective: SarimaObjective<'_>,
    init: Vec<f64>,
    max_iter: u64,
    tolerance: f64,
) -> std::result::Result<Solution, argmin::core::Error> {
    // n+1 vertices: the start point and one step along each axis.
    let mut simplex = vec![init.clone()];
    for i in 0..init.len() {
        let mut vertex = init.clone();
        vertex[i] += if vertex[i].abs() > 0.4 {
            0.25 * vertex[i]
        } else {
            0.1
        };
        simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex).with_sd_tolerance(tolerance)?;
    let result = Executor::new(objective, solver)
        .configure(|state: argmin::core::IterState<Vec<f64>, (), (), (), (), f64>| {
            state.max_iters(max_iter)
        })
        .run()?;
    solution_from_state(result.state())
}

// ---------------------------------------------------------------------------
// L-BFGS
// ---------------------------------------------------------------------------

fn run_lbfgs(
    objective: SarimaObjective<'_>,
    init: Vec<f64>,
    max_iter: u64,
    tolerance: f64,
) -> std::result::Result<Solution, argmin::core::Error> {
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, LBFGS_MEMORY)
        .with_tolerance_grad(tolerance.sqrt())?
        .with_tolerance_cost(tolerance)?;
    let result = Executor::new(objective, solver)
        .configure(
            |state: argmin::core::IterState<Vec<f64>, Vec<f64>, (), (), (), f64>| {
                state.param(init).max_iters(max_iter)
            },
        )
        .run()?;
    solution_from_state(result.state())
}

/// Recover the crate error behind an argmin failure.
fn optimizer_error(err: argmin::core::Error) -> SarimaError {
    match err.downcast::<SarimaError>() {
        Ok(e) => e,
        Err(other) => SarimaError::DegenerateModel(format!("optimizer failed: {other}")),
    }
}

/// Simplex spread at which Nelder-Mead stops: `tolerance` relative to the
/// magnitude of the starting cost.
fn simplex_tolerance(tolerance: f64, start_cost: f64) -> f64 {
    if start_cost.is_finite() && start_cost < PENALTY {
        tolerance * start_cost.abs().max(1.0)
    } else {
        tolerance
    }
}

/// Run the configured optimizer. A converged Nelder-Mead run is restarted
/// once from its best vertex with the remaining budget.
fn optimize(objective: &SarimaObjective<'_>, x0: Vec<f64>, config: &FitConfig) -> Result<Solution> {
    let max_iter = config.iteration_budget(&objective.order);
    let start_cost = objective.cost(&x0).map_err(optimizer_error)?;
    let tol = simplex_tolerance(config.tolerance, start_cost);
    debug!(max_iter, start_cost, tol, "optimizing");
    let first = match config.optimizer {
        Optimizer::NelderMead => run_nelder_mead(objective.clone(), x0, max_iter, tol),
        Optimizer::Lbfgs => match run_lbfgs(objective.clone(), x0.clone(), max_iter, config.tolerance) {
            Ok(sol) if sol.converged && sol.cost < PENALTY => return Ok(sol),
            outcome => {
                objective.budget.check()?;
                if let Err(e) = outcome {
                    warn!(error = %e, "L-BFGS failed, falling back to Nelder-Mead");
                } else {
                    warn!("L-BFGS did not converge, falling back to Nelder-Mead");
                }
                run_nelder_mead(objective.clone(), x0, max_iter, tol)
            }
        },
    }
    .map_err(optimizer_error)?;

    let remaining = max_iter.saturating_sub(first.iterations);
    if !first.converged || remaining == 0 {
        return Ok(first);
    }
    debug!(cost = first.cost, iterations = first.iterations, "restarting Nelder-Mead");
    let refined = run_nelder_mead(objective.clone(), first.param.clone(), remaining, tol)
        .map_err(optimizer_error)?;
    let iterations = first.iterations + refined.iterations;
    if refined.cost < first.cost {
        Ok(Solution {
            iterations,
            converged: true,
            ..refined
        })
    } else {
        Ok(Solution { iterations, ..first })
    }
}

// ---------------------------------------------------------------------------
// Public fit() entry point
// ---------------------------------------------------------------------------

/// Estimate a SARIMA model on an already differenced series.
///
/// The series is centred on its sample mean when the model includes one;
/// AR/MA coefficients are then found by minimising the negative exact (or
/// conditional) log-likelihood. The scale is concentrated out.
///
/// # Errors
/// * `InvalidOrder` for degenerate or out-of-range orders
/// * `InvalidArgument` when `differenced` was built with other differencing orders
/// * `InsufficientData` when the series is too short for the order
/// * `DegenerateModel` when the differenced series is constant
/// * `NonConvergence` when the optimizer exhausts its iteration budget
/// * `Cancelled` when the token fires or the deadline passes
#[tracing::instrument(skip_all, fields(order = %order, n = differenced.len()))]
pub fn fit(differenced: &DifferencedSeries, order: &ModelOrder, config: &FitConfig) -> Result<FittedModel> {
    let order = order.normalized();
    order.validate()?;
    let (d, dd, s) = differenced.orders();
    if d != order.d || dd != order.dd || (dd > 0 && s != order.s) {
        return Err(SarimaError::InvalidArgument(format!(
            "series was differenced with (d={d}, D={dd}, s={s}) but the order is {order}"
        )));
    }
    let budget = Budget::from_config(config);
    budget.check()?;

    let w = differenced.values();
    let include_mean = config.includes_mean(&order);
    let min = order.min_differenced_len(include_mean);
    if w.len() < min {
        return Err(SarimaError::InsufficientData { n: w.len(), min });
    }

    let mean = if include_mean {
        w.iter().sum::<f64>() / w.len() as f64
    } else {
        0.0
    };
    let centered: Vec<f64> = w.iter().map(|v| v - mean).collect();

    if order.n_coeffs() == 0 {
        return Ok(closed_form(&order, centered, mean, include_mean));
    }
    if centered.iter().all(|v| *v == centered[0]) {
        return Err(SarimaError::DegenerateModel(
            "differenced series is constant".into(),
        ));
    }

    // Proposals outside the stable region are rejected whatever the
    // enforcement flags, so the start must lie inside it.
    let start = compute_start_params(&centered, &order)?.reprojected(true, true);
    let mut method = config.method;
    if method == Method::Exact && !matches!(exact_loglike(&centered, &start, &order), Ok(out) if out.loglike.is_finite())
    {
        warn!("exact likelihood unavailable at the start values, using CSS");
        method = Method::Css;
    }

    let objective = SarimaObjective {
        w: &centered,
        order,
        method,
        config,
        budget: &budget,
    };
    let x0 = untransform_params(&start, config);
    let solution = optimize(&objective, x0, config)?;
    if !solution.converged {
        return Err(SarimaError::NonConvergence {
            iterations: solution.iterations,
            cost: solution.cost,
        });
    }

    let params = transform_params(&solution.param, &order, config)?;
    let label = format!("{method}/{}", config.optimizer);
    let model = finalize(&order, &centered, params, mean, include_mean, method, label, &solution)?;
    info!(
        loglike = model.log_likelihood,
        sigma2 = model.residual_variance,
        iterations = model.n_iter,
        "fit complete"
    );
    Ok(model)
}

/// Pure differencing (plus mean): nothing to optimise.
fn closed_form(order: &ModelOrder, residuals: Vec<f64>, mean: f64, include_mean: bool) -> FittedModel {
    let n = residuals.len() as f64;
    let sigma2 = residuals.iter().map(|e| e * e).sum::<f64>() / n;
    FittedModel {
        order: *order,
        ar_coeffs: vec![],
        ma_coeffs: vec![],
        seasonal_ar_coeffs: vec![],
        seasonal_ma_coeffs: vec![],
        intercept: mean,
        has_intercept: include_mean,
        residual_variance: sigma2,
        log_likelihood: -0.5 * n * ((2.0 * PI * sigma2).ln() + 1.0),
        n_obs: residuals.len(),
        residuals,
        burn_in: 0,
        n_iter: 0,
        converged: true,
        method: "closed-form".into(),
    }
}

#[allow(clippy::too_many_arguments)]
fn finalize(
    order: &ModelOrder,
    centered: &[f64],
    params: ArmaParams,
    mean: f64,
    include_mean: bool,
    method: Method,
    label: String,
    solution: &Solution,
) -> Result<FittedModel> {
    let exact = match method {
        Method::Exact => exact_loglike(centered, &params, order)
            .ok()
            .filter(|out| out.loglike.is_finite()),
        Method::Css => None,
    };
    let (loglike, sigma2, residuals, burn_in, label) = match exact {
        Some(out) => (out.loglike, out.scale, out.innovations, 0, label),
        None => {
            if method == Method::Exact {
                warn!("exact likelihood failed at the optimum, reporting CSS");
            }
            let out = css_loglike(centered, &params, order)?;
            let label = if method == Method::Exact {
                format!("css/{}", label.trim_start_matches("exact/"))
            } else {
                label
            };
            (out.loglike, out.sigma2, out.residuals, out.warmup, label)
        }
    };

    let ArmaParams { ar, ma, sar, sma } = params;
    Ok(FittedModel {
        order: *order,
        ar_coeffs: ar,
        ma_coeffs: ma,
        seasonal_ar_coeffs: sar,
        seasonal_ma_coeffs: sma,
        intercept: mean,
        has_intercept: include_mean,
        residual_variance: sigma2,
        log_likelihood: loglike,
        residuals,
        burn_in,
        n_obs: centered.len(),
        n_iter: solution.iterations,
        converged: solution.converged,
        method: label,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::difference;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn simulate_arma(ar: &[f64], ma: &[f64], n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let burn = 200;
        let e: Vec<f64> = (0..n + burn).map(|_| normal.sample(&mut rng)).collect();
        let mut y = vec![0.0; n + burn];
        for t in 0..n + burn {
            let mut v = e[t];
            for (i, c) in ar.iter().enumerate() {
                if t > i {
                    v += c * y[t - 1 - i];
                }
            }
            for (j, c) in ma.iter().enumerate() {
                if t > j {
                    v += c * e[t - 1 - j];
                }
            }
            y[t] = v;
        }
        y.split_off(burn)
    }

    fn fit_levels(y: &[f64], order: ModelOrder, config: &FitConfig) -> Result<FittedModel> {
        let diff = difference(y, order.d, order.dd, order.s)?;
        fit(&diff, &order, config)
    }

    #[test]
    fn test_transform_roundtrip() {
        let order = ModelOrder::new(2, 0, 1, 1, 0, 1, 4);
        let config = FitConfig::default();
        let params = ArmaParams {
            ar: vec![0.5, -0.2],
            ma: vec![0.3],
            sar: vec![0.4],
            sma: vec![-0.6],
        };
        let x = untransform_params(&params, &config);
        let back = transform_params(&x, &order, &config).unwrap();
        for (a, b) in params.to_flat().iter().zip(back.to_flat()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_transform_without_enforcement_is_identity() {
        let order = ModelOrder::arima(1, 0, 1);
        let config = FitConfig {
            enforce_stationarity: false,
            enforce_invertibility: false,
            ..Default::default()
        };
        let params = transform_params(&[1.5, -2.0], &order, &config).unwrap();
        assert_eq!(params.to_flat(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_fit_ar1_recovers_coefficient() {
        let y = simulate_arma(&[0.7], &[], 400, 1);
        let model = fit_levels(&y, ModelOrder::arima(1, 0, 0), &FitConfig::default()).unwrap();
        assert!(model.converged);
        assert!((model.ar_coeffs[0] - 0.7).abs() < 0.1, "{:?}", model.ar_coeffs);
        assert!((model.residual_variance - 1.0).abs() < 0.2);
        assert!(model.has_intercept);
        assert_eq!(model.residuals.len(), 400);
        assert_eq!(model.method, "exact/nelder-mead");
    }

    #[test]
    fn test_fit_ma1_is_invertible() {
        let y = simulate_arma(&[], &[0.5], 400, 2);
        let model = fit_levels(&y, ModelOrder::arima(0, 0, 1), &FitConfig::default()).unwrap();
        assert!((model.ma_coeffs[0] - 0.5).abs() < 0.12, "{:?}", model.ma_coeffs);
        assert!(model.params().is_invertible());
    }

    #[test]
    fn test_css_and_exact_agree() {
        let y = simulate_arma(&[0.5], &[0.3], 500, 3);
        let order = ModelOrder::arima(1, 0, 1);
        let exact = fit_levels(&y, order, &FitConfig::default()).unwrap();
        let css = fit_levels(&y, order, &FitConfig::default().with_method(Method::Css)).unwrap();
        assert_eq!(css.burn_in, 1);
        assert_eq!(css.method, "css/nelder-mead");
        assert!((exact.ar_coeffs[0] - css.ar_coeffs[0]).abs() < 0.1);
        assert!((exact.ma_coeffs[0] - css.ma_coeffs[0]).abs() < 0.1);
    }

    #[test]
    fn test_lbfgs_matches_nelder_mead() {
        let y = simulate_arma(&[0.6, -0.3], &[], 400, 4);
        let order = ModelOrder::arima(2, 0, 0);
        let nm = fit_levels(&y, order, &FitConfig::default()).unwrap();
        let lbfgs =
            fit_levels(&y, order, &FitConfig::default().with_optimizer(Optimizer::Lbfgs)).unwrap();
        assert!((nm.log_likelihood - lbfgs.log_likelihood).abs() < 1e-2);
        for (a, b) in nm.ar_coeffs.iter().zip(&lbfgs.ar_coeffs) {
            assert!((a - b).abs() < 0.02, "{a} vs {b}");
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let y = simulate_arma(&[0.4], &[0.4], 200, 5);
        let order = ModelOrder::arima(1, 0, 1);
        let a = fit_levels(&y, order, &FitConfig::default()).unwrap();
        let b = fit_levels(&y, order, &FitConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_walk_closed_form() {
        let steps = simulate_arma(&[], &[], 100, 6);
        let y: Vec<f64> = steps
            .iter()
            .scan(0.0, |acc, e| {
                *acc += e;
                Some(*acc)
            })
            .collect();
        let model = fit_levels(&y, ModelOrder::arima(0, 1, 0), &FitConfig::default()).unwrap();
        assert_eq!(model.method, "closed-form");
        assert_eq!(model.n_obs, 99);
        assert!(!model.has_intercept);
        let sigma2 = steps[1..].iter().map(|e| e * e).sum::<f64>() / 99.0;
        assert!((model.residual_variance - sigma2).abs() < 1e-12);
    }

    #[test]
    fn test_simplex_tolerance_is_relative() {
        assert_eq!(simplex_tolerance(1e-8, 340.0), 1e-8 * 340.0);
        assert_eq!(simplex_tolerance(1e-8, -0.5), 1e-8);
        assert_eq!(simplex_tolerance(1e-8, PENALTY), 1e-8);
        assert_eq!(simplex_tolerance(1e-8, f64::NAN), 1e-8);
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let y = simulate_arma(&[0.5, 0.2], &[0.3], 200, 7);
        let err = fit_levels(&y, ModelOrder::arima(2, 0, 1), &FitConfig::default().with_max_iter(2))
            .unwrap_err();
        assert!(matches!(err, SarimaError::NonConvergence { iterations: 2, .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let y = simulate_arma(&[0.5], &[], 100, 8);
        let token = CancelToken::new();
        token.cancel();
        let err = fit_levels(
            &y,
            ModelOrder::arima(1, 0, 0),
            &FitConfig::default().with_cancel_token(token),
        )
        .unwrap_err();
        assert!(matches!(err, SarimaError::Cancelled(_)));
    }

    #[test]
    fn test_zero_deadline_cancels() {
        let y = simulate_arma(&[0.5], &[], 100, 9);
        let err = fit_levels(
            &y,
            ModelOrder::arima(1, 0, 0),
            &FitConfig::default().with_deadline(std::time::Duration::ZERO),
        )
        .unwrap_err();
        assert!(matches!(err, SarimaError::Cancelled(_)));
    }

    #[test]
    fn test_constant_series_is_degenerate() {
        let y = vec![5.0; 30];
        let err = fit_levels(&y, ModelOrder::arima(1, 0, 0), &FitConfig::default()).unwrap_err();
        assert!(matches!(err, SarimaError::DegenerateModel(_)));
    }

    #[test]
    fn test_mismatched_differencing_rejected() {
        let y = simulate_arma(&[0.5], &[], 50, 10);
        let diff = difference(&y, 1, 0, 0).unwrap();
        let err = fit(&diff, &ModelOrder::arima(1, 0, 0), &FitConfig::default()).unwrap_err();
        assert!(matches!(err, SarimaError::InvalidArgument(_)));
    }

    #[test]
    fn test_too_short_for_order() {
        let y = [1.0, 2.0, 1.5, 2.5, 2.0, 3.0];
        let err = fit_levels(&y, ModelOrder::arima(3, 0, 2), &FitConfig::default()).unwrap_err();
        assert!(matches!(err, SarimaError::InsufficientData { n: 6, min: 10 }));
    }
}
