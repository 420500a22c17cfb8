//! Order search by AIC over a grid of ARMA orders.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SarimaError};
use crate::optimizer::fit;
use crate::preprocess::{difference, ndiffs, nsdiffs};
use crate::types::{FitConfig, FittedModel, Method, ModelOrder};

/// Ordinary differences tried when `d` is left open.
const MAX_AUTO_D: usize = 2;
/// Seasonal differences tried when `D` is left open.
const MAX_AUTO_DD: usize = 1;

/// Bounds of the order grid.
///
/// `d == None` lets repeated ADF tests choose the ordinary differences and
/// `dd == None` lets a seasonal variance test choose the seasonal ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    pub max_p: usize,
    pub max_q: usize,
    #[serde(rename = "max_P")]
    pub max_pp: usize,
    #[serde(rename = "max_Q")]
    pub max_qq: usize,
    pub d: Option<usize>,
    #[serde(rename = "D")]
    pub dd: Option<usize>,
    pub s: usize,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            max_p: 3,
            max_q: 3,
            max_pp: 1,
            max_qq: 1,
            d: None,
            dd: None,
            s: 0,
        }
    }
}

impl SearchSpace {
    /// Every order in the grid for differencing `(d, D)`, smallest first.
    ///
    /// Orders without ARMA or differencing terms are left out.
    pub fn candidates(&self, d: usize, dd: usize) -> Vec<ModelOrder> {
        let (max_pp, max_qq) = if self.s > 1 { (self.max_pp, self.max_qq) } else { (0, 0) };
        let dd = if self.s > 1 { dd } else { 0 };
        let mut orders = Vec::new();
        for p in 0..=self.max_p {
            for q in 0..=self.max_q {
                for pp in 0..=max_pp {
                    for qq in 0..=max_qq {
                        let order = ModelOrder::new(p, d, q, pp, dd, qq, self.s);
                        if order.validate().is_ok() {
                            orders.push(order);
                        }
                    }
                }
            }
        }
        orders
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub order: ModelOrder,
    /// `None` when the fit failed or its likelihood is not comparable.
    pub aic: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub order: ModelOrder,
    pub model: FittedModel,
    pub aic: f64,
    /// Every order tried, in grid order.
    pub candidates: Vec<Candidate>,
}

/// Exact and CSS likelihoods live on different scales, so a search run with
/// the exact likelihood only ranks models that kept it.
fn comparable(model: &FittedModel, method: Method) -> bool {
    method != Method::Exact || !model.method.starts_with("css/")
}

/// Fit every order of `space` and keep the one with the lowest AIC.
///
/// Candidates are fitted in parallel; ties go to the earlier, smaller order.
/// Failed candidates are skipped, except that cancellation aborts the
/// whole search. Open `D` and `d` are chosen before the grid is fitted.
#[tracing::instrument(skip(series, config), fields(n = series.len()))]
pub fn select_order(series: &[f64], space: &SearchSpace, config: &FitConfig) -> Result<Selection> {
    let dd = match (space.s > 1, space.dd) {
        (false, _) => 0,
        (true, Some(dd)) => dd,
        (true, None) => nsdiffs(series, space.s, MAX_AUTO_DD),
    };
    let d = match space.d {
        Some(d) => d,
        None if dd > 0 => ndiffs(difference(series, 0, dd, space.s)?.values(), MAX_AUTO_D),
        None => ndiffs(series, MAX_AUTO_D),
    };
    let differenced = difference(series, d, dd, space.s)?;
    let orders = space.candidates(d, dd);
    debug!(d, dd, candidates = orders.len(), "order search");

    let fits: Vec<Result<FittedModel>> = orders
        .par_iter()
        .map(|order| fit(&differenced, order, config))
        .collect();

    let mut best: Option<FittedModel> = None;
    let mut candidates = Vec::with_capacity(orders.len());
    for (order, result) in orders.iter().zip(fits) {
        match result {
            Ok(model) if !comparable(&model, config.method) => {
                debug!(%order, method = %model.method, "candidate fell back to CSS, not ranked");
                candidates.push(Candidate { order: *order, aic: None });
            }
            Ok(model) => {
                let aic = model.aic();
                candidates.push(Candidate { order: *order, aic: Some(aic) });
                if aic.is_finite() && best.as_ref().map_or(true, |b| aic < b.aic()) {
                    best = Some(model);
                }
            }
            Err(err @ SarimaError::Cancelled(_)) => return Err(err),
            Err(err) => {
                debug!(%order, %err, "candidate skipped");
                candidates.push(Candidate { order: *order, aic: None });
            }
        }
    }

    let model = best.ok_or(SarimaError::NoCandidateFitted { tried: orders.len() })?;
    info!(order = %model.order, aic = model.aic(), "order selected");
    Ok(Selection {
        order: model.order,
        aic: model.aic(),
        model,
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelToken;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn ar1(phi: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut y = vec![0.0; n];
        for t in 1..n {
            y[t] = phi * y[t - 1] + normal.sample(&mut rng);
        }
        y
    }

    #[test]
    fn test_candidates_skip_empty_order() {
        let space = SearchSpace {
            max_p: 1,
            max_q: 1,
            d: Some(0),
            ..Default::default()
        };
        let orders = space.candidates(0, 0);
        assert_eq!(orders.len(), 3);
        assert!(!orders.contains(&ModelOrder::arima(0, 0, 0)));
        assert_eq!(space.candidates(1, 0).len(), 4);
    }

    #[test]
    fn test_seasonal_grid() {
        let space = SearchSpace {
            max_p: 1,
            max_q: 0,
            s: 4,
            ..Default::default()
        };
        // p in {0,1}, P in {0,1}, Q in {0,1}, minus (0,0,0)(0,0,0)
        assert_eq!(space.candidates(0, 0).len(), 7);
    }

    #[test]
    fn test_selects_ar1() {
        let y = ar1(0.7, 300, 11);
        let space = SearchSpace {
            max_p: 2,
            max_q: 1,
            d: Some(0),
            ..Default::default()
        };
        let selection = select_order(&y, &space, &FitConfig::default()).unwrap();
        assert!(selection.order.p >= 1, "selected {}", selection.order);
        assert_eq!(selection.candidates.len(), 5);
        let best = selection
            .candidates
            .iter()
            .filter_map(|c| c.aic)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(selection.aic, best);
    }

    #[test]
    fn test_seasonal_differencing_chosen_automatically() {
        let mut rng = StdRng::seed_from_u64(31);
        let normal = Normal::new(0.0, 0.5).unwrap();
        let y: Vec<f64> = (0..120)
            .map(|t| {
                let angle = 2.0 * std::f64::consts::PI * t as f64 / 12.0;
                10.0 + 0.3 * t as f64 + 5.0 * angle.sin() + normal.sample(&mut rng)
            })
            .collect();
        let space = SearchSpace {
            max_p: 1,
            max_q: 0,
            max_pp: 0,
            max_qq: 1,
            s: 12,
            ..Default::default()
        };
        let selection = select_order(&y, &space, &FitConfig::default()).unwrap();
        assert_eq!(selection.order.dd, 1, "selected {}", selection.order);
        assert_eq!(selection.order.s, 12);

        let fixed = SearchSpace { dd: Some(0), d: Some(1), ..space };
        let selection = select_order(&y, &fixed, &FitConfig::default()).unwrap();
        assert_eq!(selection.order.dd, 0);
    }

    #[test]
    fn test_css_fallbacks_not_ranked_against_exact() {
        let y = ar1(0.5, 120, 5);
        let (_, model) = crate::pipeline::fit_series(&y, &ModelOrder::arima(1, 0, 0), &FitConfig::default()).unwrap();
        assert!(comparable(&model, Method::Exact));

        let fallback = FittedModel {
            method: "css/nelder-mead".into(),
            ..model
        };
        assert!(!comparable(&fallback, Method::Exact));
        assert!(comparable(&fallback, Method::Css));
    }

    #[test]
    fn test_cancellation_aborts_search() {
        let token = CancelToken::new();
        token.cancel();
        let config = FitConfig::default().with_cancel_token(token);
        let space = SearchSpace {
            max_p: 1,
            max_q: 1,
            d: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            select_order(&ar1(0.5, 100, 2), &space, &config),
            Err(SarimaError::Cancelled(_))
        ));
    }

    #[test]
    fn test_no_candidate_fitted() {
        // Constant series: every ARMA candidate is degenerate.
        let space = SearchSpace {
            max_p: 1,
            max_q: 1,
            d: Some(0),
            ..Default::default()
        };
        assert_eq!(
            select_order(&[3.0; 40], &space, &FitConfig::default()).unwrap_err(),
            SarimaError::NoCandidateFitted { tried: 3 }
        );
    }
}
