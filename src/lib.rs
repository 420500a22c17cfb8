//! Univariate SARIMA estimation, forecasting and backtesting.
//!
//! The usual path is [`pipeline::analyze`] for a one-shot fit, forecast
//! and diagnosis, or [`pipeline::fit_series`] followed by
//! [`forecast::forecast`] when the pieces are needed separately.

pub mod error;
pub mod types;
pub mod params;
pub mod polynomial;
pub mod preprocess;
pub mod labels;
pub mod state_space;
pub mod initialization;
pub mod kalman;
pub mod css;
pub mod start_params;
pub mod optimizer;
pub mod forecast;
pub mod diagnostics;
pub mod backtest;
pub mod selection;
pub mod pipeline;
pub mod batch;

pub use backtest::BacktestResult;
pub use diagnostics::{Diagnostics, LjungBox};
pub use error::{Result, SarimaError};
pub use forecast::{forecast, residual_report, ResidualReport};
pub use optimizer::fit;
pub use pipeline::{analyze, fit_series, AnalysisResult};
pub use preprocess::{difference, integrate, stationarity, DifferencedSeries, StationarityLabel};
pub use selection::{select_order, SearchSpace, Selection};
pub use types::{
    BacktestMetrics, CancelToken, FitConfig, FittedModel, ForecastConfig, ForecastPoint, IntervalMethod, Method,
    ModelOrder, Observation, Optimizer,
};
