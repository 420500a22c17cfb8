use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use sarima_rs::{fit_series, FitConfig, Method, ModelOrder, Optimizer};

fn arima_series(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut w = vec![0.0; n];
    let mut e_prev = 0.0;
    for t in 2..n {
        let e = normal.sample(&mut rng);
        w[t] = 0.5 * w[t - 1] - 0.2 * w[t - 2] + e + 0.3 * e_prev;
        e_prev = e;
    }
    w.iter()
        .scan(100.0, |level, dw| {
            *level += dw;
            Some(*level)
        })
        .collect()
}

fn bench_fit(c: &mut Criterion) {
    let y = arima_series(300, 42);
    let order = ModelOrder::arima(2, 1, 1);
    let mut group = c.benchmark_group("fit_arima_2_1_1");
    for (method, optimizer) in [
        (Method::Exact, Optimizer::NelderMead),
        (Method::Exact, Optimizer::Lbfgs),
        (Method::Css, Optimizer::NelderMead),
    ] {
        let config = FitConfig::default().with_method(method).with_optimizer(optimizer);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{method}/{optimizer}")),
            &config,
            |b, config| b.iter(|| fit_series(std::hint::black_box(&y), &order, config)),
        );
    }
    group.finish();
}

fn bench_fit_seasonal(c: &mut Criterion) {
    let y: Vec<f64> = arima_series(240, 7)
        .iter()
        .enumerate()
        .map(|(t, v)| v + 5.0 * (2.0 * std::f64::consts::PI * t as f64 / 12.0).sin())
        .collect();
    let order = ModelOrder::new(1, 1, 0, 0, 1, 1, 12);
    let config = FitConfig::default();
    c.bench_function("fit_sarima_1_1_0_0_1_1_12", |b| {
        b.iter(|| fit_series(std::hint::black_box(&y), &order, &config))
    });
}

criterion_group!(benches, bench_fit, bench_fit_seasonal);
criterion_main!(benches);
