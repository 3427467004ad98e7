//! Criterion benchmarks for sylva-ensemble: training, prediction and explanation.

use criterion::{Criterion, criterion_group, criterion_main};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use sylva_ensemble::{
    Dataset, DecisionTreeEnsemble, EnsembleConfig, EnsembleMethod, ExplainabilityConfig,
    ExplanationMethod, SylvaConfig,
};

fn make_classification(n_samples: usize, n_features: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let class = (i % 2) as f64;
        labels.push(class);
        let row: Vec<f64> = (0..n_features)
            .map(|f| {
                let base = if f < 3 { class * 3.0 } else { 0.0 };
                base + rng.r#gen::<f64>() * 0.5
            })
            .collect();
        features.push(row);
    }
    let names: Vec<String> = (0..n_features).map(|f| format!("f{f}")).collect();
    Dataset::new(features, labels, names).unwrap()
}

fn trained(method: EnsembleMethod, data: &Dataset) -> DecisionTreeEnsemble {
    let config = SylvaConfig {
        ensemble: EnsembleConfig::new(10).unwrap().with_method(method),
        explain: ExplainabilityConfig::new().with_method(ExplanationMethod::Shap),
        ..SylvaConfig::default()
    };
    let mut model = DecisionTreeEnsemble::new(config).unwrap();
    model.initialize().unwrap();
    model.train(data).unwrap();
    model
}

fn bench_train(c: &mut Criterion) {
    let data = make_classification(500, 20, 42);
    for (label, method) in [
        ("bagging", EnsembleMethod::Bagging),
        ("boosting", EnsembleMethod::Boosting),
        ("stacking", EnsembleMethod::Stacking),
    ] {
        c.bench_function(&format!("train_{label}_500x20_10members"), |b| {
            b.iter(|| trained(method, &data));
        });
    }
}

fn bench_predict_batch(c: &mut Criterion) {
    let data = make_classification(500, 20, 42);
    let model = trained(EnsembleMethod::Bagging, &data);

    c.bench_function("predict_batch_500x20_10members", |b| {
        b.iter(|| model.predict(data.features()).unwrap());
    });
}

fn bench_explain(c: &mut Criterion) {
    let data = make_classification(200, 10, 42);
    let model = trained(EnsembleMethod::Bagging, &data);
    let rows = &data.features()[..20];

    c.bench_function("explain_ablation_20rows", |b| {
        b.iter(|| model.explain(rows).unwrap());
    });
}

criterion_group!(benches, bench_train, bench_predict_batch, bench_explain);
criterion_main!(benches);
