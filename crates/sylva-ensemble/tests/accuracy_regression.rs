//! Accuracy regression tests for sylva-ensemble.
//!
//! These tests verify that algorithmic changes do not degrade ensemble
//! accuracy, selection or explanation quality on deterministic synthetic data.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use sylva_ensemble::{
    Dataset, DecisionTreeConfig, DecisionTreeEnsemble, EnsembleConfig, EnsembleError,
    EnsembleManager, EnsembleMethod, ErrorKind, ExplainabilityConfig, ExplainabilityEngine,
    FeatureAnalyzer, FeatureAnalyzerConfig, ImportanceMethod, Learner, LifecycleState,
    LogisticUnit, SylvaConfig, TreeLearner, UncertaintyConfig, UncertaintyHandler,
    VotingStrategy, aggregate, create_bootstrap_sample,
};

// ---------------------------------------------------------------------------
// Helper: deterministic synthetic binary dataset
// ---------------------------------------------------------------------------

/// Generate `n_samples` rows of 3 features in `[0, 1)` labelled by the
/// linear boundary `x0 + 0.2·x1 − 0.1·x2 > 0.55`.
///
/// Rows closer than 0.05 to the boundary are redrawn so the classes are
/// separated by a margin.
fn make_linear(n_samples: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    while features.len() < n_samples {
        let row: Vec<f64> = (0..3).map(|_| rng.r#gen::<f64>()).collect();
        let score = row[0] + 0.2 * row[1] - 0.1 * row[2] - 0.55;
        if score.abs() < 0.05 {
            continue;
        }
        labels.push(if score > 0.0 { 1.0 } else { 0.0 });
        features.push(row);
    }
    let names = vec!["x0".to_string(), "x1".to_string(), "x2".to_string()];
    Dataset::new(features, labels, names).unwrap()
}

fn names(n: usize) -> Vec<String> {
    (0..n).map(|f| format!("f{f}")).collect()
}

// ---------------------------------------------------------------------------
// a) round_trip_held_out_accuracy
// ---------------------------------------------------------------------------

/// 5-member bagging on 100 rows × 3 features must classify a held-out set
/// with accuracy above 0.9.
#[test]
fn round_trip_held_out_accuracy() {
    let train = make_linear(100, 42);
    let test = make_linear(100, 7);
    let config = SylvaConfig {
        ensemble: EnsembleConfig::new(5).unwrap().with_method(EnsembleMethod::Bagging),
        ..SylvaConfig::default()
    };
    let mut model = DecisionTreeEnsemble::new(config).unwrap();
    model.initialize().unwrap();
    model.train(&train).unwrap();

    let report = model.evaluate(&test).unwrap();
    assert!(report.accuracy > 0.9, "held-out accuracy {} <= 0.9", report.accuracy);

    let predictions = model.predict(test.features()).unwrap();
    assert_eq!(predictions.len(), 100);
    for p in &predictions {
        assert!(p.class == 0.0 || p.class == 1.0);
        assert!((0.0..=1.0).contains(&p.confidence));
    }
}

// ---------------------------------------------------------------------------
// b) lifecycle_state_errors
// ---------------------------------------------------------------------------

/// Predicting before training or after dispose is a state error.
#[test]
fn lifecycle_state_errors() {
    let data = make_linear(60, 1);
    let mut model = DecisionTreeEnsemble::new(SylvaConfig::default()).unwrap();

    let err = model.predict(data.features()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    model.initialize().unwrap();
    let err = model.predict(data.features()).unwrap_err();
    assert!(matches!(err, EnsembleError::NotTrained { .. }));

    model.train(&data).unwrap();
    assert_eq!(model.state(), LifecycleState::Trained);
    model.dispose();

    let err = model.predict(data.features()).unwrap_err();
    assert!(matches!(err, EnsembleError::Disposed { .. }));
    assert_eq!(err.kind(), ErrorKind::State);
}

// ---------------------------------------------------------------------------
// c) correlated_pair_keeps_one
// ---------------------------------------------------------------------------

/// Two perfectly correlated informative columns with threshold 0.95:
/// exactly one of the pair is retained.
#[test]
fn correlated_pair_keeps_one() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut features = Vec::new();
    let mut labels = Vec::new();
    for i in 0..120 {
        let class = (i % 2) as f64;
        let signal = class * 2.0 + rng.r#gen::<f64>() * 0.5;
        let noise = rng.r#gen::<f64>();
        features.push(vec![signal, 2.0 * signal + 1.0, noise]);
        labels.push(class);
    }
    let names = vec!["a".to_string(), "a_scaled".to_string(), "noise".to_string()];

    let mut analyzer = FeatureAnalyzer::new(
        FeatureAnalyzerConfig::new()
            .with_correlation_threshold(0.95)
            .with_min_feature_importance(0.0),
    )
    .unwrap();
    analyzer.analyze_features(&features, &labels, &names).unwrap();
    let selected = analyzer.select_features(&features, &names).unwrap();

    let kept_pair = selected
        .iter()
        .filter(|n| n.as_str() == "a" || n.as_str() == "a_scaled")
        .count();
    assert_eq!(kept_pair, 1, "selected {selected:?}");
}

// ---------------------------------------------------------------------------
// d) gini_importance_monotonic
// ---------------------------------------------------------------------------

/// An informative column scores strictly higher than a random one.
#[test]
fn gini_importance_monotonic() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut features = Vec::new();
    let mut labels = Vec::new();
    for i in 0..200 {
        let class = (i % 2) as f64;
        features.push(vec![rng.r#gen::<f64>(), class + rng.r#gen::<f64>() * 0.3]);
        labels.push(class);
    }
    let names = names(2);

    let mut analyzer = FeatureAnalyzer::new(
        FeatureAnalyzerConfig::new().with_importance_method(ImportanceMethod::Gini),
    )
    .unwrap();
    let scores = analyzer.analyze_features(&features, &labels, &names).unwrap();
    assert!(
        scores.get("f1").unwrap() > scores.get("f0").unwrap(),
        "scores {:?}",
        scores.scores()
    );
    assert_eq!(scores.ranked()[0].name, "f1");
}

// ---------------------------------------------------------------------------
// e) bootstrap_determinism
// ---------------------------------------------------------------------------

/// Same seed gives the same index set; a different seed does not.
#[test]
fn bootstrap_determinism() {
    let a = create_bootstrap_sample(100, 0.8, 42);
    let b = create_bootstrap_sample(100, 0.8, 42);
    let c = create_bootstrap_sample(100, 0.8, 43);
    assert_eq!(a.len(), 80);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.iter().all(|&i| i < 100));
}

// ---------------------------------------------------------------------------
// f) boosting_weight_conservation
// ---------------------------------------------------------------------------

/// Sample weights sum to 1 after every round; member weights sum to 1.
#[test]
fn boosting_weight_conservation() {
    let data = make_linear(80, 5);
    let config = EnsembleConfig::new(4)
        .unwrap()
        .with_method(EnsembleMethod::Boosting)
        .with_seed(9);
    let mut manager = EnsembleManager::new(config).unwrap();
    let template = TreeLearner::new(DecisionTreeConfig::new().with_max_depth(Some(2)));
    manager.create_ensemble(&template);
    let report = manager
        .train_ensemble(data.features(), data.labels(), None)
        .unwrap();

    assert_eq!(report.boosting_rounds.len(), 4);
    for round in &report.boosting_rounds {
        assert!((round.sample_weight_sum - 1.0).abs() < 1e-9);
    }
    let sample_sum: f64 = manager.sample_weights().iter().sum();
    assert!((sample_sum - 1.0).abs() < 1e-9);
    let member_sum: f64 = manager.member_weights().iter().sum();
    assert!((member_sum - 1.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// g) weighted_aggregation
// ---------------------------------------------------------------------------

/// Weights [0.7, 0.3] over predictions [1.0, 0.0] aggregate to 0.7.
#[test]
fn weighted_aggregation() {
    let out = aggregate(
        VotingStrategy::Weighted,
        &[0.7, 0.3],
        &[vec![1.0], vec![0.0]],
    );
    assert!((out[0] - 0.7).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// h) uncertainty_bounds
// ---------------------------------------------------------------------------

/// Entropy and variance are non-negative; full agreement has zero variance.
#[test]
fn uncertainty_bounds() {
    let handler = UncertaintyHandler::new(UncertaintyConfig::new()).unwrap();
    let agree = vec![vec![0.8, 0.1]; 4];
    let metrics = handler.metrics(&agree).unwrap();
    assert!(metrics.variance.abs() < 1e-15);
    assert!(metrics.entropy >= 0.0);

    let disagree = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]];
    let metrics = handler.metrics(&disagree).unwrap();
    assert!(metrics.variance > 0.0);
    assert!(metrics.mutual_information >= 0.0);
    assert!((0.0..=1.0).contains(&metrics.confidence));
}

// ---------------------------------------------------------------------------
// i) lime_recovers_signs
// ---------------------------------------------------------------------------

/// LIME on a logistic model of `x0 − x1` assigns positive weight to x0 and
/// negative weight to x1.
#[test]
fn lime_recovers_signs() {
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let mut features = Vec::new();
    let mut labels = Vec::new();
    for _ in 0..200 {
        let row: Vec<f64> = (0..3).map(|_| rng.gen_range(-1.0..1.0)).collect();
        labels.push(if row[0] - row[1] > 0.0 { 1.0 } else { 0.0 });
        features.push(row);
    }
    let mut model = LogisticUnit::new().with_epochs(300);
    model.fit(&features, &labels, None).unwrap();

    let engine = ExplainabilityEngine::new(ExplainabilityConfig::new()).unwrap();
    let explanation = engine
        .explain_prediction(&model, &[0.1, -0.1, 0.0], &names(3))
        .unwrap();
    let local = explanation.local_interpretation();
    assert!(local[0] > 0.0, "local {local:?}");
    assert!(local[1] < 0.0, "local {local:?}");
    assert!((0.0..=1.0).contains(&explanation.confidence()));
    assert!((0.0..=1.0).contains(&explanation.reliability()));
}

// ---------------------------------------------------------------------------
// j) shifted_labels_keep_uncertainty
// ---------------------------------------------------------------------------

/// Labels {1, 2} with every seventh label flipped: probabilities still
/// separate the classes and member disagreement still shows up as variance
/// and entropy.
#[test]
fn shifted_labels_keep_uncertainty() {
    let base = make_linear(140, 13);
    let labels: Vec<f64> = base
        .labels()
        .iter()
        .enumerate()
        .map(|(i, &l)| if i % 7 == 0 { 2.0 - l } else { l + 1.0 })
        .collect();
    let train = Dataset::new(base.features().to_vec(), labels, base.feature_names().to_vec())
        .unwrap();
    let test = make_linear(60, 14);

    let config = SylvaConfig {
        ensemble: EnsembleConfig::new(5)
            .unwrap()
            .with_method(EnsembleMethod::Bagging)
            .with_subsample_ratio(0.3),
        ..SylvaConfig::default()
    };
    let mut model = DecisionTreeEnsemble::new(config).unwrap();
    model.initialize().unwrap();
    let summary = model.train(&train).unwrap();
    assert!((0.0..=1.0).contains(&summary.explainability_score));

    let clear = model
        .predict(&[vec![0.05, 0.1, 0.9], vec![0.95, 0.9, 0.1]])
        .unwrap();
    assert!(clear[0].probability < 0.5, "class 1 row {:?}", clear[0]);
    assert!(clear[1].probability > 0.5, "class 2 row {:?}", clear[1]);

    let predictions = model.predict(test.features()).unwrap();
    let mut probabilities: Vec<f64> = predictions.iter().map(|p| p.probability).collect();
    probabilities.sort_unstable_by(f64::total_cmp);
    probabilities.dedup();
    assert!(probabilities.len() > 1, "probabilities {probabilities:?}");
    assert!(predictions.iter().all(|p| p.class == 1.0 || p.class == 2.0));
    let max_variance = predictions.iter().map(|p| p.variance).fold(0.0, f64::max);
    assert!(max_variance > 0.0);

    let metrics = model.uncertainty_metrics(test.features()).unwrap();
    assert!(metrics.variance > 0.0);
    assert!(metrics.entropy > 0.0);

    for explanation in model.explain(&test.features()[..5]).unwrap() {
        let confidence = explanation.confidence();
        assert!(confidence.is_finite() && (0.0..=1.0).contains(&confidence));
    }
}
