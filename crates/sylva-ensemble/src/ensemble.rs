//! Ensemble construction, training and aggregation.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
    IntoParallelRefMutIterator, ParallelIterator,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{EnsembleConfig, EnsembleMethod, VotingStrategy};
use crate::dataset::{validate_batch, validate_features, validate_labels};
use crate::error::EnsembleError;
use crate::learner::{FitHistory, Learner};
use crate::sampling::{bootstrap_draw_count, bootstrap_indices, gather, normalize};

/// Floor applied to the boosting error before taking logarithms.
pub const BOOSTING_EPSILON: f64 = 1e-10;

/// One trained predictor and its voting weight in `[0, 1]`.
#[derive(Debug)]
pub struct Member {
    learner: Box<dyn Learner>,
    weight: f64,
}

impl Member {
    /// Borrow the underlying learner.
    #[must_use]
    pub fn learner(&self) -> &dyn Learner {
        self.learner.as_ref()
    }

    /// Return the voting weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// Outcome of one boosting round.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BoostingRound {
    /// Zero-based round index (equals the member index).
    pub round: usize,
    /// Weighted misclassification rate after clamping.
    pub weighted_error: f64,
    /// Unnormalised member weight `ln((1 − err) / (err + ε))`, floored at 0.
    pub alpha: f64,
    /// Sum of the sample weights after the update.
    pub sample_weight_sum: f64,
}

/// Aggregated metrics on a held-out validation set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ValidationMetrics {
    /// Fraction of samples with `|prediction − label| < 0.5`.
    pub accuracy: f64,
    /// Mean squared error of the aggregated prediction.
    pub mse: f64,
}

/// Summary of one `train_ensemble` call.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    /// Training method used.
    pub method: EnsembleMethod,
    /// Per-member fit summaries, in member order.
    pub histories: Vec<FitHistory>,
    /// Boosting rounds; empty for other methods.
    pub boosting_rounds: Vec<BoostingRound>,
    /// Final member weights.
    pub member_weights: Vec<f64>,
    /// Metrics on the validation set, when one was given.
    pub validation: Option<ValidationMetrics>,
}

/// Builds, trains and queries a fixed-size set of learners.
#[derive(Debug)]
pub struct EnsembleManager {
    config: EnsembleConfig,
    members: Vec<Member>,
    sample_weights: Vec<f64>,
    n_features: Option<usize>,
}

/// Fraction of predictions within 0.5 of their label.
pub(crate) fn accuracy_within_half(predictions: &[f64], labels: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| (*p - *l).abs() < 0.5)
        .count();
    correct as f64 / labels.len() as f64
}

/// Unweighted mean squared error.
pub(crate) fn mean_squared_error(predictions: &[f64], labels: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(labels)
        .map(|(p, l)| (p - l) * (p - l))
        .sum::<f64>()
        / labels.len() as f64
}

/// Combine `member_predictions[member][sample]` into one value per sample.
///
/// `weights` is parallel to the members and only read by
/// [`VotingStrategy::Weighted`].
#[must_use]
pub fn aggregate(
    voting: VotingStrategy,
    weights: &[f64],
    member_predictions: &[Vec<f64>],
) -> Vec<f64> {
    let Some(first) = member_predictions.first() else {
        return Vec::new();
    };
    let n_samples = first.len();
    let n_members = member_predictions.len() as f64;
    match voting {
        VotingStrategy::Weighted => (0..n_samples)
            .map(|s| {
                member_predictions
                    .iter()
                    .zip(weights)
                    .map(|(preds, w)| w * preds[s])
                    .sum()
            })
            .collect(),
        VotingStrategy::Mean => (0..n_samples)
            .map(|s| member_predictions.iter().map(|p| p[s]).sum::<f64>() / n_members)
            .collect(),
        VotingStrategy::Mode => (0..n_samples)
            .map(|s| {
                let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
                for preds in member_predictions {
                    *counts.entry(preds[s].round() as i64).or_insert(0) += 1;
                }
                let mut best = (0i64, 0usize);
                for (class, count) in counts {
                    if count > best.1 {
                        best = (class, count);
                    }
                }
                best.0 as f64
            })
            .collect(),
    }
}

/// Transpose per-member predictions into one meta-feature row per sample.
fn meta_rows(member_predictions: &[Vec<f64>], n_samples: usize) -> Vec<Vec<f64>> {
    (0..n_samples)
        .map(|s| member_predictions.iter().map(|p| p[s]).collect())
        .collect()
}

fn predict_members(
    members: &[Member],
    features: &[Vec<f64>],
) -> Result<Vec<Vec<f64>>, EnsembleError> {
    members
        .par_iter()
        .map(|m| m.learner.predict_batch(features))
        .collect()
}

impl EnsembleManager {
    /// Create an empty manager.
    ///
    /// # Errors
    ///
    /// Any error from [`EnsembleConfig::validate`].
    pub fn new(config: EnsembleConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        Ok(Self {
            config,
            members: Vec::new(),
            sample_weights: Vec::new(),
            n_features: None,
        })
    }

    /// Replace all members with `ensemble_size` unfitted copies of `template`,
    /// each weighted `1 / ensemble_size`.
    pub fn create_ensemble(&mut self, template: &dyn Learner) {
        let size = self.config.ensemble_size;
        self.members = (0..size)
            .map(|_| Member {
                learner: template.fresh(),
                weight: 1.0 / size as f64,
            })
            .collect();
        self.sample_weights.clear();
        self.n_features = None;
        debug!(size, learner = template.name(), "ensemble created");
    }

    /// Train every member with the configured method.
    ///
    /// `validation`, when given, is scored with the aggregated prediction
    /// after training.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::EnsembleNotCreated`] | No members |
    /// | Data errors | Malformed training or validation data |
    /// | Learner errors | Propagated from member `fit` |
    #[instrument(skip_all, fields(method = %self.config.method, n_samples = features.len()))]
    pub fn train_ensemble(
        &mut self,
        features: &[Vec<f64>],
        labels: &[f64],
        validation: Option<(&[Vec<f64>], &[f64])>,
    ) -> Result<TrainingReport, EnsembleError> {
        if self.members.is_empty() {
            return Err(EnsembleError::EnsembleNotCreated);
        }
        let n_features = validate_features(features)?;
        validate_labels(labels, features.len())?;
        if let Some((val_features, val_labels)) = validation {
            validate_features(val_features)?;
            validate_labels(val_labels, val_features.len())?;
            validate_batch(val_features, n_features)?;
        }

        let n = features.len();
        self.sample_weights = vec![1.0 / n as f64; n];
        self.n_features = None;

        info!(
            members = self.members.len(),
            n_samples = n,
            n_features,
            "training ensemble"
        );

        let (histories, boosting_rounds) = match self.config.method {
            EnsembleMethod::Bagging => (self.train_bagging(features, labels)?, Vec::new()),
            EnsembleMethod::Boosting => self.train_boosting(features, labels)?,
            EnsembleMethod::Stacking => (self.train_stacking(features, labels)?, Vec::new()),
        };
        self.n_features = Some(n_features);

        let validation = match validation {
            Some((val_features, val_labels)) => {
                let predictions = self.predict(val_features)?;
                let metrics = ValidationMetrics {
                    accuracy: accuracy_within_half(&predictions, val_labels),
                    mse: mean_squared_error(&predictions, val_labels),
                };
                info!(
                    accuracy = metrics.accuracy,
                    mse = metrics.mse,
                    "validation scored"
                );
                Some(metrics)
            }
            None => None,
        };

        Ok(TrainingReport {
            method: self.config.method,
            histories,
            boosting_rounds,
            member_weights: self.member_weights(),
            validation,
        })
    }

    fn train_bagging(
        &mut self,
        features: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<Vec<FitHistory>, EnsembleError> {
        let n = features.len();
        let draw_count = bootstrap_draw_count(n, self.config.subsample_ratio);

        let mut master_rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let seeds: Vec<u64> = (0..self.members.len()).map(|_| master_rng.r#gen()).collect();

        let histories = self
            .members
            .par_iter_mut()
            .zip(seeds.into_par_iter())
            .map(|(member, seed)| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let indices = bootstrap_indices(n, draw_count, &mut rng);
                let (rows, targets) = gather(features, labels, &indices);
                member.learner.set_seed(rng.r#gen());
                member.learner.fit(&rows, &targets, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(draw_count, members = histories.len(), "bagging complete");
        Ok(histories)
    }

    fn train_boosting(
        &mut self,
        features: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<(Vec<FitHistory>, Vec<BoostingRound>), EnsembleError> {
        let n_members = self.members.len();
        let mut master_rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut histories = Vec::with_capacity(n_members);
        let mut rounds = Vec::with_capacity(n_members);
        let mut alphas: Vec<f64> = Vec::with_capacity(n_members);

        for round in 0..n_members {
            let learner = &mut self.members[round].learner;
            learner.set_seed(master_rng.r#gen());
            histories.push(learner.fit(features, labels, Some(self.sample_weights.as_slice()))?);
            let predictions = learner.predict_batch(features)?;

            let raw_error: f64 = predictions
                .iter()
                .zip(labels)
                .zip(&self.sample_weights)
                .filter(|((p, l), _)| (*p - *l).abs() >= 0.5)
                .map(|(_, w)| w)
                .sum();
            let weighted_error = raw_error.clamp(BOOSTING_EPSILON, 1.0 - BOOSTING_EPSILON);
            if weighted_error != raw_error {
                warn!(round, raw_error, "boosting error clamped");
            }

            let mut alpha = ((1.0 - weighted_error) / (weighted_error + BOOSTING_EPSILON)).ln();
            if alpha < 0.0 {
                warn!(round, alpha, weighted_error, "negative member weight floored at 0");
                alpha = 0.0;
            }

            for ((w, p), l) in self.sample_weights.iter_mut().zip(&predictions).zip(labels) {
                *w *= (p - l).abs().exp();
            }
            normalize(&mut self.sample_weights);

            alphas.push(alpha);
            self.reweight_members(&alphas);

            let sample_weight_sum: f64 = self.sample_weights.iter().sum();
            debug!(round, weighted_error, alpha, "boosting round complete");
            rounds.push(BoostingRound {
                round,
                weighted_error,
                alpha,
                sample_weight_sum,
            });
        }

        Ok((histories, rounds))
    }

    /// Set member weights to the normalised alphas of the rounds trained so
    /// far; untrained rounds get 0.
    fn reweight_members(&mut self, alphas: &[f64]) {
        let mut trained = alphas.to_vec();
        normalize(&mut trained);
        for (i, member) in self.members.iter_mut().enumerate() {
            member.weight = trained.get(i).copied().unwrap_or(0.0);
        }
    }

    fn train_stacking(
        &mut self,
        features: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<Vec<FitHistory>, EnsembleError> {
        let n_base = self.members.len() - 1;
        let mut master_rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let seeds: Vec<u64> = (0..self.members.len()).map(|_| master_rng.r#gen()).collect();

        let (base, meta) = self.members.split_at_mut(n_base);
        let mut histories = base
            .par_iter_mut()
            .zip(seeds[..n_base].to_vec().into_par_iter())
            .map(|(member, seed)| {
                member.learner.set_seed(seed);
                member.learner.fit(features, labels, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let base_predictions = predict_members(base, features)?;
        let meta_features = meta_rows(&base_predictions, features.len());

        let meta_learner = &mut meta[0].learner;
        meta_learner.set_seed(seeds[n_base]);
        histories.push(meta_learner.fit(&meta_features, labels, None)?);

        debug!(n_base, "stacking complete");
        Ok(histories)
    }

    fn require_trained(&self, operation: &'static str) -> Result<usize, EnsembleError> {
        if self.members.is_empty() {
            return Err(EnsembleError::EnsembleNotCreated);
        }
        self.n_features.ok_or(EnsembleError::NotTrained { operation })
    }

    /// Members that vote on the output; excludes the stacking meta member.
    fn voting_members(&self) -> &[Member] {
        match self.config.method {
            EnsembleMethod::Stacking => &self.members[..self.members.len().saturating_sub(1)],
            EnsembleMethod::Bagging | EnsembleMethod::Boosting => &self.members,
        }
    }

    /// Predictions of every voting member, `[member][sample]`.
    ///
    /// # Errors
    ///
    /// State errors before training, data errors for a malformed batch.
    pub fn member_predictions(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, EnsembleError> {
        let n_features = self.require_trained("member_predictions")?;
        validate_batch(features, n_features)?;
        predict_members(self.voting_members(), features)
    }

    /// Aggregated prediction per sample.
    ///
    /// Stacking routes fresh meta-features through the meta member; other
    /// methods combine member outputs with the configured voting strategy.
    ///
    /// # Errors
    ///
    /// State errors before training, data errors for a malformed batch.
    #[instrument(skip_all, fields(n_samples = features.len()))]
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, EnsembleError> {
        let member_predictions = self.member_predictions(features)?;
        match self.config.method {
            EnsembleMethod::Stacking => {
                let meta_features = meta_rows(&member_predictions, features.len());
                let meta = &self.members[self.members.len() - 1];
                meta.learner.predict_batch(&meta_features)
            }
            EnsembleMethod::Bagging | EnsembleMethod::Boosting => {
                let weights: Vec<f64> = self.voting_members().iter().map(|m| m.weight).collect();
                Ok(aggregate(self.config.voting, &weights, &member_predictions))
            }
        }
    }

    /// Mean over samples of the variance of member predictions.
    ///
    /// # Errors
    ///
    /// Same as [`EnsembleManager::member_predictions`].
    pub fn diversity(&self, features: &[Vec<f64>]) -> Result<f64, EnsembleError> {
        let member_predictions = self.member_predictions(features)?;
        let n_members = member_predictions.len() as f64;
        if features.is_empty() || n_members == 0.0 {
            return Ok(0.0);
        }
        let total: f64 = (0..features.len())
            .map(|s| {
                let mean = member_predictions.iter().map(|p| p[s]).sum::<f64>() / n_members;
                member_predictions
                    .iter()
                    .map(|p| (p[s] - mean).powi(2))
                    .sum::<f64>()
                    / n_members
            })
            .sum();
        Ok(total / features.len() as f64)
    }

    /// Return the member weights.
    #[must_use]
    pub fn member_weights(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.weight).collect()
    }

    /// Return the current sample weights (empty before training).
    #[must_use]
    pub fn sample_weights(&self) -> &[f64] {
        &self.sample_weights
    }

    /// Borrow the members.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Return `true` once `train_ensemble` has succeeded.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.n_features.is_some()
    }

    /// Total model size across members.
    #[must_use]
    pub fn model_size(&self) -> usize {
        self.members.iter().map(|m| m.learner.model_size()).sum()
    }

    /// Drop every member and all training state. Idempotent.
    pub fn dispose(&mut self) {
        self.members.clear();
        self.sample_weights.clear();
        self.n_features = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DecisionTreeConfig, TreeLearner};

    fn linear_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let features: Vec<Vec<f64>> = (0..n)
            .map(|_| vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect();
        let labels = features
            .iter()
            .map(|r| if r[0] + 0.5 * r[1] > 0.0 { 1.0 } else { 0.0 })
            .collect();
        (features, labels)
    }

    fn manager(size: usize, method: EnsembleMethod) -> EnsembleManager {
        let config = EnsembleConfig::new(size).unwrap().with_method(method);
        let mut m = EnsembleManager::new(config).unwrap();
        m.create_ensemble(&TreeLearner::new(DecisionTreeConfig::new().with_max_depth(Some(3))));
        m
    }

    #[test]
    fn weighted_vote_matches_hand_computation() {
        let out = aggregate(VotingStrategy::Weighted, &[0.7, 0.3], &[vec![1.0], vec![0.0]]);
        assert!((out[0] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn mean_vote_averages() {
        let out = aggregate(VotingStrategy::Mean, &[0.9, 0.1], &[vec![1.0], vec![0.0]]);
        assert!((out[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mode_vote_breaks_ties_low() {
        let preds = vec![vec![1.0, 0.9], vec![0.0, 2.2], vec![0.2, 1.1], vec![0.9, 2.0]];
        let out = aggregate(VotingStrategy::Mode, &[0.25; 4], &preds);
        // Sample 0: classes {1,0,0,1} tie -> 0. Sample 1: {1,2,1,2} tie -> 1.
        assert_eq!(out, vec![0.0, 1.0]);
    }

    #[test]
    fn train_before_create_is_state_error() {
        let mut m = EnsembleManager::new(EnsembleConfig::new(2).unwrap()).unwrap();
        let (features, labels) = linear_data(20);
        let err = m.train_ensemble(&features, &labels, None).unwrap_err();
        assert!(matches!(err, EnsembleError::EnsembleNotCreated));
    }

    #[test]
    fn predict_before_train_is_state_error() {
        let m = manager(2, EnsembleMethod::Bagging);
        let err = m.predict(&[vec![0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, EnsembleError::NotTrained { .. }));
    }

    #[test]
    fn bagging_is_deterministic() {
        let (features, labels) = linear_data(60);
        let mut a = manager(4, EnsembleMethod::Bagging);
        let mut b = manager(4, EnsembleMethod::Bagging);
        a.train_ensemble(&features, &labels, None).unwrap();
        b.train_ensemble(&features, &labels, None).unwrap();
        assert_eq!(a.predict(&features).unwrap(), b.predict(&features).unwrap());
    }

    #[test]
    fn boosting_conserves_weights() {
        let (features, labels) = linear_data(80);
        let mut m = manager(4, EnsembleMethod::Boosting);
        let report = m.train_ensemble(&features, &labels, None).unwrap();
        assert_eq!(report.boosting_rounds.len(), 4);
        for round in &report.boosting_rounds {
            assert!((round.sample_weight_sum - 1.0).abs() < 1e-9);
            assert!(round.alpha >= 0.0);
        }
        let total: f64 = m.member_weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(m.member_weights().iter().all(|w| (0.0..=1.0).contains(w)));
    }

    /// Predicts a constant far from every 0/1 label.
    #[derive(Debug, Clone)]
    struct ConstantLearner {
        n_features: Option<usize>,
    }

    impl crate::learner::Predictor for ConstantLearner {
        fn n_features(&self) -> usize {
            self.n_features.unwrap_or(0)
        }

        fn is_fitted(&self) -> bool {
            self.n_features.is_some()
        }

        fn predict_one(&self, _sample: &[f64]) -> Result<f64, EnsembleError> {
            Ok(5.0)
        }
    }

    impl Learner for ConstantLearner {
        fn name(&self) -> &'static str {
            "constant"
        }

        fn fit(
            &mut self,
            features: &[Vec<f64>],
            _targets: &[f64],
            _sample_weights: Option<&[f64]>,
        ) -> Result<FitHistory, EnsembleError> {
            self.n_features = Some(features[0].len());
            Ok(FitHistory {
                epochs: 1,
                final_loss: 0.0,
            })
        }

        fn fresh(&self) -> Box<dyn Learner> {
            Box::new(Self { n_features: None })
        }

        fn set_seed(&mut self, _seed: u64) {}

        fn model_size(&self) -> usize {
            1
        }
    }

    #[test]
    fn boosting_perfect_member_gets_finite_weight() {
        let (features, labels) = linear_data(80);
        let config = EnsembleConfig::new(2).unwrap().with_method(EnsembleMethod::Boosting);
        let mut m = EnsembleManager::new(config).unwrap();
        m.create_ensemble(&TreeLearner::new(DecisionTreeConfig::new().with_max_depth(None)));
        let report = m.train_ensemble(&features, &labels, None).unwrap();

        let first = &report.boosting_rounds[0];
        assert_eq!(first.weighted_error, BOOSTING_EPSILON);
        assert!(first.alpha.is_finite() && first.alpha > 0.0);
        for round in &report.boosting_rounds {
            assert!((round.sample_weight_sum - 1.0).abs() < 1e-9);
        }
        let total: f64 = m.member_weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn boosting_always_wrong_member_floored_at_zero() {
        let (features, labels) = linear_data(40);
        let config = EnsembleConfig::new(3).unwrap().with_method(EnsembleMethod::Boosting);
        let mut m = EnsembleManager::new(config).unwrap();
        m.create_ensemble(&ConstantLearner { n_features: None });
        let report = m.train_ensemble(&features, &labels, None).unwrap();

        for round in &report.boosting_rounds {
            assert_eq!(round.weighted_error, 1.0 - BOOSTING_EPSILON);
            assert_eq!(round.alpha, 0.0);
            assert!((round.sample_weight_sum - 1.0).abs() < 1e-9);
        }
        // All alphas are zero, so members fall back to equal weight.
        for w in m.member_weights() {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
        let sample_sum: f64 = m.sample_weights().iter().sum();
        assert!((sample_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stacking_routes_through_meta_member() {
        let (features, labels) = linear_data(60);
        let mut m = manager(3, EnsembleMethod::Stacking);
        let report = m.train_ensemble(&features, &labels, None).unwrap();
        assert_eq!(report.histories.len(), 3);
        assert_eq!(m.member_predictions(&features).unwrap().len(), 2);
        let preds = m.predict(&features).unwrap();
        assert!(accuracy_within_half(&preds, &labels) > 0.8);
    }

    #[test]
    fn validation_metrics_reported() {
        let (features, labels) = linear_data(100);
        let (train_x, val_x) = features.split_at(70);
        let (train_y, val_y) = labels.split_at(70);
        let mut m = manager(5, EnsembleMethod::Bagging);
        let report = m
            .train_ensemble(train_x, train_y, Some((val_x, val_y)))
            .unwrap();
        let val = report.validation.unwrap();
        assert!(val.accuracy > 0.7, "accuracy = {}", val.accuracy);
        assert!(val.mse >= 0.0);
    }

    #[test]
    fn validation_width_mismatch_rejected() {
        let (features, labels) = linear_data(20);
        let mut m = manager(2, EnsembleMethod::Bagging);
        let bad = vec![vec![1.0]];
        let err = m
            .train_ensemble(&features, &labels, Some((bad.as_slice(), [0.0].as_slice())))
            .unwrap_err();
        assert!(matches!(err, EnsembleError::PredictionFeatureMismatch { .. }));
    }

    #[test]
    fn agreeing_members_have_zero_diversity() {
        let features = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![0.0, 0.0, 1.0, 1.0];
        let config = EnsembleConfig::new(3)
            .unwrap()
            .with_method(EnsembleMethod::Stacking);
        let mut m = EnsembleManager::new(config).unwrap();
        m.create_ensemble(&TreeLearner::new(DecisionTreeConfig::new()));
        m.train_ensemble(&features, &labels, None).unwrap();
        assert!(m.diversity(&features).unwrap().abs() < 1e-12);
    }

    #[test]
    fn dispose_is_idempotent() {
        let (features, labels) = linear_data(20);
        let mut m = manager(2, EnsembleMethod::Bagging);
        m.train_ensemble(&features, &labels, None).unwrap();
        m.dispose();
        m.dispose();
        assert!(!m.is_trained());
        assert!(matches!(
            m.predict(&features).unwrap_err(),
            EnsembleError::EnsembleNotCreated
        ));
    }
}
