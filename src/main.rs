use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use sylva_ensemble::{
    Dataset, DecisionTreeEnsemble, EnsembleConfig, EnsembleMethod, ExplanationMethod,
    FeatureAnalyzer, ImportanceMethod, Prediction, RankedFeature, SylvaConfig, VotingStrategy,
};
use sylva_io::{DatasetReader, ExperimentName, ReportWriter, load_config};

#[derive(Parser)]
#[command(name = "sylva")]
#[command(about = "Decision tree ensembles with uncertainty and local explanations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for every component; overrides the seeds in --config
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// JSON configuration file; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Training data and output location shared by every subcommand.
#[derive(Args, Debug, Clone)]
struct DataArgs {
    /// Path to the training CSV file
    #[arg(long)]
    data: PathBuf,

    /// Name of the label column (defaults to the last column)
    #[arg(long)]
    label: Option<String>,

    /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
    #[arg(long)]
    experiment: String,

    /// Output directory for report files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

/// Ensemble overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone)]
struct EnsembleArgs {
    /// Ensemble method: "bagging", "boosting" or "stacking"
    #[arg(long)]
    method: Option<String>,

    /// Number of ensemble members
    #[arg(long)]
    ensemble_size: Option<usize>,

    /// Voting strategy: "weighted", "mean" or "mode"
    #[arg(long)]
    voting: Option<String>,

    /// Fit a calibration model after training
    #[arg(long, default_value_t = false)]
    calibrate: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Rank features by importance and report the selected subset
    Importance {
        #[command(flatten)]
        data: DataArgs,

        /// Importance method: "gini", "permutation" or "shap"
        #[arg(long)]
        importance_method: Option<String>,
    },

    /// Train an ensemble and evaluate it
    Train {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        ensemble: EnsembleArgs,

        /// Held-out CSV to evaluate on (defaults to the training data)
        #[arg(long)]
        test: Option<PathBuf>,
    },

    /// Train an ensemble and predict the rows of a second file
    Predict {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        ensemble: EnsembleArgs,

        /// CSV with the same columns as the training data; its labels are ignored
        #[arg(long)]
        input: PathBuf,
    },

    /// Train an ensemble and explain selected rows of the training data
    Explain {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        ensemble: EnsembleArgs,

        /// Explanation method: "lime", "shap" or "counterfactual"
        #[arg(long)]
        explain_method: Option<String>,

        /// Zero-based row indices to explain
        #[arg(long, value_delimiter = ',', default_value = "0")]
        rows: Vec<usize>,
    },
}

// --- Stdout summaries ---

#[derive(Serialize)]
struct ImportanceOutput {
    experiment: String,
    method: ImportanceMethod,
    n_samples: usize,
    ranked: Vec<RankedFeature>,
    selected: Vec<String>,
}

#[derive(Serialize)]
struct TrainOutput {
    experiment: String,
    method: EnsembleMethod,
    ensemble_size: usize,
    n_samples: usize,
    selected_features: Vec<String>,
    training_accuracy: f64,
    evaluation_accuracy: f64,
    diversity: f64,
    calibration_error: Option<f64>,
    explainability_score: f64,
    model_size: usize,
}

#[derive(Serialize)]
struct PredictOutput {
    experiment: String,
    n_samples: usize,
    mean_confidence: f64,
    predictions: Vec<Prediction>,
}

#[derive(Serialize)]
struct ExplainOutput {
    experiment: String,
    method: ExplanationMethod,
    rows: Vec<usize>,
    top_features: Vec<Option<String>>,
}

/// Load the configuration file (or defaults) and apply the global seed
/// when one was given.
fn base_config(path: Option<&Path>, seed: Option<u64>) -> Result<SylvaConfig> {
    let mut config = match path {
        Some(p) => load_config(p).context("failed to load configuration")?,
        None => SylvaConfig::default(),
    };
    let Some(seed) = seed else {
        return Ok(config);
    };
    config.features = config.features.with_seed(seed);
    config.ensemble = config.ensemble.with_seed(seed);
    config.tree = config.tree.with_seed(seed);
    config.uncertainty = config.uncertainty.with_seed(seed);
    config.explain = config.explain.with_seed(seed);
    Ok(config)
}

fn apply_ensemble_args(config: &mut SylvaConfig, args: &EnsembleArgs) -> Result<()> {
    if let Some(size) = args.ensemble_size {
        config.ensemble = EnsembleConfig::new(size)?
            .with_method(config.ensemble.method())
            .with_voting(config.ensemble.voting())
            .with_subsample_ratio(config.ensemble.subsample_ratio())
            .with_seed(config.ensemble.seed());
    }
    if let Some(method) = &args.method {
        config.ensemble = config.ensemble.clone().with_method(method.parse()?);
    }
    if let Some(voting) = &args.voting {
        config.ensemble = config
            .ensemble
            .clone()
            .with_voting(voting.parse::<VotingStrategy>()?);
    }
    if args.calibrate {
        config.enable_calibration = true;
    }
    config.validate()?;
    Ok(())
}

fn read_dataset(path: &Path, label: Option<&String>) -> Result<Dataset> {
    let dataset = DatasetReader::new(path)
        .with_label_column(label.cloned())
        .read()
        .with_context(|| format!("failed to read {}", path.display()))?;
    info!(
        n_samples = dataset.n_samples(),
        n_features = dataset.n_features(),
        "dataset loaded"
    );
    Ok(dataset)
}

fn train_model(config: SylvaConfig, dataset: &Dataset) -> Result<DecisionTreeEnsemble> {
    let mut model = DecisionTreeEnsemble::new(config)?;
    model.initialize()?;
    model.train(dataset).context("training failed")?;
    Ok(model)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    let mut config = base_config(cli.config.as_deref(), cli.seed)?;

    match cli.command {
        Command::Importance {
            data,
            importance_method,
        } => {
            let experiment_name = ExperimentName::new(data.experiment.clone())?;
            if let Some(method) = importance_method {
                config.features = config
                    .features
                    .with_importance_method(method.parse::<ImportanceMethod>()?);
            }
            let dataset = read_dataset(&data.data, data.label.as_ref())?;

            let mut analyzer = FeatureAnalyzer::new(config.features.clone())?;
            let scores = analyzer
                .analyze_features(dataset.features(), dataset.labels(), dataset.feature_names())
                .context("feature analysis failed")?;
            let selected = analyzer.select_features(dataset.features(), dataset.feature_names())?;

            let writer = ReportWriter::new(&data.output_dir, experiment_name)?;
            writer.write("importance", &scores)?;

            let output = ImportanceOutput {
                experiment: data.experiment,
                method: scores.method(),
                n_samples: dataset.n_samples(),
                ranked: scores.ranked(),
                selected,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Train {
            data,
            ensemble,
            test,
        } => {
            let experiment_name = ExperimentName::new(data.experiment.clone())?;
            apply_ensemble_args(&mut config, &ensemble)?;
            let train = read_dataset(&data.data, data.label.as_ref())?;
            let held_out = match &test {
                Some(path) => Some(read_dataset(path, data.label.as_ref())?),
                None => None,
            };

            let method = config.ensemble.method();
            let ensemble_size = config.ensemble.ensemble_size();
            let mut model = DecisionTreeEnsemble::new(config)?;
            model.initialize()?;
            let summary = model
                .train_with_validation(&train, held_out.as_ref())
                .context("training failed")?;
            let evaluation = model
                .evaluate(held_out.as_ref().unwrap_or(&train))
                .context("evaluation failed")?;

            let writer = ReportWriter::new(&data.output_dir, experiment_name)?;
            writer.write("train", &summary)?;
            writer.write("evaluate", &evaluation)?;

            let output = TrainOutput {
                experiment: data.experiment,
                method,
                ensemble_size,
                n_samples: summary.n_samples,
                selected_features: summary.selected_features,
                training_accuracy: summary.training_accuracy,
                evaluation_accuracy: evaluation.accuracy,
                diversity: summary.diversity,
                calibration_error: summary.calibration_error,
                explainability_score: summary.explainability_score,
                model_size: evaluation.model_size,
            };
            model.dispose();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Predict {
            data,
            ensemble,
            input,
        } => {
            let experiment_name = ExperimentName::new(data.experiment.clone())?;
            apply_ensemble_args(&mut config, &ensemble)?;
            let train = read_dataset(&data.data, data.label.as_ref())?;
            let rows = read_dataset(&input, data.label.as_ref())?;
            if rows.feature_names() != train.feature_names() {
                bail!(
                    "input columns {:?} differ from training columns {:?}",
                    rows.feature_names(),
                    train.feature_names()
                );
            }

            let mut model = train_model(config, &train)?;
            let predictions = model
                .predict(rows.features())
                .context("prediction failed")?;

            let writer = ReportWriter::new(&data.output_dir, experiment_name)?;
            writer.write("predict", &predictions)?;

            let mean_confidence = predictions.iter().map(|p| p.confidence).sum::<f64>()
                / predictions.len() as f64;
            let output = PredictOutput {
                experiment: data.experiment,
                n_samples: predictions.len(),
                mean_confidence,
                predictions,
            };
            model.dispose();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Explain {
            data,
            ensemble,
            explain_method,
            rows,
        } => {
            let experiment_name = ExperimentName::new(data.experiment.clone())?;
            apply_ensemble_args(&mut config, &ensemble)?;
            if let Some(method) = explain_method {
                config.explain = config
                    .explain
                    .with_method(method.parse::<ExplanationMethod>()?);
            }
            let method = config.explain.method();
            let train = read_dataset(&data.data, data.label.as_ref())?;
            if let Some(&bad) = rows.iter().find(|&&r| r >= train.n_samples()) {
                bail!("row {bad} out of range for {} rows", train.n_samples());
            }
            let instances: Vec<Vec<f64>> = rows
                .iter()
                .map(|&r| train.features()[r].clone())
                .collect();

            let mut model = train_model(config, &train)?;
            let explanations = model
                .explain(&instances)
                .context("explanation failed")?;

            let writer = ReportWriter::new(&data.output_dir, experiment_name)?;
            writer.write("explain", &explanations)?;

            let top_features = explanations
                .iter()
                .map(|e| {
                    e.feature_importance()
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(i, _)| e.feature_names()[i].clone())
                })
                .collect();
            let output = ExplainOutput {
                experiment: data.experiment,
                method,
                rows,
                top_features,
            };
            model.dispose();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(json: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn config_seeds_kept_without_flag() {
        let f = config_file(r#"{"ensemble": {"seed": 7}, "explain": {"seed": 9}}"#);
        let config = base_config(Some(f.path()), None).unwrap();
        assert_eq!(config.ensemble.seed(), 7);
        assert_eq!(config.explain.seed(), 9);
    }

    #[test]
    fn seed_flag_overrides_config_seeds() {
        let f = config_file(r#"{"ensemble": {"seed": 7}}"#);
        let config = base_config(Some(f.path()), Some(3)).unwrap();
        assert_eq!(config.ensemble.seed(), 3);
        assert_eq!(config.features.seed(), 3);
        assert_eq!(config.uncertainty.seed(), 3);
    }

    #[test]
    fn seed_flag_is_optional() {
        let args = ["sylva", "importance", "--data", "d.csv", "--experiment", "e"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.seed, None);
        assert_eq!(base_config(None, cli.seed).unwrap().ensemble.seed(), 42);

        let cli = Cli::try_parse_from(args.iter().copied().chain(["--seed", "5"])).unwrap();
        assert_eq!(cli.seed, Some(5));
    }
}
