use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use clap::{Args, Parser};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use affinity_model::config::{Activation, InitMethod, PredictorConfig, TrainingConfig};
use affinity_model::data::{load_allele_datasets, PEPTIDE_LENGTH};
use affinity_model::imputation::{create_imputed_datasets, ImputationMethod};
use affinity_model::training::{run_training, RunOptions, TrainOutcome};

type Backend = Autodiff<NdArray<f32>>;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Train one binding predictor per MHC class I allele"
)]
struct Cli {
    /// CSV file with 'mhc', 'peptide', 'peptide_length', 'meas' columns
    #[arg(long, value_name = "PATH")]
    binding_data_csv: PathBuf,

    /// Output directory for per-allele model files
    #[arg(long, value_name = "PATH")]
    output_dir: PathBuf,

    /// Retrain alleles whose model files already exist
    #[arg(long)]
    overwrite: bool,

    /// Don't train predictors for alleles with fewer than N samples
    #[arg(long, value_name = "N", default_value_t = 5)]
    min_samples_per_allele: usize,

    /// Alleles to train (default: all alleles in the dataset)
    #[arg(long, value_name = "ALLELE", num_args = 1..)]
    alleles: Vec<String>,

    /// Imputation method used to generate pre-training data
    /// (mice, knn, softimpute, svd, mean)
    #[arg(long, value_name = "METHOD")]
    imputation_method: Option<ImputationMethod>,

    #[command(flatten)]
    hyperparameters: HyperparameterArgs,
}

/// Neural-network hyperparameter flags, kept together so the main flag
/// set stays readable.
#[derive(Debug, Args)]
struct HyperparameterArgs {
    /// Affinity cap used to normalize measurements
    #[arg(long, default_value_t = 50_000.0)]
    max_ic50: f32,

    /// Residue embedding output dimension
    #[arg(long, default_value_t = 64)]
    embedding_size: usize,

    /// Width of the hidden layer
    #[arg(long, default_value_t = 400)]
    hidden_layer_size: usize,

    /// Hidden-layer activation (relu, tanh, sigmoid)
    #[arg(long, default_value = "relu")]
    activation: Activation,

    /// Weight initialization (lecun_uniform, glorot_uniform, he_uniform,
    /// uniform, normal)
    #[arg(long, default_value = "lecun_uniform")]
    initialization: InitMethod,

    /// Dropout probability after the hidden layer
    #[arg(long, default_value_t = 0.25)]
    dropout: f64,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f32,

    /// Epochs over the measured data
    #[arg(long, default_value_t = 100)]
    training_epochs: usize,

    /// Epochs over the imputed data before the main phase
    #[arg(long, default_value_t = 10)]
    pretrain_epochs: usize,

    /// Minibatch size
    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    /// Seed for minibatch shuffling
    #[arg(long, default_value_t = 42)]
    random_seed: u64,
}

impl HyperparameterArgs {
    fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            peptide_length: PEPTIDE_LENGTH,
            max_ic50: self.max_ic50,
            embedding_size: self.embedding_size,
            hidden_layer_size: self.hidden_layer_size,
            activation: self.activation,
            init: self.initialization,
            dropout_probability: self.dropout,
            learning_rate: self.learning_rate,
        }
    }

    fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            training_epochs: self.training_epochs,
            pretrain_epochs: self.pretrain_epochs,
            batch_size: self.batch_size,
            random_seed: self.random_seed,
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let predictor_config = cli.hyperparameters.predictor_config();
    predictor_config.validate();
    let training_config = cli.hyperparameters.training_config();
    training_config.validate();
    info!("Hyperparameters: {}", predictor_config);

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", cli.output_dir))?;

    let datasets = load_allele_datasets(&cli.binding_data_csv, predictor_config.max_ic50)?;
    let total_samples: usize = datasets.values().map(|d| d.len()).sum();
    info!(
        "Total dataset size = {} samples across {} alleles",
        total_samples,
        datasets.len()
    );

    let imputed = match cli.imputation_method {
        None => BTreeMap::new(),
        Some(method) => create_imputed_datasets(&datasets, method, training_config.random_seed)?,
    };

    let options = RunOptions {
        output_dir: cli.output_dir,
        overwrite: cli.overwrite,
        min_samples_per_allele: cli.min_samples_per_allele,
        alleles: cli.alleles,
    };

    let device = Default::default();
    let outcomes = run_training::<Backend>(
        &datasets,
        &imputed,
        &predictor_config,
        &training_config,
        &options,
        &device,
    )?;

    let mut trained = 0usize;
    let mut existing = 0usize;
    let mut too_few = 0usize;
    let mut malformed = 0usize;
    for outcome in outcomes.values() {
        match outcome {
            TrainOutcome::Trained { .. } => trained += 1,
            TrainOutcome::SkippedExisting => existing += 1,
            TrainOutcome::SkippedTooFewSamples { .. } => too_few += 1,
            TrainOutcome::SkippedMalformedName => malformed += 1,
        }
    }
    info!(
        "Training completed: {} trained, {} already existed, {} below sample threshold, \
         {} malformed names",
        trained, existing, too_few, malformed
    );

    Ok(())
}
