// Library exports for use in the training binary and tests

pub mod config;
pub mod data;
pub mod imputation;
pub mod model;
pub mod training;

// Re-export commonly used types
pub use config::{Activation, InitMethod, PredictorConfig, TrainingConfig};
pub use data::{load_allele_datasets, normalize_allele_name, AlleleDataset};
pub use imputation::{create_imputed_datasets, ImputationMethod};
pub use model::BindingPredictor;
pub use training::{run_training, RunOptions, TrainOutcome};
