pub mod run;
pub mod trainer;

pub use run::{artifact_paths, decide, run_training, Decision, RunOptions, TrainOutcome};
pub use trainer::PredictorTrainer;
