pub mod predictor;

pub use predictor::{BindingPredictor, ModelDescription};
