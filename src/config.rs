use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hidden-layer activation for the predictor network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            other => Err(format!(
                "unknown activation '{}' (choices: relu, tanh, sigmoid)",
                other
            )),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
        };
        write!(f, "{}", name)
    }
}

/// Weight initialization scheme, named after the Keras initializers the
/// hyperparameter set was tuned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    LecunUniform,
    GlorotUniform,
    HeUniform,
    Uniform,
    Normal,
}

impl FromStr for InitMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lecun_uniform" => Ok(InitMethod::LecunUniform),
            "glorot_uniform" => Ok(InitMethod::GlorotUniform),
            "he_uniform" => Ok(InitMethod::HeUniform),
            "uniform" => Ok(InitMethod::Uniform),
            "normal" => Ok(InitMethod::Normal),
            other => Err(format!(
                "unknown initialization '{}' (choices: lecun_uniform, glorot_uniform, \
                 he_uniform, uniform, normal)",
                other
            )),
        }
    }
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitMethod::LecunUniform => "lecun_uniform",
            InitMethod::GlorotUniform => "glorot_uniform",
            InitMethod::HeUniform => "he_uniform",
            InitMethod::Uniform => "uniform",
            InitMethod::Normal => "normal",
        };
        write!(f, "{}", name)
    }
}

/// Architecture and fit hyperparameters for a single allele-specific
/// predictor. Serialized verbatim into the model's `.json` structure file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub peptide_length: usize,
    pub max_ic50: f32,
    pub embedding_size: usize,
    pub hidden_layer_size: usize,
    pub activation: Activation,
    pub init: InitMethod,
    pub dropout_probability: f64,
    pub learning_rate: f32,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            peptide_length: 9,
            max_ic50: 50_000.0,
            embedding_size: 64,
            hidden_layer_size: 400,
            activation: Activation::Relu,
            init: InitMethod::LecunUniform,
            dropout_probability: 0.25,
            learning_rate: 1e-3,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) {
        assert!(self.peptide_length > 0, "peptide_length must be > 0");
        assert!(self.max_ic50 > 1.0, "max_ic50 must be > 1");
        assert!(self.embedding_size > 0, "embedding_size must be > 0");
        assert!(self.hidden_layer_size > 0, "hidden_layer_size must be > 0");
        assert!(
            (0.0..1.0).contains(&self.dropout_probability),
            "dropout_probability must be within [0,1)"
        );
        assert!(self.learning_rate > 0.0, "learning_rate must be > 0");
    }

    /// Width of the flattened embedding fed to the hidden layer.
    pub fn flattened_dim(&self) -> usize {
        self.peptide_length * self.embedding_size
    }
}

impl fmt::Display for PredictorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Knobs for the fit loop itself, shared by every allele in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub training_epochs: usize,
    pub pretrain_epochs: usize,
    pub batch_size: usize,
    pub random_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            training_epochs: 100,
            pretrain_epochs: 10,
            batch_size: 128,
            random_seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) {
        assert!(self.training_epochs > 0, "training_epochs must be > 0");
        assert!(self.batch_size > 0, "batch_size must be > 0");
    }
}

impl fmt::Display for TrainingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
