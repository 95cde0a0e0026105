use anyhow::{Context, Result};
use burn::constant;
use burn::module::Module;
use burn::nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig,
};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::{activation, backend::Backend, Int, Tensor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::{Activation, InitMethod, PredictorConfig};
use crate::data::peptide::N_AMINO_ACIDS;

constant!(PredictorConfig);

/// Contents of the `.json` structure file written next to the weights
/// blob. Enough to rebuild the network before loading weights into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescription {
    pub format_version: u32,
    pub name: String,
    pub config: PredictorConfig,
}

const FORMAT_VERSION: u32 = 1;

/// Allele-specific affinity regressor: residue embedding, one dense
/// hidden layer, sigmoid output on the normalized affinity scale.
#[derive(Module, Debug)]
pub struct BindingPredictor<B: Backend> {
    #[module(skip)]
    config: PredictorConfig,
    embedding: Embedding<B>,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

fn initializer(init: InitMethod) -> Initializer {
    match init {
        // Lecun-uniform is Kaiming-uniform with unit gain: bound sqrt(3/fan_in).
        InitMethod::LecunUniform => Initializer::KaimingUniform {
            gain: 1.0,
            fan_out_only: false,
        },
        InitMethod::HeUniform => Initializer::KaimingUniform {
            gain: std::f64::consts::SQRT_2,
            fan_out_only: false,
        },
        InitMethod::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
        InitMethod::Uniform => Initializer::Uniform {
            min: -0.05,
            max: 0.05,
        },
        InitMethod::Normal => Initializer::Normal {
            mean: 0.0,
            std: 0.05,
        },
    }
}

impl<B: Backend> BindingPredictor<B> {
    pub fn from_hyperparameters(config: PredictorConfig, device: &B::Device) -> Self {
        config.validate();
        let init = initializer(config.init);

        let embedding = EmbeddingConfig::new(N_AMINO_ACIDS, config.embedding_size)
            .with_initializer(init.clone())
            .init(device);
        let hidden = LinearConfig::new(config.flattened_dim(), config.hidden_layer_size)
            .with_initializer(init.clone())
            .init(device);
        let dropout = DropoutConfig::new(config.dropout_probability).init();
        let output = LinearConfig::new(config.hidden_layer_size, 1)
            .with_initializer(init)
            .init(device);

        Self {
            config,
            embedding,
            hidden,
            dropout,
            output,
        }
    }

    /// Predicted normalized affinities for a batch of index-encoded
    /// peptides, shape `[n]` with values in [0,1].
    pub fn forward(&self, peptides: Tensor<B, 2, Int>) -> Tensor<B, 1> {
        let [n, length] = peptides.dims();
        let embedded = self.embedding.forward(peptides);
        let flat = embedded.reshape([n, length * self.config.embedding_size]);
        let hidden = self.hidden.forward(flat);
        let activated = match self.config.activation {
            Activation::Relu => activation::relu(hidden),
            Activation::Tanh => hidden.tanh(),
            Activation::Sigmoid => activation::sigmoid(hidden),
        };
        let dropped = self.dropout.forward(activated);
        activation::sigmoid(self.output.forward(dropped)).reshape([n])
    }

    /// Convenience wrapper over `forward` for ndarray-encoded peptides.
    pub fn predict(
        &self,
        x_index: &ndarray::Array2<i64>,
        device: &B::Device,
    ) -> Result<Vec<f32>> {
        let (n, length) = x_index.dim();
        let flat: Vec<i64> = x_index.iter().copied().collect();
        let peptides =
            Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([n, length]);
        self.forward(peptides)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read predictions: {:?}", e))
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Persist the model as the two-file artifact pair: a JSON structure
    /// description and a binary weights blob.
    pub fn to_disk(&self, name: &str, json_path: &Path, hdf_path: &Path) -> Result<()> {
        let description = ModelDescription {
            format_version: FORMAT_VERSION,
            name: name.to_string(),
            config: self.config.clone(),
        };
        let json = serde_json::to_string_pretty(&description)
            .with_context(|| "Failed to serialize model description")?;
        fs::write(json_path, json)
            .with_context(|| format!("Failed to write model description: {:?}", json_path))?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
        let bytes = recorder
            .record(self.clone().into_record(), ())
            .with_context(|| "Failed to serialize model weights")?;
        fs::write(hdf_path, bytes)
            .with_context(|| format!("Failed to write model weights: {:?}", hdf_path))?;
        Ok(())
    }

    /// Rebuild a model from its artifact pair.
    pub fn from_disk(
        json_path: &Path,
        hdf_path: &Path,
        device: &B::Device,
    ) -> Result<(Self, ModelDescription)> {
        let json = fs::read_to_string(json_path)
            .with_context(|| format!("Failed to read model description: {:?}", json_path))?;
        let description: ModelDescription = serde_json::from_str(&json)
            .with_context(|| "Failed to parse model description")?;

        let model = Self::from_hyperparameters(description.config.clone(), device);
        let bytes = fs::read(hdf_path)
            .with_context(|| format!("Failed to read model weights: {:?}", hdf_path))?;
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(bytes, device)
            .with_context(|| format!("Failed to load model weights: {:?}", hdf_path))?;
        Ok((model.load_record(record), description))
    }
}
