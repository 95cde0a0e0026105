use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{backend::AutodiffBackend, Int, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::config::TrainingConfig;
use crate::data::{AlleleDataset, PEPTIDE_LENGTH};
use crate::model::BindingPredictor;

const LOG_EVERY_EPOCHS: usize = 25;

/// Fits one predictor against one allele's data. Holds the optimizer so a
/// pre-training phase and the main phase share Adam state, the way a
/// single `fit` call would.
pub struct PredictorTrainer<B: AutodiffBackend> {
    optimizer: OptimizerAdaptor<Adam, BindingPredictor<B>, B>,
    config: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> PredictorTrainer<B> {
    pub fn new(config: TrainingConfig, device: &B::Device) -> Self {
        config.validate();
        let optimizer = AdamConfig::new().init::<B, BindingPredictor<B>>();
        Self {
            optimizer,
            config,
            device: device.clone(),
        }
    }

    /// Train on the imputed pre-training data first (when present), then
    /// on the measured data. Returns the fitted model and the last
    /// epoch's mean weighted loss.
    pub fn fit(
        &mut self,
        model: BindingPredictor<B>,
        data: &AlleleDataset,
        pretrain: Option<&AlleleDataset>,
    ) -> (BindingPredictor<B>, f32) {
        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        let mut model = model;

        if let Some(pretrain_data) = pretrain {
            if self.config.pretrain_epochs > 0 && !pretrain_data.is_empty() {
                let (pretrained, loss) = self.run_phase(
                    model,
                    pretrain_data,
                    self.config.pretrain_epochs,
                    &mut rng,
                    "pretrain",
                );
                debug!("Pre-training phase finished with loss {:.6}", loss);
                model = pretrained;
            }
        }

        self.run_phase(model, data, self.config.training_epochs, &mut rng, "train")
    }

    fn run_phase(
        &mut self,
        mut model: BindingPredictor<B>,
        data: &AlleleDataset,
        epochs: usize,
        rng: &mut StdRng,
        phase: &str,
    ) -> (BindingPredictor<B>, f32) {
        data.validate();
        let learning_rate = f64::from(model.config().learning_rate);
        let mut indices: Vec<usize> = (0..data.len()).collect();
        let mut epoch_loss = 0.0f32;

        for epoch in 0..epochs {
            indices.shuffle(rng);
            let mut total_loss = 0.0f32;
            let mut batches = 0usize;

            for batch in indices.chunks(self.config.batch_size) {
                let (stepped, loss) = self.train_batch(model, data, batch, learning_rate);
                model = stepped;
                total_loss += loss;
                batches += 1;
            }

            epoch_loss = total_loss / batches.max(1) as f32;
            if (epoch + 1) % LOG_EVERY_EPOCHS == 0 {
                debug!(
                    "{} epoch {}/{}: loss = {:.6}",
                    phase,
                    epoch + 1,
                    epochs,
                    epoch_loss
                );
            }
        }

        (model, epoch_loss)
    }

    fn train_batch(
        &mut self,
        model: BindingPredictor<B>,
        data: &AlleleDataset,
        batch: &[usize],
        learning_rate: f64,
    ) -> (BindingPredictor<B>, f32) {
        let n = batch.len();
        let mut x_flat = Vec::with_capacity(n * PEPTIDE_LENGTH);
        let mut targets = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for &i in batch {
            x_flat.extend(data.x_index.row(i).iter().copied());
            targets.push(data.y[i]);
            weights.push(data.weights[i]);
        }
        let weight_total: f32 = weights.iter().sum();

        let peptides = Tensor::<B, 1, Int>::from_ints(x_flat.as_slice(), &self.device)
            .reshape([n, PEPTIDE_LENGTH]);
        let targets = Tensor::<B, 1>::from_floats(targets.as_slice(), &self.device);
        let weights = Tensor::<B, 1>::from_floats(weights.as_slice(), &self.device);

        let predictions = model.forward(peptides);
        let diff = predictions - targets;
        let loss = (diff.clone() * diff * weights)
            .sum()
            .div_scalar(weight_total.max(1e-8));

        let loss_value = loss
            .clone()
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default()
            .first()
            .copied()
            .unwrap_or(0.0);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let model = self.optimizer.step(learning_rate, model, grads);
        (model, loss_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictorConfig;
    use crate::data::{index_encode, DatasetBuilder};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tiny_dataset() -> AlleleDataset {
        let mut builder = DatasetBuilder::default();
        // Strong binders vs. non-binders with distinct residue patterns.
        for (peptide, y) in [
            ("AAAAAAAAA", 0.9),
            ("AAAAAAAAC", 0.85),
            ("AAAAAAACA", 0.88),
            ("YYYYYYYYY", 0.1),
            ("YYYYYYYYW", 0.15),
            ("YYYYYYYWY", 0.12),
        ] {
            builder.push(&index_encode(peptide).unwrap(), y, 1.0, peptide);
        }
        builder.build()
    }

    fn tiny_model(device: &<TestBackend as burn::tensor::backend::Backend>::Device) -> BindingPredictor<TestBackend> {
        let config = PredictorConfig {
            embedding_size: 4,
            hidden_layer_size: 8,
            dropout_probability: 0.0,
            learning_rate: 0.05,
            ..PredictorConfig::default()
        };
        BindingPredictor::from_hyperparameters(config, device)
    }

    #[test]
    fn fitting_reduces_loss() {
        let device = Default::default();
        let data = tiny_dataset();
        let model = tiny_model(&device);

        let config = TrainingConfig {
            training_epochs: 1,
            pretrain_epochs: 0,
            batch_size: 6,
            random_seed: 7,
        };
        let mut trainer = PredictorTrainer::new(config.clone(), &device);
        let (model, first_loss) = trainer.fit(model, &data, None);

        let config = TrainingConfig {
            training_epochs: 60,
            ..config
        };
        let mut trainer = PredictorTrainer::new(config, &device);
        let (_, final_loss) = trainer.fit(model, &data, None);
        assert!(
            final_loss < first_loss,
            "loss should shrink: {} -> {}",
            final_loss,
            first_loss
        );
    }

    #[test]
    fn pretraining_phase_runs_before_main_phase() {
        let device = Default::default();
        let data = tiny_dataset();
        let pretrain = tiny_dataset();
        let model = tiny_model(&device);

        let config = TrainingConfig {
            training_epochs: 2,
            pretrain_epochs: 2,
            batch_size: 4,
            random_seed: 7,
        };
        let mut trainer = PredictorTrainer::new(config, &device);
        let (model, loss) = trainer.fit(model, &data, Some(&pretrain));
        assert!(loss.is_finite());

        let predictions = model.predict(&data.x_index, &device).unwrap();
        assert_eq!(predictions.len(), data.len());
    }
}
