use anyhow::{anyhow, Context, Result};
use burn::tensor::backend::AutodiffBackend;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{PredictorConfig, TrainingConfig};
use crate::data::{is_numeric_token, normalize_allele_name, AlleleDataset};
use crate::model::BindingPredictor;

use super::trainer::PredictorTrainer;

/// Per-allele result of the training loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOutcome {
    Trained { samples: usize },
    SkippedExisting,
    SkippedTooFewSamples { samples: usize },
    SkippedMalformedName,
}

/// What the loop should do for one allele, decided before any model is
/// built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Train,
    SkipMalformedName,
    SkipExisting,
    SkipTooFewSamples,
}

/// Apply the skip rules in their fixed order: malformed (numeric) name,
/// then existing artifacts without overwrite, then the sample threshold.
pub fn decide(
    normalized_name: &str,
    samples: usize,
    json_exists: bool,
    hdf_exists: bool,
    overwrite: bool,
    min_samples: usize,
) -> Decision {
    if is_numeric_token(normalized_name) {
        Decision::SkipMalformedName
    } else if json_exists && hdf_exists && !overwrite {
        Decision::SkipExisting
    } else if samples < min_samples {
        Decision::SkipTooFewSamples
    } else {
        Decision::Train
    }
}

/// Target paths for one allele's artifact pair.
pub fn artifact_paths(output_dir: &Path, normalized_name: &str) -> (PathBuf, PathBuf) {
    (
        output_dir.join(format!("{}.json", normalized_name)),
        output_dir.join(format!("{}.hdf", normalized_name)),
    )
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub overwrite: bool,
    pub min_samples_per_allele: usize,
    /// Alleles to train; empty means every allele in the dataset, in
    /// sorted order.
    pub alleles: Vec<String>,
}

fn remove_stale(path: &Path, what: &str) {
    if path.exists() {
        info!("Removing old {} {:?}", what, path);
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

/// Train one predictor per allele and persist each as a json+hdf pair.
///
/// Skips are recoverable and logged; a fit or persistence failure aborts
/// the whole run.
pub fn run_training<B: AutodiffBackend>(
    datasets: &BTreeMap<String, AlleleDataset>,
    imputed: &BTreeMap<String, AlleleDataset>,
    predictor_config: &PredictorConfig,
    training_config: &TrainingConfig,
    options: &RunOptions,
    device: &B::Device,
) -> Result<BTreeMap<String, TrainOutcome>> {
    let alleles: Vec<String> = if options.alleles.is_empty() {
        datasets.keys().cloned().collect()
    } else {
        options.alleles.clone()
    };

    let mut outcomes = BTreeMap::new();
    for allele in alleles {
        let normalized = normalize_allele_name(&allele);
        let data = datasets
            .get(&normalized)
            .ok_or_else(|| anyhow!("no binding data for allele '{}'", allele))?;
        data.validate();
        let pretrain = imputed.get(&normalized);

        let (json_path, hdf_path) = artifact_paths(&options.output_dir, &normalized);
        let decision = decide(
            &normalized,
            data.len(),
            json_path.exists(),
            hdf_path.exists(),
            options.overwrite,
            options.min_samples_per_allele,
        );

        match decision {
            Decision::SkipMalformedName => {
                info!("Skipping allele {} (name normalizes to digits)", normalized);
                outcomes.insert(normalized, TrainOutcome::SkippedMalformedName);
                continue;
            }
            Decision::SkipExisting => {
                info!("Skipping allele {} (model files already exist)", normalized);
                outcomes.insert(normalized, TrainOutcome::SkippedExisting);
                continue;
            }
            Decision::SkipTooFewSamples => {
                info!(
                    "Skipping allele {} ({} samples < {})",
                    normalized,
                    data.len(),
                    options.min_samples_per_allele
                );
                outcomes.insert(
                    normalized,
                    TrainOutcome::SkippedTooFewSamples {
                        samples: data.len(),
                    },
                );
                continue;
            }
            Decision::Train => {}
        }

        info!(
            "=== Training predictor for {}: {} samples, {} unique peptides{}",
            normalized,
            data.len(),
            data.unique_peptide_count(),
            match pretrain {
                Some(p) => format!(", {} imputed pre-training samples", p.len()),
                None => String::new(),
            }
        );

        remove_stale(&json_path, "model description");
        remove_stale(&hdf_path, "weights file");

        let model =
            BindingPredictor::<B>::from_hyperparameters(predictor_config.clone(), device);
        let mut trainer = PredictorTrainer::new(training_config.clone(), device);
        let (model, final_loss) = trainer.fit(model, data, pretrain);
        info!("Finished {} with loss {:.6}", normalized, final_loss);

        model
            .to_disk(&normalized, &json_path, &hdf_path)
            .with_context(|| format!("Failed to persist model for allele {}", normalized))?;

        outcomes.insert(
            normalized,
            TrainOutcome::Trained {
                samples: data.len(),
            },
        );
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{index_encode, DatasetBuilder};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn numeric_name_is_skipped_before_everything_else() {
        // Even with overwrite set and plenty of samples.
        assert_eq!(
            decide("0201", 100, true, true, true, 5),
            Decision::SkipMalformedName
        );
    }

    #[test]
    fn existing_artifacts_skip_unless_overwrite() {
        assert_eq!(decide("A0201", 10, true, true, false, 5), Decision::SkipExisting);
        assert_eq!(decide("A0201", 10, true, true, true, 5), Decision::Train);
        // One file missing is not "existing".
        assert_eq!(decide("A0201", 10, true, false, false, 5), Decision::Train);
    }

    #[test]
    fn existing_check_precedes_sample_threshold() {
        // The original driver checks artifacts before the threshold, so a
        // too-small allele with stale files reports as existing.
        assert_eq!(decide("A0201", 2, true, true, false, 5), Decision::SkipExisting);
        assert_eq!(
            decide("A0201", 2, false, false, false, 5),
            Decision::SkipTooFewSamples
        );
    }

    fn dataset(peptides: &[&str]) -> AlleleDataset {
        let mut builder = DatasetBuilder::default();
        for (i, peptide) in peptides.iter().enumerate() {
            let y = 0.1 + 0.08 * i as f32;
            builder.push(&index_encode(peptide).unwrap(), y, 1.0, peptide);
        }
        builder.build()
    }

    fn fixture() -> (BTreeMap<String, AlleleDataset>, PredictorConfig, TrainingConfig) {
        let mut datasets = BTreeMap::new();
        datasets.insert(
            "A0201".to_string(),
            dataset(&[
                "AAAAAAAAA",
                "CCCCCCCCC",
                "DDDDDDDDD",
                "EEEEEEEEE",
                "FFFFFFFFF",
                "GGGGGGGGG",
                "HHHHHHHHH",
                "IIIIIIIII",
                "KKKKKKKKK",
                "LLLLLLLLL",
            ]),
        );
        datasets.insert(
            "B0702".to_string(),
            dataset(&["MMMMMMMMM", "NNNNNNNNN", "PPPPPPPPP"]),
        );

        let predictor_config = PredictorConfig {
            embedding_size: 4,
            hidden_layer_size: 8,
            dropout_probability: 0.0,
            ..PredictorConfig::default()
        };
        let training_config = TrainingConfig {
            training_epochs: 2,
            pretrain_epochs: 1,
            batch_size: 4,
            random_seed: 7,
        };
        (datasets, predictor_config, training_config)
    }

    #[test]
    fn end_to_end_trains_only_alleles_over_threshold() {
        let (datasets, predictor_config, training_config) = fixture();
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            output_dir: dir.path().to_path_buf(),
            overwrite: false,
            min_samples_per_allele: 5,
            alleles: Vec::new(),
        };
        let device = Default::default();

        let outcomes = run_training::<TestBackend>(
            &datasets,
            &BTreeMap::new(),
            &predictor_config,
            &training_config,
            &options,
            &device,
        )
        .unwrap();

        assert_eq!(outcomes["A0201"], TrainOutcome::Trained { samples: 10 });
        assert_eq!(
            outcomes["B0702"],
            TrainOutcome::SkippedTooFewSamples { samples: 3 }
        );

        let (a_json, a_hdf) = artifact_paths(dir.path(), "A0201");
        assert!(a_json.exists() && a_hdf.exists());
        let (b_json, b_hdf) = artifact_paths(dir.path(), "B0702");
        assert!(!b_json.exists() && !b_hdf.exists());

        // Rerun without overwrite is idempotent: the trained allele is
        // skipped, nothing changes on disk.
        let before = fs::read(&a_hdf).unwrap();
        let outcomes = run_training::<TestBackend>(
            &datasets,
            &BTreeMap::new(),
            &predictor_config,
            &training_config,
            &options,
            &device,
        )
        .unwrap();
        assert_eq!(outcomes["A0201"], TrainOutcome::SkippedExisting);
        assert_eq!(fs::read(&a_hdf).unwrap(), before);
    }

    #[test]
    fn overwrite_replaces_stale_artifacts() {
        let (datasets, predictor_config, training_config) = fixture();
        let dir = TempDir::new().unwrap();
        let (json_path, hdf_path) = artifact_paths(dir.path(), "A0201");
        fs::write(&json_path, b"stale").unwrap();
        fs::write(&hdf_path, b"stale").unwrap();

        let options = RunOptions {
            output_dir: dir.path().to_path_buf(),
            overwrite: true,
            min_samples_per_allele: 5,
            alleles: vec!["A0201".to_string()],
        };
        let device = Default::default();
        let outcomes = run_training::<TestBackend>(
            &datasets,
            &BTreeMap::new(),
            &predictor_config,
            &training_config,
            &options,
            &device,
        )
        .unwrap();

        assert_eq!(outcomes["A0201"], TrainOutcome::Trained { samples: 10 });
        assert_ne!(fs::read(&json_path).unwrap(), b"stale".to_vec());
        assert_ne!(fs::read(&hdf_path).unwrap(), b"stale".to_vec());
    }

    #[test]
    fn numeric_allele_never_trains() {
        let mut datasets = BTreeMap::new();
        datasets.insert(
            "0201".to_string(),
            dataset(&[
                "AAAAAAAAA",
                "CCCCCCCCC",
                "DDDDDDDDD",
                "EEEEEEEEE",
                "FFFFFFFFF",
                "GGGGGGGGG",
            ]),
        );
        let predictor_config = PredictorConfig {
            embedding_size: 4,
            hidden_layer_size: 8,
            ..PredictorConfig::default()
        };
        let training_config = TrainingConfig {
            training_epochs: 1,
            pretrain_epochs: 0,
            batch_size: 4,
            random_seed: 7,
        };

        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            output_dir: dir.path().to_path_buf(),
            overwrite: true,
            min_samples_per_allele: 1,
            alleles: Vec::new(),
        };
        let device = Default::default();
        let outcomes = run_training::<TestBackend>(
            &datasets,
            &BTreeMap::new(),
            &predictor_config,
            &training_config,
            &options,
            &device,
        )
        .unwrap();

        assert_eq!(outcomes["0201"], TrainOutcome::SkippedMalformedName);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_allele_in_allowlist_is_fatal() {
        let (datasets, predictor_config, training_config) = fixture();
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            output_dir: dir.path().to_path_buf(),
            overwrite: false,
            min_samples_per_allele: 5,
            alleles: vec!["C0401".to_string()],
        };
        let device = Default::default();
        let result = run_training::<TestBackend>(
            &datasets,
            &BTreeMap::new(),
            &predictor_config,
            &training_config,
            &options,
            &device,
        );
        assert!(result.is_err());
    }

    #[test]
    fn allowlist_accepts_unnormalized_spellings() {
        let (datasets, predictor_config, training_config) = fixture();
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            output_dir: dir.path().to_path_buf(),
            overwrite: false,
            min_samples_per_allele: 5,
            alleles: vec!["HLA-A*02:01".to_string()],
        };
        let device = Default::default();
        let outcomes = run_training::<TestBackend>(
            &datasets,
            &BTreeMap::new(),
            &predictor_config,
            &training_config,
            &options,
            &device,
        )
        .unwrap();
        assert_eq!(outcomes["A0201"], TrainOutcome::Trained { samples: 10 });
    }
}
