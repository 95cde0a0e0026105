use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use super::allele::normalize_allele_name;
use super::peptide::{fixed_length_variants, index_encode, PEPTIDE_LENGTH};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to open binding data CSV {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse binding data CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("binding data CSV contains no usable rows")]
    Empty,
}

/// One row of the binding data CSV. Missing columns fail deserialization,
/// which makes a malformed file a fatal load error.
#[derive(Debug, Deserialize)]
struct BindingRecord {
    mhc: String,
    peptide: String,
    peptide_length: usize,
    meas: f32,
}

/// Per-allele training bundle: index-encoded 9-mers, normalized affinities,
/// per-sample weights, and the peptides each row came from.
#[derive(Debug, Clone)]
pub struct AlleleDataset {
    pub x_index: Array2<i64>,
    pub y: Array1<f32>,
    pub weights: Array1<f32>,
    pub original_peptides: Vec<String>,
}

impl AlleleDataset {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Length invariant across the three arrays. Violation means the
    /// loader itself is broken, so this is an assertion rather than an
    /// error value.
    pub fn validate(&self) {
        let n = self.y.len();
        assert_eq!(self.x_index.nrows(), n, "x_index/y row count mismatch");
        assert_eq!(self.weights.len(), n, "weights/y length mismatch");
        assert_eq!(
            self.original_peptides.len(),
            n,
            "original_peptides/y length mismatch"
        );
    }

    pub fn unique_peptide_count(&self) -> usize {
        let mut peptides: Vec<&str> =
            self.original_peptides.iter().map(String::as_str).collect();
        peptides.sort_unstable();
        peptides.dedup();
        peptides.len()
    }
}

/// Incremental builder so the loader and the imputation step assemble
/// datasets the same way.
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    x_flat: Vec<i64>,
    y: Vec<f32>,
    weights: Vec<f32>,
    peptides: Vec<String>,
}

impl DatasetBuilder {
    pub fn push(&mut self, encoded: &[i64], y: f32, weight: f32, peptide: &str) {
        debug_assert_eq!(encoded.len(), PEPTIDE_LENGTH);
        self.x_flat.extend_from_slice(encoded);
        self.y.push(y);
        self.weights.push(weight);
        self.peptides.push(peptide.to_string());
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn build(self) -> AlleleDataset {
        let n = self.y.len();
        let dataset = AlleleDataset {
            x_index: Array2::from_shape_vec((n, PEPTIDE_LENGTH), self.x_flat)
                .expect("encoded rows have fixed width"),
            y: Array1::from_vec(self.y),
            weights: Array1::from_vec(self.weights),
            original_peptides: self.peptides,
        };
        dataset.validate();
        dataset
    }
}

/// Map a measured IC50 to the regression target: `1 - ln(ic50)/ln(max)`,
/// clamped to [0,1]. Strong binders land near 1.
pub fn normalize_affinity(ic50: f32, max_ic50: f32) -> f32 {
    (1.0 - ic50.max(1.0).ln() / max_ic50.ln()).clamp(0.0, 1.0)
}

/// Load the binding data CSV into one dataset per normalized allele name.
///
/// Peptides of non-9-mer lengths are expanded to weighted 9-mer variants;
/// rows with unsupported lengths or non-standard residues are counted and
/// skipped rather than failing the whole load.
pub fn load_allele_datasets(
    path: &Path,
    max_ic50: f32,
) -> Result<BTreeMap<String, AlleleDataset>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| {
            if e.is_io_error() {
                match e.into_kind() {
                    csv::ErrorKind::Io(source) => DataError::Io {
                        path: path.display().to_string(),
                        source,
                    },
                    _ => unreachable!("is_io_error guarantees an Io kind"),
                }
            } else {
                DataError::Csv(e)
            }
        })?;

    let mut builders: BTreeMap<String, DatasetBuilder> = BTreeMap::new();
    let mut skipped_peptides = 0usize;
    let mut length_mismatches = 0usize;
    let mut total_rows = 0usize;

    for result in reader.deserialize() {
        let record: BindingRecord = result?;
        total_rows += 1;

        if record.peptide.chars().count() != record.peptide_length {
            length_mismatches += 1;
            continue;
        }

        let (variants, weight) = match fixed_length_variants(&record.peptide) {
            Ok(expanded) => expanded,
            Err(_) => {
                skipped_peptides += 1;
                continue;
            }
        };

        let allele = normalize_allele_name(&record.mhc);
        let y = normalize_affinity(record.meas, max_ic50);
        let builder = builders.entry(allele).or_default();
        for variant in &variants {
            let encoded = index_encode(variant)
                .expect("variants are built from validated residues");
            builder.push(&encoded, y, weight, &record.peptide);
        }
    }

    if skipped_peptides > 0 {
        warn!(
            "Skipped {} rows with unsupported or invalid peptides",
            skipped_peptides
        );
    }
    if length_mismatches > 0 {
        warn!(
            "Skipped {} rows whose peptide_length column disagrees with the peptide",
            length_mismatches
        );
    }

    let datasets: BTreeMap<String, AlleleDataset> = builders
        .into_iter()
        .filter(|(_, builder)| !builder.is_empty())
        .map(|(allele, builder)| (allele, builder.build()))
        .collect();

    if datasets.is_empty() {
        return Err(DataError::Empty);
    }

    info!(
        "Loaded {} rows into {} allele datasets from {:?}",
        total_rows,
        datasets.len(),
        path
    );

    Ok(datasets)
}
