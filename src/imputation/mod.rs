pub mod matrix;
pub mod solvers;

use ndarray::Array2;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::data::{index_encode, AlleleDataset, DatasetBuilder};
use self::matrix::build_affinity_matrix;

/// Peptides must be observed in at least this many alleles before their
/// row enters the imputation matrix.
pub const MIN_OBSERVATIONS_PER_PEPTIDE: usize = 2;

const KNN_NEIGHBORS: usize = 5;
const SVD_RANK: usize = 10;
const SVD_MAX_ITERATIONS: usize = 100;
const SVD_TOLERANCE: f32 = 1e-4;
const MICE_CYCLES: usize = 10;
const MICE_RIDGE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImputationMethod {
    Mice,
    Knn,
    SoftImpute,
    Svd,
    Mean,
}

impl FromStr for ImputationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mice" => Ok(ImputationMethod::Mice),
            "knn" => Ok(ImputationMethod::Knn),
            "softimpute" => Ok(ImputationMethod::SoftImpute),
            "svd" => Ok(ImputationMethod::Svd),
            "mean" => Ok(ImputationMethod::Mean),
            other => Err(format!(
                "unknown imputation method '{}' (choices: mice, knn, softimpute, svd, mean)",
                other
            )),
        }
    }
}

impl fmt::Display for ImputationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImputationMethod::Mice => "mice",
            ImputationMethod::Knn => "knn",
            ImputationMethod::SoftImpute => "softimpute",
            ImputationMethod::Svd => "svd",
            ImputationMethod::Mean => "mean",
        };
        write!(f, "{}", name)
    }
}

impl ImputationMethod {
    fn impute(&self, values: &Array2<f32>, seed: u64) -> Array2<f32> {
        match self {
            ImputationMethod::Mean => solvers::mean_fill(values),
            ImputationMethod::Knn => solvers::knn_impute(values, KNN_NEIGHBORS),
            ImputationMethod::SoftImpute => solvers::soft_impute(
                values,
                SVD_RANK,
                SVD_MAX_ITERATIONS,
                SVD_TOLERANCE,
                seed,
            ),
            ImputationMethod::Svd => solvers::iterative_svd(
                values,
                SVD_RANK,
                SVD_MAX_ITERATIONS,
                SVD_TOLERANCE,
                seed,
            ),
            ImputationMethod::Mice => solvers::mice_impute(values, MICE_CYCLES, MICE_RIDGE),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImputationError {
    #[error("imputation method '{0}' produced non-finite values")]
    NonFinite(ImputationMethod),
}

/// Run the chosen imputer once over the whole collection and split the
/// completed matrix back into per-allele pre-training datasets.
///
/// Each allele receives only the entries that were missing for it; its
/// observed measurements already live in the raw dataset. Alleles with no
/// imputed rows are absent from the result.
pub fn create_imputed_datasets(
    datasets: &BTreeMap<String, AlleleDataset>,
    method: ImputationMethod,
    seed: u64,
) -> Result<BTreeMap<String, AlleleDataset>, ImputationError> {
    let matrix = build_affinity_matrix(datasets, MIN_OBSERVATIONS_PER_PEPTIDE);
    if matrix.peptides.is_empty() {
        info!("No peptides qualify for imputation; pre-training data will be empty");
        return Ok(BTreeMap::new());
    }

    info!(
        "Imputing a {}x{} affinity matrix with method '{}'",
        matrix.peptides.len(),
        matrix.alleles.len(),
        method
    );

    let completed = method.impute(&matrix.values, seed);
    if completed.iter().any(|v| !v.is_finite()) {
        return Err(ImputationError::NonFinite(method));
    }

    let encoded: Vec<Vec<i64>> = matrix
        .peptides
        .iter()
        .map(|peptide| {
            index_encode(peptide).expect("matrix peptides were validated at load time")
        })
        .collect();

    let mut imputed = BTreeMap::new();
    for (col, allele) in matrix.alleles.iter().enumerate() {
        let mut builder = DatasetBuilder::default();
        for (row, peptide) in matrix.peptides.iter().enumerate() {
            if matrix.is_observed(row, col) {
                continue;
            }
            let value = completed[(row, col)].clamp(0.0, 1.0);
            builder.push(&encoded[row], value, 1.0, peptide);
        }
        if !builder.is_empty() {
            imputed.insert(allele.clone(), builder.build());
        }
    }

    info!(
        "Imputation produced pre-training data for {} of {} alleles",
        imputed.len(),
        matrix.alleles.len()
    );
    Ok(imputed)
}
