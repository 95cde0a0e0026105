pub mod allele;
pub mod dataset;
pub mod peptide;

pub use allele::{is_numeric_token, normalize_allele_name};
pub use dataset::{load_allele_datasets, AlleleDataset, DataError, DatasetBuilder};
pub use peptide::{index_encode, PEPTIDE_LENGTH};
