use thiserror::Error;

/// The 20 standard amino acids, in the alphabetical order that defines
/// their embedding indices.
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

pub const N_AMINO_ACIDS: usize = 20;

/// Fixed peptide length every predictor is trained on.
pub const PEPTIDE_LENGTH: usize = 9;

const MIN_SUPPORTED_LENGTH: usize = 8;
const MAX_SUPPORTED_LENGTH: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeptideError {
    #[error("peptide '{peptide}' contains non-standard residue '{residue}'")]
    InvalidResidue { peptide: String, residue: char },
    #[error("peptide '{peptide}' has unsupported length {length} (supported: 8-12)")]
    UnsupportedLength { peptide: String, length: usize },
}

fn residue_index(residue: char) -> Option<i64> {
    AMINO_ACIDS.find(residue.to_ascii_uppercase()).map(|i| i as i64)
}

/// Index-encode a peptide of exactly `PEPTIDE_LENGTH` residues.
pub fn index_encode(peptide: &str) -> Result<Vec<i64>, PeptideError> {
    debug_assert_eq!(peptide.chars().count(), PEPTIDE_LENGTH);
    peptide
        .chars()
        .map(|residue| {
            residue_index(residue).ok_or_else(|| PeptideError::InvalidResidue {
                peptide: peptide.to_string(),
                residue,
            })
        })
        .collect()
}

/// Expand a peptide of length 8-12 into 9-mer variants.
///
/// 9-mers pass through unchanged. 8-mers expand to every single-residue
/// insertion (9 positions x 20 residues). Longer peptides expand to every
/// contiguous deletion that brings them down to 9 residues. The returned
/// weight is `1 / n_variants`, so each source measurement contributes one
/// unit of sample weight no matter how many variants it spawns.
pub fn fixed_length_variants(peptide: &str) -> Result<(Vec<String>, f32), PeptideError> {
    let length = peptide.chars().count();

    // Reject bad residues up front so expansion never manufactures
    // hundreds of copies of the same error.
    if let Some(residue) = peptide.chars().find(|&c| residue_index(c).is_none()) {
        return Err(PeptideError::InvalidResidue {
            peptide: peptide.to_string(),
            residue,
        });
    }

    let upper = peptide.to_ascii_uppercase();
    let variants: Vec<String> = match length {
        PEPTIDE_LENGTH => vec![upper],
        MIN_SUPPORTED_LENGTH => {
            let mut variants = Vec::with_capacity((length + 1) * N_AMINO_ACIDS);
            for position in 0..=length {
                for residue in AMINO_ACIDS.chars() {
                    let mut variant = String::with_capacity(PEPTIDE_LENGTH);
                    variant.push_str(&upper[..position]);
                    variant.push(residue);
                    variant.push_str(&upper[position..]);
                    variants.push(variant);
                }
            }
            variants
        }
        length if length > PEPTIDE_LENGTH && length <= MAX_SUPPORTED_LENGTH => {
            let excess = length - PEPTIDE_LENGTH;
            (0..=length - excess)
                .map(|start| format!("{}{}", &upper[..start], &upper[start + excess..]))
                .collect()
        }
        _ => {
            return Err(PeptideError::UnsupportedLength {
                peptide: peptide.to_string(),
                length,
            })
        }
    };

    let weight = 1.0 / variants.len() as f32;
    Ok((variants, weight))
}
