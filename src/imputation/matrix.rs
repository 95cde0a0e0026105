use ndarray::Array2;
use std::collections::BTreeMap;

use crate::data::{AlleleDataset, PEPTIDE_LENGTH};

/// Peptide x allele matrix of normalized affinities. Missing measurements
/// are NaN; rows are unique observed 9-mers, columns are allele names in
/// sorted order.
#[derive(Debug, Clone)]
pub struct AffinityMatrix {
    pub values: Array2<f32>,
    pub peptides: Vec<String>,
    pub alleles: Vec<String>,
}

impl AffinityMatrix {
    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        !self.values[(row, col)].is_nan()
    }
}

/// Assemble the cross-allele matrix the imputers run on.
///
/// Only 9-mer source peptides participate: expanded variants of other
/// lengths would insert blocks of perfectly correlated rows. Duplicate
/// measurements of the same (peptide, allele) pair average. Rows observed
/// in fewer than `min_observations` alleles carry too little signal to
/// impute from and are dropped.
pub fn build_affinity_matrix(
    datasets: &BTreeMap<String, AlleleDataset>,
    min_observations: usize,
) -> AffinityMatrix {
    let alleles: Vec<String> = datasets.keys().cloned().collect();

    // (peptide -> allele index -> (sum, count))
    let mut cells: BTreeMap<String, BTreeMap<usize, (f32, usize)>> = BTreeMap::new();
    for (col, allele) in alleles.iter().enumerate() {
        let dataset = &datasets[allele];
        for (row, peptide) in dataset.original_peptides.iter().enumerate() {
            if peptide.chars().count() != PEPTIDE_LENGTH {
                continue;
            }
            let entry = cells
                .entry(peptide.to_ascii_uppercase())
                .or_default()
                .entry(col)
                .or_insert((0.0, 0));
            entry.0 += dataset.y[row];
            entry.1 += 1;
        }
    }

    let kept: Vec<(String, BTreeMap<usize, (f32, usize)>)> = cells
        .into_iter()
        .filter(|(_, observed)| observed.len() >= min_observations)
        .collect();

    let mut values = Array2::from_elem((kept.len(), alleles.len()), f32::NAN);
    let mut peptides = Vec::with_capacity(kept.len());
    for (row, (peptide, observed)) in kept.into_iter().enumerate() {
        for (col, (sum, count)) in observed {
            values[(row, col)] = sum / count as f32;
        }
        peptides.push(peptide);
    }

    AffinityMatrix {
        values,
        peptides,
        alleles,
    }
}
