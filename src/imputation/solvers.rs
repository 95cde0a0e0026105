//! Matrix-completion solvers behind the `--imputation-method` choices.
//!
//! All solvers take a matrix with NaN marking missing entries and return a
//! fully-observed copy. Observed entries are never modified. Everything
//! operates on the normalized affinity scale.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EPS: f32 = 1e-6;

fn column_means(matrix: &Array2<f32>) -> Vec<f32> {
    let mut overall_sum = 0.0f32;
    let mut overall_count = 0usize;
    let mut means = Vec::with_capacity(matrix.ncols());
    for col in matrix.columns() {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for &v in col.iter().filter(|v| !v.is_nan()) {
            sum += v;
            count += 1;
        }
        overall_sum += sum;
        overall_count += count;
        means.push(if count > 0 { sum / count as f32 } else { f32::NAN });
    }
    let overall = if overall_count > 0 {
        overall_sum / overall_count as f32
    } else {
        0.0
    };
    for mean in &mut means {
        if mean.is_nan() {
            *mean = overall;
        }
    }
    means
}

/// Replace every missing entry with its column's observed mean.
pub fn mean_fill(matrix: &Array2<f32>) -> Array2<f32> {
    let means = column_means(matrix);
    let mut filled = matrix.clone();
    for ((_, j), v) in filled.indexed_iter_mut() {
        if v.is_nan() {
            *v = means[j];
        }
    }
    filled
}

/// Fill each missing entry from the `k` nearest rows (masked euclidean
/// distance over the columns both rows observe) that observe the target
/// column, inverse-distance weighted. Column mean when no neighbor exists.
pub fn knn_impute(matrix: &Array2<f32>, k: usize) -> Array2<f32> {
    let means = column_means(matrix);
    let (nrows, ncols) = matrix.dim();
    let mut filled = matrix.clone();

    for i in 0..nrows {
        for j in 0..ncols {
            if !matrix[(i, j)].is_nan() {
                continue;
            }

            let mut neighbors: Vec<(f32, f32)> = Vec::new();
            for r in 0..nrows {
                if r == i || matrix[(r, j)].is_nan() {
                    continue;
                }
                let mut dist_sq = 0.0f32;
                let mut shared = 0usize;
                for c in 0..ncols {
                    let a = matrix[(i, c)];
                    let b = matrix[(r, c)];
                    if !a.is_nan() && !b.is_nan() {
                        dist_sq += (a - b) * (a - b);
                        shared += 1;
                    }
                }
                if shared > 0 {
                    neighbors.push(((dist_sq / shared as f32).sqrt(), matrix[(r, j)]));
                }
            }

            if neighbors.is_empty() {
                filled[(i, j)] = means[j];
                continue;
            }

            neighbors.sort_by(|a, b| a.0.total_cmp(&b.0));
            neighbors.truncate(k);
            let mut weighted_sum = 0.0f32;
            let mut weight_total = 0.0f32;
            for (dist, value) in neighbors {
                let weight = 1.0 / (dist + EPS);
                weighted_sum += weight * value;
                weight_total += weight;
            }
            filled[(i, j)] = weighted_sum / weight_total;
        }
    }
    filled
}

/// Modified Gram-Schmidt, in place. Degenerate columns zero out.
fn orthonormalize(matrix: &mut Array2<f32>) {
    let k = matrix.ncols();
    for j in 0..k {
        for i in 0..j {
            let proj = matrix.column(j).dot(&matrix.column(i));
            let prev = matrix.column(i).to_owned();
            matrix.column_mut(j).scaled_add(-proj, &prev);
        }
        let norm = matrix.column(j).dot(&matrix.column(j)).sqrt();
        if norm > 1e-8 {
            matrix.column_mut(j).mapv_inplace(|x| x / norm);
        } else {
            matrix.column_mut(j).fill(0.0);
        }
    }
}

/// Rank-`k` SVD by subspace iteration. Returns orthonormal `u` (m x k),
/// the singular values, and orthonormal `v` (n x k); `a` is approximated
/// by `u * diag(s) * v^T`.
fn truncated_svd(
    a: &Array2<f32>,
    k: usize,
    n_iterations: usize,
    seed: u64,
) -> (Array2<f32>, Array1<f32>, Array2<f32>) {
    let (nrows, ncols) = a.dim();
    let k = k.min(nrows).min(ncols).max(1);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut v = Array2::from_shape_fn((ncols, k), |_| rng.gen::<f32>() - 0.5);
    orthonormalize(&mut v);

    for _ in 0..n_iterations {
        let mut u = a.dot(&v);
        orthonormalize(&mut u);
        v = a.t().dot(&u);
        orthonormalize(&mut v);
    }

    let mut u = a.dot(&v);
    let mut s = Array1::zeros(k);
    for j in 0..k {
        let norm = u.column(j).dot(&u.column(j)).sqrt();
        s[j] = norm;
        if norm > 1e-8 {
            u.column_mut(j).mapv_inplace(|x| x / norm);
        }
    }
    (u, s, v)
}

fn reconstruct(u: &Array2<f32>, s: &Array1<f32>, v: &Array2<f32>) -> Array2<f32> {
    let mut scaled = u.clone();
    for (j, &sv) in s.iter().enumerate() {
        scaled.column_mut(j).mapv_inplace(|x| x * sv);
    }
    scaled.dot(&v.t())
}

fn refill_loop<F>(matrix: &Array2<f32>, max_iterations: usize, tolerance: f32, mut approximate: F) -> Array2<f32>
where
    F: FnMut(&Array2<f32>, usize) -> Array2<f32>,
{
    let missing: Vec<(usize, usize)> = matrix
        .indexed_iter()
        .filter(|(_, v)| v.is_nan())
        .map(|(idx, _)| idx)
        .collect();

    let mut filled = mean_fill(matrix);
    if missing.is_empty() {
        return filled;
    }

    for iteration in 0..max_iterations {
        let approx = approximate(&filled, iteration);
        let mut delta_sq = 0.0f32;
        let mut norm_sq = 0.0f32;
        for &(i, j) in &missing {
            let old = filled[(i, j)];
            let new = approx[(i, j)];
            delta_sq += (new - old) * (new - old);
            norm_sq += old * old;
            filled[(i, j)] = new;
        }
        if delta_sq.sqrt() <= tolerance * norm_sq.sqrt().max(1.0) {
            break;
        }
    }
    filled
}

/// SoftImpute: iterate a truncated SVD with soft-thresholded singular
/// values, refilling the missing entries each round.
pub fn soft_impute(
    matrix: &Array2<f32>,
    rank: usize,
    max_iterations: usize,
    tolerance: f32,
    seed: u64,
) -> Array2<f32> {
    refill_loop(matrix, max_iterations, tolerance, |filled, iteration| {
        let (u, mut s, v) = truncated_svd(filled, rank, 12, seed.wrapping_add(iteration as u64));
        let shrinkage = s.iter().cloned().fold(0.0f32, f32::max) / 50.0;
        s.mapv_inplace(|x| (x - shrinkage).max(0.0));
        reconstruct(&u, &s, &v)
    })
}

/// IterativeSVD: the same refill loop with hard rank truncation.
pub fn iterative_svd(
    matrix: &Array2<f32>,
    rank: usize,
    max_iterations: usize,
    tolerance: f32,
    seed: u64,
) -> Array2<f32> {
    refill_loop(matrix, max_iterations, tolerance, |filled, iteration| {
        let (u, s, v) = truncated_svd(filled, rank, 12, seed.wrapping_add(iteration as u64));
        reconstruct(&u, &s, &v)
    })
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
/// `a` is small (one row/column per allele), so no factorization library
/// is warranted.
fn solve(mut a: Array2<f32>, mut b: Array1<f32>) -> Array1<f32> {
    let n = a.nrows();
    debug_assert_eq!(a.ncols(), n);
    debug_assert_eq!(b.len(), n);

    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if a[(row, col)].abs() > a[(pivot, col)].abs() {
                pivot = row;
            }
        }
        if a[(pivot, col)].abs() < 1e-12 {
            continue;
        }
        if pivot != col {
            for c in 0..n {
                a.swap((col, c), (pivot, c));
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[(row, col)] / a[(col, col)];
            for c in col..n {
                a[(row, c)] -= factor * a[(col, c)];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut sum = b[row];
        for c in row + 1..n {
            sum -= a[(row, c)] * x[c];
        }
        x[row] = if a[(row, row)].abs() < 1e-12 {
            0.0
        } else {
            sum / a[(row, row)]
        };
    }
    x
}

/// MICE, posterior-mean variant: cycle over incomplete columns, ridge-
/// regressing each on the current fill of the others and overwriting its
/// missing entries with the regression prediction.
pub fn mice_impute(matrix: &Array2<f32>, n_cycles: usize, ridge: f32) -> Array2<f32> {
    let (nrows, ncols) = matrix.dim();
    let mut filled = mean_fill(matrix);

    let incomplete: Vec<usize> = (0..ncols)
        .filter(|&j| matrix.column(j).iter().any(|v| v.is_nan()))
        .collect();

    for _ in 0..n_cycles {
        for &j in &incomplete {
            let observed: Vec<usize> = (0..nrows)
                .filter(|&i| !matrix[(i, j)].is_nan())
                .collect();
            let missing: Vec<usize> = (0..nrows)
                .filter(|&i| matrix[(i, j)].is_nan())
                .collect();
            // Too few observations to regress on; the column-mean fill
            // from initialization stands.
            if observed.len() < 2 {
                continue;
            }

            let predictors: Vec<usize> = (0..ncols).filter(|&c| c != j).collect();
            let p = predictors.len() + 1; // intercept last

            fn design_row(filled: &Array2<f32>, predictors: &[usize], i: usize) -> Vec<f32> {
                let mut row = Vec::with_capacity(predictors.len() + 1);
                for &c in predictors {
                    row.push(filled[(i, c)]);
                }
                row.push(1.0);
                row
            }

            // Normal equations with a ridge term.
            let mut xtx = Array2::zeros((p, p));
            let mut xty = Array1::zeros(p);
            for &i in &observed {
                let row = design_row(&filled, &predictors, i);
                let y = matrix[(i, j)];
                for a in 0..p {
                    for b in 0..p {
                        xtx[(a, b)] += row[a] * row[b];
                    }
                    xty[a] += row[a] * y;
                }
            }
            for a in 0..p {
                xtx[(a, a)] += ridge;
            }

            let coefficients = solve(xtx, xty);
            for &i in &missing {
                let row = design_row(&filled, &predictors, i);
                let mut prediction = 0.0f32;
                for a in 0..p {
                    prediction += row[a] * coefficients[a];
                }
                filled[(i, j)] = prediction;
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn with_missing(mut m: Array2<f32>, holes: &[(usize, usize)]) -> Array2<f32> {
        for &(i, j) in holes {
            m[(i, j)] = f32::NAN;
        }
        m
    }

    #[test]
    fn mean_fill_uses_column_means() {
        let m = with_missing(array![[0.2, 0.8], [0.4, 0.6], [0.6, 0.0]], &[(2, 1)]);
        let filled = mean_fill(&m);
        assert!((filled[(2, 1)] - 0.7).abs() < 1e-6);
        // observed entries untouched
        assert_eq!(filled[(0, 0)], 0.2);
    }

    #[test]
    fn mean_fill_handles_empty_column() {
        let m = with_missing(array![[0.4, 0.0], [0.6, 0.0]], &[(0, 1), (1, 1)]);
        let filled = mean_fill(&m);
        // overall observed mean
        assert!((filled[(0, 1)] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn knn_prefers_the_similar_row() {
        // Row 0 matches row 1 closely and row 2 not at all.
        let m = with_missing(
            array![
                [0.9, 0.8, f32::NAN],
                [0.9, 0.8, 0.7],
                [0.1, 0.1, 0.1]
            ],
            &[],
        );
        let filled = knn_impute(&m, 1);
        assert!((filled[(0, 2)] - 0.7).abs() < 1e-3);
    }

    #[test]
    fn iterative_svd_recovers_rank_one_entry() {
        // Rank-1 matrix: outer product of [1,2,3] and [0.1,0.2,0.3,0.4].
        let u = [1.0f32, 2.0, 3.0];
        let v = [0.1f32, 0.2, 0.3, 0.4];
        let mut m = Array2::from_shape_fn((3, 4), |(i, j)| u[i] * v[j]);
        // True value 0.4; the column-mean initialization starts at 1.0,
        // so the test only passes if the SVD refill actually converges.
        m[(0, 3)] = f32::NAN;
        let filled = iterative_svd(&m, 1, 100, 1e-6, 7);
        assert!((filled[(0, 3)] - 0.4).abs() < 0.1);
    }

    #[test]
    fn soft_impute_recovers_rank_one_entry() {
        let u = [1.0f32, 2.0, 3.0];
        let v = [0.1f32, 0.2, 0.3, 0.4];
        let mut m = Array2::from_shape_fn((3, 4), |(i, j)| u[i] * v[j]);
        m[(2, 0)] = f32::NAN;
        let filled = soft_impute(&m, 2, 100, 1e-5, 7);
        // Soft thresholding shrinks slightly, so the tolerance is loose.
        assert!((filled[(2, 0)] - 0.3).abs() < 0.1);
    }

    #[test]
    fn mice_recovers_linear_relationship() {
        // Second column tracks the first.
        let m = with_missing(
            array![
                [0.1, 0.1],
                [0.3, 0.3],
                [0.5, 0.5],
                [0.7, 0.7],
                [0.9, f32::NAN]
            ],
            &[],
        );
        let filled = mice_impute(&m, 10, 1e-4);
        assert!((filled[(4, 1)] - 0.9).abs() < 0.05);
    }

    #[test]
    fn solvers_leave_complete_matrices_alone() {
        let m = array![[0.1, 0.2], [0.3, 0.4]];
        assert_eq!(mean_fill(&m), m);
        assert_eq!(knn_impute(&m, 3), m);
        assert_eq!(mice_impute(&m, 5, 1e-3), m);
        assert_eq!(iterative_svd(&m, 2, 10, 1e-4, 1), m);
    }

    #[test]
    fn gaussian_solve_inverts_a_small_system() {
        let a = array![[2.0f32, 1.0], [1.0, 3.0]];
        let b = array![5.0f32, 10.0];
        let x = solve(a, b);
        assert!((x[0] - 1.0).abs() < 1e-4);
        assert!((x[1] - 3.0).abs() < 1e-4);
    }
}
