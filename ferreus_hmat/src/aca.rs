/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements SVD and Adaptive Cross Approximation (ACA) variants for low-rank block compression.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Low-rank compression of admissible blocks.
//!
//! Every routine returns factors `(U, V)` such that `A ≈ U * V^T`, with as
//! many columns as the detected rank (possibly zero).

use crate::{
    error::{HMatrixError, Result},
    utils::squared_frobenius,
};
use faer::{mat::AsMatRef, Mat, MatRef, RowRef};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// How partial pivoting picks a new row when the current one is
/// already fully approximated.
#[derive(Debug, Clone, Copy)]
pub enum PivotRestart {
    /// Start at row 0 and restart at the first unused row.
    FirstUnused,
    /// Start and restart at random unused rows drawn from a seeded generator.
    Random(u64),
}

/// Accumulates rank-1 cross terms and the Frobenius norm estimate of
/// the approximation built so far.
struct CrossApproximation {
    u: Mat<f64>,
    v: Mat<f64>,
    rank: usize,
    residual_norm: f64,
}

impl CrossApproximation {
    fn new(num_rows: usize, num_columns: usize) -> Self {
        let max_rank = num_rows.min(num_columns);
        CrossApproximation {
            u: Mat::zeros(num_rows, max_rank),
            v: Mat::zeros(num_columns, max_rank),
            rank: 0,
            residual_norm: 0.0,
        }
    }

    /// Row `i` of the residual, as a `1 x n` matrix.
    fn residual_row<F>(&self, generator: &F, i: usize) -> Mat<f64>
    where
        F: Fn(&usize, &usize, &usize, &usize) -> Mat<f64>,
    {
        let num_columns = self.v.nrows();
        let k = self.rank;
        let mut row = generator(&i, &(i + 1), &0, &num_columns);
        if k > 0 {
            row -= self.u.submatrix(i, 0, 1, k) * self.v.submatrix(0, 0, num_columns, k).transpose();
        }
        row
    }

    /// Column `j` of the residual, as a `m x 1` matrix.
    fn residual_column<F>(&self, generator: &F, j: usize) -> Mat<f64>
    where
        F: Fn(&usize, &usize, &usize, &usize) -> Mat<f64>,
    {
        let num_rows = self.u.nrows();
        let k = self.rank;
        let mut column = generator(&0, &num_rows, &j, &(j + 1));
        if k > 0 {
            column -= self.u.submatrix(0, 0, num_rows, k) * self.v.submatrix(j, 0, 1, k).transpose();
        }
        column
    }

    /// Appends `u_column * v_row` and returns `||u_k||^2 ||v_k||^2`.
    fn push(&mut self, u_column: &Mat<f64>, v_row: &Mat<f64>) -> f64 {
        let num_rows = self.u.nrows();
        let num_columns = self.v.nrows();
        let k = self.rank;

        // Cross terms with previous updates: 2 * sum_{i<k} <u_i, u_k> <v_i, v_k>
        let mut sum_k = 0.0;
        if k > 0 {
            let part1 = self.u.submatrix(0, 0, num_rows, k).transpose() * u_column;
            let part2 = self.v.submatrix(0, 0, num_columns, k).transpose() * v_row.transpose();
            let part3 = &part1.transpose() * &part2;
            sum_k = part3.as_mat_ref().sum();
        }

        let norm_u_v_2 = squared_frobenius(u_column.as_ref()) * squared_frobenius(v_row.as_ref());
        self.residual_norm += norm_u_v_2 + 2.0 * sum_k;

        self.u.col_mut(k).copy_from(&u_column.col(0));
        self.v.col_mut(k).copy_from(&v_row.row(0).transpose());
        self.rank += 1;

        norm_u_v_2
    }

    /// Stopping criteria is `||u_k||2 ||v_k||2 <= epsilon ||A_k||F`.
    fn converged(&self, norm_u_v_2: f64, tolerance: f64) -> bool {
        norm_u_v_2 <= tolerance * self.residual_norm
    }

    fn into_factors(self) -> (Mat<f64>, Mat<f64>) {
        (
            self.u.subcols(0, self.rank).to_owned(),
            self.v.subcols(0, self.rank).to_owned(),
        )
    }
}

/// Adaptive Cross Approximation (ACA) with partial pivoting
///
/// # Arguments
/// * `num_rows` - Number of rows in the target matrix
/// * `num_columns` - Number of columns in the target matrix
/// * `matrix_subset_generator` - Closure to compute a submatrix (row range, col range)
/// * `epsilon` - Desired accuracy (Frobenius norm relative tolerance)
/// * `restart` - Row selection when the current pivot row is exhausted
///
/// # Returns
/// A tuple of low-rank factors `(U, V)` such that A ≈ U * V^T
pub fn aca_partial_pivoting<F>(
    num_rows: usize,
    num_columns: usize,
    matrix_subset_generator: F,
    epsilon: &f64,
    restart: PivotRestart,
) -> (Mat<f64>, Mat<f64>)
where
    F: Fn(&usize, &usize, &usize, &usize) -> Mat<f64>,
{
    let mut cross = CrossApproximation::new(num_rows, num_columns);
    if num_rows == 0 || num_columns == 0 {
        return cross.into_factors();
    }

    // Track unused rows and columns with binary flags (1 = unused, 0 = used)
    let mut unused_rows = vec![1; num_rows];
    let mut unused_columns = vec![1; num_columns];

    let max_iterations = num_rows.min(num_columns);
    let tolerance = epsilon.powi(2);

    let mut rng = match restart {
        PivotRestart::FirstUnused => None,
        PivotRestart::Random(seed) => Some(StdRng::seed_from_u64(seed)),
    };

    let mut i = match rng.as_mut() {
        Some(rng) => rng.random_range(0..num_rows),
        None => 0,
    };

    while cross.rank < max_iterations {
        // Current residual row i across all columns
        let mut v_row_i = cross.residual_row(&matrix_subset_generator, i);
        unused_rows[i] = 0;

        // Choose pivot column j with largest absolute residual in row i
        let Some(j) = argmax_masked(&v_row_i.row(0), &unused_columns) else {
            // Row i is already reproduced exactly, try another one
            match next_unused_row(&unused_rows, rng.as_mut()) {
                Some(next) => {
                    i = next;
                    continue;
                }
                None => break,
            }
        };

        // Normalize v_k so v_k[j] = 1
        let pivot = 1.0 / v_row_i[(0, j)];
        v_row_i *= pivot;

        let u_column_j = cross.residual_column(&matrix_subset_generator, j);
        unused_columns[j] = 0;

        // Next pivot row has the largest absolute residual in column j
        let next = argmax_masked(&u_column_j.col(0).transpose(), &unused_rows);

        let norm_u_v_2 = cross.push(&u_column_j, &v_row_i);
        if cross.converged(norm_u_v_2, tolerance) {
            break;
        }

        i = match next.or_else(|| next_unused_row(&unused_rows, rng.as_mut())) {
            Some(next) => next,
            None => break,
        };
    }

    cross.into_factors()
}

/// ACA+ : partial pivoting steered by a reference row and a reference column,
/// which avoids missing the parts of a block that the first rows do not see.
pub fn aca_plus<F>(
    num_rows: usize,
    num_columns: usize,
    matrix_subset_generator: F,
    epsilon: &f64,
) -> (Mat<f64>, Mat<f64>)
where
    F: Fn(&usize, &usize, &usize, &usize) -> Mat<f64>,
{
    let mut cross = CrossApproximation::new(num_rows, num_columns);
    if num_rows == 0 || num_columns == 0 {
        return cross.into_factors();
    }

    let mut unused_rows = vec![1; num_rows];
    let mut unused_columns = vec![1; num_columns];

    let max_iterations = num_rows.min(num_columns);
    let tolerance = epsilon.powi(2);

    let mut reference_row_index = 0;
    let mut reference_row = cross.residual_row(&matrix_subset_generator, reference_row_index);
    let mut reference_column_index = 0;
    let mut reference_column = cross.residual_column(&matrix_subset_generator, reference_column_index);

    while cross.rank < max_iterations {
        let j_star = argmax_masked(&reference_row.row(0), &unused_columns);
        let i_star = argmax_masked(&reference_column.col(0).transpose(), &unused_rows);

        let row_value = j_star.map_or(0.0, |j| reference_row[(0, j)].abs());
        let column_value = i_star.map_or(0.0, |i| reference_column[(i, 0)].abs());

        if j_star.is_none() && i_star.is_none() {
            // Both references are reproduced, retire them and look elsewhere
            unused_rows[reference_row_index] = 0;
            unused_columns[reference_column_index] = 0;
            match (first_unused(&unused_rows), first_unused(&unused_columns)) {
                (Some(r), Some(c)) => {
                    reference_row_index = r;
                    reference_row = cross.residual_row(&matrix_subset_generator, r);
                    reference_column_index = c;
                    reference_column = cross.residual_column(&matrix_subset_generator, c);
                    continue;
                }
                _ => break,
            }
        }

        let (i, j, mut v_row, u_column) = if row_value >= column_value {
            let j = j_star.unwrap_or(0);
            let u_column = cross.residual_column(&matrix_subset_generator, j);
            let Some(i) = argmax_masked(&u_column.col(0).transpose(), &unused_rows) else {
                unused_columns[j] = 0;
                continue;
            };
            let v_row = cross.residual_row(&matrix_subset_generator, i);
            (i, j, v_row, u_column)
        } else {
            let i = i_star.unwrap_or(0);
            let v_row = cross.residual_row(&matrix_subset_generator, i);
            let Some(j) = argmax_masked(&v_row.row(0), &unused_columns) else {
                unused_rows[i] = 0;
                continue;
            };
            let u_column = cross.residual_column(&matrix_subset_generator, j);
            (i, j, v_row, u_column)
        };

        let pivot_value = v_row[(0, j)];
        unused_rows[i] = 0;
        unused_columns[j] = 0;
        if pivot_value == 0.0 {
            continue;
        }
        v_row *= 1.0 / pivot_value;

        // Keep the references equal to residuals of the updated approximation
        let row_weight = u_column[(reference_row_index, 0)];
        let column_weight = v_row[(0, reference_column_index)];
        for c in 0..num_columns {
            reference_row[(0, c)] -= row_weight * v_row[(0, c)];
        }
        for r in 0..num_rows {
            reference_column[(r, 0)] -= column_weight * u_column[(r, 0)];
        }

        let norm_u_v_2 = cross.push(&u_column, &v_row);
        if cross.converged(norm_u_v_2, tolerance) {
            break;
        }

        if i == reference_row_index || unused_rows[reference_row_index] == 0 {
            match first_unused(&unused_rows) {
                Some(r) => {
                    reference_row_index = r;
                    reference_row = cross.residual_row(&matrix_subset_generator, r);
                }
                None => break,
            }
        }
        if j == reference_column_index || unused_columns[reference_column_index] == 0 {
            match first_unused(&unused_columns) {
                Some(c) => {
                    reference_column_index = c;
                    reference_column = cross.residual_column(&matrix_subset_generator, c);
                }
                None => break,
            }
        }
    }

    cross.into_factors()
}

/// ACA with full pivoting on an explicitly computed block.
pub fn aca_full_pivoting(a_matrix: MatRef<f64>, epsilon: &f64) -> (Mat<f64>, Mat<f64>) {
    let (num_rows, num_columns) = a_matrix.shape();
    let max_iterations = num_rows.min(num_columns);
    let tolerance = epsilon.powi(2) * squared_frobenius(a_matrix);

    let mut residual = a_matrix.to_owned();
    let mut u = Mat::<f64>::zeros(num_rows, max_iterations);
    let mut v = Mat::<f64>::zeros(num_columns, max_iterations);
    let mut k = 0;

    while k < max_iterations {
        // Largest absolute residual entry
        let (mut pi, mut pj, mut max_value) = (0, 0, 0.0);
        for j in 0..num_columns {
            for i in 0..num_rows {
                let value = residual[(i, j)].abs();
                if value > max_value {
                    (pi, pj, max_value) = (i, j, value);
                }
            }
        }
        if max_value == 0.0 {
            break;
        }

        let pivot = 1.0 / residual[(pi, pj)];
        for i in 0..num_rows {
            u[(i, k)] = residual[(i, pj)];
        }
        for j in 0..num_columns {
            v[(j, k)] = residual[(pi, j)] * pivot;
        }
        for j in 0..num_columns {
            let vjk = v[(j, k)];
            for i in 0..num_rows {
                residual[(i, j)] -= u[(i, k)] * vjk;
            }
        }
        k += 1;

        if squared_frobenius(residual.as_ref()) <= tolerance {
            break;
        }
    }

    (u.subcols(0, k).to_owned(), v.subcols(0, k).to_owned())
}

/// Truncated SVD of an explicitly computed block.
pub fn svd_compress(a_matrix: &Mat<f64>, epsilon: &f64) -> Result<(Mat<f64>, Mat<f64>)> {
    if a_matrix.nrows() == 0 || a_matrix.ncols() == 0 {
        return Ok((Mat::zeros(a_matrix.nrows(), 0), Mat::zeros(a_matrix.ncols(), 0)));
    }

    let svd = a_matrix
        .svd()
        .map_err(|e| HMatrixError::Internal(format!("SVD of a {}x{} block failed: {e:?}", a_matrix.nrows(), a_matrix.ncols())))?;
    let sr = svd.S();

    let sigma_vec: Vec<f64> = sr.column_vector().iter().cloned().collect();
    let new_rank = calculate_singular_values_cutoff(sigma_vec, epsilon);

    let u = svd.U().subcols(0, new_rank) * sr.column_vector().subrows(0, new_rank).as_diagonal();
    let v = svd.V().subcols(0, new_rank).to_owned();

    Ok((u, v))
}

/// Find the index of the maximum absolute value in `data` masked by a binary `mask`.
///
/// # Returns
/// Index of the element with the largest absolute value among the unmasked
/// elements, or `None` if all of them are zero.
fn argmax_masked(data: &RowRef<f64>, mask: &[u8]) -> Option<usize> {
    let mut max_index = None;
    let mut max_value = 0.0;

    for (idx, &value) in data.iter().enumerate() {
        // Only include elements that are unmasked (mask == 1), and use absolute value
        let weighted_value = value.abs() * mask[idx] as f64;

        if weighted_value > max_value {
            max_value = weighted_value;
            max_index = Some(idx);
        }
    }

    max_index
}

fn first_unused(mask: &[u8]) -> Option<usize> {
    mask.iter().position(|&flag| flag == 1)
}

fn next_unused_row(unused_rows: &[u8], rng: Option<&mut StdRng>) -> Option<usize> {
    match rng {
        None => first_unused(unused_rows),
        Some(rng) => {
            let candidates: Vec<usize> = (0..unused_rows.len()).filter(|&r| unused_rows[r] == 1).collect();
            match candidates.is_empty() {
                true => None,
                false => Some(candidates[rng.random_range(0..candidates.len())]),
            }
        }
    }
}

/// Recompress low-rank factors using QR + SVD.
/// This yields a more stable and potentially lower-rank representation.
///
/// # Arguments
/// * `u_aca` - Matrix of left factors (shape m × k)
/// * `v_aca` - Matrix of right factors (shape n × k)
/// * `epsilon` - Relative truncation tolerance for recompression
///
/// # Returns
/// Recompressed low-rank factorization `(U, V)` such that A ≈ U * V^T
pub fn recompress_aca(
    u_aca: &Mat<f64>,
    v_aca: &Mat<f64>,
    epsilon: &f64,
) -> Result<(Mat<f64>, Mat<f64>)> {
    if u_aca.ncols() == 0 || u_aca.nrows() == 0 || v_aca.nrows() == 0 {
        return Ok((Mat::zeros(u_aca.nrows(), 0), Mat::zeros(v_aca.nrows(), 0)));
    }

    // QR decomposition of the factors
    let u_qr = u_aca.qr();
    let qu = u_qr.compute_thin_Q(); // m × r orthonormal basis
    let ru = u_qr.thin_R(); // r × k upper triangular

    let v_qr = v_aca.qr();
    let qv = v_qr.compute_thin_Q(); // n × s orthonormal basis
    let rv = v_qr.thin_R(); // s × k upper triangular

    // SVD of inner core product R_u * R_v^T
    let ur_vrt = &ru * &rv.transpose();

    let svd = ur_vrt
        .svd()
        .map_err(|e| HMatrixError::Internal(format!("SVD during recompression failed: {e:?}")))?;
    let ur = svd.U();
    let sr = svd.S();
    let vr = svd.V();

    let sigma_vec: Vec<f64> = sr.column_vector().iter().cloned().collect();
    let new_rank = calculate_singular_values_cutoff(sigma_vec, epsilon);

    // U = Q_u * U_r * diag(sigma), V = Q_v * V_r
    let u = qu * (ur.subcols(0, new_rank) * sr.column_vector().subrows(0, new_rank).as_diagonal());
    let v = qv * vr.subcols(0, new_rank);

    Ok((u, v))
}

/// Determine optimal cutoff rank for truncated SVD using cumulative sum of squares.
///
/// # Returns
/// Minimum rank `r` such that residual Frobenius norm is ≤ epsilon * total norm.
pub fn calculate_singular_values_cutoff(sigma: Vec<f64>, epsilon: &f64) -> usize {
    if sigma.is_empty() {
        return 0;
    }

    // Backward cumulative sum of squared singular values
    let cumulative_sum_sqr = inverse_cumulative_sum_of_squares(&sigma);
    if cumulative_sum_sqr[0] == 0.0 {
        return 0;
    }

    let eps_qr = cumulative_sum_sqr[0] * epsilon * epsilon;

    cumulative_sum_sqr
        .iter()
        .position(|&x| x < eps_qr)
        .unwrap_or(cumulative_sum_sqr.len())
}

/// result[i] = sum_{j=i}^{n-1} sigma[j]^2
fn inverse_cumulative_sum_of_squares(sigma: &[f64]) -> Vec<f64> {
    let cumulative_sum_squared: Vec<f64> = sigma
        .iter()
        .rev()
        .scan(0.0, |acc, &x| {
            *acc += x * x;
            Some(*acc)
        })
        .collect();

    cumulative_sum_squared.into_iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Block of `1 / (1 + |x - y|)` between two separated 1D clusters.
    fn smooth_block(m: usize, n: usize) -> Mat<f64> {
        Mat::from_fn(m, n, |i, j| {
            let x = i as f64 / m as f64;
            let y = 3.0 + j as f64 / n as f64;
            1.0 / (1.0 + (x - y).abs())
        })
    }

    fn generator(a: &Mat<f64>) -> impl Fn(&usize, &usize, &usize, &usize) -> Mat<f64> + '_ {
        move |rs: &usize, re: &usize, cs: &usize, ce: &usize| {
            a.submatrix(*rs, *cs, re - rs, ce - cs).to_owned()
        }
    }

    fn relative_error(a: &Mat<f64>, u: &Mat<f64>, v: &Mat<f64>) -> f64 {
        let approx = u * v.transpose();
        (a - &approx).norm_l2() / a.norm_l2()
    }

    #[test]
    fn partial_pivoting_recovers_exact_low_rank() {
        let (m, n) = (40, 30);
        let a = Mat::from_fn(m, n, |i, j| {
            let (x, y) = (i as f64, j as f64);
            (1.0 + x) * (2.0 - y) + (x * 0.1).sin() * (y * 0.3).cos()
        });
        let (u, v) = aca_partial_pivoting(m, n, generator(&a), &1e-12, PivotRestart::FirstUnused);
        assert!(u.ncols() <= 3);
        assert!(relative_error(&a, &u, &v) < 1e-10);
    }

    #[test]
    fn every_variant_meets_tolerance_on_smooth_block() {
        let a = smooth_block(60, 50);
        let epsilon = 1e-8;

        let results = vec![
            aca_partial_pivoting(60, 50, generator(&a), &epsilon, PivotRestart::FirstUnused),
            aca_partial_pivoting(60, 50, generator(&a), &epsilon, PivotRestart::Random(17)),
            aca_plus(60, 50, generator(&a), &epsilon),
            aca_full_pivoting(a.as_ref(), &epsilon),
            svd_compress(&a, &epsilon).unwrap(),
        ];

        for (u, v) in results {
            assert!(u.ncols() < 20, "rank {} too large", u.ncols());
            assert!(relative_error(&a, &u, &v) < 1e-6);
        }
    }

    #[test]
    fn zero_block_has_rank_zero() {
        let a = Mat::<f64>::zeros(12, 9);
        let epsilon = 1e-6;
        let ranks = [
            aca_partial_pivoting(12, 9, generator(&a), &epsilon, PivotRestart::FirstUnused).0.ncols(),
            aca_partial_pivoting(12, 9, generator(&a), &epsilon, PivotRestart::Random(3)).0.ncols(),
            aca_plus(12, 9, generator(&a), &epsilon).0.ncols(),
            aca_full_pivoting(a.as_ref(), &epsilon).0.ncols(),
            svd_compress(&a, &epsilon).unwrap().0.ncols(),
        ];
        assert_eq!(ranks, [0; 5]);
    }

    #[test]
    fn partial_pivoting_skips_zero_rows() {
        // Only the last row is non-zero
        let a = Mat::from_fn(8, 6, |i, j| if i == 7 { 1.0 + j as f64 } else { 0.0 });
        let (u, v) = aca_partial_pivoting(8, 6, generator(&a), &1e-10, PivotRestart::FirstUnused);
        assert_eq!(u.ncols(), 1);
        assert!(relative_error(&a, &u, &v) < 1e-12);
    }

    #[test]
    fn random_restart_is_deterministic() {
        let a = smooth_block(30, 30);
        let (u1, v1) = aca_partial_pivoting(30, 30, generator(&a), &1e-6, PivotRestart::Random(5));
        let (u2, v2) = aca_partial_pivoting(30, 30, generator(&a), &1e-6, PivotRestart::Random(5));
        assert_eq!(u1, u2);
        assert_eq!(v1, v2);
    }

    #[test]
    fn recompression_removes_redundant_columns() {
        let x = Mat::from_fn(20, 1, |i, _| (i as f64 * 0.2).cos());
        let y = Mat::from_fn(15, 1, |j, _| 1.0 + j as f64);
        let u = Mat::from_fn(20, 3, |i, _| x[(i, 0)]);
        let v = Mat::from_fn(15, 3, |j, k| (k as f64 + 1.0) * y[(j, 0)]);

        let (ur, vr) = recompress_aca(&u, &v, &1e-10).unwrap();
        assert_eq!(ur.ncols(), 1);
        let exact = &u * v.transpose();
        let approx = &ur * vr.transpose();
        assert!((&exact - &approx).norm_l2() <= 1e-10 * exact.norm_l2());
    }

    #[test]
    fn cutoff_from_singular_values() {
        assert_eq!(calculate_singular_values_cutoff(vec![3.0, 2.0, 1.0, 1e-9], &1e-6), 3);
        assert_eq!(calculate_singular_values_cutoff(vec![1.0, 1.0, 1.0], &1e-3), 3);
        assert_eq!(calculate_singular_values_cutoff(vec![0.0, 0.0], &1e-3), 0);
        assert_eq!(calculate_singular_values_cutoff(vec![], &1e-3), 0);
    }
}
