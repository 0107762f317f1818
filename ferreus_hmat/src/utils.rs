/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides utility routines for bounding boxes, row permutations and small dense helpers.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::{Mat, MatRef};

/// Computes the axis aligned bounding box (AABB) extents of a subset of points.
///
/// Returns a flat vector arranged as `[min_0, ..., min_n, max_0, ..., max_n]`
/// where `n` is the number of columns of `points`, over the rows yielded by
/// `items`. An empty subset yields infinite extents.
#[inline(always)]
pub fn get_pointarray_extents<I>(points: MatRef<f64>, items: I) -> Vec<f64>
where
    I: IntoIterator<Item = usize>,
{
    let ncols = points.ncols();

    let mut extents = vec![f64::INFINITY; ncols];
    extents.extend(std::iter::repeat(f64::NEG_INFINITY).take(ncols));

    for row in items {
        for col in 0..ncols {
            let item = points[(row, col)];
            if item < extents[col] {
                extents[col] = item;
            }
            if item > extents[col + ncols] {
                extents[col + ncols] = item;
            }
        }
    }

    extents
}

/// Returns a new matrix holding the rows of `existing_mat` listed in `row_indices`.
#[inline(always)]
pub fn select_mat_rows(existing_mat: MatRef<f64>, row_indices: &[usize]) -> Mat<f64> {
    Mat::from_fn(row_indices.len(), existing_mat.ncols(), |i, j| {
        existing_mat[(row_indices[i], j)]
    })
}

/// Sum of squared entries.
#[inline(always)]
pub fn squared_frobenius(matrix: MatRef<f64>) -> f64 {
    let mut sum = 0.0;
    for j in 0..matrix.ncols() {
        for i in 0..matrix.nrows() {
            let value = matrix[(i, j)];
            sum += value * value;
        }
    }
    sum
}

/// Scales every entry of `matrix` in place.
#[inline(always)]
pub fn scale_in_place(matrix: &mut Mat<f64>, alpha: f64) {
    for j in 0..matrix.ncols() {
        for i in 0..matrix.nrows() {
            matrix[(i, j)] *= alpha;
        }
    }
}

/// Horizontally concatenates two matrices with the same number of rows.
pub fn hstack(left: MatRef<f64>, right: MatRef<f64>) -> Mat<f64> {
    let split = left.ncols();
    Mat::from_fn(left.nrows(), split + right.ncols(), |i, j| {
        if j < split {
            left[(i, j)]
        } else {
            right[(i, j - split)]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn extents_of_subset() {
        let points = mat![[0.0, 5.0], [2.0, -1.0], [10.0, 10.0], [1.0, 3.0]];
        let extents = get_pointarray_extents(points.as_ref(), [0, 1, 3]);
        assert_eq!(extents, vec![0.0, -1.0, 2.0, 5.0]);
    }

    #[test]
    fn select_rows_permutes() {
        let m = mat![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let p = select_mat_rows(m.as_ref(), &[2, 0, 1]);
        assert_eq!(p[(0, 0)], 3.0);
        assert_eq!(p[(1, 1)], 10.0);
        assert_eq!(p[(2, 0)], 2.0);
    }

    #[test]
    fn hstack_and_norms() {
        let a = mat![[1.0], [2.0]];
        let b = mat![[3.0, 4.0], [5.0, 6.0]];
        let mut c = hstack(a.as_ref(), b.as_ref());
        assert_eq!(c.ncols(), 3);
        assert_eq!(c[(1, 2)], 6.0);
        scale_in_place(&mut c, 2.0);
        assert_eq!(c[(0, 1)], 6.0);
        assert_eq!(squared_frobenius(a.as_ref()), 5.0);
    }
}
