/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements distance helpers and dense covariance references.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::CovarianceModel;
use faer::{Mat, MatRef, RowRef};

/// Euclidean distance between two points.
#[inline(always)]
pub fn get_distance(target: RowRef<f64>, source: RowRef<f64>) -> f64 {
    let mut dist = 0.0;
    for (t, s) in target.iter().zip(source.iter()) {
        let diff = t - s;
        dist += diff * diff;
    }
    dist.sqrt()
}

/// Euclidean distance after dividing each axis by its length scale.
#[inline(always)]
pub fn get_scaled_distance(target: RowRef<f64>, source: RowRef<f64>, scale: &[f64]) -> f64 {
    let mut dist = 0.0;
    for ((t, s), l) in target.iter().zip(source.iter()).zip(scale.iter()) {
        let diff = (t - s) / l;
        dist += diff * diff;
    }
    dist.sqrt()
}

/// Dense covariance matrix of `vertices` (one row per point), with the
/// `output_dimension` components of each point stored consecutively.
pub fn covariance_matrix<M>(model: &M, vertices: MatRef<f64>) -> Mat<f64>
where
    M: CovarianceModel + ?Sized,
{
    let d = model.output_dimension();
    let n = vertices.nrows();
    let mut matrix = Mat::<f64>::zeros(n * d, n * d);

    for j in 0..n {
        for i in 0..n {
            let local = model.compute(vertices.row(i), vertices.row(j));
            matrix.submatrix_mut(i * d, j * d, d, d).copy_from(local.as_ref());
        }
    }
    matrix
}
