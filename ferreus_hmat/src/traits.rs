/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the assembly function traits used to fill H-matrix blocks.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;

/// Computes one scalar entry of the matrix being assembled.
///
/// Indices are client degree-of-freedom indices, i.e. in the order of the
/// points given to the factory, with `output_dimension` consecutive entries
/// per point. Blocks are assembled concurrently, hence the `Sync` bound.
pub trait RealAssemblyFunction: Sync {
    fn evaluate(&self, row: usize, column: usize) -> f64;
}

/// Computes the dense `dimension x dimension` block coupling two points.
///
/// Used for multi-output models, where one evaluation for a pair of
/// points yields every entry between their degrees of freedom.
pub trait TensorRealAssemblyFunction: Sync {
    fn dimension(&self) -> usize;

    /// Fills `local_values` (already sized `dimension x dimension`) with
    /// the block coupling point `i` and point `j`.
    fn compute(&self, i: usize, j: usize, local_values: &mut Mat<f64>);
}

impl<F> RealAssemblyFunction for F
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    #[inline(always)]
    fn evaluate(&self, row: usize, column: usize) -> f64 {
        self(row, column)
    }
}
