/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines the hierarchical block tree and its basic in-place algebra.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # block
//!
//! A block covers the hierarchical rows `row_offset..row_offset + nrows` and
//! columns `col_offset..col_offset + ncols` of the matrix. Leaves are stored
//! either dense or as a low-rank product `U * V^T`. Hierarchical blocks own
//! four children in row-major order `[00, 01, 10, 11]`.

use crate::{
    aca,
    error::Result,
    utils::{scale_in_place, squared_frobenius},
};
use faer::{linalg::matmul, reborrow::*, Accum, Mat, MatMut, MatRef, Par};
use rayon::prelude::*;
use serde::Serialize;

/// Low-rank block `U * V^T`, with `U` of shape `m x k` and `V` of shape `n x k`.
#[derive(Debug, Clone)]
pub struct RkMatrix {
    pub u: Mat<f64>,
    pub v: Mat<f64>,
}

impl RkMatrix {
    /// Rank-0 block.
    pub fn zero(nrows: usize, ncols: usize) -> Self {
        RkMatrix {
            u: Mat::zeros(nrows, 0),
            v: Mat::zeros(ncols, 0),
        }
    }

    pub fn rank(&self) -> usize {
        self.u.ncols()
    }

    /// Number of stored scalars.
    pub fn storage(&self) -> usize {
        self.rank() * (self.u.nrows() + self.v.nrows())
    }

    pub fn to_dense(&self) -> Mat<f64> {
        match self.rank() {
            0 => Mat::zeros(self.u.nrows(), self.v.nrows()),
            _ => &self.u * self.v.transpose(),
        }
    }

    /// Recompresses the factors to relative accuracy `epsilon`.
    pub fn truncate(&mut self, epsilon: f64) -> Result<()> {
        if self.rank() == 0 {
            return Ok(());
        }
        let (u, v) = aca::recompress_aca(&self.u, &self.v, &epsilon)?;
        self.u = u;
        self.v = v;
        Ok(())
    }
}

/// Storage of one block.
#[derive(Debug, Clone)]
pub enum BlockData {
    Full(Mat<f64>),
    LowRank(RkMatrix),
    Hierarchical(Vec<HBlock>),
}

impl BlockData {
    /// Keeps a low-rank leaf only while it is cheaper than the dense block,
    /// so that compressed storage never exceeds the uncompressed one.
    pub fn from_low_rank(rk: RkMatrix) -> Self {
        let (nrows, ncols) = (rk.u.nrows(), rk.v.nrows());
        match rk.storage() > nrows * ncols {
            true => BlockData::Full(rk.to_dense()),
            false => BlockData::LowRank(rk),
        }
    }
}

/// A node of the block tree.
#[derive(Debug, Clone)]
pub struct HBlock {
    pub row_offset: usize,
    pub col_offset: usize,
    pub nrows: usize,
    pub ncols: usize,
    pub data: BlockData,
}

/// Storage accounting over a block tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSizes {
    /// Scalars stored in full and low-rank leaves.
    pub compressed: usize,
    /// Scalars stored in full leaves only.
    pub full: usize,
}

/// Serialisable description of a block tree, used for diagnostics.
#[derive(Debug, Serialize)]
pub struct BlockSummary {
    pub row_offset: usize,
    pub col_offset: usize,
    pub nrows: usize,
    pub ncols: usize,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockSummary>,
}

impl HBlock {
    pub fn new(row_offset: usize, col_offset: usize, nrows: usize, ncols: usize, data: BlockData) -> Self {
        HBlock {
            row_offset,
            col_offset,
            nrows,
            ncols,
            data,
        }
    }

    pub fn children(&self) -> Option<&[HBlock]> {
        match &self.data {
            BlockData::Hierarchical(children) => Some(children),
            _ => None,
        }
    }

    pub fn is_hierarchical(&self) -> bool {
        matches!(self.data, BlockData::Hierarchical(_))
    }

    /// Dense copy of the block.
    pub fn to_dense(&self) -> Mat<f64> {
        match &self.data {
            BlockData::Full(m) => m.clone(),
            BlockData::LowRank(rk) => rk.to_dense(),
            BlockData::Hierarchical(children) => {
                let mut dense = Mat::<f64>::zeros(self.nrows, self.ncols);
                for child in children {
                    dense
                        .submatrix_mut(
                            child.row_offset - self.row_offset,
                            child.col_offset - self.col_offset,
                            child.nrows,
                            child.ncols,
                        )
                        .copy_from(child.to_dense().as_ref());
                }
                dense
            }
        }
    }

    pub fn scale(&mut self, alpha: f64) {
        match &mut self.data {
            BlockData::Full(m) => scale_in_place(m, alpha),
            BlockData::LowRank(rk) => scale_in_place(&mut rk.u, alpha),
            BlockData::Hierarchical(children) => {
                children.par_iter_mut().for_each(|child| child.scale(alpha))
            }
        }
    }

    /// Multiplies column `j` of the block by `factors[j]`.
    pub fn scale_columns(&mut self, factors: &[f64]) {
        let col_offset = self.col_offset;
        match &mut self.data {
            BlockData::Full(m) => {
                for j in 0..m.ncols() {
                    for i in 0..m.nrows() {
                        m[(i, j)] *= factors[j];
                    }
                }
            }
            BlockData::LowRank(rk) => {
                for k in 0..rk.rank() {
                    for j in 0..rk.v.nrows() {
                        rk.v[(j, k)] *= factors[j];
                    }
                }
            }
            BlockData::Hierarchical(children) => {
                for child in children.iter_mut() {
                    let start = child.col_offset - col_offset;
                    child.scale_columns(&factors[start..start + child.ncols]);
                }
            }
        }
    }

    /// Adds `alpha` to the diagonal of a diagonal block.
    pub fn add_identity(&mut self, alpha: f64) {
        if let BlockData::LowRank(rk) = &self.data {
            self.data = BlockData::Full(rk.to_dense());
        }
        match &mut self.data {
            BlockData::Full(m) => {
                for i in 0..m.nrows().min(m.ncols()) {
                    m[(i, i)] += alpha;
                }
            }
            BlockData::Hierarchical(children) => {
                children[0].add_identity(alpha);
                children[3].add_identity(alpha);
            }
            BlockData::LowRank(_) => {}
        }
    }

    /// In-place transposition, offsets included.
    pub fn transpose(&mut self) {
        std::mem::swap(&mut self.row_offset, &mut self.col_offset);
        std::mem::swap(&mut self.nrows, &mut self.ncols);
        match &mut self.data {
            BlockData::Full(m) => *m = m.transpose().to_owned(),
            BlockData::LowRank(rk) => std::mem::swap(&mut rk.u, &mut rk.v),
            BlockData::Hierarchical(children) => {
                children.par_iter_mut().for_each(|child| child.transpose());
                children.swap(1, 2);
            }
        }
    }

    /// Squared Frobenius norm.
    pub fn squared_norm(&self) -> f64 {
        match &self.data {
            BlockData::Full(m) => squared_frobenius(m.as_ref()),
            BlockData::LowRank(rk) => {
                if rk.rank() == 0 {
                    return 0.0;
                }
                // ||U V^T||^2 = sum_ij (U^T U)_ij (V^T V)_ij
                let utu = rk.u.transpose() * &rk.u;
                let vtv = rk.v.transpose() * &rk.v;
                let mut sum = 0.0;
                for j in 0..utu.ncols() {
                    for i in 0..utu.nrows() {
                        sum += utu[(i, j)] * vtv[(i, j)];
                    }
                }
                sum.max(0.0)
            }
            BlockData::Hierarchical(children) => {
                children.par_iter().map(|child| child.squared_norm()).sum()
            }
        }
    }

    /// Writes the diagonal of a diagonal block into `diagonal`.
    pub fn diagonal(&self, diagonal: &mut [f64]) {
        match &self.data {
            BlockData::Full(m) => {
                for (i, value) in diagonal.iter_mut().enumerate() {
                    *value = m[(i, i)];
                }
            }
            BlockData::LowRank(rk) => {
                for (i, value) in diagonal.iter_mut().enumerate() {
                    *value = (0..rk.rank()).map(|k| rk.u[(i, k)] * rk.v[(i, k)]).sum();
                }
            }
            BlockData::Hierarchical(children) => {
                let (first, second) = diagonal.split_at_mut(children[0].nrows);
                children[0].diagonal(first);
                children[3].diagonal(second);
            }
        }
    }

    /// Accumulates storage sizes of the leaves.
    pub fn sizes(&self, sizes: &mut BlockSizes) {
        match &self.data {
            BlockData::Full(_) => {
                sizes.compressed += self.nrows * self.ncols;
                sizes.full += self.nrows * self.ncols;
            }
            BlockData::LowRank(rk) => sizes.compressed += rk.storage(),
            BlockData::Hierarchical(children) => {
                children.iter().for_each(|child| child.sizes(sizes))
            }
        }
    }

    /// `y += alpha * op(A) * x`, where `x` and `y` are restricted to the
    /// block's input and output ranges.
    pub fn gemv(&self, trans: bool, alpha: f64, x: MatRef<f64>, mut y: MatMut<f64>) {
        match &self.data {
            BlockData::Full(m) => {
                let op = match trans {
                    true => m.transpose(),
                    false => m.rb(),
                };
                matmul::matmul(y.rb_mut(), Accum::Add, op, x, alpha, Par::Seq);
            }
            BlockData::LowRank(rk) => {
                if rk.rank() == 0 {
                    return;
                }
                let (left, right) = match trans {
                    true => (&rk.v, &rk.u),
                    false => (&rk.u, &rk.v),
                };
                // op(A) x = left * (right^T x)
                let tmp = right.transpose() * x;
                matmul::matmul(y.rb_mut(), Accum::Add, left.rb(), tmp.rb(), alpha, Par::Seq);
            }
            BlockData::Hierarchical(children) => {
                for child in children {
                    let row_start = child.row_offset - self.row_offset;
                    let col_start = child.col_offset - self.col_offset;
                    let (input, output) = match trans {
                        true => (x.subrows(row_start, child.nrows), y.rb_mut().subrows_mut(col_start, child.ncols)),
                        false => (x.subrows(col_start, child.ncols), y.rb_mut().subrows_mut(row_start, child.nrows)),
                    };
                    child.gemv(trans, alpha, input, output);
                }
            }
        }
    }

    /// Recompresses every low-rank leaf to relative accuracy `epsilon`.
    pub fn truncate(&mut self, epsilon: f64) -> Result<()> {
        match &mut self.data {
            BlockData::Full(_) => Ok(()),
            BlockData::LowRank(rk) => {
                let mut rk = std::mem::replace(rk, RkMatrix::zero(0, 0));
                rk.truncate(epsilon)?;
                self.data = BlockData::from_low_rank(rk);
                Ok(())
            }
            BlockData::Hierarchical(children) => children
                .par_iter_mut()
                .try_for_each(|child| child.truncate(epsilon)),
        }
    }

    pub fn summary(&self) -> BlockSummary {
        let (kind, rank, children) = match &self.data {
            BlockData::Full(_) => ("full", None, Vec::new()),
            BlockData::LowRank(rk) => ("rk", Some(rk.rank()), Vec::new()),
            BlockData::Hierarchical(children) => (
                "hierarchical",
                None,
                children.iter().map(|child| child.summary()).collect(),
            ),
        };
        BlockSummary {
            row_offset: self.row_offset,
            col_offset: self.col_offset,
            nrows: self.nrows,
            ncols: self.ncols,
            kind,
            rank,
            children,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use equator::assert;
    use faer::utils::approx::*;

    /// Two-level test block over 8 rows/cols: a full 4x4 diagonal pair,
    /// and low-rank off-diagonal blocks.
    pub(crate) fn sample_block() -> (HBlock, Mat<f64>) {
        let dense = Mat::from_fn(8, 8, |i, j| {
            let (x, y) = (i as f64, j as f64);
            1.0 / (1.0 + (x - y).abs()) + if i == j { 4.0 } else { 0.0 }
        });
        let mut children = Vec::new();
        for (r, c) in [(0, 0), (0, 4), (4, 0), (4, 4)] {
            let sub = dense.submatrix(r, c, 4, 4).to_owned();
            let data = match r == c {
                true => BlockData::Full(sub),
                false => {
                    let (u, v) = aca::svd_compress(&sub, &1e-14).unwrap();
                    BlockData::LowRank(RkMatrix { u, v })
                }
            };
            children.push(HBlock::new(r, c, 4, 4, data));
        }
        (HBlock::new(0, 0, 8, 8, BlockData::Hierarchical(children)), dense)
    }

    #[test]
    fn dense_conversion_and_norm() {
        let (block, dense) = sample_block();
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(block.to_dense() ~ dense);
        let expected = squared_frobenius(dense.as_ref());
        assert!((block.squared_norm() - expected).abs() <= 1e-10 * expected);
    }

    #[test]
    fn gemv_matches_dense_product() {
        let (block, dense) = sample_block();
        let x = Mat::from_fn(8, 2, |i, j| (i + 3 * j) as f64 * 0.25 - 1.0);
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);

        for trans in [false, true] {
            let mut y = Mat::<f64>::zeros(8, 2);
            block.gemv(trans, 2.0, x.as_ref(), y.as_mut());
            let op = if trans { dense.transpose().to_owned() } else { dense.clone() };
            let product = &op * &x;
            let expected = Mat::from_fn(8, 2, |i, j| 2.0 * product[(i, j)]);
            assert!(y ~ expected);
        }
    }

    #[test]
    fn transpose_swaps_structure() {
        let (mut block, dense) = sample_block();
        block.transpose();
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(block.to_dense() ~ dense.transpose().to_owned());
        block.transpose();
        assert!(block.to_dense() ~ dense);
    }

    #[test]
    fn identity_scale_and_diagonal() {
        let (mut block, dense) = sample_block();
        block.add_identity(1.5);
        block.scale(2.0);
        let mut diagonal = vec![0.0; 8];
        block.diagonal(&mut diagonal);
        for i in 0..8 {
            assert!((diagonal[i] - 2.0 * (dense[(i, i)] + 1.5)).abs() < 1e-12);
        }
    }

    #[test]
    fn scale_columns_matches_dense() {
        let (mut block, dense) = sample_block();
        let factors: Vec<f64> = (0..8).map(|j| 1.0 + j as f64).collect();
        block.scale_columns(&factors);
        let expected = Mat::from_fn(8, 8, |i, j| dense[(i, j)] * factors[j]);
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(block.to_dense() ~ expected);
    }

    #[test]
    fn sizes_account_for_leaves() {
        let (block, _) = sample_block();
        let mut sizes = BlockSizes::default();
        block.sizes(&mut sizes);
        assert_eq!(sizes.full, 32);
        assert!(sizes.compressed >= sizes.full);
        assert!(sizes.compressed <= 64);
    }

    #[test]
    fn oversized_low_rank_is_stored_full() {
        let rk = RkMatrix {
            u: Mat::from_fn(3, 3, |i, j| (i + j) as f64),
            v: Mat::from_fn(3, 3, |i, j| (i * j) as f64),
        };
        assert!(matches!(BlockData::from_low_rank(rk), BlockData::Full(_)));
        let rk = RkMatrix {
            u: Mat::from_fn(10, 1, |i, _| i as f64),
            v: Mat::from_fn(10, 1, |i, _| i as f64),
        };
        assert!(matches!(BlockData::from_low_rank(rk), BlockData::LowRank(_)));
    }
}
