/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements H-matrix products and additions with low-rank recompression.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # arithmetic
//!
//! Formatted H-matrix arithmetic. `C += alpha * op(A) * op(B)` recurses
//! while all three operands are hierarchical. Otherwise the product is
//! formed as a leaf (low-rank if either operand is low-rank, dense if not)
//! and added into `C`, with low-rank targets recompressed to `epsilon`.

use crate::{
    aca,
    block::{BlockData, HBlock, RkMatrix},
    error::Result,
    utils::{hstack, scale_in_place},
};
use faer::{linalg::matmul, reborrow::*, Accum, Mat, MatRef, Par};
use rayon::prelude::*;

/// Product of two blocks, in leaf form.
#[derive(Debug, Clone)]
pub enum LeafMatrix {
    Full(Mat<f64>),
    LowRank(RkMatrix),
}

impl LeafMatrix {
    /// The sub-block at (`row_start`, `col_start`) of size `nrows x ncols`.
    fn restrict(&self, row_start: usize, col_start: usize, nrows: usize, ncols: usize) -> LeafMatrix {
        match self {
            LeafMatrix::Full(m) => {
                LeafMatrix::Full(m.submatrix(row_start, col_start, nrows, ncols).to_owned())
            }
            LeafMatrix::LowRank(rk) => LeafMatrix::LowRank(RkMatrix {
                u: rk.u.subrows(row_start, nrows).to_owned(),
                v: rk.v.subrows(col_start, ncols).to_owned(),
            }),
        }
    }
}

/// Returns `op(block) * x` as a new dense matrix.
pub fn apply(block: &HBlock, trans: bool, x: MatRef<f64>) -> Mat<f64> {
    let nrows = match trans {
        true => block.ncols,
        false => block.nrows,
    };
    let mut y = Mat::<f64>::zeros(nrows, x.ncols());
    block.gemv(trans, 1.0, x, y.as_mut());
    y
}

/// Factors `(L, R)` with `op(U V^T) = L * R^T`.
fn op_factors(rk: &RkMatrix, trans: bool) -> (&Mat<f64>, &Mat<f64>) {
    match trans {
        true => (&rk.v, &rk.u),
        false => (&rk.u, &rk.v),
    }
}

/// `op(A) * op(B)` in leaf form.
pub fn leaf_product(a: &HBlock, trans_a: bool, b: &HBlock, trans_b: bool) -> LeafMatrix {
    match (&a.data, &b.data) {
        (BlockData::LowRank(rk), _) => {
            // L (op(B)^T R)^T
            let (left, right) = op_factors(rk, trans_a);
            let v = apply(b, !trans_b, right.rb());
            LeafMatrix::LowRank(RkMatrix { u: left.clone(), v })
        }
        (_, BlockData::LowRank(rk)) => {
            // (op(A) L) R^T
            let (left, right) = op_factors(rk, trans_b);
            let u = apply(a, trans_a, left.rb());
            LeafMatrix::LowRank(RkMatrix { u, v: right.clone() })
        }
        (BlockData::Full(m), _) => {
            // (op(B)^T op(A)^T)^T
            let op_a_t = match trans_a {
                true => m.rb(),
                false => m.transpose(),
            };
            let product_t = apply(b, !trans_b, op_a_t);
            LeafMatrix::Full(product_t.transpose().to_owned())
        }
        (_, BlockData::Full(m)) => {
            let op_b = match trans_b {
                true => m.transpose(),
                false => m.rb(),
            };
            LeafMatrix::Full(apply(a, trans_a, op_b))
        }
        _ => {
            let dense_b = b.to_dense();
            let op_b = match trans_b {
                true => dense_b.transpose(),
                false => dense_b.rb(),
            };
            LeafMatrix::Full(apply(a, trans_a, op_b))
        }
    }
}

/// `C += alpha * P` for a leaf-form `P` of the same shape as `C`.
pub fn add_leaf(c: &mut HBlock, alpha: f64, product: &LeafMatrix, epsilon: f64) -> Result<()> {
    let (row_offset, col_offset) = (c.row_offset, c.col_offset);

    let replacement = match &mut c.data {
        BlockData::Full(m) => {
            match product {
                LeafMatrix::Full(p) => {
                    for j in 0..m.ncols() {
                        for i in 0..m.nrows() {
                            m[(i, j)] += alpha * p[(i, j)];
                        }
                    }
                }
                LeafMatrix::LowRank(rk) => {
                    if rk.rank() > 0 {
                        matmul::matmul(m.rb_mut(), Accum::Add, rk.u.rb(), rk.v.transpose(), alpha, Par::Seq);
                    }
                }
            }
            None
        }
        BlockData::LowRank(rk) => {
            let sum = match product {
                LeafMatrix::LowRank(p) => {
                    if p.rank() == 0 {
                        return Ok(());
                    }
                    let mut pu = p.u.clone();
                    scale_in_place(&mut pu, alpha);
                    let u = hstack(rk.u.rb(), pu.rb());
                    let v = hstack(rk.v.rb(), p.v.rb());
                    aca::recompress_aca(&u, &v, &epsilon)?
                }
                LeafMatrix::Full(p) => {
                    let mut dense = rk.to_dense();
                    for j in 0..dense.ncols() {
                        for i in 0..dense.nrows() {
                            dense[(i, j)] += alpha * p[(i, j)];
                        }
                    }
                    aca::svd_compress(&dense, &epsilon)?
                }
            };
            Some(BlockData::from_low_rank(RkMatrix { u: sum.0, v: sum.1 }))
        }
        BlockData::Hierarchical(children) => {
            for child in children.iter_mut() {
                let restricted = product.restrict(
                    child.row_offset - row_offset,
                    child.col_offset - col_offset,
                    child.nrows,
                    child.ncols,
                );
                add_leaf(child, alpha, &restricted, epsilon)?;
            }
            None
        }
    };

    if let Some(data) = replacement {
        c.data = data;
    }
    Ok(())
}

/// `C += alpha * op(A) * op(B)`.
pub fn gemm_add(
    c: &mut HBlock,
    alpha: f64,
    a: &HBlock,
    trans_a: bool,
    b: &HBlock,
    trans_b: bool,
    epsilon: f64,
) -> Result<()> {
    if alpha == 0.0 {
        return Ok(());
    }

    if let (BlockData::Hierarchical(c_children), Some(a_children), Some(b_children)) =
        (&mut c.data, a.children(), b.children())
    {
        return c_children
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(index, c_ij)| {
                let (i, j) = (index / 2, index % 2);
                for k in 0..2 {
                    let a_ik = match trans_a {
                        true => &a_children[k * 2 + i],
                        false => &a_children[i * 2 + k],
                    };
                    let b_kj = match trans_b {
                        true => &b_children[j * 2 + k],
                        false => &b_children[k * 2 + j],
                    };
                    gemm_add(c_ij, alpha, a_ik, trans_a, b_kj, trans_b, epsilon)?;
                }
                Ok(())
            });
    }

    let product = leaf_product(a, trans_a, b, trans_b);
    add_leaf(c, alpha, &product, epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::sample_block;
    use equator::assert;
    use faer::utils::approx::*;

    fn as_full(block: &HBlock) -> HBlock {
        HBlock::new(block.row_offset, block.col_offset, block.nrows, block.ncols, BlockData::Full(block.to_dense()))
    }

    fn as_low_rank(block: &HBlock) -> HBlock {
        let (u, v) = aca::svd_compress(&block.to_dense(), &1e-15).unwrap();
        HBlock::new(block.row_offset, block.col_offset, block.nrows, block.ncols, BlockData::LowRank(RkMatrix { u, v }))
    }

    fn dense_op(m: &Mat<f64>, trans: bool) -> Mat<f64> {
        match trans {
            true => m.transpose().to_owned(),
            false => m.clone(),
        }
    }

    #[test]
    fn gemm_matches_dense_for_every_storage_mix() {
        let (h, dense) = sample_block();
        let variants = [h.clone(), as_full(&h), as_low_rank(&h)];
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e6);

        for c_variant in &variants {
            for a in &variants {
                for b in &variants {
                    for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
                        let mut c = c_variant.clone();
                        gemm_add(&mut c, -0.5, a, ta, b, tb, 1e-14).unwrap();

                        let product = &dense_op(&dense, ta) * &dense_op(&dense, tb);
                        let expected = Mat::from_fn(8, 8, |i, j| dense[(i, j)] - 0.5 * product[(i, j)]);
                        assert!(c.to_dense() ~ expected);
                    }
                }
            }
        }
    }

    #[test]
    fn adding_low_rank_into_low_rank_recompresses() {
        let u = Mat::from_fn(10, 1, |i, _| 1.0 + i as f64);
        let v = Mat::from_fn(12, 1, |j, _| (j as f64 * 0.3).sin());
        let mut c = HBlock::new(0, 0, 10, 12, BlockData::LowRank(RkMatrix { u: u.clone(), v: v.clone() }));
        let product = LeafMatrix::LowRank(RkMatrix { u, v });

        add_leaf(&mut c, 2.0, &product, 1e-12).unwrap();

        match &c.data {
            BlockData::LowRank(rk) => assert!(rk.rank() == 1),
            other => panic!("Expected a low-rank block, got {:?}", other),
        }
    }

    #[test]
    fn apply_transposed_matches_dense() {
        let (h, dense) = sample_block();
        let x = Mat::from_fn(8, 3, |i, j| ((i * 7 + j) % 5) as f64);
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(apply(&h, true, x.rb()) ~ dense.transpose() * &x);
    }
}
