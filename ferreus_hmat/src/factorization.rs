/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements hierarchical LU, LDLt and LLt factorizations and the matching triangular solves.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # factorization
//!
//! In-place factorizations of a diagonal [`HBlock`], following the 2x2 block
//! recursion
//!
//! ```text
//! | A00 A01 |   | L00     | | U00 U01 |
//! | A10 A11 | = | L10 L11 | |     U11 |
//! ```
//!
//! After LU, the strictly lower part holds the unit lower factor and the
//! upper part holds `U`. After LDLt the strictly lower part holds the unit
//! lower factor and the diagonal holds `D`. After LLt the lower part holds
//! `L`. In the symmetric cases the upper part is cleared.
//!
//! Dense leaves use an unpivoted kernel so that the block structure is kept.
//! Pivots that are too small are reported as a failure, which the caller
//! answers with more regularization.

use crate::{
    arithmetic::gemm_add,
    block::{BlockData, HBlock, RkMatrix},
    config::FactorizationMethod,
    error::HMatrixError,
};
use faer::{
    dyn_stack::{MemBuffer, MemStack},
    linalg::{cholesky::llt, triangular_solve},
    prelude::*,
    reborrow::*,
    Mat, MatMut, MatRef, Par,
};

#[derive(Debug)]
pub enum FactorizationError {
    /// LLT failed (matrix not SPD or numerically indefinite)
    NotSpd,
    /// Zero, tiny or non-finite pivot in an unpivoted kernel.
    ZeroPivot { index: usize },
    /// Failure unrelated to the conditioning of the matrix.
    Engine(HMatrixError),
}

impl From<HMatrixError> for FactorizationError {
    fn from(value: HMatrixError) -> Self {
        FactorizationError::Engine(value)
    }
}

/// Which triangle of a block is read by a triangular solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triangle {
    Lower,
    Upper,
}

/// Largest diagonal magnitude, used to scale the pivot threshold.
fn diagonal_scale(a: &Mat<f64>) -> f64 {
    (0..a.nrows()).map(|i| a[(i, i)].abs()).fold(0.0, f64::max)
}

fn check_pivot(pivot: f64, scale: f64, index: usize) -> Result<(), FactorizationError> {
    match pivot.is_finite() && pivot.abs() > f64::EPSILON * scale {
        true => Ok(()),
        false => Err(FactorizationError::ZeroPivot { index }),
    }
}

fn clear_strict_upper(a: &mut Mat<f64>) {
    for j in 1..a.ncols() {
        for i in 0..j.min(a.nrows()) {
            a[(i, j)] = 0.0;
        }
    }
}

/// Right-looking LU without pivoting.
pub fn lu_in_place(a: &mut Mat<f64>) -> Result<(), FactorizationError> {
    let n = a.nrows();
    let scale = diagonal_scale(a);

    for k in 0..n {
        let pivot = a[(k, k)];
        check_pivot(pivot, scale, k)?;

        for i in k + 1..n {
            a[(i, k)] /= pivot;
        }
        for j in k + 1..n {
            let akj = a[(k, j)];
            if akj != 0.0 {
                for i in k + 1..n {
                    a[(i, j)] -= a[(i, k)] * akj;
                }
            }
        }
    }

    Ok(())
}

/// LDL^T without pivoting. Only the lower triangle of `a` is read.
pub fn ldlt_in_place(a: &mut Mat<f64>) -> Result<(), FactorizationError> {
    let n = a.nrows();
    let scale = diagonal_scale(a);

    for k in 0..n {
        let d = a[(k, k)];
        check_pivot(d, scale, k)?;

        for i in k + 1..n {
            a[(i, k)] /= d;
        }
        for j in k + 1..n {
            let ljk_d = a[(j, k)] * d;
            for i in j..n {
                a[(i, j)] -= a[(i, k)] * ljk_d;
            }
        }
    }

    clear_strict_upper(a);
    Ok(())
}

/// Cholesky factorization. Only the lower triangle of `a` is read.
pub fn llt_in_place(a: &mut Mat<f64>) -> Result<(), FactorizationError> {
    let n = a.nrows();
    let par = Par::Seq;

    let cholesky_memory = llt::factor::cholesky_in_place_scratch::<f64>(n, par, default());
    let mut memory = MemBuffer::new(cholesky_memory);
    let stack = MemStack::new(&mut memory);

    llt::factor::cholesky_in_place(a.rb_mut(), default(), par, stack, default())
        .map_err(|_| FactorizationError::NotSpd)?;

    clear_strict_upper(a);
    for k in 0..n {
        if !a[(k, k)].is_finite() || a[(k, k)] <= 0.0 {
            return Err(FactorizationError::NotSpd);
        }
    }
    Ok(())
}

/// Solves `op(T) X = B` in place for a dense `T`, reading only `triangle`.
fn solve_dense_triangular(
    t: MatRef<f64>,
    triangle: Triangle,
    unit: bool,
    trans: bool,
    x: MatMut<f64>,
) {
    let lower = (triangle == Triangle::Lower) != trans;
    let tri = match trans {
        true => t.transpose(),
        false => t,
    };
    let par = Par::Seq;

    match (lower, unit) {
        (true, true) => triangular_solve::solve_unit_lower_triangular_in_place(tri, x, par),
        (true, false) => triangular_solve::solve_lower_triangular_in_place(tri, x, par),
        (false, true) => triangular_solve::solve_unit_upper_triangular_in_place(tri, x, par),
        (false, false) => triangular_solve::solve_upper_triangular_in_place(tri, x, par),
    }
}

/// Solves `op(T) X = B` in place, where `T` is a diagonal block and `X`
/// a dense matrix over its rows.
pub fn solve_triangular_dense(t: &HBlock, triangle: Triangle, unit: bool, trans: bool, x: MatMut<f64>) {
    match &t.data {
        BlockData::Full(m) => solve_dense_triangular(m.rb(), triangle, unit, trans, x),
        BlockData::LowRank(rk) => {
            let dense = rk.to_dense();
            solve_dense_triangular(dense.rb(), triangle, unit, trans, x)
        }
        BlockData::Hierarchical(children) => {
            let (mut x0, mut x1) = x.split_at_row_mut(children[0].nrows);

            if (triangle == Triangle::Lower) != trans {
                // Forward substitution
                solve_triangular_dense(&children[0], triangle, unit, trans, x0.rb_mut());
                let off_diagonal = match trans {
                    true => &children[1],
                    false => &children[2],
                };
                off_diagonal.gemv(trans, -1.0, x0.rb(), x1.rb_mut());
                solve_triangular_dense(&children[3], triangle, unit, trans, x1.rb_mut());
            } else {
                // Backward substitution
                solve_triangular_dense(&children[3], triangle, unit, trans, x1.rb_mut());
                let off_diagonal = match trans {
                    true => &children[2],
                    false => &children[1],
                };
                off_diagonal.gemv(trans, -1.0, x1.rb(), x0.rb_mut());
                solve_triangular_dense(&children[0], triangle, unit, trans, x0.rb_mut());
            }
        }
    }
}

/// Solves `op(T) X = B` in place, where `B` is a block over the rows of `T`.
pub fn solve_triangular_left(
    t: &HBlock,
    triangle: Triangle,
    unit: bool,
    trans: bool,
    b: &mut HBlock,
    epsilon: f64,
) -> Result<(), HMatrixError> {
    let t_children = match (t.children(), b.is_hierarchical()) {
        (Some(children), true) => children,
        (None, true) => {
            let mut dense = b.to_dense();
            solve_triangular_dense(t, triangle, unit, trans, dense.rb_mut());
            b.data = BlockData::Full(dense);
            return Ok(());
        }
        (_, false) => {
            match &mut b.data {
                BlockData::Full(m) => solve_triangular_dense(t, triangle, unit, trans, m.rb_mut()),
                BlockData::LowRank(rk) => {
                    if rk.rank() > 0 {
                        solve_triangular_dense(t, triangle, unit, trans, rk.u.rb_mut())
                    }
                }
                BlockData::Hierarchical(_) => {}
            }
            return Ok(());
        }
    };

    let BlockData::Hierarchical(b_children) = &mut b.data else {
        return Ok(());
    };
    let forward = (triangle == Triangle::Lower) != trans;

    for j in 0..2 {
        let (top, bottom) = b_children.split_at_mut(2);
        let (b0, b1) = (&mut top[j], &mut bottom[j]);

        if forward {
            solve_triangular_left(&t_children[0], triangle, unit, trans, b0, epsilon)?;
            let off_diagonal = match trans {
                true => &t_children[1],
                false => &t_children[2],
            };
            gemm_add(b1, -1.0, off_diagonal, trans, b0, false, epsilon)?;
            solve_triangular_left(&t_children[3], triangle, unit, trans, b1, epsilon)?;
        } else {
            solve_triangular_left(&t_children[3], triangle, unit, trans, b1, epsilon)?;
            let off_diagonal = match trans {
                true => &t_children[2],
                false => &t_children[1],
            };
            gemm_add(b0, -1.0, off_diagonal, trans, b1, false, epsilon)?;
            solve_triangular_left(&t_children[0], triangle, unit, trans, b0, epsilon)?;
        }
    }

    Ok(())
}

/// Solves `X op(T) = B` in place, as the transposed left solve
/// `op(T)^T X^T = B^T`.
pub fn solve_triangular_right(
    t: &HBlock,
    triangle: Triangle,
    unit: bool,
    trans: bool,
    b: &mut HBlock,
    epsilon: f64,
) -> Result<(), HMatrixError> {
    b.transpose();
    let result = solve_triangular_left(t, triangle, unit, !trans, b, epsilon);
    b.transpose();
    result
}

/// Factorizes a diagonal block in place.
pub fn factorize_block(
    a: &mut HBlock,
    method: FactorizationMethod,
    epsilon: f64,
) -> Result<(), FactorizationError> {
    let children = match &mut a.data {
        BlockData::Full(m) => {
            return match method {
                FactorizationMethod::LU => lu_in_place(m),
                FactorizationMethod::LDLt => ldlt_in_place(m),
                FactorizationMethod::LLt => llt_in_place(m),
            }
        }
        BlockData::LowRank(_) => {
            return Err(FactorizationError::Engine(HMatrixError::Internal(
                "low-rank block found on the diagonal".to_string(),
            )))
        }
        BlockData::Hierarchical(children) => children,
    };

    let [a00, a01, a10, a11] = children.as_mut_slice() else {
        return Err(FactorizationError::Engine(HMatrixError::Internal(
            "hierarchical block without four children".to_string(),
        )));
    };

    factorize_block(a00, method, epsilon)?;

    match method {
        FactorizationMethod::LU => {
            // A01 <- L00^-1 A01, A10 <- A10 U00^-1
            solve_triangular_left(a00, Triangle::Lower, true, false, a01, epsilon)?;
            solve_triangular_right(a00, Triangle::Upper, false, false, a10, epsilon)?;
            gemm_add(a11, -1.0, a10, false, a01, false, epsilon)?;
        }
        FactorizationMethod::LLt => {
            // L10 = A10 L00^-T
            solve_triangular_right(a00, Triangle::Lower, false, true, a10, epsilon)?;
            gemm_add(a11, -1.0, a10, false, a10, true, epsilon)?;
            a01.data = BlockData::LowRank(RkMatrix::zero(a01.nrows, a01.ncols));
        }
        FactorizationMethod::LDLt => {
            // X = A10 L00^-T, L10 = X D00^-1, A11 -= L10 X^T
            solve_triangular_right(a00, Triangle::Lower, true, true, a10, epsilon)?;
            let x = a10.clone();
            let mut d = vec![0.0; a00.nrows];
            a00.diagonal(&mut d);
            let inverse: Vec<f64> = d.iter().map(|value| 1.0 / value).collect();
            a10.scale_columns(&inverse);
            gemm_add(a11, -1.0, a10, false, &x, true, epsilon)?;
            a01.data = BlockData::LowRank(RkMatrix::zero(a01.nrows, a01.ncols));
        }
    }

    factorize_block(a11, method, epsilon)
}

/// Solves `A X = B` in place from a factorized diagonal block.
pub fn solve_factorized(a: &HBlock, method: FactorizationMethod, mut x: MatMut<f64>) {
    match method {
        FactorizationMethod::LU => {
            solve_triangular_dense(a, Triangle::Lower, true, false, x.rb_mut());
            solve_triangular_dense(a, Triangle::Upper, false, false, x.rb_mut());
        }
        FactorizationMethod::LLt => {
            solve_triangular_dense(a, Triangle::Lower, false, false, x.rb_mut());
            solve_triangular_dense(a, Triangle::Lower, false, true, x.rb_mut());
        }
        FactorizationMethod::LDLt => {
            solve_triangular_dense(a, Triangle::Lower, true, false, x.rb_mut());
            let mut d = vec![0.0; a.nrows];
            a.diagonal(&mut d);
            for j in 0..x.ncols() {
                for (i, value) in d.iter().enumerate() {
                    x[(i, j)] /= value;
                }
            }
            solve_triangular_dense(a, Triangle::Lower, true, true, x.rb_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::sample_block;
    use equator::assert;
    use faer::utils::approx::*;

    /// Deterministic SPD matrix: A = M M^T + alpha I.
    fn make_spd(n: usize, alpha: f64) -> Mat<f64> {
        let m = Mat::from_fn(n, n, |i, j| {
            let x = (i as f64 + 1.0) * (j as f64 + 2.0);
            (x.sin() + 2.0 * x.cos()) / (1.0 + (i + j + 1) as f64)
        });
        let mut a = &m * m.transpose();
        for i in 0..n {
            a[(i, i)] += alpha;
        }
        a
    }

    fn lower_unit(a: &Mat<f64>) -> Mat<f64> {
        Mat::from_fn(a.nrows(), a.ncols(), |i, j| match i.cmp(&j) {
            std::cmp::Ordering::Greater => a[(i, j)],
            std::cmp::Ordering::Equal => 1.0,
            std::cmp::Ordering::Less => 0.0,
        })
    }

    #[test]
    fn dense_lu_reconstructs() {
        let a = make_spd(7, 1.0);
        let mut f = a.clone();
        lu_in_place(&mut f).unwrap();
        let l = lower_unit(&f);
        let u = Mat::from_fn(7, 7, |i, j| if i <= j { f[(i, j)] } else { 0.0 });
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(&l * &u ~ a);
    }

    #[test]
    fn dense_ldlt_reconstructs() {
        let a = make_spd(6, 0.5);
        let mut f = a.clone();
        ldlt_in_place(&mut f).unwrap();
        let l = lower_unit(&f);
        let ld = Mat::from_fn(6, 6, |i, j| l[(i, j)] * f[(j, j)]);
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(&ld * l.transpose() ~ a);
    }

    #[test]
    fn dense_llt_reconstructs_and_rejects_indefinite() {
        let a = make_spd(6, 0.5);
        let mut f = a.clone();
        llt_in_place(&mut f).unwrap();
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e4);
        assert!(&f * f.transpose() ~ a);

        let mut indefinite = Mat::<f64>::identity(3, 3);
        indefinite[(1, 1)] = -1.0;
        assert!(matches!(llt_in_place(&mut indefinite), Err(FactorizationError::NotSpd)));
    }

    #[test]
    fn zero_pivot_is_reported() {
        let mut a = Mat::<f64>::zeros(3, 3);
        assert!(matches!(lu_in_place(&mut a), Err(FactorizationError::ZeroPivot { index: 0 })));
        let mut b = Mat::from_fn(2, 2, |_, _| 1.0);
        assert!(matches!(ldlt_in_place(&mut b), Err(FactorizationError::ZeroPivot { index: 1 })));
    }

    #[test]
    fn hierarchical_factorizations_solve_systems() {
        let (block, dense) = sample_block();
        let b = Mat::from_fn(8, 2, |i, j| 1.0 + (i * (j + 1)) as f64);
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e6);

        for method in [FactorizationMethod::LU, FactorizationMethod::LDLt, FactorizationMethod::LLt] {
            let mut factorized = block.clone();
            factorize_block(&mut factorized, method, 1e-14).unwrap();
            let mut x = b.clone();
            solve_factorized(&factorized, method, x.rb_mut());
            assert!(&dense * &x ~ b);
        }
    }

    #[test]
    fn hierarchical_llt_matches_dense_factor() {
        let (block, dense) = sample_block();
        let mut factorized = block.clone();
        factorize_block(&mut factorized, FactorizationMethod::LLt, 1e-14).unwrap();
        let l = factorized.to_dense();
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e6);
        assert!(&l * l.transpose() ~ dense);
    }

    #[test]
    fn triangular_solves_on_dense_rhs() {
        let (block, dense) = sample_block();
        let lower = Mat::from_fn(8, 8, |i, j| if i >= j { dense[(i, j)] } else { 0.0 });
        let b = Mat::from_fn(8, 1, |i, _| i as f64 - 3.0);
        let approx_eq = CwiseMat(ApproxEq::eps() * 1e6);

        let mut x = b.clone();
        solve_triangular_dense(&block, Triangle::Lower, false, false, x.rb_mut());
        assert!(&lower * &x ~ b);

        let mut y = b.clone();
        solve_triangular_dense(&block, Triangle::Lower, false, true, y.rb_mut());
        assert!(lower.transpose() * &y ~ b);
    }
}
