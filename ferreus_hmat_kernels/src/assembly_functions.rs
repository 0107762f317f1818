/////////////////////////////////////////////////////////////////////////////////////////////
//
// Adapts covariance models to the scalar and tensor H-matrix assembly functions.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::CovarianceModel;
use faer::{Mat, MatRef};
use ferreus_hmat::{
    traits::{RealAssemblyFunction, TensorRealAssemblyFunction},
    HMatrixError, Result,
};

fn check_vertices<M: CovarianceModel + ?Sized>(model: &M, vertices: MatRef<f64>) -> Result<()> {
    match vertices.ncols() == model.input_dimension() {
        true => Ok(()),
        false => Err(HMatrixError::InvalidArgument(format!(
            "vertices have dimension {}, the covariance model expects {}",
            vertices.ncols(),
            model.input_dimension()
        ))),
    }
}

/// Scalar assembly function over the `n * d` degrees of freedom of
/// `vertices`, where `d` is the output dimension of the model.
///
/// For multi-output models every entry evaluates the full `d x d` local
/// covariance; [`CovarianceBlockAssemblyFunction`] avoids that.
pub struct CovarianceAssemblyFunction<'a, M: CovarianceModel + ?Sized> {
    model: &'a M,
    vertices: MatRef<'a, f64>,
    covariance_dimension: usize,
}

impl<'a, M: CovarianceModel + ?Sized> CovarianceAssemblyFunction<'a, M> {
    pub fn new(model: &'a M, vertices: MatRef<'a, f64>) -> Result<Self> {
        check_vertices(model, vertices)?;
        log::debug!(
            "Scalar covariance assembly over {} vertices, output dimension {}",
            vertices.nrows(),
            model.output_dimension()
        );
        Ok(CovarianceAssemblyFunction {
            model,
            vertices,
            covariance_dimension: model.output_dimension(),
        })
    }
}

impl<M: CovarianceModel + ?Sized> RealAssemblyFunction for CovarianceAssemblyFunction<'_, M> {
    #[inline(always)]
    fn evaluate(&self, row: usize, column: usize) -> f64 {
        let d = self.covariance_dimension;
        if d == 1 {
            return self
                .model
                .compute_as_scalar(self.vertices.row(row), self.vertices.row(column));
        }

        let local = self
            .model
            .compute(self.vertices.row(row / d), self.vertices.row(column / d));
        local[(row % d, column % d)]
    }
}

/// Tensor assembly function: one model evaluation fills the whole
/// `d x d` block coupling two vertices.
pub struct CovarianceBlockAssemblyFunction<'a, M: CovarianceModel + ?Sized> {
    model: &'a M,
    vertices: MatRef<'a, f64>,
}

impl<'a, M: CovarianceModel + ?Sized> CovarianceBlockAssemblyFunction<'a, M> {
    pub fn new(model: &'a M, vertices: MatRef<'a, f64>) -> Result<Self> {
        check_vertices(model, vertices)?;
        log::debug!(
            "Tensor covariance assembly over {} vertices, output dimension {}",
            vertices.nrows(),
            model.output_dimension()
        );
        Ok(CovarianceBlockAssemblyFunction { model, vertices })
    }
}

impl<M: CovarianceModel + ?Sized> TensorRealAssemblyFunction for CovarianceBlockAssemblyFunction<'_, M> {
    fn dimension(&self) -> usize {
        self.model.output_dimension()
    }

    fn compute(&self, i: usize, j: usize, local_values: &mut Mat<f64>) {
        let (s, t) = (self.vertices.row(i), self.vertices.row(j));
        match self.model.output_dimension() {
            1 => local_values[(0, 0)] = self.model.compute_as_scalar(s, t),
            _ => local_values.copy_from(self.model.compute(s, t).as_ref()),
        }
    }
}
