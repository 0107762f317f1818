/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the HMatrix type: assembly, algebra, regularized factorization and solves.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # hmatrix
//!
//! A square hierarchical matrix over the degrees of freedom of a
//! [`ClusterTree`]. Every public operation takes and returns data in client
//! order; the permutation to and from hierarchical order happens here.
//!
//! Cloning an [`HMatrix`] copies its blocks, while the cluster tree and the
//! factory interface are shared.

use crate::{
    arithmetic::gemm_add,
    assembly::{Assembler, BlockGenerator, ScalarBlockGenerator, TensorBlockGenerator},
    block::{BlockSizes, BlockSummary, HBlock},
    cluster_tree::ClusterTree,
    config::{CompressionMethod, FactorizationMethod, HMatrixParameters},
    error::{HMatrixError, Result},
    factorization::{self, FactorizationError, Triangle},
    factory::{ensure_backend, HMatrixInterface},
    progress::ProgressMsg,
    traits::{RealAssemblyFunction, TensorRealAssemblyFunction},
    utils::select_mat_rows,
};
use faer::{reborrow::*, Mat, MatRef};
use serde::Serialize;
use std::{fmt, fs::File, io::Write, path::Path, sync::Arc};

/// Outcome of a successful [`HMatrix::factorize`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorizationInfo {
    pub method: FactorizationMethod,
    /// Multiple of the identity added to the matrix before the successful attempt.
    pub regularization: f64,
    pub attempts: usize,
}

/// Result of the largest eigenvalue power iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EigenValueEstimate {
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Serialize)]
struct DumpInfo<'a> {
    nb_rows: usize,
    compressed_size: usize,
    uncompressed_size: usize,
    full_size: usize,
    low_rank_epsilon: f64,
    factorization: Option<&'a FactorizationInfo>,
    blocks: BlockSummary,
}

/// Hierarchical matrix.
///
/// A default constructed matrix is empty: every operation on it fails with
/// [`HMatrixError::EmptyMatrix`]. Matrices are created by
/// [`HMatrixFactory::build`](crate::HMatrixFactory::build) and filled by
/// [`HMatrix::assemble`] or [`HMatrix::assemble_tensor`].
#[derive(Debug, Clone, Default)]
pub struct HMatrix {
    interface: Option<Arc<HMatrixInterface>>,
    cluster_tree: Option<Arc<ClusterTree>>,
    blocks: Option<HBlock>,
    low_rank_epsilon: f64,
    factorization: Option<FactorizationInfo>,
}

fn parse_symmetry(symmetry: char) -> Result<bool> {
    match symmetry {
        'N' | 'n' => Ok(false),
        'L' | 'l' => Ok(true),
        other => Err(HMatrixError::InvalidSymmetry(other)),
    }
}

fn parse_transpose(trans: char) -> Result<bool> {
    match trans {
        'N' | 'n' => Ok(false),
        'T' | 't' => Ok(true),
        other => Err(HMatrixError::InvalidTranspose(other)),
    }
}

impl HMatrix {
    pub(crate) fn new(interface: Arc<HMatrixInterface>, cluster_tree: Arc<ClusterTree>) -> Self {
        HMatrix {
            interface: Some(interface),
            cluster_tree: Some(cluster_tree),
            blocks: None,
            low_rank_epsilon: 0.0,
            factorization: None,
        }
    }

    fn interface(&self) -> Result<&Arc<HMatrixInterface>> {
        ensure_backend()?;
        self.interface.as_ref().ok_or(HMatrixError::EmptyMatrix)
    }

    fn tree(&self) -> Result<&Arc<ClusterTree>> {
        self.interface()?;
        self.cluster_tree.as_ref().ok_or(HMatrixError::EmptyMatrix)
    }

    fn blocks(&self) -> Result<&HBlock> {
        self.interface()?;
        self.blocks.as_ref().ok_or(HMatrixError::NotAssembled)
    }

    fn blocks_mut(&mut self) -> Result<&mut HBlock> {
        self.interface()?;
        self.blocks.as_mut().ok_or(HMatrixError::NotAssembled)
    }

    /// Blocks of an assembled, unfactorized matrix, for operations that
    /// change or combine matrix values.
    fn assembled_blocks(&self, operation: &'static str) -> Result<&HBlock> {
        let blocks = self.blocks()?;
        match self.factorization {
            Some(_) => Err(HMatrixError::AlreadyFactorized(operation)),
            None => Ok(blocks),
        }
    }

    fn assembled_blocks_mut(&mut self, operation: &'static str) -> Result<&mut HBlock> {
        self.assembled_blocks(operation)?;
        self.blocks_mut()
    }

    fn check_rows(&self, values: MatRef<f64>) -> Result<()> {
        match values.nrows() == self.nb_rows() {
            true => Ok(()),
            false => Err(HMatrixError::DimensionMismatch {
                expected: self.nb_rows(),
                found: values.nrows(),
            }),
        }
    }

    pub fn nb_rows(&self) -> usize {
        self.cluster_tree.as_ref().map_or(0, |tree| tree.size())
    }

    pub fn nb_columns(&self) -> usize {
        self.nb_rows()
    }

    pub fn cluster_tree(&self) -> Option<&ClusterTree> {
        self.cluster_tree.as_deref()
    }

    pub fn is_assembled(&self) -> bool {
        self.blocks.is_some()
    }

    pub fn is_factorized(&self) -> bool {
        self.factorization.is_some()
    }

    pub fn factorization_info(&self) -> Option<FactorizationInfo> {
        self.factorization
    }

    /// Truncation accuracy of the low-rank blocks, set by the last assembly.
    pub fn low_rank_epsilon(&self) -> f64 {
        self.low_rank_epsilon
    }

    /// Assembles the matrix from a scalar entry function.
    ///
    /// With `symmetry` set to `'L'` (or `'l'`) only the lower triangle is
    /// evaluated and mirrored. `'N'` (or `'n'`) evaluates everything.
    pub fn assemble<F>(&mut self, f: &F, parameters: &HMatrixParameters, symmetry: char) -> Result<()>
    where
        F: RealAssemblyFunction + ?Sized,
    {
        let tree = Arc::clone(self.tree()?);
        let lower_symmetric = parse_symmetry(symmetry)?;
        let method = parameters.compression()?;

        let generator = ScalarBlockGenerator::new(f, &tree);
        self.assemble_with(&tree, &generator, method, parameters, lower_symmetric)
    }

    /// Assembles the matrix from a function returning the dense block that
    /// couples two points, evaluated once per point pair and block.
    pub fn assemble_tensor<F>(
        &mut self,
        f: &F,
        parameters: &HMatrixParameters,
        symmetry: char,
    ) -> Result<()>
    where
        F: TensorRealAssemblyFunction + ?Sized,
    {
        let tree = Arc::clone(self.tree()?);
        let lower_symmetric = parse_symmetry(symmetry)?;
        let method = parameters.compression()?;

        if f.dimension() != tree.output_dimension() {
            return Err(HMatrixError::InvalidArgument(format!(
                "assembly function has dimension {}, the cluster tree has output dimension {}",
                f.dimension(),
                tree.output_dimension()
            )));
        }

        let generator = TensorBlockGenerator::new(f, &tree);
        self.assemble_with(&tree, &generator, method, parameters, lower_symmetric)
    }

    fn assemble_with<G: BlockGenerator>(
        &mut self,
        tree: &ClusterTree,
        generator: &G,
        method: CompressionMethod,
        parameters: &HMatrixParameters,
        lower_symmetric: bool,
    ) -> Result<()> {
        let mut blocks = Assembler::new(
            tree,
            generator,
            method,
            parameters.assembly_epsilon,
            parameters.admissibility_factor,
            lower_symmetric,
        )
        .assemble()?;

        blocks.truncate(parameters.recompression_epsilon)?;

        self.blocks = Some(blocks);
        self.low_rank_epsilon = parameters.recompression_epsilon;
        self.factorization = None;

        let (compressed_size, uncompressed_size) = self.compression_ratio()?;
        log::info!(
            "H-matrix assembled with {method}: {compressed_size} of {uncompressed_size} entries stored"
        );
        self.interface()?.emit(ProgressMsg::Assembly {
            compressed_size,
            uncompressed_size,
        });

        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) -> Result<()> {
        self.assembled_blocks_mut("scale")?.scale(alpha);
        Ok(())
    }

    /// Adds `alpha` to every diagonal entry.
    pub fn add_identity(&mut self, alpha: f64) -> Result<()> {
        self.assembled_blocks_mut("add_identity")?.add_identity(alpha);
        Ok(())
    }

    /// `y = alpha * op(H) * x + beta * y`, with one column per right-hand side.
    pub fn gemv(&self, trans: char, alpha: f64, x: MatRef<f64>, beta: f64, y: &mut Mat<f64>) -> Result<()> {
        let trans = parse_transpose(trans)?;
        let blocks = self.blocks()?;
        let tree = self.tree()?;
        self.check_rows(x)?;
        self.check_rows(y.as_ref())?;
        if x.ncols() != y.ncols() {
            return Err(HMatrixError::InvalidArgument(format!(
                "x has {} columns but y has {}",
                x.ncols(),
                y.ncols()
            )));
        }

        let x_h = select_mat_rows(x, tree.hmat_to_client());
        let mut y_h = if beta == 0.0 {
            Mat::zeros(y.nrows(), y.ncols())
        } else {
            let mut y_h = select_mat_rows(y.as_ref(), tree.hmat_to_client());
            y_h *= beta;
            y_h
        };

        blocks.gemv(trans, alpha, x_h.as_ref(), y_h.as_mut());
        *y = select_mat_rows(y_h.as_ref(), tree.client_to_hmat());
        Ok(())
    }

    /// `H = alpha * op(A) * op(B) + beta * H`, truncated to this matrix's
    /// low-rank accuracy.
    ///
    /// All three matrices must be built on the same cluster tree, i.e. by
    /// one `build` call and clones of its result. On error `H` is unchanged.
    pub fn gemm(
        &mut self,
        trans_a: char,
        trans_b: char,
        alpha: f64,
        a: &HMatrix,
        b: &HMatrix,
        beta: f64,
    ) -> Result<()> {
        let (trans_a, trans_b) = (parse_transpose(trans_a)?, parse_transpose(trans_b)?);
        let (a_blocks, b_blocks) = (a.assembled_blocks("gemm")?, b.assembled_blocks("gemm")?);
        let mut c = self.assembled_blocks("gemm")?.clone();
        let tree = self.tree()?;
        for other in [a, b] {
            if other.nb_rows() != self.nb_rows() {
                return Err(HMatrixError::DimensionMismatch {
                    expected: self.nb_rows(),
                    found: other.nb_rows(),
                });
            }
            if !Arc::ptr_eq(other.tree()?, tree) {
                return Err(HMatrixError::InvalidArgument(
                    "gemm operands must share the cluster tree of the result".to_string(),
                ));
            }
        }

        if beta != 1.0 {
            c.scale(beta);
        }
        gemm_add(&mut c, alpha, a_blocks, trans_a, b_blocks, trans_b, self.low_rank_epsilon)?;
        self.blocks = Some(c);
        Ok(())
    }

    pub fn transpose(&mut self) -> Result<()> {
        self.assembled_blocks_mut("transpose")?.transpose();
        Ok(())
    }

    /// Frobenius norm.
    pub fn norm(&self) -> Result<f64> {
        Ok(self.blocks()?.squared_norm().sqrt())
    }

    /// Diagonal entries in client order.
    pub fn diagonal(&self) -> Result<Vec<f64>> {
        let blocks = self.blocks()?;
        let tree = self.tree()?;
        let mut diagonal = vec![0.0; blocks.nrows];
        blocks.diagonal(&mut diagonal);
        Ok(tree.client_to_hmat().iter().map(|&h| diagonal[h]).collect())
    }

    fn sizes(&self) -> Result<BlockSizes> {
        let mut sizes = BlockSizes::default();
        self.blocks()?.sizes(&mut sizes);
        Ok(sizes)
    }

    /// `(compressed size, uncompressed size)`, in stored scalars.
    pub fn compression_ratio(&self) -> Result<(usize, usize)> {
        let sizes = self.sizes()?;
        Ok((sizes.compressed, self.nb_rows() * self.nb_columns()))
    }

    /// `(size of the dense leaves, size of the rest of the matrix)`.
    pub fn fullrk_ratio(&self) -> Result<(usize, usize)> {
        let sizes = self.sizes()?;
        Ok((sizes.full, self.nb_rows() * self.nb_columns() - sizes.full))
    }

    /// Power iteration from the all-ones vector, stopped once two successive
    /// estimates differ by at most `epsilon` times the latest one.
    pub fn largest_eigenvalue_estimate(&self, epsilon: f64) -> Result<EigenValueEstimate> {
        let blocks = self.blocks()?;
        let interface = self.interface()?;
        let max_iterations = interface.settings().largest_eigenvalue_iterations;
        let n = blocks.nrows;

        let zero = EigenValueEstimate {
            value: 0.0,
            iterations: 0,
            converged: true,
        };
        if n == 0 {
            return Ok(zero);
        }

        // The all-ones start and the norm are permutation invariant, so the
        // iteration runs in hierarchical order
        let apply = |v: &Mat<f64>| {
            let mut hv = Mat::<f64>::zeros(n, 1);
            blocks.gemv(false, 1.0, v.as_ref(), hv.as_mut());
            hv
        };

        let mut next = apply(&Mat::from_fn(n, 1, |_, _| 1.0));
        let mut next_value = next.norm_l2();
        if next_value == 0.0 {
            return Ok(zero);
        }
        let mut current_value = next_value / (n as f64).sqrt();

        let mut precision = 0.0;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..max_iterations {
            log::debug!("({iteration}) EigenValue={current_value}");

            let current = Mat::from_fn(n, 1, |i, _| next[(i, 0)] / next_value);
            next = apply(&current);
            next_value = next.norm_l2();
            iterations = iteration + 1;

            if next_value == 0.0 {
                converged = true;
                break;
            }

            precision = (next_value - current_value).abs();
            converged = precision <= epsilon * next_value;
            log::debug!(
                "({iteration}) precision={precision}, relative precision={}, found={converged}",
                precision / next_value
            );
            interface.emit(ProgressMsg::EigenValueIteration {
                iter: iteration,
                eigenvalue: next_value,
                relative_precision: precision / next_value,
            });

            if converged {
                break;
            }
            current_value = next_value;
        }

        if !converged {
            log::warn!(
                "Cannot reach the target relative precision={epsilon}, got relative precision={}",
                precision / next_value
            );
        }

        Ok(EigenValueEstimate {
            value: next_value,
            iterations,
            converged,
        })
    }

    /// Approximation of the largest eigenvalue (in magnitude). Never fails
    /// on convergence: the best estimate is returned and a warning logged.
    pub fn compute_approximate_largest_eigenvalue(&self, epsilon: f64) -> Result<f64> {
        Ok(self.largest_eigenvalue_estimate(epsilon)?.value)
    }

    /// Factorizes the matrix in place with `"LU"`, `"LDLt"` or `"LLt"`.
    /// Any other name logs a warning and uses LU.
    ///
    /// Each attempt factorizes a fresh copy of the assembled matrix plus
    /// `lambda * I`, where `lambda` starts at twice the largest eigenvalue
    /// estimate times `regularization_epsilon` and doubles after every
    /// failure. On failure the assembled matrix is left untouched.
    pub fn factorize(&mut self, method: &str) -> Result<()> {
        let interface = Arc::clone(self.interface()?);
        self.blocks()?;
        if self.factorization.is_some() {
            return Err(HMatrixError::AlreadyFactorized("factorize"));
        }

        let method = FactorizationMethod::from_name(method);
        let settings = *interface.settings();

        let max_eigenvalue =
            self.compute_approximate_largest_eigenvalue(settings.largest_eigenvalue_relative_error)?;
        let mut regularization = 2.0 * max_eigenvalue * settings.regularization_epsilon;

        let backup = self.blocks.take().ok_or(HMatrixError::NotAssembled)?;
        let mut attempts = 0;

        while attempts < settings.factorization_iterations {
            let mut working = backup.clone();
            working.add_identity(regularization);
            log::debug!(
                "Factorization, regularization loop {attempts}, regularization factor={regularization:e}"
            );

            match factorization::factorize_block(&mut working, method, self.low_rank_epsilon) {
                Ok(()) => {
                    log::debug!("Factorization ok");
                    interface.emit(ProgressMsg::FactorizationAttempt {
                        iter: attempts,
                        regularization,
                        success: true,
                    });
                    self.blocks = Some(working);
                    self.factorization = Some(FactorizationInfo {
                        method,
                        regularization,
                        attempts: attempts + 1,
                    });
                    return Ok(());
                }
                Err(FactorizationError::Engine(error)) => {
                    self.blocks = Some(backup);
                    return Err(error);
                }
                Err(error) => {
                    interface.emit(ProgressMsg::FactorizationAttempt {
                        iter: attempts,
                        regularization,
                        success: false,
                    });
                    regularization += regularization;
                    log::debug!("{error:?}, must increase the regularization to {regularization:e}");
                }
            }
            attempts += 1;
        }

        self.blocks = Some(backup);
        Err(HMatrixError::FactorizationFailed {
            attempts,
            regularization,
        })
    }

    /// Solves `H X = B` with the stored factorization.
    pub fn solve(&self, b: MatRef<f64>, transposed: bool) -> Result<Mat<f64>> {
        if transposed {
            return Err(HMatrixError::NotYetImplemented("transposed solve"));
        }
        let blocks = self.blocks()?;
        let tree = self.tree()?;
        let info = self.factorization.ok_or(HMatrixError::NotFactorized("solve"))?;
        self.check_rows(b)?;

        let mut x = select_mat_rows(b, tree.hmat_to_client());
        factorization::solve_factorized(blocks, info.method, x.as_mut());
        Ok(select_mat_rows(x.as_ref(), tree.client_to_hmat()))
    }

    /// Solves `L X = B`, or `L^T X = B` when `transposed`, with the lower
    /// triangle of the matrix. After LU or LDLt the triangle has a unit
    /// diagonal.
    pub fn solve_lower(&self, b: MatRef<f64>, transposed: bool) -> Result<Mat<f64>> {
        let blocks = self.blocks()?;
        let tree = self.tree()?;
        self.check_rows(b)?;

        let unit = match self.factorization {
            Some(info) => info.method != FactorizationMethod::LLt,
            None => false,
        };

        let mut x = select_mat_rows(b, tree.hmat_to_client());
        factorization::solve_triangular_dense(blocks, Triangle::Lower, unit, transposed, x.as_mut());
        Ok(select_mat_rows(x.as_ref(), tree.client_to_hmat()))
    }

    /// Dense copy in client order.
    pub fn to_dense(&self) -> Result<Mat<f64>> {
        let dense = self.blocks()?.to_dense();
        let c2h = self.tree()?.client_to_hmat();
        Ok(Mat::from_fn(dense.nrows(), dense.ncols(), |i, j| dense[(c2h[i], c2h[j])]))
    }

    /// Writes a JSON description of the block tree.
    pub fn dump_info<W: Write>(&self, writer: W) -> Result<()> {
        let sizes = self.sizes()?;
        let info = DumpInfo {
            nb_rows: self.nb_rows(),
            compressed_size: sizes.compressed,
            uncompressed_size: self.nb_rows() * self.nb_columns(),
            full_size: sizes.full,
            low_rank_epsilon: self.low_rank_epsilon,
            factorization: self.factorization.as_ref(),
            blocks: self.blocks()?.summary(),
        };
        serde_json::to_writer_pretty(writer, &info)?;
        Ok(())
    }

    /// Writes [`HMatrix::dump_info`] to a file.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| HMatrixError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.dump_info(file)
    }
}

impl fmt::Display for HMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class= HMatrix")?;
        match self.compression_ratio() {
            Ok((compressed, uncompressed)) => {
                write!(f, " size={}x{}", self.nb_rows(), self.nb_columns())?;
                write!(f, " compressed={compressed}/{uncompressed}")?;
                if let Some(info) = &self.factorization {
                    write!(f, " factorization={}", info.method)?;
                }
                Ok(())
            }
            Err(error) => write!(f, " ({error})"),
        }
    }
}
