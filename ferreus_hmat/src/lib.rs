/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the hierarchical matrix (H-matrix) crate.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Hierarchical matrices (H-matrices)
//!
//! This crate stores large dense covariance-like matrices in compressed
//! hierarchical form and provides the algebra needed to use them in
//! Gaussian process and kriging solvers.
//!
//! Points are first reordered by a binary [`ClusterTree`]. Blocks coupling two
//! well separated clusters are compressed to low rank with an SVD or one of
//! the adaptive cross approximation (ACA) variants, the rest is stored dense
//! or split further.
//!
//! # Features:
//! - Scalar and multi-output (tensor) assembly functions
//! - `Svd`, `AcaFull`, `AcaPartial`, `AcaPlus` and `AcaRandom` compression
//! - Lower-symmetric assembly that only evaluates half of the matrix
//! - Hierarchical LU, LDLt and LLt factorizations, with an automatic
//!   regularization loop for ill-conditioned matrices
//! - Matrix-vector and matrix-matrix products, triangular solves, norms and
//!   eigenvalue estimation
//! - Multiple right-hand sides
//!
//! # Example: Assemble, factorize and solve
//!
//! ```
//! use faer::Mat;
//! use ferreus_hmat::{HMatrixFactory, HMatrixParameters, HMatrixSettings};
//!
//! let num_points = 200;
//! let points = Mat::from_fn(num_points, 1, |i, _| i as f64 / num_points as f64);
//!
//! // Exponential covariance with a length scale of 0.1
//! let covariance = |i: usize, j: usize| (-(points[(i, 0)] - points[(j, 0)]).abs() / 0.1).exp();
//!
//! let settings = HMatrixSettings {
//!     max_leaf_size: 32,
//!     regularization_epsilon: 1e-12,
//!     ..Default::default()
//! };
//! let factory = HMatrixFactory::new(settings);
//! let parameters = HMatrixParameters::builder()
//!     .epsilon(1e-9)
//!     .compression_method("AcaPlus")
//!     .build();
//!
//! let mut hmat = factory.build(points.as_ref(), 1, &parameters).unwrap();
//! hmat.assemble(&covariance, &parameters, 'L').unwrap();
//!
//! let (compressed, uncompressed) = hmat.compression_ratio().unwrap();
//! assert!(compressed < uncompressed);
//!
//! let x = Mat::from_fn(num_points, 1, |i, _| (i % 7) as f64);
//! let mut b = Mat::zeros(num_points, 1);
//! hmat.gemv('N', 1.0, x.as_ref(), 0.0, &mut b).unwrap();
//!
//! hmat.factorize("LLt").unwrap();
//! let solution = hmat.solve(b.as_ref(), false).unwrap();
//! assert!((&solution - &x).norm_l2() < 1e-5 * x.norm_l2());
//! ```

mod aca;
mod arithmetic;
mod assembly;
mod block;
mod cluster_tree;
mod config;
mod error;
mod factorization;
mod factory;
mod hmatrix;
mod utils;

pub mod progress;
pub mod traits;

pub use {
    block::BlockSummary,
    cluster_tree::{ClusterNode, ClusterTree},
    config::{
        ClusteringAlgorithm, CompressionMethod, FactorizationMethod, HMatrixParameters,
        HMatrixParametersBuilder, HMatrixSettings,
    },
    error::{ErrorKind, HMatrixError, Result},
    factory::{HMatrixFactory, HMatrixFactoryBuilder, HMatrixInterface},
    hmatrix::{EigenValueEstimate, FactorizationInfo, HMatrix},
    traits::{RealAssemblyFunction, TensorRealAssemblyFunction},
    utils::select_mat_rows,
};
