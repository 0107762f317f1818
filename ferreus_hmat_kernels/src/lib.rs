/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes covariance models and assembly functions for ferreus_hmat.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Stationary covariance models and the adapters that turn them into
//! [`ferreus_hmat`] assembly functions.
//!
//! ```
//! use faer::Mat;
//! use ferreus_hmat::{HMatrixFactory, HMatrixParameters};
//! use ferreus_hmat_kernels::{models::ExponentialModel, CovarianceAssemblyFunction};
//!
//! let points = Mat::from_fn(50, 1, |i, _| i as f64 / 49.0);
//! let model = ExponentialModel::new(vec![0.1], 1.0).unwrap();
//! let f = CovarianceAssemblyFunction::new(&model, points.as_ref()).unwrap();
//!
//! let parameters = HMatrixParameters::default();
//! let mut hmat = HMatrixFactory::default().build(points.as_ref(), 1, &parameters).unwrap();
//! hmat.assemble(&f, &parameters, 'L').unwrap();
//! assert_eq!(hmat.nb_rows(), 50);
//! ```

mod assembly_functions;
mod covariance_models;
mod utils;

pub mod models {
    pub use super::covariance_models::*;
}

pub use {
    assembly_functions::{CovarianceAssemblyFunction, CovarianceBlockAssemblyFunction},
    covariance_models::{
        CovarianceModel, ExponentialModel, MaternModel, MaternSmoothness, SeparableModel,
        SquaredExponentialModel,
    },
    utils::{covariance_matrix, get_distance, get_scaled_distance},
};
