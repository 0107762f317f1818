/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the stationary covariance models used to assemble H-matrices.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::utils::get_scaled_distance;
use faer::{Mat, RowRef};
use ferreus_hmat::{HMatrixError, Result};
use serde::{Deserialize, Serialize};

/// Covariance between the values of a random field at two points.
///
/// Models are shared by every block assembled in parallel, hence the
/// `Sync` bound.
pub trait CovarianceModel: Sync {
    fn input_dimension(&self) -> usize;

    fn output_dimension(&self) -> usize {
        1
    }

    /// `output_dimension x output_dimension` covariance between `s` and `t`.
    fn compute(&self, s: RowRef<f64>, t: RowRef<f64>) -> Mat<f64>;

    /// First entry of [`CovarianceModel::compute`], which is the whole
    /// covariance for scalar models.
    fn compute_as_scalar(&self, s: RowRef<f64>, t: RowRef<f64>) -> f64 {
        self.compute(s, t)[(0, 0)]
    }
}

fn check_scale(scale: &[f64], amplitude: f64) -> Result<()> {
    if scale.is_empty() || scale.iter().any(|&l| !(l > 0.0)) {
        return Err(HMatrixError::InvalidArgument(
            "length scales must be positive".to_string(),
        ));
    }
    if !(amplitude > 0.0) {
        return Err(HMatrixError::InvalidArgument(
            "amplitude must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Exponential model `sigma^2 exp(-r)`, with `r` the scaled distance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExponentialModel {
    scale: Vec<f64>,
    amplitude: f64,
}

impl ExponentialModel {
    /// One length scale per input axis.
    pub fn new(scale: Vec<f64>, amplitude: f64) -> Result<Self> {
        check_scale(&scale, amplitude)?;
        Ok(ExponentialModel { scale, amplitude })
    }

    #[inline(always)]
    pub fn rho(&self, r: f64) -> f64 {
        self.amplitude * self.amplitude * (-r).exp()
    }
}

impl CovarianceModel for ExponentialModel {
    fn input_dimension(&self) -> usize {
        self.scale.len()
    }

    fn compute(&self, s: RowRef<f64>, t: RowRef<f64>) -> Mat<f64> {
        Mat::from_fn(1, 1, |_, _| self.compute_as_scalar(s, t))
    }

    #[inline(always)]
    fn compute_as_scalar(&self, s: RowRef<f64>, t: RowRef<f64>) -> f64 {
        self.rho(get_scaled_distance(s, t, &self.scale))
    }
}

/// Squared exponential (Gaussian) model `sigma^2 exp(-r^2 / 2)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SquaredExponentialModel {
    scale: Vec<f64>,
    amplitude: f64,
}

impl SquaredExponentialModel {
    pub fn new(scale: Vec<f64>, amplitude: f64) -> Result<Self> {
        check_scale(&scale, amplitude)?;
        Ok(SquaredExponentialModel { scale, amplitude })
    }

    #[inline(always)]
    pub fn rho(&self, r: f64) -> f64 {
        self.amplitude * self.amplitude * (-0.5 * r * r).exp()
    }
}

impl CovarianceModel for SquaredExponentialModel {
    fn input_dimension(&self) -> usize {
        self.scale.len()
    }

    fn compute(&self, s: RowRef<f64>, t: RowRef<f64>) -> Mat<f64> {
        Mat::from_fn(1, 1, |_, _| self.compute_as_scalar(s, t))
    }

    #[inline(always)]
    fn compute_as_scalar(&self, s: RowRef<f64>, t: RowRef<f64>) -> f64 {
        self.rho(get_scaled_distance(s, t, &self.scale))
    }
}

/// Smoothness of a [`MaternModel`] with a closed form.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MaternSmoothness {
    /// nu = 3/2
    ThreeHalves,
    /// nu = 5/2
    FiveHalves,
}

/// Matern model for half-integer smoothness.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MaternModel {
    scale: Vec<f64>,
    amplitude: f64,
    nu: MaternSmoothness,
}

impl MaternModel {
    pub fn new(scale: Vec<f64>, amplitude: f64, nu: MaternSmoothness) -> Result<Self> {
        check_scale(&scale, amplitude)?;
        Ok(MaternModel {
            scale,
            amplitude,
            nu,
        })
    }

    #[inline(always)]
    pub fn rho(&self, r: f64) -> f64 {
        let variance = self.amplitude * self.amplitude;
        match self.nu {
            MaternSmoothness::ThreeHalves => {
                let x = 3.0_f64.sqrt() * r;
                variance * (1.0 + x) * (-x).exp()
            }
            MaternSmoothness::FiveHalves => {
                let x = 5.0_f64.sqrt() * r;
                variance * (1.0 + x + x * x / 3.0) * (-x).exp()
            }
        }
    }
}

impl CovarianceModel for MaternModel {
    fn input_dimension(&self) -> usize {
        self.scale.len()
    }

    fn compute(&self, s: RowRef<f64>, t: RowRef<f64>) -> Mat<f64> {
        Mat::from_fn(1, 1, |_, _| self.compute_as_scalar(s, t))
    }

    #[inline(always)]
    fn compute_as_scalar(&self, s: RowRef<f64>, t: RowRef<f64>) -> f64 {
        self.rho(get_scaled_distance(s, t, &self.scale))
    }
}

/// Multi-output model `rho(s, t) * C`, where `rho` is a scalar correlation
/// model and `C` the covariance between the outputs.
#[derive(Clone, Debug)]
pub struct SeparableModel<M: CovarianceModel> {
    correlation: M,
    output_covariance: Mat<f64>,
}

impl<M: CovarianceModel> SeparableModel<M> {
    pub fn new(correlation: M, output_covariance: Mat<f64>) -> Result<Self> {
        if correlation.output_dimension() != 1 {
            return Err(HMatrixError::InvalidArgument(
                "the correlation of a separable model must be scalar".to_string(),
            ));
        }
        if output_covariance.nrows() != output_covariance.ncols() || output_covariance.nrows() == 0 {
            return Err(HMatrixError::InvalidArgument(format!(
                "output covariance must be square, got {}x{}",
                output_covariance.nrows(),
                output_covariance.ncols()
            )));
        }
        Ok(SeparableModel {
            correlation,
            output_covariance,
        })
    }
}

impl<M: CovarianceModel> CovarianceModel for SeparableModel<M> {
    fn input_dimension(&self) -> usize {
        self.correlation.input_dimension()
    }

    fn output_dimension(&self) -> usize {
        self.output_covariance.nrows()
    }

    fn compute(&self, s: RowRef<f64>, t: RowRef<f64>) -> Mat<f64> {
        let rho = self.correlation.compute_as_scalar(s, t);
        let d = self.output_dimension();
        Mat::from_fn(d, d, |i, j| rho * self.output_covariance[(i, j)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[f64]) -> Mat<f64> {
        Mat::from_fn(1, values.len(), |_, j| values[j])
    }

    #[test]
    fn stationary_models_at_zero_distance_give_the_variance() {
        let s = row(&[0.3, -1.2]);
        let exponential = ExponentialModel::new(vec![0.5, 2.0], 2.0).unwrap();
        let gaussian = SquaredExponentialModel::new(vec![0.5, 2.0], 2.0).unwrap();
        let matern = MaternModel::new(vec![0.5, 2.0], 2.0, MaternSmoothness::FiveHalves).unwrap();

        for value in [
            exponential.compute_as_scalar(s.row(0), s.row(0)),
            gaussian.compute_as_scalar(s.row(0), s.row(0)),
            matern.compute_as_scalar(s.row(0), s.row(0)),
        ] {
            assert!((value - 4.0).abs() < 1e-15);
        }
    }

    #[test]
    fn models_decay_with_distance() {
        let s = row(&[0.0]);
        let t = row(&[1.0]);
        let exponential = ExponentialModel::new(vec![1.0], 1.0).unwrap();
        assert!((exponential.compute_as_scalar(s.row(0), t.row(0)) - (-1.0_f64).exp()).abs() < 1e-15);

        let matern = MaternModel::new(vec![1.0], 1.0, MaternSmoothness::ThreeHalves).unwrap();
        let x = 3.0_f64.sqrt();
        assert!((matern.compute_as_scalar(s.row(0), t.row(0)) - (1.0 + x) * (-x).exp()).abs() < 1e-15);

        let gaussian = SquaredExponentialModel::new(vec![1.0], 1.0).unwrap();
        assert!(gaussian.compute_as_scalar(s.row(0), t.row(0)) < 1.0);
    }

    #[test]
    fn separable_model_scales_output_covariance() {
        let correlation = ExponentialModel::new(vec![1.0], 1.0).unwrap();
        let c = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 0.5 });
        let model = SeparableModel::new(correlation, c.clone()).unwrap();
        assert_eq!(model.output_dimension(), 2);

        let s = row(&[0.0]);
        let t = row(&[2.0]);
        let local = model.compute(s.row(0), t.row(0));
        let rho = (-2.0_f64).exp();
        for i in 0..2 {
            for j in 0..2 {
                assert!((local[(i, j)] - rho * c[(i, j)]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(ExponentialModel::new(vec![], 1.0).is_err());
        assert!(ExponentialModel::new(vec![1.0, 0.0], 1.0).is_err());
        assert!(MaternModel::new(vec![1.0], -1.0, MaternSmoothness::ThreeHalves).is_err());

        let correlation = ExponentialModel::new(vec![1.0], 1.0).unwrap();
        assert!(SeparableModel::new(correlation, Mat::zeros(2, 3)).is_err());
    }
}
