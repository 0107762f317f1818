/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the factory that binds new H-matrices to a cluster tree and shared settings.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    cluster_tree::ClusterTree,
    config::{HMatrixParameters, HMatrixSettings},
    error::{HMatrixError, Result},
    hmatrix::HMatrix,
    progress::{ProgressMsg, ProgressSink},
};
use faer::MatRef;
use std::sync::Arc;

/// Returns an error when the block engine was compiled out.
pub(crate) fn ensure_backend() -> Result<()> {
    match cfg!(feature = "backend") {
        true => Ok(()),
        false => Err(HMatrixError::NotSupported),
    }
}

/// State shared by every matrix created from one [`HMatrixFactory`],
/// including the clones of those matrices. Released with its last holder.
#[derive(Debug)]
pub struct HMatrixInterface {
    settings: HMatrixSettings,
    progress_callback: Option<Arc<dyn ProgressSink>>,
}

impl HMatrixInterface {
    pub fn settings(&self) -> &HMatrixSettings {
        &self.settings
    }

    pub(crate) fn emit(&self, msg: ProgressMsg) {
        if let Some(sink) = &self.progress_callback {
            sink.emit(msg);
        }
    }
}

impl Drop for HMatrixInterface {
    fn drop(&mut self) {
        log::debug!("H-matrix interface finalized");
    }
}

/// Builder for [`HMatrixFactory`], called via [`HMatrixFactory::builder`].
#[derive(Default)]
pub struct HMatrixFactoryBuilder {
    settings: HMatrixSettings,
    progress_callback: Option<Arc<dyn ProgressSink>>,
}

impl HMatrixFactoryBuilder {
    pub fn settings(mut self, settings: HMatrixSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Optional callback for reporting assembly and factorization progress.
    pub fn progress_callback(mut self, progress_callback: Arc<dyn ProgressSink>) -> Self {
        self.progress_callback = Some(progress_callback);
        self
    }

    pub fn build(self) -> HMatrixFactory {
        HMatrixFactory {
            interface: Arc::new(HMatrixInterface {
                settings: self.settings,
                progress_callback: self.progress_callback,
            }),
        }
    }
}

/// Creates empty [`HMatrix`] values over a point set.
///
/// # Example
/// ```
/// use faer::Mat;
/// use ferreus_hmat::{HMatrixFactory, HMatrixParameters};
///
/// let points = Mat::from_fn(50, 2, |i, j| ((i * (j + 3)) % 17) as f64);
/// let factory = HMatrixFactory::default();
/// let parameters = HMatrixParameters::builder().compression_method("AcaPlus").build();
///
/// let mut hmat = factory.build(points.as_ref(), 1, &parameters).unwrap();
/// let kernel = |i: usize, j: usize| {
///     let d = (points[(i, 0)] - points[(j, 0)]).hypot(points[(i, 1)] - points[(j, 1)]);
///     (-d / 5.0).exp()
/// };
/// hmat.assemble(&kernel, &parameters, 'L').unwrap();
/// assert_eq!(hmat.nb_rows(), 50);
/// ```
#[derive(Debug, Clone)]
pub struct HMatrixFactory {
    interface: Arc<HMatrixInterface>,
}

impl Default for HMatrixFactory {
    fn default() -> Self {
        HMatrixFactory::new(HMatrixSettings::default())
    }
}

impl HMatrixFactory {
    pub fn new(settings: HMatrixSettings) -> Self {
        HMatrixFactory::builder().settings(settings).build()
    }

    pub fn builder() -> HMatrixFactoryBuilder {
        HMatrixFactoryBuilder::default()
    }

    pub fn settings(&self) -> &HMatrixSettings {
        self.interface.settings()
    }

    /// Builds the cluster tree of `points` (one row per point) and returns
    /// an unassembled matrix over its `points.nrows() * output_dimension`
    /// degrees of freedom.
    pub fn build(
        &self,
        points: MatRef<f64>,
        output_dimension: usize,
        parameters: &HMatrixParameters,
    ) -> Result<HMatrix> {
        ensure_backend()?;
        if output_dimension == 0 {
            return Err(HMatrixError::InvalidArgument(
                "output dimension must be at least 1".to_string(),
            ));
        }
        let algorithm = parameters.clustering()?;

        let tree = ClusterTree::new(
            points,
            output_dimension,
            algorithm,
            self.interface.settings.max_leaf_size,
        );
        log::debug!(
            "Cluster tree built: {} dofs, {} nodes, {} leaves ({})",
            tree.size(),
            tree.num_nodes(),
            tree.leaves().len(),
            algorithm.name()
        );

        Ok(HMatrix::new(self.interface.clone(), Arc::new(tree)))
    }
}
