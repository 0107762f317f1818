/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares assembly parameters, process-wide tunables and the named algorithm choices.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Configuration types for H-matrix assembly and factorization.

use crate::error::{HMatrixError, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

/// Low-rank compression methods applied to admissible blocks.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Truncated singular value decomposition of the dense block.
    Svd,

    /// Adaptive cross approximation with full pivoting on the dense block.
    AcaFull,

    /// Adaptive cross approximation with partial pivoting. Only the
    /// rows and columns selected as pivots are computed.
    AcaPartial,

    /// ACA+ variant, guided by a reference row and a reference column.
    AcaPlus,

    /// Partial pivoting where restart rows are drawn at random.
    AcaRandom,
}

impl CompressionMethod {
    pub const ALL: [CompressionMethod; 5] = [
        CompressionMethod::Svd,
        CompressionMethod::AcaFull,
        CompressionMethod::AcaPartial,
        CompressionMethod::AcaPlus,
        CompressionMethod::AcaRandom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::Svd => "Svd",
            CompressionMethod::AcaFull => "AcaFull",
            CompressionMethod::AcaPartial => "AcaPartial",
            CompressionMethod::AcaPlus => "AcaPlus",
            CompressionMethod::AcaRandom => "AcaRandom",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMethod {
    type Err = HMatrixError;

    fn from_str(s: &str) -> Result<Self> {
        CompressionMethod::ALL
            .into_iter()
            .find(|method| method.name() == s)
            .ok_or_else(|| HMatrixError::UnknownCompressionMethod(s.to_string()))
    }
}

/// Strategies used to split a cluster into two children.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusteringAlgorithm {
    /// Sort along the widest axis and split at the median.
    Median,

    /// Split at the midpoint of the bounding box along the widest axis.
    Geometric,

    /// Geometric split, replaced by a median split when too unbalanced.
    Hybrid,
}

impl ClusteringAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ClusteringAlgorithm::Median => "median",
            ClusteringAlgorithm::Geometric => "geometric",
            ClusteringAlgorithm::Hybrid => "hybrid",
        }
    }
}

impl FromStr for ClusteringAlgorithm {
    type Err = HMatrixError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "median" => Ok(ClusteringAlgorithm::Median),
            "geometric" => Ok(ClusteringAlgorithm::Geometric),
            "hybrid" => Ok(ClusteringAlgorithm::Hybrid),
            other => Err(HMatrixError::UnknownClusteringAlgorithm(other.to_string())),
        }
    }
}

/// Supported factorizations of an assembled H-matrix.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FactorizationMethod {
    LU,
    LDLt,
    LLt,
}

impl FactorizationMethod {
    /// Resolves a factorization name. Unknown names are not an error:
    /// a warning is logged and LU is used instead.
    pub fn from_name(name: &str) -> Self {
        match name {
            "LU" => FactorizationMethod::LU,
            "LDLt" => FactorizationMethod::LDLt,
            "LLt" => FactorizationMethod::LLt,
            other => {
                log::warn!(
                    "Unknown factorization method: {other}. Valid values are: LU, LDLt, or LLt."
                );
                FactorizationMethod::LU
            }
        }
    }
}

impl fmt::Display for FactorizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FactorizationMethod::LU => "LU",
            FactorizationMethod::LDLt => "LDLt",
            FactorizationMethod::LLt => "LLt",
        };
        f.write_str(name)
    }
}

/// Parameters of one assembly.
///
/// Method names are kept as strings so that configuration read from
/// elsewhere is validated at the point of use, before any block is
/// computed.
///
/// ### Default Values
/// - `assembly_epsilon`: `1e-5`
/// - `recompression_epsilon`: `1e-5`
/// - `admissibility_factor`: `2.0`
/// - `clustering_algorithm`: `"median"`
/// - `compression_method`: `"AcaRandom"`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct HMatrixParameters {
    /// Relative accuracy of the low-rank approximations built during assembly.
    pub assembly_epsilon: f64,

    /// Relative accuracy used to truncate every low-rank block once the
    /// assembly is complete, and by the H-arithmetic afterwards.
    pub recompression_epsilon: f64,

    /// Factor η of the admissibility condition `min(diam) <= η * dist`.
    pub admissibility_factor: f64,

    /// One of `median`, `geometric` or `hybrid`.
    pub clustering_algorithm: String,

    /// One of `Svd`, `AcaFull`, `AcaPartial`, `AcaPlus` or `AcaRandom`.
    pub compression_method: String,
}

impl Default for HMatrixParameters {
    fn default() -> Self {
        HMatrixParameters {
            assembly_epsilon: 1e-5,
            recompression_epsilon: 1e-5,
            admissibility_factor: 2.0,
            clustering_algorithm: ClusteringAlgorithm::Median.name().to_string(),
            compression_method: CompressionMethod::AcaRandom.name().to_string(),
        }
    }
}

impl HMatrixParameters {
    /// Returns a new [`HMatrixParametersBuilder`] initialised with the defaults.
    pub fn builder() -> HMatrixParametersBuilder {
        HMatrixParametersBuilder {
            parameters: HMatrixParameters::default(),
        }
    }

    pub fn compression(&self) -> Result<CompressionMethod> {
        self.compression_method.parse()
    }

    pub fn clustering(&self) -> Result<ClusteringAlgorithm> {
        self.clustering_algorithm.parse()
    }
}

/// Builder for [`HMatrixParameters`], called via [`HMatrixParameters::builder`].
#[derive(Debug, Clone)]
pub struct HMatrixParametersBuilder {
    parameters: HMatrixParameters,
}

impl HMatrixParametersBuilder {
    pub fn assembly_epsilon(mut self, assembly_epsilon: f64) -> Self {
        self.parameters.assembly_epsilon = assembly_epsilon;
        self
    }

    pub fn recompression_epsilon(mut self, recompression_epsilon: f64) -> Self {
        self.parameters.recompression_epsilon = recompression_epsilon;
        self
    }

    /// Sets both the assembly and the recompression accuracy.
    pub fn epsilon(self, epsilon: f64) -> Self {
        self.assembly_epsilon(epsilon).recompression_epsilon(epsilon)
    }

    pub fn admissibility_factor(mut self, admissibility_factor: f64) -> Self {
        self.parameters.admissibility_factor = admissibility_factor;
        self
    }

    pub fn clustering_algorithm(mut self, name: &str) -> Self {
        self.parameters.clustering_algorithm = name.to_string();
        self
    }

    pub fn compression_method(mut self, name: &str) -> Self {
        self.parameters.compression_method = name.to_string();
        self
    }

    pub fn build(self) -> HMatrixParameters {
        self.parameters
    }
}

/// Process-wide tunables shared by every matrix built from one factory.
///
/// ### Default Values
/// - `largest_eigenvalue_iterations`: `10`
/// - `largest_eigenvalue_relative_error`: `0.1`
/// - `regularization_epsilon`: `1e-4`
/// - `factorization_iterations`: `10`
/// - `max_leaf_size`: `250`
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct HMatrixSettings {
    /// Iteration cap of the largest eigenvalue power iteration.
    pub largest_eigenvalue_iterations: usize,

    /// Default relative precision of the largest eigenvalue estimate.
    pub largest_eigenvalue_relative_error: f64,

    /// Scales the largest eigenvalue into the first regularization quantum.
    pub regularization_epsilon: f64,

    /// Maximum number of factorization attempts.
    pub factorization_iterations: usize,

    /// Maximum number of degrees of freedom in a leaf cluster.
    pub max_leaf_size: usize,
}

impl Default for HMatrixSettings {
    fn default() -> Self {
        HMatrixSettings {
            largest_eigenvalue_iterations: 10,
            largest_eigenvalue_relative_error: 1e-1,
            regularization_epsilon: 1e-4,
            factorization_iterations: 10,
            max_leaf_size: 250,
        }
    }
}

impl HMatrixSettings {
    /// Reads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| HMatrixError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Writes settings to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| HMatrixError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_compression_name_parses() {
        for method in CompressionMethod::ALL {
            let parsed: CompressionMethod = method.to_string().parse().unwrap();
            assert_eq!(parsed, method);
        }
    }

    #[test]
    fn unknown_compression_name_is_rejected() {
        match "aca".parse::<CompressionMethod>() {
            Err(HMatrixError::UnknownCompressionMethod(name)) => assert_eq!(name, "aca"),
            other => panic!("Expected UnknownCompressionMethod, got {:?}", other),
        }
    }

    #[test]
    fn unknown_factorization_name_falls_back_to_lu() {
        assert_eq!(FactorizationMethod::from_name("LDLt"), FactorizationMethod::LDLt);
        assert_eq!(FactorizationMethod::from_name("LLt"), FactorizationMethod::LLt);
        assert_eq!(FactorizationMethod::from_name("Cholesky"), FactorizationMethod::LU);
    }

    #[test]
    fn clustering_names() {
        assert_eq!("hybrid".parse::<ClusteringAlgorithm>().unwrap(), ClusteringAlgorithm::Hybrid);
        assert!(matches!(
            "kmeans".parse::<ClusteringAlgorithm>(),
            Err(HMatrixError::UnknownClusteringAlgorithm(_))
        ));
    }

    #[test]
    fn builder_overrides_defaults() {
        let parameters = HMatrixParameters::builder()
            .epsilon(1e-8)
            .compression_method("Svd")
            .admissibility_factor(3.0)
            .build();
        assert_eq!(parameters.assembly_epsilon, 1e-8);
        assert_eq!(parameters.recompression_epsilon, 1e-8);
        assert_eq!(parameters.compression().unwrap(), CompressionMethod::Svd);
        assert_eq!(parameters.clustering().unwrap(), ClusteringAlgorithm::Median);
        assert_eq!(parameters.admissibility_factor, 3.0);
    }

    #[test]
    fn settings_json_round_trip() {
        let settings = HMatrixSettings {
            max_leaf_size: 32,
            factorization_iterations: 4,
            ..Default::default()
        };
        let path = std::env::temp_dir().join(format!("hmat_settings_{}.json", std::process::id()));
        settings.save(&path).unwrap();
        let loaded = HMatrixSettings::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn loading_missing_settings_reports_path() {
        let path = std::env::temp_dir().join("hmat_settings_does_not_exist.json");
        match HMatrixSettings::load(&path) {
            Err(HMatrixError::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
