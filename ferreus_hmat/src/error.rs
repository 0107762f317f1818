/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the error type shared by every fallible H-matrix operation.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors raised by H-matrix construction, assembly, algebra and solves.
#[derive(Debug, Error)]
pub enum HMatrixError {
    /// The matrix has no backend interface attached (default constructed).
    #[error("Empty HMatrix")]
    EmptyMatrix,

    /// The matrix is bound to a cluster tree but has not been assembled yet.
    #[error("HMatrix has not been assembled")]
    NotAssembled,

    #[error("Invalid symmetry flag '{0}', must be one of 'N', 'n', 'L' or 'l'")]
    InvalidSymmetry(char),

    #[error("Invalid transpose flag '{0}', must be one of 'N', 'n', 'T' or 't'")]
    InvalidTranspose(char),

    #[error(
        "Unknown compression method: {0}. Valid values are: Svd, AcaFull, AcaPartial, AcaPlus or AcaRandom"
    )]
    UnknownCompressionMethod(String),

    #[error("Unknown clustering algorithm: {0}. Valid values are: median, geometric or hybrid")]
    UnknownClusteringAlgorithm(String),

    #[error("Dimension mismatch: expected {expected} rows, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not yet implemented")]
    NotYetImplemented(&'static str),

    #[error("HMatrix must be factorized before calling {0}")]
    NotFactorized(&'static str),

    /// The blocks hold factors, so operations that modify or combine
    /// the assembled matrix are refused until it is assembled again.
    #[error("HMatrix is already factorized, assemble it again before calling {0}")]
    AlreadyFactorized(&'static str),

    #[error(
        "HMatrix::factorize : factorization failed after {attempts} attempts, probably needs more regularization (last regularization {regularization:e})"
    )]
    FactorizationFailed { attempts: usize, regularization: f64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HMatrix support is not available, rebuild ferreus_hmat with the `backend` feature enabled")]
    NotSupported,

    #[error("Failed to serialise H-matrix data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of [`HMatrixError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Precondition violations. Never retried.
    InvalidArgument,
    /// Unexpected failures of the block engine or of the environment.
    Internal,
    NotYetImplemented,
    NotSupported,
    /// Numerical failure that survived the regularization loop.
    Numerical,
}

impl HMatrixError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HMatrixError::EmptyMatrix
            | HMatrixError::NotAssembled
            | HMatrixError::InvalidSymmetry(_)
            | HMatrixError::InvalidTranspose(_)
            | HMatrixError::UnknownCompressionMethod(_)
            | HMatrixError::UnknownClusteringAlgorithm(_)
            | HMatrixError::DimensionMismatch { .. }
            | HMatrixError::InvalidArgument(_)
            | HMatrixError::NotFactorized(_)
            | HMatrixError::AlreadyFactorized(_) => ErrorKind::InvalidArgument,
            HMatrixError::NotYetImplemented(_) => ErrorKind::NotYetImplemented,
            HMatrixError::NotSupported => ErrorKind::NotSupported,
            HMatrixError::FactorizationFailed { .. } => ErrorKind::Numerical,
            HMatrixError::Internal(_)
            | HMatrixError::Serialization(_)
            | HMatrixError::Io { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, HMatrixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_method_message_lists_valid_values() {
        let err = HMatrixError::UnknownCompressionMethod("Foo".to_string());
        let message = err.to_string();
        assert!(message.contains("Foo"));
        for name in ["Svd", "AcaFull", "AcaPartial", "AcaPlus", "AcaRandom"] {
            assert!(message.contains(name), "missing {name} in '{message}'");
        }
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(HMatrixError::EmptyMatrix.kind(), ErrorKind::InvalidArgument);
        assert_eq!(HMatrixError::InvalidSymmetry('x').kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            HMatrixError::NotYetImplemented("transposed solve").kind(),
            ErrorKind::NotYetImplemented
        );
        assert_eq!(HMatrixError::Internal("rc=1".into()).kind(), ErrorKind::Internal);
        assert_eq!(
            HMatrixError::FactorizationFailed { attempts: 3, regularization: 1.0 }.kind(),
            ErrorKind::Numerical
        );
        assert_eq!(HMatrixError::NotSupported.kind(), ErrorKind::NotSupported);
    }
}
