/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the block tree of an H-matrix from an assembly function.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # assembly
//!
//! Recursive construction of the block tree over a [`ClusterTree`]:
//! admissible blocks are compressed, blocks touching a leaf cluster are
//! stored dense, and everything else is split 2x2. The four children of a
//! split are built concurrently and share nothing but read-only state.
//!
//! Entries are produced by a [`BlockGenerator`], which turns hierarchical
//! index ranges back into client indices for the user supplied function.

use crate::{
    aca::{self, PivotRestart},
    block::{BlockData, HBlock, RkMatrix},
    cluster_tree::{ClusterNode, ClusterTree},
    config::CompressionMethod,
    error::Result,
    traits::{RealAssemblyFunction, TensorRealAssemblyFunction},
};
use faer::Mat;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Produces dense sub-blocks of the matrix in hierarchical numbering.
pub trait BlockGenerator: Sync {
    /// Values of rows `row_start..row_start + nrows` and columns
    /// `col_start..col_start + ncols`.
    fn compute(&self, row_start: usize, nrows: usize, col_start: usize, ncols: usize) -> Mat<f64>;

    /// Symmetric diagonal block `start..start + size`, built from the
    /// entries on and below its diagonal in one pass.
    fn compute_lower(&self, start: usize, size: usize) -> Mat<f64>;
}

/// Copies the strict lower triangle of a square matrix onto its upper one.
fn mirror_lower(values: &mut Mat<f64>) {
    for j in 0..values.ncols() {
        for i in j + 1..values.nrows() {
            values[(j, i)] = values[(i, j)];
        }
    }
}

/// Adapts a [`RealAssemblyFunction`] to hierarchical numbering.
pub struct ScalarBlockGenerator<'a, F: RealAssemblyFunction + ?Sized> {
    function: &'a F,
    hmat_to_client: &'a [usize],
}

impl<'a, F: RealAssemblyFunction + ?Sized> ScalarBlockGenerator<'a, F> {
    pub fn new(function: &'a F, tree: &'a ClusterTree) -> Self {
        ScalarBlockGenerator {
            function,
            hmat_to_client: tree.hmat_to_client(),
        }
    }
}

impl<F: RealAssemblyFunction + ?Sized> BlockGenerator for ScalarBlockGenerator<'_, F> {
    fn compute(&self, row_start: usize, nrows: usize, col_start: usize, ncols: usize) -> Mat<f64> {
        let rows = &self.hmat_to_client[row_start..row_start + nrows];
        let columns = &self.hmat_to_client[col_start..col_start + ncols];
        Mat::from_fn(nrows, ncols, |i, j| self.function.evaluate(rows[i], columns[j]))
    }

    fn compute_lower(&self, start: usize, size: usize) -> Mat<f64> {
        let dofs = &self.hmat_to_client[start..start + size];
        let mut values = Mat::<f64>::zeros(size, size);
        for j in 0..size {
            for i in j..size {
                values[(i, j)] = self.function.evaluate(dofs[i], dofs[j]);
            }
        }
        mirror_lower(&mut values);
        values
    }
}

/// One degree-of-freedom pair of a block: the two points it couples,
/// the output components within them, and its position in the block.
#[derive(Debug, Clone, Copy)]
struct Couple {
    point1: usize,
    point2: usize,
    dim1: usize,
    dim2: usize,
    row: usize,
    column: usize,
}

/// Block-local list of couples, sorted by point pair so that every
/// evaluation of the tensor function serves all the entries it covers.
#[derive(Debug)]
struct ParallelBlockData {
    couples: Vec<Couple>,
}

impl ParallelBlockData {
    fn new(
        hmat_to_client: &[usize],
        dimension: usize,
        row_start: usize,
        nrows: usize,
        col_start: usize,
        ncols: usize,
    ) -> Self {
        let positions = (0..nrows).flat_map(|row| (0..ncols).map(move |column| (row, column)));
        Self::from_positions(hmat_to_client, dimension, row_start, col_start, positions)
    }

    /// Couples on and below the diagonal of the block `start..start + size`.
    fn lower(hmat_to_client: &[usize], dimension: usize, start: usize, size: usize) -> Self {
        let positions = (0..size).flat_map(|column| (column..size).map(move |row| (row, column)));
        Self::from_positions(hmat_to_client, dimension, start, start, positions)
    }

    fn from_positions<I: Iterator<Item = (usize, usize)>>(
        hmat_to_client: &[usize],
        dimension: usize,
        row_start: usize,
        col_start: usize,
        positions: I,
    ) -> Self {
        let mut couples = positions
            .map(|(row, column)| {
                let client_row = hmat_to_client[row_start + row];
                let client_column = hmat_to_client[col_start + column];
                Couple {
                    point1: client_row / dimension,
                    point2: client_column / dimension,
                    dim1: client_row % dimension,
                    dim2: client_column % dimension,
                    row,
                    column,
                }
            })
            .collect::<Vec<_>>();

        couples.sort_unstable_by(|a, b| match a.point1.cmp(&b.point1) {
            Ordering::Equal => a.point2.cmp(&b.point2),
            other => other,
        });

        ParallelBlockData { couples }
    }

    fn compute<F: TensorRealAssemblyFunction + ?Sized>(&self, function: &F, values: &mut Mat<f64>) {
        let dimension = function.dimension();
        let mut local_values = Mat::<f64>::zeros(dimension, dimension);
        let mut current: Option<(usize, usize)> = None;

        for couple in &self.couples {
            let pair = (couple.point1, couple.point2);
            if current != Some(pair) {
                function.compute(pair.0, pair.1, &mut local_values);
                current = Some(pair);
            }
            values[(couple.row, couple.column)] = local_values[(couple.dim1, couple.dim2)];
        }
    }
}

/// Adapts a [`TensorRealAssemblyFunction`] to hierarchical numbering.
pub struct TensorBlockGenerator<'a, F: TensorRealAssemblyFunction + ?Sized> {
    function: &'a F,
    hmat_to_client: &'a [usize],
}

impl<'a, F: TensorRealAssemblyFunction + ?Sized> TensorBlockGenerator<'a, F> {
    pub fn new(function: &'a F, tree: &'a ClusterTree) -> Self {
        TensorBlockGenerator {
            function,
            hmat_to_client: tree.hmat_to_client(),
        }
    }
}

impl<F: TensorRealAssemblyFunction + ?Sized> BlockGenerator for TensorBlockGenerator<'_, F> {
    fn compute(&self, row_start: usize, nrows: usize, col_start: usize, ncols: usize) -> Mat<f64> {
        let data = ParallelBlockData::new(
            self.hmat_to_client,
            self.function.dimension().max(1),
            row_start,
            nrows,
            col_start,
            ncols,
        );
        let mut values = Mat::<f64>::zeros(nrows, ncols);
        data.compute(self.function, &mut values);
        values
    }

    fn compute_lower(&self, start: usize, size: usize) -> Mat<f64> {
        let data = ParallelBlockData::lower(
            self.hmat_to_client,
            self.function.dimension().max(1),
            start,
            size,
        );
        let mut values = Mat::<f64>::zeros(size, size);
        data.compute(self.function, &mut values);
        mirror_lower(&mut values);
        values
    }
}

/// Builds a block tree with one compression method and accuracy.
pub struct Assembler<'a, G: BlockGenerator> {
    tree: &'a ClusterTree,
    generator: &'a G,
    method: CompressionMethod,
    epsilon: f64,
    admissibility_factor: f64,
    lower_symmetric: bool,
}

impl<'a, G: BlockGenerator> Assembler<'a, G> {
    pub fn new(
        tree: &'a ClusterTree,
        generator: &'a G,
        method: CompressionMethod,
        epsilon: f64,
        admissibility_factor: f64,
        lower_symmetric: bool,
    ) -> Self {
        Assembler {
            tree,
            generator,
            method,
            epsilon,
            admissibility_factor,
            lower_symmetric,
        }
    }

    /// Assembles the whole matrix.
    pub fn assemble(&self) -> Result<HBlock> {
        self.build(0, 0)
    }

    fn build(&self, row_index: usize, col_index: usize) -> Result<HBlock> {
        let rows = self.tree.node(row_index);
        let columns = self.tree.node(col_index);
        let diagonal = row_index == col_index;

        if rows.is_admissible_with(columns, self.admissibility_factor) {
            return self.compress(rows, columns);
        }

        let (Some(row_children), Some(col_children)) = (rows.children, columns.children) else {
            return Ok(self.full(rows, columns, diagonal));
        };

        let pairs = [
            (row_children[0], col_children[0]),
            (row_children[0], col_children[1]),
            (row_children[1], col_children[0]),
            (row_children[1], col_children[1]),
        ];

        // Only the lower part of a symmetric diagonal block is computed
        let mirrored = diagonal && self.lower_symmetric;
        let computed: Vec<usize> = match mirrored {
            true => vec![0, 2, 3],
            false => vec![0, 1, 2, 3],
        };

        let mut children = computed
            .into_par_iter()
            .map(|k| self.build(pairs[k].0, pairs[k].1))
            .collect::<Result<Vec<_>>>()?;

        if mirrored {
            let mut upper = children[1].clone();
            upper.transpose();
            children.insert(1, upper);
        }

        Ok(HBlock::new(
            rows.offset,
            columns.offset,
            rows.size,
            columns.size,
            BlockData::Hierarchical(children),
        ))
    }

    /// Dense leaf. Symmetric diagonal leaves evaluate the lower triangle only.
    fn full(&self, rows: &ClusterNode, columns: &ClusterNode, diagonal: bool) -> HBlock {
        let (m, n) = (rows.size, columns.size);

        let values = match diagonal && self.lower_symmetric {
            true => self.generator.compute_lower(rows.offset, m),
            false => self.generator.compute(rows.offset, m, columns.offset, n),
        };

        HBlock::new(rows.offset, columns.offset, m, n, BlockData::Full(values))
    }

    fn compress(&self, rows: &ClusterNode, columns: &ClusterNode) -> Result<HBlock> {
        let (m, n) = (rows.size, columns.size);
        let epsilon = self.epsilon;

        let matrix_subset_generator = |rs: &usize, re: &usize, cs: &usize, ce: &usize| {
            self.generator
                .compute(rows.offset + rs, re - rs, columns.offset + cs, ce - cs)
        };

        let (u, v) = match self.method {
            CompressionMethod::Svd => {
                let dense = self.generator.compute(rows.offset, m, columns.offset, n);
                aca::svd_compress(&dense, &epsilon)?
            }
            CompressionMethod::AcaFull => {
                let dense = self.generator.compute(rows.offset, m, columns.offset, n);
                let (u, v) = aca::aca_full_pivoting(dense.as_ref(), &epsilon);
                aca::recompress_aca(&u, &v, &epsilon)?
            }
            CompressionMethod::AcaPartial => {
                let (u, v) = aca::aca_partial_pivoting(
                    m,
                    n,
                    matrix_subset_generator,
                    &epsilon,
                    PivotRestart::FirstUnused,
                );
                aca::recompress_aca(&u, &v, &epsilon)?
            }
            CompressionMethod::AcaRandom => {
                // Seeded by the block position, so assembly is reproducible
                let seed = ((rows.offset as u64) << 32) ^ columns.offset as u64;
                let (u, v) = aca::aca_partial_pivoting(
                    m,
                    n,
                    matrix_subset_generator,
                    &epsilon,
                    PivotRestart::Random(seed),
                );
                aca::recompress_aca(&u, &v, &epsilon)?
            }
            CompressionMethod::AcaPlus => {
                let (u, v) = aca::aca_plus(m, n, matrix_subset_generator, &epsilon);
                aca::recompress_aca(&u, &v, &epsilon)?
            }
        };

        Ok(HBlock::new(
            rows.offset,
            columns.offset,
            m,
            n,
            BlockData::from_low_rank(RkMatrix { u, v }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusteringAlgorithm;
    use equator::assert;
    use faer::utils::approx::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn line_points(n: usize) -> Mat<f64> {
        Mat::from_fn(n, 1, |i, _| i as f64 / n as f64)
    }

    fn kernel(points: &Mat<f64>) -> impl Fn(usize, usize) -> f64 + Sync + '_ {
        move |i, j| (-(points[(i, 0)] - points[(j, 0)]).abs() / 0.2).exp()
    }

    fn dense_reference(tree: &ClusterTree, points: &Mat<f64>) -> Mat<f64> {
        // Hierarchical numbering, to compare against HBlock::to_dense
        let h2c = tree.hmat_to_client();
        let f = kernel(points);
        Mat::from_fn(tree.size(), tree.size(), |i, j| f(h2c[i], h2c[j]))
    }

    #[test]
    fn every_compression_method_matches_dense() {
        let points = line_points(96);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 12);
        let f = kernel(&points);
        let generator = ScalarBlockGenerator::new(&f, &tree);
        let reference = dense_reference(&tree, &points);
        let reference_norm = reference.norm_l2();

        for method in CompressionMethod::ALL {
            let block = Assembler::new(&tree, &generator, method, 1e-8, 2.0, false)
                .assemble()
                .unwrap();
            let error = (block.to_dense() - &reference).norm_l2();
            assert!(error <= 1e-6 * reference_norm);
        }
    }

    #[test]
    fn lower_symmetric_assembly_matches_general() {
        let points = line_points(64);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 8);
        let f = kernel(&points);
        let generator = ScalarBlockGenerator::new(&f, &tree);

        let general = Assembler::new(&tree, &generator, CompressionMethod::Svd, 1e-10, 2.0, false)
            .assemble()
            .unwrap();
        let symmetric = Assembler::new(&tree, &generator, CompressionMethod::Svd, 1e-10, 2.0, true)
            .assemble()
            .unwrap();

        let approx_eq = CwiseMat(ApproxEq::eps() * 1e7);
        assert!(symmetric.to_dense() ~ general.to_dense());
    }

    #[test]
    fn symmetric_assembly_only_evaluates_lower_triangle() {
        let points = line_points(40);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 5);
        let upper_calls = AtomicUsize::new(0);
        let f = |i: usize, j: usize| {
            if tree.client_to_hmat()[i] < tree.client_to_hmat()[j] {
                upper_calls.fetch_add(1, AtomicOrdering::Relaxed);
            }
            1.0 / (1.0 + (i as f64 - j as f64).abs())
        };
        let generator = ScalarBlockGenerator::new(&f, &tree);

        Assembler::new(&tree, &generator, CompressionMethod::AcaPlus, 1e-6, 2.0, true)
            .assemble()
            .unwrap();
        assert!(upper_calls.load(AtomicOrdering::Relaxed) == 0);
    }

    struct CountingTensor {
        points: Mat<f64>,
        evaluations: AtomicUsize,
    }

    impl TensorRealAssemblyFunction for CountingTensor {
        fn dimension(&self) -> usize {
            2
        }

        fn compute(&self, i: usize, j: usize, local_values: &mut Mat<f64>) {
            self.evaluations.fetch_add(1, AtomicOrdering::Relaxed);
            let rho = (-(self.points[(i, 0)] - self.points[(j, 0)]).abs()).exp();
            for a in 0..2 {
                for b in 0..2 {
                    local_values[(a, b)] = rho * if a == b { 2.0 } else { 0.5 };
                }
            }
        }
    }

    #[test]
    fn tensor_generator_evaluates_each_point_pair_once() {
        let points = line_points(6);
        let tree = ClusterTree::new(points.as_ref(), 2, ClusteringAlgorithm::Median, 100);
        let function = CountingTensor {
            points: points.clone(),
            evaluations: AtomicUsize::new(0),
        };
        let generator = TensorBlockGenerator::new(&function, &tree);

        let block = generator.compute(0, 12, 0, 12);
        assert!(function.evaluations.load(AtomicOrdering::Relaxed) == 36);

        let h2c = tree.hmat_to_client();
        for i in 0..12 {
            for j in 0..12 {
                let (ci, cj) = (h2c[i], h2c[j]);
                let rho = (-(points[(ci / 2, 0)] - points[(cj / 2, 0)]).abs()).exp();
                let expected = rho * if ci % 2 == cj % 2 { 2.0 } else { 0.5 };
                assert!((block[(i, j)] - expected).abs() <= 1e-15);
            }
        }
    }

    #[test]
    fn lower_generation_mirrors_the_full_block() {
        let points = line_points(10);
        let tree = ClusterTree::new(points.as_ref(), 2, ClusteringAlgorithm::Median, 100);
        let function = CountingTensor {
            points: points.clone(),
            evaluations: AtomicUsize::new(0),
        };
        let tensor = TensorBlockGenerator::new(&function, &tree);

        let full = tensor.compute(0, 20, 0, 20);
        function.evaluations.store(0, AtomicOrdering::Relaxed);
        let lower = tensor.compute_lower(0, 20);

        // A single pass over the lower triangle reaches each point pair at most once
        let evaluations = function.evaluations.load(AtomicOrdering::Relaxed);
        assert!(evaluations >= 55);
        assert!(evaluations <= 100);
        assert!(max_abs(&full, &lower) == 0.0);

        let f = kernel(&points);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 100);
        let scalar = ScalarBlockGenerator::new(&f, &tree);
        assert!(max_abs(&scalar.compute(2, 6, 2, 6), &scalar.compute_lower(2, 6)) == 0.0);
    }

    fn max_abs(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
        let mut max = 0.0_f64;
        for j in 0..a.ncols() {
            for i in 0..a.nrows() {
                max = max.max((a[(i, j)] - b[(i, j)]).abs());
            }
        }
        max
    }

    #[test]
    fn empty_tree_gives_empty_block() {
        let points = Mat::<f64>::zeros(0, 2);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 4);
        let f = |_: usize, _: usize| 1.0;
        let generator = ScalarBlockGenerator::new(&f, &tree);
        let block = Assembler::new(&tree, &generator, CompressionMethod::AcaRandom, 1e-4, 2.0, true)
            .assemble()
            .unwrap();
        assert!(block.nrows == 0);
        assert!(block.ncols == 0);
    }
}
