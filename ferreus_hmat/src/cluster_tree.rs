/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the cluster tree used to reorder degrees of freedom into spatially coherent ranges.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Binary spatial partition of the degrees of freedom.
//!
//! The tree owns the two permutations between *client* order (the order of
//! the input points, `output_dimension` consecutive entries per point) and
//! *hierarchical* order, in which every cluster is a contiguous range.

use crate::{config::ClusteringAlgorithm, utils::get_pointarray_extents};
use faer::MatRef;
use std::cmp::Ordering;

/// A node of the [`ClusterTree`], covering `size` degrees of freedom
/// starting at `offset` in hierarchical order.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub offset: usize,
    pub size: usize,
    /// Bounding box as `[min_0, ..., min_n, max_0, ..., max_n]`.
    pub extents: Vec<f64>,
    pub children: Option<[usize; 2]>,
}

impl ClusterNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn dimension(&self) -> usize {
        self.extents.len() / 2
    }

    /// Length of the bounding box diagonal.
    pub fn diameter(&self) -> f64 {
        let dim = self.dimension();
        (0..dim)
            .map(|axis| (self.extents[axis + dim] - self.extents[axis]).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean distance between the two bounding boxes.
    pub fn distance(&self, other: &ClusterNode) -> f64 {
        let dim = self.dimension();
        (0..dim)
            .map(|axis| {
                let gap = (other.extents[axis] - self.extents[axis + dim])
                    .max(self.extents[axis] - other.extents[axis + dim])
                    .max(0.0);
                gap * gap
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Standard η-admissibility: `min(diam) <= η * dist` for separated boxes.
    pub fn is_admissible_with(&self, other: &ClusterNode, eta: f64) -> bool {
        if self.size == 0 || other.size == 0 {
            return false;
        }
        let distance = self.distance(other);
        distance > 0.0 && self.diameter().min(other.diameter()) <= eta * distance
    }
}

/// Cluster tree over the degrees of freedom of a point set.
#[derive(Debug)]
pub struct ClusterTree {
    nodes: Vec<ClusterNode>,
    client_to_hmat: Vec<usize>,
    hmat_to_client: Vec<usize>,
    output_dimension: usize,
}

impl ClusterTree {
    /// Builds the tree over the `points.nrows() * output_dimension` degrees
    /// of freedom. Every dof takes the coordinates of its point.
    pub fn new(
        points: MatRef<f64>,
        output_dimension: usize,
        algorithm: ClusteringAlgorithm,
        max_leaf_size: usize,
    ) -> Self {
        let output_dimension = output_dimension.max(1);
        let num_dofs = points.nrows() * output_dimension;

        let mut hmat_to_client: Vec<usize> = (0..num_dofs).collect();
        let mut nodes = Vec::new();

        build_node(
            &mut nodes,
            points,
            output_dimension,
            &mut hmat_to_client,
            0,
            algorithm,
            max_leaf_size.max(1),
        );

        let mut client_to_hmat = vec![0; num_dofs];
        for (h, &c) in hmat_to_client.iter().enumerate() {
            client_to_hmat[c] = h;
        }

        ClusterTree {
            nodes,
            client_to_hmat,
            hmat_to_client,
            output_dimension,
        }
    }

    /// Number of degrees of freedom.
    pub fn size(&self) -> usize {
        self.hmat_to_client.len()
    }

    pub fn output_dimension(&self) -> usize {
        self.output_dimension
    }

    pub fn root(&self) -> &ClusterNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> &ClusterNode {
        &self.nodes[index]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Hierarchical position of each client dof.
    pub fn client_to_hmat(&self) -> &[usize] {
        &self.client_to_hmat
    }

    /// Client dof stored at each hierarchical position.
    pub fn hmat_to_client(&self) -> &[usize] {
        &self.hmat_to_client
    }

    /// Indices of the leaf nodes, left to right.
    pub fn leaves(&self) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            match self.nodes[index].children {
                Some([first, second]) => {
                    stack.push(second);
                    stack.push(first);
                }
                None => leaves.push(index),
            }
        }
        leaves
    }
}

/// Recursively builds the node covering `dofs` and returns its index.
fn build_node(
    nodes: &mut Vec<ClusterNode>,
    points: MatRef<f64>,
    output_dimension: usize,
    dofs: &mut [usize],
    offset: usize,
    algorithm: ClusteringAlgorithm,
    max_leaf_size: usize,
) -> usize {
    let extents = if dofs.is_empty() {
        vec![0.0; 2 * points.ncols()]
    } else {
        get_pointarray_extents(points, dofs.iter().map(|&dof| dof / output_dimension))
    };

    let index = nodes.len();
    nodes.push(ClusterNode {
        offset,
        size: dofs.len(),
        extents,
        children: None,
    });

    if dofs.len() <= max_leaf_size {
        return index;
    }

    let split = split_cluster(points, output_dimension, dofs, &nodes[index].extents, algorithm);
    let (left, right) = dofs.split_at_mut(split);

    let first = build_node(nodes, points, output_dimension, left, offset, algorithm, max_leaf_size);
    let second = build_node(
        nodes,
        points,
        output_dimension,
        right,
        offset + split,
        algorithm,
        max_leaf_size,
    );
    nodes[index].children = Some([first, second]);

    index
}

/// Reorders `dofs` so that the first child is `dofs[..split]` and returns `split`,
/// which always lies in `1..dofs.len()`.
fn split_cluster(
    points: MatRef<f64>,
    output_dimension: usize,
    dofs: &mut [usize],
    extents: &[f64],
    algorithm: ClusteringAlgorithm,
) -> usize {
    let dim = points.ncols();
    if dim == 0 {
        return dofs.len() / 2;
    }

    // Widest axis of the bounding box
    let mut axis = 0;
    let mut width = f64::NEG_INFINITY;
    for k in 0..dim {
        let w = extents[k + dim] - extents[k];
        if w > width {
            width = w;
            axis = k;
        }
    }
    let midpoint = 0.5 * (extents[axis] + extents[axis + dim]);
    let coordinate = |dof: usize| points[(dof / output_dimension, axis)];

    match algorithm {
        ClusteringAlgorithm::Median => median_split(dofs, coordinate),
        ClusteringAlgorithm::Geometric => match geometric_split(dofs, coordinate, midpoint) {
            Some(split) => split,
            None => median_split(dofs, coordinate),
        },
        ClusteringAlgorithm::Hybrid => match geometric_split(dofs, coordinate, midpoint) {
            Some(split) if 5 * split.min(dofs.len() - split) >= dofs.len() => split,
            _ => median_split(dofs, coordinate),
        },
    }
}

fn median_split<F: Fn(usize) -> f64>(dofs: &mut [usize], coordinate: F) -> usize {
    // Ties are broken by dof index so coincident points still split in two
    dofs.sort_by(|&a, &b| {
        coordinate(a)
            .partial_cmp(&coordinate(b))
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    dofs.len() / 2
}

fn geometric_split<F: Fn(usize) -> f64>(
    dofs: &mut [usize],
    coordinate: F,
    midpoint: f64,
) -> Option<usize> {
    dofs.sort_by_key(|&dof| (coordinate(dof) >= midpoint, dof));
    let split = dofs.iter().take_while(|&&dof| coordinate(dof) < midpoint).count();

    match split == 0 || split == dofs.len() {
        true => None,
        false => Some(split),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(n: usize, dim: usize, seed: u64) -> Mat<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::from_fn(n, dim, |_, _| rng.random_range(0.0..1.0))
    }

    fn check_permutations(tree: &ClusterTree) {
        let n = tree.size();
        let mut seen = vec![false; n];
        for h in 0..n {
            let c = tree.hmat_to_client()[h];
            assert!(!seen[c], "client dof {c} appears twice");
            seen[c] = true;
            assert_eq!(tree.client_to_hmat()[c], h);
        }
    }

    fn check_structure(tree: &ClusterTree, max_leaf_size: usize) {
        for index in 0..tree.num_nodes() {
            let node = tree.node(index);
            match node.children {
                Some([a, b]) => {
                    let (a, b) = (tree.node(a), tree.node(b));
                    assert!(a.size > 0 && b.size > 0);
                    assert_eq!(a.offset, node.offset);
                    assert_eq!(b.offset, node.offset + a.size);
                    assert_eq!(a.size + b.size, node.size);
                }
                None => assert!(node.size <= max_leaf_size),
            }
        }
    }

    #[test]
    fn permutations_are_inverse_for_all_algorithms() {
        for algorithm in [
            ClusteringAlgorithm::Median,
            ClusteringAlgorithm::Geometric,
            ClusteringAlgorithm::Hybrid,
        ] {
            for (n, dim, seed) in [(200, 1, 1u64), (300, 2, 2u64), (257, 3, 3u64)] {
                let points = random_points(n, dim, seed);
                let tree = ClusterTree::new(points.as_ref(), 1, algorithm, 16);
                assert_eq!(tree.size(), n);
                check_permutations(&tree);
                check_structure(&tree, 16);
            }
        }
    }

    #[test]
    fn one_dimensional_median_tree_sorts_points() {
        let points = Mat::from_fn(64, 1, |i, _| ((i * 37) % 64) as f64);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 4);
        for h in 1..tree.size() {
            let previous = points[(tree.hmat_to_client()[h - 1], 0)];
            let current = points[(tree.hmat_to_client()[h], 0)];
            assert!(previous <= current);
        }
        assert_eq!(tree.leaves().len(), 16);
    }

    #[test]
    fn multi_output_dofs_share_point_coordinates() {
        let points = random_points(50, 2, 7);
        let tree = ClusterTree::new(points.as_ref(), 3, ClusteringAlgorithm::Median, 8);
        assert_eq!(tree.size(), 150);
        assert_eq!(tree.output_dimension(), 3);
        check_permutations(&tree);
        check_structure(&tree, 8);
    }

    #[test]
    fn coincident_points_still_split() {
        let points = Mat::<f64>::zeros(40, 2);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Geometric, 5);
        check_structure(&tree, 5);
        assert_eq!(tree.root().diameter(), 0.0);
    }

    #[test]
    fn zero_points_give_empty_tree() {
        let points = Mat::<f64>::zeros(0, 2);
        let tree = ClusterTree::new(points.as_ref(), 1, ClusteringAlgorithm::Median, 16);
        assert_eq!(tree.size(), 0);
        assert!(tree.root().is_leaf());
        assert_eq!(tree.root().size, 0);
    }

    #[test]
    fn admissibility_of_separated_boxes() {
        let near = ClusterNode { offset: 0, size: 4, extents: vec![0.0, 1.0], children: None };
        let far = ClusterNode { offset: 4, size: 4, extents: vec![5.0, 6.0], children: None };
        let touching = ClusterNode { offset: 8, size: 4, extents: vec![1.0, 2.0], children: None };

        assert_eq!(near.distance(&far), 4.0);
        assert!(near.is_admissible_with(&far, 2.0));
        assert!(!near.is_admissible_with(&touching, 2.0));
        assert!(!near.is_admissible_with(&near, 2.0));
        assert!(!near.is_admissible_with(&far, 0.1));
    }
}
