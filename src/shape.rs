//! Jagged shapes: the nested dimensions of a DataSlice.
//!
//! A [`JaggedShape`] is a list of [`Edge`]s. Each edge partitions the items of
//! the previous dimension into groups given by split points, so an edge with
//! split points `[0, 2, 5]` has two parents with 2 and 3 children. The first
//! edge always has a single parent. Rank 0 is a scalar.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, invalid};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    split_points: Vec<usize>,
}

impl Edge {
    pub fn from_split_points(split_points: Vec<usize>) -> Result<Self> {
        if split_points.first() != Some(&0) {
            return invalid("split points must start with 0");
        }
        if split_points.windows(2).any(|w| w[0] > w[1]) {
            return invalid("split points must be sorted");
        }
        Ok(Self { split_points })
    }
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut split_points = Vec::with_capacity(sizes.len() + 1);
        split_points.push(0);
        let mut total = 0;
        for size in sizes {
            total += size;
            split_points.push(total);
        }
        Self { split_points }
    }
    pub fn from_uniform_groups(parent_size: usize, group_size: usize) -> Self {
        Self::from_sizes(&vec![group_size; parent_size])
    }
    pub fn parent_size(&self) -> usize {
        self.split_points.len() - 1
    }
    pub fn child_size(&self) -> usize {
        self.split_points.last().copied().unwrap_or(0)
    }
    pub fn split_points(&self) -> &[usize] {
        &self.split_points
    }
    pub fn group_size(&self, parent: usize) -> usize {
        self.split_points[parent + 1] - self.split_points[parent]
    }
    pub fn sizes(&self) -> Vec<usize> {
        self.split_points.windows(2).map(|w| w[1] - w[0]).collect()
    }
    // The parent index of every child.
    fn child_to_parent(&self) -> Vec<usize> {
        let mut mapping = Vec::with_capacity(self.child_size());
        for parent in 0..self.parent_size() {
            mapping.extend(std::iter::repeat_n(parent, self.group_size(parent)));
        }
        mapping
    }
    // Composes two consecutive edges into one edge from the parents of `self`
    // to the children of `next`.
    fn compose(&self, next: &Edge) -> Edge {
        Edge {
            split_points: self.split_points.iter().map(|&p| next.split_points[p]).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct JaggedShape {
    edges: Vec<Edge>,
}

impl JaggedShape {
    /// The rank 0 shape.
    pub fn scalar() -> Self {
        Self { edges: Vec::new() }
    }
    pub fn flat(size: usize) -> Self {
        Self {
            edges: vec![Edge::from_uniform_groups(1, size)],
        }
    }
    pub fn from_edges(edges: Vec<Edge>) -> Result<Self> {
        let mut parent_size = 1;
        for (dim, edge) in edges.iter().enumerate() {
            if edge.parent_size() != parent_size {
                return invalid(format!(
                    "incompatible edges: dimension {} expects {} parents, got {}",
                    dim,
                    parent_size,
                    edge.parent_size()
                ));
            }
            parent_size = edge.child_size();
        }
        Ok(Self { edges })
    }
    pub fn rank(&self) -> usize {
        self.edges.len()
    }
    pub fn size(&self) -> usize {
        self.edges.last().map(Edge::child_size).unwrap_or(1)
    }
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
    pub fn is_scalar(&self) -> bool {
        self.edges.is_empty()
    }
    pub fn add_dims(&self, edges: impl IntoIterator<Item = Edge>) -> Result<Self> {
        let mut all = self.edges.clone();
        all.extend(edges);
        Self::from_edges(all)
    }
    /// Drops the dimensions from `rank` onwards.
    pub fn remove_dims(&self, rank: usize) -> Self {
        Self {
            edges: self.edges[..rank.min(self.rank())].to_vec(),
        }
    }
    /// Merges dimensions `[from, to)` into one. `from == to` inserts a unit
    /// dimension.
    pub fn flatten(&self, from: usize, to: usize) -> Result<Self> {
        let rank = self.rank();
        if from > to || to > rank {
            return invalid(format!("invalid flatten range [{}, {}) for rank {}", from, to, rank));
        }
        let mut edges = self.edges[..from].to_vec();
        if from == to {
            let parent_size = if from == 0 { 1 } else { self.edges[from - 1].child_size() };
            edges.push(Edge::from_uniform_groups(parent_size, 1));
        } else {
            let mut merged = self.edges[from].clone();
            for edge in &self.edges[from + 1..to] {
                merged = merged.compose(edge);
            }
            edges.push(merged);
        }
        edges.extend_from_slice(&self.edges[to..]);
        Self::from_edges(edges)
    }
    pub fn is_equivalent_to(&self, other: &JaggedShape) -> bool {
        self == other
    }
    /// True when `self` is a prefix of `other`, i.e. values of this shape can
    /// be expanded to `other`.
    pub fn is_broadcastable_to(&self, other: &JaggedShape) -> bool {
        self.rank() <= other.rank() && self.edges[..] == other.edges[..self.rank()]
    }
    /// For every leaf of `target`, the index of the leaf of `self` it comes
    /// from.
    pub fn broadcast_indices(&self, target: &JaggedShape) -> Result<Vec<usize>> {
        if !self.is_broadcastable_to(target) {
            return invalid(format!("shape {} cannot be expanded to shape {}", self, target));
        }
        let mut indices: Vec<usize> = (0..self.size()).collect();
        for edge in &target.edges[self.rank()..] {
            let parents = edge.child_to_parent();
            indices = parents.into_iter().map(|parent| indices[parent]).collect();
        }
        Ok(indices)
    }
}

impl fmt::Display for JaggedShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dims: Vec<String> = self
            .edges
            .iter()
            .map(|edge| {
                let sizes = edge.sizes();
                if sizes.windows(2).all(|w| w[0] == w[1]) {
                    sizes.first().copied().unwrap_or(0).to_string()
                } else {
                    format!("{:?}", sizes)
                }
            })
            .collect();
        write!(f, "JaggedShape({})", dims.join(", "))
    }
}
