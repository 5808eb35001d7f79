//! Edge bookkeeping.
//!
//! Every physical edge of a triangle mesh is identified by one canonical
//! [`EdgeKey`], no matter which triangle or which direction it is reached
//! from. The [`EdgeRegistry`] aggregates per-edge payloads under that key.

mod registry;

pub use registry::{EdgePayload, EdgeRecord, EdgeRegistry};

use crate::mesh::VertexId;

/// An undirected edge stored with its smaller endpoint first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EdgeKey {
    v0: VertexId,
    v1: VertexId,
}

impl EdgeKey {
    /// Canonical key for the edge between `a` and `b`, in either order.
    ///
    /// This is the only place endpoint order is decided.
    #[inline]
    pub fn new(a: VertexId, b: VertexId) -> Self {
        debug_assert_ne!(a, b, "edge endpoints must differ");
        if a <= b {
            Self { v0: a, v1: b }
        } else {
            Self { v0: b, v1: a }
        }
    }

    /// The smaller endpoint.
    #[inline]
    pub fn v0(self) -> VertexId {
        self.v0
    }

    /// The larger endpoint.
    #[inline]
    pub fn v1(self) -> VertexId {
        self.v1
    }

    /// Both endpoints, smaller first.
    #[inline]
    pub fn endpoints(self) -> [VertexId; 2] {
        [self.v0, self.v1]
    }

    /// The endpoint opposite `v`, or `None` if `v` is not on this edge.
    #[inline]
    pub fn other(self, v: VertexId) -> Option<VertexId> {
        if v == self.v0 {
            Some(self.v1)
        } else if v == self.v1 {
            Some(self.v0)
        } else {
            None
        }
    }
}

/// The three canonical edges of a triangle.
#[inline]
pub fn triangle_edges(tri: [VertexId; 3]) -> [EdgeKey; 3] {
    [
        EdgeKey::new(tri[0], tri[1]),
        EdgeKey::new(tri[1], tri[2]),
        EdgeKey::new(tri[2], tri[0]),
    ]
}

/// The distinct edges of a set of triangles, sorted.
///
/// Edges shared by several triangles appear once.
pub fn edge_list(triangles: &[[VertexId; 3]]) -> Vec<EdgeKey> {
    let mut edges: Vec<EdgeKey> = triangles.iter().flat_map(|&t| triangle_edges(t)).collect();
    edges.sort_unstable();
    edges.dedup();
    edges
}
