//! Error types for grainsmooth.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

use crate::mesh::{GrainId, GrainPair, VertexId};

/// Result type alias using [`SmoothError`].
pub type Result<T> = std::result::Result<T, SmoothError>;

/// Errors that can occur while building or smoothing a surface mesh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmoothError {
    /// The input arrays do not describe a valid surface mesh.
    #[error("malformed mesh: {0}")]
    MalformedMesh(#[from] MalformedMesh),

    /// A vertex is referenced by no triangle, so it cannot be classified.
    #[error("vertex {vertex} has no incident triangles")]
    OrphanVertex {
        /// The orphaned vertex.
        vertex: VertexId,
    },

    /// An edge was looked up that was never registered.
    #[error("edge ({v0}, {v1}) is not present in the edge registry")]
    UnknownEdge {
        /// Smaller endpoint of the edge.
        v0: VertexId,
        /// Larger endpoint of the edge.
        v1: VertexId,
    },

    /// A connected set of free vertices touches no fixed vertex.
    #[error(
        "region of {size} free vertices on patch {patch} (containing {vertex}) has no fixed boundary vertex"
    )]
    UnderconstrainedRegion {
        /// Grain pair of the patch the region lies on.
        patch: GrainPair,
        /// Lowest-numbered vertex of the region.
        vertex: VertexId,
        /// Number of free vertices in the region.
        size: usize,
    },

    /// An iterative solve did not reach its tolerance.
    #[error("solver failed to converge after {iterations} iterations")]
    ConvergenceFailed {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

/// Structural defects in the arrays handed to [`crate::mesh::SurfaceMesh::new`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedMesh {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// More elements than the index type can address.
    #[error("{count} {what} exceed the addressable index range")]
    TooManyElements {
        /// Which element kind overflowed.
        what: &'static str,
        /// The offending count.
        count: usize,
    },

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// The number of face labels does not match the number of faces.
    #[error("{labels} face labels given for {faces} faces")]
    LabelCountMismatch {
        /// Number of faces.
        faces: usize,
        /// Number of labels.
        labels: usize,
    },

    /// A face carries the same grain on both of its sides.
    #[error("face {face} has grain {grain} on both sides")]
    IdenticalGrains {
        /// The face index.
        face: usize,
        /// The repeated grain id.
        grain: GrainId,
    },

    /// A per-vertex array has the wrong length.
    #[error("{what} has {found} entries but the mesh has {expected} vertices")]
    VertexCountMismatch {
        /// Which array is wrong.
        what: &'static str,
        /// Vertex count of the mesh.
        expected: usize,
        /// Length of the supplied array.
        found: usize,
    },

    /// A supplied node code is not one of 2, 3, 4, 12, 13, 14.
    #[error("vertex {vertex} has unrecognised node code {code}")]
    InvalidNodeCode {
        /// The vertex index.
        vertex: usize,
        /// The unrecognised code.
        code: u8,
    },
}

impl SmoothError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        SmoothError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Whether the error is confined to one region and the rest of the mesh
    /// can still be smoothed.
    pub fn is_region_local(&self) -> bool {
        matches!(
            self,
            SmoothError::UnderconstrainedRegion { .. } | SmoothError::ConvergenceFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_converts() {
        let err: SmoothError = MalformedMesh::DegenerateFace { face: 4 }.into();
        assert_eq!(
            err.to_string(),
            "malformed mesh: face 4 is degenerate (has duplicate vertices)"
        );
        assert!(!err.is_region_local());
    }

    #[test]
    fn test_region_error_carries_context() {
        let err = SmoothError::UnderconstrainedRegion {
            patch: GrainPair::new(2, 5).unwrap(),
            vertex: VertexId::new(9),
            size: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("(2, 5)"));
        assert!(msg.contains("V(9)"));
        assert!(err.is_region_local());
    }
}
