//! # Grainsmooth
//!
//! Hierarchical smoothing of grain-boundary surface meshes.
//!
//! A grain-boundary mesh is a triangle soup in which every triangle carries
//! the pair of grains it separates. Triangles sharing a grain pair form a
//! patch; patches meet along triple lines, which meet at quad points.
//! Grainsmooth removes the staircase noise left by voxel-based meshing while
//! keeping that network topologically intact: junctions are held fixed and
//! each class of vertices is smoothed against the classes already finalised.
//!
//! ## Features
//!
//! - **Typed mesh store**: validated triangles, canonical grain pairs, type-safe indices
//! - **Node classification**: interior, triple and quad nodes on the bulk or volume surface
//! - **Edge registry**: one canonical record per undirected edge, merged across faces
//! - **Sparse solvers**: CSR assembly and conjugate gradient for each free region
//! - **Hierarchical schedule**: rims then interiors, in parallel across regions
//!
//! ## Quick Start
//!
//! ```
//! use grainsmooth::prelude::*;
//! use nalgebra::Point3;
//!
//! // Two patches of a flat sheet, split along x = 1
//! let positions = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(2.0, 0.0, 0.0),
//!     Point3::new(0.0, 2.0, 0.0),
//!     Point3::new(1.0, 2.0, 0.0),
//!     Point3::new(2.0, 2.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.4), // noisy interior of the left patch
//!     Point3::new(1.5, 1.0, -0.3), // noisy interior of the right patch
//! ];
//! let triangles = [
//!     [6, 0, 1], [6, 1, 4], [6, 4, 3], [6, 3, 0],
//!     [7, 1, 2], [7, 2, 5], [7, 5, 4], [7, 4, 1],
//! ];
//! let labels = [[1, 2], [1, 2], [1, 2], [1, 2], [1, 3], [1, 3], [1, 3], [1, 3]];
//!
//! let mut mesh = SurfaceMesh::new(&triangles, positions, &labels).unwrap();
//! let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
//! let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();
//!
//! assert_eq!(report.state, SolverState::Converged);
//! assert!(mesh.position(VertexId::new(6)).z.abs() < 1e-8);
//! assert!(mesh.position(VertexId::new(7)).z.abs() < 1e-8);
//! ```
//!
//! ## Stepping Through Levels
//!
//! ```
//! use grainsmooth::prelude::*;
//! use nalgebra::Point3;
//!
//! # let positions = vec![
//! #     Point3::new(0.0, 0.0, 0.0),
//! #     Point3::new(1.0, 0.0, 0.0),
//! #     Point3::new(0.5, 1.0, 0.0),
//! # ];
//! # let mut mesh = SurfaceMesh::new(&[[0, 1, 2]], positions, &[[1, 2]]).unwrap();
//! let nodes = NodeClassification::from_codes(&mesh, &[14, 12, 14]).unwrap();
//! let options = HierarchyOptions::default().with_policy(HierarchyPolicy::CurvesThenPatches);
//! let mut smoother = HierarchicalSmoother::new(&mut mesh, nodes, options).unwrap();
//!
//! while !smoother.state().is_terminal() {
//!     let state = smoother.step().unwrap();
//!     println!("{:?}", state);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod edge;
pub mod error;
pub mod mesh;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use grainsmooth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::{
        hierarchical_smooth, HierarchicalSmoother, HierarchyOptions, HierarchyPolicy,
        JunctionKind, NodeClassification, NodeType, Placement, Progress, SmoothReport,
        SmoothingMode, SolverState,
    };
    pub use crate::edge::{EdgeKey, EdgeRecord, EdgeRegistry};
    pub use crate::error::{MalformedMesh, Result, SmoothError};
    pub use crate::mesh::{FaceId, GrainId, GrainPair, SurfaceMesh, VertexId};
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_volume_surface_classification_end_to_end() {
        // Strip of two patches; grain 0 stands for the exterior
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
        ];
        let triangles = [[0, 1, 3], [0, 3, 2], [2, 3, 5], [2, 5, 4]];
        let labels = [[0, 1], [0, 1], [1, 2], [1, 2]];

        let mesh = SurfaceMesh::new(&triangles, positions, &labels).unwrap();
        let surface = mesh.volume_surface_from_exterior(0);
        let nodes = NodeClassification::classify(&mesh, |v| surface[v.index()]).unwrap();

        assert_eq!(nodes.node_type(VertexId::new(0)).placement, Placement::VolumeSurface);
        assert_eq!(nodes.node_type(VertexId::new(4)).placement, Placement::Bulk);
        assert_eq!(nodes.codes(), vec![12, 12, 12, 12, 2, 2]);
    }
}
