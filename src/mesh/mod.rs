//! Core mesh data structures.
//!
//! This module provides the surface-mesh store for grain-boundary networks
//! and the types used to address its elements.
//!
//! # Overview
//!
//! A [`SurfaceMesh`] holds three index-aligned arrays:
//! - triangles, each a triplet of [`VertexId`]s
//! - vertex positions, one [`nalgebra::Point3`] per vertex
//! - face labels, one [`GrainPair`] per triangle
//!
//! All triangles that share a grain pair form one *patch*, a single
//! grain-boundary surface.
//!
//! ```
//! use grainsmooth::mesh::{GrainPair, SurfaceMesh};
//! use nalgebra::Point3;
//!
//! let positions = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let mesh = SurfaceMesh::new(&[[0, 1, 2], [0, 2, 3]], positions, &[[1, 2], [2, 1]]).unwrap();
//!
//! let patches = mesh.patches_by_grain_pair();
//! assert_eq!(patches[&GrainPair::new(1, 2).unwrap()].len(), 2);
//! ```

mod grain;
mod index;
mod store;

pub use grain::{GrainId, GrainPair};
pub use index::{FaceId, RawIndex, VertexId, INVALID_INDEX, MAX_ELEMENTS};
pub use store::SurfaceMesh;
