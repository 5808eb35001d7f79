//! Junction classification of mesh vertices.
//!
//! Each vertex is labelled by how many distinct grain-boundary patches meet
//! at it, and by whether it lies on the outer surface of the sampled volume.
//! The labels decide which vertices may move during smoothing.
//!
//! Reconstruction pipelines such as Dream.3D store this classification as an
//! integer code (2, 3, 4 in the bulk and 12, 13, 14 on the volume surface);
//! [`NodeType::code`] and [`NodeType::from_code`] convert to and from it.

use crate::error::{MalformedMesh, Result, SmoothError};
use crate::mesh::{GrainPair, SurfaceMesh, VertexId};

/// How many patches meet at a vertex.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum JunctionKind {
    /// One or two patches: an ordinary boundary point.
    Interior,
    /// Three patches.
    Triple,
    /// Four or more patches.
    Quad,
}

/// Whether a vertex lies on the outer surface of the sampled volume.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Inside the volume.
    Bulk,
    /// On the outer volume surface.
    VolumeSurface,
}

/// Classification of a single vertex.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeType {
    /// Junction order.
    pub kind: JunctionKind,
    /// Bulk or volume surface.
    pub placement: Placement,
}

impl NodeType {
    /// Create a node type.
    pub const fn new(kind: JunctionKind, placement: Placement) -> Self {
        Self { kind, placement }
    }

    /// Classify from the number of distinct patches meeting at a vertex.
    ///
    /// Returns `None` for zero patches.
    pub fn from_patch_count(patches: usize, on_volume_surface: bool) -> Option<Self> {
        let kind = match patches {
            0 => return None,
            1 | 2 => JunctionKind::Interior,
            3 => JunctionKind::Triple,
            _ => JunctionKind::Quad,
        };
        let placement = if on_volume_surface {
            Placement::VolumeSurface
        } else {
            Placement::Bulk
        };
        Some(Self::new(kind, placement))
    }

    /// Integer code: 2/3/4 in the bulk, 12/13/14 on the volume surface.
    pub fn code(self) -> u8 {
        let base = match self.kind {
            JunctionKind::Interior => 2,
            JunctionKind::Triple => 3,
            JunctionKind::Quad => 4,
        };
        match self.placement {
            Placement::Bulk => base,
            Placement::VolumeSurface => base + 10,
        }
    }

    /// Parse an integer code. Returns `None` for unrecognised codes.
    pub fn from_code(code: u8) -> Option<Self> {
        let placement = match code / 10 {
            0 => Placement::Bulk,
            1 => Placement::VolumeSurface,
            _ => return None,
        };
        let kind = match code % 10 {
            2 => JunctionKind::Interior,
            3 => JunctionKind::Triple,
            4 => JunctionKind::Quad,
            _ => return None,
        };
        Some(Self::new(kind, placement))
    }

    /// Whether three or more grains meet here.
    #[inline]
    pub fn is_junction(self) -> bool {
        self.kind != JunctionKind::Interior
    }

    /// Whether the vertex counts as already smoothed before any level runs.
    #[inline]
    pub fn starts_smoothed(self) -> bool {
        self.kind == JunctionKind::Quad
    }
}

/// Per-vertex classification of a whole mesh.
///
/// Computed once per mesh and never altered while smoothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeClassification {
    types: Vec<NodeType>,
}

impl NodeClassification {
    /// Classify every vertex from mesh connectivity.
    ///
    /// `on_volume_surface` reports whether a vertex lies on the outer volume
    /// surface; see [`SurfaceMesh::volume_surface_from_exterior`] for one way
    /// to derive it.
    ///
    /// # Errors
    /// [`SmoothError::OrphanVertex`] for the first vertex that no triangle
    /// references.
    ///
    /// # Example
    /// ```
    /// use grainsmooth::algo::classify::{JunctionKind, NodeClassification};
    /// use grainsmooth::mesh::{SurfaceMesh, VertexId};
    /// use nalgebra::Point3;
    ///
    /// let positions = vec![
    ///     Point3::new(0.0, 0.0, 0.0),
    ///     Point3::new(1.0, 0.0, 0.0),
    ///     Point3::new(0.0, 1.0, 0.0),
    /// ];
    /// let mesh = SurfaceMesh::new(&[[0, 1, 2]], positions, &[[1, 2]]).unwrap();
    /// let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
    /// assert_eq!(nodes.node_type(VertexId::new(0)).kind, JunctionKind::Interior);
    /// ```
    pub fn classify<F>(mesh: &SurfaceMesh, on_volume_surface: F) -> Result<Self>
    where
        F: Fn(VertexId) -> bool,
    {
        let incident = mesh.vertex_faces();
        let mut types = Vec::with_capacity(mesh.num_vertices());
        let mut pairs: Vec<GrainPair> = Vec::new();

        for (vi, faces) in incident.iter().enumerate() {
            let vertex = VertexId::new(vi);
            pairs.clear();
            pairs.extend(faces.iter().map(|&f| mesh.label(f)));
            pairs.sort_unstable();
            pairs.dedup();

            let node = NodeType::from_patch_count(pairs.len(), on_volume_surface(vertex))
                .ok_or(SmoothError::OrphanVertex { vertex })?;
            types.push(node);
        }

        Ok(Self { types })
    }

    /// Adopt a classification computed elsewhere, given as integer codes.
    ///
    /// # Errors
    /// [`MalformedMesh::VertexCountMismatch`] if the array length differs
    /// from the vertex count, [`MalformedMesh::InvalidNodeCode`] for any code
    /// outside 2/3/4/12/13/14, [`SmoothError::OrphanVertex`] for the first
    /// vertex no triangle references.
    pub fn from_codes(mesh: &SurfaceMesh, codes: &[u8]) -> Result<Self> {
        if codes.len() != mesh.num_vertices() {
            return Err(MalformedMesh::VertexCountMismatch {
                what: "node codes",
                expected: mesh.num_vertices(),
                found: codes.len(),
            }
            .into());
        }
        if let Some(vertex) = mesh.vertex_faces().iter().position(Vec::is_empty) {
            return Err(SmoothError::OrphanVertex {
                vertex: VertexId::new(vertex),
            });
        }
        let types = codes
            .iter()
            .enumerate()
            .map(|(vertex, &code)| {
                NodeType::from_code(code).ok_or(MalformedMesh::InvalidNodeCode { vertex, code })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { types })
    }

    /// Number of classified vertices.
    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the classification is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Type of one vertex.
    #[inline]
    pub fn node_type(&self, vertex: VertexId) -> NodeType {
        self.types[vertex.index()]
    }

    /// All node types, indexed by vertex.
    #[inline]
    pub fn types(&self) -> &[NodeType] {
        &self.types
    }

    /// Integer codes for export, indexed by vertex.
    pub fn codes(&self) -> Vec<u8> {
        self.types.iter().map(|t| t.code()).collect()
    }

    /// Initial smoothed flags: true exactly for quad junctions.
    pub fn initial_smoothed(&self) -> Vec<bool> {
        self.types.iter().map(|t| t.starts_smoothed()).collect()
    }
}
