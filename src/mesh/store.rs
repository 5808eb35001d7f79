//! Surface mesh topology store.
//!
//! [`SurfaceMesh`] owns the triangle connectivity, vertex positions and
//! per-face grain labels of one grain-boundary network. Connectivity and
//! labels are fixed after construction; only positions change while smoothing.

use std::collections::BTreeMap;

use nalgebra::Point3;

use super::grain::{GrainId, GrainPair};
use super::index::{FaceId, VertexId, MAX_ELEMENTS};
use crate::error::{MalformedMesh, Result};

/// A triangulated grain-boundary network.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    triangles: Vec<[VertexId; 3]>,
    positions: Vec<Point3<f64>>,
    labels: Vec<GrainPair>,
}

impl SurfaceMesh {
    /// Build a mesh from triangles, vertex positions and face labels.
    ///
    /// Each face label names the grains on either side of its triangle. Labels
    /// given in descending order are swapped into ascending order, and the
    /// first two vertices of that triangle are swapped with them so that the
    /// face orientation stays consistent with the grain order.
    ///
    /// # Errors
    /// Returns [`MalformedMesh`] if the mesh is empty, an index is out of
    /// range, a triangle is degenerate, the label count differs from the face
    /// count or a label repeats the same grain.
    ///
    /// # Example
    /// ```
    /// use grainsmooth::mesh::SurfaceMesh;
    /// use nalgebra::Point3;
    ///
    /// let positions = vec![
    ///     Point3::new(0.0, 0.0, 0.0),
    ///     Point3::new(1.0, 0.0, 0.0),
    ///     Point3::new(0.0, 1.0, 0.0),
    /// ];
    /// let mesh = SurfaceMesh::new(&[[0, 1, 2]], positions, &[[1, 2]]).unwrap();
    /// assert_eq!(mesh.num_faces(), 1);
    /// ```
    pub fn new(
        triangles: &[[usize; 3]],
        positions: Vec<Point3<f64>>,
        labels: &[[GrainId; 2]],
    ) -> Result<Self> {
        if triangles.is_empty() {
            return Err(MalformedMesh::EmptyMesh.into());
        }
        if positions.len() >= MAX_ELEMENTS {
            return Err(MalformedMesh::TooManyElements {
                what: "vertices",
                count: positions.len(),
            }
            .into());
        }
        if triangles.len() >= MAX_ELEMENTS {
            return Err(MalformedMesh::TooManyElements {
                what: "faces",
                count: triangles.len(),
            }
            .into());
        }
        if labels.len() != triangles.len() {
            return Err(MalformedMesh::LabelCountMismatch {
                faces: triangles.len(),
                labels: labels.len(),
            }
            .into());
        }

        let mut canonical = Vec::with_capacity(triangles.len());
        let mut pairs = Vec::with_capacity(labels.len());

        for (fi, (tri, label)) in triangles.iter().zip(labels).enumerate() {
            for &vi in tri {
                if vi >= positions.len() {
                    return Err(MalformedMesh::InvalidVertexIndex { face: fi, vertex: vi }.into());
                }
            }
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                return Err(MalformedMesh::DegenerateFace { face: fi }.into());
            }
            let pair = GrainPair::new(label[0], label[1]).ok_or(MalformedMesh::IdenticalGrains {
                face: fi,
                grain: label[0],
            })?;

            let mut ids = tri.map(VertexId::new);
            if label[0] > label[1] {
                ids.swap(0, 1);
            }
            canonical.push(ids);
            pairs.push(pair);
        }

        Ok(Self {
            triangles: canonical,
            positions,
            labels: pairs,
        })
    }

    /// Number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.triangles.len()
    }

    /// Iterate over all vertex ids.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.positions.len()).map(VertexId::new)
    }

    /// Iterate over all face ids.
    pub fn face_ids(&self) -> impl Iterator<Item = FaceId> + '_ {
        (0..self.triangles.len()).map(FaceId::new)
    }

    /// The three vertices of a triangle.
    #[inline]
    pub fn triangle(&self, face: FaceId) -> [VertexId; 3] {
        self.triangles[face.index()]
    }

    /// All triangles, indexed by face.
    #[inline]
    pub fn triangles(&self) -> &[[VertexId; 3]] {
        &self.triangles
    }

    /// The grain pair on either side of a triangle.
    #[inline]
    pub fn label(&self, face: FaceId) -> GrainPair {
        self.labels[face.index()]
    }

    /// All face labels, indexed by face.
    #[inline]
    pub fn labels(&self) -> &[GrainPair] {
        &self.labels
    }

    /// Position of a vertex.
    #[inline]
    pub fn position(&self, vertex: VertexId) -> &Point3<f64> {
        &self.positions[vertex.index()]
    }

    /// All vertex positions, indexed by vertex.
    #[inline]
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    /// Mutable view of the vertex positions.
    ///
    /// The vertex count cannot change through this view.
    #[inline]
    pub fn positions_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.positions
    }

    /// Write a batch of solved positions back into the mesh.
    ///
    /// The whole batch lands under one exclusive borrow, so no reader can
    /// observe a half-applied pass.
    pub fn apply_positions<It>(&mut self, updates: It)
    where
        It: IntoIterator<Item = (VertexId, Point3<f64>)>,
    {
        for (vertex, pos) in updates {
            self.positions[vertex.index()] = pos;
        }
    }

    /// Consume the mesh and return its positions.
    pub fn into_positions(self) -> Vec<Point3<f64>> {
        self.positions
    }

    /// Group triangles into patches by their unordered grain pair.
    ///
    /// Patches are returned in grain-pair order; faces within a patch keep
    /// their mesh order.
    pub fn patches_by_grain_pair(&self) -> BTreeMap<GrainPair, Vec<FaceId>> {
        let mut patches: BTreeMap<GrainPair, Vec<FaceId>> = BTreeMap::new();
        for (fi, &pair) in self.labels.iter().enumerate() {
            patches.entry(pair).or_default().push(FaceId::new(fi));
        }
        patches
    }

    /// For each vertex, the faces that reference it.
    pub fn vertex_faces(&self) -> Vec<Vec<FaceId>> {
        let mut incident = vec![Vec::new(); self.positions.len()];
        for (fi, tri) in self.triangles.iter().enumerate() {
            for v in tri {
                incident[v.index()].push(FaceId::new(fi));
            }
        }
        incident
    }

    /// Volume-surface membership derived from a designated exterior grain.
    ///
    /// Reconstruction pipelines label the space outside the sample with a
    /// reserved grain id; every vertex of a face bordering that id lies on
    /// the outer volume surface.
    pub fn volume_surface_from_exterior(&self, exterior: GrainId) -> Vec<bool> {
        let mut on_surface = vec![false; self.positions.len()];
        for (tri, pair) in self.triangles.iter().zip(&self.labels) {
            if pair.contains(exterior) {
                for v in tri {
                    on_surface[v.index()] = true;
                }
            }
        }
        on_surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SmoothError;

    fn square_positions() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_rejects_empty() {
        let err = SurfaceMesh::new(&[], square_positions(), &[]).unwrap_err();
        assert_eq!(err, SmoothError::MalformedMesh(MalformedMesh::EmptyMesh));
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let err = SurfaceMesh::new(&[[0, 1, 4]], square_positions(), &[[1, 2]]).unwrap_err();
        assert_eq!(
            err,
            SmoothError::MalformedMesh(MalformedMesh::InvalidVertexIndex { face: 0, vertex: 4 })
        );
    }

    #[test]
    fn test_rejects_degenerate_face() {
        let err = SurfaceMesh::new(
            &[[0, 1, 2], [2, 3, 2]],
            square_positions(),
            &[[1, 2], [1, 2]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            SmoothError::MalformedMesh(MalformedMesh::DegenerateFace { face: 1 })
        );
    }

    #[test]
    fn test_rejects_label_mismatch() {
        let err = SurfaceMesh::new(&[[0, 1, 2]], square_positions(), &[]).unwrap_err();
        assert!(matches!(
            err,
            SmoothError::MalformedMesh(MalformedMesh::LabelCountMismatch { faces: 1, labels: 0 })
        ));

        let err = SurfaceMesh::new(&[[0, 1, 2]], square_positions(), &[[3, 3]]).unwrap_err();
        assert!(matches!(
            err,
            SmoothError::MalformedMesh(MalformedMesh::IdenticalGrains { face: 0, grain: 3 })
        ));
    }

    #[test]
    fn test_descending_label_flips_winding() {
        let mesh = SurfaceMesh::new(
            &[[0, 1, 2], [0, 2, 3]],
            square_positions(),
            &[[1, 2], [2, 1]],
        )
        .unwrap();

        assert_eq!(mesh.triangle(FaceId::new(0)), [0, 1, 2].map(VertexId::new));
        assert_eq!(mesh.triangle(FaceId::new(1)), [2, 0, 3].map(VertexId::new));
        assert_eq!(mesh.label(FaceId::new(0)), mesh.label(FaceId::new(1)));
    }

    #[test]
    fn test_patches_by_grain_pair() {
        let mesh = SurfaceMesh::new(
            &[[0, 1, 2], [0, 2, 3]],
            square_positions(),
            &[[5, 1], [1, 2]],
        )
        .unwrap();
        let patches = mesh.patches_by_grain_pair();

        assert_eq!(patches.len(), 2);
        let first = GrainPair::new(1, 2).unwrap();
        assert_eq!(patches[&first], vec![FaceId::new(1)]);
        let second = GrainPair::new(1, 5).unwrap();
        assert_eq!(patches[&second], vec![FaceId::new(0)]);
    }

    #[test]
    fn test_apply_positions_and_incidence() {
        let mut mesh = SurfaceMesh::new(
            &[[0, 1, 2], [0, 2, 3]],
            square_positions(),
            &[[1, 2], [1, 3]],
        )
        .unwrap();

        let incident = mesh.vertex_faces();
        assert_eq!(incident[0].len(), 2);
        assert_eq!(incident[1], vec![FaceId::new(0)]);

        mesh.apply_positions([(VertexId::new(2), Point3::new(2.0, 2.0, 0.0))]);
        assert_eq!(*mesh.position(VertexId::new(2)), Point3::new(2.0, 2.0, 0.0));
        assert_eq!(mesh.into_positions().len(), 4);
    }

    #[test]
    fn test_volume_surface_from_exterior() {
        let mesh = SurfaceMesh::new(
            &[[0, 1, 2], [0, 2, 3]],
            square_positions(),
            &[[1, 2], [-1, 2]],
        )
        .unwrap();
        let surface = mesh.volume_surface_from_exterior(-1);
        assert_eq!(surface, vec![true, false, true, true]);
    }
}
