//! Hash-backed registry of per-edge payloads.

use std::collections::hash_map::{Entry, HashMap};
use std::collections::BTreeMap;

use super::{triangle_edges, EdgeKey};
use crate::error::{Result, SmoothError};
use crate::mesh::{FaceId, GrainPair, SurfaceMesh};

/// Data that can be accumulated per edge.
///
/// The first contribution to an edge becomes its payload; later ones are
/// merged in with `combine`, which must be associative and commutative so
/// that the final payload does not depend on the order in which triangles
/// are visited.
pub trait EdgePayload {
    /// Merge another contribution into this payload.
    fn combine(&mut self, other: Self);
}

/// Plain reference count.
impl EdgePayload for usize {
    #[inline]
    fn combine(&mut self, other: Self) {
        *self += other;
    }
}

/// Topological record of an edge: how many triangles reference it, split
/// by patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    faces: usize,
    primary: GrainPair,
    patches: BTreeMap<GrainPair, usize>,
}

impl EdgeRecord {
    /// Contribution of a single triangle on `patch`.
    pub fn face(patch: GrainPair) -> Self {
        Self {
            faces: 1,
            primary: patch,
            patches: BTreeMap::from([(patch, 1)]),
        }
    }

    /// Total number of triangles referencing the edge.
    #[inline]
    pub fn faces(&self) -> usize {
        self.faces
    }

    /// Triangles per patch referencing the edge.
    #[inline]
    pub fn patches(&self) -> &BTreeMap<GrainPair, usize> {
        &self.patches
    }

    /// Smallest grain pair among the patches that use the edge.
    #[inline]
    pub fn primary_patch(&self) -> GrainPair {
        self.primary
    }

    /// Whether the edge lies on the rim of at least one patch, i.e. some
    /// patch references it from a single triangle.
    pub fn is_patch_boundary(&self) -> bool {
        self.patches.values().any(|&count| count == 1)
    }
}

impl EdgePayload for EdgeRecord {
    fn combine(&mut self, other: Self) {
        self.faces += other.faces;
        self.primary = self.primary.min(other.primary);
        for (patch, count) in other.patches {
            *self.patches.entry(patch).or_insert(0) += count;
        }
    }
}

/// Dictionary from canonical edge to an accumulated payload.
///
/// Each physical edge owns exactly one entry, however many triangles
/// register it.
#[derive(Debug, Clone)]
pub struct EdgeRegistry<P> {
    entries: HashMap<EdgeKey, P>,
}

impl<P> Default for EdgeRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EdgeRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create an empty registry sized for `edges` entries.
    pub fn with_capacity(edges: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(edges),
        }
    }

    /// The payload of `edge`.
    ///
    /// # Errors
    /// [`SmoothError::UnknownEdge`] if the edge was never registered.
    pub fn get(&self, edge: EdgeKey) -> Result<&P> {
        self.entries.get(&edge).ok_or(SmoothError::UnknownEdge {
            v0: edge.v0(),
            v1: edge.v1(),
        })
    }

    /// Whether `edge` has been registered.
    #[inline]
    pub fn contains(&self, edge: EdgeKey) -> bool {
        self.entries.contains_key(&edge)
    }

    /// Number of distinct edges.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no edge has been registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (EdgeKey, &P)> + '_ {
        self.entries.iter().map(|(&k, p)| (k, p))
    }

    /// Drop every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<P: EdgePayload> EdgeRegistry<P> {
    /// Merge `contribution` into the payload of `edge`, creating the entry if
    /// needed.
    pub fn register(&mut self, edge: EdgeKey, contribution: P) {
        match self.entries.entry(edge) {
            Entry::Occupied(mut slot) => slot.get_mut().combine(contribution),
            Entry::Vacant(slot) => {
                slot.insert(contribution);
            }
        }
    }
}

impl EdgeRegistry<EdgeRecord> {
    /// Register every edge of the given faces with its patch.
    pub fn from_faces<It>(mesh: &SurfaceMesh, faces: It) -> Self
    where
        It: IntoIterator<Item = FaceId>,
    {
        let faces = faces.into_iter();
        let mut registry = Self::with_capacity(faces.size_hint().0 * 3 / 2);
        for face in faces {
            let patch = mesh.label(face);
            for edge in triangle_edges(mesh.triangle(face)) {
                registry.register(edge, EdgeRecord::face(patch));
            }
        }
        registry
    }
}
