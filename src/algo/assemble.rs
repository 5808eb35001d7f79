//! Linear system assembly for one hierarchy level.
//!
//! Free vertices are partitioned into connected regions over the level's
//! active edges. Each region gets its own discrete Laplacian system
//!
//! ```text
//! deg(v) * x_v - sum(x_u, u free neighbour) = sum(x_w, w fixed neighbour)
//! ```
//!
//! one per coordinate axis. This is the negated form of the textbook row
//! (`-deg` on the diagonal, `+1` off it), chosen so that the matrix is
//! symmetric positive definite whenever the region touches a fixed vertex
//! and can be handed straight to conjugate gradients.

use std::collections::HashMap;

use nalgebra::{DVector, Point3};

use super::sparse::{conjugate_gradient, CsrMatrix, TripletBuilder};
use crate::edge::{EdgeKey, EdgeRecord, EdgeRegistry};
use crate::error::{Result, SmoothError};
use crate::mesh::{GrainPair, SurfaceMesh, VertexId};

/// A connected set of free vertices solved as one system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Patch the region belongs to (smallest grain pair on its edges).
    pub patch: GrainPair,
    /// Free vertices in ascending order; row `i` of the system is
    /// `vertices[i]`.
    pub vertices: Vec<VertexId>,
}

impl Region {
    fn underconstrained(&self) -> SmoothError {
        SmoothError::UnderconstrainedRegion {
            patch: self.patch,
            vertex: self.vertices[0],
            size: self.vertices.len(),
        }
    }
}

/// A region together with its assembled system, or the reason it has none.
#[derive(Debug)]
pub struct AssembledRegion {
    /// The region.
    pub region: Region,
    /// The system, or [`SmoothError::UnderconstrainedRegion`].
    pub system: Result<LinearSystem>,
}

/// Laplacian system of one region, three right-hand sides (x, y, z).
#[derive(Debug, Clone)]
pub struct LinearSystem {
    matrix: CsrMatrix,
    degree: DVector<f64>,
    rhs: [DVector<f64>; 3],
    initial: [DVector<f64>; 3],
}

impl LinearSystem {
    /// Number of unknowns per axis.
    #[inline]
    pub fn dim(&self) -> usize {
        self.degree.len()
    }

    /// The Laplacian restricted to the free vertices.
    #[inline]
    pub fn matrix(&self) -> &CsrMatrix {
        &self.matrix
    }

    /// Number of active edges at each free vertex.
    #[inline]
    pub fn degree(&self) -> &DVector<f64> {
        &self.degree
    }

    /// Summed fixed-neighbour coordinates for one axis.
    #[inline]
    pub fn rhs(&self, axis: usize) -> &DVector<f64> {
        &self.rhs[axis]
    }

    /// Current positions of the free vertices for one axis.
    #[inline]
    pub fn initial(&self, axis: usize) -> &DVector<f64> {
        &self.initial[axis]
    }

    /// Replace the starting positions, e.g. between smoothing passes.
    pub fn set_initial(&mut self, initial: [DVector<f64>; 3]) {
        debug_assert!(initial.iter().all(|v| v.len() == self.dim()));
        self.initial = initial;
    }

    /// Sum of the starting positions of every neighbour of each free vertex,
    /// fixed and free alike: `D y0 - L y0 + b`.
    pub fn initial_neighbor_sum(&self, axis: usize) -> DVector<f64> {
        let y0 = &self.initial[axis];
        self.degree.component_mul(y0) - self.matrix.mul_vec(y0) + &self.rhs[axis]
    }

    /// Largest absolute per-row residual `|A x - b|` for one axis.
    pub fn residual(&self, axis: usize, solution: &DVector<f64>) -> f64 {
        (self.matrix.mul_vec(solution) - &self.rhs[axis]).amax()
    }

    /// Solve the unweighted Laplacian system on every axis.
    ///
    /// # Errors
    /// [`SmoothError::ConvergenceFailed`] if conjugate gradients exhausts
    /// `max_iterations` on any axis.
    pub fn solve_harmonic(&self, tolerance: f64, max_iterations: usize) -> Result<[DVector<f64>; 3]> {
        let solve = |axis: usize| {
            conjugate_gradient(
                &self.matrix,
                &self.rhs[axis],
                Some(&self.initial[axis]),
                max_iterations,
                tolerance,
            )
        };
        Ok([solve(0)?, solve(1)?, solve(2)?])
    }
}

/// Union-find over vertex indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so roots stay deterministic
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

struct Accumulator {
    builder: TripletBuilder,
    rhs: [DVector<f64>; 3],
    fixed_contacts: usize,
    patch: Option<GrainPair>,
}

impl Accumulator {
    fn new(n: usize) -> Self {
        Self {
            builder: TripletBuilder::with_capacity(n, n, 7 * n),
            rhs: [DVector::zeros(n), DVector::zeros(n), DVector::zeros(n)],
            fixed_contacts: 0,
            patch: None,
        }
    }

    fn add_fixed(&mut self, row: usize, pos: &Point3<f64>) {
        self.builder.push(row, row, 1.0);
        for axis in 0..3 {
            self.rhs[axis][row] += pos[axis];
        }
        self.fixed_contacts += 1;
    }
}

/// Assemble the systems of every free region of one level.
///
/// `is_active` selects which registered edges couple vertices at this level;
/// `free[v]` marks the vertices allowed to move. Free vertices without any
/// active edge belong to no region and are left untouched. Each active edge
/// contributes its triplets exactly once, so the result does not depend on
/// how many triangles share it.
///
/// # Errors
/// [`SmoothError::UnknownEdge`] if an active edge cannot be read back from
/// the registry. Underconstrained regions are not errors here; they come
/// back with `system` set to [`SmoothError::UnderconstrainedRegion`].
pub fn assemble_level<F>(
    mesh: &SurfaceMesh,
    registry: &EdgeRegistry<EdgeRecord>,
    mut is_active: F,
    free: &[bool],
) -> Result<Vec<AssembledRegion>>
where
    F: FnMut(&EdgeRecord) -> bool,
{
    let n = mesh.num_vertices();
    debug_assert_eq!(free.len(), n);

    let mut edges: Vec<EdgeKey> = registry
        .iter()
        .filter(|(_, record)| is_active(record))
        .map(|(edge, _)| edge)
        .collect();
    edges.sort_unstable();

    let mut components = DisjointSet::new(n);
    let mut touched = vec![false; n];
    for edge in &edges {
        let [a, b] = edge.endpoints().map(VertexId::index);
        touched[a] |= free[a];
        touched[b] |= free[b];
        if free[a] && free[b] {
            components.union(a, b);
        }
    }

    let mut region_of: Vec<Option<usize>> = vec![None; n];
    let mut local = vec![0usize; n];
    let mut members: Vec<Vec<VertexId>> = Vec::new();
    let mut by_root: HashMap<usize, usize> = HashMap::new();
    for v in (0..n).filter(|&v| touched[v]) {
        let root = components.find(v);
        let region = *by_root.entry(root).or_insert_with(|| {
            members.push(Vec::new());
            members.len() - 1
        });
        region_of[v] = Some(region);
        local[v] = members[region].len();
        members[region].push(VertexId::new(v));
    }

    let mut acc: Vec<Accumulator> = members.iter().map(|m| Accumulator::new(m.len())).collect();
    let positions = mesh.positions();

    for &edge in &edges {
        let [a, b] = edge.endpoints().map(VertexId::index);
        let (ra, rb) = (region_of[a], region_of[b]);
        let slot = match ra.or(rb) {
            Some(region) => &mut acc[region],
            None => continue,
        };
        if slot.patch.is_none() {
            slot.patch = Some(registry.get(edge)?.primary_patch());
        }

        match (ra.is_some(), rb.is_some()) {
            (true, true) => {
                let (ia, ib) = (local[a], local[b]);
                slot.builder.push(ia, ia, 1.0);
                slot.builder.push(ib, ib, 1.0);
                slot.builder.push(ia, ib, -1.0);
                slot.builder.push(ib, ia, -1.0);
            }
            (true, false) => slot.add_fixed(local[a], &positions[b]),
            _ => slot.add_fixed(local[b], &positions[a]),
        }
    }

    let assembled = members
        .into_iter()
        .zip(acc)
        // Every region vertex was reached through an active edge
        .filter_map(|(vertices, slot)| {
            let region = Region {
                patch: slot.patch?,
                vertices,
            };
            let system = if slot.fixed_contacts == 0 {
                Err(region.underconstrained())
            } else {
                Ok(finish(slot, &region.vertices, positions))
            };
            Some(AssembledRegion { region, system })
        })
        .collect();

    Ok(assembled)
}

fn finish(slot: Accumulator, vertices: &[VertexId], positions: &[Point3<f64>]) -> LinearSystem {
    let matrix = slot.builder.build();
    let degree = DVector::from_iterator(
        vertices.len(),
        (0..vertices.len()).map(|i| matrix.get(i, i)),
    );
    let initial = [0, 1, 2].map(|axis| {
        DVector::from_iterator(
            vertices.len(),
            vertices.iter().map(|v| positions[v.index()][axis]),
        )
    });
    LinearSystem {
        matrix,
        degree,
        rhs: slot.rhs,
        initial,
    }
}
