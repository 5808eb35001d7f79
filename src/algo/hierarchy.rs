//! Hierarchical smoothing of grain-boundary networks.
//!
//! Smoothing runs as a sequence of levels. Each level frees one class of
//! vertices, splits them into connected regions bounded by fixed vertices,
//! solves every region's Laplacian system and writes the results back before
//! the next level starts. Vertices solved at one level are held fixed by all
//! later levels.
//!
//! # Policies
//!
//! - [`HierarchyPolicy::JunctionsFixed`]: junctions and patch rims never move;
//!   only patch interiors are smoothed.
//! - [`HierarchyPolicy::CurvesThenPatches`]: patch rims (triple lines and
//!   volume-surface edges) are first smoothed as curves anchored at quad
//!   junctions, then patch interiors are smoothed against the new rims.
//!
//! # Example
//!
//! ```
//! use grainsmooth::algo::classify::NodeClassification;
//! use grainsmooth::algo::hierarchy::{hierarchical_smooth, HierarchyOptions, SolverState};
//! use grainsmooth::mesh::{SurfaceMesh, VertexId};
//! use nalgebra::Point3;
//!
//! // Square with a raised centre vertex
//! let positions = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(2.0, 0.0, 0.0),
//!     Point3::new(2.0, 2.0, 0.0),
//!     Point3::new(0.0, 2.0, 0.0),
//!     Point3::new(0.7, 1.2, 0.9),
//! ];
//! let tris = [[4, 0, 1], [4, 1, 2], [4, 2, 3], [4, 3, 0]];
//! let mut mesh = SurfaceMesh::new(&tris, positions, &[[1, 2]; 4]).unwrap();
//! let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
//!
//! let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();
//! assert_eq!(report.state, SolverState::Converged);
//! assert!((mesh.position(VertexId::new(4)) - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-8);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use nalgebra::{DVector, Point3};
use rayon::prelude::*;

use super::assemble::{assemble_level, AssembledRegion, LinearSystem, Region};
use super::classify::{JunctionKind, NodeClassification};
use super::Progress;
use crate::edge::{EdgeRecord, EdgeRegistry};
use crate::error::{MalformedMesh, Result, SmoothError};
use crate::mesh::{GrainPair, SurfaceMesh, VertexId};

/// One stage of the smoothing schedule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Level {
    /// Patch rims, smoothed along rim edges only.
    BoundaryCurves,
    /// Vertices strictly inside a patch.
    PatchInteriors,
}

impl Level {
    /// Short human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Level::BoundaryCurves => "boundary curves",
            Level::PatchInteriors => "patch interiors",
        }
    }

    /// Whether an edge couples vertices at this level.
    pub fn is_active(self, edge: &EdgeRecord) -> bool {
        match self {
            Level::BoundaryCurves => edge.is_patch_boundary(),
            Level::PatchInteriors => true,
        }
    }
}

/// Order in which vertex classes are released for smoothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HierarchyPolicy {
    /// Junctions and patch rims stay fixed; only patch interiors move.
    #[default]
    JunctionsFixed,
    /// Rim curves first (anchored at quad junctions), then patch interiors.
    CurvesThenPatches,
}

impl HierarchyPolicy {
    /// The levels run under this policy, in order.
    pub fn levels(self) -> &'static [Level] {
        match self {
            HierarchyPolicy::JunctionsFixed => &[Level::PatchInteriors],
            HierarchyPolicy::CurvesThenPatches => &[Level::BoundaryCurves, Level::PatchInteriors],
        }
    }
}

/// How each region's system is solved.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum SmoothingMode {
    /// Exact unweighted Laplacian solve: each free vertex lands on the
    /// centroid of its neighbours.
    #[default]
    Harmonic,
    /// Trade-off between the Laplacian and the input positions, tuned by a
    /// bisection search (see [`super::regularize`]).
    Regularized {
        /// Finite-difference step and stopping slope of the search.
        threshold: f64,
        /// Maximum number of bisection steps.
        max_search_iterations: usize,
    },
}

impl SmoothingMode {
    /// Regularised mode with the customary threshold `1e-4` and a budget of
    /// 2000 search steps.
    pub fn regularized() -> Self {
        SmoothingMode::Regularized {
            threshold: 1e-4,
            max_search_iterations: 2000,
        }
    }
}

/// Options for hierarchical smoothing.
#[derive(Debug, Clone)]
pub struct HierarchyOptions {
    /// Level schedule.
    pub policy: HierarchyPolicy,

    /// Solve mode for every region.
    pub mode: SmoothingMode,

    /// How many times each region is solved, each pass starting from the
    /// previous pass's output.
    pub passes: usize,

    /// Relative residual tolerance of the conjugate gradient solves.
    pub tolerance: f64,

    /// Iteration budget of each conjugate gradient solve.
    pub max_iterations: usize,

    /// Whether to solve independent regions in parallel (default: true).
    pub parallel: bool,
}

impl Default for HierarchyOptions {
    fn default() -> Self {
        Self {
            policy: HierarchyPolicy::default(),
            mode: SmoothingMode::default(),
            passes: 1,
            tolerance: 1e-10,
            max_iterations: 2000,
            parallel: true,
        }
    }
}

impl HierarchyOptions {
    /// Set the level schedule.
    pub fn with_policy(mut self, policy: HierarchyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the solve mode.
    pub fn with_mode(mut self, mode: SmoothingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of passes per region.
    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes;
        self
    }

    /// Set the solver tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the solver iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set whether to use parallel execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Check that every numeric option is usable.
    pub fn validate(&self) -> Result<()> {
        if self.passes == 0 {
            return Err(SmoothError::invalid_param("passes", self.passes, "must be at least 1"));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(SmoothError::invalid_param(
                "tolerance",
                self.tolerance,
                "must be positive and finite",
            ));
        }
        if self.max_iterations == 0 {
            return Err(SmoothError::invalid_param(
                "max_iterations",
                self.max_iterations,
                "must be at least 1",
            ));
        }
        if let SmoothingMode::Regularized {
            threshold,
            max_search_iterations,
        } = self.mode
        {
            if !(threshold > 0.0 && threshold < 0.5) {
                return Err(SmoothError::invalid_param(
                    "threshold",
                    threshold,
                    "must lie in (0, 0.5)",
                ));
            }
            if max_search_iterations == 0 {
                return Err(SmoothError::invalid_param(
                    "max_search_iterations",
                    max_search_iterations,
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

/// Where the solver is in its schedule.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SolverState {
    /// No level has run yet.
    Initialized,
    /// The level with this index (into [`HierarchyPolicy::levels`]) was the
    /// last one run.
    Smoothing {
        /// Index of the level.
        level: usize,
    },
    /// Every level ran and every vertex is smoothed.
    Converged,
    /// Every level ran but some regions failed; their vertices are not
    /// smoothed.
    Incomplete,
}

impl SolverState {
    /// Whether no further step will change anything.
    pub fn is_terminal(self) -> bool {
        matches!(self, SolverState::Converged | SolverState::Incomplete)
    }
}

/// A region that could not be smoothed.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionFailure {
    /// Level the region belonged to.
    pub level: Level,
    /// Patch the region lies on.
    pub patch: GrainPair,
    /// The region's free vertices, left untouched.
    pub vertices: Vec<VertexId>,
    /// Why the region failed.
    pub error: SmoothError,
}

/// Summary of one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelReport {
    /// Which level.
    pub level: Level,
    /// Number of free regions found.
    pub regions: usize,
    /// Vertices moved and marked smoothed.
    pub smoothed_vertices: usize,
    /// Regions that failed.
    pub failed_regions: usize,
}

/// Result of a smoothing run.
#[derive(Debug, Clone)]
pub struct SmoothReport {
    /// Final solver state.
    pub state: SolverState,
    /// One entry per level run.
    pub levels: Vec<LevelReport>,
    /// Every region that failed, in level order.
    pub failures: Vec<RegionFailure>,
    /// Final smoothed flag per vertex.
    pub is_smoothed: Vec<bool>,
}

/// Step-wise hierarchical smoother over a borrowed mesh.
///
/// Construct it, then call [`step`](Self::step) per level or
/// [`run`](Self::run) to reach a terminal state.
#[derive(Debug)]
pub struct HierarchicalSmoother<'m> {
    mesh: &'m mut SurfaceMesh,
    nodes: NodeClassification,
    options: HierarchyOptions,
    on_patch_boundary: Vec<bool>,
    smoothed: Vec<bool>,
    failed: Vec<bool>,
    state: SolverState,
    next_level: usize,
    levels: Vec<LevelReport>,
    failures: Vec<RegionFailure>,
}

impl<'m> HierarchicalSmoother<'m> {
    /// Prepare a run. Quad junctions start smoothed; everything else starts
    /// unsmoothed.
    ///
    /// # Errors
    /// [`SmoothError::InvalidParameter`] for bad options,
    /// [`MalformedMesh::VertexCountMismatch`] if the classification does not
    /// cover the mesh.
    pub fn new(
        mesh: &'m mut SurfaceMesh,
        nodes: NodeClassification,
        options: HierarchyOptions,
    ) -> Result<Self> {
        options.validate()?;
        if nodes.len() != mesh.num_vertices() {
            return Err(MalformedMesh::VertexCountMismatch {
                what: "node classification",
                expected: mesh.num_vertices(),
                found: nodes.len(),
            }
            .into());
        }

        let mut on_patch_boundary = vec![false; mesh.num_vertices()];
        let registry = EdgeRegistry::from_faces(&*mesh, mesh.face_ids());
        for (edge, record) in registry.iter() {
            if record.is_patch_boundary() {
                for v in edge.endpoints() {
                    on_patch_boundary[v.index()] = true;
                }
            }
        }

        let smoothed = nodes.initial_smoothed();
        let failed = vec![false; mesh.num_vertices()];

        Ok(Self {
            mesh,
            nodes,
            options,
            on_patch_boundary,
            smoothed,
            failed,
            state: SolverState::Initialized,
            next_level: 0,
            levels: Vec::new(),
            failures: Vec::new(),
        })
    }

    /// Override the initial smoothed flags, e.g. to resume a partial run.
    ///
    /// # Errors
    /// [`MalformedMesh::VertexCountMismatch`] on a length mismatch.
    pub fn with_smoothed(mut self, smoothed: Vec<bool>) -> Result<Self> {
        if smoothed.len() != self.mesh.num_vertices() {
            return Err(MalformedMesh::VertexCountMismatch {
                what: "smoothed flags",
                expected: self.mesh.num_vertices(),
                found: smoothed.len(),
            }
            .into());
        }
        self.smoothed = smoothed;
        Ok(self)
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Smoothed flag per vertex.
    #[inline]
    pub fn is_smoothed(&self) -> &[bool] {
        &self.smoothed
    }

    /// The classification driving the run.
    #[inline]
    pub fn nodes(&self) -> &NodeClassification {
        &self.nodes
    }

    /// The mesh being smoothed.
    #[inline]
    pub fn mesh(&self) -> &SurfaceMesh {
        &*self.mesh
    }

    /// Whether a vertex lies on the rim of some patch.
    #[inline]
    pub fn is_on_patch_boundary(&self, vertex: VertexId) -> bool {
        self.on_patch_boundary[vertex.index()]
    }

    /// Regions that failed so far.
    #[inline]
    pub fn failures(&self) -> &[RegionFailure] {
        &self.failures
    }

    /// Whether `vertex` may move at `level`.
    fn is_free(&self, level: Level, v: usize) -> bool {
        if self.smoothed[v] || self.failed[v] {
            return false;
        }
        let kind = self.nodes.types()[v].kind;
        match level {
            Level::BoundaryCurves => self.on_patch_boundary[v] && kind != JunctionKind::Quad,
            Level::PatchInteriors => !self.on_patch_boundary[v] && kind == JunctionKind::Interior,
        }
    }

    /// Run the next level and return the new state.
    pub fn step(&mut self) -> Result<SolverState> {
        self.step_with_progress(&Progress::none())
    }

    /// Run the next level, reporting per solved region.
    ///
    /// # Errors
    /// Only internal invariant violations ([`SmoothError::UnknownEdge`]) are
    /// returned; per-region failures are recorded and the run continues.
    pub fn step_with_progress(&mut self, progress: &Progress) -> Result<SolverState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let levels = self.options.policy.levels();
        if let Some(&level) = levels.get(self.next_level) {
            let report = self.smooth_level(level, self.next_level, levels.len(), progress)?;
            self.levels.push(report);
            self.state = SolverState::Smoothing {
                level: self.next_level,
            };
            self.next_level += 1;
        }

        if self.next_level >= levels.len() {
            self.finish();
        }
        Ok(self.state)
    }

    /// Step until a terminal state and return the report.
    pub fn run(&mut self) -> Result<SmoothReport> {
        self.run_with_progress(&Progress::none())
    }

    /// [`run`](Self::run) with progress reporting.
    pub fn run_with_progress(&mut self, progress: &Progress) -> Result<SmoothReport> {
        while !self.state.is_terminal() {
            self.step_with_progress(progress)?;
        }
        Ok(self.report())
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> SmoothReport {
        SmoothReport {
            state: self.state,
            levels: self.levels.clone(),
            failures: self.failures.clone(),
            is_smoothed: self.smoothed.clone(),
        }
    }

    fn smooth_level(
        &mut self,
        level: Level,
        index: usize,
        num_levels: usize,
        progress: &Progress,
    ) -> Result<LevelReport> {
        let n = self.mesh.num_vertices();
        // Rebuilt for every level so nothing carries over from the last one
        let registry = EdgeRegistry::from_faces(&*self.mesh, self.mesh.face_ids());
        let free: Vec<bool> = (0..n).map(|v| self.is_free(level, v)).collect();

        let assembled = assemble_level(&*self.mesh, &registry, |r| level.is_active(r), &free)?;
        let total = assembled.len();
        info!(
            "Smoothing {} ({} of {}): {} free vertices in {} regions",
            level.name(),
            index + 1,
            num_levels,
            free.iter().filter(|&&f| f).count(),
            total
        );

        let options = &self.options;
        let done = AtomicUsize::new(0);
        let solve = |assembled: AssembledRegion| {
            let AssembledRegion { region, system } = assembled;
            let outcome = system.and_then(|system| solve_region(system, &region, options));
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report_sub(finished, total, index, num_levels, level.name());
            (region, outcome)
        };

        let outcomes: Vec<(Region, Result<[DVector<f64>; 3]>)> = if options.parallel {
            assembled.into_par_iter().map(solve).collect()
        } else {
            assembled.into_iter().map(solve).collect()
        };

        let mut updates: Vec<(VertexId, Point3<f64>)> = Vec::new();
        let mut failed_regions = 0;
        for (region, outcome) in outcomes {
            match outcome {
                Ok([x, y, z]) => {
                    debug!(
                        "Smoothed {} vertices on patch {}",
                        region.vertices.len(),
                        region.patch
                    );
                    updates.extend(
                        region
                            .vertices
                            .iter()
                            .enumerate()
                            .map(|(i, &v)| (v, Point3::new(x[i], y[i], z[i]))),
                    );
                }
                Err(error) if error.is_region_local() => {
                    warn!("Skipping region on patch {}: {}", region.patch, error);
                    failed_regions += 1;
                    for v in &region.vertices {
                        self.failed[v.index()] = true;
                    }
                    self.failures.push(RegionFailure {
                        level,
                        patch: region.patch,
                        vertices: region.vertices,
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }

        let smoothed_vertices = updates.len();
        for &(v, _) in &updates {
            self.smoothed[v.index()] = true;
        }
        self.mesh.apply_positions(updates);

        Ok(LevelReport {
            level,
            regions: total,
            smoothed_vertices,
            failed_regions,
        })
    }

    /// Finalise every vertex outside a failed region.
    fn finish(&mut self) {
        for (smoothed, &failed) in self.smoothed.iter_mut().zip(&self.failed) {
            if !failed {
                *smoothed = true;
            }
        }
        self.state = if self.failures.is_empty() {
            SolverState::Converged
        } else {
            SolverState::Incomplete
        };
        info!(
            "Hierarchical smoothing finished: {:?} ({} failed regions)",
            self.state,
            self.failures.len()
        );
    }
}

/// Solve one region for the configured number of passes.
fn solve_region(
    mut system: LinearSystem,
    region: &Region,
    options: &HierarchyOptions,
) -> Result<[DVector<f64>; 3]> {
    let solve_once = |system: &LinearSystem| -> Result<[DVector<f64>; 3]> {
        match options.mode {
            SmoothingMode::Harmonic => {
                system.solve_harmonic(options.tolerance, options.max_iterations)
            }
            SmoothingMode::Regularized {
                threshold,
                max_search_iterations,
            } => {
                let solution = system.solve_regularized(
                    threshold,
                    max_search_iterations,
                    options.tolerance,
                    options.max_iterations,
                )?;
                if solution.exhausted {
                    warn!(
                        "Trade-off search on patch {} hit its budget of {} steps (eps = {:.4})",
                        region.patch, max_search_iterations, solution.eps
                    );
                }
                Ok(solution.positions)
            }
        }
    };

    let mut solved = solve_once(&system)?;
    for _ in 1..options.passes {
        system.set_initial(solved);
        solved = solve_once(&system)?;
    }
    Ok(solved)
}

/// Smooth `mesh` in place under `options` and report the outcome.
///
/// Convenience wrapper around [`HierarchicalSmoother`].
pub fn hierarchical_smooth(
    mesh: &mut SurfaceMesh,
    nodes: &NodeClassification,
    options: &HierarchyOptions,
) -> Result<SmoothReport> {
    HierarchicalSmoother::new(mesh, nodes.clone(), options.clone())?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    /// `n x n` grid of unit cells in the z = 0 plane, two triangles per cell,
    /// labelled by quadrant with the given grain pairs.
    fn grid_mesh(n: usize, quadrant_labels: [[i32; 2]; 4]) -> SurfaceMesh {
        let mut positions = Vec::with_capacity((n + 1) * (n + 1));
        for j in 0..=n {
            for i in 0..=n {
                positions.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }

        let mut faces = Vec::with_capacity(n * n * 2);
        let mut labels = Vec::with_capacity(n * n * 2);
        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                let v10 = v00 + 1;
                let v01 = v00 + (n + 1);
                let v11 = v01 + 1;
                let quadrant = usize::from(i >= n / 2) + 2 * usize::from(j >= n / 2);

                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
                labels.push(quadrant_labels[quadrant]);
                labels.push(quadrant_labels[quadrant]);
            }
        }

        SurfaceMesh::new(&faces, positions, &labels).unwrap()
    }

    fn vid(n: usize, i: usize, j: usize) -> VertexId {
        VertexId::new(j * (n + 1) + i)
    }

    /// Push every vertex that is not on a midline or the outer rim off its
    /// grid position.
    fn perturb_interiors(mesh: &mut SurfaceMesh, n: usize) {
        let half = n / 2;
        for j in 1..n {
            for i in 1..n {
                if i == half || j == half {
                    continue;
                }
                let p = &mut mesh.positions_mut()[vid(n, i, j).index()];
                p.x += 0.05 * ((i * 3 + j) % 4) as f64;
                p.y -= 0.04 * ((i + j * 5) % 3) as f64;
                p.z += 0.1 * ((i * 7 + j * 3) % 5) as f64;
            }
        }
    }

    fn distinct_quadrants() -> [[i32; 2]; 4] {
        [[1, 2], [1, 3], [1, 4], [1, 5]]
    }

    fn single_triangle() -> SurfaceMesh {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.3),
        ];
        SurfaceMesh::new(&[[0, 1, 2]], positions, &[[1, 2]]).unwrap()
    }

    fn closed_tetrahedron(offset: usize) -> (Vec<[usize; 3]>, Vec<Point3<f64>>) {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]]
            .into_iter()
            .map(|f: [usize; 3]| f.map(|v| v + offset))
            .collect();
        (faces, positions)
    }

    #[test]
    fn test_junctions_keep_their_positions() {
        let n = 6;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        perturb_interiors(&mut mesh, n);
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
        let before = mesh.positions().to_vec();

        let centre = vid(n, 3, 3);
        assert_eq!(nodes.node_type(centre).kind, JunctionKind::Quad);

        let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();
        assert_eq!(report.state, SolverState::Converged);

        for v in mesh.vertex_ids() {
            if nodes.node_type(v).is_junction() {
                assert_eq!(mesh.position(v), &before[v.index()], "junction {:?} moved", v);
            }
        }
        assert!(report.is_smoothed.iter().all(|&s| s));
    }

    #[test]
    fn test_triple_junction_is_fixed() {
        let n = 6;
        // Two quadrants share a patch, so three patches meet at the centre
        let mut mesh = grid_mesh(n, [[1, 2], [1, 3], [1, 4], [4, 1]]);
        perturb_interiors(&mut mesh, n);
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
        let centre = vid(n, 3, 3);
        assert_eq!(nodes.node_type(centre).kind, JunctionKind::Triple);
        let before = *mesh.position(centre);

        let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();
        assert_eq!(report.state, SolverState::Converged);
        assert_eq!(*mesh.position(centre), before);
    }

    #[test]
    fn test_interiors_restored_to_grid() {
        let n = 6;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        perturb_interiors(&mut mesh, n);
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();

        // Four quadrant regions of four free vertices each
        assert_eq!(report.levels.len(), 1);
        assert_eq!(report.levels[0].regions, 4);
        assert_eq!(report.levels[0].smoothed_vertices, 16);

        // Linear data is harmonic on this triangulation
        for j in 0..=n {
            for i in 0..=n {
                let p = mesh.position(vid(n, i, j));
                let expected = Point3::new(i as f64, j as f64, 0.0);
                assert!((p - expected).norm() < 1e-8, "({}, {}) at {:?}", i, j, p);
            }
        }
    }

    #[test]
    fn test_laplacian_residual_after_solve() {
        let n = 6;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        perturb_interiors(&mut mesh, n);
        // Lift one rim vertex so the solution is not a plane
        mesh.positions_mut()[vid(n, 1, 0).index()].z = 2.0;
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let mut smoother =
            HierarchicalSmoother::new(&mut mesh, nodes, HierarchyOptions::default()).unwrap();
        smoother.run().unwrap();

        let registry = EdgeRegistry::from_faces(smoother.mesh(), smoother.mesh().face_ids());
        let mut sum = vec![Vector3::zeros(); smoother.mesh().num_vertices()];
        let mut degree = vec![0.0; smoother.mesh().num_vertices()];
        for (edge, _) in registry.iter() {
            let [a, b] = edge.endpoints();
            sum[a.index()] += smoother.mesh().position(b).coords;
            sum[b.index()] += smoother.mesh().position(a).coords;
            degree[a.index()] += 1.0;
            degree[b.index()] += 1.0;
        }

        for v in smoother.mesh().vertex_ids() {
            if smoother.is_on_patch_boundary(v) {
                continue;
            }
            let residual = smoother.mesh().position(v).coords * degree[v.index()] - sum[v.index()];
            assert!(residual.norm() < 1e-7, "residual {} at {:?}", residual.norm(), v);
        }
    }

    #[test]
    fn test_centre_converges_to_neighbor_centroid() {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.4, 1.7, -0.6),
        ];
        let tris = [[4, 0, 1], [4, 1, 2], [4, 2, 3], [4, 3, 0]];
        let mut mesh = SurfaceMesh::new(&tris, positions, &[[1, 2]; 4]).unwrap();
        let nodes = NodeClassification::from_codes(&mesh, &[4, 4, 4, 4, 2]).unwrap();

        let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();

        assert_eq!(report.state, SolverState::Converged);
        let centre = mesh.position(VertexId::new(4));
        assert!((centre - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-10);
    }

    #[test]
    fn test_all_junction_triangle_converges_immediately() {
        let mut mesh = single_triangle();
        let before = mesh.positions().to_vec();
        let nodes = NodeClassification::from_codes(&mesh, &[3, 4, 13]).unwrap();

        let mut smoother =
            HierarchicalSmoother::new(&mut mesh, nodes, HierarchyOptions::default()).unwrap();
        assert_eq!(smoother.state(), SolverState::Initialized);
        assert_eq!(smoother.is_smoothed(), &[false, true, false]);

        assert_eq!(smoother.step().unwrap(), SolverState::Converged);
        let report = smoother.report();
        assert_eq!(report.levels[0].regions, 0);
        assert_eq!(report.is_smoothed, vec![true; 3]);
        assert_eq!(mesh.positions(), &before[..]);
    }

    #[test]
    fn test_underconstrained_region_reported() {
        let (faces, positions) = closed_tetrahedron(0);
        let mut mesh = SurfaceMesh::new(&faces, positions, &[[1, 2]; 4]).unwrap();
        let before = mesh.positions().to_vec();
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let report = hierarchical_smooth(&mut mesh, &nodes, &HierarchyOptions::default()).unwrap();

        assert_eq!(report.state, SolverState::Incomplete);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.level, Level::PatchInteriors);
        assert_eq!(failure.patch, GrainPair::new(1, 2).unwrap());
        assert_eq!(
            failure.error,
            SmoothError::UnderconstrainedRegion {
                patch: GrainPair::new(1, 2).unwrap(),
                vertex: VertexId::new(0),
                size: 4,
            }
        );
        assert!(report.is_smoothed.iter().all(|&s| !s));
        assert_eq!(mesh.positions(), &before[..]);
    }

    #[test]
    fn test_failed_patch_does_not_block_others() {
        // A closed patch and an open square patch in one mesh
        let (mut faces, mut positions) = closed_tetrahedron(0);
        let mut labels = vec![[7, 8]; 4];
        positions.extend([
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(12.0, 0.0, 0.0),
            Point3::new(12.0, 2.0, 0.0),
            Point3::new(10.0, 2.0, 0.0),
            Point3::new(10.5, 1.5, 1.0),
        ]);
        faces.extend([[8, 4, 5], [8, 5, 6], [8, 6, 7], [8, 7, 4]]);
        labels.extend([[1, 2]; 4]);
        let mut mesh = SurfaceMesh::new(&faces, positions, &labels).unwrap();
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let options = HierarchyOptions::default().sequential();
        let report = hierarchical_smooth(&mut mesh, &nodes, &options).unwrap();

        assert_eq!(report.state, SolverState::Incomplete);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].patch, GrainPair::new(7, 8).unwrap());
        assert_eq!(report.levels[0].smoothed_vertices, 1);

        let centre = mesh.position(VertexId::new(8));
        assert!((centre - Point3::new(11.0, 1.0, 0.0)).norm() < 1e-10);
        assert!(report.is_smoothed[8]);
        assert!(!report.is_smoothed[0]);
    }

    #[test]
    fn test_failed_curve_stays_fixed_for_interiors() {
        // One open patch without junctions: its rim is a closed loop with
        // nothing to anchor it
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.4, 1.7, -0.6),
        ];
        let tris = [[4, 0, 1], [4, 1, 2], [4, 2, 3], [4, 3, 0]];
        let mut mesh = SurfaceMesh::new(&tris, positions, &[[1, 2]; 4]).unwrap();
        let before = mesh.positions().to_vec();
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let options = HierarchyOptions::default().with_policy(HierarchyPolicy::CurvesThenPatches);
        let report = hierarchical_smooth(&mut mesh, &nodes, &options).unwrap();

        assert_eq!(report.state, SolverState::Incomplete);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.level, Level::BoundaryCurves);
        assert_eq!(failure.vertices, (0..4).map(VertexId::new).collect::<Vec<_>>());
        assert!(matches!(failure.error, SmoothError::UnderconstrainedRegion { size: 4, .. }));

        assert_eq!(report.levels[1].smoothed_vertices, 1);
        assert_eq!(report.is_smoothed, vec![false, false, false, false, true]);
        assert_eq!(&mesh.positions()[..4], &before[..4]);
        let centre = mesh.position(VertexId::new(4));
        assert!((centre - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-10);
    }

    #[test]
    fn test_exhausted_solver_budget_is_a_region_failure() {
        let n = 6;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        // Only one free vertex of the first quadrant is off the grid
        mesh.positions_mut()[vid(n, 1, 1).index()].x += 0.3;
        let before = mesh.positions().to_vec();
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let options = HierarchyOptions::default().with_max_iterations(1);
        let report = hierarchical_smooth(&mut mesh, &nodes, &options).unwrap();

        assert_eq!(report.state, SolverState::Incomplete);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.patch, GrainPair::new(1, 2).unwrap());
        assert_eq!(failure.error, SmoothError::ConvergenceFailed { iterations: 1 });
        assert_eq!(
            failure.vertices,
            vec![vid(n, 1, 1), vid(n, 2, 1), vid(n, 1, 2), vid(n, 2, 2)]
        );

        // The failed region is left as it was; the other quadrants finish
        assert_eq!(report.levels[0].failed_regions, 1);
        assert_eq!(report.levels[0].smoothed_vertices, 12);
        for v in &failure.vertices {
            assert!(!report.is_smoothed[v.index()]);
            assert_eq!(mesh.position(*v), &before[v.index()]);
        }
    }

    #[test]
    fn test_curves_then_patches() {
        let n = 4;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        // Quad junctions at the centre, the grid corners and the rim midpoints
        let mut codes = vec![2u8; mesh.num_vertices()];
        for j in 0..=n {
            for i in 0..=n {
                let on_rim = i == 0 || j == 0 || i == n || j == n;
                let anchor = (i % 2 == 0) && (j % 2 == 0);
                codes[vid(n, i, j).index()] = match (on_rim, anchor) {
                    (true, true) => 14,
                    (true, false) => 12,
                    (false, true) => 4,
                    (false, false) => 2,
                };
            }
        }
        let nodes = NodeClassification::from_codes(&mesh, &codes).unwrap();

        // Bend a triple-line point, a rim point and a patch interior point
        mesh.positions_mut()[vid(n, 2, 1).index()].x += 0.3;
        mesh.positions_mut()[vid(n, 1, 0).index()].z += 0.5;
        mesh.positions_mut()[vid(n, 3, 3).index()].z -= 0.4;
        let before = mesh.positions().to_vec();

        let options = HierarchyOptions::default()
            .with_policy(HierarchyPolicy::CurvesThenPatches)
            .sequential();
        let mut smoother = HierarchicalSmoother::new(&mut mesh, nodes.clone(), options).unwrap();

        assert_eq!(smoother.step().unwrap(), SolverState::Smoothing { level: 0 });
        // Every rim vertex except the anchors is done after the curve level
        for v in smoother.mesh().vertex_ids() {
            if smoother.is_on_patch_boundary(v) {
                assert!(smoother.is_smoothed()[v.index()], "{:?} not smoothed", v);
            }
        }
        assert!(!smoother.is_smoothed()[vid(n, 1, 1).index()]);

        assert_eq!(smoother.step().unwrap(), SolverState::Converged);
        let report = smoother.report();
        assert_eq!(report.levels.len(), 2);
        assert_eq!(report.levels[0].level, Level::BoundaryCurves);
        assert_eq!(report.levels[1].regions, 4);

        for j in 0..=n {
            for i in 0..=n {
                let v = vid(n, i, j);
                let p = mesh.position(v);
                assert!((p - Point3::new(i as f64, j as f64, 0.0)).norm() < 1e-8);
                if nodes.node_type(v).kind == JunctionKind::Quad {
                    assert_eq!(p, &before[v.index()]);
                }
            }
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let n = 8;
        let mut parallel = grid_mesh(n, distinct_quadrants());
        perturb_interiors(&mut parallel, n);
        parallel.positions_mut()[vid(n, 2, 0).index()].z = 1.5;
        let mut sequential = parallel.clone();
        let nodes = NodeClassification::classify(&parallel, |_| false).unwrap();

        hierarchical_smooth(&mut parallel, &nodes, &HierarchyOptions::default()).unwrap();
        hierarchical_smooth(&mut sequential, &nodes, &HierarchyOptions::default().sequential())
            .unwrap();

        for (a, b) in parallel.positions().iter().zip(sequential.positions()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_regularized_mode_reduces_noise() {
        let n = 6;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        perturb_interiors(&mut mesh, n);
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
        let before = mesh.positions().to_vec();
        let height = |points: &[Point3<f64>]| points.iter().map(|p| p.z * p.z).sum::<f64>();

        let options = HierarchyOptions::default()
            .with_mode(SmoothingMode::Regularized {
                threshold: 1e-4,
                max_search_iterations: 40,
            })
            .with_passes(2);
        let report = hierarchical_smooth(&mut mesh, &nodes, &options).unwrap();

        assert_eq!(report.state, SolverState::Converged);
        assert!(height(mesh.positions()) < height(&before));
        for v in mesh.vertex_ids() {
            if nodes.node_type(v).is_junction() {
                assert_eq!(mesh.position(v), &before[v.index()]);
            }
        }
    }

    #[test]
    fn test_progress_reaches_end_of_level() {
        use std::sync::{Arc, Mutex};

        let n = 6;
        let mut mesh = grid_mesh(n, distinct_quadrants());
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Progress::new(move |current, total, _| {
            sink.lock().unwrap().push((current, total));
        });

        let mut smoother =
            HierarchicalSmoother::new(&mut mesh, nodes, HierarchyOptions::default()).unwrap();
        smoother.run_with_progress(&progress).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.contains(&(1000, 1000)));
    }

    #[test]
    fn test_option_validation() {
        let mut mesh = single_triangle();
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        for options in [
            HierarchyOptions::default().with_passes(0),
            HierarchyOptions::default().with_tolerance(0.0),
            HierarchyOptions::default().with_max_iterations(0),
            HierarchyOptions::default().with_mode(SmoothingMode::Regularized {
                threshold: 0.0,
                max_search_iterations: 10,
            }),
        ] {
            let err = hierarchical_smooth(&mut mesh, &nodes, &options).unwrap_err();
            assert!(matches!(err, SmoothError::InvalidParameter { .. }), "{:?}", err);
        }
        assert!(HierarchyOptions::default()
            .with_mode(SmoothingMode::regularized())
            .validate()
            .is_ok());
    }

    #[test]
    fn test_classification_must_cover_mesh() {
        let mut mesh = single_triangle();
        let other = grid_mesh(2, distinct_quadrants());
        let nodes = NodeClassification::classify(&other, |_| false).unwrap();

        let err = HierarchicalSmoother::new(&mut mesh, nodes, HierarchyOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SmoothError::MalformedMesh(MalformedMesh::VertexCountMismatch { .. })
        ));
    }

    #[test]
    fn test_resume_with_smoothed_flags() {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.4, 1.7, -0.6),
        ];
        let tris = [[4, 0, 1], [4, 1, 2], [4, 2, 3], [4, 3, 0]];
        let mut mesh = SurfaceMesh::new(&tris, positions, &[[1, 2]; 4]).unwrap();
        let nodes = NodeClassification::classify(&mesh, |_| false).unwrap();

        let mut smoother = HierarchicalSmoother::new(&mut mesh, nodes, HierarchyOptions::default())
            .unwrap()
            .with_smoothed(vec![false, false, false, false, true])
            .unwrap();
        let report = smoother.run().unwrap();

        // The centre was already final, so nothing moves
        assert_eq!(report.levels[0].regions, 0);
        assert_eq!(*mesh.position(VertexId::new(4)), Point3::new(0.4, 1.7, -0.6));
    }
}
