//! Smoothing algorithms.
//!
//! - **Classification**: node types from patch incidence, or from imported codes
//! - **Assembly**: free regions and their Laplacian systems per level
//! - **Solvers**: CSR matrices and conjugate gradient, plus the regularised
//!   trade-off search
//! - **Hierarchy**: the level schedule that drives everything above

pub mod assemble;
pub mod classify;
pub mod hierarchy;
pub mod progress;
pub mod regularize;
pub mod sparse;

pub use classify::{JunctionKind, NodeClassification, NodeType, Placement};
pub use hierarchy::{
    hierarchical_smooth, HierarchicalSmoother, HierarchyOptions, HierarchyPolicy, Level,
    LevelReport, RegionFailure, SmoothReport, SmoothingMode, SolverState,
};
pub use progress::Progress;
