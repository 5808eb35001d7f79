//! Fidelity-regularised Laplacian smoothing.
//!
//! Instead of solving the Laplacian system exactly, this mode balances
//! staying close to the input positions `y0` against satisfying it:
//!
//! ```text
//! minimise (1 - eps) |y - y0|^2 + eps |L y - b|^2
//! => ((1 - eps) I + eps L^T L) y = (1 - eps) y0 + eps L^T b
//! ```
//!
//! `L` is symmetric, so the normal operator is applied as `L (L x)` without
//! forming `L^T L`. The trade-off `eps` is picked by bisection on the slope
//! of `f(eps) = |D y(eps) - S0|`, where `D` holds the vertex degrees and
//! `S0` the summed input positions of each vertex's neighbours. The search
//! stops once the slope magnitude drops to the threshold.

use nalgebra::DVector;

use super::assemble::LinearSystem;
use super::sparse::{conjugate_gradient, CsrMatrix, LinearOperator};
use crate::error::Result;

/// `(1 - eps) I + eps L L` for a symmetric `L`.
pub struct RegularizedOperator<'a> {
    laplacian: &'a CsrMatrix,
    eps: f64,
}

impl<'a> RegularizedOperator<'a> {
    /// Wrap a symmetric Laplacian with trade-off `eps` in `[0, 1]`.
    pub fn new(laplacian: &'a CsrMatrix, eps: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&eps));
        Self { laplacian, eps }
    }
}

impl LinearOperator for RegularizedOperator<'_> {
    fn dim(&self) -> usize {
        self.laplacian.nrows()
    }

    fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
        let lx = self.laplacian.mul_vec(x);
        (1.0 - self.eps) * x + self.eps * self.laplacian.mul_vec(&lx)
    }
}

/// Outcome of a regularised solve.
#[derive(Debug, Clone)]
pub struct RegularizedSolution {
    /// Solved positions per axis.
    pub positions: [DVector<f64>; 3],
    /// Trade-off the search settled on.
    pub eps: f64,
    /// Objective value at `eps`.
    pub objective: f64,
    /// Bisection steps taken.
    pub iterations: usize,
    /// Whether the search stopped on its step budget rather than the
    /// slope threshold.
    pub exhausted: bool,
}

impl LinearSystem {
    /// Solve all three axes for one trade-off value and evaluate the
    /// objective.
    pub fn solve_with_tradeoff(
        &self,
        eps: f64,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<(f64, [DVector<f64>; 3])> {
        let eps = eps.clamp(0.0, 1.0);
        let op = RegularizedOperator::new(self.matrix(), eps);

        let mut objective_sq = 0.0;
        let mut solve = |axis: usize| -> Result<DVector<f64>> {
            let y0 = self.initial(axis);
            let b = (1.0 - eps) * y0 + eps * self.matrix().mul_vec(self.rhs(axis));
            let y = conjugate_gradient(&op, &b, Some(y0), max_iterations, tolerance)?;
            let deviation = self.degree().component_mul(&y) - self.initial_neighbor_sum(axis);
            objective_sq += deviation.norm_squared();
            Ok(y)
        };
        let positions = [solve(0)?, solve(1)?, solve(2)?];

        Ok((objective_sq.sqrt(), positions))
    }

    /// Objective, positions and finite-difference slope at `eps`.
    ///
    /// Steps backwards when a forward step would leave `[0, 1]`.
    fn objective_slope(
        &self,
        eps: f64,
        step: f64,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<(f64, [DVector<f64>; 3], f64)> {
        let (objective, positions) = self.solve_with_tradeoff(eps, tolerance, max_iterations)?;
        let h = if eps + step <= 1.0 { step } else { -step };
        let (other, _) = self.solve_with_tradeoff(eps + h, tolerance, max_iterations)?;
        Ok((objective, positions, (other - objective) / h))
    }

    /// Regularised solve with the bisection search on `eps`.
    ///
    /// `threshold` is both the finite-difference step and the slope at
    /// which the search stops; `max_search_iterations` bounds the number of
    /// bisection steps.
    pub fn solve_regularized(
        &self,
        threshold: f64,
        max_search_iterations: usize,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<RegularizedSolution> {
        let mut eps = 0.5;
        let mut step = eps / 2.0;
        let mut iterations = 1;

        let (mut objective, mut positions, mut slope) =
            self.objective_slope(eps, threshold, tolerance, max_iterations)?;

        while slope.abs() > threshold && iterations < max_search_iterations {
            if slope > 0.0 {
                eps -= step;
            } else {
                eps += step;
            }
            step /= 2.0;

            (objective, positions, slope) =
                self.objective_slope(eps, threshold, tolerance, max_iterations)?;
            iterations += 1;
        }

        Ok(RegularizedSolution {
            positions,
            eps,
            objective,
            iterations,
            exhausted: slope.abs() > threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::assemble::assemble_level;
    use crate::edge::EdgeRegistry;
    use crate::mesh::SurfaceMesh;
    use nalgebra::Point3;

    /// Fan of four triangles around a free centre vertex raised above the
    /// plane of its fixed neighbours.
    fn raised_centre_system() -> LinearSystem {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
        ];
        let tris = [[4, 0, 1], [4, 1, 2], [4, 2, 3], [4, 3, 0]];
        let mesh = SurfaceMesh::new(&tris, positions, &[[1, 2]; 4]).unwrap();
        let registry = EdgeRegistry::from_faces(&mesh, mesh.face_ids());
        let free = [false, false, false, false, true];
        let mut regions = assemble_level(&mesh, &registry, |_| true, &free).unwrap();
        regions.remove(0).system.unwrap()
    }

    #[test]
    fn test_operator_endpoints() {
        let system = raised_centre_system();
        let x = DVector::from_vec(vec![2.0]);

        let identity = RegularizedOperator::new(system.matrix(), 0.0);
        assert_eq!(identity.apply(&x)[0], 2.0);

        // L = [4], so L L x = 32
        let normal = RegularizedOperator::new(system.matrix(), 1.0);
        assert_eq!(normal.apply(&x)[0], 32.0);
    }

    #[test]
    fn test_tradeoff_interpolates() {
        let system = raised_centre_system();

        let (_, keep) = system.solve_with_tradeoff(0.0, 1e-12, 100).unwrap();
        assert!((keep[2][0] - 1.0).abs() < 1e-10);

        let (objective, flat) = system.solve_with_tradeoff(1.0, 1e-12, 100).unwrap();
        assert!(flat[2][0].abs() < 1e-10);
        assert!(objective < 1e-9);

        // Intermediate trade-off: z = 0.5 / (0.5 + 0.5 * 16)
        let (_, mid) = system.solve_with_tradeoff(0.5, 1e-12, 100).unwrap();
        assert!((mid[2][0] - 0.5 / 8.5).abs() < 1e-10);
        assert!((mid[0][0] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_search_flattens_raised_vertex() {
        let system = raised_centre_system();
        let solution = system.solve_regularized(1e-4, 20, 1e-12, 100).unwrap();

        // The objective keeps falling towards eps = 1, so the budget runs out
        assert!(solution.exhausted);
        assert_eq!(solution.iterations, 20);
        assert!(solution.eps > 0.5 && solution.eps < 1.0);

        let z = solution.positions[2][0];
        assert!(z > 0.0 && z < 0.01, "raised vertex should settle near the plane, z = {}", z);
        // x and y already sit at the neighbour centroid
        assert!((solution.positions[0][0] - 1.0).abs() < 1e-8);
        assert!((solution.positions[1][0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_slope_near_upper_end_steps_backwards() {
        // Objective is 4 (1 - eps) / (1 + 15 eps); a forward step from 0.75
        // would clamp at 1 and understate the slope
        let system = raised_centre_system();
        let solution = system.solve_regularized(0.3, 3, 1e-12, 100).unwrap();

        assert_eq!(solution.iterations, 3);
        assert_eq!(solution.eps, 0.875);
        assert!(solution.exhausted);
        assert!((solution.objective - 0.5 / 14.125).abs() < 1e-9);
    }
}
