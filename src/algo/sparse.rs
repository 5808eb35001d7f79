//! Sparse matrices and a conjugate gradient solver.
//!
//! Matrices are accumulated as `(row, col, value)` triplets in a
//! [`TripletBuilder`] and compacted once into a [`CsrMatrix`]. Solves go
//! through the [`LinearOperator`] trait so that composite operators (such as
//! a regularised normal-equation operator) never need to be materialised.

use nalgebra::DVector;

use crate::error::{Result, SmoothError};

/// A square linear map that can be applied to a vector.
pub trait LinearOperator: Sync {
    /// Dimension of the (square) operator.
    fn dim(&self) -> usize;

    /// Compute `A * x`.
    fn apply(&self, x: &DVector<f64>) -> DVector<f64>;
}

/// Accumulates matrix entries in any order before compaction.
#[derive(Debug, Clone)]
pub struct TripletBuilder {
    rows: usize,
    cols: usize,
    triplets: Vec<(usize, usize, f64)>,
}

impl TripletBuilder {
    /// Start an empty `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            triplets: Vec::new(),
        }
    }

    /// Start an empty matrix with room for `nnz` triplets.
    pub fn with_capacity(rows: usize, cols: usize, nnz: usize) -> Self {
        Self {
            rows,
            cols,
            triplets: Vec::with_capacity(nnz),
        }
    }

    /// Add `value` at `(row, col)`. Repeated positions are summed on build.
    #[inline]
    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows && col < self.cols, "triplet out of bounds");
        self.triplets.push((row, col, value));
    }

    /// Number of triplets pushed so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    /// Whether no triplet has been pushed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Compact the triplets into a CSR matrix.
    pub fn build(self) -> CsrMatrix {
        CsrMatrix::from_triplets(self.rows, self.cols, self.triplets)
    }
}

/// Compressed Sparse Row (CSR) matrix.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    /// row_ptr[i] is where row i starts in col_idx/values; row_ptr[rows] = nnz.
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Create a CSR matrix from triplets (row, col, value).
    ///
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(rows: usize, cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        if triplets.is_empty() {
            return Self {
                rows,
                cols,
                row_ptr: vec![0; rows + 1],
                col_idx: Vec::new(),
                values: Vec::new(),
            };
        }

        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());

        let mut prev_row = usize::MAX;
        let mut prev_col = usize::MAX;

        for (row, col, val) in triplets {
            match values.last_mut() {
                Some(last) if row == prev_row && col == prev_col => *last += val,
                _ => {
                    col_idx.push(col);
                    values.push(val);
                    // Rows skipped since the previous entry start here too
                    for r in (prev_row.wrapping_add(1))..=row {
                        row_ptr[r] = col_idx.len() - 1;
                    }
                    prev_row = row;
                    prev_col = col;
                }
            }
        }

        let nnz = col_idx.len();
        for r in (prev_row + 1)..=rows {
            row_ptr[r] = nnz;
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Get the number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Get the number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Get the number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Stored entries of one row as `(col, value)`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Value at `(i, j)`, zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.row(i).find(|&(c, _)| c == j).map_or(0.0, |(_, v)| v)
    }

    /// Multiply matrix by vector: y = A * x.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.cols, "Vector dimension mismatch");

        let mut y = DVector::zeros(self.rows);
        for i in 0..self.rows {
            let mut sum = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[i] = sum;
        }
        y
    }
}

impl LinearOperator for CsrMatrix {
    #[inline]
    fn dim(&self) -> usize {
        debug_assert_eq!(self.rows, self.cols, "operator must be square");
        self.rows
    }

    #[inline]
    fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
        self.mul_vec(x)
    }
}

/// Solve A*x = b using the Conjugate Gradient method.
///
/// Requires A to be symmetric positive definite.
///
/// # Arguments
///
/// * `a` - The system operator (must be symmetric positive definite)
/// * `b` - The right-hand side vector
/// * `x0` - Optional initial guess (zeros if None)
/// * `max_iter` - Maximum number of iterations
/// * `tolerance` - Convergence tolerance (relative residual norm)
///
/// # Errors
///
/// [`SmoothError::ConvergenceFailed`] if the tolerance is not reached within
/// `max_iter` iterations.
pub fn conjugate_gradient<A: LinearOperator + ?Sized>(
    a: &A,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    max_iter: usize,
    tolerance: f64,
) -> Result<DVector<f64>> {
    let n = b.len();
    assert_eq!(a.dim(), n, "Operator-vector dimension mismatch");

    // SPD operator with zero right-hand side has the zero solution
    let b_norm = b.norm();
    if b_norm < 1e-15 {
        return Ok(DVector::zeros(n));
    }

    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => DVector::zeros(n),
    };

    let mut r = b - a.apply(&x);
    let mut r_norm_sq = r.dot(&r);
    if r_norm_sq.sqrt() / b_norm < tolerance {
        return Ok(x);
    }

    let mut p = r.clone();

    for _iter in 0..max_iter {
        let ap = a.apply(&p);

        let p_ap = p.dot(&ap);
        if p_ap.abs() < 1e-300 {
            break;
        }
        let alpha = r_norm_sq / p_ap;

        x += alpha * &p;
        r -= alpha * &ap;

        let new_r_norm_sq = r.dot(&r);
        if new_r_norm_sq.sqrt() / b_norm < tolerance {
            return Ok(x);
        }

        let beta = new_r_norm_sq / r_norm_sq;
        p = &r + beta * &p;
        r_norm_sq = new_r_norm_sq;
    }

    Err(SmoothError::ConvergenceFailed {
        iterations: max_iter,
    })
}
