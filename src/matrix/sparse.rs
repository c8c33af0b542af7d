// Scalar CSR matrix, the interchange format for block matrices.

use faer::sparse::{SparseRowMat, SymbolicSparseRowMat};
use faer::traits::ComplexField;

use crate::error::XError;

/// A read‐only sparse matrix supporting y = A * x.
pub trait SparseMatrix<T> {
    /// Number of rows.
    fn nrows(&self) -> usize;
    /// Number of columns.
    fn ncols(&self) -> usize;
    /// Compute y = A * x.  `x.len() == ncols()`, `y.len() == nrows()`.
    fn spmv(&self, x: &[T], y: &mut [T]);
}

/// 0-based compressed sparse row matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: Copy> CsrMatrix<T> {
    /// Build a CSR from raw row‐ptr, col‐idx, and values.
    ///
    /// Checks `row_ptr.len() == nrows + 1`, monotone offsets starting at zero,
    /// matching `col_idx`/`values` lengths and column bounds.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, XError> {
        if row_ptr.len() != nrows + 1 {
            return Err(XError::Shape(format!(
                "row_ptr has {} entries for {nrows} rows",
                row_ptr.len()
            )));
        }
        if row_ptr[0] != 0 || row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(XError::shape("row_ptr must start at 0 and be non-decreasing"));
        }
        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz || values.len() != nnz {
            return Err(XError::Shape(format!(
                "expected {nnz} nonzeros, got {} column indices and {} values",
                col_idx.len(),
                values.len()
            )));
        }
        if let Some(&bad) = col_idx.iter().find(|&&c| c >= ncols) {
            return Err(XError::Shape(format!("column index {bad} out of range for {ncols} columns")));
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
        (&self.col_idx[s..e], &self.values[s..e])
    }

    /// Split into `(row_ptr, col_idx, values)`.
    pub fn into_parts(self) -> (Vec<usize>, Vec<usize>, Vec<T>) {
        (self.row_ptr, self.col_idx, self.values)
    }
}

impl<T: ComplexField + Copy> CsrMatrix<T> {
    /// Copy into faer's owning CSR type.
    pub fn to_faer(&self) -> SparseRowMat<usize, T> {
        // Structure was validated at construction; columns may be unsorted.
        let symbolic = SymbolicSparseRowMat::new_unsorted_checked(
            self.nrows,
            self.ncols,
            self.row_ptr.clone(),
            None,
            self.col_idx.clone(),
        );
        SparseRowMat::new(symbolic, self.values.clone())
    }

    pub fn to_dense(&self) -> faer::Mat<T> {
        self.to_faer().to_dense()
    }
}

impl<T: Copy + num_traits::Num> SparseMatrix<T> for CsrMatrix<T> {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
    fn spmv(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        for (i, yi) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *yi = cols
                .iter()
                .zip(vals)
                .fold(T::zero(), |acc, (&j, &v)| acc + v * x[j]);
        }
    }
}
