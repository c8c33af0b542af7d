// Locally owned rows of an incomplete factor, stored CSR-style with fill levels.

use crate::core::traits::{PartialFactor, RowView};
use crate::error::XError;
use crate::matrix::{CsrMatrix, SparseMatrix};

/// Rows `first_row..first_row + nrows()` of a factor. Columns are global
/// and kept sorted within each row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalFactor {
    first_row: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    fill: Vec<u32>,
    vals: Vec<f64>,
}

impl LocalFactor {
    pub fn new(first_row: usize) -> Self {
        LocalFactor { first_row, row_ptr: vec![0], cols: Vec::new(), fill: Vec::new(), vals: Vec::new() }
    }

    /// Unfactored copy of local rows: level 0 everywhere.
    pub fn from_csr(first_row: usize, a: &CsrMatrix<f64>) -> Result<Self, XError> {
        let mut f = LocalFactor::new(first_row);
        for i in 0..a.nrows() {
            let (cols, vals) = a.row(i);
            f.push_row(cols, &vec![0; cols.len()], vals)?;
        }
        Ok(f)
    }

    /// Append the next row. Entries are sorted by column; duplicates are rejected.
    pub fn push_row(&mut self, cols: &[usize], fill: &[u32], vals: &[f64]) -> Result<(), XError> {
        if fill.len() != cols.len() || vals.len() != cols.len() {
            return Err(XError::Shape(format!(
                "row has {} columns, {} fill levels and {} values",
                cols.len(),
                fill.len(),
                vals.len()
            )));
        }
        let mut order: Vec<usize> = (0..cols.len()).collect();
        order.sort_unstable_by_key(|&k| cols[k]);
        if order.windows(2).any(|w| cols[w[0]] == cols[w[1]]) {
            return Err(XError::Shape(format!("duplicate column in row {}", self.first_row + self.nrows())));
        }
        self.cols.extend(order.iter().map(|&k| cols[k]));
        self.fill.extend(order.iter().map(|&k| fill[k]));
        self.vals.extend(order.iter().map(|&k| vals[k]));
        self.row_ptr.push(self.cols.len());
        Ok(())
    }

    pub fn first_row(&self) -> usize {
        self.first_row
    }

    pub fn nrows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn nnz(&self) -> usize {
        self.cols.len()
    }

    /// Whole stored row, lower and upper parts.
    pub fn row(&self, global_row: usize) -> Option<RowView<'_>> {
        let i = global_row.checked_sub(self.first_row)?;
        if i >= self.nrows() {
            return None;
        }
        let r = self.row_ptr[i]..self.row_ptr[i + 1];
        Some(RowView { cols: &self.cols[r.clone()], fill: &self.fill[r.clone()], vals: &self.vals[r] })
    }
}

impl PartialFactor for LocalFactor {
    fn upper_row(&self, global_row: usize) -> Option<RowView<'_>> {
        let row = self.row(global_row)?;
        let start = row.cols.partition_point(|&c| c < global_row);
        Some(RowView { cols: &row.cols[start..], fill: &row.fill[start..], vals: &row.vals[start..] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_part_starts_at_diagonal() {
        let mut f = LocalFactor::new(4);
        f.push_row(&[6, 1, 4], &[0, 1, 0], &[3.0, 1.0, 2.0]).unwrap();
        f.push_row(&[2], &[0], &[9.0]).unwrap();
        let u = f.upper_row(4).unwrap();
        assert_eq!(u.cols, &[4, 6]);
        assert_eq!(u.fill, &[0, 0]);
        assert_eq!(u.vals, &[2.0, 3.0]);
        // row 5 has nothing on or right of the diagonal
        assert!(f.upper_row(5).unwrap().is_empty());
        assert!(f.upper_row(3).is_none());
        assert!(f.upper_row(6).is_none());
    }

    #[test]
    fn rejects_ragged_and_duplicate_rows() {
        let mut f = LocalFactor::new(0);
        assert!(f.push_row(&[0, 1], &[0], &[1.0, 2.0]).is_err());
        assert!(f.push_row(&[1, 1], &[0, 0], &[1.0, 2.0]).is_err());
        assert_eq!(f.nrows(), 0);
    }

    #[test]
    fn from_csr_has_level_zero() {
        let a = CsrMatrix::from_csr(2, 4, vec![0, 2, 3], vec![2, 3, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let f = LocalFactor::from_csr(2, &a).unwrap();
        assert_eq!(f.nnz(), 3);
        assert!(f.row(3).unwrap().fill.iter().all(|&l| l == 0));
    }
}
