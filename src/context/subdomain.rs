//! Contiguous row partition seen from one rank.
//!
//! Rows `row_starts[p]..row_starts[p + 1]` belong to rank `p`. Neighbours
//! are split into lower- and higher-ranked sets; boundary rows are the
//! locally owned rows that couple to another rank.

use std::collections::BTreeSet;

use crate::core::traits::SubdomainPartition;
use crate::error::XError;
use crate::matrix::{CsrMatrix, SparseMatrix};

#[derive(Debug, Clone, PartialEq)]
pub struct SubdomainGraph {
    row_starts: Vec<usize>,
    rank: usize,
    lo: Vec<usize>,
    hi: Vec<usize>,
    boundary: Vec<usize>,
}

impl SubdomainGraph {
    /// Build from explicit neighbour and boundary lists.
    ///
    /// `lo` must hold ranks below `rank`, `hi` ranks above it, and
    /// `boundary` rows owned by `rank`. All three are sorted and deduplicated.
    pub fn new(
        row_starts: Vec<usize>,
        rank: usize,
        mut lo: Vec<usize>,
        mut hi: Vec<usize>,
        mut boundary: Vec<usize>,
    ) -> Result<Self, XError> {
        check_row_starts(&row_starts, rank)?;
        let nranks = row_starts.len() - 1;
        for v in [&mut lo, &mut hi, &mut boundary] {
            v.sort_unstable();
            v.dedup();
        }
        if lo.iter().any(|&p| p >= rank) {
            return Err(XError::Shape(format!("lower neighbours {lo:?} must be below rank {rank}")));
        }
        if hi.iter().any(|&p| p <= rank || p >= nranks) {
            return Err(XError::Shape(format!("upper neighbours {hi:?} must lie in {}..{nranks}", rank + 1)));
        }
        let owned = row_starts[rank]..row_starts[rank + 1];
        if let Some(&row) = boundary.iter().find(|&&r| !owned.contains(&r)) {
            return Err(XError::Shape(format!("boundary row {row} is not owned by rank {rank}")));
        }
        Ok(SubdomainGraph { row_starts, rank, lo, hi, boundary })
    }

    /// Derive neighbours and boundary rows from the column structure of the
    /// locally owned rows (global column numbering).
    ///
    /// Neighbours are the owners of off-rank columns, so the structure is
    /// assumed symmetric across ranks.
    pub fn from_local_rows(row_starts: Vec<usize>, rank: usize, local: &CsrMatrix<f64>) -> Result<Self, XError> {
        check_row_starts(&row_starts, rank)?;
        let first = row_starts[rank];
        let expected = row_starts[rank + 1] - first;
        if local.nrows() != expected {
            return Err(XError::Shape(format!(
                "rank {rank} owns {expected} rows but the local matrix has {}",
                local.nrows()
            )));
        }
        let mut nabors = BTreeSet::new();
        let mut boundary = Vec::new();
        for i in 0..local.nrows() {
            let (cols, _) = local.row(i);
            let mut coupled = false;
            for &c in cols {
                let owner = owner_in(&row_starts, c)
                    .ok_or_else(|| XError::Shape(format!("column {c} outside the global row range")))?;
                if owner != rank {
                    nabors.insert(owner);
                    coupled = true;
                }
            }
            if coupled {
                boundary.push(first + i);
            }
        }
        let (lo, hi): (Vec<usize>, Vec<usize>) = nabors.into_iter().partition(|&p| p < rank);
        Self::new(row_starts, rank, lo, hi, boundary)
    }

    pub fn nranks(&self) -> usize {
        self.row_starts.len() - 1
    }

    /// Global rows owned by this rank.
    pub fn owned_rows(&self) -> std::ops::Range<usize> {
        self.row_starts[self.rank]..self.row_starts[self.rank + 1]
    }

    pub fn global_rows(&self) -> usize {
        self.row_starts[self.nranks()]
    }
}

fn check_row_starts(row_starts: &[usize], rank: usize) -> Result<(), XError> {
    if row_starts.len() < 2 || row_starts[0] != 0 || row_starts.windows(2).any(|w| w[0] > w[1]) {
        return Err(XError::shape("row_starts must start at 0 and be non-decreasing"));
    }
    let nranks = row_starts.len() - 1;
    if rank >= nranks {
        return Err(XError::Shape(format!("rank {rank} outside partition of {nranks} ranks")));
    }
    Ok(())
}

fn owner_in(row_starts: &[usize], row: usize) -> Option<usize> {
    let n = *row_starts.last()?;
    if row >= n {
        return None;
    }
    // last p with row_starts[p] <= row; empty ranks are skipped
    Some(row_starts.partition_point(|&s| s <= row) - 1)
}

impl SubdomainPartition for SubdomainGraph {
    fn rank(&self) -> usize {
        self.rank
    }

    fn owner_of(&self, global_row: usize) -> Option<usize> {
        owner_in(&self.row_starts, global_row)
    }

    fn lower_neighbors(&self) -> &[usize] {
        &self.lo
    }

    fn upper_neighbors(&self) -> &[usize] {
        &self.hi
    }

    fn boundary_rows(&self) -> &[usize] {
        &self.boundary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_lookup_skips_empty_ranks() {
        let g = SubdomainGraph::new(vec![0, 3, 3, 8], 0, vec![], vec![2], vec![2]).unwrap();
        assert_eq!(g.owner_of(0), Some(0));
        assert_eq!(g.owner_of(2), Some(0));
        assert_eq!(g.owner_of(3), Some(2));
        assert_eq!(g.owner_of(7), Some(2));
        assert_eq!(g.owner_of(8), None);
    }

    #[test]
    fn rejects_bad_neighbours() {
        assert!(SubdomainGraph::new(vec![0, 2, 4], 0, vec![1], vec![], vec![]).is_err());
        assert!(SubdomainGraph::new(vec![0, 2, 4], 1, vec![0], vec![1], vec![]).is_err());
        assert!(SubdomainGraph::new(vec![0, 2, 4], 1, vec![0], vec![], vec![0]).is_err());
        assert!(SubdomainGraph::new(vec![0, 2, 4], 2, vec![], vec![], vec![]).is_err());
    }

    #[test]
    fn derived_rejects_decreasing_row_starts() {
        let local = CsrMatrix::from_csr(0, 5, vec![0], vec![], vec![]).unwrap();
        assert!(matches!(
            SubdomainGraph::from_local_rows(vec![0, 5, 3], 1, &local),
            Err(XError::Shape(_))
        ));
        assert!(SubdomainGraph::from_local_rows(vec![0, 5], 1, &local).is_err());
    }

    #[test]
    fn derived_from_tridiagonal_rows() {
        // rows 2..4 of a 6x6 tridiagonal matrix, three ranks of two rows
        let local = CsrMatrix::from_csr(
            2,
            6,
            vec![0, 3, 6],
            vec![1, 2, 3, 2, 3, 4],
            vec![-1.0, 2.0, -1.0, -1.0, 2.0, -1.0],
        )
        .unwrap();
        let g = SubdomainGraph::from_local_rows(vec![0, 2, 4, 6], 1, &local).unwrap();
        assert_eq!(g.lower_neighbors(), &[0]);
        assert_eq!(g.upper_neighbors(), &[2]);
        assert_eq!(g.boundary_rows(), &[2, 3]);
        assert_eq!(g.owned_rows(), 2..4);
        assert_eq!(g.global_rows(), 6);
    }
}
