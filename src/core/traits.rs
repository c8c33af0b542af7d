//! Collaborator traits for the row exchange.
//!
//! The exchange never owns the partition or the factor it serves; it borrows
//! them through these traits for the lifetime of an exchange.

/// Borrowed view of one sparse row: parallel column, fill-level and value slices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowView<'a> {
    pub cols: &'a [usize],
    pub fill: &'a [u32],
    pub vals: &'a [f64],
}

impl<'a> RowView<'a> {
    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Iterate `(col, fill, val)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u32, f64)> + 'a {
        let (cols, fill, vals) = (self.cols, self.fill, self.vals);
        cols.iter()
            .zip(fill)
            .zip(vals)
            .map(|((&c, &f), &v)| (c, f, v))
    }
}

/// Assignment of global rows to ranks, seen from one rank.
pub trait SubdomainPartition {
    /// Rank this view belongs to.
    fn rank(&self) -> usize;
    /// Rank owning `global_row`, or `None` if the row is out of range.
    fn owner_of(&self, global_row: usize) -> Option<usize>;
    /// Neighbouring ranks ordered before this one (rows are received from them).
    fn lower_neighbors(&self) -> &[usize];
    /// Neighbouring ranks ordered after this one (rows are sent to them).
    fn upper_neighbors(&self) -> &[usize];
    /// Locally owned rows needed by some neighbouring subdomain, ascending.
    fn boundary_rows(&self) -> &[usize];
}

/// Locally owned rows of an incomplete factor.
pub trait PartialFactor {
    /// Upper-triangular part (columns >= `global_row`) of a locally owned row.
    fn upper_row(&self, global_row: usize) -> Option<RowView<'_>>;
}
