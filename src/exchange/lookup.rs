// Global row -> location of that row in the flat receive buffers.

use std::collections::HashMap;

use crate::error::XError;

/// Where a received row lives in the flat buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSlot {
    pub offset: usize,
    pub len: usize,
}

impl RowSlot {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

#[derive(Debug, Default, Clone)]
pub struct RowLookup {
    table: HashMap<usize, RowSlot>,
}

impl RowLookup {
    pub fn with_capacity(rows: usize) -> Self {
        RowLookup { table: HashMap::with_capacity(rows) }
    }

    /// Register a row. A row may only be received once.
    pub fn insert(&mut self, row: usize, slot: RowSlot) -> Result<(), XError> {
        if self.table.insert(row, slot).is_some() {
            return Err(XError::Shape(format!("row {row} received more than once")));
        }
        Ok(())
    }

    pub fn lookup(&self, row: usize) -> Option<RowSlot> {
        self.table.get(&row).copied()
    }

    pub fn contains(&self, row: usize) -> bool {
        self.table.contains_key(&row)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Resident rows, ascending.
    pub fn rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.table.keys().copied().collect();
        rows.sort_unstable();
        rows
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_rows_rejected() {
        let mut t = RowLookup::with_capacity(2);
        t.insert(5, RowSlot { offset: 0, len: 3 }).unwrap();
        assert!(t.insert(5, RowSlot { offset: 3, len: 1 }).is_err());
        assert_eq!(t.lookup(5).unwrap().range(), 0..3);
        assert!(t.lookup(6).is_none());
    }

    #[test]
    fn rows_are_sorted() {
        let mut t = RowLookup::default();
        for (i, r) in [9, 2, 4].into_iter().enumerate() {
            t.insert(r, RowSlot { offset: i, len: 1 }).unwrap();
        }
        assert_eq!(t.rows(), vec![2, 4, 9]);
        t.clear();
        assert!(t.is_empty());
    }
}
