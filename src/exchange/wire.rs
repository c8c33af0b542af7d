//! Message layout of the row exchange.
//!
//! Each phase travels under its own tag, `base + phase offset`. Counts, row
//! numbers, row lengths and column indices are `u64`, fill levels `u32`,
//! values `f64`, all in native byte order (ranks of one job share an
//! architecture). Payloads are plain concatenations; sizes come from the
//! earlier phases, and every decoder checks them.

use std::fmt;

use bytemuck::Pod;

use crate::error::XError;
use crate::parallel::CommTag;

/// One step of the exchange protocol; the discriminant is the tag offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    RowCount = 0,
    NzCount = 1,
    RowLengths = 2,
    RowNumbers = 3,
    ColumnIndices = 4,
    FillLevels = 5,
    Values = 6,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::RowCount,
        Phase::NzCount,
        Phase::RowLengths,
        Phase::RowNumbers,
        Phase::ColumnIndices,
        Phase::FillLevels,
        Phase::Values,
    ];

    pub fn tag(self, base: CommTag) -> CommTag {
        base.offset(self as u16)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::RowCount => "row-count",
            Phase::NzCount => "nonzero-count",
            Phase::RowLengths => "row-length",
            Phase::RowNumbers => "row-number",
            Phase::ColumnIndices => "column-index",
            Phase::FillLevels => "fill-level",
            Phase::Values => "value",
        };
        f.write_str(name)
    }
}

fn decode_pod<T: Pod>(bytes: &[u8], what: Phase, expected: Option<usize>) -> Result<Vec<T>, XError> {
    let width = std::mem::size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(XError::Shape(format!(
            "{what} message of {} bytes is not a whole number of {width}-byte items",
            bytes.len()
        )));
    }
    let items: Vec<T> = bytes.chunks_exact(width).map(bytemuck::pod_read_unaligned).collect();
    if let Some(n) = expected {
        if items.len() != n {
            return Err(XError::Shape(format!("{what} message holds {} items, expected {n}", items.len())));
        }
    }
    Ok(items)
}

pub fn encode_indices(v: &[usize]) -> Vec<u8> {
    let wide: Vec<u64> = v.iter().map(|&x| x as u64).collect();
    bytemuck::cast_slice(&wide).to_vec()
}

pub fn decode_indices(bytes: &[u8], what: Phase, expected: Option<usize>) -> Result<Vec<usize>, XError> {
    decode_pod::<u64>(bytes, what, expected)?
        .into_iter()
        .map(|x| usize::try_from(x).map_err(|_| XError::Shape(format!("{what} entry {x} overflows usize"))))
        .collect()
}

pub fn encode_count(n: usize) -> Vec<u8> {
    encode_indices(&[n])
}

pub fn decode_count(bytes: &[u8], what: Phase) -> Result<usize, XError> {
    Ok(decode_indices(bytes, what, Some(1))?[0])
}

pub fn encode_fill(v: &[u32]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

pub fn decode_fill(bytes: &[u8], expected: usize) -> Result<Vec<u32>, XError> {
    decode_pod(bytes, Phase::FillLevels, Some(expected))
}

pub fn encode_values(v: &[f64]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

pub fn decode_values(bytes: &[u8], expected: usize) -> Result<Vec<f64>, XError> {
    decode_pod(bytes, Phase::Values, Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_have_distinct_tags() {
        let base = CommTag::new(10);
        let tags: std::collections::HashSet<_> = Phase::ALL.iter().map(|p| p.tag(base)).collect();
        assert_eq!(tags.len(), 7);
        assert_eq!(Phase::Values.tag(base).as_u16(), 16);
    }

    #[test]
    fn count_and_indices() {
        assert_eq!(decode_count(&encode_count(42), Phase::RowCount).unwrap(), 42);
        let rows = [5usize, 7, 1 << 40];
        assert_eq!(decode_indices(&encode_indices(&rows), Phase::RowNumbers, Some(3)).unwrap(), rows);
    }

    #[test]
    fn wrong_sizes_are_shape_errors() {
        let bytes = encode_indices(&[1, 2]);
        assert!(matches!(decode_indices(&bytes, Phase::RowLengths, Some(3)), Err(XError::Shape(_))));
        assert!(matches!(decode_indices(&bytes[..7], Phase::RowLengths, None), Err(XError::Shape(_))));
        assert!(decode_count(&[], Phase::RowCount).is_err());
        assert!(decode_values(&encode_values(&[1.0]), 2).is_err());
    }

    #[test]
    fn unaligned_payload_decodes() {
        let mut bytes = vec![0u8];
        bytes.extend(encode_values(&[1.5, -2.0]));
        assert_eq!(decode_values(&bytes[1..], 2).unwrap(), vec![1.5, -2.0]);
        assert_eq!(decode_fill(&encode_fill(&[0, 3]), 2).unwrap(), vec![0, 3]);
    }
}
