//! Block compressed sparse row matrices.
//!
//! Every stored entry is a dense `bs × bs` block in row-major order. Row and
//! column counts are in block units; indexing is 0-based. Column indices
//! inside a block row need not be sorted.
//!
//! Storage is decided when the matrix is built: a shape-only matrix has no
//! backing arrays until [`BlockCsrMatrix::initialize`], an owned matrix holds
//! its vectors, and a view borrows arrays owned elsewhere.

use crate::error::XError;
use crate::matrix::block::{block_transpose, BlockNorm, block_norm};
use crate::matrix::sparse::CsrMatrix;

#[derive(Debug, Clone)]
enum Storage<'a> {
    Unallocated,
    Owned {
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        data: Vec<f64>,
    },
    View {
        row_ptr: &'a [usize],
        col_idx: &'a [usize],
        data: &'a [f64],
    },
}

#[derive(Debug, Clone)]
pub struct BlockCsrMatrix<'a> {
    block_size: usize,
    num_rows: usize,
    num_cols: usize,
    num_nonzeros: usize,
    storage: Storage<'a>,
}

fn validate_parts(
    bs: usize,
    num_rows: usize,
    num_cols: usize,
    row_ptr: &[usize],
    col_idx: &[usize],
    data: &[f64],
) -> Result<usize, XError> {
    if bs == 0 {
        return Err(XError::shape("block size must be positive"));
    }
    if row_ptr.len() != num_rows + 1 {
        return Err(XError::Shape(format!(
            "row_ptr has {} entries for {num_rows} block rows",
            row_ptr.len()
        )));
    }
    if row_ptr[0] != 0 || row_ptr.windows(2).any(|w| w[0] > w[1]) {
        return Err(XError::shape("row_ptr must start at 0 and be non-decreasing"));
    }
    let nnz = row_ptr[num_rows];
    if col_idx.len() != nnz {
        return Err(XError::Shape(format!("expected {nnz} block columns, got {}", col_idx.len())));
    }
    if data.len() != nnz * bs * bs {
        return Err(XError::Shape(format!(
            "expected {} values for {nnz} blocks of size {bs}, got {}",
            nnz * bs * bs,
            data.len()
        )));
    }
    if let Some(&bad) = col_idx.iter().find(|&&c| c >= num_cols) {
        return Err(XError::Shape(format!("block column {bad} out of range for {num_cols} block columns")));
    }
    Ok(nnz)
}

/// Accumulate `tmp += sum_k A_ik x_k` over the blocks of one block row.
#[inline]
fn accumulate_row(bs: usize, cols: &[usize], blocks: &[f64], x: &[f64], tmp: &mut [f64]) {
    let bs2 = bs * bs;
    for (k, &c) in cols.iter().enumerate() {
        let blk = &blocks[k * bs2..(k + 1) * bs2];
        let xc = &x[c * bs..(c + 1) * bs];
        for r in 0..bs {
            let row = &blk[r * bs..(r + 1) * bs];
            tmp[r] += row.iter().zip(xc).map(|(a, b)| a * b).sum::<f64>();
        }
    }
}

fn scale_in_place(y: &mut [f64], beta: f64) {
    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        y.iter_mut().for_each(|v| *v *= beta);
    }
}

impl BlockCsrMatrix<'static> {
    /// Shape-only matrix; call [`initialize`](Self::initialize) to allocate.
    pub fn new(block_size: usize, num_rows: usize, num_cols: usize, num_nonzeros: usize) -> Result<Self, XError> {
        if block_size == 0 {
            return Err(XError::shape("block size must be positive"));
        }
        Ok(Self { block_size, num_rows, num_cols, num_nonzeros, storage: Storage::Unallocated })
    }

    /// Owned matrix from raw block-CSR arrays.
    pub fn from_parts(
        block_size: usize,
        num_rows: usize,
        num_cols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, XError> {
        let num_nonzeros = validate_parts(block_size, num_rows, num_cols, &row_ptr, &col_idx, &data)?;
        Ok(Self {
            block_size,
            num_rows,
            num_cols,
            num_nonzeros,
            storage: Storage::Owned { row_ptr, col_idx, data },
        })
    }

    /// Collapse a scalar CSR matrix into `block_size` blocks.
    ///
    /// Block columns of a block row appear in the order their first scalar
    /// entry is met, scanning the block's scalar rows top to bottom. Scalar
    /// positions without an entry are stored as zeros.
    pub fn from_scalar_csr(csr: &CsrMatrix<f64>, block_size: usize) -> Result<Self, XError> {
        use crate::matrix::sparse::SparseMatrix;

        let bs = block_size;
        if bs == 0 {
            return Err(XError::shape("block size must be positive"));
        }
        let (nrows, ncols) = (csr.nrows(), csr.ncols());
        if nrows % bs != 0 || ncols % bs != 0 {
            return Err(XError::Shape(format!(
                "{nrows}x{ncols} scalar matrix is not divisible into blocks of size {bs}"
            )));
        }
        let (num_rows, num_cols) = (nrows / bs, ncols / bs);
        let bs2 = bs * bs;

        let mut marker = vec![usize::MAX; num_cols];
        let mut row_ptr = Vec::with_capacity(num_rows + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::new();
        let mut data = Vec::new();
        for bi in 0..num_rows {
            let first = col_idx.len();
            for r in 0..bs {
                let (cols, vals) = csr.row(bi * bs + r);
                for (&j, &v) in cols.iter().zip(vals) {
                    let bc = j / bs;
                    if marker[bc] == usize::MAX {
                        marker[bc] = col_idx.len();
                        col_idx.push(bc);
                        data.extend(std::iter::repeat(0.0).take(bs2));
                    }
                    data[marker[bc] * bs2 + r * bs + j % bs] = v;
                }
            }
            for &bc in &col_idx[first..] {
                marker[bc] = usize::MAX;
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_parts(bs, num_rows, num_cols, row_ptr, col_idx, data)
    }
}

impl<'a> BlockCsrMatrix<'a> {
    /// Borrow externally owned block-CSR arrays without copying.
    pub fn view(
        block_size: usize,
        num_rows: usize,
        num_cols: usize,
        row_ptr: &'a [usize],
        col_idx: &'a [usize],
        data: &'a [f64],
    ) -> Result<Self, XError> {
        let num_nonzeros = validate_parts(block_size, num_rows, num_cols, row_ptr, col_idx, data)?;
        Ok(Self {
            block_size,
            num_rows,
            num_cols,
            num_nonzeros,
            storage: Storage::View { row_ptr, col_idx, data },
        })
    }

    /// Allocate zeroed backing storage sized from the nonzero block count.
    ///
    /// The fresh offsets are valid but place every block in the last block
    /// row; callers fill `row_ptr`, `col_idx` and `data` through
    /// [`parts_mut`](Self::parts_mut). Initializing an owned matrix again is
    /// a no-op; views cannot be initialized.
    pub fn initialize(&mut self) -> Result<(), XError> {
        match self.storage {
            Storage::Owned { .. } => Ok(()),
            Storage::View { .. } => Err(XError::Unsupported("cannot initialize a borrowed view")),
            Storage::Unallocated => {
                let mut row_ptr = vec![0; self.num_rows + 1];
                row_ptr[self.num_rows] = self.num_nonzeros;
                let col_idx = vec![0; self.num_nonzeros];
                let data = vec![0.0; self.num_nonzeros * self.block_size * self.block_size];
                self.storage = Storage::Owned { row_ptr, col_idx, data };
                Ok(())
            }
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn num_nonzeros(&self) -> usize {
        self.num_nonzeros
    }

    /// True when this matrix owns its arrays.
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned { .. })
    }

    pub fn is_allocated(&self) -> bool {
        !matches!(self.storage, Storage::Unallocated)
    }

    /// `(row_ptr, col_idx, data)`.
    pub fn parts(&self) -> Result<(&[usize], &[usize], &[f64]), XError> {
        match &self.storage {
            Storage::Unallocated => Err(XError::shape("block matrix storage is not allocated")),
            Storage::Owned { row_ptr, col_idx, data } => Ok((row_ptr.as_slice(), col_idx.as_slice(), data.as_slice())),
            Storage::View { row_ptr, col_idx, data } => Ok((*row_ptr, *col_idx, *data)),
        }
    }

    /// Mutable arrays of an owned matrix. Run [`validate`](Self::validate)
    /// after editing the structure.
    pub fn parts_mut(&mut self) -> Result<(&mut [usize], &mut [usize], &mut [f64]), XError> {
        match &mut self.storage {
            Storage::Owned { row_ptr, col_idx, data } => {
                Ok((row_ptr.as_mut_slice(), col_idx.as_mut_slice(), data.as_mut_slice()))
            }
            Storage::View { .. } => Err(XError::Unsupported("borrowed view is read-only")),
            Storage::Unallocated => Err(XError::shape("block matrix storage is not allocated")),
        }
    }

    /// Re-check the block-CSR invariants.
    pub fn validate(&self) -> Result<(), XError> {
        let (row_ptr, col_idx, data) = self.parts()?;
        let nnz = validate_parts(self.block_size, self.num_rows, self.num_cols, row_ptr, col_idx, data)?;
        if nnz != self.num_nonzeros {
            return Err(XError::Shape(format!(
                "row_ptr ends at {nnz}, matrix declares {} blocks",
                self.num_nonzeros
            )));
        }
        Ok(())
    }

    /// Dense payload of stored block `k`.
    pub fn block(&self, k: usize) -> Result<&[f64], XError> {
        let bs2 = self.block_size * self.block_size;
        let (_, _, data) = self.parts()?;
        data.get(k * bs2..(k + 1) * bs2)
            .ok_or_else(|| XError::Shape(format!("block {k} out of range")))
    }

    /// `(block column, block payload)` pairs of block row `i`.
    pub fn row_blocks(&self, i: usize) -> Result<impl Iterator<Item = (usize, &[f64])> + '_, XError> {
        let (row_ptr, col_idx, data) = self.parts()?;
        if i >= self.num_rows {
            return Err(XError::Shape(format!("block row {i} out of range")));
        }
        let bs2 = self.block_size * self.block_size;
        let (s, e) = (row_ptr[i], row_ptr[i + 1]);
        Ok(col_idx[s..e]
            .iter()
            .copied()
            .zip(data[s * bs2..e * bs2].chunks_exact(bs2)))
    }

    /// Deep copy with owned storage.
    pub fn to_owned_matrix(&self) -> Result<BlockCsrMatrix<'static>, XError> {
        let (row_ptr, col_idx, data) = self.parts()?;
        BlockCsrMatrix::from_parts(
            self.block_size,
            self.num_rows,
            self.num_cols,
            row_ptr.to_vec(),
            col_idx.to_vec(),
            data.to_vec(),
        )
    }

    /// Block transpose. Block `(i, j)` of `self` becomes block `(j, i)` of the
    /// result, itself transposed when `with_values` is set; otherwise the
    /// result carries the structure only, with zero blocks.
    ///
    /// Block columns of every result row come out sorted, so transposing twice
    /// reproduces a matrix whose rows were sorted to begin with.
    pub fn transpose(&self, with_values: bool) -> Result<BlockCsrMatrix<'static>, XError> {
        let (row_ptr, col_idx, data) = self.parts()?;
        let bs = self.block_size;
        let bs2 = bs * bs;
        let nnz = col_idx.len();

        let mut at_ptr = vec![0usize; self.num_cols + 1];
        for &c in col_idx {
            at_ptr[c + 1] += 1;
        }
        for c in 0..self.num_cols {
            at_ptr[c + 1] += at_ptr[c];
        }
        let mut next = at_ptr[..self.num_cols].to_vec();
        let mut at_col = vec![0usize; nnz];
        let mut at_data = vec![0.0; nnz * bs2];
        for i in 0..self.num_rows {
            for k in row_ptr[i]..row_ptr[i + 1] {
                let c = col_idx[k];
                let pos = next[c];
                next[c] += 1;
                at_col[pos] = i;
                if with_values {
                    block_transpose(
                        &data[k * bs2..(k + 1) * bs2],
                        &mut at_data[pos * bs2..(pos + 1) * bs2],
                        bs,
                    )?;
                }
            }
        }
        BlockCsrMatrix::from_parts(bs, self.num_cols, self.num_rows, at_ptr, at_col, at_data)
    }

    fn check_matvec(&self, x_len: usize, y_len: usize, transpose: bool) -> Result<(), XError> {
        let bs = self.block_size;
        let (nx, ny) = if transpose {
            (self.num_rows * bs, self.num_cols * bs)
        } else {
            (self.num_cols * bs, self.num_rows * bs)
        };
        if x_len != nx || y_len != ny {
            return Err(XError::Shape(format!(
                "matvec expects x of length {nx} and y of length {ny}, got {x_len} and {y_len}"
            )));
        }
        Ok(())
    }

    /// y = alpha * A * x + beta * y
    ///
    /// With `beta == 0` the previous contents of `y` are ignored.
    pub fn matvec(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) -> Result<(), XError> {
        self.check_matvec(x.len(), y.len(), false)?;
        let (row_ptr, col_idx, data) = self.parts()?;
        if alpha == 0.0 {
            scale_in_place(y, beta);
            return Ok(());
        }
        let bs = self.block_size;
        let bs2 = bs * bs;
        let mut tmp = vec![0.0; bs];
        for (i, yi) in y.chunks_exact_mut(bs).enumerate() {
            let (s, e) = (row_ptr[i], row_ptr[i + 1]);
            tmp.fill(0.0);
            accumulate_row(bs, &col_idx[s..e], &data[s * bs2..e * bs2], x, &mut tmp);
            for (o, &t) in yi.iter_mut().zip(&tmp) {
                *o = if beta == 0.0 { alpha * t } else { alpha * t + beta * *o };
            }
        }
        Ok(())
    }

    /// y = alpha * A^T * x + beta * y
    pub fn matvec_transpose(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) -> Result<(), XError> {
        self.check_matvec(x.len(), y.len(), true)?;
        let (row_ptr, col_idx, data) = self.parts()?;
        scale_in_place(y, beta);
        if alpha == 0.0 {
            return Ok(());
        }
        let bs = self.block_size;
        let bs2 = bs * bs;
        for i in 0..self.num_rows {
            let xi = &x[i * bs..(i + 1) * bs];
            for k in row_ptr[i]..row_ptr[i + 1] {
                let c = col_idx[k];
                let blk = &data[k * bs2..(k + 1) * bs2];
                let yc = &mut y[c * bs..(c + 1) * bs];
                for r in 0..bs {
                    let xr = alpha * xi[r];
                    for (s, o) in yc.iter_mut().enumerate() {
                        *o += blk[r * bs + s] * xr;
                    }
                }
            }
        }
        Ok(())
    }

    /// Expand into scalar CSR with `num_rows * bs` rows; every block entry is
    /// stored, zeros included.
    pub fn to_scalar_csr(&self) -> Result<CsrMatrix<f64>, XError> {
        let (row_ptr, col_idx, data) = self.parts()?;
        let bs = self.block_size;
        let bs2 = bs * bs;
        let nnz = col_idx.len() * bs2;
        let mut s_ptr = Vec::with_capacity(self.num_rows * bs + 1);
        let mut s_col = Vec::with_capacity(nnz);
        let mut s_val = Vec::with_capacity(nnz);
        s_ptr.push(0);
        for i in 0..self.num_rows {
            for r in 0..bs {
                for k in row_ptr[i]..row_ptr[i + 1] {
                    let c = col_idx[k];
                    for s in 0..bs {
                        s_col.push(c * bs + s);
                        s_val.push(data[k * bs2 + r * bs + s]);
                    }
                }
                s_ptr.push(s_col.len());
            }
        }
        CsrMatrix::from_csr(self.num_rows * bs, self.num_cols * bs, s_ptr, s_col, s_val)
    }

    /// Scalar CSR with the block structure and one Frobenius norm per block.
    pub fn compress(&self) -> Result<CsrMatrix<f64>, XError> {
        let (row_ptr, col_idx, data) = self.parts()?;
        let bs = self.block_size;
        let values = data
            .chunks_exact(bs * bs)
            .map(|blk| block_norm(BlockNorm::Frobenius, blk, bs))
            .collect::<Result<Vec<_>, _>>()?;
        CsrMatrix::from_csr(self.num_rows, self.num_cols, row_ptr.to_vec(), col_idx.to_vec(), values)
    }
}

#[cfg(feature = "rayon")]
impl<'a> BlockCsrMatrix<'a> {
    /// Parallel `y = alpha * A * x + beta * y` over block rows using Rayon.
    pub fn matvec_par(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) -> Result<(), XError> {
        use rayon::prelude::*;

        self.check_matvec(x.len(), y.len(), false)?;
        let (row_ptr, col_idx, data) = self.parts()?;
        if alpha == 0.0 {
            scale_in_place(y, beta);
            return Ok(());
        }
        let bs = self.block_size;
        let bs2 = bs * bs;
        y.par_chunks_mut(bs).enumerate().for_each_init(
            || vec![0.0; bs],
            |tmp, (i, yi)| {
                let (s, e) = (row_ptr[i], row_ptr[i + 1]);
                tmp.fill(0.0);
                accumulate_row(bs, &col_idx[s..e], &data[s * bs2..e * bs2], x, tmp);
                for (o, &t) in yi.iter_mut().zip(tmp.iter()) {
                    *o = if beta == 0.0 { alpha * t } else { alpha * t + beta * *o };
                }
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockCsrMatrix<'static> {
        // 2x3 block matrix, bs = 2, blocks at (0,0), (0,2), (1,1)
        BlockCsrMatrix::from_parts(
            2,
            2,
            3,
            vec![0, 2, 3],
            vec![0, 2, 1],
            vec![
                1.0, 2.0, 3.0, 4.0, //
                5.0, 6.0, 7.0, 8.0, //
                9.0, 10.0, 11.0, 12.0,
            ],
        )
        .unwrap()
    }

    #[test]
    fn new_then_initialize() {
        let mut m = BlockCsrMatrix::new(3, 4, 4, 5).unwrap();
        assert!(!m.is_allocated());
        assert!(m.parts().is_err());
        m.initialize().unwrap();
        assert!(m.is_owned());
        let (rp, ci, d) = m.parts().unwrap();
        assert_eq!(rp.len(), 5);
        assert_eq!(rp[4], 5);
        assert_eq!(ci.len(), 5);
        assert_eq!(d.len(), 45);
        m.validate().unwrap();
    }

    #[test]
    fn views_are_read_only() {
        let rp = [0, 1];
        let ci = [0];
        let d = [2.0];
        let mut v = BlockCsrMatrix::view(1, 1, 1, &rp, &ci, &d).unwrap();
        assert!(!v.is_owned());
        assert!(matches!(v.parts_mut(), Err(XError::Unsupported(_))));
        assert!(matches!(v.initialize(), Err(XError::Unsupported(_))));
        let owned = v.to_owned_matrix().unwrap();
        assert!(owned.is_owned());
    }

    #[test]
    fn invalid_parts_are_rejected() {
        assert!(BlockCsrMatrix::from_parts(2, 1, 1, vec![0, 1], vec![0], vec![1.0; 3]).is_err());
        assert!(BlockCsrMatrix::from_parts(1, 1, 1, vec![0, 1], vec![1], vec![1.0]).is_err());
        assert!(BlockCsrMatrix::from_parts(1, 2, 2, vec![1, 1, 1], vec![0], vec![1.0]).is_err());
        assert!(BlockCsrMatrix::new(0, 1, 1, 0).is_err());
    }

    #[test]
    fn transpose_moves_and_transposes_blocks() {
        let a = sample();
        let at = a.transpose(true).unwrap();
        assert_eq!(at.num_rows(), 3);
        assert_eq!(at.num_cols(), 2);
        let (rp, ci, _) = at.parts().unwrap();
        assert_eq!(rp, &[0, 1, 2, 3]);
        assert_eq!(ci, &[0, 1, 0]);
        // block (0,2) of A = [[5,6],[7,8]] -> block (2,0) of A^T = [[5,7],[6,8]]
        assert_eq!(at.block(2).unwrap(), &[5.0, 7.0, 6.0, 8.0]);

        let structure = a.transpose(false).unwrap();
        assert!(structure.parts().unwrap().2.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn matvec_and_transpose_agree() {
        let a = sample();
        let x = [1.0, -1.0, 2.0, 0.5, 3.0, 1.0];
        let mut y = [0.0; 4];
        a.matvec(1.0, &x, 0.0, &mut y).unwrap();
        // row 0: [1 2;3 4][1;-1] + [5 6;7 8][3;1] = [-1;-1] + [21;29]
        assert_eq!(y, [20.0, 28.0, 9.0 * 2.0 + 10.0 * 0.5, 11.0 * 2.0 + 12.0 * 0.5]);

        let at = a.transpose(true).unwrap();
        let mut yt = [0.0; 4];
        at.matvec_transpose(1.0, &x, 0.0, &mut yt).unwrap();
        assert_eq!(y, yt);
    }

    #[test]
    fn matvec_scales_existing_y() {
        let a = sample();
        let x = [0.0; 6];
        let mut y = [1.0, 2.0, 3.0, 4.0];
        a.matvec(2.0, &x, 0.5, &mut y).unwrap();
        assert_eq!(y, [0.5, 1.0, 1.5, 2.0]);
        a.matvec(0.0, &x, 0.0, &mut y).unwrap();
        assert_eq!(y, [0.0; 4]);
        assert!(a.matvec(1.0, &[0.0; 4], 0.0, &mut y).is_err());
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn parallel_matvec_matches_serial() {
        let a = sample();
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut ys = [1.0; 4];
        let mut yp = [1.0; 4];
        a.matvec(1.5, &x, -1.0, &mut ys).unwrap();
        a.matvec_par(1.5, &x, -1.0, &mut yp).unwrap();
        assert_eq!(ys, yp);
    }

    #[test]
    fn scalar_expansion_and_collapse() {
        let a = sample();
        let s = a.to_scalar_csr().unwrap();
        assert_eq!(s.nnz(), 12);
        assert_eq!(s.row_ptr(), &[0, 4, 8, 10, 12]);
        assert_eq!(s.row(1).0, &[0, 1, 4, 5]);
        assert_eq!(s.row(1).1, &[3.0, 4.0, 7.0, 8.0]);
        let back = BlockCsrMatrix::from_scalar_csr(&s, 2).unwrap();
        assert_eq!(back.parts().unwrap(), a.parts().unwrap());
        assert!(BlockCsrMatrix::from_scalar_csr(&s, 3).is_err());
    }

    #[test]
    fn compress_uses_block_norms() {
        let a = sample();
        let c = a.compress().unwrap();
        assert_eq!(c.col_idx(), &[0, 2, 1]);
        assert!((c.values()[0] - 30f64.sqrt()).abs() < 1e-12);
    }
}
