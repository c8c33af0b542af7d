//! Dense kernels on single `bs × bs` blocks.
//!
//! Blocks are row-major slices of length `bs * bs`. Every routine checks the
//! slice lengths against the block size and reports a mismatch as
//! [`XError::Shape`]. Block sizes 1, 2 and 3 are dispatched to
//! constant-size instances of the same kernel so the loops unroll; larger
//! sizes run the kernel with a runtime bound.

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat};

use crate::error::XError;

/// Largest block size handled by the unrolled elimination kernel.
const SMALL: usize = 3;

/// Pivots below `PIVOT_TOL * max|a_ij|` are treated as zero.
const PIVOT_TOL: f64 = 1e-14;

macro_rules! dispatch_block_size {
    ($bs:expr, |$n:ident| $body:expr) => {
        match $bs {
            1 => {
                let $n = 1usize;
                $body
            }
            2 => {
                let $n = 2usize;
                $body
            }
            3 => {
                let $n = 3usize;
                $body
            }
            other => {
                let $n = other;
                $body
            }
        }
    };
}

fn check_block(what: &str, len: usize, bs: usize) -> Result<(), XError> {
    if bs == 0 {
        return Err(XError::shape("block size must be positive"));
    }
    if len != bs * bs {
        return Err(XError::Shape(format!(
            "{what}: expected {} entries for block size {bs}, got {len}",
            bs * bs
        )));
    }
    Ok(())
}

fn check_vec(what: &str, len: usize, bs: usize) -> Result<(), XError> {
    if len != bs {
        return Err(XError::Shape(format!("{what}: expected length {bs}, got {len}")));
    }
    Ok(())
}

/// Norms available through [`block_norm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockNorm {
    /// Square root of the sum of squares.
    Frobenius,
    /// Sum of absolute values of all entries.
    AbsSum,
    /// Entry of largest magnitude, sign included.
    LargestElement,
    /// Maximum absolute row sum.
    InfNorm,
    /// Maximum absolute column sum.
    OneNorm,
    /// Plain sum of all entries.
    Sum,
}

/// out = a + scale * b
pub fn block_add(a: &[f64], b: &[f64], scale: f64, out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_add a", a.len(), bs)?;
    check_block("block_add b", b.len(), bs)?;
    check_block("block_add out", out.len(), bs)?;
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = x + scale * y;
    }
    Ok(())
}

/// out += a
pub fn block_add_accumulate(a: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_add_accumulate a", a.len(), bs)?;
    check_block("block_add_accumulate out", out.len(), bs)?;
    out.iter_mut().zip(a).for_each(|(o, &x)| *o += x);
    Ok(())
}

/// out_ii += a_ii
pub fn block_add_accumulate_diag(a: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_add_accumulate_diag a", a.len(), bs)?;
    check_block("block_add_accumulate_diag out", out.len(), bs)?;
    for i in 0..bs {
        out[i * bs + i] += a[i * bs + i];
    }
    Ok(())
}

/// out_ii += a_ii, only where `a_ii * sign_i < 0`.
pub fn block_add_accumulate_diag_check_sign(
    a: &[f64],
    out: &mut [f64],
    sign: &[f64],
    bs: usize,
) -> Result<(), XError> {
    check_block("block_add_accumulate_diag_check_sign a", a.len(), bs)?;
    check_block("block_add_accumulate_diag_check_sign out", out.len(), bs)?;
    check_vec("block_add_accumulate_diag_check_sign sign", sign.len(), bs)?;
    for i in 0..bs {
        let d = a[i * bs + i];
        if d * sign[i] < 0.0 {
            out[i * bs + i] += d;
        }
    }
    Ok(())
}

/// out = beta * a
pub fn block_copy(a: &[f64], beta: f64, out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_copy a", a.len(), bs)?;
    check_block("block_copy out", out.len(), bs)?;
    out.iter_mut().zip(a).for_each(|(o, &x)| *o = beta * x);
    Ok(())
}

/// out = beta * diag(a); off-diagonal entries are zeroed.
pub fn block_copy_diag(a: &[f64], beta: f64, out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_copy_diag a", a.len(), bs)?;
    check_block("block_copy_diag out", out.len(), bs)?;
    out.fill(0.0);
    for i in 0..bs {
        out[i * bs + i] = beta * a[i * bs + i];
    }
    Ok(())
}

/// out = beta * I
pub fn block_set_scalar(out: &mut [f64], beta: f64, bs: usize) -> Result<(), XError> {
    check_block("block_set_scalar out", out.len(), bs)?;
    out.fill(0.0);
    for i in 0..bs {
        out[i * bs + i] = beta;
    }
    Ok(())
}

#[inline(always)]
fn mult_add_kernel(a: &[f64], b: &[f64], beta: f64, out: &mut [f64], n: usize) {
    for i in 0..n {
        for j in 0..n {
            let mut s = 0.0;
            for k in 0..n {
                s += a[i * n + k] * b[k * n + j];
            }
            let o = &mut out[i * n + j];
            *o = if beta == 0.0 { s } else { s + beta * *o };
        }
    }
}

/// out = a * b + beta * out
///
/// With `beta == 0` the previous contents of `out` are ignored (they may be
/// uninitialized garbage such as NaN).
pub fn block_multiply_add(a: &[f64], b: &[f64], beta: f64, out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_multiply_add a", a.len(), bs)?;
    check_block("block_multiply_add b", b.len(), bs)?;
    check_block("block_multiply_add out", out.len(), bs)?;
    dispatch_block_size!(bs, |n| mult_add_kernel(a, b, beta, out, n));
    Ok(())
}

/// Diagonal-only product: out_ii = a_ii * b_ii + beta * out_ii.
pub fn block_multiply_add_diag(a: &[f64], b: &[f64], beta: f64, out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_multiply_add_diag a", a.len(), bs)?;
    check_block("block_multiply_add_diag b", b.len(), bs)?;
    check_block("block_multiply_add_diag out", out.len(), bs)?;
    for i in 0..bs {
        let d = i * bs + i;
        let p = a[d] * b[d];
        out[d] = if beta == 0.0 { p } else { p + beta * out[d] };
    }
    Ok(())
}

/// Diagonal-only product that only accumulates where `b_ii * sign_i < 0`.
///
/// Entries failing the sign test contribute zero, so with `beta == 0` they
/// are reset to zero.
pub fn block_multiply_add_diag_check_sign(
    a: &[f64],
    b: &[f64],
    beta: f64,
    out: &mut [f64],
    sign: &[f64],
    bs: usize,
) -> Result<(), XError> {
    check_block("block_multiply_add_diag_check_sign a", a.len(), bs)?;
    check_block("block_multiply_add_diag_check_sign b", b.len(), bs)?;
    check_block("block_multiply_add_diag_check_sign out", out.len(), bs)?;
    check_vec("block_multiply_add_diag_check_sign sign", sign.len(), bs)?;
    for i in 0..bs {
        let d = i * bs + i;
        let p = if b[d] * sign[i] < 0.0 { a[d] * b[d] } else { 0.0 };
        out[d] = if beta == 0.0 { p } else { p + beta * out[d] };
    }
    Ok(())
}

/// out_i = -1 if a_ii < 0, else +1.
pub fn compute_sign(a: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("compute_sign a", a.len(), bs)?;
    check_vec("compute_sign out", out.len(), bs)?;
    for i in 0..bs {
        out[i] = if a[i * bs + i] < 0.0 { -1.0 } else { 1.0 };
    }
    Ok(())
}

/// out = a^T
pub fn block_transpose(a: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_transpose a", a.len(), bs)?;
    check_block("block_transpose out", out.len(), bs)?;
    for i in 0..bs {
        for j in 0..bs {
            out[j * bs + i] = a[i * bs + j];
        }
    }
    Ok(())
}

pub fn block_transpose_in_place(a: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_transpose_in_place a", a.len(), bs)?;
    for i in 0..bs {
        for j in (i + 1)..bs {
            a.swap(i * bs + j, j * bs + i);
        }
    }
    Ok(())
}

#[inline(always)]
fn matvec_kernel(alpha: f64, a: &[f64], v: &[f64], beta: f64, out: &mut [f64], n: usize) {
    for i in 0..n {
        let mut s = 0.0;
        for k in 0..n {
            s += a[i * n + k] * v[k];
        }
        out[i] = if beta == 0.0 { alpha * s } else { alpha * s + beta * out[i] };
    }
}

/// out = alpha * a * v + beta * out
pub fn block_matvec(alpha: f64, a: &[f64], v: &[f64], beta: f64, out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_matvec a", a.len(), bs)?;
    check_vec("block_matvec v", v.len(), bs)?;
    check_vec("block_matvec out", out.len(), bs)?;
    dispatch_block_size!(bs, |n| matvec_kernel(alpha, a, v, beta, out, n));
    Ok(())
}

fn max_abs(a: &[f64]) -> f64 {
    a.iter().fold(0.0f64, |m, &x| m.max(x.abs()))
}

/// Gaussian elimination with partial pivoting for `n <= SMALL`.
/// `out` holds the `n × m` right-hand side on entry and the solution on exit.
#[inline(always)]
fn small_solve(a: &[f64], out: &mut [f64], n: usize, m: usize) -> Result<(), XError> {
    let mut lu = [0.0f64; SMALL * SMALL];
    lu[..n * n].copy_from_slice(a);
    let scale = max_abs(a);
    if scale == 0.0 || !scale.is_finite() {
        return Err(XError::SingularBlock);
    }
    for k in 0..n {
        let mut p = k;
        let mut best = lu[k * n + k].abs();
        for r in (k + 1)..n {
            let v = lu[r * n + k].abs();
            if v > best {
                best = v;
                p = r;
            }
        }
        if best <= PIVOT_TOL * scale {
            return Err(XError::SingularBlock);
        }
        if p != k {
            for c in 0..n {
                lu.swap(k * n + c, p * n + c);
            }
            for c in 0..m {
                out.swap(k * m + c, p * m + c);
            }
        }
        let piv = lu[k * n + k];
        for r in (k + 1)..n {
            let f = lu[r * n + k] / piv;
            if f == 0.0 {
                continue;
            }
            for c in k..n {
                lu[r * n + c] -= f * lu[k * n + c];
            }
            for c in 0..m {
                out[r * m + c] -= f * out[k * m + c];
            }
        }
    }
    for k in (0..n).rev() {
        let piv = lu[k * n + k];
        for c in 0..m {
            let mut s = out[k * m + c];
            for j in (k + 1)..n {
                s -= lu[k * n + j] * out[j * m + c];
            }
            out[k * m + c] = s / piv;
        }
    }
    Ok(())
}

/// Full-pivot LU from faer for blocks larger than `SMALL`.
fn faer_solve(a: &[f64], out: &mut [f64], n: usize, m: usize) -> Result<(), XError> {
    let scale = max_abs(a);
    if scale == 0.0 || !scale.is_finite() {
        return Err(XError::SingularBlock);
    }
    let a_mat = Mat::from_fn(n, n, |i, j| a[i * n + j]);
    let factor = FullPivLu::new(a_mat.as_ref());
    let mut rhs = Mat::from_fn(n, m, |i, j| out[i * m + j]);
    factor.solve_in_place_with_conj(Conj::No, rhs.as_mut());
    for i in 0..n {
        for j in 0..m {
            let x = rhs[(i, j)];
            if !x.is_finite() {
                return Err(XError::SingularBlock);
            }
            out[i * m + j] = x;
        }
    }
    Ok(())
}

/// Solve `a * X = rhs` in place, where `out` is `n × m` row-major.
fn solve_in_place(a: &[f64], out: &mut [f64], bs: usize, m: usize) -> Result<(), XError> {
    if bs > SMALL {
        return faer_solve(a, out, bs, m);
    }
    dispatch_block_size!(bs, |n| small_solve(a, out, n, m))
}

/// Solve `a * out = b` for `out`.
///
/// The block is factored, never explicitly inverted. A (numerically) zero
/// pivot yields [`XError::SingularBlock`].
pub fn block_invert_multiply(a: &[f64], b: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_invert_multiply a", a.len(), bs)?;
    check_block("block_invert_multiply b", b.len(), bs)?;
    check_block("block_invert_multiply out", out.len(), bs)?;
    out.copy_from_slice(b);
    solve_in_place(a, out, bs, bs)
}

/// Diagonal-only solve: out_ii = b_ii / a_ii, off-diagonal entries zeroed.
pub fn block_invert_multiply_diag(a: &[f64], b: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_invert_multiply_diag a", a.len(), bs)?;
    check_block("block_invert_multiply_diag b", b.len(), bs)?;
    check_block("block_invert_multiply_diag out", out.len(), bs)?;
    let scale = max_abs(a);
    out.fill(0.0);
    for i in 0..bs {
        let d = i * bs + i;
        if a[d].abs() <= PIVOT_TOL * scale || a[d] == 0.0 {
            return Err(XError::SingularBlock);
        }
        out[d] = b[d] / a[d];
    }
    Ok(())
}

/// Solve `out * a = b` for `out`, via the transposed system `a^T out^T = b^T`.
pub fn block_multiply_inverse(a: &[f64], b: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_multiply_inverse a", a.len(), bs)?;
    check_block("block_multiply_inverse b", b.len(), bs)?;
    check_block("block_multiply_inverse out", out.len(), bs)?;
    let mut at = vec![0.0; bs * bs];
    block_transpose(a, &mut at, bs)?;
    block_transpose(b, out, bs)?;
    solve_in_place(&at, out, bs, bs)?;
    block_transpose_in_place(out, bs)
}

/// Solve `a * out = v` for a single vector.
pub fn block_invert_matvec(a: &[f64], v: &[f64], out: &mut [f64], bs: usize) -> Result<(), XError> {
    check_block("block_invert_matvec a", a.len(), bs)?;
    check_vec("block_invert_matvec v", v.len(), bs)?;
    check_vec("block_invert_matvec out", out.len(), bs)?;
    out.copy_from_slice(v);
    solve_in_place(a, out, bs, 1)
}

pub fn block_norm(kind: BlockNorm, a: &[f64], bs: usize) -> Result<f64, XError> {
    check_block("block_norm a", a.len(), bs)?;
    let norm = match kind {
        BlockNorm::Frobenius => a.iter().map(|x| x * x).sum::<f64>().sqrt(),
        BlockNorm::AbsSum => a.iter().map(|x| x.abs()).sum(),
        BlockNorm::LargestElement => a
            .iter()
            .copied()
            .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best }),
        BlockNorm::InfNorm => a
            .chunks_exact(bs)
            .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
            .fold(0.0, f64::max),
        BlockNorm::OneNorm => (0..bs)
            .map(|j| (0..bs).map(|i| a[i * bs + j].abs()).sum::<f64>())
            .fold(0.0, f64::max),
        BlockNorm::Sum => a.iter().sum(),
    };
    Ok(norm)
}
