//! Integration tests for the dense block kernels.
//!
//! Random diagonally dominant blocks of several sizes exercise both the
//! small-size elimination and the faer LU path.

use approx::assert_abs_diff_eq;
use extrows::matrix::block::{
    block_invert_matvec, block_invert_multiply, block_matvec, block_multiply_add, block_multiply_inverse,
    block_norm, block_set_scalar, block_transpose, compute_sign,
};
use extrows::{BlockCsrMatrix, BlockNorm, XError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random block with a dominant diagonal, so it is comfortably invertible.
fn dominant_block(rng: &mut StdRng, bs: usize) -> Vec<f64> {
    let mut a: Vec<f64> = (0..bs * bs).map(|_| rng.gen_range(-1.0..1.0)).collect();
    for i in 0..bs {
        a[i * bs + i] += bs as f64 + 1.0;
    }
    a
}

fn random_block(rng: &mut StdRng, bs: usize) -> Vec<f64> {
    (0..bs * bs).map(|_| rng.gen_range(-2.0..2.0)).collect()
}

#[test]
fn multiply_then_invert_recovers_operand() {
    let mut rng = StdRng::seed_from_u64(7);
    for bs in 1..=6 {
        for _ in 0..20 {
            let a = dominant_block(&mut rng, bs);
            let b = random_block(&mut rng, bs);
            let mut c = vec![0.0; bs * bs];
            block_multiply_add(&a, &b, 0.0, &mut c, bs).unwrap();
            let mut x = vec![0.0; bs * bs];
            block_invert_multiply(&a, &c, &mut x, bs).unwrap();
            for (got, want) in x.iter().zip(&b) {
                assert_abs_diff_eq!(got, want, epsilon = 1e-10);
            }
        }
    }
}

#[test]
fn multiply_inverse_from_right_recovers_operand() {
    let mut rng = StdRng::seed_from_u64(11);
    for bs in [2, 3, 5] {
        let a = dominant_block(&mut rng, bs);
        let b = random_block(&mut rng, bs);
        // c = b * a, then c * a^{-1} = b
        let mut c = vec![0.0; bs * bs];
        block_multiply_add(&b, &a, 0.0, &mut c, bs).unwrap();
        let mut x = vec![0.0; bs * bs];
        block_multiply_inverse(&a, &c, &mut x, bs).unwrap();
        for (got, want) in x.iter().zip(&b) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-10);
        }
    }
}

#[test]
fn invert_matvec_matches_matvec() {
    let mut rng = StdRng::seed_from_u64(3);
    for bs in 1..=5 {
        let a = dominant_block(&mut rng, bs);
        let v: Vec<f64> = (0..bs).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut av = vec![0.0; bs];
        block_matvec(1.0, &a, &v, 0.0, &mut av, bs).unwrap();
        let mut back = vec![0.0; bs];
        block_invert_matvec(&a, &av, &mut back, bs).unwrap();
        for (got, want) in back.iter().zip(&v) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-12);
        }
    }
}

#[test]
fn identity_block_matvec() {
    let m = BlockCsrMatrix::from_parts(2, 1, 1, vec![0, 1], vec![0], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
    let mut y = vec![0.0; 2];
    m.matvec(1.0, &[1.0, 1.0], 0.0, &mut y).unwrap();
    assert_eq!(y, vec![1.0, 1.0]);

    let mut id = vec![0.0; 4];
    block_set_scalar(&mut id, 1.0, 2).unwrap();
    let mut out = vec![0.0; 2];
    block_matvec(1.0, &id, &[1.0, 1.0], 0.0, &mut out, 2).unwrap();
    assert_eq!(out, vec![1.0, 1.0]);
}

#[test]
fn singular_block_reports_error() {
    for bs in [2, 3] {
        // two identical rows
        let mut a = vec![0.0; bs * bs];
        for j in 0..bs {
            a[j] = 1.0 + j as f64;
            a[bs + j] = 1.0 + j as f64;
        }
        for i in 2..bs {
            a[i * bs + i] = 1.0;
        }
        let b = vec![1.0; bs * bs];
        let mut out = vec![0.0; bs * bs];
        assert!(matches!(
            block_invert_multiply(&a, &b, &mut out, bs),
            Err(XError::SingularBlock)
        ));
    }
}

#[test]
fn norms_are_transpose_consistent() {
    let mut rng = StdRng::seed_from_u64(5);
    let bs = 4;
    let a = random_block(&mut rng, bs);
    let mut at = vec![0.0; bs * bs];
    block_transpose(&a, &mut at, bs).unwrap();
    assert_abs_diff_eq!(
        block_norm(BlockNorm::OneNorm, &a, bs).unwrap(),
        block_norm(BlockNorm::InfNorm, &at, bs).unwrap(),
        epsilon = 1e-14
    );
    assert_abs_diff_eq!(
        block_norm(BlockNorm::Frobenius, &a, bs).unwrap(),
        block_norm(BlockNorm::Frobenius, &at, bs).unwrap(),
        epsilon = 1e-14
    );
}

#[test]
fn sign_follows_diagonal() {
    let a = [-2.0, 5.0, 7.0, 0.0];
    let mut sign = [0.0; 2];
    compute_sign(&a, &mut sign, 2).unwrap();
    assert_eq!(sign, [-1.0, 1.0]);
}
