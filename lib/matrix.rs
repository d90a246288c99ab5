//! Dense complex matrices packed into flat parameter lists.
//!
//! Matrix-valued operators carry their matrices inside the flat real
//! parameter list of a gate: a `d × d` matrix takes `2 d²` reals, row-major,
//! with real and imaginary parts interleaved (`re00, im00, re01, im01, ...`).

use itertools::Itertools;
use nalgebra as na;
use num_complex::Complex64 as C64;
use once_cell::sync::Lazy;
use crate::qureg::Pauli;

/// Threshold below which a real quantity is treated as zero.
pub const EPS: f64 = 1e-13;

/// Return `true` if `x` is distinguishable from zero.
pub fn is_nonzero(x: f64) -> bool { x.abs() > EPS }

/// Number of reals needed to pack a `dim × dim` complex matrix.
pub fn flat_len(dim: usize) -> usize { 2 * dim * dim }

/// Unpack a `dim × dim` matrix from the start of `flat`.
///
/// *Panics if `flat` holds fewer than `2 dim²` values.*
pub fn from_flat(flat: &[f64], dim: usize) -> na::DMatrix<C64> {
    na::DMatrix::from_fn(dim, dim, |i, j| {
        let k = 2 * (i * dim + j);
        C64::new(flat[k], flat[k + 1])
    })
}

/// Pack a square matrix into its flat form.
pub fn to_flat(mat: &na::DMatrix<C64>) -> Vec<f64> {
    let mut flat: Vec<f64> = Vec::with_capacity(flat_len(mat.nrows()));
    for i in 0..mat.nrows() {
        for j in 0..mat.ncols() {
            flat.push(mat[(i, j)].re);
            flat.push(mat[(i, j)].im);
        }
    }
    flat
}

/// Replace a flat matrix with the flat form of its conjugate transpose.
pub fn flat_dagger(flat: &[f64], dim: usize) -> Vec<f64> {
    to_flat(&from_flat(flat, dim).adjoint())
}

/// Unpack `num` consecutive `dim × dim` matrices.
///
/// *Panics if `flat` holds fewer than `num × 2 dim²` values.*
pub fn ops_from_flat(flat: &[f64], num: usize, dim: usize)
    -> Vec<na::DMatrix<C64>>
{
    flat.chunks_exact(flat_len(dim))
        .take(num)
        .map(|chunk| from_flat(chunk, dim))
        .collect()
}

/// Form the superoperator `Σ conj(K) ⊗ K` of a set of Kraus operators.
///
/// The result acts on the column-major vectorisation of a density matrix
/// restricted to the operators' qubits.
pub fn superoperator(ops: &[na::DMatrix<C64>]) -> na::DMatrix<C64> {
    let dim = ops.first().map(|op| op.nrows()).unwrap_or(1);
    ops.iter()
        .fold(
            na::DMatrix::<C64>::zeros(dim * dim, dim * dim),
            |acc, op| acc + op.conjugate().kronecker(op),
        )
}

/// Return `true` if `mat` has a non-zero determinant.
pub fn is_invertible(mat: &na::DMatrix<C64>) -> bool {
    mat.is_square() && is_nonzero(mat.determinant().norm())
}

/// Return the inverse of `mat` if it is non-singular.
pub fn inverse(mat: &na::DMatrix<C64>) -> Option<na::DMatrix<C64>> {
    is_invertible(mat)
        .then(|| mat.clone().try_inverse())
        .flatten()
}

/// Return `true` if `mat` is unitary to within `tol`.
pub fn is_unitary(mat: &na::DMatrix<C64>, tol: f64) -> bool {
    mat.is_square() && {
        let prod = mat.adjoint() * mat;
        let ident = na::DMatrix::<C64>::identity(mat.nrows(), mat.ncols());
        (prod - ident).iter().all(|x| x.norm() < tol)
    }
}

/// Return `true` if `Σ K† K` is the identity to within `tol`.
pub fn is_trace_preserving(ops: &[na::DMatrix<C64>], tol: f64) -> bool {
    let Some(dim) = ops.first().map(|op| op.nrows()) else { return false; };
    let sum
        = ops.iter()
        .fold(na::DMatrix::<C64>::zeros(dim, dim), |acc, op| acc + op.adjoint() * op);
    let ident = na::DMatrix::<C64>::identity(dim, dim);
    (sum - ident).iter().all(|x| x.norm() < tol)
}

static PAULI_I: Lazy<na::DMatrix<C64>> =
    Lazy::new(|| na::DMatrix::identity(2, 2));

static PAULI_X: Lazy<na::DMatrix<C64>> =
    Lazy::new(|| {
        let mut x = na::DMatrix::zeros(2, 2);
        x[(0, 1)] = C64::from(1.0);
        x[(1, 0)] = C64::from(1.0);
        x
    });

static PAULI_Y: Lazy<na::DMatrix<C64>> =
    Lazy::new(|| {
        let mut y = na::DMatrix::zeros(2, 2);
        y[(0, 1)] = -C64::i();
        y[(1, 0)] =  C64::i();
        y
    });

static PAULI_Z: Lazy<na::DMatrix<C64>> =
    Lazy::new(|| {
        let mut z = na::DMatrix::zeros(2, 2);
        z[(0, 0)] = C64::from( 1.0);
        z[(1, 1)] = C64::from(-1.0);
        z
    });

/// Single-qubit matrix of a Pauli operator.
pub fn pauli(p: Pauli) -> &'static na::DMatrix<C64> {
    match p {
        Pauli::I => Lazy::force(&PAULI_I),
        Pauli::X => Lazy::force(&PAULI_X),
        Pauli::Y => Lazy::force(&PAULI_Y),
        Pauli::Z => Lazy::force(&PAULI_Z),
    }
}

/// Matrix of a tensor product of Paulis, where the `j`-th Pauli acts on bit
/// `j` of the local index.
pub fn pauli_string(paulis: &[Pauli]) -> na::DMatrix<C64> {
    paulis.iter().rev()
        .fold(
            na::DMatrix::identity(1, 1),
            |acc: na::DMatrix<C64>, p| acc.kronecker(pauli(*p)),
        )
}

/// `exp(-i θ P / 2)` for a Pauli string `P`.
pub fn pauli_rotation(paulis: &[Pauli], angle: f64) -> na::DMatrix<C64> {
    let p = pauli_string(paulis);
    let dim = p.nrows();
    let c = C64::from((angle / 2.0).cos());
    let s = C64::new(0.0, -(angle / 2.0).sin());
    na::DMatrix::<C64>::identity(dim, dim) * c + p * s
}

/// 2 × 2 matrix of a real-valued 2 × 2 array.
pub fn mat2(m: [[f64; 2]; 2]) -> na::DMatrix<C64> {
    na::DMatrix::from_fn(2, 2, |i, j| C64::from(m[i][j]))
}

pub(crate) fn fmt_complex(z: C64) -> String {
    match (is_nonzero(z.re), is_nonzero(z.im)) {
        (false, false) => "0".to_string(),
        (true, false) => format!("{}", z.re),
        (false, true) => format!("{}i", z.im),
        (true, true) if z.im < 0.0 => format!("{}-{}i", z.re, -z.im),
        (true, true) => format!("{}+{}i", z.re, z.im),
    }
}

pub(crate) fn fmt_matrix(mat: &na::DMatrix<C64>) -> String {
    let rows
        = mat.row_iter()
        .map(|row| {
            format!("{{{}}}", row.iter().map(|z| fmt_complex(*z)).join(", "))
        })
        .join(", ");
    format!("{{{}}}", rows)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flat_layout_is_row_major_interleaved() {
        let flat = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let m = from_flat(&flat, 2);
        assert_eq!(m[(0, 0)], C64::new(1.0, 2.0));
        assert_eq!(m[(0, 1)], C64::new(3.0, 4.0));
        assert_eq!(m[(1, 0)], C64::new(5.0, 6.0));
        assert_eq!(m[(1, 1)], C64::new(7.0, 8.0));
        assert_eq!(to_flat(&m), flat.to_vec());
    }

    #[test]
    fn dagger_conjugates_and_transposes() {
        let flat = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let dag = from_flat(&flat_dagger(&flat, 2), 2);
        assert_eq!(dag[(0, 1)], C64::new(5.0, -6.0));
        assert_eq!(dag[(1, 0)], C64::new(3.0, -4.0));
        assert_eq!(dag[(1, 1)], C64::new(7.0, -8.0));
    }

    #[test]
    fn singular_matrices_have_no_inverse() {
        let sing = mat2([[1.0, 2.0], [2.0, 4.0]]);
        assert!(!is_invertible(&sing));
        assert!(inverse(&sing).is_none());
        let reg = mat2([[1.0, 2.0], [3.0, 4.0]]);
        let inv = inverse(&reg).unwrap();
        let prod = reg * inv;
        assert!((prod - na::DMatrix::<C64>::identity(2, 2)).norm() < 1e-12);
    }

    #[test]
    fn pauli_rotation_by_pi_is_pauli_up_to_phase() {
        use std::f64::consts::PI;
        let rx = pauli_rotation(&[Pauli::X], PI);
        let expected = pauli(Pauli::X) * C64::new(0.0, -1.0);
        assert!((rx - expected).norm() < 1e-12);
    }

    #[test]
    fn pauli_string_orders_first_pauli_as_low_bit() {
        let xz = pauli_string(&[Pauli::X, Pauli::Z]);
        // |01> (bit 0 set) -> X flips bit 0 -> |00>, Z on bit 1 gives +1
        assert_eq!(xz[(0, 1)], C64::from(1.0));
        // |11> -> |10>, Z on bit 1 set gives -1
        assert_eq!(xz[(2, 3)], C64::from(-1.0));
    }

    #[test]
    fn dephasing_superoperator_is_diagonal() {
        let p: f64 = 0.2;
        let ops = vec![
            mat2([[(1.0 - p).sqrt(), 0.0], [0.0, (1.0 - p).sqrt()]]),
            mat2([[p.sqrt(), 0.0], [0.0, -p.sqrt()]]),
        ];
        assert!(is_trace_preserving(&ops, 1e-12));
        let sup = superoperator(&ops);
        assert_eq!(sup.nrows(), 4);
        assert!((sup[(0, 0)] - C64::from(1.0)).norm() < 1e-12);
        assert!((sup[(1, 1)] - C64::from(1.0 - 2.0 * p)).norm() < 1e-12);
        assert!((sup[(3, 3)] - C64::from(1.0)).norm() < 1e-12);
        assert!(is_invertible(&sup));
    }
}
