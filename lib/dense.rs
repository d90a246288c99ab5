//! Dense reference implementation of [`Qureg`].
//!
//! A [`DenseQureg`] stores either a full state-vector of 2<sup>*n*</sup>
//! amplitudes or a full 2<sup>*n*</sup> × 2<sup>*n*</sup> density matrix. Every
//! primitive is lowered to a single kernel that applies a small matrix to a
//! subset of bits of a flat amplitude array. Density matrices are treated as
//! 2*n*-qubit vectors in column-major order, so that qubit `q` of the row index
//! is bit `q` and qubit `q` of the column index is bit `q + n`: left
//! multiplication by `M` acts on the low bits, and right multiplication by
//! `M†` acts as `conj(M)` on the high bits.
//!
//! This is *O*(4<sup>*n*</sup>) in memory for density matrices and makes no
//! attempt at being fast; it exists so that operators can be exercised
//! against real amplitudes.

use std::fmt;
use nalgebra as na;
use num_complex::Complex64 as C64;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use rustc_hash::FxHashSet;
use crate::{
    error::{ EngineError, EngineResult },
    matrix::{ self, EPS },
    qureg::{ Pauli, Qureg },
};

#[derive(Clone, Debug, PartialEq)]
enum Amps {
    Vector(na::DVector<C64>),
    Density(na::DMatrix<C64>),
}

/// A register of `n` qubits backed by a dense state-vector or density matrix.
///
/// Measurements draw from an internal random number generator, which is not
/// touched by [`Qureg::clone_state`].
#[derive(Clone, Debug)]
pub struct DenseQureg {
    n: usize,
    amps: Amps,
    rng: StdRng,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    seed.map(StdRng::seed_from_u64)
        .unwrap_or_else(StdRng::from_entropy)
}

// number of amplitudes along one axis of an `n`-qubit register, if `axes`
// such axes can be indexed by a `usize`
fn checked_dim(n: usize, axes: u32) -> EngineResult<usize> {
    u32::try_from(n).ok()
        .and_then(|k| k.checked_mul(axes))
        .filter(|k| *k < usize::BITS)
        .map(|_| 1_usize << n)
        .ok_or(EngineError::TooManyQubits(n))
}

impl DenseQureg {
    /// Create a new `n`-qubit state-vector initialized to ∣0...0⟩, optionally
    /// seeding the internal random number generator.
    ///
    /// Fails with [`EngineError::TooManyQubits`] if `2^n` does not fit in a
    /// `usize`.
    pub fn try_new(n: usize, seed: Option<u64>) -> EngineResult<Self> {
        let mut psi: na::DVector<C64> = na::DVector::zeros(checked_dim(n, 1)?);
        psi[0] = C64::from(1.0);
        Ok(Self { n, amps: Amps::Vector(psi), rng: make_rng(seed) })
    }

    /// Like [`try_new`][Self::try_new].
    ///
    /// *Panics if `2^n` does not fit in a `usize`.*
    pub fn new(n: usize, seed: Option<u64>) -> Self {
        match Self::try_new(n, seed) {
            Ok(q) => q,
            Err(err) => panic!("{}", err),
        }
    }

    /// Create a new `n`-qubit density matrix initialized to ∣0...0⟩⟨0...0∣.
    ///
    /// Fails with [`EngineError::TooManyQubits`] if `4^n` does not fit in a
    /// `usize`.
    pub fn try_new_density(n: usize, seed: Option<u64>) -> EngineResult<Self> {
        let dim = checked_dim(n, 2)?;
        let mut rho: na::DMatrix<C64> = na::DMatrix::zeros(dim, dim);
        rho[(0, 0)] = C64::from(1.0);
        Ok(Self { n, amps: Amps::Density(rho), rng: make_rng(seed) })
    }

    /// Like [`try_new_density`][Self::try_new_density].
    ///
    /// *Panics if `4^n` does not fit in a `usize`.*
    pub fn new_density(n: usize, seed: Option<u64>) -> Self {
        match Self::try_new_density(n, seed) {
            Ok(q) => q,
            Err(err) => panic!("{}", err),
        }
    }

    /// Create a state-vector from a list of amplitudes, whose length must be a
    /// power of two.
    ///
    /// The amplitudes are taken as given and not normalised.
    pub fn from_amps(amps: Vec<C64>, seed: Option<u64>) -> EngineResult<Self> {
        let len = amps.len();
        if !len.is_power_of_two() {
            return Err(EngineError::AmplitudeCount(len));
        }
        let n = len.trailing_zeros() as usize;
        let psi = na::DVector::from_vec(amps);
        Ok(Self { n, amps: Amps::Vector(psi), rng: make_rng(seed) })
    }

    /// Return the density matrix `∣ψ⟩⟨ψ∣` of a state-vector, or a copy of
    /// `self` if it is already a density matrix.
    pub fn to_density(&self) -> Self {
        let amps = match &self.amps {
            Amps::Vector(psi) => Amps::Density(psi * psi.adjoint()),
            Amps::Density(rho) => Amps::Density(rho.clone()),
        };
        Self { n: self.n, amps, rng: self.rng.clone() }
    }

    /// Reset to ∣0...0⟩.
    pub fn init_zero(&mut self) { self.init_classical(0); }

    /// Reset to the classical basis state ∣`k`⟩ (modulo the register size).
    pub fn init_classical(&mut self, k: usize) {
        // `n` is bounded at construction
        let k = k % (1_usize << self.n);
        match &mut self.amps {
            Amps::Vector(psi) => {
                psi.fill(C64::from(0.0));
                psi[k] = C64::from(1.0);
            },
            Amps::Density(rho) => {
                rho.fill(C64::from(0.0));
                rho[(k, k)] = C64::from(1.0);
            },
        }
    }

    /// Reset to ∣+...+⟩.
    pub fn init_plus(&mut self) {
        let dim = 1_usize << self.n;
        match &mut self.amps {
            Amps::Vector(psi) => {
                psi.fill(C64::from((dim as f64).sqrt().recip()));
            },
            Amps::Density(rho) => {
                rho.fill(C64::from((dim as f64).recip()));
            },
        }
    }

    /// Return the amplitudes of a state-vector.
    pub fn amplitudes(&self) -> Option<&na::DVector<C64>> {
        match &self.amps {
            Amps::Vector(psi) => Some(psi),
            Amps::Density(_) => None,
        }
    }

    /// Return the elements of a density matrix.
    pub fn density_matrix(&self) -> Option<&na::DMatrix<C64>> {
        match &self.amps {
            Amps::Vector(_) => None,
            Amps::Density(rho) => Some(rho),
        }
    }

    /// Return the `k`-th amplitude of a state-vector.
    pub fn amp(&self, k: usize) -> Option<C64> {
        self.amplitudes().and_then(|psi| psi.get(k).copied())
    }

    /// Return the probability of each classical basis state.
    pub fn probabilities(&self) -> Vec<f64> {
        match &self.amps {
            Amps::Vector(psi) => psi.iter().map(|a| a.norm_sqr()).collect(),
            Amps::Density(rho) => rho.diagonal().iter().map(|a| a.re).collect(),
        }
    }

    /// Return the total probability, i.e. the squared norm of a state-vector
    /// or the trace of a density matrix.
    pub fn total_prob(&self) -> f64 { self.probabilities().into_iter().sum() }

    /// Inner product `⟨self∣other⟩` of two state-vectors.
    pub fn inner_product(&self, other: &Self) -> EngineResult<C64> {
        match (&self.amps, &other.amps) {
            (Amps::Vector(a), Amps::Vector(b)) if a.len() == b.len()
                => Ok(a.dotc(b)),
            (Amps::Vector(_), Amps::Vector(_))
                => Err(EngineError::MismatchedRegisters),
            _ => Err(EngineError::NotStateVector("inner product")),
        }
    }

    /// Fidelity of `self` with a pure state-vector `pure`.
    pub fn fidelity(&self, pure: &Self) -> EngineResult<f64> {
        let Amps::Vector(psi) = &pure.amps else {
            return Err(EngineError::NotStateVector("fidelity reference"));
        };
        if pure.n != self.n { return Err(EngineError::MismatchedRegisters); }
        match &self.amps {
            Amps::Vector(phi) => Ok(psi.dotc(phi).norm_sqr()),
            Amps::Density(rho) => Ok(psi.dotc(&(rho * psi)).re),
        }
    }

    /// Largest absolute difference between corresponding elements of `self`
    /// and `other`, or infinity if they differ in size or kind.
    pub fn max_deviation(&self, other: &Self) -> f64 {
        let (a, b) = match (&self.amps, &other.amps) {
            (Amps::Vector(a), Amps::Vector(b)) => (a.as_slice(), b.as_slice()),
            (Amps::Density(a), Amps::Density(b)) => (a.as_slice(), b.as_slice()),
            _ => { return f64::INFINITY; },
        };
        if a.len() != b.len() { return f64::INFINITY; }
        a.iter().zip(b)
            .map(|(x, y)| (x - y).norm())
            .fold(0.0, f64::max)
    }

    fn data_mut(&mut self) -> &mut [C64] {
        match &mut self.amps {
            Amps::Vector(psi) => psi.as_mut_slice(),
            Amps::Density(rho) => rho.as_mut_slice(),
        }
    }

    fn check_qubits(&self, ctrls: &[usize], targs: &[usize])
        -> EngineResult<()>
    {
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        for &q in ctrls.iter().chain(targs) {
            if q >= self.n {
                return Err(
                    EngineError::QubitOutOfRange { qubit: q, num_qubits: self.n });
            }
            if !seen.insert(q) { return Err(EngineError::RepeatedQubit(q)); }
        }
        Ok(())
    }

    fn check_matrix(targs: &[usize], m: &na::DMatrix<C64>)
        -> EngineResult<()>
    {
        let dim = 1_usize << targs.len();
        if m.nrows() != dim || m.ncols() != dim {
            return Err(EngineError::MatrixShape {
                expected: dim,
                rows: m.nrows(),
                cols: m.ncols(),
            });
        }
        Ok(())
    }

    fn require_density(&self, op: &'static str) -> EngineResult<()> {
        if self.is_density_matrix() {
            Ok(())
        } else {
            Err(EngineError::NotDensityMatrix(op))
        }
    }

    // M ψ, or M ρ
    fn left(&mut self, ctrls: &[usize], targs: &[usize], m: &na::DMatrix<C64>)
        -> EngineResult<()>
    {
        self.check_qubits(ctrls, targs)?;
        Self::check_matrix(targs, m)?;
        apply_kernel(self.data_mut(), ctrls, targs, m);
        Ok(())
    }

    // M ψ, or M ρ M†
    fn conjugate_by(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        m: &na::DMatrix<C64>,
    ) -> EngineResult<()> {
        self.left(ctrls, targs, m)?;
        if self.is_density_matrix() {
            let n = self.n;
            let ctrls_c: Vec<usize> = ctrls.iter().map(|c| c + n).collect();
            let targs_c: Vec<usize> = targs.iter().map(|t| t + n).collect();
            apply_kernel(self.data_mut(), &ctrls_c, &targs_c, &m.conjugate());
        }
        Ok(())
    }

    // Σ_k w_k P_k ρ P_k for Pauli strings P_k on `targs`
    fn pauli_mix(&mut self, targs: &[usize], terms: &[(f64, Vec<Pauli>)])
        -> EngineResult<()>
    {
        self.check_qubits(&[], targs)?;
        let Amps::Density(rho) = &self.amps else {
            return Err(EngineError::NotDensityMatrix("Pauli channel"));
        };
        let n = self.n;
        let targs_c: Vec<usize> = targs.iter().map(|t| t + n).collect();
        let mut acc: na::DMatrix<C64> = na::DMatrix::zeros(rho.nrows(), rho.ncols());
        for (w, paulis) in terms.iter() {
            let p = matrix::pauli_string(paulis);
            let mut term = rho.clone();
            apply_kernel(term.as_mut_slice(), &[], targs, &p);
            apply_kernel(term.as_mut_slice(), &[], &targs_c, &p.conjugate());
            acc += term * C64::from(*w);
        }
        self.amps = Amps::Density(acc);
        Ok(())
    }
}

// bit positions of `a` spread onto the qubits in `targs`
fn spread(a: usize, targs: &[usize]) -> usize {
    targs.iter().enumerate()
        .filter(|(j, _)| (a >> j) & 1 == 1)
        .fold(0, |acc, (_, t)| acc | (1 << t))
}

fn mask(qubits: &[usize]) -> usize {
    qubits.iter().fold(0, |acc, q| acc | (1 << q))
}

// apply `m` to the `targs` bits of every amplitude block whose `ctrls` bits are
// all set
fn apply_kernel(
    amps: &mut [C64],
    ctrls: &[usize],
    targs: &[usize],
    m: &na::DMatrix<C64>,
) {
    let ctrl_mask = mask(ctrls);
    let targ_mask = mask(targs);
    let offsets: Vec<usize>
        = (0..1_usize << targs.len()).map(|a| spread(a, targs)).collect();
    let mut buf: Vec<C64> = vec![C64::from(0.0); offsets.len()];
    for base in 0..amps.len() {
        if (base & targ_mask) != 0 || (base & ctrl_mask) != ctrl_mask {
            continue;
        }
        buf.iter_mut().zip(&offsets)
            .for_each(|(b, off)| { *b = amps[base | off]; });
        for (a, off) in offsets.iter().enumerate() {
            amps[base | off]
                = buf.iter().enumerate()
                .map(|(b, x)| m[(a, b)] * x)
                .sum();
        }
    }
}

fn hadamard_matrix() -> na::DMatrix<C64> {
    use std::f64::consts::FRAC_1_SQRT_2;
    matrix::mat2([[FRAC_1_SQRT_2, FRAC_1_SQRT_2], [FRAC_1_SQRT_2, -FRAC_1_SQRT_2]])
}

fn phase_matrix(angle: f64) -> na::DMatrix<C64> {
    let mut m = na::DMatrix::identity(2, 2);
    m[(1, 1)] = C64::cis(angle);
    m
}

fn split_last<'a>(qubits: &'a [usize], op: &'static str)
    -> EngineResult<(&'a [usize], usize)>
{
    qubits.split_last()
        .map(|(last, rest)| (rest, *last))
        .ok_or(EngineError::TargetCount { op, found: 0, expected: "at least 1" })
}

impl Qureg for DenseQureg {
    fn num_qubits(&self) -> usize { self.n }

    fn is_density_matrix(&self) -> bool {
        matches!(self.amps, Amps::Density(_))
    }

    fn clone_state(&mut self, src: &Self) -> EngineResult<()> {
        if self.n != src.n || self.is_density_matrix() != src.is_density_matrix() {
            return Err(EngineError::MismatchedRegisters);
        }
        self.amps.clone_from(&src.amps);
        Ok(())
    }

    fn prob_of_outcome(&self, qubit: usize, outcome: u8) -> EngineResult<f64> {
        self.check_qubits(&[], &[qubit])?;
        if outcome > 1 { return Err(EngineError::InvalidOutcome(outcome.into())); }
        let bit = usize::from(outcome);
        let prob
            = self.probabilities().into_iter()
            .enumerate()
            .filter(|(k, _)| (k >> qubit) & 1 == bit)
            .map(|(_, p)| p)
            .sum();
        Ok(prob)
    }

    fn hadamard(&mut self, targ: usize) -> EngineResult<()> {
        self.conjugate_by(&[], &[targ], &hadamard_matrix())
    }

    fn pauli_x(&mut self, targ: usize) -> EngineResult<()> {
        self.conjugate_by(&[], &[targ], matrix::pauli(Pauli::X))
    }

    fn pauli_y(&mut self, targ: usize) -> EngineResult<()> {
        self.conjugate_by(&[], &[targ], matrix::pauli(Pauli::Y))
    }

    fn pauli_z(&mut self, targ: usize) -> EngineResult<()> {
        self.conjugate_by(&[], &[targ], matrix::pauli(Pauli::Z))
    }

    fn controlled_not(&mut self, ctrl: usize, targ: usize) -> EngineResult<()> {
        self.conjugate_by(&[ctrl], &[targ], matrix::pauli(Pauli::X))
    }

    fn controlled_pauli_y(&mut self, ctrl: usize, targ: usize)
        -> EngineResult<()>
    {
        self.conjugate_by(&[ctrl], &[targ], matrix::pauli(Pauli::Y))
    }

    fn multi_qubit_not(&mut self, ctrls: &[usize], targs: &[usize])
        -> EngineResult<()>
    {
        if targs.is_empty() {
            return Err(EngineError::TargetCount {
                op: "multi-qubit not",
                found: 0,
                expected: "at least 1",
            });
        }
        let xs = matrix::pauli_string(&vec![Pauli::X; targs.len()]);
        self.conjugate_by(ctrls, targs, &xs)
    }

    fn multi_controlled_phase_flip(&mut self, qubits: &[usize])
        -> EngineResult<()>
    {
        let (ctrls, targ) = split_last(qubits, "phase flip")?;
        self.conjugate_by(ctrls, &[targ], matrix::pauli(Pauli::Z))
    }

    fn phase_shift(&mut self, targ: usize, angle: f64) -> EngineResult<()> {
        self.conjugate_by(&[], &[targ], &phase_matrix(angle))
    }

    fn controlled_phase_shift(&mut self, q1: usize, q2: usize, angle: f64)
        -> EngineResult<()>
    {
        self.conjugate_by(&[q1], &[q2], &phase_matrix(angle))
    }

    fn multi_controlled_phase_shift(&mut self, qubits: &[usize], angle: f64)
        -> EngineResult<()>
    {
        let (ctrls, targ) = split_last(qubits, "phase shift")?;
        self.conjugate_by(ctrls, &[targ], &phase_matrix(angle))
    }

    fn rotate(&mut self, targ: usize, axis: Pauli, angle: f64)
        -> EngineResult<()>
    {
        self.conjugate_by(&[], &[targ], &matrix::pauli_rotation(&[axis], angle))
    }

    fn controlled_rotate(
        &mut self,
        ctrl: usize,
        targ: usize,
        axis: Pauli,
        angle: f64,
    ) -> EngineResult<()> {
        self.conjugate_by(
            &[ctrl], &[targ], &matrix::pauli_rotation(&[axis], angle))
    }

    fn multi_rotate_z(&mut self, ctrls: &[usize], targs: &[usize], angle: f64)
        -> EngineResult<()>
    {
        let zs = vec![Pauli::Z; targs.len()];
        self.multi_rotate_pauli(ctrls, targs, &zs, angle)
    }

    fn multi_rotate_pauli(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        paulis: &[Pauli],
        angle: f64,
    ) -> EngineResult<()> {
        if paulis.len() != targs.len() {
            return Err(EngineError::PauliStringLength {
                found: paulis.len(),
                num_qubits: targs.len(),
            });
        }
        if targs.is_empty() {
            return Err(EngineError::TargetCount {
                op: "Pauli rotation",
                found: 0,
                expected: "at least 1",
            });
        }
        self.conjugate_by(ctrls, targs, &matrix::pauli_rotation(paulis, angle))
    }

    fn swap(&mut self, q1: usize, q2: usize) -> EngineResult<()> {
        let mut sw: na::DMatrix<C64> = na::DMatrix::zeros(4, 4);
        sw[(0, 0)] = C64::from(1.0);
        sw[(1, 2)] = C64::from(1.0);
        sw[(2, 1)] = C64::from(1.0);
        sw[(3, 3)] = C64::from(1.0);
        self.conjugate_by(&[], &[q1, q2], &sw)
    }

    fn unitary(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        u: &na::DMatrix<C64>,
    ) -> EngineResult<()> {
        Self::check_matrix(targs, u)?;
        if !matrix::is_unitary(u, 1e-10) {
            return Err(EngineError::NotUnitary("unitary"));
        }
        self.conjugate_by(ctrls, targs, u)
    }

    fn gate_matrix(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        m: &na::DMatrix<C64>,
    ) -> EngineResult<()> {
        self.conjugate_by(ctrls, targs, m)
    }

    fn matrix(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        m: &na::DMatrix<C64>,
    ) -> EngineResult<()> {
        self.left(ctrls, targs, m)
    }

    fn measure(&mut self, targ: usize) -> EngineResult<u8> {
        let p0 = self.prob_of_outcome(targ, 0)?;
        let outcome: u8 =
            if p0 >= 1.0 - EPS {
                0
            } else if p0 <= EPS {
                1
            } else {
                u8::from(self.rng.gen::<f64>() >= p0)
            };
        self.collapse_to_outcome(targ, outcome)?;
        Ok(outcome)
    }

    fn collapse_to_outcome(&mut self, targ: usize, outcome: u8)
        -> EngineResult<f64>
    {
        let prob = self.prob_of_outcome(targ, outcome)?;
        if prob <= EPS {
            return Err(EngineError::ImpossibleOutcome { qubit: targ, outcome });
        }
        let bit = usize::from(outcome);
        let n = self.n;
        match &mut self.amps {
            Amps::Vector(psi) => {
                let renorm = prob.sqrt().recip();
                psi.iter_mut().enumerate()
                    .for_each(|(k, a)| {
                        if (k >> targ) & 1 == bit {
                            *a *= renorm;
                        } else {
                            *a = C64::from(0.0);
                        }
                    });
            },
            Amps::Density(rho) => {
                let renorm = prob.recip();
                let dim = 1_usize << n;
                for c in 0..dim {
                    for r in 0..dim {
                        if (r >> targ) & 1 == bit && (c >> targ) & 1 == bit {
                            rho[(r, c)] *= renorm;
                        } else {
                            rho[(r, c)] = C64::from(0.0);
                        }
                    }
                }
            },
        }
        Ok(prob)
    }

    fn dephase(&mut self, targs: &[usize], prob: f64) -> EngineResult<()> {
        self.require_density("dephasing")?;
        let terms: Vec<(f64, Vec<Pauli>)> = match targs.len() {
            1 => vec![
                (1.0 - prob, vec![Pauli::I]),
                (prob, vec![Pauli::Z]),
            ],
            2 => vec![
                (1.0 - prob, vec![Pauli::I, Pauli::I]),
                (prob / 3.0, vec![Pauli::Z, Pauli::I]),
                (prob / 3.0, vec![Pauli::I, Pauli::Z]),
                (prob / 3.0, vec![Pauli::Z, Pauli::Z]),
            ],
            k => {
                return Err(EngineError::TargetCount {
                    op: "dephasing",
                    found: k,
                    expected: "1 or 2",
                });
            },
        };
        self.pauli_mix(targs, &terms)
    }

    fn depolarise(&mut self, targs: &[usize], prob: f64) -> EngineResult<()> {
        self.require_density("depolarising")?;
        let terms: Vec<(f64, Vec<Pauli>)> = match targs.len() {
            1 => (0..4_usize)
                .map(|k| {
                    let w = if k == 0 { 1.0 - prob } else { prob / 3.0 };
                    (w, vec![Pauli::from_int(k)])
                })
                .collect(),
            2 => (0..16_usize)
                .map(|k| {
                    let w = if k == 0 { 1.0 - prob } else { prob / 15.0 };
                    (w, vec![Pauli::from_int(k / 4), Pauli::from_int(k % 4)])
                })
                .collect(),
            k => {
                return Err(EngineError::TargetCount {
                    op: "depolarising",
                    found: k,
                    expected: "1 or 2",
                });
            },
        };
        self.pauli_mix(targs, &terms)
    }

    fn damp(&mut self, targ: usize, prob: f64) -> EngineResult<()> {
        self.check_qubits(&[], &[targ])?;
        let Amps::Density(rho) = &mut self.amps else {
            return Err(EngineError::NotDensityMatrix("damping"));
        };
        let old = rho.clone();
        let dim = old.nrows();
        let bit = 1_usize << targ;
        let decay = C64::from(1.0 - prob).sqrt();
        for c in 0..dim {
            for r in 0..dim {
                rho[(r, c)] = match ((r & bit) != 0, (c & bit) != 0) {
                    (false, false) => old[(r, c)] + old[(r | bit, c | bit)] * prob,
                    (true, true) => old[(r, c)] * (1.0 - prob),
                    _ => old[(r, c)] * decay,
                };
            }
        }
        Ok(())
    }

    fn superoperator(&mut self, targs: &[usize], sup: &na::DMatrix<C64>)
        -> EngineResult<()>
    {
        self.require_density("superoperator")?;
        self.check_qubits(&[], targs)?;
        let n = self.n;
        let qubits: Vec<usize>
            = targs.iter().copied()
            .chain(targs.iter().map(|t| t + n))
            .collect();
        Self::check_matrix(&qubits, sup)?;
        apply_kernel(self.data_mut(), &[], &qubits, sup);
        Ok(())
    }

    fn scale(&mut self, fac: C64) -> EngineResult<()> {
        self.data_mut().iter_mut().for_each(|a| { *a *= fac; });
        Ok(())
    }

    fn scale_real(&mut self, fac: f64) -> EngineResult<()> {
        self.data_mut().iter_mut().for_each(|a| { *a *= fac; });
        Ok(())
    }

    fn scale_imag(&mut self, fac: f64) -> EngineResult<()> {
        self.data_mut().iter_mut()
            .for_each(|a| { *a = C64::new(-a.im * fac, a.re * fac); });
        Ok(())
    }

    fn expec_pauli_product(&self, paulis: &[Pauli], work: &mut Self)
        -> EngineResult<f64>
    {
        if paulis.len() != self.n {
            return Err(EngineError::PauliStringLength {
                found: paulis.len(),
                num_qubits: self.n,
            });
        }
        work.clone_state(self)?;
        for (q, p) in paulis.iter().enumerate() {
            if *p != Pauli::I { work.left(&[], &[q], matrix::pauli(*p))?; }
        }
        match (&self.amps, &work.amps) {
            (Amps::Vector(psi), Amps::Vector(phi)) => Ok(psi.dotc(phi).re),
            (Amps::Density(_), Amps::Density(prho)) => Ok(prho.trace().re),
            _ => Err(EngineError::MismatchedRegisters),
        }
    }
}

impl fmt::Display for DenseQureg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.amps {
            Amps::Vector(psi) => {
                let mut first = true;
                for (k, a) in psi.iter().enumerate() {
                    if a.norm() <= EPS { continue; }
                    if !first { write!(f, " ")?; }
                    write!(
                        f,
                        "({})∣{:0width$b}⟩",
                        matrix::fmt_complex(*a),
                        k,
                        width = self.n.max(1),
                    )?;
                    first = false;
                }
                if first { write!(f, "0")?; }
                Ok(())
            },
            Amps::Density(rho) => write!(f, "{}", matrix::fmt_matrix(rho)),
        }
    }
}
