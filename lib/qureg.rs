//! The numeric-engine contract consumed by gates and circuits.
//!
//! Gates never touch amplitudes directly. Instead, every operator is lowered to
//! calls on a [`Qureg`], a mutable quantum register that may hold either a
//! state-vector or a density matrix. Implementations decide how primitives are
//! evaluated and are responsible for their own run-time checks (qubit ranges,
//! repeated qubits, register kind, unitarity); failures come back as
//! [`EngineError`]s.
//!
//! Matrix arguments act on the listed targets with the `j`-th target as bit
//! `j` of the matrix index. Superoperators act on the column-major
//! vectorisation of the targets' reduced density matrix.

use std::fmt;
use nalgebra as na;
use num_complex::Complex64 as C64;
use crate::{
    error::{ EngineError, EngineResult },
    matrix,
};

/// A single-qubit Pauli operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pauli {
    /// Identity
    I,
    /// σ<sub>*x*</sub>
    X,
    /// σ<sub>*y*</sub>
    Y,
    /// σ<sub>*z*</sub>
    Z,
}

impl fmt::Display for Pauli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::I => write!(f, "{}", if f.alternate() { "." } else { "Id" }),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Pauli {
    /// Convert from a Pauli code (0 = I, 1 = X, 2 = Y, 3 = Z).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::I),
            1 => Some(Self::X),
            2 => Some(Self::Y),
            3 => Some(Self::Z),
            _ => None,
        }
    }

    /// Convert from an index, modulo 4.
    pub fn from_int(u: usize) -> Self {
        match u % 4 {
            0 => Self::I,
            1 => Self::X,
            2 => Self::Y,
            3 => Self::Z,
            _ => unreachable!(),
        }
    }
}

/// A mutable quantum register and the primitives that act on it.
///
/// Channel maps come in two layers: the raw `dephase`, `depolarise`, and
/// `damp` maps accept any real probability and apply the channel's linear
/// action as written, while the provided `mix_*` methods first check that the
/// probability describes a physical channel.
pub trait Qureg: Clone {
    /// Number of qubits represented.
    fn num_qubits(&self) -> usize;

    /// Return `true` if `self` is a density matrix.
    fn is_density_matrix(&self) -> bool;

    /// Overwrite the state of `self` with that of `src`, which must have the
    /// same size and kind.
    fn clone_state(&mut self, src: &Self) -> EngineResult<()>;

    /// Probability that measuring `qubit` gives `outcome`.
    fn prob_of_outcome(&self, qubit: usize, outcome: u8) -> EngineResult<f64>;

    fn hadamard(&mut self, targ: usize) -> EngineResult<()>;

    fn pauli_x(&mut self, targ: usize) -> EngineResult<()>;

    fn pauli_y(&mut self, targ: usize) -> EngineResult<()>;

    fn pauli_z(&mut self, targ: usize) -> EngineResult<()>;

    fn controlled_not(&mut self, ctrl: usize, targ: usize) -> EngineResult<()>;

    fn controlled_pauli_y(&mut self, ctrl: usize, targ: usize)
        -> EngineResult<()>;

    /// Flip every target, conditioned on all controls (possibly none).
    fn multi_qubit_not(&mut self, ctrls: &[usize], targs: &[usize])
        -> EngineResult<()>;

    /// Negate the amplitudes for which every listed qubit is 1.
    fn multi_controlled_phase_flip(&mut self, qubits: &[usize])
        -> EngineResult<()>;

    /// Apply `diag(1, e^iθ)`.
    fn phase_shift(&mut self, targ: usize, angle: f64) -> EngineResult<()>;

    fn controlled_phase_shift(&mut self, q1: usize, q2: usize, angle: f64)
        -> EngineResult<()>;

    /// Multiply by `e^iθ` the amplitudes for which every listed qubit is 1.
    fn multi_controlled_phase_shift(&mut self, qubits: &[usize], angle: f64)
        -> EngineResult<()>;

    /// Apply `exp(-i θ σ / 2)` for a single-qubit Pauli `σ`.
    fn rotate(&mut self, targ: usize, axis: Pauli, angle: f64)
        -> EngineResult<()>;

    fn controlled_rotate(
        &mut self,
        ctrl: usize,
        targ: usize,
        axis: Pauli,
        angle: f64,
    ) -> EngineResult<()>;

    /// Apply `exp(-i θ Z⊗...⊗Z / 2)`, conditioned on all controls.
    fn multi_rotate_z(&mut self, ctrls: &[usize], targs: &[usize], angle: f64)
        -> EngineResult<()>;

    /// Apply `exp(-i θ P / 2)` for the Pauli string `P` acting on `targs`,
    /// conditioned on all controls.
    fn multi_rotate_pauli(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        paulis: &[Pauli],
        angle: f64,
    ) -> EngineResult<()>;

    fn swap(&mut self, q1: usize, q2: usize) -> EngineResult<()>;

    /// Apply a controlled unitary, checking that it is unitary.
    fn unitary(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        u: &na::DMatrix<C64>,
    ) -> EngineResult<()>;

    /// Apply a controlled matrix as though it were unitary (`M ρ M†` on
    /// density matrices) without checking that it is.
    fn gate_matrix(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        m: &na::DMatrix<C64>,
    ) -> EngineResult<()>;

    /// Left-multiply by a controlled matrix (`M ρ` on density matrices).
    fn matrix(
        &mut self,
        ctrls: &[usize],
        targs: &[usize],
        m: &na::DMatrix<C64>,
    ) -> EngineResult<()>;

    /// Measure `targ` in the Z basis, collapsing the state and returning the
    /// outcome.
    fn measure(&mut self, targ: usize) -> EngineResult<u8>;

    /// Project `targ` onto `outcome` and renormalise, returning the outcome's
    /// probability before the collapse.
    fn collapse_to_outcome(&mut self, targ: usize, outcome: u8)
        -> EngineResult<f64>;

    /// Raw dephasing map on one or two targets:
    /// `(1 - p) ρ + p/(4^n - 1) Σ Z-strings`.
    fn dephase(&mut self, targs: &[usize], prob: f64) -> EngineResult<()>;

    /// Raw depolarising map on one or two targets:
    /// `(1 - p) ρ + p/(4^n - 1) Σ non-identity Pauli strings`.
    fn depolarise(&mut self, targs: &[usize], prob: f64) -> EngineResult<()>;

    /// Raw amplitude-damping map.
    fn damp(&mut self, targ: usize, prob: f64) -> EngineResult<()>;

    /// Apply a superoperator to the targets of a density matrix.
    fn superoperator(&mut self, targs: &[usize], sup: &na::DMatrix<C64>)
        -> EngineResult<()>;

    /// Multiply the whole register by a complex scalar.
    fn scale(&mut self, fac: C64) -> EngineResult<()>;

    /// Multiply the whole register by a real scalar.
    fn scale_real(&mut self, fac: f64) -> EngineResult<()> {
        self.scale(C64::from(fac))
    }

    /// Multiply the whole register by a purely imaginary scalar.
    fn scale_imag(&mut self, fac: f64) -> EngineResult<()> {
        self.scale(C64::new(0.0, fac))
    }

    /// Expectation value of a Pauli string covering every qubit, using `work`
    /// as scratch space.
    fn expec_pauli_product(&self, paulis: &[Pauli], work: &mut Self)
        -> EngineResult<f64>;

    /// Dephasing channel with a probability checked against its maximally
    /// mixing value.
    fn mix_dephasing(&mut self, targs: &[usize], prob: f64) -> EngineResult<()> {
        let max = if targs.len() == 2 { 0.75 } else { 0.5 };
        check_prob("dephasing", prob, max)?;
        self.dephase(targs, prob)
    }

    /// Depolarising channel with a probability checked against its maximally
    /// mixing value.
    fn mix_depolarising(&mut self, targs: &[usize], prob: f64)
        -> EngineResult<()>
    {
        let max = if targs.len() == 2 { 15.0 / 16.0 } else { 0.75 };
        check_prob("depolarising", prob, max)?;
        self.depolarise(targs, prob)
    }

    fn mix_damping(&mut self, targ: usize, prob: f64) -> EngineResult<()> {
        check_prob("damping", prob, 1.0)?;
        self.damp(targ, prob)
    }

    /// Trace-preserving Kraus map.
    fn mix_kraus_map(&mut self, targs: &[usize], ops: &[na::DMatrix<C64>])
        -> EngineResult<()>
    {
        if !matrix::is_trace_preserving(ops, 1e-10) {
            return Err(EngineError::NotTracePreserving("Kraus map"));
        }
        self.superoperator(targs, &matrix::superoperator(ops))
    }

    /// Kraus map without the trace-preservation check.
    fn mix_non_tp_kraus_map(
        &mut self,
        targs: &[usize],
        ops: &[na::DMatrix<C64>],
    ) -> EngineResult<()> {
        self.superoperator(targs, &matrix::superoperator(ops))
    }
}

fn check_prob(op: &'static str, prob: f64, max: f64) -> EngineResult<()> {
    if (0.0..=max).contains(&prob) {
        Ok(())
    } else {
        Err(EngineError::InvalidProbability { op, prob, max })
    }
}
