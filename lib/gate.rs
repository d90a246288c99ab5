//! Single operators acting on a [`Qureg`].
//!
//! A [`Gate`] is a flat, caller-supplied description of one operator: an
//! [`Opcode`], a list of control qubits, a list of target qubits, and a list of
//! real parameters whose meaning depends on the opcode. Nothing is checked at
//! construction; [`Gate::validate`] performs the structural checks, and is run
//! implicitly by everything that needs to interpret the parameters.
//!
//! Parameter layouts:
//! - `Rx`, `Ry`, `Rz`, `Ph`, `G`: `[angle]`
//! - `R`: `[angle, pauli_0, ..., pauli_{k-1}]` with one Pauli code (0 = I, 1 =
//!   X, 2 = Y, 3 = Z) per target
//! - `U`, `UNonNorm`, `Matr`: one flattened `2^k × 2^k` matrix (see
//!   [`matrix`][crate::matrix])
//! - `Deph`, `Depol`, `Damp`: `[prob]`
//! - `P`: either `[packed]`, whose least significant bit is the outcome of the
//!   last target, or one outcome per target
//! - `Kraus`, `KrausNonTP`: `[n, op_0..., ..., op_{n-1}...]`
//! - `Fac`: `[re, im]`

use std::{ f64::consts::{ FRAC_PI_2, FRAC_PI_4 }, fmt };
use itertools::Itertools;
use nalgebra as na;
use num_complex::Complex64 as C64;
use rand::{ distributions::{ Distribution, WeightedIndex }, Rng };
use crate::{
    error::{
        CircuitError,
        CircuitResult,
        EngineError,
        Field,
        Irreversible,
    },
    matrix::{ self, is_nonzero },
    opcode::Opcode,
    qureg::{ Pauli, Qureg },
};

/// Selects a branch of a gate or circuit decomposition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Branch {
    /// A specific branch, counted from zero.
    Index(u64),
    /// A branch drawn at random with probability proportional to its weight.
    Random,
}

/// Description of a single operator.
#[derive(Clone, Debug, PartialEq)]
pub struct Gate {
    opcode: Opcode,
    controls: Vec<usize>,
    targets: Vec<usize>,
    params: Vec<f64>,
}

fn shape_err<S>(op: Opcode, field: Field, found: usize, expected: S)
    -> CircuitError
where S: Into<String>
{
    CircuitError::InvalidOperatorShape {
        op: op.symbol(),
        field,
        found,
        expected: expected.into(),
    }
}

fn outcome_bit(x: f64) -> CircuitResult<u8> {
    if x == 0.0 {
        Ok(0)
    } else if x == 1.0 {
        Ok(1)
    } else {
        Err(EngineError::InvalidOutcome(x as i64).into())
    }
}

fn prob_err(op: String, prob: f64, max: f64) -> CircuitError {
    CircuitError::InvalidChannelParameter { op, prob, max }
}

fn check_branch_prob(op: String, prob: f64, max: f64) -> CircuitResult<()> {
    if (0.0..=max).contains(&prob) {
        Ok(())
    } else {
        Err(prob_err(op, prob, max))
    }
}

impl Gate {
    /// Create a new gate. Nothing is validated until the gate is used.
    pub fn new(
        opcode: Opcode,
        controls: Vec<usize>,
        targets: Vec<usize>,
        params: Vec<f64>,
    ) -> Self
    {
        Self { opcode, controls, targets, params }
    }

    /// Create a new gate from a raw wire code.
    pub fn from_raw(
        code: i64,
        controls: Vec<usize>,
        targets: Vec<usize>,
        params: Vec<f64>,
    ) -> CircuitResult<Self>
    {
        Ok(Self::new(Opcode::from_code(code)?, controls, targets, params))
    }

    pub fn opcode(&self) -> Opcode { self.opcode }

    pub fn controls(&self) -> &[usize] { &self.controls }

    pub fn targets(&self) -> &[usize] { &self.targets }

    pub fn params(&self) -> &[f64] { &self.params }

    /// Number of values written to an output buffer by [`apply`][Self::apply]:
    /// one per target for `M`, one for `P`, and zero otherwise.
    pub fn num_outputs(&self) -> usize {
        match self.opcode {
            Opcode::M => self.targets.len(),
            Opcode::P => 1,
            _ => 0,
        }
    }

    pub fn is_unitary(&self) -> bool { self.opcode.is_unitary() }

    pub fn is_pure(&self) -> bool { self.opcode.is_pure() }

    // side length of a matrix on all targets; valid only after `validate`
    fn dim(&self) -> usize { 1 << self.targets.len() }

    fn num_params(&self, n: usize) -> CircuitResult<()> {
        if self.params.len() == n {
            Ok(())
        } else {
            Err(shape_err(self.opcode, Field::Params, self.params.len(), n.to_string()))
        }
    }

    fn no_controls(&self) -> CircuitResult<()> {
        if self.controls.is_empty() {
            Ok(())
        } else {
            Err(shape_err(self.opcode, Field::Controls, self.controls.len(), "0"))
        }
    }

    fn num_targets(&self, n: usize) -> CircuitResult<()> {
        if self.targets.len() == n {
            Ok(())
        } else {
            Err(shape_err(self.opcode, Field::Targets, self.targets.len(), n.to_string()))
        }
    }

    fn some_targets(&self) -> CircuitResult<()> {
        if self.targets.is_empty() {
            Err(shape_err(self.opcode, Field::Targets, 0, "at least 1"))
        } else {
            Ok(())
        }
    }

    fn one_or_two_targets(&self) -> CircuitResult<()> {
        match self.targets.len() {
            1 | 2 => Ok(()),
            k => Err(shape_err(self.opcode, Field::Targets, k, "1 or 2")),
        }
    }

    /// Check the numbers of controls, targets, and parameters against what the
    /// opcode requires.
    ///
    /// This is purely structural: qubit indices are not checked against any
    /// register, and channel probabilities are not range-checked.
    pub fn validate(&self) -> CircuitResult<()> {
        let op = self.opcode;
        match op {
            Opcode::G => {
                self.num_params(1)?;
                self.no_controls()?;
                self.num_targets(0)
            },
            Opcode::Fac => {
                self.num_params(2)?;
                self.no_controls()?;
                self.num_targets(0)
            },
            Opcode::Id => self.num_params(0),
            Opcode::X => {
                self.num_params(0)?;
                self.some_targets()
            },
            Opcode::H => {
                self.num_params(0)?;
                self.no_controls()?;
                self.num_targets(1)
            },
            Opcode::S | Opcode::T | Opcode::Z => {
                self.num_params(0)?;
                self.num_targets(1)
            },
            Opcode::Y => {
                self.num_params(0)?;
                self.num_targets(1)?;
                if self.controls.len() > 1 {
                    return Err(shape_err(
                        op, Field::Controls, self.controls.len(), "at most 1"));
                }
                Ok(())
            },
            Opcode::Ph => {
                self.num_params(1)?;
                let nqubits = self.controls.len() + self.targets.len();
                if nqubits < 1 {
                    return Err(shape_err(op, Field::Qubits, nqubits, "at least 1"));
                }
                Ok(())
            },
            Opcode::Rx | Opcode::Ry | Opcode::Rz => {
                self.num_params(1)?;
                self.some_targets()
            },
            Opcode::R => {
                self.some_targets()?;
                self.num_params(self.targets.len() + 1)?;
                if let Some(bad)
                    = self.params[1..].iter()
                    .find(|c| c.fract() != 0.0 || Pauli::from_code(**c as i64).is_none())
                {
                    return Err(shape_err(
                        op, Field::PauliCodes, *bad as usize, "codes in 0..=3"));
                }
                Ok(())
            },
            Opcode::U | Opcode::UNonNorm | Opcode::Matr => {
                self.some_targets()?;
                let k = self.targets.len();
                let needed
                    = u32::try_from(k).ok()
                    .and_then(|k| 1_usize.checked_shl(k))
                    .and_then(|dim| dim.checked_mul(dim))
                    .and_then(|d2| d2.checked_mul(2));
                match needed {
                    Some(n) if n == self.params.len() => Ok(()),
                    _ => Err(shape_err(
                        op,
                        Field::Params,
                        self.params.len(),
                        format!("2 × 4^{} (a {}-qubit matrix)", k, k),
                    )),
                }
            },
            Opcode::Deph | Opcode::Depol => {
                self.num_params(1)?;
                self.no_controls()?;
                self.one_or_two_targets()
            },
            Opcode::Damp => {
                self.num_params(1)?;
                self.no_controls()?;
                self.num_targets(1)
            },
            Opcode::Swap => {
                self.num_params(0)?;
                self.num_targets(2)
            },
            Opcode::M => {
                self.num_params(0)?;
                self.no_controls()
            },
            Opcode::P => {
                self.some_targets()?;
                let k = self.targets.len();
                if self.params.len() != 1 && self.params.len() != k {
                    return Err(shape_err(
                        op,
                        Field::Params,
                        self.params.len(),
                        format!("1 or {}", k),
                    ));
                }
                self.no_controls()?;
                if self.params.len() == 1 {
                    let packed = self.params[0];
                    let max = 2.0_f64.powi(k.min(i32::MAX as usize) as i32);
                    if packed < 0.0 || packed.fract() != 0.0 || packed >= max {
                        return Err(shape_err(
                            op,
                            Field::Outcome,
                            packed.max(0.0) as usize,
                            format!("an integer below {}", max),
                        ));
                    }
                }
                Ok(())
            },
            Opcode::Kraus | Opcode::KrausNonTP => {
                self.no_controls()?;
                self.one_or_two_targets()?;
                let max_ops = if self.targets.len() == 1 { 4 } else { 16 };
                let Some(&count) = self.params.first() else {
                    return Err(shape_err(op, Field::Params, 0, "at least 1"));
                };
                if count.fract() != 0.0 || !(1.0..=max_ops as f64).contains(&count) {
                    return Err(shape_err(
                        op,
                        Field::KrausOperators,
                        count.max(0.0) as usize,
                        format!("1..={}", max_ops),
                    ));
                }
                let count = count as usize;
                let needed = count * matrix::flat_len(self.dim());
                if self.params.len() - 1 != needed {
                    return Err(shape_err(
                        op,
                        Field::Params,
                        self.params.len(),
                        format!("{} ({} operators of size {d}×{d})",
                            needed + 1, count, d = self.dim()),
                    ));
                }
                Ok(())
            },
        }
    }

    fn paulis(&self) -> Vec<Pauli> {
        self.params[1..].iter()
            .map(|c| Pauli::from_code(*c as i64).unwrap_or(Pauli::I))
            .collect()
    }

    fn flat_matrix(&self) -> na::DMatrix<C64> {
        matrix::from_flat(&self.params, self.dim())
    }

    fn kraus_ops(&self) -> Vec<na::DMatrix<C64>> {
        let count = self.params[0] as usize;
        matrix::ops_from_flat(&self.params[1..], count, self.dim())
    }

    /// Apply the operator to a register.
    ///
    /// Gates with outputs (see [`num_outputs`][Self::num_outputs]) write them
    /// to the front of `outputs`, if given: measurement outcomes as `0.0` or
    /// `1.0` in target order for `M`, and the joint outcome probability for
    /// `P`.
    ///
    /// Channels with zero probability do nothing, so they may be applied to
    /// state-vectors.
    pub fn apply<Q>(&self, q: &mut Q, outputs: Option<&mut [f64]>)
        -> CircuitResult<()>
    where Q: Qureg
    {
        self.validate()?;
        let nout = self.num_outputs();
        let outputs = match outputs {
            Some(buf) if buf.len() < nout => {
                return Err(CircuitError::OutputBufferTooSmall {
                    needed: nout,
                    given: buf.len(),
                });
            },
            other => other,
        };
        let ctrls = self.controls.as_slice();
        let targs = self.targets.as_slice();
        let nctrls = ctrls.len();
        let ntargs = targs.len();
        match self.opcode {
            Opcode::Id => { },
            Opcode::H => { q.hadamard(targs[0])?; },
            Opcode::S | Opcode::T => {
                let angle =
                    if self.opcode == Opcode::S { FRAC_PI_2 } else { FRAC_PI_4 };
                if nctrls == 0 {
                    q.phase_shift(targs[0], angle)?;
                } else {
                    let qubits = [ctrls, &targs[..1]].concat();
                    q.multi_controlled_phase_shift(&qubits, angle)?;
                }
            },
            Opcode::X => match (nctrls, ntargs) {
                (0, 1) => { q.pauli_x(targs[0])?; },
                (1, 1) => { q.controlled_not(ctrls[0], targs[0])?; },
                _ => { q.multi_qubit_not(ctrls, targs)?; },
            },
            Opcode::Y => {
                if nctrls == 0 {
                    q.pauli_y(targs[0])?;
                } else {
                    q.controlled_pauli_y(ctrls[0], targs[0])?;
                }
            },
            Opcode::Z => {
                if nctrls == 0 {
                    q.pauli_z(targs[0])?;
                } else {
                    let qubits = [ctrls, &targs[..1]].concat();
                    q.multi_controlled_phase_flip(&qubits)?;
                }
            },
            Opcode::Rx | Opcode::Ry => {
                let axis = if self.opcode == Opcode::Rx { Pauli::X } else { Pauli::Y };
                let angle = self.params[0];
                match (nctrls, ntargs) {
                    (0, 1) => { q.rotate(targs[0], axis, angle)?; },
                    (1, 1) => {
                        q.controlled_rotate(ctrls[0], targs[0], axis, angle)?;
                    },
                    _ => {
                        q.multi_rotate_pauli(ctrls, targs, &vec![axis; ntargs], angle)?;
                    },
                }
            },
            Opcode::Rz => {
                let angle = self.params[0];
                match (nctrls, ntargs) {
                    (0, 1) => { q.rotate(targs[0], Pauli::Z, angle)?; },
                    (1, 1) => {
                        q.controlled_rotate(ctrls[0], targs[0], Pauli::Z, angle)?;
                    },
                    _ => { q.multi_rotate_z(ctrls, targs, angle)?; },
                }
            },
            Opcode::R => {
                q.multi_rotate_pauli(ctrls, targs, &self.paulis(), self.params[0])?;
            },
            Opcode::U => { q.unitary(ctrls, targs, &self.flat_matrix())?; },
            Opcode::UNonNorm => {
                q.gate_matrix(ctrls, targs, &self.flat_matrix())?;
            },
            Opcode::Matr => { q.matrix(ctrls, targs, &self.flat_matrix())?; },
            Opcode::Deph => {
                if self.params[0] != 0.0 {
                    q.mix_dephasing(targs, self.params[0])?;
                }
            },
            Opcode::Depol => {
                if self.params[0] != 0.0 {
                    q.mix_depolarising(targs, self.params[0])?;
                }
            },
            Opcode::Damp => {
                if self.params[0] != 0.0 {
                    q.mix_damping(targs[0], self.params[0])?;
                }
            },
            Opcode::Swap => {
                if nctrls == 0 {
                    q.swap(targs[0], targs[1])?;
                } else {
                    // three controlled NOTs, each with one target as an extra
                    // control
                    let not = matrix::pauli(Pauli::X);
                    let mut ctrl_buf: Vec<usize> = Vec::with_capacity(nctrls + 1);
                    ctrl_buf.extend_from_slice(ctrls);
                    ctrl_buf.push(targs[0]);
                    q.unitary(&ctrl_buf, &targs[1..2], not)?;
                    ctrl_buf[nctrls] = targs[1];
                    q.unitary(&ctrl_buf, &targs[0..1], not)?;
                    ctrl_buf[nctrls] = targs[0];
                    q.unitary(&ctrl_buf, &targs[1..2], not)?;
                }
            },
            Opcode::M => {
                let mut outputs = outputs;
                for (k, t) in targs.iter().enumerate() {
                    let outcome = q.measure(*t)?;
                    if let Some(buf) = outputs.as_deref_mut() {
                        buf[k] = f64::from(outcome);
                    }
                }
            },
            Opcode::P => {
                let mut prob = 1.0;
                if self.params.len() > 1 {
                    for (t, x) in targs.iter().zip(&self.params) {
                        prob *= q.collapse_to_outcome(*t, outcome_bit(*x)?)?;
                    }
                } else {
                    let packed = self.params[0] as u64;
                    for (k, t) in targs.iter().rev().enumerate() {
                        let bit = u8::from(k < 64 && (packed >> k) & 1 == 1);
                        prob *= q.collapse_to_outcome(*t, bit)?;
                    }
                }
                if let Some(buf) = outputs { buf[0] = prob; }
            },
            Opcode::Kraus => { q.mix_kraus_map(targs, &self.kraus_ops())?; },
            Opcode::KrausNonTP => {
                q.mix_non_tp_kraus_map(targs, &self.kraus_ops())?;
            },
            Opcode::G => {
                let angle = self.params[0];
                if !q.is_density_matrix() && angle != 0.0 {
                    q.scale(C64::cis(angle))?;
                }
            },
            Opcode::Fac => {
                let (re, im) = (self.params[0], self.params[1]);
                if re == 0.0 {
                    q.scale_imag(im)?;
                } else if im == 0.0 {
                    q.scale_real(re)?;
                } else {
                    q.scale(C64::new(re, im))?;
                }
            },
            Opcode::Ph => {
                let angle = self.params[0];
                let qubits = [ctrls, targs].concat();
                match qubits.as_slice() {
                    [a] => { q.phase_shift(*a, angle)?; },
                    [a, b] => { q.controlled_phase_shift(*a, *b, angle)?; },
                    _ => { q.multi_controlled_phase_shift(&qubits, angle)?; },
                }
            },
        }
        Ok(())
    }

    /// Return the conjugate transpose of `self` as a new gate.
    ///
    /// Involutory gates return a copy of themselves, rotations and phases have
    /// their angle negated, `Fac` is conjugated, matrix gates have their matrix
    /// replaced by its conjugate transpose, and `S` and `T` become `Ph` gates
    /// with angles -π/2 and -π/4 on the same qubits. Measurements, projectors,
    /// and channels have no adjoint.
    pub fn adjoint(&self) -> CircuitResult<Self> {
        let op = self.opcode;
        match op {
            Opcode::Id
            | Opcode::H
            | Opcode::Swap
            | Opcode::X
            | Opcode::Y
            | Opcode::Z
            => Ok(self.clone()),
            Opcode::Rx
            | Opcode::Ry
            | Opcode::Rz
            | Opcode::R
            | Opcode::Ph
            | Opcode::G
            => {
                self.validate()?;
                let mut params = self.params.clone();
                params[0] = -params[0];
                Ok(self.with_params(params))
            },
            Opcode::Fac => {
                self.validate()?;
                Ok(self.with_params(vec![self.params[0], -self.params[1]]))
            },
            Opcode::U | Opcode::UNonNorm | Opcode::Matr => {
                self.validate()?;
                Ok(self.with_params(matrix::flat_dagger(&self.params, self.dim())))
            },
            Opcode::S | Opcode::T => {
                self.validate()?;
                let angle = if op == Opcode::S { -FRAC_PI_2 } else { -FRAC_PI_4 };
                Ok(Self::new(
                    Opcode::Ph,
                    self.controls.clone(),
                    self.targets.clone(),
                    vec![angle],
                ))
            },
            Opcode::Deph
            | Opcode::Depol
            | Opcode::Damp
            | Opcode::M
            | Opcode::P
            | Opcode::Kraus
            | Opcode::KrausNonTP
            => Err(CircuitError::NoAdjointDefined(op.symbol())),
        }
    }

    fn with_params(&self, params: Vec<f64>) -> Self {
        Self {
            opcode: self.opcode,
            controls: self.controls.clone(),
            targets: self.targets.clone(),
            params,
        }
    }

    /// Apply the conjugate transpose of the operator.
    pub fn apply_dagger<Q>(&self, q: &mut Q) -> CircuitResult<()>
    where Q: Qureg
    {
        self.adjoint()?.apply(q, None)
    }

    /// Return `true` if the operator has an inverse at its given parameters.
    ///
    /// Unitaries are always invertible, projectors and measurements never are,
    /// `Matr` and Kraus maps are invertible when their matrix or superoperator
    /// is non-singular, `Fac` is invertible when its factor is non-zero, and
    /// the dephasing, depolarising, and damping channels are invertible away
    /// from their maximally mixing probability.
    pub fn is_invertible(&self) -> CircuitResult<bool> {
        if self.is_unitary() { return Ok(true); }
        self.validate()?;
        let p = self.params.first().copied().unwrap_or(0.0);
        let two = self.targets.len() == 2;
        let invertible = match self.opcode {
            Opcode::H
            | Opcode::X
            | Opcode::Y
            | Opcode::Z
            | Opcode::Rx
            | Opcode::Ry
            | Opcode::Rz
            | Opcode::R
            | Opcode::S
            | Opcode::T
            | Opcode::U
            | Opcode::Swap
            | Opcode::G
            | Opcode::Id
            | Opcode::Ph
            | Opcode::UNonNorm => true,
            Opcode::P | Opcode::M => false,
            Opcode::Fac => is_nonzero(self.params[0].hypot(self.params[1])),
            Opcode::Matr => matrix::is_invertible(&self.flat_matrix()),
            Opcode::Deph if two => is_nonzero(3.0 - 4.0 * p),
            Opcode::Deph => is_nonzero(1.0 - 2.0 * p),
            Opcode::Depol if two => is_nonzero(15.0 - 16.0 * p),
            Opcode::Depol => is_nonzero(3.0 - 4.0 * p),
            Opcode::Damp => is_nonzero(1.0 - p),
            Opcode::Kraus | Opcode::KrausNonTP
                => matrix::is_invertible(&matrix::superoperator(&self.kraus_ops())),
        };
        Ok(invertible)
    }

    /// Apply the inverse of the operator.
    ///
    /// Unitaries are inverted through their adjoint and `Fac` through the
    /// reciprocal of its factor. Channels are inverted by
    /// applying their linear map at the probability that undoes them, which
    /// generally lies outside the physical range; the result is only a valid
    /// operation on density matrices.
    pub fn apply_inverse<Q>(&self, q: &mut Q) -> CircuitResult<()>
    where Q: Qureg
    {
        if !self.is_invertible()? {
            let reason = match self.opcode {
                Opcode::P | Opcode::M => Irreversible::Always,
                Opcode::H
                | Opcode::X
                | Opcode::Y
                | Opcode::Z
                | Opcode::Rx
                | Opcode::Ry
                | Opcode::Rz
                | Opcode::R
                | Opcode::S
                | Opcode::T
                | Opcode::U
                | Opcode::Swap
                | Opcode::G
                | Opcode::Id
                | Opcode::Ph
                | Opcode::UNonNorm
                | Opcode::Matr
                | Opcode::Fac
                | Opcode::Deph
                | Opcode::Depol
                | Opcode::Damp
                | Opcode::Kraus
                | Opcode::KrausNonTP => Irreversible::AtParams,
            };
            return Err(CircuitError::NotInvertible {
                op: self.opcode.symbol(),
                reason,
            });
        }
        let targs = self.targets.as_slice();
        let p = self.params.first().copied().unwrap_or(0.0);
        let two = targs.len() == 2;
        match self.opcode {
            Opcode::H
            | Opcode::X
            | Opcode::Y
            | Opcode::Z
            | Opcode::Rx
            | Opcode::Ry
            | Opcode::Rz
            | Opcode::R
            | Opcode::S
            | Opcode::T
            | Opcode::U
            | Opcode::Swap
            | Opcode::G
            | Opcode::Id
            | Opcode::Ph
            | Opcode::UNonNorm => { self.apply_dagger(q)?; },
            Opcode::P | Opcode::M => {
                return Err(CircuitError::NotInvertible {
                    op: self.opcode.symbol(),
                    reason: Irreversible::Always,
                });
            },
            Opcode::Fac => {
                q.scale(C64::new(self.params[0], self.params[1]).inv())?;
            },
            Opcode::Matr => {
                let inv = matrix::inverse(&self.flat_matrix())
                    .ok_or(CircuitError::NotInvertible {
                        op: self.opcode.symbol(),
                        reason: Irreversible::AtParams,
                    })?;
                self.with_params(matrix::to_flat(&inv)).apply(q, None)?;
            },
            Opcode::Deph | Opcode::Depol | Opcode::Damp if p == 0.0 => { },
            Opcode::Deph if two => { q.dephase(targs, 3.0 * p / (4.0 * p - 3.0))?; },
            Opcode::Deph => { q.dephase(targs, p / (2.0 * p - 1.0))?; },
            Opcode::Depol if two => {
                q.depolarise(targs, 15.0 * p / (16.0 * p - 15.0))?;
            },
            Opcode::Depol => { q.depolarise(targs, 3.0 * p / (4.0 * p - 3.0))?; },
            Opcode::Damp => { q.damp(targs[0], p / (p - 1.0))?; },
            Opcode::Kraus | Opcode::KrausNonTP => {
                let sup = matrix::superoperator(&self.kraus_ops());
                let inv = matrix::inverse(&sup)
                    .ok_or(CircuitError::NotInvertible {
                        op: self.opcode.symbol(),
                        reason: Irreversible::AtParams,
                    })?;
                q.superoperator(targs, &inv)?;
            },
        }
        Ok(())
    }

    /// Number of pure branches in the operator's decomposition.
    ///
    /// Pure operators have exactly one branch (themselves).
    pub fn num_decomps(&self) -> CircuitResult<usize> {
        if self.is_pure() { return Ok(1); }
        self.validate()?;
        let n = match self.opcode {
            Opcode::Damp => 2,
            Opcode::Deph => if self.targets.len() == 1 { 2 } else { 4 },
            Opcode::Depol => if self.targets.len() == 1 { 4 } else { 16 },
            Opcode::Kraus | Opcode::KrausNonTP => self.params[0] as usize,
            Opcode::H
            | Opcode::X
            | Opcode::Y
            | Opcode::Z
            | Opcode::Rx
            | Opcode::Ry
            | Opcode::Rz
            | Opcode::R
            | Opcode::S
            | Opcode::T
            | Opcode::U
            | Opcode::Swap
            | Opcode::M
            | Opcode::P
            | Opcode::G
            | Opcode::Id
            | Opcode::Ph
            | Opcode::Matr
            | Opcode::UNonNorm
            | Opcode::Fac => 1,
        };
        Ok(n)
    }

    // probability weight of each branch, after range-checking the channel
    // parameter
    fn branch_weights(&self) -> CircuitResult<Vec<f64>> {
        let ntargs = self.targets.len();
        let label = |op: Opcode| format!("{}-qubit {}", ntargs, op.name());
        let p = self.params.first().copied().unwrap_or(0.0);
        let weights = match self.opcode {
            Opcode::Damp => {
                check_branch_prob(label(self.opcode), p, 1.0)?;
                vec![0.5, 0.5]
            },
            Opcode::Deph if ntargs == 1 => {
                check_branch_prob(label(self.opcode), p, 0.5)?;
                vec![1.0 - p, p]
            },
            Opcode::Deph => {
                check_branch_prob(label(self.opcode), p, 0.75)?;
                vec![1.0 - p, p / 3.0, p / 3.0, p / 3.0]
            },
            Opcode::Depol if ntargs == 1 => {
                check_branch_prob(label(self.opcode), p, 0.75)?;
                vec![1.0 - p, p / 3.0, p / 3.0, p / 3.0]
            },
            Opcode::Depol => {
                check_branch_prob(label(self.opcode), p, 15.0 / 16.0)?;
                let mut w = vec![p / 15.0; 16];
                w[0] = 1.0 - p;
                w
            },
            Opcode::Kraus | Opcode::KrausNonTP => {
                let n = self.params[0] as usize;
                vec![(n as f64).recip(); n]
            },
            Opcode::H
            | Opcode::X
            | Opcode::Y
            | Opcode::Z
            | Opcode::Rx
            | Opcode::Ry
            | Opcode::Rz
            | Opcode::R
            | Opcode::S
            | Opcode::T
            | Opcode::U
            | Opcode::Swap
            | Opcode::M
            | Opcode::P
            | Opcode::G
            | Opcode::Id
            | Opcode::Ph
            | Opcode::Matr
            | Opcode::UNonNorm
            | Opcode::Fac => vec![1.0],
        };
        Ok(weights)
    }

    // apply the `r`-th branch of a channel as a pure operation
    fn apply_branch<Q>(&self, q: &mut Q, r: usize) -> CircuitResult<()>
    where Q: Qureg
    {
        let targs = self.targets.as_slice();
        match self.opcode {
            Opcode::Damp => {
                let s = 2.0_f64.sqrt();
                let p = self.params[0];
                let m =
                    if r == 1 {
                        matrix::mat2([[s, 0.0], [0.0, s * (1.0 - p).sqrt()]])
                    } else {
                        matrix::mat2([[0.0, s * p.sqrt()], [0.0, 0.0]])
                    };
                q.matrix(&[], targs, &m)?;
            },
            Opcode::Deph => {
                // branch bits select Z on each target
                for (j, t) in targs.iter().enumerate() {
                    if (r >> j) & 1 == 1 { q.pauli_z(*t)?; }
                }
            },
            Opcode::Depol => {
                let codes: Vec<usize>
                    = if targs.len() == 1 { vec![r] } else { vec![r / 4, r % 4] };
                for (t, c) in targs.iter().zip(codes) {
                    match Pauli::from_int(c) {
                        Pauli::I => { },
                        Pauli::X => { q.pauli_x(*t)?; },
                        Pauli::Y => { q.pauli_y(*t)?; },
                        Pauli::Z => { q.pauli_z(*t)?; },
                    }
                }
            },
            Opcode::Kraus | Opcode::KrausNonTP => {
                let n = self.params[0] as usize;
                let dim = self.dim();
                let len = matrix::flat_len(dim);
                let flat = &self.params[1 + r * len..1 + (r + 1) * len];
                let op = matrix::from_flat(flat, dim) * C64::from((n as f64).sqrt());
                q.matrix(&[], targs, &op)?;
            },
            Opcode::H
            | Opcode::X
            | Opcode::Y
            | Opcode::Z
            | Opcode::Rx
            | Opcode::Ry
            | Opcode::Rz
            | Opcode::R
            | Opcode::S
            | Opcode::T
            | Opcode::U
            | Opcode::Swap
            | Opcode::M
            | Opcode::P
            | Opcode::G
            | Opcode::Id
            | Opcode::Ph
            | Opcode::Matr
            | Opcode::UNonNorm
            | Opcode::Fac => { self.apply(q, None)?; },
        }
        Ok(())
    }

    /// Apply one pure branch of the operator's decomposition to a
    /// state-vector, returning the branch's probability weight.
    ///
    /// Averaging over branches with these weights reproduces the action of the
    /// channel on the density matrix `∣ψ⟩⟨ψ∣`. Pure operators have a single
    /// branch with weight 1. With [`Branch::Random`], the branch is drawn from
    /// `rng` with probability equal to its weight, and the weight of the drawn
    /// branch is still returned.
    pub fn apply_decomp<Q, R>(&self, q: &mut Q, branch: Branch, rng: &mut R)
        -> CircuitResult<f64>
    where
        Q: Qureg,
        R: Rng + ?Sized,
    {
        if q.is_density_matrix() {
            return Err(CircuitError::RequiresStateVector("operator decomposition"));
        }
        let count = self.num_decomps()?;
        if let Branch::Index(index) = branch {
            if index >= count as u64 {
                return Err(CircuitError::DecompositionIndexOutOfRange {
                    index,
                    count: count as u64,
                });
            }
        }
        if self.is_pure() {
            self.apply(q, None)?;
            return Ok(1.0);
        }
        let weights = self.branch_weights()?;
        let r = match branch {
            Branch::Index(index) => index as usize,
            Branch::Random => {
                let p = self.params.first().copied().unwrap_or(0.0);
                let dist = WeightedIndex::new(&weights)
                    .map_err(|_| prob_err(self.opcode.name().to_string(), p, 1.0))?;
                dist.sample(rng)
            },
        };
        self.apply_branch(q, r)?;
        Ok(weights[r])
    }

    /// Descriptive label, e.g. "controlled two-qubit unitary".
    pub fn name(&self) -> String {
        let ntargs = self.targets.len();
        let targ_label = match self.opcode {
            Opcode::Swap => match ntargs {
                0 => "zero-target ",
                1 => "single-target ",
                2 => "",
                _ => "many-qubit ",
            },
            Opcode::R => match ntargs {
                0 => "zero-target ",
                1 => "",
                2 => "two-qubit ",
                _ => "many-qubit ",
            },
            Opcode::Fac | Opcode::G => {
                if ntargs > 0 { "targeted " } else { "" }
            },
            Opcode::M | Opcode::P => "",
            Opcode::U
            | Opcode::UNonNorm
            | Opcode::Matr
            | Opcode::Deph
            | Opcode::Depol
            | Opcode::Damp
            | Opcode::Kraus
            | Opcode::KrausNonTP
            => match ntargs {
                0 => "zero-target ",
                1 => "single-qubit ",
                2 => "two-qubit ",
                _ => "many-qubit ",
            },
            _ => match ntargs {
                0 => "zero-target ",
                1 => "",
                _ => "multi-qubit ",
            },
        };
        let ctrl_label = match self.controls.len() {
            0 => "",
            1 => "controlled ",
            2 => "multi-controlled ",
            _ => "many-controlled ",
        };
        format!("{}{}{}", ctrl_label, targ_label, self.opcode.name())
    }

    fn fmt_params(&self) -> Option<String> {
        let dim = || {
            u32::try_from(self.targets.len()).ok()
                .and_then(|k| 1_usize.checked_shl(k))
        };
        match self.opcode {
            Opcode::U | Opcode::UNonNorm | Opcode::Matr => {
                let dim = dim()?;
                (self.params.len() == matrix::flat_len(dim))
                    .then(|| matrix::fmt_matrix(&self.flat_matrix()))
            },
            Opcode::Kraus | Opcode::KrausNonTP => {
                let dim = dim().filter(|d| *d <= 4)?;
                let count = self.params[0];
                let ok = (1.0..=16.0).contains(&count)
                    && self.params.len()
                        == 1 + count as usize * matrix::flat_len(dim);
                ok.then(|| {
                    self.kraus_ops().iter().map(matrix::fmt_matrix).join(", ")
                })
            },
            Opcode::Fac => {
                (self.params.len() % 2 == 0).then(|| {
                    self.params.iter().tuples()
                        .map(|(re, im)| matrix::fmt_complex(C64::new(*re, *im)))
                        .join(", ")
                })
            },
            _ => Some(self.params.iter().join(", ")),
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = self.opcode.symbol();
        let mut form = sym.to_string();
        if self.opcode == Opcode::R && !self.targets.is_empty() {
            let codes_ok
                = self.params.len() == self.targets.len() + 1
                && self.params[1..].iter()
                    .all(|c| c.fract() == 0.0 && Pauli::from_code(*c as i64).is_some());
            if codes_ok {
                let paulis
                    = self.paulis().into_iter().zip(&self.targets)
                    .map(|(p, t)| format!("{}_{}", p, t))
                    .join(" ");
                form = format!("{}[{}, {}]", sym, self.params[0], paulis);
            } else {
                form = format!("{}[uninterpretable]", sym);
            }
        } else {
            if !self.targets.is_empty() {
                form = format!("{}_{{{}}}", sym, self.targets.iter().join(","));
            }
            if !self.params.is_empty() {
                match self.fmt_params() {
                    Some(params) => { form = format!("{}[{}]", form, params); },
                    None => { form = format!("{}[uninterpretable]", form); },
                }
            }
        }
        if self.controls.is_empty() {
            write!(f, "{}", form)
        } else {
            write!(f, "C_{{{}}}[{}]", self.controls.iter().join(","), form)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dense::DenseQureg;
    use approx::assert_abs_diff_eq;
    use rand::{ rngs::StdRng, SeedableRng };

    fn gate(op: Opcode, ctrls: &[usize], targs: &[usize], params: &[f64]) -> Gate {
        Gate::new(op, ctrls.to_vec(), targs.to_vec(), params.to_vec())
    }

    // generic entangled 3-qubit state
    fn input() -> DenseQureg {
        let mut q = DenseQureg::new(3, Some(10101));
        q.rotate(0, Pauli::Y, 0.3).unwrap();
        q.rotate(1, Pauli::X, 1.1).unwrap();
        q.rotate(2, Pauli::Y, 2.1).unwrap();
        q.controlled_not(0, 1).unwrap();
        q.controlled_rotate(1, 2, Pauli::Z, 0.8).unwrap();
        q.phase_shift(0, 0.4).unwrap();
        q
    }

    fn flat_unitary(k: usize) -> Vec<f64> {
        let paulis: Vec<Pauli> = (0..k).map(|j| Pauli::from_int(j + 1)).collect();
        let u = matrix::pauli_rotation(&paulis, 0.9)
            * matrix::pauli_rotation(&vec![Pauli::X; k], 0.35);
        matrix::to_flat(&u)
    }

    fn damping_kraus_params(p: f64) -> Vec<f64> {
        let mut params = vec![2.0];
        params.extend(matrix::to_flat(
            &matrix::mat2([[1.0, 0.0], [0.0, (1.0 - p).sqrt()]])));
        params.extend(matrix::to_flat(
            &matrix::mat2([[0.0, p.sqrt()], [0.0, 0.0]])));
        params
    }

    // amplitude damping at `p` on both targets, as four 4x4 Kraus operators
    fn two_qubit_damping_kraus_params(p: f64) -> Vec<f64> {
        let ops = [
            matrix::mat2([[1.0, 0.0], [0.0, (1.0 - p).sqrt()]]),
            matrix::mat2([[0.0, p.sqrt()], [0.0, 0.0]]),
        ];
        let mut params = vec![4.0];
        for a in ops.iter() {
            for b in ops.iter() {
                params.extend(matrix::to_flat(&a.kronecker(b)));
            }
        }
        params
    }

    fn unitary_gates() -> Vec<Gate> {
        vec![
            gate(Opcode::Id, &[], &[0, 2], &[]),
            gate(Opcode::H, &[], &[1], &[]),
            gate(Opcode::X, &[], &[0], &[]),
            gate(Opcode::X, &[2], &[0], &[]),
            gate(Opcode::X, &[], &[0, 1], &[]),
            gate(Opcode::X, &[1, 2], &[0], &[]),
            gate(Opcode::Y, &[], &[1], &[]),
            gate(Opcode::Y, &[0], &[1], &[]),
            gate(Opcode::Z, &[], &[2], &[]),
            gate(Opcode::Z, &[0, 1], &[2], &[]),
            gate(Opcode::Rx, &[], &[0], &[0.7]),
            gate(Opcode::Rx, &[1], &[0], &[0.7]),
            gate(Opcode::Ry, &[], &[0, 2], &[-1.3]),
            gate(Opcode::Rz, &[], &[1], &[2.2]),
            gate(Opcode::Rz, &[0], &[1, 2], &[2.2]),
            gate(Opcode::R, &[], &[0, 1, 2], &[0.4, 1.0, 2.0, 3.0]),
            gate(Opcode::R, &[2], &[1], &[0.4, 2.0]),
            gate(Opcode::S, &[], &[0], &[]),
            gate(Opcode::S, &[1], &[0], &[]),
            gate(Opcode::T, &[], &[2], &[]),
            gate(Opcode::T, &[0, 1], &[2], &[]),
            gate(Opcode::Ph, &[], &[1], &[0.6]),
            gate(Opcode::Ph, &[0], &[1], &[0.6]),
            gate(Opcode::Ph, &[0], &[1, 2], &[0.6]),
            gate(Opcode::G, &[], &[], &[1.2]),
            gate(Opcode::Swap, &[], &[0, 2], &[]),
            gate(Opcode::Swap, &[1], &[0, 2], &[]),
            gate(Opcode::U, &[], &[1], &flat_unitary(1)),
            gate(Opcode::U, &[2], &[0, 1], &flat_unitary(2)),
            gate(Opcode::U, &[], &[0, 1, 2], &flat_unitary(3)),
            gate(Opcode::UNonNorm, &[0], &[2], &flat_unitary(1)),
        ]
    }

    #[test]
    fn validation_accepts_documented_shapes() {
        let mut ok = unitary_gates();
        ok.extend([
            gate(Opcode::Fac, &[], &[], &[0.0, 1.0]),
            gate(Opcode::Matr, &[], &[0], &[1.0; 8]),
            gate(Opcode::Deph, &[], &[0, 1], &[0.1]),
            gate(Opcode::Depol, &[], &[0], &[0.1]),
            gate(Opcode::Damp, &[], &[0], &[0.1]),
            gate(Opcode::M, &[], &[0, 1, 2], &[]),
            gate(Opcode::P, &[], &[0, 1], &[3.0]),
            gate(Opcode::P, &[], &[0, 1], &[1.0, 0.0]),
            gate(Opcode::Kraus, &[], &[0], &damping_kraus_params(0.2)),
            gate(Opcode::Kraus, &[], &[2, 0], &two_qubit_damping_kraus_params(0.2)),
            gate(Opcode::KrausNonTP, &[], &[0, 1], &two_qubit_damping_kraus_params(0.3)),
        ]);
        for g in ok.iter() {
            assert!(g.validate().is_ok(), "{} should be valid", g);
        }
    }

    #[test]
    fn validation_rejects_malformed_shapes() {
        let bad = [
            (gate(Opcode::G, &[], &[0], &[0.1]), Field::Targets),
            (gate(Opcode::G, &[], &[], &[]), Field::Params),
            (gate(Opcode::Fac, &[0], &[], &[1.0, 0.0]), Field::Controls),
            (gate(Opcode::H, &[1], &[0], &[]), Field::Controls),
            (gate(Opcode::H, &[], &[0, 1], &[]), Field::Targets),
            (gate(Opcode::X, &[], &[], &[]), Field::Targets),
            (gate(Opcode::Y, &[1, 2], &[0], &[]), Field::Controls),
            (gate(Opcode::Z, &[], &[0], &[0.5]), Field::Params),
            (gate(Opcode::Ph, &[], &[], &[0.5]), Field::Qubits),
            (gate(Opcode::Rx, &[], &[0], &[]), Field::Params),
            (gate(Opcode::R, &[], &[0, 1], &[0.5, 1.0]), Field::Params),
            (gate(Opcode::R, &[], &[0], &[0.5, 4.0]), Field::PauliCodes),
            (gate(Opcode::U, &[], &[0, 1], &[0.0; 8]), Field::Params),
            (gate(Opcode::Deph, &[], &[0, 1, 2], &[0.1]), Field::Targets),
            (gate(Opcode::Depol, &[1], &[0], &[0.1]), Field::Controls),
            (gate(Opcode::Damp, &[], &[0, 1], &[0.1]), Field::Targets),
            (gate(Opcode::Swap, &[], &[0], &[]), Field::Targets),
            (gate(Opcode::M, &[1], &[0], &[]), Field::Controls),
            (gate(Opcode::P, &[], &[], &[]), Field::Targets),
            (gate(Opcode::P, &[], &[], &[0.0]), Field::Targets),
            (gate(Opcode::P, &[], &[0, 1, 2], &[1.0, 0.0]), Field::Params),
            (gate(Opcode::P, &[], &[0, 1], &[4.0]), Field::Outcome),
            (gate(Opcode::Kraus, &[], &[0], &[5.0]), Field::KrausOperators),
            (gate(Opcode::Kraus, &[], &[0], &[1.0, 0.0, 0.0]), Field::Params),
            (gate(Opcode::KrausNonTP, &[], &[], &[1.0]), Field::Targets),
        ];
        for (g, field) in bad.iter() {
            match g.validate() {
                Err(CircuitError::InvalidOperatorShape { field: f, op, .. }) => {
                    assert_eq!(f, *field, "{}", g);
                    assert_eq!(op, g.opcode().symbol());
                },
                other => panic!("{} validated as {:?}", g, other),
            }
        }
    }

    #[test]
    fn unitary_then_dagger_is_identity() {
        for g in unitary_gates() {
            let init = input();
            let mut q = init.clone();
            g.apply(&mut q, None).unwrap();
            g.apply_dagger(&mut q).unwrap();
            assert!(q.max_deviation(&init) < 1e-10, "{}", g);

            let init = input().to_density();
            let mut q = init.clone();
            g.apply(&mut q, None).unwrap();
            g.apply_dagger(&mut q).unwrap();
            assert!(q.max_deviation(&init) < 1e-10, "{} (density)", g);
        }
    }

    #[test]
    fn dagger_of_phase_gates() {
        let s = gate(Opcode::S, &[1], &[0], &[]);
        let sdg = s.adjoint().unwrap();
        assert_eq!(sdg.opcode(), Opcode::Ph);
        assert_eq!(sdg.controls(), &[1]);
        assert_eq!(sdg.targets(), &[0]);
        assert_abs_diff_eq!(sdg.params()[0], -FRAC_PI_2);
        let fac = gate(Opcode::Fac, &[], &[], &[0.5, 2.0]);
        assert_eq!(fac.adjoint().unwrap().params(), &[0.5, -2.0]);
        assert!(matches!(
            gate(Opcode::M, &[], &[0], &[]).adjoint(),
            Err(CircuitError::NoAdjointDefined("M"))
        ));
        // the original gate is untouched
        let rx = gate(Opcode::Rx, &[], &[0], &[0.3]);
        let _ = rx.adjoint().unwrap();
        assert_eq!(rx.params(), &[0.3]);
    }

    #[test]
    fn invertible_operators_invert() {
        let mut mat = vec![0.0; 8];
        mat[0] = 2.0;
        mat[3] = 1.0;
        mat[7] = -0.5;
        let gates = vec![
            gate(Opcode::Rx, &[1], &[0], &[0.7]),
            gate(Opcode::Matr, &[2], &[0], &mat),
            gate(Opcode::Deph, &[], &[1], &[0.2]),
            gate(Opcode::Deph, &[], &[0, 2], &[0.3]),
            gate(Opcode::Depol, &[], &[2], &[0.2]),
            gate(Opcode::Depol, &[], &[1, 0], &[0.4]),
            gate(Opcode::Damp, &[], &[0], &[0.3]),
            gate(Opcode::Kraus, &[], &[1], &damping_kraus_params(0.4)),
            gate(Opcode::KrausNonTP, &[], &[2], &damping_kraus_params(0.1)),
            gate(Opcode::Kraus, &[], &[2, 0], &two_qubit_damping_kraus_params(0.3)),
            gate(Opcode::KrausNonTP, &[], &[1, 2], &two_qubit_damping_kraus_params(0.2)),
            gate(Opcode::Fac, &[], &[], &[0.0, 2.0]),
            gate(Opcode::Fac, &[], &[], &[-1.5, 0.0]),
            gate(Opcode::Fac, &[], &[], &[0.6, -0.8]),
        ];
        for g in gates {
            assert!(g.is_invertible().unwrap(), "{}", g);
            let init = input().to_density();
            let mut q = init.clone();
            g.apply(&mut q, None).unwrap();
            assert!(q.max_deviation(&init) > 1e-6, "{} did nothing", g);
            g.apply_inverse(&mut q).unwrap();
            assert!(q.max_deviation(&init) < 1e-10, "{}", g);
        }
    }

    #[test]
    fn singular_operators_are_not_invertible() {
        let mut q = input().to_density();
        let cases = [
            (gate(Opcode::Deph, &[], &[0], &[0.5]), Irreversible::AtParams),
            (gate(Opcode::Depol, &[], &[0, 1], &[15.0 / 16.0]), Irreversible::AtParams),
            (gate(Opcode::Damp, &[], &[0], &[1.0]), Irreversible::AtParams),
            (gate(Opcode::Matr, &[], &[0], &[1.0, 0.0, 2.0, 0.0, 2.0, 0.0, 4.0, 0.0]),
                Irreversible::AtParams),
            (gate(Opcode::M, &[], &[0], &[]), Irreversible::Always),
            (gate(Opcode::P, &[], &[0], &[1.0]), Irreversible::Always),
            (gate(Opcode::Fac, &[], &[], &[0.0, 0.0]), Irreversible::AtParams),
        ];
        for (g, why) in cases {
            assert!(!g.is_invertible().unwrap(), "{}", g);
            match g.apply_inverse(&mut q) {
                Err(CircuitError::NotInvertible { reason, .. }) => {
                    assert_eq!(reason, why);
                },
                other => panic!("{}: {:?}", g, other),
            }
        }
    }

    #[test]
    fn decomposition_counts() {
        assert_eq!(gate(Opcode::Deph, &[], &[0], &[0.1]).num_decomps().unwrap(), 2);
        assert_eq!(gate(Opcode::Deph, &[], &[0, 1], &[0.1]).num_decomps().unwrap(), 4);
        assert_eq!(gate(Opcode::Depol, &[], &[0], &[0.1]).num_decomps().unwrap(), 4);
        assert_eq!(gate(Opcode::Depol, &[], &[0, 1], &[0.1]).num_decomps().unwrap(), 16);
        assert_eq!(gate(Opcode::Damp, &[], &[0], &[0.1]).num_decomps().unwrap(), 2);
        let kraus = gate(Opcode::Kraus, &[], &[0], &damping_kraus_params(0.2));
        assert_eq!(kraus.num_decomps().unwrap(), 2);
        assert_eq!(gate(Opcode::H, &[], &[0], &[]).num_decomps().unwrap(), 1);
        assert_eq!(gate(Opcode::M, &[], &[0], &[]).num_decomps().unwrap(), 1);
        let fac = gate(Opcode::Fac, &[], &[], &[0.0, 2.0]);
        assert_eq!(fac.num_decomps().unwrap(), 1);
        assert!(!fac.opcode().is_channel());
        let kraus = gate(Opcode::Kraus, &[], &[0, 1], &two_qubit_damping_kraus_params(0.2));
        assert_eq!(kraus.num_decomps().unwrap(), 4);
    }

    #[test]
    fn dephasing_branch_weights() {
        let p = 0.2;
        let g = gate(Opcode::Deph, &[], &[0], &[p]);
        let mut rng = StdRng::seed_from_u64(0);
        let w: Vec<f64>
            = (0..2)
            .map(|r| {
                let mut q = input();
                g.apply_decomp(&mut q, Branch::Index(r), &mut rng).unwrap()
            })
            .collect();
        assert_abs_diff_eq!(w[0], 1.0 - p);
        assert_abs_diff_eq!(w[1], p);
        assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0);

        let mut q = input();
        assert!(matches!(
            g.apply_decomp(&mut q, Branch::Index(2), &mut rng),
            Err(CircuitError::DecompositionIndexOutOfRange { index: 2, count: 2 })
        ));
        let too_strong = gate(Opcode::Deph, &[], &[0], &[0.6]);
        assert!(matches!(
            too_strong.apply_decomp(&mut q, Branch::Random, &mut rng),
            Err(CircuitError::InvalidChannelParameter { max, .. }) if max == 0.5
        ));
        let mut rho = input().to_density();
        assert!(matches!(
            g.apply_decomp(&mut rho, Branch::Index(0), &mut rng),
            Err(CircuitError::RequiresStateVector(_))
        ));
    }

    #[test]
    fn decompositions_reproduce_channels() {
        let gates = vec![
            gate(Opcode::Deph, &[], &[1], &[0.3]),
            gate(Opcode::Deph, &[], &[0, 2], &[0.4]),
            gate(Opcode::Depol, &[], &[2], &[0.5]),
            gate(Opcode::Depol, &[], &[1, 0], &[0.6]),
            gate(Opcode::Damp, &[], &[0], &[0.35]),
            gate(Opcode::Kraus, &[], &[1], &damping_kraus_params(0.25)),
            gate(Opcode::Kraus, &[], &[2, 0], &two_qubit_damping_kraus_params(0.45)),
            gate(Opcode::KrausNonTP, &[], &[0, 1], &two_qubit_damping_kraus_params(0.15)),
        ];
        let mut rng = StdRng::seed_from_u64(0);
        for g in gates {
            let mut rho = input().to_density();
            g.apply(&mut rho, None).unwrap();
            let mut mixed: na::DMatrix<C64> = na::DMatrix::zeros(8, 8);
            for r in 0..g.num_decomps().unwrap() as u64 {
                let mut psi = input();
                let w = g.apply_decomp(&mut psi, Branch::Index(r), &mut rng).unwrap();
                let a = psi.amplitudes().unwrap();
                mixed += a * a.adjoint() * C64::from(w);
            }
            let diff = (mixed - rho.density_matrix().unwrap()).norm();
            assert!(diff < 1e-10, "{}: {}", g, diff);
        }
    }

    #[test]
    fn random_branches_follow_weights() {
        let g = gate(Opcode::Deph, &[], &[0], &[0.25]);
        let mut rng = StdRng::seed_from_u64(1234);
        let mut flipped = 0;
        for _ in 0..4000 {
            let mut q = DenseQureg::new(1, None);
            q.hadamard(0).unwrap();
            let w = g.apply_decomp(&mut q, Branch::Random, &mut rng).unwrap();
            if w == 0.25 { flipped += 1; }
        }
        let frac = flipped as f64 / 4000.0;
        assert!((frac - 0.25).abs() < 0.03, "{}", frac);
    }

    #[test]
    fn zero_probability_channels_act_on_state_vectors() {
        let init = input();
        let mut q = init.clone();
        gate(Opcode::Deph, &[], &[0], &[0.0]).apply(&mut q, None).unwrap();
        gate(Opcode::Depol, &[], &[0, 1], &[0.0]).apply(&mut q, None).unwrap();
        gate(Opcode::Damp, &[], &[2], &[0.0]).apply(&mut q, None).unwrap();
        assert!(q.max_deviation(&init) < 1e-15);
        assert!(matches!(
            gate(Opcode::Damp, &[], &[2], &[0.1]).apply(&mut q, None),
            Err(CircuitError::Engine(EngineError::NotDensityMatrix(_)))
        ));
    }

    #[test]
    fn imaginary_factor_cycles() {
        let init = input();
        let fac = gate(Opcode::Fac, &[], &[], &[0.0, 1.0]);
        let mut q = init.clone();
        fac.apply(&mut q, None).unwrap();
        fac.apply(&mut q, None).unwrap();
        let mut neg = init.clone();
        neg.scale_real(-1.0).unwrap();
        assert!(q.max_deviation(&neg) < 1e-14);
        fac.apply(&mut q, None).unwrap();
        fac.apply(&mut q, None).unwrap();
        assert!(q.max_deviation(&init) < 1e-14);
    }

    #[test]
    fn global_phase_skips_density_matrices() {
        let init = input().to_density();
        let mut q = init.clone();
        gate(Opcode::G, &[], &[], &[0.8]).apply(&mut q, None).unwrap();
        assert!(q.max_deviation(&init) < 1e-15);
    }

    #[test]
    fn controlled_swap() {
        let g = gate(Opcode::Swap, &[2], &[0, 1], &[]);
        let mut q = DenseQureg::new(3, None);
        q.init_classical(0b001);
        g.apply(&mut q, None).unwrap();
        assert_abs_diff_eq!(q.amp(0b001).unwrap().re, 1.0, epsilon = 1e-14);
        q.init_classical(0b101);
        g.apply(&mut q, None).unwrap();
        assert_abs_diff_eq!(q.amp(0b110).unwrap().re, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn measurement_and_projector_outputs() {
        let mut q = DenseQureg::new(2, Some(5));
        gate(Opcode::X, &[], &[1], &[]).apply(&mut q, None).unwrap();
        let m = gate(Opcode::M, &[], &[0, 1], &[]);
        let mut out = [f64::NAN; 2];
        m.apply(&mut q, Some(&mut out[..])).unwrap();
        assert_eq!(out, [0.0, 1.0]);
        assert!(matches!(
            m.apply(&mut q, Some(&mut [0.0][..])),
            Err(CircuitError::OutputBufferTooSmall { needed: 2, given: 1 })
        ));

        // packed value 0b10: last target -> 0, first target -> 1
        let mut q = DenseQureg::new(2, Some(5));
        q.hadamard(0).unwrap();
        q.hadamard(1).unwrap();
        let p = gate(Opcode::P, &[], &[0, 1], &[2.0]);
        let mut out = [0.0];
        p.apply(&mut q, Some(&mut out[..])).unwrap();
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(q.amp(0b01).unwrap().norm(), 1.0, epsilon = 1e-12);

        let mut q = DenseQureg::new(2, Some(5));
        q.hadamard(1).unwrap();
        let p = gate(Opcode::P, &[], &[0, 1], &[0.0, 1.0]);
        p.apply(&mut q, Some(&mut out[..])).unwrap();
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(q.amp(0b10).unwrap().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn names_and_display() {
        let crx = gate(Opcode::Rx, &[1], &[0], &[0.5]);
        assert_eq!(crx.name(), "controlled X rotation");
        assert_eq!(crx.to_string(), "C_{1}[Rx_{0}[0.5]]");
        let deph = gate(Opcode::Deph, &[], &[0, 1], &[0.1]);
        assert_eq!(deph.name(), "two-qubit dephasing");
        assert_eq!(deph.to_string(), "Deph_{0,1}[0.1]");
        let r = gate(Opcode::R, &[], &[0, 2], &[0.5, 1.0, 3.0]);
        assert_eq!(r.to_string(), "R[0.5, X_0 Z_2]");
        assert_eq!(
            gate(Opcode::R, &[], &[0], &[0.5]).to_string(),
            "R[uninterpretable]",
        );
        let fac = gate(Opcode::Fac, &[], &[], &[0.0, 1.0]);
        assert_eq!(fac.to_string(), "Fac[1i]");
        let u = gate(Opcode::U, &[2, 3, 4], &[0], &[0.0; 6]);
        assert_eq!(u.name(), "many-controlled single-qubit unitary");
        assert_eq!(u.to_string(), "C_{2,3,4}[U_{0}[uninterpretable]]");
    }
}
