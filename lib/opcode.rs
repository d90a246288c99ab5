//! Static catalog of operator families.
//!
//! Each [`Opcode`] carries a fixed wire code, a short symbol used when
//! rendering circuits, and a human-readable name. Everything here is pure
//! lookup.

use std::fmt;
use crate::error::{ CircuitError, CircuitResult };

/// Closed set of operator families a [`Gate`][crate::gate::Gate] can belong
/// to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opcode {
    /// Hadamard
    H,
    /// Pauli X, on any number of targets
    X,
    /// Pauli Y
    Y,
    /// Pauli Z
    Z,
    /// Rotation about X
    Rx,
    /// Rotation about Y
    Ry,
    /// Rotation about Z
    Rz,
    /// Rotation about a tensor product of Paulis
    R,
    /// π/2 phase
    S,
    /// π/4 phase
    T,
    /// Unitary matrix
    U,
    /// Dephasing channel
    Deph,
    /// Depolarizing channel
    Depol,
    /// Amplitude damping channel
    Damp,
    /// Swap
    Swap,
    /// Projective Z-basis measurement
    M,
    /// Projector onto given outcomes
    P,
    /// Trace-preserving Kraus map
    Kraus,
    /// Global phase
    G,
    /// Identity
    Id,
    /// Phase shift on all of its qubits
    Ph,
    /// Non-trace-preserving Kraus map
    KrausNonTP,
    /// General matrix, left-multiplied only
    Matr,
    /// Matrix applied as if unitary, without checking unitarity
    UNonNorm,
    /// Complex scalar factor
    Fac,
}

/// All opcodes, indexed by their wire code.
pub const OPCODES: [Opcode; 25] = [
    Opcode::H,
    Opcode::X,
    Opcode::Y,
    Opcode::Z,
    Opcode::Rx,
    Opcode::Ry,
    Opcode::Rz,
    Opcode::R,
    Opcode::S,
    Opcode::T,
    Opcode::U,
    Opcode::Deph,
    Opcode::Depol,
    Opcode::Damp,
    Opcode::Swap,
    Opcode::M,
    Opcode::P,
    Opcode::Kraus,
    Opcode::G,
    Opcode::Id,
    Opcode::Ph,
    Opcode::KrausNonTP,
    Opcode::Matr,
    Opcode::UNonNorm,
    Opcode::Fac,
];

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl TryFrom<i64> for Opcode {
    type Error = CircuitError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl Opcode {
    /// Look up an opcode by its wire code.
    ///
    /// Codes arrive from untyped input, so anything outside the catalog is an
    /// [`UnknownOperator`][CircuitError::UnknownOperator] error rather than a
    /// default.
    pub fn from_code(code: i64) -> CircuitResult<Self> {
        usize::try_from(code).ok()
            .and_then(|k| OPCODES.get(k).copied())
            .ok_or(CircuitError::UnknownOperator(code))
    }

    /// Return the wire code.
    pub fn code(self) -> i64 { self as i64 }

    /// Short symbol, as written in circuit descriptions.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::H => "H",
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
            Self::Rx => "Rx",
            Self::Ry => "Ry",
            Self::Rz => "Rz",
            Self::R => "R",
            Self::S => "S",
            Self::T => "T",
            Self::U => "U",
            Self::Deph => "Deph",
            Self::Depol => "Depol",
            Self::Damp => "Damp",
            Self::Swap => "SWAP",
            Self::M => "M",
            Self::P => "P",
            Self::Kraus => "Kraus",
            Self::G => "G",
            Self::Id => "Id",
            Self::Ph => "Ph",
            Self::KrausNonTP => "KrausNonTP",
            Self::Matr => "Matr",
            Self::UNonNorm => "UNonNorm",
            Self::Fac => "Fac",
        }
    }

    /// Human-readable name of the operator family.
    pub fn name(self) -> &'static str {
        match self {
            Self::H => "Hadamard",
            Self::X => "Pauli X",
            Self::Y => "Pauli Y",
            Self::Z => "Pauli Z",
            Self::Rx => "X rotation",
            Self::Ry => "Y rotation",
            Self::Rz => "Z rotation",
            Self::R => "Pauli rotation",
            Self::S => "S gate",
            Self::T => "T gate",
            Self::U => "unitary",
            Self::Deph => "dephasing",
            Self::Depol => "depolarising",
            Self::Damp => "amplitude damping",
            Self::Swap => "swap",
            Self::M => "measurement",
            Self::P => "projector",
            Self::Kraus => "Kraus map",
            Self::G => "global phase",
            Self::Id => "identity",
            Self::Ph => "phase shift",
            Self::KrausNonTP => "non-trace-preserving Kraus map",
            Self::Matr => "matrix",
            Self::UNonNorm => "non-normalised unitary",
            Self::Fac => "factor",
        }
    }

    /// Return `true` if every operator of this family is unitary.
    pub fn is_unitary(self) -> bool {
        matches!(
            self,
            Self::Id
            | Self::H
            | Self::Swap
            | Self::X
            | Self::Y
            | Self::Z
            | Self::Rx
            | Self::Ry
            | Self::Rz
            | Self::R
            | Self::G
            | Self::S
            | Self::T
            | Self::Ph
            | Self::U
            | Self::UNonNorm
        )
    }

    /// Return `true` if operators of this family map pure states to pure
    /// states: unitaries, projectors, measurements, general matrices, and
    /// scalar factors.
    pub fn is_pure(self) -> bool {
        self.is_unitary()
            || matches!(self, Self::M | Self::P | Self::Matr | Self::Fac)
    }

    /// Return `true` for the decoherence channels and Kraus maps.
    pub fn is_channel(self) -> bool { !self.is_pure() }
}
