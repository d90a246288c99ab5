//! Error types for operator validation, application, and sampling.
//!
//! [`CircuitError`] is what the operator and circuit layers return.
//! [`EngineError`] is what a register implementation signals from inside its
//! own primitives; it passes through [`CircuitError::Engine`] untouched.

use std::fmt;
use thiserror::Error;

/// Part of an operator description that failed a structural check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Controls,
    Targets,
    /// Controls and targets counted together.
    Qubits,
    Params,
    /// The leading operator count of a Kraus map.
    KrausOperators,
    /// Pauli codes of a generalized rotation.
    PauliCodes,
    /// The packed outcome value of a projector.
    Outcome,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controls => write!(f, "control qubits"),
            Self::Targets => write!(f, "target qubits"),
            Self::Qubits => write!(f, "qubits"),
            Self::Params => write!(f, "parameters"),
            Self::KrausOperators => write!(f, "Kraus operators"),
            Self::PauliCodes => write!(f, "Pauli codes"),
            Self::Outcome => write!(f, "packed outcome"),
        }
    }
}

/// Why an operator could not be inverted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Irreversible {
    /// The operator family is never invertible (projectors, measurements).
    Always,
    /// The operator is singular at its given parameters, e.g. a maximally
    /// mixing channel.
    AtParams,
}

impl fmt::Display for Irreversible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "the operator is never invertible"),
            Self::AtParams =>
                write!(f, "the operator is singular at its given parameters"),
        }
    }
}

/// Errors signalled by a register's numeric primitives.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("qubit index {qubit} is out of range for a {num_qubits}-qubit register")]
    QubitOutOfRange { qubit: usize, num_qubits: usize },

    #[error("qubit {0} appears more than once among controls and targets")]
    RepeatedQubit(usize),

    #[error("{op} acts on {expected} targets, but {found} were given")]
    TargetCount { op: &'static str, found: usize, expected: &'static str },

    #[error("{0} amplitudes do not describe a register of qubits")]
    AmplitudeCount(usize),

    #[error("a register of {0} qubits is too large to address")]
    TooManyQubits(usize),

    #[error("{0} can only be applied to a density matrix")]
    NotDensityMatrix(&'static str),

    #[error("{0} can only be applied to a state-vector")]
    NotStateVector(&'static str),

    #[error("expected a {expected}x{expected} matrix, but got {rows}x{cols}")]
    MatrixShape { expected: usize, rows: usize, cols: usize },

    #[error("matrix passed to {0} is not unitary")]
    NotUnitary(&'static str),

    #[error("Kraus operators passed to {0} are not trace-preserving")]
    NotTracePreserving(&'static str),

    #[error("probability {prob} of {op} lies outside [0, {max}]")]
    InvalidProbability { op: &'static str, prob: f64, max: f64 },

    #[error("outcome {0} is not a valid qubit outcome (0 or 1)")]
    InvalidOutcome(i64),

    #[error("outcome {outcome} of qubit {qubit} has zero probability")]
    ImpossibleOutcome { qubit: usize, outcome: u8 },

    #[error("registers differ in size or kind")]
    MismatchedRegisters,

    #[error("{0} is not a Pauli code (0 = I, 1 = X, 2 = Y, 3 = Z)")]
    InvalidPauliCode(i64),

    #[error("Pauli string has {found} entries for a {num_qubits}-qubit register")]
    PauliStringLength { found: usize, num_qubits: usize },
}

/// Errors from validating, applying, or sampling operators and circuits.
#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("{op} accepts {expected} {field}, but {found} were given")]
    InvalidOperatorShape {
        op: &'static str,
        field: Field,
        found: usize,
        expected: String,
    },

    #[error("circuit contained an unknown operator (opcode {0})")]
    UnknownOperator(i64),

    #[error("the dagger (conjugate transpose) of {0} is not defined")]
    NoAdjointDefined(&'static str),

    #[error("the inverse of {op} was requested, but {reason}")]
    NotInvertible { op: &'static str, reason: Irreversible },

    #[error("probability {prob} of {op} lies outside [0, {max}]")]
    InvalidChannelParameter { op: String, prob: f64, max: f64 },

    #[error("decomposition index {index} is out of range for {count} decompositions")]
    DecompositionIndexOutOfRange { index: u64, count: u64 },

    #[error("the number of circuit decompositions overflows 2^63")]
    DecompositionOverflow,

    #[error("the number of unique circuit decompositions is too large to be enumerated (exceeds 2^63); a smaller number of samples must be specified")]
    TooManyDecompositions,

    #[error("{0} requires a state-vector register")]
    RequiresStateVector(&'static str),

    #[error("gate range {start}..{end} is out of bounds for a circuit of {len} gates")]
    GateRangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("output buffer holds {given} values, but {needed} are needed")]
    OutputBufferTooSmall { needed: usize, given: usize },

    #[error("invalid sampling request: {0}")]
    InvalidSampling(String),

    #[error("aborted by the user")]
    UserAborted,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type CircuitResult<T> = Result<T, CircuitError>;

pub type EngineResult<T> = Result<T, EngineError>;
