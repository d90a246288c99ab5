//! Tools for describing, validating, and applying quantum circuits, including
//! decoherence channels, to registers of qubits.
//!
//! Operators are drawn from a fixed catalog ([`opcode::Opcode`]) and carried
//! as [`gate::Gate`]s: an operator, its control and target qubits, and a flat
//! list of real parameters. Gates can be applied as written, daggered,
//! inverted, or split into pure decompositions for Monte Carlo sampling
//! ([`sample::SamplingEstimator`]). All numeric work is delegated to a
//! [`qureg::Qureg`], of which [`dense::DenseQureg`] is a dense reference
//! implementation.

pub mod error;
pub mod opcode;
pub mod matrix;
pub mod qureg;
pub mod dense;
pub mod gate;
pub mod control;
pub mod circuit;
pub mod observable;
pub mod sample;

pub use error::{ CircuitError, CircuitResult, EngineError, EngineResult };
pub use opcode::Opcode;
pub use qureg::{ Pauli, Qureg };
pub use dense::DenseQureg;
pub use gate::{ Branch, Gate };
pub use control::{ CancelToken, Control };
pub use circuit::Circuit;
pub use observable::{ Observable, PauliHamil };
pub use sample::{ Samples, SamplingEstimator };
