//! Real-valued observables evaluated on a register.

use std::fmt;
use itertools::Itertools;
use crate::{
    error::{ CircuitResult, EngineError },
    qureg::{ Pauli, Qureg },
};

/// Something whose expectation value can be computed on a register of type
/// `Q`.
pub trait Observable<Q: Qureg> {
    /// Expectation value on `q`, using `work` as scratch space.
    ///
    /// `work` must have the same size and kind as `q`; its contents are
    /// overwritten.
    fn expectation(&self, q: &Q, work: &mut Q) -> CircuitResult<f64>;
}

/// A weighted sum of Pauli strings, `Σ c_k P_k`.
#[derive(Clone, Debug, PartialEq)]
pub struct PauliHamil {
    num_qubits: usize,
    terms: Vec<(f64, Vec<Pauli>)>,
}

impl PauliHamil {
    /// Create a new Hamiltonian on `num_qubits` qubits, checking that every
    /// Pauli string covers exactly that many qubits.
    pub fn new<I>(num_qubits: usize, terms: I) -> CircuitResult<Self>
    where I: IntoIterator<Item = (f64, Vec<Pauli>)>
    {
        let terms: Vec<(f64, Vec<Pauli>)> = terms.into_iter().collect();
        if let Some((_, bad))
            = terms.iter().find(|(_, paulis)| paulis.len() != num_qubits)
        {
            return Err(EngineError::PauliStringLength {
                found: bad.len(),
                num_qubits,
            }.into());
        }
        Ok(Self { num_qubits, terms })
    }

    /// Create a new Hamiltonian from a list of coefficients and a flat list of
    /// Pauli codes (0 = I, 1 = X, 2 = Y, 3 = Z), `num_qubits` codes per term.
    pub fn from_codes(num_qubits: usize, coeffs: &[f64], codes: &[i64])
        -> CircuitResult<Self>
    {
        if codes.len() != coeffs.len() * num_qubits {
            return Err(EngineError::PauliStringLength {
                found: codes.len(),
                num_qubits: coeffs.len() * num_qubits,
            }.into());
        }
        let paulis: Vec<Pauli>
            = codes.iter()
            .map(|c| {
                Pauli::from_code(*c).ok_or(EngineError::InvalidPauliCode(*c))
            })
            .collect::<Result<_, _>>()?;
        let terms
            = coeffs.iter().copied()
            .zip(paulis.chunks(num_qubits.max(1)).map(|ch| ch.to_vec()));
        Self::new(num_qubits, terms)
    }

    pub fn num_qubits(&self) -> usize { self.num_qubits }

    pub fn num_terms(&self) -> usize { self.terms.len() }

    pub fn terms(&self) -> &[(f64, Vec<Pauli>)] { &self.terms }
}

impl<Q: Qureg> Observable<Q> for PauliHamil {
    fn expectation(&self, q: &Q, work: &mut Q) -> CircuitResult<f64> {
        if q.num_qubits() != self.num_qubits {
            return Err(EngineError::PauliStringLength {
                found: self.num_qubits,
                num_qubits: q.num_qubits(),
            }.into());
        }
        self.terms.iter()
            .try_fold(0.0, |acc, (c, paulis)| {
                Ok(acc + c * q.expec_pauli_product(paulis, work)?)
            })
    }
}

impl fmt::Display for PauliHamil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms
            = self.terms.iter()
            .map(|(c, paulis)| {
                format!("{} {}", c, paulis.iter().map(|p| format!("{:#}", p)).join(""))
            })
            .join(" + ");
        write!(f, "{}", terms)
    }
}
