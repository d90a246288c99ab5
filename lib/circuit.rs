//! Ordered sequences of [`Gate`]s and their application to a register.

use std::fmt;
use itertools::Itertools;
use once_cell::unsync::OnceCell;
use rand::Rng;
use tracing::{ debug, trace, warn };
use crate::{
    control::Control,
    error::{ CircuitError, CircuitResult },
    gate::{ Branch, Gate },
    qureg::Qureg,
};

/// A series of [`Gate`]s, applied in insertion order.
///
/// Gates are validated as they are used, not when the circuit is built.
#[derive(Clone, Debug, Default)]
pub struct Circuit {
    gates: Vec<Gate>,
    num_outputs: OnceCell<usize>,
    unitary: OnceCell<bool>,
    pure: OnceCell<bool>,
}

impl PartialEq for Circuit {
    fn eq(&self, other: &Self) -> bool { self.gates == other.gates }
}

impl FromIterator<Gate> for Circuit {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = Gate>
    {
        Self::new(iter)
    }
}

impl IntoIterator for Circuit {
    type Item = Gate;
    type IntoIter = <Vec<Gate> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter { self.gates.into_iter() }
}

impl<'a> IntoIterator for &'a Circuit {
    type Item = &'a Gate;
    type IntoIter = <&'a Vec<Gate> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter { self.gates.iter() }
}

/// Raw description of a single gate: wire code, controls, targets, and
/// parameters.
pub type RawGate = (i64, Vec<usize>, Vec<usize>, Vec<f64>);

impl Circuit {
    /// Create a new circuit from a sequence of gates.
    pub fn new<I>(gates: I) -> Self
    where I: IntoIterator<Item = Gate>
    {
        Self {
            gates: gates.into_iter().collect(),
            num_outputs: OnceCell::new(),
            unitary: OnceCell::new(),
            pure: OnceCell::new(),
        }
    }

    /// Create a new circuit from raw gate descriptions, failing on the first
    /// unknown wire code.
    pub fn from_raw<I>(gates: I) -> CircuitResult<Self>
    where I: IntoIterator<Item = RawGate>
    {
        gates.into_iter()
            .map(|(code, ctrls, targs, params)| {
                Gate::from_raw(code, ctrls, targs, params)
            })
            .collect::<CircuitResult<Vec<Gate>>>()
            .map(Self::new)
    }

    /// Number of gates.
    pub fn len(&self) -> usize { self.gates.len() }

    pub fn is_empty(&self) -> bool { self.gates.is_empty() }

    /// Return a reference to the `k`-th gate, if it exists.
    pub fn gate(&self, k: usize) -> Option<&Gate> { self.gates.get(k) }

    pub fn gates(&self) -> &[Gate] { &self.gates }

    /// Total number of values written to an output buffer by
    /// [`apply`][Self::apply].
    pub fn num_outputs(&self) -> usize {
        *self.num_outputs.get_or_init(|| {
            self.gates.iter().map(|g| g.num_outputs()).sum()
        })
    }

    /// Number of gates that write at least one output.
    pub fn num_gates_with_outputs(&self) -> usize {
        self.gates.iter().filter(|g| g.num_outputs() > 0).count()
    }

    /// Return `true` if every gate is unitary.
    pub fn is_unitary(&self) -> bool {
        *self.unitary.get_or_init(|| self.gates.iter().all(|g| g.is_unitary()))
    }

    /// Return `true` if every gate maps pure states to pure states.
    pub fn is_pure(&self) -> bool {
        *self.pure.get_or_init(|| self.gates.iter().all(|g| g.is_pure()))
    }

    /// Apply every gate in order.
    ///
    /// Gate outputs are written consecutively to `outputs`, which must then
    /// hold at least [`num_outputs`][Self::num_outputs] values. `ctrl` is
    /// polled before each gate, and progress is reported as the fraction of
    /// gates applied before each gate and once more on completion.
    ///
    /// On failure the register is left as it was after the last successful
    /// gate; see [`apply_or_restore`][Self::apply_or_restore].
    pub fn apply<Q>(
        &self,
        q: &mut Q,
        mut outputs: Option<&mut [f64]>,
        ctrl: &mut Control,
    ) -> CircuitResult<()>
    where Q: Qureg
    {
        let nout = self.num_outputs();
        if let Some(buf) = outputs.as_deref() {
            if buf.len() < nout {
                return Err(CircuitError::OutputBufferTooSmall {
                    needed: nout,
                    given: buf.len(),
                });
            }
        }
        let ngates = self.gates.len();
        debug!(gates = ngates, outputs = nout, "applying circuit");
        let mut offs: usize = 0;
        for (k, gate) in self.gates.iter().enumerate() {
            ctrl.poll()?;
            ctrl.report(k as f64 / ngates as f64);
            trace!(gate = %gate, "apply");
            let n = gate.num_outputs();
            let gate_out = outputs.as_deref_mut().map(|buf| &mut buf[offs..offs + n]);
            gate.apply(q, gate_out)?;
            offs += n;
        }
        ctrl.report(1.0);
        Ok(())
    }

    /// Apply every gate in order without outputs, cancellation, or progress.
    pub fn run<Q>(&self, q: &mut Q) -> CircuitResult<()>
    where Q: Qureg
    {
        self.apply(q, None, &mut Control::none())
    }

    /// Like [`apply`][Self::apply], but restore the register to its initial
    /// state if any gate fails.
    pub fn apply_or_restore<Q>(
        &self,
        q: &mut Q,
        outputs: Option<&mut [f64]>,
        ctrl: &mut Control,
    ) -> CircuitResult<()>
    where Q: Qureg
    {
        let backup = q.clone();
        self.apply(q, outputs, ctrl)
            .or_else(|err| {
                warn!(error = %err, "circuit failed; restoring register");
                q.clone_state(&backup)?;
                Err(err)
            })
    }

    fn check_range(&self, start: usize, end: usize) -> CircuitResult<&[Gate]> {
        if start > end || end > self.gates.len() {
            Err(CircuitError::GateRangeOutOfBounds {
                start,
                end,
                len: self.gates.len(),
            })
        } else {
            Ok(&self.gates[start..end])
        }
    }

    /// Apply the gates in `start..end`, in order, discarding outputs.
    pub fn apply_range<Q>(&self, q: &mut Q, start: usize, end: usize)
        -> CircuitResult<()>
    where Q: Qureg
    {
        self.check_range(start, end)?
            .iter()
            .try_for_each(|g| g.apply(q, None))
    }

    /// Apply the adjoints of the gates in `start..end`, in reverse order.
    pub fn apply_dagger_range<Q>(&self, q: &mut Q, start: usize, end: usize)
        -> CircuitResult<()>
    where Q: Qureg
    {
        self.check_range(start, end)?
            .iter().rev()
            .try_for_each(|g| g.apply_dagger(q))
    }

    /// Apply the inverses of the gates in `start..end`, in reverse order.
    pub fn apply_inverse_range<Q>(&self, q: &mut Q, start: usize, end: usize)
        -> CircuitResult<()>
    where Q: Qureg
    {
        self.check_range(start, end)?
            .iter().rev()
            .try_for_each(|g| g.apply_inverse(q))
    }

    /// Total number of pure decompositions of the circuit, i.e. the product
    /// of every gate's [`num_decomps`][Gate::num_decomps].
    ///
    /// Fails with [`CircuitError::DecompositionOverflow`] if the product
    /// reaches 2<sup>63</sup>.
    pub fn num_decomps(&self) -> CircuitResult<u64> {
        let mut log2: f64 = 0.0;
        let mut count: u64 = 1;
        for gate in self.gates.iter() {
            let n = gate.num_decomps()?;
            log2 += (n as f64).log2();
            if log2.ceil() >= 63.0 {
                return Err(CircuitError::DecompositionOverflow);
            }
            count = count.checked_mul(n as u64)
                .ok_or(CircuitError::DecompositionOverflow)?;
        }
        Ok(count)
    }

    /// Apply one pure decomposition of the whole circuit to a state-vector.
    ///
    /// With [`Branch::Index`], the index is read as a mixed-radix number whose
    /// first digit (least significant) selects the branch of the first gate,
    /// and the product of the selected branches' weights is returned.
    ///
    /// With [`Branch::Random`], every gate draws its own branch from `rng` and
    /// the returned weight is always `1.0`, since the branches are already
    /// sampled in proportion to their weights.
    pub fn apply_decomp<Q, R>(&self, q: &mut Q, branch: Branch, rng: &mut R)
        -> CircuitResult<f64>
    where
        Q: Qureg,
        R: Rng + ?Sized,
    {
        match branch {
            Branch::Random => {
                for gate in self.gates.iter() {
                    gate.apply_decomp(q, Branch::Random, rng)?;
                }
                Ok(1.0)
            },
            Branch::Index(index) => {
                let count = self.num_decomps()?;
                if index >= count {
                    return Err(
                        CircuitError::DecompositionIndexOutOfRange { index, count });
                }
                let mut rem = index;
                let mut prob: f64 = 1.0;
                for gate in self.gates.iter() {
                    let n = gate.num_decomps()? as u64;
                    prob *= gate.apply_decomp(q, Branch::Index(rem % n), rng)?;
                    rem /= n;
                }
                Ok(prob)
            },
        }
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.gates.iter().join(", "))
    }
}
