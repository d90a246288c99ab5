//! Monte Carlo estimation of observables after noisy circuits.
//!
//! Instead of evolving a density matrix, a [`SamplingEstimator`] applies pure
//! decompositions of a circuit to copies of a state-vector and averages the
//! value of an [`Observable`] over them. With few enough decompositions, every
//! one of them is enumerated and the result is exact.

use std::ops::AddAssign;
use rand::Rng;
use tracing::{ debug, warn };
use crate::{
    circuit::Circuit,
    control::Control,
    error::{ CircuitError, CircuitResult, EngineError },
    gate::Branch,
    observable::Observable,
    qureg::Qureg,
};

/// Number of circuit decompositions to evaluate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Samples {
    /// Draw this many decompositions at random.
    ///
    /// If at least as many samples are requested as there are decompositions,
    /// every decomposition is enumerated instead.
    Count(u64),
    /// Enumerate every decomposition, weighting each by its probability.
    All,
}

impl Samples {
    /// Convert from a raw sample count, where `-1` requests every
    /// decomposition.
    pub fn from_raw(n: i64) -> CircuitResult<Self> {
        match n {
            -1 => Ok(Self::All),
            n if n > 0 => Ok(Self::Count(n as u64)),
            n => Err(CircuitError::InvalidSampling(
                format!("the number of samples must be positive, but got {}", n)
            )),
        }
    }
}

/// Running sum with Kahan compensation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct KahanSum {
    sum: f64,
    comp: f64,
}

impl KahanSum {
    pub fn new() -> Self { Self::default() }

    /// Add a single term.
    pub fn add(&mut self, x: f64) {
        let y = x - self.comp;
        let t = self.sum + y;
        self.comp = (t - self.sum) - y;
        self.sum = t;
    }

    /// Current value of the sum.
    pub fn value(&self) -> f64 { self.sum }
}

impl AddAssign<f64> for KahanSum {
    fn add_assign(&mut self, x: f64) { self.add(x); }
}

impl FromIterator<f64> for KahanSum {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = f64>
    {
        let mut acc = Self::new();
        iter.into_iter().for_each(|x| acc.add(x));
        acc
    }
}

/// Estimates the expectation value of an observable after a circuit, by
/// sampling the circuit's pure decompositions.
#[derive(Copy, Clone, Debug)]
pub struct SamplingEstimator<'a, O> {
    circuit: &'a Circuit,
    observable: &'a O,
}

impl<'a, O> SamplingEstimator<'a, O> {
    pub fn new(circuit: &'a Circuit, observable: &'a O) -> Self {
        Self { circuit, observable }
    }

    pub fn circuit(&self) -> &Circuit { self.circuit }

    pub fn observable(&self) -> &O { self.observable }

    /// Estimate the expectation value of the observable after applying the
    /// circuit to `init`, which must be a state-vector and is left untouched.
    ///
    /// Scratch registers are cloned from `init`; see
    /// [`estimate_with`][Self::estimate_with] to supply them instead.
    pub fn estimate<Q, R>(
        &self,
        init: &Q,
        samples: Samples,
        rng: &mut R,
        ctrl: &mut Control,
    ) -> CircuitResult<f64>
    where
        Q: Qureg,
        O: Observable<Q>,
        R: Rng + ?Sized,
    {
        let mut state = init.clone();
        let mut work = init.clone();
        self.estimate_with(init, samples, &mut state, &mut work, rng, ctrl)
    }

    /// Like [`estimate`][Self::estimate], but using caller-supplied scratch
    /// registers: `state` receives each decomposed circuit's output, and
    /// `work` is handed to the observable. Both must be state-vectors of the
    /// same size as `init`, and both are overwritten.
    ///
    /// Random samples are averaged with equal weight; enumerated
    /// decompositions are summed with their probability weights.
    pub fn estimate_with<Q, R>(
        &self,
        init: &Q,
        samples: Samples,
        state: &mut Q,
        work: &mut Q,
        rng: &mut R,
        ctrl: &mut Control,
    ) -> CircuitResult<f64>
    where
        Q: Qureg,
        O: Observable<Q>,
        R: Rng + ?Sized,
    {
        if samples == Samples::Count(0) {
            return Err(CircuitError::InvalidSampling(
                "the number of samples must be positive, but got 0".to_string()
            ));
        }
        if init.is_density_matrix() {
            return Err(CircuitError::RequiresStateVector("the initial register"));
        }
        if state.is_density_matrix() || work.is_density_matrix() {
            return Err(CircuitError::RequiresStateVector("a scratch register"));
        }
        let n = init.num_qubits();
        if state.num_qubits() != n || work.num_qubits() != n {
            return Err(EngineError::MismatchedRegisters.into());
        }

        let max_decomps: Option<u64>
            = match self.circuit.num_decomps() {
                Ok(count) => Some(count),
                Err(CircuitError::DecompositionOverflow) => None,
                Err(err) => { return Err(err); },
            };
        let (num_samples, exhaustive)
            = match (samples, max_decomps) {
                (Samples::All, Some(max)) => (max, true),
                (Samples::All, None) => {
                    return Err(CircuitError::TooManyDecompositions);
                },
                (Samples::Count(count), Some(max)) if count >= max => {
                    warn!(
                        requested = count,
                        decompositions = max,
                        "at least as many samples were requested as there are \
                        unique circuit decompositions; enumerating each \
                        decomposition instead",
                    );
                    (max, true)
                },
                (Samples::Count(count), _) => (count, false),
            };
        debug!(
            gates = self.circuit.len(),
            decompositions = ?max_decomps,
            samples = num_samples,
            exhaustive,
            "sampling circuit expectation value",
        );

        let mut acc = KahanSum::new();
        for k in 0..num_samples {
            ctrl.poll()?;
            ctrl.report(k as f64 / num_samples as f64);
            state.clone_state(init)?;
            let branch = if exhaustive { Branch::Index(k) } else { Branch::Random };
            let weight = self.circuit.apply_decomp(state, branch, rng)?;
            acc += weight * self.observable.expectation(state, work)?;
        }
        ctrl.report(1.0);

        if exhaustive {
            Ok(acc.value())
        } else {
            Ok(acc.value() / num_samples as f64)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::{
        control::CancelToken,
        dense::DenseQureg,
        gate::Gate,
        observable::PauliHamil,
        opcode::Opcode,
        qureg::Pauli,
    };

    fn gate(op: Opcode, ctrls: &[usize], targs: &[usize], params: &[f64]) -> Gate {
        Gate::new(op, ctrls.to_vec(), targs.to_vec(), params.to_vec())
    }

    fn z0() -> PauliHamil {
        PauliHamil::new(2, [(1.0, vec![Pauli::Z, Pauli::I])]).unwrap()
    }

    #[test]
    fn kahan_sum_compensates() {
        let acc: KahanSum
            = std::iter::once(1.0)
            .chain(std::iter::repeat(1e-16).take(10_000))
            .collect();
        assert_abs_diff_eq!(acc.value(), 1.0 + 1e-12, epsilon = 1e-15);

        let naive: f64
            = std::iter::once(1.0)
            .chain(std::iter::repeat(1e-16).take(10_000))
            .sum();
        assert_eq!(naive, 1.0);
    }

    #[test]
    fn raw_sample_counts() {
        assert_eq!(Samples::from_raw(-1).unwrap(), Samples::All);
        assert_eq!(Samples::from_raw(5).unwrap(), Samples::Count(5));
        assert!(matches!(Samples::from_raw(0), Err(CircuitError::InvalidSampling(_))));
        assert!(matches!(Samples::from_raw(-3), Err(CircuitError::InvalidSampling(_))));
    }

    #[test]
    fn exhaustive_dephasing_is_exact() {
        // <X> after dephasing |+> with probability p is 1 - 2p
        let circ = Circuit::new([
            gate(Opcode::H, &[], &[0], &[]),
            gate(Opcode::Deph, &[], &[0], &[0.3]),
        ]);
        let obs = PauliHamil::new(1, [(1.0, vec![Pauli::X])]).unwrap();
        let init = DenseQureg::new(1, Some(0));
        let est = SamplingEstimator::new(&circ, &obs);
        let mut rng = StdRng::seed_from_u64(10546);

        let all = est.estimate(&init, Samples::All, &mut rng, &mut Control::none())
            .unwrap();
        assert_abs_diff_eq!(all, 0.4, epsilon = 1e-12);

        // more samples than decompositions switches to enumeration
        let many
            = est.estimate(&init, Samples::Count(5), &mut rng, &mut Control::none())
            .unwrap();
        assert_abs_diff_eq!(many, all, epsilon = 1e-12);
        assert_eq!(init.amp(0), DenseQureg::new(1, None).amp(0));
    }

    #[test]
    fn exhaustive_matches_density_matrix() {
        let circ = Circuit::new([
            gate(Opcode::H, &[], &[0], &[]),
            gate(Opcode::X, &[0], &[1], &[]),
            gate(Opcode::Damp, &[], &[0], &[0.25]),
            gate(Opcode::Depol, &[], &[1], &[0.2]),
        ]);
        let obs = PauliHamil::from_codes(2, &[1.0, 0.5, -0.7], &[3, 0, 3, 3, 1, 1])
            .unwrap();
        let init = DenseQureg::new(2, Some(0));
        let est = SamplingEstimator::new(&circ, &obs);
        let mut rng = StdRng::seed_from_u64(10546);
        let sampled = est.estimate(&init, Samples::All, &mut rng, &mut Control::none())
            .unwrap();

        let mut rho = init.to_density();
        circ.run(&mut rho).unwrap();
        let mut work = rho.clone();
        let exact = obs.expectation(&rho, &mut work).unwrap();
        assert_abs_diff_eq!(sampled, exact, epsilon = 1e-10);
    }

    #[test]
    fn random_sampling_converges() {
        // <Z> after damping |1> with probability 1/4 is -1/2; the padding
        // channels have zero probability and only inflate the decomposition
        // count past the number of samples
        let mut gates = vec![
            gate(Opcode::X, &[], &[0], &[]),
            gate(Opcode::Damp, &[], &[0], &[0.25]),
        ];
        gates.extend((0..4).map(|_| gate(Opcode::Depol, &[], &[0, 1], &[0.0])));
        let circ = Circuit::new(gates);
        assert_eq!(circ.num_decomps().unwrap(), 2 * 16_u64.pow(4));

        let obs = z0();
        let init = DenseQureg::new(2, Some(0));
        let est = SamplingEstimator::new(&circ, &obs);
        let mut rng = StdRng::seed_from_u64(10546);
        let mut state = init.clone();
        let mut work = init.clone();
        let ex = est.estimate_with(
            &init,
            Samples::Count(20_000),
            &mut state,
            &mut work,
            &mut rng,
            &mut Control::none(),
        ).unwrap();
        assert_abs_diff_eq!(ex, -0.5, epsilon = 0.05);
    }

    #[test]
    fn overflowing_circuits_fall_back_to_random() {
        let circ: Circuit
            = (0..16)
            .map(|_| gate(Opcode::Depol, &[], &[0, 1], &[0.0]))
            .collect();
        assert!(matches!(circ.num_decomps(), Err(CircuitError::DecompositionOverflow)));
        let obs = z0();
        let init = DenseQureg::new(2, Some(0));
        let est = SamplingEstimator::new(&circ, &obs);
        let mut rng = StdRng::seed_from_u64(10546);

        assert!(matches!(
            est.estimate(&init, Samples::All, &mut rng, &mut Control::none()),
            Err(CircuitError::TooManyDecompositions)
        ));
        let ex = est.estimate(&init, Samples::Count(3), &mut rng, &mut Control::none())
            .unwrap();
        assert_abs_diff_eq!(ex, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn registers_are_validated() {
        let circ = Circuit::new([gate(Opcode::H, &[], &[0], &[])]);
        let obs = z0();
        let est = SamplingEstimator::new(&circ, &obs);
        let mut rng = StdRng::seed_from_u64(10546);
        let init = DenseQureg::new(2, None);

        assert!(matches!(
            est.estimate(&init, Samples::Count(0), &mut rng, &mut Control::none()),
            Err(CircuitError::InvalidSampling(_))
        ));
        assert!(matches!(
            est.estimate(&init.to_density(), Samples::All, &mut rng, &mut Control::none()),
            Err(CircuitError::RequiresStateVector(_))
        ));

        let mut state = DenseQureg::new_density(2, None);
        let mut work = init.clone();
        assert!(matches!(
            est.estimate_with(
                &init, Samples::All, &mut state, &mut work, &mut rng,
                &mut Control::none()),
            Err(CircuitError::RequiresStateVector(_))
        ));

        let mut state = DenseQureg::new(3, None);
        assert!(matches!(
            est.estimate_with(
                &init, Samples::All, &mut state, &mut work, &mut rng,
                &mut Control::none()),
            Err(CircuitError::Engine(EngineError::MismatchedRegisters))
        ));
    }

    #[test]
    fn cancellation_and_progress() {
        let circ = Circuit::new([gate(Opcode::Deph, &[], &[0, 1], &[0.6])]);
        let obs = z0();
        let est = SamplingEstimator::new(&circ, &obs);
        let mut rng = StdRng::seed_from_u64(10546);
        let init = DenseQureg::new(2, None);

        let mut seen: Vec<f64> = Vec::new();
        let mut record = |x: f64| seen.push(x);
        let mut ctrl = Control::none().with_progress(&mut record);
        est.estimate(&init, Samples::All, &mut rng, &mut ctrl).unwrap();
        drop(ctrl);
        assert_eq!(seen, vec![0.0, 0.25, 0.5, 0.75, 1.0]);

        let token = CancelToken::new();
        token.cancel();
        let mut ctrl = Control::none().with_cancel(token);
        assert!(matches!(
            est.estimate(&init, Samples::All, &mut rng, &mut ctrl),
            Err(CircuitError::UserAborted)
        ));
    }
}
