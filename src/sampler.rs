//! Metropolis samplers over discrete configurations.
//!
//! Each chain owns its machine, its configuration, its lookup cache and
//! its RNG; chains on different workers are decorrelated through distinct
//! seeds. A sweep performs one proposal per site. Proposals with a
//! non-finite log-ratio are rejected outright.

use nalgebra::DVector;
use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Result, VmcError};
use crate::graph::Graph;
use crate::hilbert::Hilbert;
use crate::machine::Machine;

/// Markov chain over configurations of a discrete Hilbert space.
pub trait Sampler<M: Machine> {
    /// Re-initialize the lookup from the current configuration, zeroing
    /// the move counters; with `initrandom` the configuration is redrawn
    /// first.
    fn reset(&mut self, initrandom: bool);

    /// One proposal per site.
    fn sweep(&mut self);

    fn visible(&self) -> &DVector<f64>;
    fn set_visible(&mut self, v: &DVector<f64>);

    /// Accepted over attempted moves since the last reset.
    fn acceptance(&self) -> f64;

    fn machine(&self) -> &M;
    fn machine_mut(&mut self) -> &mut M;

    /// Install the chain's RNG seed.
    fn seed(&mut self, seed: u64);
}

fn validate_chain<M: Machine>(machine: &M, hilbert: &Hilbert) -> Result<()> {
    if !hilbert.is_discrete() {
        return Err(VmcError::Domain(
            "Metropolis sampling requires a discrete Hilbert space".into(),
        ));
    }
    if hilbert.local_size() < 2 {
        return Err(VmcError::Domain(
            "Metropolis sampling requires at least two local states".into(),
        ));
    }
    if machine.nvisible() != hilbert.size() {
        return Err(VmcError::Domain(format!(
            "machine has {} visible units but the Hilbert space has {} sites",
            machine.nvisible(),
            hilbert.size()
        )));
    }
    Ok(())
}

#[cfg(debug_assertions)]
fn assert_lookup_coherent<M: Machine>(machine: &M, v: &DVector<f64>, lt: &M::Lookup) {
    let full = machine.log_val(v);
    let cached = machine.log_val_lookup(v, lt);
    let drift = ((full - cached).exp() - Complex64::new(1.0, 0.0)).norm();
    debug_assert!(
        drift < 1.0e-8,
        "lookup incoherent: log_val = {full}, cached = {cached}"
    );
}

/// Metropolis chain proposing single-site changes to a random local value.
pub struct MetropolisLocal<M: Machine> {
    machine: M,
    hilbert: Hilbert,
    nv: usize,
    localstates: Vec<f64>,
    v: DVector<f64>,
    lt: M::Lookup,
    accept: f64,
    moves: f64,
    rng: ChaCha8Rng,
}

impl<M: Machine> MetropolisLocal<M> {
    pub fn new(machine: M, hilbert: Hilbert) -> Result<Self> {
        validate_chain(&machine, &hilbert)?;
        let nv = hilbert.size();
        let localstates = hilbert.local_states().to_vec();
        Ok(Self {
            machine,
            hilbert,
            nv,
            localstates,
            v: DVector::zeros(nv),
            lt: M::Lookup::default(),
            accept: 0.0,
            moves: 0.0,
            rng: ChaCha8Rng::seed_from_u64(0),
        })
    }
}

impl<M: Machine> Sampler<M> for MetropolisLocal<M> {
    fn reset(&mut self, initrandom: bool) {
        if initrandom {
            self.hilbert.random_vals(&mut self.v, &mut self.rng);
        }
        self.machine.init_lookup(&self.v, &mut self.lt);
        self.accept = 0.0;
        self.moves = 0.0;
    }

    fn sweep(&mut self) {
        let mut tochange = [0usize; 1];
        let mut newconf = [0.0f64; 1];

        for _ in 0..self.nv {
            let si = self.rng.gen_range(0..self.nv);
            tochange[0] = si;

            // Resample until the proposed value differs from the current one.
            newconf[0] = self.localstates[self.rng.gen_range(0..self.localstates.len())];
            while (newconf[0] - self.v[si]).abs() < f64::EPSILON {
                newconf[0] = self.localstates[self.rng.gen_range(0..self.localstates.len())];
            }

            let lvd: Complex64 =
                self.machine.log_val_diff_lookup(&self.v, &tochange, &newconf, &self.lt);
            self.moves += 1.0;
            if !lvd.re.is_finite() || !lvd.im.is_finite() {
                continue;
            }
            let ratio = lvd.exp().norm_sqr();

            #[cfg(debug_assertions)]
            let psival1 = self.machine.log_val(&self.v);
            #[cfg(debug_assertions)]
            assert_lookup_coherent(&self.machine, &self.v, &self.lt);

            if ratio > self.rng.gen::<f64>() {
                self.accept += 1.0;
                self.machine.update_lookup(&self.v, &tochange, &newconf, &mut self.lt);
                self.hilbert.update_conf(&mut self.v, &tochange, &newconf);

                #[cfg(debug_assertions)]
                {
                    let psival2 = self.machine.log_val(&self.v);
                    let drift = ((psival2 - psival1 - lvd).exp() - Complex64::new(1.0, 0.0)).norm();
                    debug_assert!(
                        drift < 1.0e-8,
                        "log-ratio incoherent: measured {}, predicted {lvd}",
                        psival2 - psival1
                    );
                }
            }
        }
    }

    fn visible(&self) -> &DVector<f64> {
        &self.v
    }

    fn set_visible(&mut self, v: &DVector<f64>) {
        self.v.copy_from(v);
        self.machine.init_lookup(&self.v, &mut self.lt);
    }

    fn acceptance(&self) -> f64 {
        if self.moves == 0.0 {
            0.0
        } else {
            self.accept / self.moves
        }
    }

    fn machine(&self) -> &M {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

/// Metropolis chain proposing value exchanges across random graph bonds.
///
/// Exchange moves conserve any global magnetization constraint, which
/// single-site flips would break.
pub struct MetropolisExchange<M: Machine> {
    machine: M,
    hilbert: Hilbert,
    nv: usize,
    bonds: Vec<(usize, usize)>,
    v: DVector<f64>,
    lt: M::Lookup,
    accept: f64,
    moves: f64,
    rng: ChaCha8Rng,
}

impl<M: Machine> MetropolisExchange<M> {
    pub fn new(machine: M, hilbert: Hilbert, graph: &Graph) -> Result<Self> {
        validate_chain(&machine, &hilbert)?;
        let bonds = graph.edges();
        if bonds.is_empty() {
            return Err(VmcError::Domain(
                "exchange sampling requires a graph with at least one bond".into(),
            ));
        }
        let nv = hilbert.size();
        Ok(Self {
            machine,
            hilbert,
            nv,
            bonds,
            v: DVector::zeros(nv),
            lt: M::Lookup::default(),
            accept: 0.0,
            moves: 0.0,
            rng: ChaCha8Rng::seed_from_u64(0),
        })
    }
}

impl<M: Machine> Sampler<M> for MetropolisExchange<M> {
    fn reset(&mut self, initrandom: bool) {
        if initrandom {
            self.hilbert.random_vals(&mut self.v, &mut self.rng);
        }
        self.machine.init_lookup(&self.v, &mut self.lt);
        self.accept = 0.0;
        self.moves = 0.0;
    }

    fn sweep(&mut self) {
        for _ in 0..self.nv {
            let (si, sj) = self.bonds[self.rng.gen_range(0..self.bonds.len())];
            self.moves += 1.0;

            // Exchanging equal values is the identity move.
            if (self.v[si] - self.v[sj]).abs() < f64::EPSILON {
                continue;
            }

            let tochange = [si, sj];
            let newconf = [self.v[sj], self.v[si]];

            let lvd: Complex64 =
                self.machine.log_val_diff_lookup(&self.v, &tochange, &newconf, &self.lt);
            if !lvd.re.is_finite() || !lvd.im.is_finite() {
                continue;
            }
            let ratio = lvd.exp().norm_sqr();

            #[cfg(debug_assertions)]
            assert_lookup_coherent(&self.machine, &self.v, &self.lt);

            if ratio > self.rng.gen::<f64>() {
                self.accept += 1.0;
                self.machine.update_lookup(&self.v, &tochange, &newconf, &mut self.lt);
                self.hilbert.update_conf(&mut self.v, &tochange, &newconf);
            }
        }
    }

    fn visible(&self) -> &DVector<f64> {
        &self.v
    }

    fn set_visible(&mut self, v: &DVector<f64>) {
        self.v.copy_from(v);
        self.machine.init_lookup(&self.v, &mut self.lt);
    }

    fn acceptance(&self) -> f64 {
        if self.moves == 0.0 {
            0.0
        } else {
            self.accept / self.moves
        }
    }

    fn machine(&self) -> &M {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Hypercube;
    use crate::hilbert::{CustomHilbert, SpinHilbert};
    use crate::machine::RbmSpin;

    fn spin_half(n: usize, total_sz: Option<f64>) -> Hilbert {
        Hilbert::Spin(SpinHilbert::new(n, 0.5, total_sz).unwrap())
    }

    fn random_rbm(n: usize, seed: u64) -> RbmSpin {
        let mut rbm = RbmSpin::with_alpha(n, 2, true, true);
        rbm.init_random_parameters(seed, 0.1);
        rbm
    }

    #[test]
    fn test_local_sampler_moves_and_accepts() {
        let mut sampler = MetropolisLocal::new(random_rbm(6, 1), spin_half(6, None)).unwrap();
        sampler.seed(42);
        sampler.reset(true);

        let before = sampler.visible().clone();
        for _ in 0..20 {
            sampler.sweep();
        }
        let acc = sampler.acceptance();
        assert!(acc > 0.0 && acc <= 1.0, "acceptance {acc} out of range");
        assert_ne!(&before, sampler.visible());
    }

    #[test]
    fn test_local_sampler_lookup_stays_coherent() {
        let mut sampler = MetropolisLocal::new(random_rbm(8, 5), spin_half(8, None)).unwrap();
        sampler.seed(7);
        sampler.reset(true);
        for _ in 0..30 {
            sampler.sweep();
        }

        let v = sampler.visible().clone();
        let machine = sampler.machine();
        let mut lt = crate::machine::ThetaLookup::default();
        machine.init_lookup(&v, &mut lt);
        let drift = ((machine.log_val(&v) - machine.log_val_lookup(&v, &lt)).exp()
            - Complex64::new(1.0, 0.0))
        .norm();
        assert!(drift < 1e-8);
    }

    #[test]
    fn test_local_sampler_stays_in_alphabet() {
        let mut sampler = MetropolisLocal::new(
            {
                let mut rbm = RbmSpin::with_alpha(4, 1, true, true);
                rbm.init_random_parameters(2, 0.1);
                rbm
            },
            Hilbert::Spin(SpinHilbert::new(4, 1.0, None).unwrap()),
        )
        .unwrap();
        sampler.seed(11);
        sampler.reset(true);
        for _ in 0..20 {
            sampler.sweep();
            assert!(sampler
                .visible()
                .iter()
                .all(|&x| x == -2.0 || x == 0.0 || x == 2.0));
        }
    }

    #[test]
    fn test_seeded_chains_are_reproducible() {
        let run = |seed: u64| {
            let mut sampler =
                MetropolisLocal::new(random_rbm(6, 3), spin_half(6, None)).unwrap();
            sampler.seed(seed);
            sampler.reset(true);
            for _ in 0..10 {
                sampler.sweep();
            }
            sampler.visible().clone()
        };
        assert_eq!(run(99), run(99));
        assert_ne!(run(99), run(100));
    }

    #[test]
    fn test_exchange_preserves_magnetization() {
        let graph = Graph::Hypercube(Hypercube::new(8, 1, true).unwrap());
        let mut sampler =
            MetropolisExchange::new(random_rbm(8, 13), spin_half(8, Some(0.0)), &graph).unwrap();
        sampler.seed(17);
        sampler.reset(true);

        assert_eq!(sampler.visible().iter().sum::<f64>(), 0.0);
        for _ in 0..50 {
            sampler.sweep();
            assert_eq!(sampler.visible().iter().sum::<f64>(), 0.0);
        }
        assert!(sampler.acceptance() > 0.0);
    }

    #[test]
    fn test_acceptance_matches_detailed_balance_expectation() {
        // Detailed balance, statistically: over a long chain the realized
        // acceptance rate must match the mean Metropolis probability
        // E[min(1, |Ψ(v')/Ψ(v)|²)] over the same proposals.
        let n = 6;
        let seed = 71;
        let sweeps = 2000;

        let machine = {
            let mut rbm = RbmSpin::with_alpha(n, 2, true, true);
            rbm.init_random_parameters(15, 0.2);
            rbm
        };
        let hilbert = spin_half(n, None);

        let mut sampler = MetropolisLocal::new(machine.clone(), hilbert.clone()).unwrap();
        sampler.seed(seed);
        sampler.reset(true);
        for _ in 0..sweeps {
            sampler.sweep();
        }
        let realized = sampler.acceptance();

        // Replay the identical chain (same seed, same draw order as
        // `sweep`) accumulating the acceptance probability per proposal.
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut v = DVector::zeros(n);
        hilbert.random_vals(&mut v, &mut rng);
        let mut lt = crate::machine::ThetaLookup::default();
        machine.init_lookup(&v, &mut lt);

        let localstates = hilbert.local_states().to_vec();
        let mut expected = 0.0;
        let proposals = (sweeps * n) as f64;
        for _ in 0..sweeps * n {
            let si = rng.gen_range(0..n);
            let mut new = localstates[rng.gen_range(0..localstates.len())];
            while (new - v[si]).abs() < f64::EPSILON {
                new = localstates[rng.gen_range(0..localstates.len())];
            }

            let lvd: Complex64 = machine.log_val_diff_lookup(&v, &[si], &[new], &lt);
            let ratio = lvd.exp().norm_sqr();
            expected += ratio.min(1.0);

            if ratio > rng.gen::<f64>() {
                machine.update_lookup(&v, &[si], &[new], &mut lt);
                hilbert.update_conf(&mut v, &[si], &[new]);
            }
        }
        let expected = expected / proposals;

        // Per-proposal accepts are Bernoulli draws of the accumulated
        // probabilities, so the means agree to ~0.5/sqrt(proposals).
        assert!(
            (realized - expected).abs() < 0.02,
            "empirical acceptance {realized} deviates from Metropolis expectation {expected}"
        );
    }

    #[test]
    fn test_single_state_alphabet_is_rejected() {
        let hilbert = Hilbert::Custom(CustomHilbert::new(4, vec![1.0]).unwrap());
        assert!(MetropolisLocal::new(random_rbm(4, 1), hilbert).is_err());
    }

    #[test]
    fn test_visible_unit_mismatch_is_rejected() {
        assert!(MetropolisLocal::new(random_rbm(4, 1), spin_half(6, None)).is_err());
    }
}
