//! Discrete many-body Hilbert spaces.
//!
//! Local quantum numbers are stored as real values. Spins use the integer
//! convention 2·m, so S = 3/2 has local states -3, -1, 1, 3 and S = 1 has
//! -2, 0, 2. A total-magnetization constraint restricts random
//! configurations; incremental updates trust the sampling discipline to
//! preserve it.

use nalgebra::DVector;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Result, VmcError};

/// Spin-S space over `nspins` sites, optionally constrained to a total
/// magnetization `Σᵢ vᵢ = 2·TotalSz`.
#[derive(Debug, Clone)]
pub struct SpinHilbert {
    s: f64,
    nspins: usize,
    total_sz: Option<f64>,
    local: Vec<f64>,
}

impl SpinHilbert {
    pub fn new(nspins: usize, s: f64, total_sz: Option<f64>) -> Result<Self> {
        if nspins == 0 {
            return Err(VmcError::Domain("spin space needs at least one site".into()));
        }
        if s <= 0.0 {
            return Err(VmcError::Domain(format!("invalid spin value S = {s}")));
        }
        if (2.0 * s).floor() != 2.0 * s {
            return Err(VmcError::Domain(format!(
                "spin value S = {s} is neither integer nor half-integer"
            )));
        }

        let nstates = (2.0 * s).floor() as usize + 1;
        let mut local = Vec::with_capacity(nstates);
        let mut sp = -(2.0 * s);
        for _ in 0..nstates {
            local.push(sp);
            sp += 2.0;
        }

        if let Some(sz) = total_sz {
            if s == 0.5 {
                let nup = nspins as f64 / 2.0 + sz;
                if nup.fract() != 0.0 || nup < 0.0 || nup > nspins as f64 {
                    return Err(VmcError::Domain(format!(
                        "cannot fix total magnetization TotalSz = {sz} on {nspins} spins"
                    )));
                }
            } else {
                let raises = s * nspins as f64 + sz;
                if raises.fract() != 0.0 || raises < 0.0 || raises > 2.0 * s * nspins as f64 {
                    return Err(VmcError::Domain(format!(
                        "cannot fix total magnetization TotalSz = {sz} on {nspins} spins with S = {s}"
                    )));
                }
            }
        }

        Ok(Self { s, nspins, total_sz, local })
    }

    fn random_vals<R: Rng>(&self, state: &mut DVector<f64>, rng: &mut R) {
        debug_assert_eq!(state.len(), self.nspins);

        let Some(sz) = self.total_sz else {
            for i in 0..self.nspins {
                state[i] = self.local[rng.gen_range(0..self.local.len())];
            }
            return;
        };

        if self.s == 0.5 {
            let nup = (self.nspins as f64 / 2.0 + sz) as usize;
            let mut vals = vec![1.0; nup];
            vals.resize(self.nspins, -1.0);
            vals.shuffle(rng);
            for (i, v) in vals.into_iter().enumerate() {
                state[i] = v;
            }
        } else {
            // Start from all-minimum and raise random unsaturated sites.
            state.fill(-2.0 * self.s);
            let mut sites: Vec<usize> = (0..self.nspins).collect();
            let raises = (self.s * self.nspins as f64 + sz) as usize;
            for _ in 0..raises {
                let k = rng.gen_range(0..sites.len());
                let site = sites[k];
                state[site] += 2.0;
                if state[site] > 2.0 * self.s - 1.0 {
                    sites.swap_remove(k);
                }
            }
        }
    }
}

/// Bosonic occupation numbers `0..=nmax` per site.
#[derive(Debug, Clone)]
pub struct BosonHilbert {
    nsites: usize,
    local: Vec<f64>,
}

impl BosonHilbert {
    pub fn new(nsites: usize, nmax: usize) -> Result<Self> {
        if nsites == 0 || nmax == 0 {
            return Err(VmcError::Domain(
                "boson space needs at least one site and Nmax > 0".into(),
            ));
        }
        let local = (0..=nmax).map(|n| n as f64).collect();
        Ok(Self { nsites, local })
    }
}

/// Computational-basis qubits with local states 0 and 1.
#[derive(Debug, Clone)]
pub struct QubitHilbert {
    nqubits: usize,
}

impl QubitHilbert {
    pub fn new(nqubits: usize) -> Result<Self> {
        if nqubits == 0 {
            return Err(VmcError::Domain("qubit space needs at least one site".into()));
        }
        Ok(Self { nqubits })
    }
}

/// Space defined by an arbitrary finite local alphabet.
#[derive(Debug, Clone)]
pub struct CustomHilbert {
    size: usize,
    local: Vec<f64>,
}

impl CustomHilbert {
    pub fn new(size: usize, local: Vec<f64>) -> Result<Self> {
        if size == 0 || local.is_empty() {
            return Err(VmcError::Domain(
                "custom space needs a nonempty alphabet and at least one site".into(),
            ));
        }
        Ok(Self { size, local })
    }
}

const QUBIT_STATES: [f64; 2] = [0.0, 1.0];

/// Concrete Hilbert-space variants, selected once at construction.
#[derive(Debug, Clone)]
pub enum Hilbert {
    Spin(SpinHilbert),
    Boson(BosonHilbert),
    Qubit(QubitHilbert),
    Custom(CustomHilbert),
}

impl Hilbert {
    /// Number of sites in a configuration.
    pub fn size(&self) -> usize {
        match self {
            Hilbert::Spin(h) => h.nspins,
            Hilbert::Boson(h) => h.nsites,
            Hilbert::Qubit(h) => h.nqubits,
            Hilbert::Custom(h) => h.size,
        }
    }

    /// Size of the local alphabet.
    pub fn local_size(&self) -> usize {
        self.local_states().len()
    }

    pub fn local_states(&self) -> &[f64] {
        match self {
            Hilbert::Spin(h) => &h.local,
            Hilbert::Boson(h) => &h.local,
            Hilbert::Qubit(_) => &QUBIT_STATES,
            Hilbert::Custom(h) => &h.local,
        }
    }

    /// All shipped spaces are discrete; samplers check this rather than
    /// assuming it.
    pub fn is_discrete(&self) -> bool {
        true
    }

    /// The constrained total `Σᵢ vᵢ`, when one is installed.
    pub fn constrained_total(&self) -> Option<f64> {
        match self {
            Hilbert::Spin(h) => h.total_sz.map(|sz| 2.0 * sz),
            _ => None,
        }
    }

    /// Draw a random configuration honouring any global constraint.
    pub fn random_vals<R: Rng>(&self, state: &mut DVector<f64>, rng: &mut R) {
        match self {
            Hilbert::Spin(h) => h.random_vals(state, rng),
            _ => {
                let local = self.local_states();
                for i in 0..state.len() {
                    state[i] = local[rng.gen_range(0..local.len())];
                }
            }
        }
    }

    /// Overwrite the given sites with new local values. Constraint
    /// preservation is the caller's responsibility.
    pub fn update_conf(&self, v: &mut DVector<f64>, tochange: &[usize], newconf: &[f64]) {
        debug_assert_eq!(tochange.len(), newconf.len());
        for (&site, &value) in tochange.iter().zip(newconf) {
            v[site] = value;
        }
    }
}
