//! RBM wavefunction with exact permutation symmetry.
//!
//! Given a permutation group `P` of size `G` over the sites (lattice
//! translations), the hidden layer is organized as `α` feature channels
//! replicated across the group, `nh = α·G` with hidden index
//! `j = α·g + f`. The reduced parameters are a scalar visible bias, one
//! hidden bias per channel, and an `nv × α` weight matrix; they expand to
//! a bare RBM via
//!
//!   `aᵢ = a_sym`,  `b_{αg+f} = b_sym[f]`,  `W_{i,αg+f} = W_sym[P[g](i), f]`,
//!
//! which makes `Ψ` invariant under the group and divides the parameter
//! count by ≈ G. Evaluation delegates to the expanded bare RBM; the
//! log-derivatives are the transpose of the expansion applied to the bare
//! derivatives.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::graph::Graph;
use crate::machine::rbm_spin::RbmSpin;
use crate::machine::traits::{random_gaussian, Machine, ThetaLookup};

#[derive(Debug, Clone)]
pub struct RbmSpinSymm {
    /// Permutation table, one bijection over the sites per group element.
    perms: Vec<Vec<usize>>,
    permsize: usize,
    alpha: usize,
    nv: usize,
    nh: usize,
    use_a: bool,
    use_b: bool,
    asymm: Complex64,
    bsymm: DVector<Complex64>,
    /// Reduced weights, visible × channel.
    wsymm: DMatrix<Complex64>,
    /// Expanded machine carrying the full `a`, `b`, `W`.
    bare: RbmSpin,
}

#[derive(Serialize, Deserialize)]
struct RbmSpinSymmDoc {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Nvisible")]
    nvisible: usize,
    #[serde(rename = "Alpha")]
    alpha: usize,
    #[serde(rename = "UseVisibleBias")]
    use_a: bool,
    #[serde(rename = "UseHiddenBias")]
    use_b: bool,
    asymm: Complex64,
    bsymm: DVector<Complex64>,
    #[serde(rename = "Wsymm")]
    wsymm: DMatrix<Complex64>,
}

impl RbmSpinSymm {
    pub fn new(graph: &Graph, alpha: usize, use_a: bool, use_b: bool) -> Result<Self> {
        if alpha == 0 {
            return Err(VmcError::Domain(
                "symmetric RBM needs at least one feature channel (Alpha > 0)".into(),
            ));
        }

        let perms = graph.translation_table()?;
        let nv = graph.nsites();
        let permsize = perms.len();
        for row in &perms {
            if row.len() != nv {
                return Err(VmcError::Domain(
                    "permutation table rows must cover every site".into(),
                ));
            }
        }

        let nh = alpha * permsize;
        Ok(Self {
            perms,
            permsize,
            alpha,
            nv,
            nh,
            use_a,
            use_b,
            asymm: Complex64::new(0.0, 0.0),
            bsymm: DVector::zeros(alpha),
            wsymm: DMatrix::zeros(nv, alpha),
            bare: RbmSpin::new(nv, nh, use_a, use_b),
        })
    }

    pub fn nhidden(&self) -> usize {
        self.nh
    }

    pub fn group_size(&self) -> usize {
        self.permsize
    }

    /// Expand the reduced parameters into the bare RBM.
    fn refresh_bare(&mut self) {
        let mut pars = DVector::zeros(self.bare.npar());
        let mut k = 0;
        if self.use_a {
            for _ in 0..self.nv {
                pars[k] = self.asymm;
                k += 1;
            }
        }
        if self.use_b {
            for j in 0..self.nh {
                pars[k] = self.bsymm[j % self.alpha];
                k += 1;
            }
        }
        for i in 0..self.nv {
            for j in 0..self.nh {
                let g = j / self.alpha;
                let f = j % self.alpha;
                pars[k] = self.wsymm[(self.perms[g][i], f)];
                k += 1;
            }
        }
        self.bare.assign_parameters(&pars);
    }

    fn assign_parameters(&mut self, pars: &DVector<Complex64>) {
        let mut k = 0;
        if self.use_a {
            self.asymm = pars[k];
            k += 1;
        } else {
            self.asymm = Complex64::new(0.0, 0.0);
        }
        if self.use_b {
            for f in 0..self.alpha {
                self.bsymm[f] = pars[k];
                k += 1;
            }
        } else {
            self.bsymm.fill(Complex64::new(0.0, 0.0));
        }
        for i in 0..self.nv {
            for f in 0..self.alpha {
                self.wsymm[(i, f)] = pars[k];
                k += 1;
            }
        }
        self.refresh_bare();
    }
}

impl Machine for RbmSpinSymm {
    type Lookup = ThetaLookup;

    fn nvisible(&self) -> usize {
        self.nv
    }

    fn npar(&self) -> usize {
        let mut npar = self.nv * self.alpha;
        if self.use_a {
            npar += 1;
        }
        if self.use_b {
            npar += self.alpha;
        }
        npar
    }

    fn parameters(&self) -> DVector<Complex64> {
        let mut pars = DVector::zeros(self.npar());
        let mut k = 0;
        if self.use_a {
            pars[k] = self.asymm;
            k += 1;
        }
        if self.use_b {
            for f in 0..self.alpha {
                pars[k] = self.bsymm[f];
                k += 1;
            }
        }
        for i in 0..self.nv {
            for f in 0..self.alpha {
                pars[k] = self.wsymm[(i, f)];
                k += 1;
            }
        }
        pars
    }

    fn set_parameters(&mut self, pars: &DVector<Complex64>) -> Result<()> {
        if pars.len() != self.npar() {
            return Err(VmcError::Protocol(format!(
                "parameter vector has length {} but the machine has {} parameters",
                pars.len(),
                self.npar()
            )));
        }
        self.assign_parameters(pars);
        Ok(())
    }

    fn init_random_parameters(&mut self, seed: u64, sigma: f64) {
        let mut pars = DVector::zeros(self.npar());
        random_gaussian(&mut pars, seed, sigma);
        self.assign_parameters(&pars);
    }

    fn init_lookup(&self, v: &DVector<f64>, lt: &mut ThetaLookup) {
        self.bare.init_lookup(v, lt);
    }

    fn update_lookup(
        &self,
        v: &DVector<f64>,
        tochange: &[usize],
        newconf: &[f64],
        lt: &mut ThetaLookup,
    ) {
        self.bare.update_lookup(v, tochange, newconf, lt);
    }

    fn log_val(&self, v: &DVector<f64>) -> Complex64 {
        self.bare.log_val(v)
    }

    fn log_val_lookup(&self, v: &DVector<f64>, lt: &ThetaLookup) -> Complex64 {
        self.bare.log_val_lookup(v, lt)
    }

    fn log_val_diff(
        &self,
        v: &DVector<f64>,
        tochange: &[Vec<usize>],
        newconf: &[Vec<f64>],
    ) -> DVector<Complex64> {
        self.bare.log_val_diff(v, tochange, newconf)
    }

    fn log_val_diff_lookup(
        &self,
        v: &DVector<f64>,
        tochange: &[usize],
        newconf: &[f64],
        lt: &ThetaLookup,
    ) -> Complex64 {
        self.bare.log_val_diff_lookup(v, tochange, newconf, lt)
    }

    fn der_log(&self, v: &DVector<f64>) -> DVector<Complex64> {
        let bare_der = self.bare.der_log(v);
        let mut der = DVector::zeros(self.npar());

        // Accumulate the bare derivatives onto the reduced parameters,
        // the transpose of the expansion in `refresh_bare`.
        let mut k = 0;
        let mut kbare = 0;
        if self.use_a {
            for i in 0..self.nv {
                der[0] += bare_der[i];
            }
            k += 1;
            kbare += self.nv;
        }
        if self.use_b {
            for j in 0..self.nh {
                der[k + j % self.alpha] += bare_der[kbare + j];
            }
            k += self.alpha;
            kbare += self.nh;
        }
        for i in 0..self.nv {
            for j in 0..self.nh {
                let g = j / self.alpha;
                let f = j % self.alpha;
                der[k + self.perms[g][i] * self.alpha + f] += bare_der[kbare];
                kbare += 1;
            }
        }
        der
    }

    fn to_document(&self) -> Result<serde_json::Value> {
        let doc = RbmSpinSymmDoc {
            name: "RbmSpinSymm".into(),
            nvisible: self.nv,
            alpha: self.alpha,
            use_a: self.use_a,
            use_b: self.use_b,
            asymm: self.asymm,
            bsymm: self.bsymm.clone(),
            wsymm: self.wsymm.clone(),
        };
        let value = serde_json::to_value(doc)?;
        Ok(serde_json::json!({ "Machine": value }))
    }

    fn load_document(&mut self, doc: &serde_json::Value) -> Result<()> {
        let section = doc
            .get("Machine")
            .ok_or_else(|| VmcError::Config("missing Machine section in parameter file".into()))?;
        let loaded: RbmSpinSymmDoc = serde_json::from_value(section.clone())?;

        if loaded.name != "RbmSpinSymm" {
            return Err(VmcError::Config(format!(
                "parameter file holds a {} machine, expected RbmSpinSymm",
                loaded.name
            )));
        }
        if loaded.nvisible != self.nv || loaded.alpha != self.alpha {
            return Err(VmcError::Config(format!(
                "parameter file shape (Nvisible = {}, Alpha = {}) is incompatible with \
                 machine shape (Nvisible = {}, Alpha = {})",
                loaded.nvisible, loaded.alpha, self.nv, self.alpha
            )));
        }
        if loaded.bsymm.len() != self.alpha
            || loaded.wsymm.nrows() != self.nv
            || loaded.wsymm.ncols() != self.alpha
        {
            return Err(VmcError::Config(
                "parameter file arrays do not match the declared shape".into(),
            ));
        }

        let finite = std::iter::once(&loaded.asymm)
            .chain(loaded.bsymm.iter())
            .chain(loaded.wsymm.iter())
            .all(|z| z.re.is_finite() && z.im.is_finite());
        if !finite {
            return Err(VmcError::Numeric(
                "parameter file contains non-finite values".into(),
            ));
        }

        self.use_a = loaded.use_a;
        self.use_b = loaded.use_b;
        self.asymm = loaded.asymm;
        self.bsymm = loaded.bsymm;
        self.wsymm = loaded.wsymm;
        self.refresh_bare();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Hypercube;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn ring(n: usize) -> Graph {
        Graph::Hypercube(Hypercube::new(n, 1, true).unwrap())
    }

    fn random_spins(n: usize, rng: &mut ChaCha8Rng) -> DVector<f64> {
        DVector::from_fn(n, |_, _| if rng.gen::<bool>() { 1.0 } else { -1.0 })
    }

    #[test]
    fn test_parameter_count_reduction() {
        let rbm = RbmSpinSymm::new(&ring(4), 2, true, true).unwrap();
        assert_eq!(rbm.group_size(), 4);
        assert_eq!(rbm.nhidden(), 8);
        // 1 visible scalar + 2 channel biases + 4·2 reduced weights,
        // versus 4 + 8 + 32 bare parameters.
        assert_eq!(rbm.npar(), 11);
    }

    #[test]
    fn test_rejected_without_symmetry_table() {
        let graph = Graph::Hypercube(Hypercube::new(4, 1, false).unwrap());
        assert!(RbmSpinSymm::new(&graph, 2, true, true).is_err());
    }

    #[test]
    fn test_log_val_is_invariant_under_translations() {
        let graph = ring(6);
        let mut rbm = RbmSpinSymm::new(&graph, 2, true, true).unwrap();
        rbm.init_random_parameters(23, 0.3);

        let table = graph.translation_table().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let v = random_spins(6, &mut rng);
        let reference = rbm.log_val(&v);

        for row in &table {
            let vp = DVector::from_fn(6, |i, _| v[row[i]]);
            assert!(
                (rbm.log_val(&vp) - reference).norm() < 1e-10,
                "wavefunction is not invariant under a translation"
            );
        }
    }

    #[test]
    fn test_invariance_on_square_lattice() {
        let graph = Graph::Hypercube(Hypercube::new(3, 2, true).unwrap());
        let mut rbm = RbmSpinSymm::new(&graph, 1, true, true).unwrap();
        rbm.init_random_parameters(5, 0.2);

        let table = graph.translation_table().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(40);
        let v = random_spins(9, &mut rng);
        let reference = rbm.log_val(&v);
        for row in &table {
            let vp = DVector::from_fn(9, |i, _| v[row[i]]);
            assert!((rbm.log_val(&vp) - reference).norm() < 1e-10);
        }
    }

    #[test]
    fn test_der_log_finite_difference() {
        let mut rbm = RbmSpinSymm::new(&ring(4), 2, true, true).unwrap();
        rbm.init_random_parameters(31, 0.2);

        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let v = random_spins(4, &mut rng);
        let ders = rbm.der_log(&v);
        let pars = rbm.parameters();
        let eps = 1e-4;

        for k in 0..rbm.npar() {
            let mut shifted = pars.clone();
            shifted[k] += Complex64::new(eps, 0.0);
            rbm.set_parameters(&shifted).unwrap();
            let valp = rbm.log_val(&v);

            shifted[k] -= Complex64::new(2.0 * eps, 0.0);
            rbm.set_parameters(&shifted).unwrap();
            let valm = rbm.log_val(&v);

            let numder = (valp - valm) / (2.0 * eps);
            assert!(
                (numder - ders[k]).norm() < eps * eps * 100.0,
                "derivative mismatch on reduced parameter {k}: expected {}, found {}",
                ders[k],
                numder
            );
        }
    }

    #[test]
    fn test_lookup_coherence() {
        let mut rbm = RbmSpinSymm::new(&ring(6), 2, true, true).unwrap();
        rbm.init_random_parameters(3, 0.2);

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut v = random_spins(6, &mut rng);
        let mut lt = ThetaLookup::default();
        rbm.init_lookup(&v, &mut lt);

        for _ in 0..50 {
            let site = rng.gen_range(0..6);
            let new = -v[site];
            rbm.update_lookup(&v, &[site], &[new], &mut lt);
            v[site] = new;

            let drift = ((rbm.log_val(&v) - rbm.log_val_lookup(&v, &lt)).exp()
                - Complex64::new(1.0, 0.0))
            .norm();
            assert!(drift < 1e-8);
        }
    }

    #[test]
    fn test_parameters_roundtrip() {
        let mut rbm = RbmSpinSymm::new(&ring(4), 3, true, true).unwrap();
        rbm.init_random_parameters(11, 0.15);
        let pars = rbm.parameters();

        let mut other = RbmSpinSymm::new(&ring(4), 3, true, true).unwrap();
        other.set_parameters(&pars).unwrap();
        assert_eq!(other.parameters(), pars);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let v = random_spins(4, &mut rng);
        assert!((rbm.log_val(&v) - other.log_val(&v)).norm() < 1e-12);
    }

    #[test]
    fn test_document_roundtrip() {
        let mut rbm = RbmSpinSymm::new(&ring(4), 2, true, true).unwrap();
        rbm.init_random_parameters(13, 0.25);
        let doc = rbm.to_document().unwrap();

        let mut restored = RbmSpinSymm::new(&ring(4), 2, true, true).unwrap();
        restored.load_document(&doc).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..5 {
            let v = random_spins(4, &mut rng);
            assert!((rbm.log_val(&v) - restored.log_val(&v)).norm() < 1e-12);
        }
    }
}
