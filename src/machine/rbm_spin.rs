//! Restricted Boltzmann Machine wavefunction.
//!
//! `log Ψ(v) = vᵀa + Σⱼ lncosh(θⱼ)` with hidden activations
//! `θ = Wᵀv + b`. The lookup caches `θ`, so a k-site move costs
//! O(k · nhidden) instead of a full re-evaluation.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::machine::traits::{lncosh_complex, random_gaussian, Machine, ThetaLookup};

#[derive(Debug, Clone)]
pub struct RbmSpin {
    nv: usize,
    nh: usize,
    use_a: bool,
    use_b: bool,
    /// Visible bias.
    a: DVector<Complex64>,
    /// Hidden bias.
    b: DVector<Complex64>,
    /// Weights, visible × hidden.
    w: DMatrix<Complex64>,
}

#[derive(Serialize, Deserialize)]
struct RbmSpinDoc {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Nvisible")]
    nvisible: usize,
    #[serde(rename = "Nhidden")]
    nhidden: usize,
    #[serde(rename = "UseVisibleBias")]
    use_a: bool,
    #[serde(rename = "UseHiddenBias")]
    use_b: bool,
    a: DVector<Complex64>,
    b: DVector<Complex64>,
    #[serde(rename = "W")]
    w: DMatrix<Complex64>,
}

impl RbmSpin {
    pub fn new(nvisible: usize, nhidden: usize, use_a: bool, use_b: bool) -> Self {
        Self {
            nv: nvisible,
            nh: nhidden,
            use_a,
            use_b,
            a: DVector::zeros(nvisible),
            b: DVector::zeros(nhidden),
            w: DMatrix::zeros(nvisible, nhidden),
        }
    }

    /// Hidden-unit count as a density multiple of the visible layer.
    pub fn with_alpha(nvisible: usize, alpha: usize, use_a: bool, use_b: bool) -> Self {
        Self::new(nvisible, alpha * nvisible, use_a, use_b)
    }

    pub fn nhidden(&self) -> usize {
        self.nh
    }

    fn compute_theta(&self, v: &DVector<f64>) -> DVector<Complex64> {
        let mut theta = self.b.clone();
        for i in 0..self.nv {
            let vi = v[i];
            if vi != 0.0 {
                for j in 0..self.nh {
                    theta[j] += self.w[(i, j)] * vi;
                }
            }
        }
        theta
    }

    fn visible_term(&self, v: &DVector<f64>) -> Complex64 {
        let mut acc = Complex64::new(0.0, 0.0);
        for i in 0..self.nv {
            acc += self.a[i] * v[i];
        }
        acc
    }

    fn lncosh_sum(theta: &DVector<Complex64>) -> Complex64 {
        theta.iter().map(|&t| lncosh_complex(t)).sum()
    }

    pub(crate) fn assign_parameters(&mut self, pars: &DVector<Complex64>) {
        let mut k = 0;
        if self.use_a {
            for i in 0..self.nv {
                self.a[i] = pars[k];
                k += 1;
            }
        }
        if self.use_b {
            for j in 0..self.nh {
                self.b[j] = pars[k];
                k += 1;
            }
        }
        for i in 0..self.nv {
            for j in 0..self.nh {
                self.w[(i, j)] = pars[k];
                k += 1;
            }
        }
    }
}

impl Machine for RbmSpin {
    type Lookup = ThetaLookup;

    fn nvisible(&self) -> usize {
        self.nv
    }

    fn npar(&self) -> usize {
        let mut npar = self.nv * self.nh;
        if self.use_a {
            npar += self.nv;
        }
        if self.use_b {
            npar += self.nh;
        }
        npar
    }

    fn parameters(&self) -> DVector<Complex64> {
        let mut pars = DVector::zeros(self.npar());
        let mut k = 0;
        if self.use_a {
            for i in 0..self.nv {
                pars[k] = self.a[i];
                k += 1;
            }
        }
        if self.use_b {
            for j in 0..self.nh {
                pars[k] = self.b[j];
                k += 1;
            }
        }
        for i in 0..self.nv {
            for j in 0..self.nh {
                pars[k] = self.w[(i, j)];
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
        lt.theta = self.compute_theta(v);
    }

    fn update_lookup(
        &self,
        v: &DVector<f64>,
        tochange: &[usize],
        newconf: &[f64],
        lt: &mut ThetaLookup,
    ) {
        for (&sf, &new) in tochange.iter().zip(newconf) {
            let dv = new - v[sf];
            for j in 0..self.nh {
                lt.theta[j] += self.w[(sf, j)] * dv;
            }
        }
    }

    fn log_val(&self, v: &DVector<f64>) -> Complex64 {
        let theta = self.compute_theta(v);
        self.visible_term(v) + Self::lncosh_sum(&theta)
    }

    fn log_val_lookup(&self, v: &DVector<f64>, lt: &ThetaLookup) -> Complex64 {
        self.visible_term(v) + Self::lncosh_sum(&lt.theta)
    }

    fn log_val_diff(
        &self,
        v: &DVector<f64>,
        tochange: &[Vec<usize>],
        newconf: &[Vec<f64>],
    ) -> DVector<Complex64> {
        let nconn = tochange.len();
        let mut diffs = DVector::zeros(nconn);

        let theta = self.compute_theta(v);
        let logtsum = Self::lncosh_sum(&theta);

        for k in 0..nconn {
            if tochange[k].is_empty() {
                continue;
            }

            let mut thetanew = theta.clone();
            for (&sf, &new) in tochange[k].iter().zip(&newconf[k]) {
                let dv = new - v[sf];
                diffs[k] += self.a[sf] * dv;
                for j in 0..self.nh {
                    thetanew[j] += self.w[(sf, j)] * dv;
                }
            }
            diffs[k] += Self::lncosh_sum(&thetanew) - logtsum;
        }
        diffs
    }

    fn log_val_diff_lookup(
        &self,
        v: &DVector<f64>,
        tochange: &[usize],
        newconf: &[f64],
        lt: &ThetaLookup,
    ) -> Complex64 {
        if tochange.is_empty() {
            return Complex64::new(0.0, 0.0);
        }

        let mut logvaldiff = Complex64::new(0.0, 0.0);
        let mut thetanew = lt.theta.clone();
        for (&sf, &new) in tochange.iter().zip(newconf) {
            let dv = new - v[sf];
            logvaldiff += self.a[sf] * dv;
            for j in 0..self.nh {
                thetanew[j] += self.w[(sf, j)] * dv;
            }
        }
        logvaldiff + Self::lncosh_sum(&thetanew) - Self::lncosh_sum(&lt.theta)
    }

    fn der_log(&self, v: &DVector<f64>) -> DVector<Complex64> {
        let mut der = DVector::zeros(self.npar());
        let theta = self.compute_theta(v);
        let tanh_theta: Vec<Complex64> = theta.iter().map(|t| t.tanh()).collect();

        let mut k = 0;
        if self.use_a {
            for i in 0..self.nv {
                der[k] = Complex64::new(v[i], 0.0);
                k += 1;
            }
        }
        if self.use_b {
            for j in 0..self.nh {
                der[k] = tanh_theta[j];
                k += 1;
            }
        }
        for i in 0..self.nv {
            for j in 0..self.nh {
                der[k] = tanh_theta[j] * v[i];
                k += 1;
            }
        }
        der
    }

    fn to_document(&self) -> Result<serde_json::Value> {
        let doc = RbmSpinDoc {
            name: "RbmSpin".into(),
            nvisible: self.nv,
            nhidden: self.nh,
            use_a: self.use_a,
            use_b: self.use_b,
            a: self.a.clone(),
            b: self.b.clone(),
            w: self.w.clone(),
        };
        let value = serde_json::to_value(doc)?;
        Ok(serde_json::json!({ "Machine": value }))
    }

    fn load_document(&mut self, doc: &serde_json::Value) -> Result<()> {
        let section = doc
            .get("Machine")
            .ok_or_else(|| VmcError::Config("missing Machine section in parameter file".into()))?;
        let loaded: RbmSpinDoc = serde_json::from_value(section.clone())?;

        if loaded.name != "RbmSpin" {
            return Err(VmcError::Config(format!(
                "parameter file holds a {} machine, expected RbmSpin",
                loaded.name
            )));
        }
        if loaded.nvisible != self.nv || loaded.nhidden != self.nh {
            return Err(VmcError::Config(format!(
                "parameter file shape {}x{} is incompatible with machine shape {}x{}",
                loaded.nvisible, loaded.nhidden, self.nv, self.nh
            )));
        }
        if loaded.a.len() != self.nv
            || loaded.b.len() != self.nh
            || loaded.w.nrows() != self.nv
            || loaded.w.ncols() != self.nh
        {
            return Err(VmcError::Config(
                "parameter file arrays do not match the declared shape".into(),
            ));
        }

        let finite = loaded.a.iter().chain(loaded.b.iter()).chain(loaded.w.iter())
            .all(|z| z.re.is_finite() && z.im.is_finite());
        if !finite {
            return Err(VmcError::Numeric(
                "parameter file contains non-finite values".into(),
            ));
        }

        self.use_a = loaded.use_a;
        self.use_b = loaded.use_b;
        self.a = loaded.a;
        self.b = loaded.b;
        self.w = loaded.w;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_spins(n: usize, rng: &mut ChaCha8Rng) -> DVector<f64> {
        DVector::from_fn(n, |_, _| if rng.gen::<bool>() { 1.0 } else { -1.0 })
    }

    #[test]
    fn test_parameter_count() {
        assert_eq!(RbmSpin::new(4, 8, true, true).npar(), 4 + 8 + 32);
        assert_eq!(RbmSpin::new(4, 8, false, true).npar(), 8 + 32);
        assert_eq!(RbmSpin::new(4, 8, false, false).npar(), 32);
    }

    #[test]
    fn test_parameters_roundtrip() {
        let mut rbm = RbmSpin::with_alpha(4, 2, true, true);
        rbm.init_random_parameters(5, 0.2);
        let pars = rbm.parameters();

        let mut other = RbmSpin::with_alpha(4, 2, true, true);
        other.set_parameters(&pars).unwrap();
        assert_eq!(other.parameters(), pars);
    }

    #[test]
    fn test_set_parameters_rejects_wrong_length() {
        let mut rbm = RbmSpin::new(4, 8, true, true);
        let pars = DVector::zeros(3);
        assert!(rbm.set_parameters(&pars).is_err());
    }

    #[test]
    fn test_log_val_matches_formula() {
        let mut rbm = RbmSpin::new(2, 2, true, true);
        let pars = DVector::from_vec(vec![
            Complex64::new(0.1, 0.0),
            Complex64::new(-0.2, 0.1),
            Complex64::new(0.3, 0.0),
            Complex64::new(0.0, -0.1),
            Complex64::new(0.5, 0.2),
            Complex64::new(-0.1, 0.0),
            Complex64::new(0.2, 0.1),
            Complex64::new(0.4, -0.3),
        ]);
        rbm.set_parameters(&pars).unwrap();

        let v = DVector::from_vec(vec![1.0, -1.0]);
        // a·v + Σⱼ ln cosh(Σᵢ Wᵢⱼ vᵢ + bⱼ), with packing a | b | W row-major.
        let a = [pars[0], pars[1]];
        let b = [pars[2], pars[3]];
        let w = [[pars[4], pars[5]], [pars[6], pars[7]]];
        let mut expected = a[0] * v[0] + a[1] * v[1];
        for j in 0..2 {
            let theta = b[j] + w[0][j] * v[0] + w[1][j] * v[1];
            expected += theta.cosh().ln();
        }

        let got = rbm.log_val(&v);
        assert_relative_eq!(got.re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(got.im, expected.im, epsilon = 1e-12);
    }

    #[test]
    fn test_lookup_stays_coherent_under_updates() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut rbm = RbmSpin::with_alpha(6, 3, true, true);
        rbm.init_random_parameters(3, 0.15);

        let mut v = random_spins(6, &mut rng);
        let mut lt = ThetaLookup::default();
        rbm.init_lookup(&v, &mut lt);

        for _ in 0..100 {
            let site = rng.gen_range(0..6);
            let new = -v[site];
            rbm.update_lookup(&v, &[site], &[new], &mut lt);
            v[site] = new;

            let drift = ((rbm.log_val(&v) - rbm.log_val_lookup(&v, &lt)).exp()
                - Complex64::new(1.0, 0.0))
            .norm();
            assert!(drift < 1e-8, "lookup drifted by {drift}");
        }
    }

    #[test]
    fn test_log_val_diff_matches_brute_force() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut rbm = RbmSpin::with_alpha(5, 2, true, true);
        rbm.init_random_parameters(17, 0.2);

        let v = random_spins(5, &mut rng);
        let tochange = vec![vec![], vec![0], vec![1, 3], vec![0, 2, 4]];
        let newconf: Vec<Vec<f64>> = tochange
            .iter()
            .map(|sites| sites.iter().map(|&s| -v[s]).collect())
            .collect();

        let diffs = rbm.log_val_diff(&v, &tochange, &newconf);
        let base = rbm.log_val(&v);
        for k in 0..tochange.len() {
            let mut vp = v.clone();
            for (&s, &new) in tochange[k].iter().zip(&newconf[k]) {
                vp[s] = new;
            }
            let expected = rbm.log_val(&vp) - base;
            assert!(
                ((diffs[k] - expected).exp() - Complex64::new(1.0, 0.0)).norm() < 1e-8,
                "batched log-ratio disagrees for move {k}"
            );
        }
    }

    #[test]
    fn test_log_val_diff_lookup_matches_batch() {
        let mut rng = ChaCha8Rng::seed_from_u64(30);
        let mut rbm = RbmSpin::with_alpha(6, 2, true, true);
        rbm.init_random_parameters(4, 0.25);

        let v = random_spins(6, &mut rng);
        let mut lt = ThetaLookup::default();
        rbm.init_lookup(&v, &mut lt);

        let sites = vec![2usize, 5];
        let new = vec![-v[2], -v[5]];
        let single = rbm.log_val_diff_lookup(&v, &sites, &new, &lt);
        let batch = rbm.log_val_diff(&v, &[sites], &[new]);
        assert_relative_eq!(single.re, batch[0].re, epsilon = 1e-12);
        assert_relative_eq!(single.im, batch[0].im, epsilon = 1e-12);
    }

    #[test]
    fn test_der_log_finite_difference() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let mut rbm = RbmSpin::with_alpha(4, 2, true, true);
        rbm.init_random_parameters(7, 0.2);

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
                (numder - ders[k]).norm() < eps * eps * 10.0,
                "derivative mismatch on parameter {k}: expected {}, found {}",
                ders[k],
                numder
            );
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let mut rbm = RbmSpin::with_alpha(4, 3, true, true);
        rbm.init_random_parameters(19, 0.3);
        let doc = rbm.to_document().unwrap();

        let mut restored = RbmSpin::with_alpha(4, 3, true, true);
        restored.load_document(&doc).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..5 {
            let v = random_spins(4, &mut rng);
            assert!((rbm.log_val(&v) - restored.log_val(&v)).norm() < 1e-12);
        }
    }

    #[test]
    fn test_load_document_rejects_wrong_shape() {
        let mut rbm = RbmSpin::with_alpha(4, 2, true, true);
        rbm.init_random_parameters(1, 0.1);
        let doc = rbm.to_document().unwrap();

        let mut other = RbmSpin::with_alpha(6, 2, true, true);
        assert!(other.load_document(&doc).is_err());
    }
}
