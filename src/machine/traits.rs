//! Wavefunction (machine) traits for lattice VMC.
//!
//! A machine evaluates the log-amplitude `log Ψ(v)` of a configuration,
//! its change under local moves, and its derivatives with respect to the
//! variational parameters. Per-chain lookup caches make the single-move
//! log-ratio an O(#flips · nhidden) operation.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use nalgebra::DVector;
use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::Result;

/// Parameterized wavefunction over discrete configurations.
///
/// Parameters are complex; optimizers treat real and imaginary parts as
/// independent real coordinates.
pub trait Machine {
    /// Opaque per-chain cache. Owned by the sampler, mutated only by the
    /// machine.
    type Lookup: Default + Clone;

    fn nvisible(&self) -> usize;
    fn npar(&self) -> usize;

    fn parameters(&self) -> DVector<Complex64>;
    /// Fails with a protocol error when the vector length does not match
    /// `npar()`.
    fn set_parameters(&mut self, pars: &DVector<Complex64>) -> Result<()>;
    /// Gaussian initialization (mean 0, standard deviation `sigma`) of
    /// both real and imaginary parts.
    fn init_random_parameters(&mut self, seed: u64, sigma: f64);

    fn init_lookup(&self, v: &DVector<f64>, lt: &mut Self::Lookup);
    fn update_lookup(
        &self,
        v: &DVector<f64>,
        tochange: &[usize],
        newconf: &[f64],
        lt: &mut Self::Lookup,
    );

    fn log_val(&self, v: &DVector<f64>) -> Complex64;
    fn log_val_lookup(&self, v: &DVector<f64>, lt: &Self::Lookup) -> Complex64;

    /// `log Ψ(v'_k) − log Ψ(v)` for a batch of proposed moves.
    fn log_val_diff(
        &self,
        v: &DVector<f64>,
        tochange: &[Vec<usize>],
        newconf: &[Vec<f64>],
    ) -> DVector<Complex64>;

    /// Single-move log-ratio using the cached lookup state.
    fn log_val_diff_lookup(
        &self,
        v: &DVector<f64>,
        tochange: &[usize],
        newconf: &[f64],
        lt: &Self::Lookup,
    ) -> Complex64;

    /// Log-derivatives `∂ log Ψ(v) / ∂θ_k`.
    fn der_log(&self, v: &DVector<f64>) -> DVector<Complex64>;

    fn to_document(&self) -> Result<serde_json::Value>;
    fn load_document(&mut self, doc: &serde_json::Value) -> Result<()>;

    fn save(&self, path: &Path) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &self.to_document()?)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let doc: serde_json::Value = serde_json::from_reader(File::open(path)?)?;
        self.load_document(&doc)
    }
}

/// Lookup cache holding the hidden-layer activations `θ = Wᵀv + b`.
#[derive(Debug, Clone)]
pub struct ThetaLookup {
    pub theta: DVector<Complex64>,
}

impl Default for ThetaLookup {
    fn default() -> Self {
        Self { theta: DVector::zeros(0) }
    }
}

/// Numerically stable `ln cosh` for real arguments.
pub fn lncosh(x: f64) -> f64 {
    let xa = x.abs();
    xa + ((1.0 + (-2.0 * xa).exp()) / 2.0).ln()
}

/// `ln cosh` for complex arguments:
/// `ln cosh(x + iy) = ln cosh(x) + ln(cos y + i tanh(x) sin y)`.
pub fn lncosh_complex(z: Complex64) -> Complex64 {
    let re = lncosh(z.re);
    let angular = Complex64::new(z.im.cos(), z.re.tanh() * z.im.sin());
    Complex64::new(re, 0.0) + angular.ln()
}

/// Fill a parameter vector with complex Gaussian entries.
pub fn random_gaussian(par: &mut DVector<Complex64>, seed: u64, sigma: f64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).unwrap();
    for x in par.iter_mut() {
        *x = Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lncosh_matches_naive_form() {
        for &x in &[0.0, 0.3, -0.7, 2.5, -4.0] {
            assert_relative_eq!(lncosh(x), x.cosh().ln(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_lncosh_stable_for_large_arguments() {
        // cosh overflows around x ≈ 710; the stable form must not.
        let x = 1000.0;
        assert_relative_eq!(lncosh(x), x - std::f64::consts::LN_2, epsilon = 1e-9);
        assert_relative_eq!(lncosh(-x), x - std::f64::consts::LN_2, epsilon = 1e-9);
    }

    #[test]
    fn test_lncosh_complex_matches_direct() {
        let z = Complex64::new(0.8, -0.4);
        let direct = z.cosh().ln();
        let stable = lncosh_complex(z);
        assert_relative_eq!(stable.re, direct.re, epsilon = 1e-12);
        assert_relative_eq!(stable.im, direct.im, epsilon = 1e-12);
    }

    #[test]
    fn test_random_gaussian_is_deterministic() {
        let mut a = DVector::zeros(16);
        let mut b = DVector::zeros(16);
        random_gaussian(&mut a, 9, 0.1);
        random_gaussian(&mut b, 9, 0.1);
        assert_eq!(a, b);
        assert!(a.iter().any(|z| z.norm() > 0.0));
    }
}
