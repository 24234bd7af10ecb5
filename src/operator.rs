//! Hamiltonians and observables as sparse rows of connected configurations.
//!
//! An operator maps a configuration `v` to the finite list of
//! configurations `v'` with nonzero matrix element `⟨v'|H|v⟩`, each
//! described by the sites that change and their new local values. The
//! first entry is the diagonal (no sites change). The local estimator is
//! then `Σ_c mel_c · Ψ(v'_c)/Ψ(v)`.

use nalgebra::DVector;
use num_complex::Complex64;

use crate::error::{Result, VmcError};
use crate::graph::Graph;

/// Sparse row of an operator at a fixed configuration: parallel lists of
/// matrix elements, changed sites, and new local values.
#[derive(Debug, Clone, Default)]
pub struct Connections {
    pub mels: Vec<Complex64>,
    pub sites: Vec<Vec<usize>>,
    pub newconfs: Vec<Vec<f64>>,
}

impl Connections {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            mels: Vec::with_capacity(n),
            sites: Vec::with_capacity(n),
            newconfs: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, mel: Complex64, sites: Vec<usize>, newconf: Vec<f64>) {
        self.mels.push(mel);
        self.sites.push(sites);
        self.newconfs.push(newconf);
    }

    pub fn len(&self) -> usize {
        self.mels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mels.is_empty()
    }
}

/// Contract shared by Hamiltonians and observables.
pub trait Operator {
    fn find_conn(&self, v: &DVector<f64>) -> Result<Connections>;
}

/// Rejects configurations outside the σᶻ = ±1 alphabet the spin operators
/// are defined on.
fn check_spin_half(v: &DVector<f64>) -> Result<()> {
    for (i, &x) in v.iter().enumerate() {
        if x != 1.0 && x != -1.0 {
            return Err(VmcError::Domain(format!(
                "configuration entry v[{i}] = {x} is outside the spin-1/2 alphabet"
            )));
        }
    }
    Ok(())
}

/// Transverse-field Ising model `H = -h Σᵢ σᵢˣ - J Σ_⟨ij⟩ σᵢᶻ σⱼᶻ`.
#[derive(Debug, Clone)]
pub struct Ising {
    h: f64,
    j: f64,
    bonds: Vec<(usize, usize)>,
    nsites: usize,
}

impl Ising {
    pub fn new(graph: &Graph, h: f64, j: f64) -> Self {
        Self {
            h,
            j,
            bonds: graph.edges(),
            nsites: graph.nsites(),
        }
    }
}

impl Operator for Ising {
    fn find_conn(&self, v: &DVector<f64>) -> Result<Connections> {
        check_spin_half(v)?;

        let mut conn = Connections::with_capacity(self.nsites + 1);

        let mut diag = 0.0;
        for &(i, j) in &self.bonds {
            diag -= self.j * v[i] * v[j];
        }
        conn.push(Complex64::new(diag, 0.0), Vec::new(), Vec::new());

        // σˣ flips every site in turn.
        for i in 0..self.nsites {
            conn.push(Complex64::new(-self.h, 0.0), vec![i], vec![-v[i]]);
        }
        Ok(conn)
    }
}

/// Spin-1/2 Heisenberg antiferromagnet `H = J Σ_⟨ij⟩ Sᵢ·Sⱼ`.
///
/// On bipartite graphs the Marshall sign rule is applied (exchange element
/// `-J/2` instead of `+J/2`), a unitary rotation that leaves the spectrum
/// unchanged and gives the ground state positive amplitudes.
#[derive(Debug, Clone)]
pub struct Heisenberg {
    j: f64,
    sign_rule: bool,
    bonds: Vec<(usize, usize)>,
}

impl Heisenberg {
    pub fn new(graph: &Graph, j: f64) -> Self {
        Self {
            j,
            sign_rule: graph.is_bipartite(),
            bonds: graph.edges(),
        }
    }
}

impl Operator for Heisenberg {
    fn find_conn(&self, v: &DVector<f64>) -> Result<Connections> {
        check_spin_half(v)?;

        let mut conn = Connections::with_capacity(self.bonds.len() + 1);

        let mut diag = 0.0;
        for &(i, j) in &self.bonds {
            diag += 0.25 * self.j * v[i] * v[j];
        }
        conn.push(Complex64::new(diag, 0.0), Vec::new(), Vec::new());

        let exchange = if self.sign_rule { -0.5 * self.j } else { 0.5 * self.j };
        for &(i, j) in &self.bonds {
            if v[i] != v[j] {
                conn.push(Complex64::new(exchange, 0.0), vec![i, j], vec![v[j], v[i]]);
            }
        }
        Ok(conn)
    }
}

/// Total transverse magnetization `Σᵢ σᵢˣ`.
#[derive(Debug, Clone)]
pub struct SigmaX {
    nsites: usize,
}

impl SigmaX {
    pub fn new(graph: &Graph) -> Self {
        Self { nsites: graph.nsites() }
    }
}

impl Operator for SigmaX {
    fn find_conn(&self, v: &DVector<f64>) -> Result<Connections> {
        check_spin_half(v)?;

        let mut conn = Connections::with_capacity(self.nsites + 1);
        conn.push(Complex64::new(0.0, 0.0), Vec::new(), Vec::new());
        for i in 0..self.nsites {
            conn.push(Complex64::new(1.0, 0.0), vec![i], vec![-v[i]]);
        }
        Ok(conn)
    }
}

/// Total longitudinal magnetization `Σᵢ σᵢᶻ` (diagonal).
#[derive(Debug, Clone)]
pub struct SigmaZ;

impl Operator for SigmaZ {
    fn find_conn(&self, v: &DVector<f64>) -> Result<Connections> {
        check_spin_half(v)?;

        let mut conn = Connections::with_capacity(1);
        conn.push(Complex64::new(v.iter().sum(), 0.0), Vec::new(), Vec::new());
        Ok(conn)
    }
}

/// Concrete operator variants, selected once at construction.
#[derive(Debug, Clone)]
pub enum LatticeOperator {
    Ising(Ising),
    Heisenberg(Heisenberg),
    SigmaX(SigmaX),
    SigmaZ(SigmaZ),
}

impl Operator for LatticeOperator {
    fn find_conn(&self, v: &DVector<f64>) -> Result<Connections> {
        match self {
            LatticeOperator::Ising(op) => op.find_conn(v),
            LatticeOperator::Heisenberg(op) => op.find_conn(v),
            LatticeOperator::SigmaX(op) => op.find_conn(v),
            LatticeOperator::SigmaZ(op) => op.find_conn(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Hypercube;
    use approx::assert_relative_eq;

    fn ring(n: usize) -> Graph {
        Graph::Hypercube(Hypercube::new(n, 1, true).unwrap())
    }

    #[test]
    fn test_ising_connections_structure() {
        let op = Ising::new(&ring(4), 1.0, 0.5);
        let v = DVector::from_vec(vec![1.0, 1.0, -1.0, 1.0]);
        let conn = op.find_conn(&v).unwrap();

        // Diagonal plus one flip per site.
        assert_eq!(conn.len(), 5);
        assert!(conn.sites[0].is_empty());
        // Bonds (0,1), (1,2), (2,3), (0,3): Σ vᵢvⱼ = 1 - 1 - 1 + 1 = 0.
        assert_relative_eq!(conn.mels[0].re, 0.0);
        for i in 0..4 {
            assert_eq!(conn.sites[i + 1], vec![i]);
            assert_relative_eq!(conn.newconfs[i + 1][0], -v[i]);
            assert_relative_eq!(conn.mels[i + 1].re, -1.0);
        }
    }

    #[test]
    fn test_ising_diagonal_ferromagnetic() {
        let op = Ising::new(&ring(4), 0.0, 1.0);
        let v = DVector::from_vec(vec![1.0; 4]);
        let conn = op.find_conn(&v).unwrap();
        // All four bonds aligned: -J·4.
        assert_relative_eq!(conn.mels[0].re, -4.0);
    }

    #[test]
    fn test_heisenberg_neel_state() {
        let op = Heisenberg::new(&ring(4), 1.0);
        let v = DVector::from_vec(vec![1.0, -1.0, 1.0, -1.0]);
        let conn = op.find_conn(&v).unwrap();

        // Diagonal J/4·(-4) plus one exchange per anti-aligned bond.
        assert_eq!(conn.len(), 5);
        assert_relative_eq!(conn.mels[0].re, -1.0);
        for k in 1..5 {
            assert_relative_eq!(conn.mels[k].re, -0.5);
            let (i, j) = (conn.sites[k][0], conn.sites[k][1]);
            assert_eq!(conn.newconfs[k], vec![v[j], v[i]]);
        }
    }

    #[test]
    fn test_heisenberg_ferro_state_is_diagonal() {
        let op = Heisenberg::new(&ring(6), 1.0);
        let v = DVector::from_vec(vec![1.0; 6]);
        let conn = op.find_conn(&v).unwrap();
        assert_eq!(conn.len(), 1);
        assert_relative_eq!(conn.mels[0].re, 1.5);
    }

    #[test]
    fn test_heisenberg_sign_rule_follows_bipartiteness() {
        let op = Heisenberg::new(&ring(5), 1.0);
        let v = DVector::from_vec(vec![1.0, -1.0, 1.0, -1.0, 1.0]);
        let conn = op.find_conn(&v).unwrap();
        // Odd periodic ring is not bipartite: exchange element stays +J/2.
        assert_relative_eq!(conn.mels[1].re, 0.5);
    }

    #[test]
    fn test_sigma_observables() {
        let graph = ring(4);
        let v = DVector::from_vec(vec![1.0, 1.0, -1.0, 1.0]);

        let sx = SigmaX::new(&graph).find_conn(&v).unwrap();
        assert_eq!(sx.len(), 5);
        assert_relative_eq!(sx.mels[0].re, 0.0);

        let sz = SigmaZ.find_conn(&v).unwrap();
        assert_eq!(sz.len(), 1);
        assert_relative_eq!(sz.mels[0].re, 2.0);
    }

    #[test]
    fn test_rejects_values_outside_alphabet() {
        let op = Ising::new(&ring(4), 1.0, 1.0);
        let v = DVector::from_vec(vec![1.0, 0.5, -1.0, 1.0]);
        assert!(op.find_conn(&v).is_err());
    }
}
