//! lattice-vmc — Variational Monte Carlo for quantum lattice models.
//!
//! Estimates ground states of lattice Hamiltonians by Markov-chain
//! sampling of a parameterized wavefunction (Restricted Boltzmann
//! Machines, optionally permutation-symmetrized) and optimizing its
//! parameters by gradient descent or Stochastic Reconfiguration.

pub mod config;
pub mod distributed;
pub mod driver;
pub mod error;
pub mod graph;
pub mod hilbert;
pub mod learning;
pub mod machine;
pub mod operator;
pub mod optimizer;
pub mod sampler;
pub mod stats;

// Re-export commonly used types at crate root
pub use config::{load_input, Input};
pub use distributed::{Communicator, LocalCommunicator, ThreadCommunicator};
pub use error::{Result, VmcError};
pub use graph::{CustomGraph, Graph, Hypercube};
pub use hilbert::{BosonHilbert, CustomHilbert, Hilbert, QubitHilbert, SpinHilbert};
pub use learning::{LearningOptions, Method, VmcRunner};
pub use machine::{Machine, RbmSpin, RbmSpinSymm, ThetaLookup};
pub use operator::{Connections, Heisenberg, Ising, LatticeOperator, Operator, SigmaX, SigmaZ};
pub use optimizer::{AdaDelta, AdaMax, Momentum, RmsProp, Sgd, Stepper};
pub use sampler::{MetropolisExchange, MetropolisLocal, Sampler};
pub use stats::IterationRecord;
