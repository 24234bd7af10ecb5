//! Parameterized wavefunction ansätze.

pub mod rbm_spin;
pub mod rbm_spin_symm;
pub mod traits;

pub use rbm_spin::RbmSpin;
pub use rbm_spin_symm::RbmSpinSymm;
pub use traits::{lncosh, lncosh_complex, random_gaussian, Machine, ThetaLookup};
