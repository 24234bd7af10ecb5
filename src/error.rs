//! Error kinds shared across the crate.
//!
//! Configuration, domain, protocol and I/O errors are fatal: the driver
//! aborts all workers after a rank-0 diagnostic. Numerical errors are
//! surfaced in the iteration log instead; the optimization is stochastic
//! and the next iteration re-randomizes the noise.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmcError {
    /// Missing or malformed configuration fields.
    #[error("configuration error: {0}")]
    Config(String),

    /// Request outside the mathematical domain of a component, e.g. an
    /// infeasible magnetization constraint or a non-discrete Hilbert
    /// space handed to a discrete sampler.
    #[error("domain error: {0}")]
    Domain(String),

    /// Rank deficiency, solver non-convergence, or non-finite values.
    #[error("numerical error: {0}")]
    Numeric(String),

    /// Mismatched collective participation between workers.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for VmcError {
    fn from(err: serde_json::Error) -> Self {
        VmcError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for VmcError {
    fn from(err: serde_yaml::Error) -> Self {
        VmcError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VmcError>;
