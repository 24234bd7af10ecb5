//! Configuration document model.
//!
//! A single structured input selects every component by name. Documents
//! are read as JSON, or as YAML when the file extension says so.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, VmcError};

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_sigma() -> f64 {
    0.1
}

fn default_init_seed() -> u64 {
    2362
}

fn default_save_every() -> usize {
    100
}

fn default_diag_shift() -> f64 {
    0.01
}

fn default_beta() -> f64 {
    0.9
}

fn default_alpha_adamax() -> f64 {
    0.001
}

fn default_beta2() -> f64 {
    0.999
}

fn default_rho() -> f64 {
    0.95
}

fn default_epscut() -> f64 {
    1.0e-7
}

fn default_rms_rate() -> f64 {
    0.001
}

#[derive(Debug, Clone, Deserialize)]
pub struct Input {
    #[serde(rename = "Graph")]
    pub graph: GraphConfig,
    #[serde(rename = "Hilbert")]
    pub hilbert: HilbertConfig,
    #[serde(rename = "Hamiltonian")]
    pub hamiltonian: HamiltonianConfig,
    #[serde(rename = "Machine")]
    pub machine: MachineConfig,
    #[serde(rename = "Sampler")]
    pub sampler: SamplerConfig,
    #[serde(rename = "Observables", default)]
    pub observables: Vec<ObservableConfig>,
    #[serde(rename = "Learning")]
    pub learning: LearningConfig,
    #[serde(rename = "Optimizer")]
    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Name")]
pub enum GraphConfig {
    Hypercube {
        #[serde(rename = "L")]
        l: usize,
        #[serde(rename = "Dimension")]
        dimension: usize,
        #[serde(rename = "Pbc", default = "default_true")]
        pbc: bool,
    },
    Custom {
        #[serde(rename = "AdjacencyList")]
        adjacency_list: Vec<Vec<usize>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Name")]
pub enum HilbertConfig {
    Spin {
        #[serde(rename = "Nspins")]
        nspins: usize,
        #[serde(rename = "S")]
        s: f64,
        #[serde(rename = "TotalSz")]
        total_sz: Option<f64>,
    },
    Boson {
        #[serde(rename = "Size")]
        size: usize,
        #[serde(rename = "Nmax")]
        nmax: usize,
    },
    Qubit {
        #[serde(rename = "Size")]
        size: usize,
    },
    Custom {
        #[serde(rename = "Size")]
        size: usize,
        #[serde(rename = "LocalStates")]
        local_states: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Name")]
pub enum HamiltonianConfig {
    Ising {
        #[serde(rename = "h")]
        h: f64,
        #[serde(rename = "J", default = "default_one")]
        j: f64,
    },
    Heisenberg {
        #[serde(rename = "J", default = "default_one")]
        j: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MachineName {
    RbmSpin,
    RbmSpinSymm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitRandomConfig {
    #[serde(rename = "Sigma", default = "default_sigma")]
    pub sigma: f64,
    #[serde(rename = "Seed", default = "default_init_seed")]
    pub seed: u64,
}

impl Default for InitRandomConfig {
    fn default() -> Self {
        Self { sigma: default_sigma(), seed: default_init_seed() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    #[serde(rename = "Name")]
    pub name: MachineName,
    #[serde(rename = "Alpha")]
    pub alpha: usize,
    #[serde(rename = "UseVisibleBias", default = "default_true")]
    pub use_visible_bias: bool,
    #[serde(rename = "UseHiddenBias", default = "default_true")]
    pub use_hidden_bias: bool,
    #[serde(rename = "InitRandom")]
    pub init_random: Option<InitRandomConfig>,
    /// Saved parameters from a previous run (`.wf` document).
    #[serde(rename = "InitFile")]
    pub init_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SamplerName {
    MetropolisLocal,
    MetropolisExchange,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    #[serde(rename = "Name")]
    pub name: SamplerName,
    /// Deterministic chain seeding; entropy-seeded when absent.
    #[serde(rename = "Seed")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "Name")]
pub enum ObservableConfig {
    SigmaX,
    SigmaZ,
}

impl ObservableConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ObservableConfig::SigmaX => "SigmaX",
            ObservableConfig::SigmaZ => "SigmaZ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MethodName {
    Sr,
    Gd,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    #[serde(rename = "Method")]
    pub method: MethodName,
    #[serde(rename = "Nsamples")]
    pub nsamples: usize,
    #[serde(rename = "NiterOpt")]
    pub niter_opt: usize,
    #[serde(rename = "OutputFile")]
    pub output_file: String,
    #[serde(rename = "SaveEvery", default = "default_save_every")]
    pub save_every: usize,
    #[serde(rename = "DiagShift", default = "default_diag_shift")]
    pub diag_shift: f64,
    #[serde(rename = "RescaleShift", default)]
    pub rescale_shift: bool,
    #[serde(rename = "UseIterative", default)]
    pub use_iterative: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Name")]
pub enum OptimizerConfig {
    Sgd {
        #[serde(rename = "LearningRate")]
        learning_rate: f64,
        #[serde(rename = "L2Reg", default)]
        l2_reg: f64,
        #[serde(rename = "DecayFactor", default = "default_one")]
        decay_factor: f64,
    },
    Momentum {
        #[serde(rename = "LearningRate")]
        learning_rate: f64,
        #[serde(rename = "Beta", default = "default_beta")]
        beta: f64,
    },
    AdaMax {
        #[serde(rename = "Alpha", default = "default_alpha_adamax")]
        alpha: f64,
        #[serde(rename = "Beta1", default = "default_beta")]
        beta1: f64,
        #[serde(rename = "Beta2", default = "default_beta2")]
        beta2: f64,
        #[serde(rename = "Epscut", default = "default_epscut")]
        epscut: f64,
    },
    AdaDelta {
        #[serde(rename = "Rho", default = "default_rho")]
        rho: f64,
        #[serde(rename = "Epscut", default = "default_epscut")]
        epscut: f64,
    },
    #[serde(rename = "RMSProp")]
    RmsProp {
        #[serde(rename = "LearningRate", default = "default_rms_rate")]
        learning_rate: f64,
        #[serde(rename = "Beta", default = "default_beta")]
        beta: f64,
        #[serde(rename = "Epscut", default = "default_epscut")]
        epscut: f64,
    },
}

/// Read a configuration document; YAML by extension, JSON otherwise.
pub fn load_input(path: &Path) -> Result<Input> {
    let reader = BufReader::new(File::open(path).map_err(|err| {
        VmcError::Config(format!("cannot open input file {}: {err}", path.display()))
    })?);

    let yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    );
    if yaml {
        Ok(serde_yaml::from_reader(reader)?)
    } else {
        Ok(serde_json::from_reader(reader)?)
    }
}
