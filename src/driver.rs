//! Program wiring: build every component from the configuration document
//! and run the optimization, single-process or across SPMD worker
//! threads.

use std::path::Path;

use tracing::{error, info};

use crate::config::{
    GraphConfig, HamiltonianConfig, HilbertConfig, Input, MachineName, MethodName,
    ObservableConfig, OptimizerConfig, SamplerName,
};
use crate::distributed::{Communicator, LocalCommunicator, ThreadCommunicator};
use crate::error::{Result, VmcError};
use crate::graph::{CustomGraph, Graph, Hypercube};
use crate::hilbert::{BosonHilbert, CustomHilbert, Hilbert, QubitHilbert, SpinHilbert};
use crate::learning::{LearningOptions, Method, VmcRunner};
use crate::machine::{Machine, RbmSpin, RbmSpinSymm};
use crate::operator::{Heisenberg, Ising, LatticeOperator, SigmaX, SigmaZ};
use crate::optimizer::{AdaDelta, AdaMax, Momentum, RmsProp, Sgd, Stepper};
use crate::sampler::{MetropolisExchange, MetropolisLocal, Sampler};
use crate::stats::IterationRecord;

/// Run the configured optimization on `workers` SPMD workers.
///
/// With a single worker errors propagate to the caller; with several, any
/// worker hitting a fatal error aborts the whole process after a
/// diagnostic, so no peer is left waiting at a collective.
pub fn run(input: &Input, workers: usize) -> Result<()> {
    if workers <= 1 {
        run_worker(input, Box::new(LocalCommunicator::new()))?;
        return Ok(());
    }

    let comms = ThreadCommunicator::spawn_world(workers);
    std::thread::scope(|scope| {
        for comm in comms {
            scope.spawn(move || {
                let rank = comm.rank();
                if let Err(err) = run_worker(input, Box::new(comm)) {
                    if rank == 0 {
                        error!("worker aborted: {err}");
                    }
                    std::process::exit(1);
                }
            });
        }
    });
    Ok(())
}

/// Build all components for one worker and run the optimization loop.
pub fn run_worker(
    input: &Input,
    comm: Box<dyn Communicator>,
) -> Result<Vec<IterationRecord>> {
    let graph = build_graph(&input.graph)?;
    let hilbert = build_hilbert(&input.hilbert)?;
    if hilbert.size() != graph.nsites() {
        return Err(VmcError::Config(format!(
            "Hilbert space has {} sites but the graph has {}",
            hilbert.size(),
            graph.nsites()
        )));
    }

    let hamiltonian = build_hamiltonian(&input.hamiltonian, &graph);
    let observables = build_observables(&input.observables, &graph);
    let stepper = build_stepper(&input.optimizer);

    if comm.rank() == 0 {
        info!(
            sites = graph.nsites(),
            local_states = hilbert.local_size(),
            workers = comm.size(),
            "components constructed"
        );
    }

    match input.machine.name {
        MachineName::RbmSpin => {
            let mut machine = RbmSpin::with_alpha(
                hilbert.size(),
                input.machine.alpha,
                input.machine.use_visible_bias,
                input.machine.use_hidden_bias,
            );
            init_machine(&mut machine, input)?;
            dispatch_sampler(input, graph, hilbert, hamiltonian, observables, stepper, comm, machine)
        }
        MachineName::RbmSpinSymm => {
            let mut machine = RbmSpinSymm::new(
                &graph,
                input.machine.alpha,
                input.machine.use_visible_bias,
                input.machine.use_hidden_bias,
            )?;
            init_machine(&mut machine, input)?;
            dispatch_sampler(input, graph, hilbert, hamiltonian, observables, stepper, comm, machine)
        }
    }
}

fn build_graph(cfg: &GraphConfig) -> Result<Graph> {
    match cfg {
        GraphConfig::Hypercube { l, dimension, pbc } => {
            Ok(Graph::Hypercube(Hypercube::new(*l, *dimension, *pbc)?))
        }
        GraphConfig::Custom { adjacency_list } => {
            Ok(Graph::Custom(CustomGraph::new(adjacency_list.clone())?))
        }
    }
}

fn build_hilbert(cfg: &HilbertConfig) -> Result<Hilbert> {
    match cfg {
        HilbertConfig::Spin { nspins, s, total_sz } => {
            Ok(Hilbert::Spin(SpinHilbert::new(*nspins, *s, *total_sz)?))
        }
        HilbertConfig::Boson { size, nmax } => {
            Ok(Hilbert::Boson(BosonHilbert::new(*size, *nmax)?))
        }
        HilbertConfig::Qubit { size } => Ok(Hilbert::Qubit(QubitHilbert::new(*size)?)),
        HilbertConfig::Custom { size, local_states } => {
            Ok(Hilbert::Custom(CustomHilbert::new(*size, local_states.clone())?))
        }
    }
}

fn build_hamiltonian(cfg: &HamiltonianConfig, graph: &Graph) -> LatticeOperator {
    match cfg {
        HamiltonianConfig::Ising { h, j } => LatticeOperator::Ising(Ising::new(graph, *h, *j)),
        HamiltonianConfig::Heisenberg { j } => {
            LatticeOperator::Heisenberg(Heisenberg::new(graph, *j))
        }
    }
}

fn build_observables(
    cfgs: &[ObservableConfig],
    graph: &Graph,
) -> Vec<(String, LatticeOperator)> {
    cfgs.iter()
        .map(|cfg| {
            let op = match cfg {
                ObservableConfig::SigmaX => LatticeOperator::SigmaX(SigmaX::new(graph)),
                ObservableConfig::SigmaZ => LatticeOperator::SigmaZ(SigmaZ),
            };
            (cfg.name().to_string(), op)
        })
        .collect()
}

fn build_stepper(cfg: &OptimizerConfig) -> Box<dyn Stepper> {
    match *cfg {
        OptimizerConfig::Sgd { learning_rate, l2_reg, decay_factor } => {
            Box::new(Sgd::new(learning_rate, l2_reg, decay_factor))
        }
        OptimizerConfig::Momentum { learning_rate, beta } => {
            Box::new(Momentum::new(learning_rate, beta))
        }
        OptimizerConfig::AdaMax { alpha, beta1, beta2, epscut } => {
            Box::new(AdaMax::new(alpha, beta1, beta2, epscut))
        }
        OptimizerConfig::AdaDelta { rho, epscut } => Box::new(AdaDelta::new(rho, epscut)),
        OptimizerConfig::RmsProp { learning_rate, beta, epscut } => {
            Box::new(RmsProp::new(learning_rate, beta, epscut))
        }
    }
}

fn init_machine<M: Machine>(machine: &mut M, input: &Input) -> Result<()> {
    if let Some(file) = &input.machine.init_file {
        machine.load(Path::new(file))
    } else {
        let init = input.machine.init_random.clone().unwrap_or_default();
        machine.init_random_parameters(init.seed, init.sigma);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_sampler<M: Machine>(
    input: &Input,
    graph: Graph,
    hilbert: Hilbert,
    hamiltonian: LatticeOperator,
    observables: Vec<(String, LatticeOperator)>,
    stepper: Box<dyn Stepper>,
    comm: Box<dyn Communicator>,
    machine: M,
) -> Result<Vec<IterationRecord>> {
    match input.sampler.name {
        SamplerName::MetropolisLocal => {
            let sampler = MetropolisLocal::new(machine, hilbert)?;
            run_learning(input, sampler, hamiltonian, observables, stepper, comm)
        }
        SamplerName::MetropolisExchange => {
            let sampler = MetropolisExchange::new(machine, hilbert, &graph)?;
            run_learning(input, sampler, hamiltonian, observables, stepper, comm)
        }
    }
}

fn run_learning<M: Machine, S: Sampler<M>>(
    input: &Input,
    sampler: S,
    hamiltonian: LatticeOperator,
    observables: Vec<(String, LatticeOperator)>,
    stepper: Box<dyn Stepper>,
    comm: Box<dyn Communicator>,
) -> Result<Vec<IterationRecord>> {
    let learning = &input.learning;
    let mut opts = LearningOptions::new(
        match learning.method {
            MethodName::Sr => Method::Sr,
            MethodName::Gd => Method::Gd,
        },
        learning.nsamples,
        learning.niter_opt,
    );
    opts.output_base = Some(learning.output_file.clone());
    opts.save_every = learning.save_every;
    opts.diag_shift = learning.diag_shift;
    opts.rescale_shift = learning.rescale_shift;
    opts.use_iterative = learning.use_iterative;
    opts.base_seed = input.sampler.seed;

    VmcRunner::new(sampler, hamiltonian, observables, stepper, comm, opts).run()
}
