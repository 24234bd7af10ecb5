//! Ground-state optimization driver.
//!
//! Orchestrates sample → gradient → (optional SR precondition) →
//! optimizer step → log, aggregating across workers. The gradient of the
//! energy is estimated from centered quantities,
//!
//!   g_k = 2 ⟨Ō_k* (E_loc − ⟨E_loc⟩)⟩,  Ō_k = O_k − ⟨O_k⟩,
//!
//! and Stochastic Reconfiguration preconditions it with the quantum
//! geometric tensor `S = ⟨Ō*Ōᵀ⟩ + λI`, solved either directly (pivoted
//! QR) or matrix-free (conjugate gradient, never materializing S).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rand::Rng;
use tracing::{info, warn};

use crate::distributed::Communicator;
use crate::error::Result;
use crate::machine::Machine;
use crate::operator::{Connections, LatticeOperator, Operator};
use crate::optimizer::{pack_complex, unpack_complex, Stepper};
use crate::sampler::Sampler;
use crate::stats::IterationRecord;

/// Optimization method: stochastic reconfiguration or plain gradient
/// descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Sr,
    Gd,
}

#[derive(Debug, Clone)]
pub struct LearningOptions {
    pub method: Method,
    /// Target number of samples per iteration, pooled across workers.
    pub nsamples: usize,
    pub niter_opt: usize,
    /// Base name for the `<base>.log` / `<base>.wf` output files; `None`
    /// keeps everything in memory.
    pub output_base: Option<String>,
    pub save_every: usize,
    pub diag_shift: f64,
    pub rescale_shift: bool,
    pub use_iterative: bool,
    /// Deterministic chain seeding; entropy-seeded when absent.
    pub base_seed: Option<u64>,
}

impl LearningOptions {
    pub fn new(method: Method, nsamples: usize, niter_opt: usize) -> Self {
        Self {
            method,
            nsamples,
            niter_opt,
            output_base: None,
            save_every: 100,
            diag_shift: 0.01,
            rescale_shift: false,
            use_iterative: false,
            base_seed: None,
        }
    }
}

/// Local energy `Σ_c mel_c · exp(log Ψ(v'_c) − log Ψ(v))`.
fn local_estimate<M: Machine>(
    op: &LatticeOperator,
    machine: &M,
    v: &DVector<f64>,
) -> Result<Complex64> {
    let conn: Connections = op.find_conn(v)?;
    let logvaldiffs = machine.log_val_diff(v, &conn.sites, &conn.newconfs);

    let mut eloc = Complex64::new(0.0, 0.0);
    for (mel, lvd) in conn.mels.iter().zip(logvaldiffs.iter()) {
        eloc += mel * lvd.exp();
    }
    Ok(eloc)
}

/// Conjugate gradient for a Hermitian positive definite operator given as
/// a closure. The closure may perform collective reductions; the
/// iteration is driven only by globally identical quantities, so all
/// workers stay in lockstep.
fn conjugate_gradient<F>(
    apply: &F,
    b: &DVector<Complex64>,
    tol: f64,
    max_iter: usize,
) -> Result<(DVector<Complex64>, bool)>
where
    F: Fn(&DVector<Complex64>) -> Result<DVector<Complex64>>,
{
    let mut x = DVector::zeros(b.len());
    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok((x, true));
    }

    let mut r = b.clone();
    let mut p = r.clone();
    let mut rs = r.norm_squared();

    for _ in 0..max_iter {
        if rs.sqrt() <= tol * b_norm {
            return Ok((x, true));
        }
        let ap = apply(&p)?;
        let denom = p.dotc(&ap).re;
        if denom <= 0.0 || !denom.is_finite() {
            return Ok((x, false));
        }
        let alpha = rs / denom;
        x += &p * Complex64::new(alpha, 0.0);
        r -= ap * Complex64::new(alpha, 0.0);
        let rs_new = r.norm_squared();
        p = &r + &p * Complex64::new(rs_new / rs, 0.0);
        rs = rs_new;
    }
    Ok((x, rs.sqrt() <= tol * b_norm))
}

const CG_TOLERANCE: f64 = 1.0e-3;

/// Runs the VMC optimization loop over a sampler (which owns the
/// machine), a Hamiltonian, named observables, and a stepper.
pub struct VmcRunner<M: Machine, S: Sampler<M>> {
    sampler: S,
    hamiltonian: LatticeOperator,
    observables: Vec<(String, LatticeOperator)>,
    stepper: Box<dyn Stepper>,
    comm: Box<dyn Communicator>,
    opts: LearningOptions,
    _machine: PhantomData<M>,
}

impl<M: Machine, S: Sampler<M>> VmcRunner<M, S> {
    pub fn new(
        sampler: S,
        hamiltonian: LatticeOperator,
        observables: Vec<(String, LatticeOperator)>,
        stepper: Box<dyn Stepper>,
        comm: Box<dyn Communicator>,
        opts: LearningOptions,
    ) -> Self {
        Self {
            sampler,
            hamiltonian,
            observables,
            stepper,
            comm,
            opts,
            _machine: PhantomData,
        }
    }

    /// Draw one seed per worker on rank 0, broadcast, and seed the local
    /// chain. Reproducibility additionally requires a fixed `base_seed`.
    fn seed_chains(&mut self) -> Result<()> {
        let mut seeds = vec![0u64; self.comm.size()];
        if self.comm.rank() == 0 {
            match self.opts.base_seed {
                Some(base) => {
                    for (i, seed) in seeds.iter_mut().enumerate() {
                        *seed = base.wrapping_add(i as u64);
                    }
                }
                None => {
                    let mut rng = rand::thread_rng();
                    for seed in seeds.iter_mut() {
                        *seed = rng.gen();
                    }
                }
            }
        }
        self.comm.broadcast_u64(&mut seeds, 0)?;
        self.sampler.seed(seeds[self.comm.rank()]);
        Ok(())
    }

    pub fn run(&mut self) -> Result<Vec<IterationRecord>> {
        let npar = self.sampler.machine().npar();
        let world = self.comm.size();

        self.stepper.init(2 * npar);
        self.stepper.reset();
        self.seed_chains()?;

        // Rank 0 owns the log and parameter files.
        let mut logfile = match (&self.opts.output_base, self.comm.rank()) {
            (Some(base), 0) => Some(BufWriter::new(File::create(format!("{base}.log"))?)),
            _ => None,
        };
        let wf_name = self.opts.output_base.as_ref().map(|base| format!("{base}.wf"));

        let sweeps = (self.opts.nsamples + world - 1) / world;

        if self.comm.rank() == 0 {
            info!(
                method = ?self.opts.method,
                workers = world,
                parameters = npar,
                sweeps_per_worker = sweeps,
                "starting optimization"
            );
        }

        self.sampler.reset(true);

        let mut records = Vec::with_capacity(self.opts.niter_opt);
        for iter in 0..self.opts.niter_opt {
            let record = self.advance(iter, sweeps)?;

            if let Some(file) = logfile.as_mut() {
                serde_json::to_writer(&mut *file, &record)?;
                file.write_all(b"\n")?;
                file.flush()?;
            }

            if self.comm.rank() == 0 {
                if let Some(name) = &wf_name {
                    if self.opts.save_every > 0
                        && (iter % self.opts.save_every == 0 || iter + 1 == self.opts.niter_opt)
                    {
                        self.sampler.machine().save(Path::new(name))?;
                    }
                }
            }

            self.comm.barrier();
            records.push(record);
        }
        Ok(records)
    }

    fn advance(&mut self, iter: usize, sweeps: usize) -> Result<IterationRecord> {
        let world = self.comm.size() as f64;
        let npar = self.sampler.machine().npar();

        // Sampling: one stored configuration per sweep.
        self.sampler.reset(false);
        let mut vsamp = Vec::with_capacity(sweeps);
        for _ in 0..sweeps {
            self.sampler.sweep();
            vsamp.push(self.sampler.visible().clone());
        }
        let nsamp = vsamp.len();

        // Local estimators.
        let mut elocs = DVector::<Complex64>::zeros(nsamp);
        let mut ok = DMatrix::<Complex64>::zeros(nsamp, npar);
        let mut obs_means = vec![0.0f64; self.observables.len()];
        {
            let machine = self.sampler.machine();
            for (k, v) in vsamp.iter().enumerate() {
                elocs[k] = local_estimate(&self.hamiltonian, machine, v)?;
                let der = machine.der_log(v);
                for p in 0..npar {
                    ok[(k, p)] = der[p];
                }
                for (acc, (_, op)) in obs_means.iter_mut().zip(&self.observables) {
                    *acc += local_estimate(op, machine, v)?.re;
                }
            }
        }

        // A non-finite estimator anywhere poisons the gradient; agree on
        // that across workers before any of them uses it.
        let local_bad = elocs.iter().any(|e| !e.re.is_finite() || !e.im.is_finite())
            || ok.iter().any(|z| !z.re.is_finite() || !z.im.is_finite());
        let mut bad = [if local_bad { 1.0 } else { 0.0 }];
        self.comm.all_reduce_sum_f64(&mut bad)?;
        let skip_update = bad[0] > 0.0;
        let mut degenerate = skip_update;

        // Worker-averaged means, then centering.
        let mut elocmean = [elocs.iter().sum::<Complex64>() / nsamp as f64];
        self.comm.all_reduce_sum_c64(&mut elocmean)?;
        let elocmean = elocmean[0] / world;

        let mut okmean = DVector::<Complex64>::zeros(npar);
        for p in 0..npar {
            okmean[p] = (0..nsamp).map(|k| ok[(k, p)]).sum::<Complex64>() / nsamp as f64;
        }
        self.comm.all_reduce_sum_c64(okmean.as_mut_slice())?;
        for z in okmean.iter_mut() {
            *z /= world;
        }

        for k in 0..nsamp {
            elocs[k] -= elocmean;
            for p in 0..npar {
                ok[(k, p)] -= okmean[p];
            }
        }

        let mut evar = [elocs.iter().map(|e| e.norm_sqr()).sum::<f64>() / nsamp as f64];
        self.comm.all_reduce_sum_f64(&mut evar)?;
        let evar = evar[0] / world;

        for acc in obs_means.iter_mut() {
            *acc /= nsamp as f64;
        }
        self.comm.all_reduce_sum_f64(&mut obs_means)?;
        for acc in obs_means.iter_mut() {
            *acc /= world;
        }

        let mut acceptance = [self.sampler.acceptance()];
        self.comm.all_reduce_sum_f64(&mut acceptance)?;
        let acceptance = acceptance[0] / world;

        // Gradient of the energy.
        let mut grad: DVector<Complex64> = ok.adjoint() * &elocs;
        for z in grad.iter_mut() {
            *z *= 2.0;
        }
        self.comm.all_reduce_sum_c64(grad.as_mut_slice())?;
        let scale = 1.0 / (world * nsamp as f64);
        for z in grad.iter_mut() {
            *z *= scale;
        }

        if !skip_update && self.opts.method == Method::Sr {
            degenerate |= self.precondition(&mut grad, &ok, nsamp)?;
        }

        // Rank 0 steps the optimizer; everyone receives the new
        // parameters, restoring the replication invariant.
        let mut pars_real = pack_complex(&self.sampler.machine().parameters());
        if self.comm.rank() == 0 && !skip_update {
            let grad_real = pack_complex(&grad);
            self.stepper.update(&grad_real, &mut pars_real);
        }
        self.comm.broadcast_f64(pars_real.as_mut_slice(), 0)?;
        let new_pars = unpack_complex(&pars_real);
        self.sampler.machine_mut().set_parameters(&new_pars)?;

        if degenerate && self.comm.rank() == 0 {
            warn!(iteration = iter, "degenerate iteration surfaced in the log");
        }

        Ok(IterationRecord {
            iteration: iter,
            energy: elocmean.re.is_finite().then_some(elocmean.re),
            energy_variance: evar.is_finite().then_some(evar),
            acceptance,
            observables: self
                .observables
                .iter()
                .map(|(name, _)| name.clone())
                .zip(obs_means)
                .collect(),
            degenerate,
        })
    }

    /// Replace the gradient with the SR natural-gradient direction
    /// `δ = S⁻¹ b`, `b = Ōᴴ Ē / (W·M)`. Returns whether the iteration
    /// must be marked degenerate.
    fn precondition(
        &self,
        grad: &mut DVector<Complex64>,
        ok: &DMatrix<Complex64>,
        nsamp: usize,
    ) -> Result<bool> {
        let world = self.comm.size() as f64;
        let scale = 1.0 / (world * nsamp as f64);
        let npar = grad.len();

        // The raw direction b = Ōᴴ Ē/(W·M) is half the already-reduced
        // gradient.
        let b: DVector<Complex64> = grad.map(|z| z * 0.5);

        if !self.opts.use_iterative {
            // Explicit construction of the S matrix.
            let mut s: DMatrix<Complex64> = ok.adjoint() * ok;
            self.comm.all_reduce_sum_c64(s.as_mut_slice())?;
            for z in s.iter_mut() {
                *z *= scale;
            }
            for p in 0..npar {
                s[(p, p)] += self.opts.diag_shift;
            }

            let qr = s.clone().col_piv_qr();
            let Some(delta) = qr.solve(&b) else {
                if self.comm.rank() == 0 {
                    warn!("rank-deficient S matrix, keeping the plain gradient direction");
                }
                return Ok(true);
            };

            if self.opts.rescale_shift {
                let s_delta = &s * &delta;
                let nor = delta.dotc(&s_delta).re;
                if !(nor.is_finite() && nor > 0.0) {
                    if self.comm.rank() == 0 {
                        warn!("non-positive SR rescale norm, keeping the plain gradient");
                    }
                    return Ok(true);
                }
                *grad = delta / Complex64::new(nor.sqrt(), 0.0);
            } else {
                *grad = delta;
            }
            Ok(false)
        } else {
            // Matrix-free operator x ↦ Ōᴴ(Ōx)/(W·M) + λx; the reduction
            // inside keeps workers synchronized per CG step.
            let apply = |x: &DVector<Complex64>| -> Result<DVector<Complex64>> {
                let okx = ok * x;
                let mut y: DVector<Complex64> = ok.adjoint() * okx;
                self.comm.all_reduce_sum_c64(y.as_mut_slice())?;
                for z in y.iter_mut() {
                    *z *= scale;
                }
                y += x * Complex64::new(self.opts.diag_shift, 0.0);
                Ok(y)
            };

            let (delta, converged) =
                conjugate_gradient(&apply, &b, CG_TOLERANCE, (2 * npar).max(10))?;
            if !converged && self.comm.rank() == 0 {
                warn!("conjugate gradient did not converge, applying best available direction");
            }

            if self.opts.rescale_shift {
                let s_delta = apply(&delta)?;
                let nor = delta.dotc(&s_delta).re;
                if !(nor.is_finite() && nor > 0.0) {
                    return Ok(true);
                }
                *grad = delta / Complex64::new(nor.sqrt(), 0.0);
            } else {
                *grad = delta;
            }
            Ok(!converged)
        }
    }
}
