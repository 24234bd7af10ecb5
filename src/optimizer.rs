//! Stateful parameter steppers.
//!
//! A stepper maps a gradient and the current parameters to new
//! parameters, keeping whatever per-coordinate state the method needs
//! (momenta, decayed averages). All updates are componentwise over real
//! coordinates; complex parameter vectors are packed as `[Re; Im]`, which
//! realizes the Wirtinger convention of treating real and imaginary parts
//! as independent coordinates.

use nalgebra::DVector;
use num_complex::Complex64;

/// Stateful parameter updater.
pub trait Stepper {
    /// Install per-coordinate state for `npar` real coordinates.
    fn init(&mut self, npar: usize);

    /// Clear transient state between runs.
    fn reset(&mut self);

    fn update(&mut self, grad: &DVector<f64>, pars: &mut DVector<f64>);
}

/// Pack a complex vector into `[Re; Im]` real coordinates.
pub fn pack_complex(v: &DVector<Complex64>) -> DVector<f64> {
    let n = v.len();
    DVector::from_fn(2 * n, |k, _| if k < n { v[k].re } else { v[k - n].im })
}

/// Inverse of [`pack_complex`].
pub fn unpack_complex(r: &DVector<f64>) -> DVector<Complex64> {
    let n = r.len() / 2;
    DVector::from_fn(n, |k, _| Complex64::new(r[k], r[k + n]))
}

/// Plain gradient descent with optional L2 regularization and learning
/// rate decay.
pub struct Sgd {
    learning_rate: f64,
    l2_reg: f64,
    decay_factor: f64,
    eta: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, l2_reg: f64, decay_factor: f64) -> Self {
        Self {
            learning_rate,
            l2_reg,
            decay_factor,
            eta: learning_rate,
        }
    }
}

impl Stepper for Sgd {
    fn init(&mut self, _npar: usize) {
        self.eta = self.learning_rate;
    }

    fn reset(&mut self) {
        self.eta = self.learning_rate;
    }

    fn update(&mut self, grad: &DVector<f64>, pars: &mut DVector<f64>) {
        for k in 0..pars.len() {
            pars[k] -= self.eta * (grad[k] + self.l2_reg * pars[k]);
        }
        self.eta *= self.decay_factor;
    }
}

/// Gradient descent with momentum: `m ← βm + g`, `θ ← θ − ηm`.
pub struct Momentum {
    learning_rate: f64,
    beta: f64,
    m: DVector<f64>,
}

impl Momentum {
    pub fn new(learning_rate: f64, beta: f64) -> Self {
        Self {
            learning_rate,
            beta,
            m: DVector::zeros(0),
        }
    }
}

impl Stepper for Momentum {
    fn init(&mut self, npar: usize) {
        self.m = DVector::zeros(npar);
    }

    fn reset(&mut self) {
        self.m.fill(0.0);
    }

    fn update(&mut self, grad: &DVector<f64>, pars: &mut DVector<f64>) {
        for k in 0..pars.len() {
            self.m[k] = self.beta * self.m[k] + grad[k];
            pars[k] -= self.learning_rate * self.m[k];
        }
    }
}

/// AdaMax: Adam with a running per-coordinate L∞ norm of the gradients.
pub struct AdaMax {
    alpha: f64,
    beta1: f64,
    beta2: f64,
    epscut: f64,
    mt: DVector<f64>,
    ut: DVector<f64>,
    niter: u32,
}

impl AdaMax {
    pub fn new(alpha: f64, beta1: f64, beta2: f64, epscut: f64) -> Self {
        Self {
            alpha,
            beta1,
            beta2,
            epscut,
            mt: DVector::zeros(0),
            ut: DVector::zeros(0),
            niter: 0,
        }
    }
}

impl Stepper for AdaMax {
    fn init(&mut self, npar: usize) {
        self.mt = DVector::zeros(npar);
        self.ut = DVector::zeros(npar);
        self.niter = 0;
    }

    fn reset(&mut self) {
        self.mt.fill(0.0);
        self.ut.fill(0.0);
        self.niter = 0;
    }

    fn update(&mut self, grad: &DVector<f64>, pars: &mut DVector<f64>) {
        self.niter += 1;
        let eta = self.alpha / (1.0 - self.beta1.powi(self.niter as i32));
        for k in 0..pars.len() {
            self.ut[k] = (self.beta2 * self.ut[k]).max(grad[k].abs());
            self.mt[k] = self.beta1 * self.mt[k] + (1.0 - self.beta1) * grad[k];
            pars[k] -= eta * self.mt[k] / (self.ut[k] + self.epscut);
        }
    }
}

/// AdaDelta: decayed averages of squared gradients and squared updates.
pub struct AdaDelta {
    rho: f64,
    epscut: f64,
    eg2: DVector<f64>,
    ex2: DVector<f64>,
}

impl AdaDelta {
    pub fn new(rho: f64, epscut: f64) -> Self {
        Self {
            rho,
            epscut,
            eg2: DVector::zeros(0),
            ex2: DVector::zeros(0),
        }
    }
}

impl Stepper for AdaDelta {
    fn init(&mut self, npar: usize) {
        self.eg2 = DVector::zeros(npar);
        self.ex2 = DVector::zeros(npar);
    }

    fn reset(&mut self) {
        self.eg2.fill(0.0);
        self.ex2.fill(0.0);
    }

    fn update(&mut self, grad: &DVector<f64>, pars: &mut DVector<f64>) {
        for k in 0..pars.len() {
            self.eg2[k] = self.rho * self.eg2[k] + (1.0 - self.rho) * grad[k] * grad[k];
            let dx = -((self.ex2[k] + self.epscut).sqrt() / (self.eg2[k] + self.epscut).sqrt())
                * grad[k];
            self.ex2[k] = self.rho * self.ex2[k] + (1.0 - self.rho) * dx * dx;
            pars[k] += dx;
        }
    }
}

/// RMSProp: decayed mean of squared gradients.
pub struct RmsProp {
    learning_rate: f64,
    beta: f64,
    epscut: f64,
    mt: DVector<f64>,
}

impl RmsProp {
    pub fn new(learning_rate: f64, beta: f64, epscut: f64) -> Self {
        Self {
            learning_rate,
            beta,
            epscut,
            mt: DVector::zeros(0),
        }
    }
}

impl Stepper for RmsProp {
    fn init(&mut self, npar: usize) {
        self.mt = DVector::zeros(npar);
    }

    fn reset(&mut self) {
        self.mt.fill(0.0);
    }

    fn update(&mut self, grad: &DVector<f64>, pars: &mut DVector<f64>) {
        for k in 0..pars.len() {
            self.mt[k] = self.beta * self.mt[k] + (1.0 - self.beta) * grad[k] * grad[k];
            pars[k] -= self.learning_rate * grad[k] / (self.mt[k] + self.epscut).sqrt();
        }
    }
}
