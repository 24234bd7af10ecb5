//! Collective operations across SPMD workers.
//!
//! The driver only ever talks to the [`Communicator`] trait: all-reduce
//! sums, broadcasts, and a barrier. Workers must reach each collective in
//! the same order; a mismatch is a protocol error. Two implementations
//! ship: an identity communicator for single-process runs, and an
//! in-process thread world where workers are OS threads. Reductions in
//! the thread world gather per-rank contributions and sum them in rank
//! order on every worker, so results are bitwise identical across workers
//! and across runs.

use std::sync::{Arc, Barrier, Mutex};

use num_complex::Complex64;

use crate::error::{Result, VmcError};

pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn all_reduce_sum_f64(&self, buf: &mut [f64]) -> Result<()>;
    fn broadcast_f64(&self, buf: &mut [f64], root: usize) -> Result<()>;
    fn broadcast_u64(&self, buf: &mut [u64], root: usize) -> Result<()>;
    fn barrier(&self);

    fn all_reduce_sum_c64(&self, buf: &mut [Complex64]) -> Result<()> {
        let mut flat = Vec::with_capacity(2 * buf.len());
        for z in buf.iter() {
            flat.push(z.re);
            flat.push(z.im);
        }
        self.all_reduce_sum_f64(&mut flat)?;
        for (z, pair) in buf.iter_mut().zip(flat.chunks_exact(2)) {
            *z = Complex64::new(pair[0], pair[1]);
        }
        Ok(())
    }

    fn broadcast_c64(&self, buf: &mut [Complex64], root: usize) -> Result<()> {
        let mut flat = Vec::with_capacity(2 * buf.len());
        for z in buf.iter() {
            flat.push(z.re);
            flat.push(z.im);
        }
        self.broadcast_f64(&mut flat, root)?;
        for (z, pair) in buf.iter_mut().zip(flat.chunks_exact(2)) {
            *z = Complex64::new(pair[0], pair[1]);
        }
        Ok(())
    }
}

/// Identity communicator for a single worker.
#[derive(Debug, Clone, Default)]
pub struct LocalCommunicator;

impl LocalCommunicator {
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum_f64(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn broadcast_f64(&self, _buf: &mut [f64], _root: usize) -> Result<()> {
        Ok(())
    }

    fn broadcast_u64(&self, _buf: &mut [u64], _root: usize) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) {}
}

struct WorldShared {
    size: usize,
    barrier: Barrier,
    reduce_slots: Mutex<Vec<Option<Vec<f64>>>>,
    bcast_f64: Mutex<Option<Vec<f64>>>,
    bcast_u64: Mutex<Option<Vec<u64>>>,
}

/// One endpoint of an in-process world of peer workers.
pub struct ThreadCommunicator {
    rank: usize,
    shared: Arc<WorldShared>,
}

impl ThreadCommunicator {
    /// Create a world of `size` peer communicators, one per worker thread.
    pub fn spawn_world(size: usize) -> Vec<ThreadCommunicator> {
        assert!(size > 0);
        let shared = Arc::new(WorldShared {
            size,
            barrier: Barrier::new(size),
            reduce_slots: Mutex::new(vec![None; size]),
            bcast_f64: Mutex::new(None),
            bcast_u64: Mutex::new(None),
        });
        (0..size)
            .map(|rank| ThreadCommunicator { rank, shared: Arc::clone(&shared) })
            .collect()
    }

    fn lock_error() -> VmcError {
        VmcError::Protocol("a worker died while holding a collective lock".into())
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_reduce_sum_f64(&self, buf: &mut [f64]) -> Result<()> {
        {
            let mut slots = self.shared.reduce_slots.lock().map_err(|_| Self::lock_error())?;
            slots[self.rank] = Some(buf.to_vec());
        }
        self.shared.barrier.wait();

        // Sum contributions in rank order so every worker computes the
        // identical floating-point result.
        let result = (|| {
            let slots = self.shared.reduce_slots.lock().map_err(|_| Self::lock_error())?;
            buf.fill(0.0);
            for rank in 0..self.shared.size {
                let contribution = slots[rank].as_ref().ok_or_else(|| {
                    VmcError::Protocol(format!("rank {rank} did not join the all-reduce"))
                })?;
                if contribution.len() != buf.len() {
                    return Err(VmcError::Protocol(format!(
                        "all-reduce length mismatch: rank {rank} sent {} elements, \
                         rank {} expected {}",
                        contribution.len(),
                        self.rank,
                        buf.len()
                    )));
                }
                for (acc, x) in buf.iter_mut().zip(contribution) {
                    *acc += x;
                }
            }
            Ok(())
        })();

        // Reach the closing barrier even on error so peers are not stranded.
        self.shared.barrier.wait();
        result
    }

    fn broadcast_f64(&self, buf: &mut [f64], root: usize) -> Result<()> {
        if self.rank == root {
            let mut slot = self.shared.bcast_f64.lock().map_err(|_| Self::lock_error())?;
            *slot = Some(buf.to_vec());
        }
        self.shared.barrier.wait();

        let result = (|| {
            let slot = self.shared.bcast_f64.lock().map_err(|_| Self::lock_error())?;
            match slot.as_ref() {
                Some(data) if data.len() == buf.len() => {
                    buf.copy_from_slice(data);
                    Ok(())
                }
                Some(data) => Err(VmcError::Protocol(format!(
                    "broadcast length mismatch: root sent {} elements, rank {} expected {}",
                    data.len(),
                    self.rank,
                    buf.len()
                ))),
                None => Err(VmcError::Protocol("broadcast root did not publish".into())),
            }
        })();

        self.shared.barrier.wait();
        result
    }

    fn broadcast_u64(&self, buf: &mut [u64], root: usize) -> Result<()> {
        if self.rank == root {
            let mut slot = self.shared.bcast_u64.lock().map_err(|_| Self::lock_error())?;
            *slot = Some(buf.to_vec());
        }
        self.shared.barrier.wait();

        let result = (|| {
            let slot = self.shared.bcast_u64.lock().map_err(|_| Self::lock_error())?;
            match slot.as_ref() {
                Some(data) if data.len() == buf.len() => {
                    buf.copy_from_slice(data);
                    Ok(())
                }
                _ => Err(VmcError::Protocol("u64 broadcast mismatch".into())),
            }
        })();

        self.shared.barrier.wait();
        result
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
