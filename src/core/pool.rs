//! Fixed-size pool of execution slots ("browser profiles").
//!
//! At most `size` leases are out at any instant. Callers that find the pool
//! empty queue up in arrival order, and a released lease is handed straight to
//! the longest-waiting caller instead of going back to the free list, so a
//! newcomer can never overtake someone already queued.

use crate::domain::model::Lease;
use crate::utils::error::{Result, ReviewError};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    size: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: Vec<Lease>,
    waiters: VecDeque<oneshot::Sender<Lease>>,
    closed: bool,
}

impl ResourcePool {
    pub fn new(size: usize) -> Self {
        // reversed so that pop() hands out profile-0 first
        let free = (0..size).rev().map(Lease::new).collect();

        Self {
            inner: Arc::new(PoolInner {
                size,
                state: Mutex::new(PoolState {
                    free,
                    waiters: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a free slot. Fails only once the pool has been closed.
    ///
    /// The returned guard gives the lease back when dropped, on every exit path.
    pub async fn acquire(&self) -> Result<LeaseGuard> {
        let rx = {
            let mut state = self.state();
            if state.closed {
                return Err(ReviewError::ResourcePoolClosed);
            }

            if let Some(lease) = state.free.pop() {
                debug!(profile = %lease, free = state.free.len(), "Lease acquired");
                return Ok(LeaseGuard::new(self.clone(), lease));
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(waiting = state.waiters.len(), "No free profile, waiting in line");
            rx
        };

        let mut waiter = Waiter {
            rx,
            pool: self,
            settled: false,
        };
        let lease = waiter.wait().await?;
        debug!(profile = %lease, "Lease handed over from queue");
        Ok(LeaseGuard::new(self.clone(), lease))
    }

    fn release(&self, lease: Lease) {
        let mut lease = lease;
        let mut state = self.state();

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(lease) {
                Ok(()) => return,
                // that waiter gave up, try the next one
                Err(returned) => lease = returned,
            }
        }

        debug!(profile = %lease, "Lease returned to free list");
        state.free.push(lease);
    }

    /// Rejects every queued and future `acquire()` with `resource_pool_closed`.
    pub fn close(&self) {
        let waiters = {
            let mut state = self.state();
            state.closed = true;
            std::mem::take(&mut state.waiters)
        };

        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "Resource pool closed with queued waiters");
        }
        // dropping the senders wakes every waiter with an error
        drop(waiters);
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn available(&self) -> usize {
        self.state().free.len()
    }

    pub fn waiting(&self) -> usize {
        self.state()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }
}

/// A queued `acquire()` call.
///
/// If the caller is cancelled after a lease was already sent to it, the lease
/// is recovered from the channel and released again.
struct Waiter<'a> {
    rx: oneshot::Receiver<Lease>,
    pool: &'a ResourcePool,
    settled: bool,
}

impl Waiter<'_> {
    async fn wait(&mut self) -> Result<Lease> {
        let result = (&mut self.rx).await;
        self.settled = true;
        result.map_err(|_| ReviewError::ResourcePoolClosed)
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if let Ok(lease) = self.rx.try_recv() {
            self.pool.release(lease);
        }
    }
}

/// Scoped ownership of one lease.
pub struct LeaseGuard {
    pool: ResourcePool,
    lease: Option<Lease>,
}

impl LeaseGuard {
    fn new(pool: ResourcePool, lease: Lease) -> Self {
        Self {
            pool,
            lease: Some(lease),
        }
    }

    pub fn lease(&self) -> &Lease {
        self.lease.as_ref().expect("lease is present until drop")
    }

    /// Gives the lease back now instead of at the end of the scope.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard").field("lease", &self.lease).finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.release(lease);
        }
    }
}
