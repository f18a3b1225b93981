//! Worker bookkeeping and global lifecycle.
//!
//! Each channel is pinned to exactly one worker for its lifetime; the
//! listener hands fresh channels to the least-loaded worker. With the
//! async engine a "worker" is a load-accounting slot rather than an OS
//! thread — the runtime multiplexes the driver tasks — but pinning and
//! the handoff contract are preserved so statistics and shutdown
//! behave the way embedders expect.
//!
//! Global initialize/shutdown are refcounted: the first initialize
//! claims process-wide resources, the last shutdown releases them.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tracing::{debug, info};

use crate::{
    channel::ChannelHandler,
    error::{ChannelError, Result},
    server::Server,
};

static RUNTIME_REFS: AtomicUsize = AtomicUsize::new(0);

/// Claim the engine's process-wide resources. Refcounted; pair every
/// call with [`shutdown`].
pub fn initialize() {
    let previous = RUNTIME_REFS.fetch_add(1, Ordering::SeqCst);
    if previous == 0 {
        info!("engine initialized");
    }
}

/// Release one initialize reference; the last one tears down.
pub fn shutdown() {
    let previous = RUNTIME_REFS.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(previous > 0, "shutdown without initialize");
    if previous == 1 {
        info!("engine shut down");
    }
}

/// Number of live initialize references.
#[must_use]
pub fn runtime_refs() -> usize {
    RUNTIME_REFS.load(Ordering::SeqCst)
}

/// A worker slot's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(pub usize);

/// Load-balanced set of worker slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    loads: Arc<Vec<AtomicUsize>>,
}

impl WorkerPool {
    /// A pool with `workers` slots.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self { loads: Arc::new((0..workers).map(|_| AtomicUsize::new(0)).collect()) }
    }

    /// Pin a new channel to the least-loaded worker.
    #[must_use]
    pub fn assign(&self) -> WorkerId {
        let (index, _) = self
            .loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| load.load(Ordering::Relaxed))
            .unwrap_or((0, &self.loads[0]));
        self.loads[index].fetch_add(1, Ordering::Relaxed);
        WorkerId(index)
    }

    /// Release a channel's pin when it goes inactive.
    pub fn release(&self, id: WorkerId) {
        if let Some(load) = self.loads.get(id.0) {
            load.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Channels currently pinned to each worker.
    #[must_use]
    pub fn loads(&self) -> Vec<usize> {
        self.loads.iter().map(|l| l.load(Ordering::Relaxed)).collect()
    }
}

/// Wraps a handler so its worker pin is released when the channel goes
/// inactive.
struct PinnedHandler<H> {
    inner: H,
    pool: WorkerPool,
    id: WorkerId,
    released: bool,
}

impl<H: ChannelHandler> ChannelHandler for PinnedHandler<H> {
    fn channel_active(&mut self, info: &crate::channel::ChannelInfo) {
        self.inner.channel_active(info);
    }

    fn message(&mut self, buffer: bytes::Bytes) {
        self.inner.message(buffer);
    }

    fn channel_inactive(&mut self, error: Option<ChannelError>) {
        if !self.released {
            self.released = true;
            self.pool.release(self.id);
        }
        self.inner.channel_inactive(error);
    }
}

/// Accept connections forever, pinning each channel to the least-loaded
/// worker and building its handler from `factory`.
///
/// Runs until the listener fails.
pub async fn serve<H, F>(server: Server, workers: usize, mut factory: F) -> Result<()>
where
    H: ChannelHandler,
    F: FnMut(WorkerId) -> H + Send,
{
    let pool = WorkerPool::new(workers);
    loop {
        let worker = pool.assign();
        let handler = PinnedHandler {
            inner: factory(worker),
            pool: pool.clone(),
            id: worker,
            released: false,
        };
        match server.accept(handler).await {
            Ok(channel) => {
                debug!(worker = worker.0, peer = %channel.peer_addr(), "channel pinned");
            }
            Err(error) => {
                pool.release(worker);
                if let ChannelError::SystemFailure { .. } = &error {
                    return Err(error);
                }
                // Per-connection setup failures (peer vanished between
                // accept and option setup) do not stop the listener.
                debug!(%error, "accept setup failed");
            }
        }
    }
}
