use tokio::sync::{Mutex, MutexGuard};

/// Permit proving the holder owns the exclusive region.
pub type StorePermit<'a> = MutexGuard<'a, ()>;

/// The single exclusive region serializing every mutation of the aggregate
/// store: commits, limit check-then-notify, and retention passes.
///
/// Backed by a tokio mutex so the permit is held across store awaits, not
/// just around synchronous code. Acquisition is FIFO-fair, so a burst of
/// events resolves in bounded time. The guard is not reentrant: a caller
/// must never acquire it twice in the same call chain, which is why the
/// commit engine and limit evaluator document "caller holds the guard"
/// instead of locking themselves.
///
/// This is in-process mutual exclusion only, not a distributed lock.
#[derive(Debug, Default)]
pub struct StoreGuard {
    inner: Mutex<()>,
}

impl StoreGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> StorePermit<'_> {
        self.inner.lock().await
    }
}
