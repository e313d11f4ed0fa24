//! C4 — Interpreter Pool (§4.4). A process-wide, size-bounded pool of
//! reusable execution contexts. Built from `tokio::sync::Semaphore` (admission)
//! plus `tokio::sync::Mutex<Vec<_>>` (free list) rather than an external
//! pooling crate, mirroring the teacher's own combination of
//! `spawn_blocking` and `Arc`-guarded shared state for blocking interpreter
//! work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::ScriptHostError;

/// A pool of `C` execution contexts, created lazily up to `max`. The free
/// list is a plain `std::sync::Mutex` (never held across an `.await`) so a
/// leased context can be returned synchronously from `Drop`; admission
/// uses `tokio::sync::Semaphore` for the async-aware wait.
pub struct InterpreterPool<C> {
    semaphore: Arc<Semaphore>,
    free: Mutex<Vec<C>>,
    factory: Box<dyn Fn() -> C + Send + Sync>,
    created: AtomicUsize,
    max: usize,
}

impl<C: Send + 'static> InterpreterPool<C> {
    pub fn new(max: usize, factory: impl Fn() -> C + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max)),
            free: Mutex::new(Vec::with_capacity(max)),
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
            max,
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Lease a context, observing `cancel`. If cancellation fires before a
    /// permit is granted, the lease never starts (§4.4).
    pub async fn lease(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Lease<C>, ScriptHostError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScriptHostError::RequestCancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.expect("interpreter pool semaphore closed")
            }
        };

        let context = {
            let mut free = self.free.lock().expect("interpreter pool free list poisoned");
            match free.pop() {
                Some(c) => c,
                None => {
                    self.created.fetch_add(1, Ordering::SeqCst);
                    (self.factory)()
                }
            }
        };

        Ok(Lease {
            pool: Arc::clone(self),
            permit: Some(permit),
            context: Some(context),
            poisoned: false,
        })
    }
}

/// An owned, leased context. Released back to the pool on `Drop` unless
/// [`Lease::poison`] was called, matching §4.4's "poisoned contexts are
/// dropped, not returned" invariant.
pub struct Lease<C: Send + 'static> {
    pool: Arc<InterpreterPool<C>>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    context: Option<C>,
    poisoned: bool,
}

impl<C: Send + 'static> Lease<C> {
    pub fn get_mut(&mut self) -> &mut C {
        self.context.as_mut().expect("lease context taken")
    }

    /// Mark this context as unrecoverable; it will not return to the free
    /// list when the lease is dropped (§4.4).
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Move the context out so it can be handed to `spawn_blocking`
    /// (whose closure must own its captures). Restore it with
    /// [`Lease::restore`] once the blocking call returns; a lease dropped
    /// without restoring its context is treated as poisoned.
    pub fn take_context(&mut self) -> C {
        self.context.take().expect("lease context already taken")
    }

    pub fn restore(&mut self, context: C) {
        self.context = Some(context);
    }
}

impl<C: Send + 'static> Drop for Lease<C> {
    fn drop(&mut self) {
        if let (Some(context), false) = (self.context.take(), self.poisoned) {
            self.pool
                .free
                .lock()
                .expect("interpreter pool free list poisoned")
                .push(context);
        }
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_reuses_released_context() {
        let pool = InterpreterPool::new(1, || 0u32);
        let cancel = CancellationToken::new();

        {
            let mut lease = pool.lease(&cancel).await.unwrap();
            *lease.get_mut() = 7;
        }
        let mut lease = pool.lease(&cancel).await.unwrap();
        assert_eq!(*lease.get_mut(), 7);
    }

    #[tokio::test]
    async fn poisoned_context_is_not_reused() {
        let pool = InterpreterPool::new(1, || 0u32);
        let cancel = CancellationToken::new();

        {
            let mut lease = pool.lease(&cancel).await.unwrap();
            *lease.get_mut() = 7;
            lease.poison();
        }
        let mut lease = pool.lease(&cancel).await.unwrap();
        assert_eq!(*lease.get_mut(), 0);
    }

    #[tokio::test]
    async fn cancellation_before_grant_prevents_lease() {
        let pool = InterpreterPool::new(1, || 0u32);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pool.lease(&cancel).await;
        assert!(matches!(result, Err(ScriptHostError::RequestCancelled)));
    }
}
