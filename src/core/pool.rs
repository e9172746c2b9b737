//! Purpose: Thread-safe free list of heavyweight interpreter contexts with LIFO reuse.
//! Exports: `ContextPool`, `Checkout`, `PoolStats`, `Factory`.
//! Role: Lets request handlers reuse expensive contexts instead of building one per call.
//! Invariants: A context handed out was either built by the factory or previously `put`.
//! Invariants: The guard covers stack manipulation only; the factory runs outside it.
//! Invariants: No size bound and no eviction; the high-water mark stays resident.
//! Invariants: `shutdown` never destroys stored contexts and the pool stays usable after it.
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::core::error::Error;

pub type Factory<T> = Box<dyn Fn() -> Result<T, Error> + Send + Sync>;

/// Point-in-time pool counters.
///
/// Each field is read separately and the checkout counters change outside the stack guard,
/// so under contention `idle + checked_out` may briefly differ from `created`. The fields
/// agree once no caller is between `take` and `put`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    pub idle: usize,
    pub created: u64,
    pub checked_out: usize,
    pub peak_checked_out: usize,
    pub shut_down: bool,
}

pub struct ContextPool<T> {
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    created: AtomicU64,
    checked_out: AtomicUsize,
    peak_checked_out: AtomicUsize,
    shut_down: AtomicBool,
}

impl<T> fmt::Debug for ContextPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T> ContextPool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<T, Error> + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            created: AtomicU64::new(0),
            checked_out: AtomicUsize::new(0),
            peak_checked_out: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Pops the most recently returned context, or builds a fresh one when none is idle.
    ///
    /// Factory failures are returned unchanged and leave the pool usable.
    pub fn take(&self) -> Result<T, Error> {
        let reused = self.lock_idle().pop();
        let ctx = match reused {
            Some(ctx) => {
                debug!("reusing pooled context");
                ctx
            }
            None => self.construct()?,
        };
        self.note_checkout();
        Ok(ctx)
    }

    /// Makes `ctx` eligible for reuse. The context is stored as-is, without any reset.
    pub fn put(&self, ctx: T) {
        self.lock_idle().push(ctx);
        self.note_checkin();
    }

    /// Checks out a context that goes back to the pool when the guard drops.
    pub fn checkout(&self) -> Result<Checkout<'_, T>, Error> {
        let ctx = self.take()?;
        Ok(Checkout {
            pool: self,
            ctx: Some(ctx),
        })
    }

    /// Runs `f` with a checked-out context and returns the context afterwards.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Error> {
        let mut checkout = self.checkout()?;
        Ok(f(&mut *checkout))
    }

    /// Builds `count` contexts up front so the first callers skip construction.
    pub fn prewarm(&self, count: usize) -> Result<(), Error> {
        let mut fresh = Vec::with_capacity(count);
        for _ in 0..count {
            fresh.push(self.construct()?);
        }
        self.lock_idle().extend(fresh);
        debug!(count, "prewarmed pool");
        Ok(())
    }

    /// Marks the end of the pool's serving life.
    ///
    /// Stored contexts are left in place: tearing them down here races with the host's
    /// graceful-shutdown hook, which may still be finishing requests that use them.
    /// Owners that control both sides can call [`ContextPool::drain`] themselves.
    pub fn shutdown(&self) {
        let already = self.shut_down.swap(true, Ordering::SeqCst);
        if !already {
            let stats = self.stats();
            info!(
                idle = stats.idle,
                created = stats.created,
                checked_out = stats.checked_out,
                "pool shut down; stored contexts retained"
            );
        }
    }

    /// Removes every idle context and hands them to the caller.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock_idle())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.lock_idle().len(),
            created: self.created.load(Ordering::SeqCst),
            checked_out: self.checked_out.load(Ordering::SeqCst),
            peak_checked_out: self.peak_checked_out.load(Ordering::SeqCst),
            shut_down: self.shut_down.load(Ordering::SeqCst),
        }
    }

    fn construct(&self) -> Result<T, Error> {
        match (self.factory)() {
            Ok(ctx) => {
                let created = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(created, "constructed pooled context");
                Ok(ctx)
            }
            Err(err) => {
                warn!(error = %err, "context factory failed");
                Err(err)
            }
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn note_checkout(&self) {
        let now = self.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_checked_out.fetch_max(now, Ordering::SeqCst);
    }

    fn note_checkin(&self) {
        // Contexts built outside the pool may be `put` without a matching `take`.
        let _ = self
            .checked_out
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// A checked-out context that returns to its pool on drop.
pub struct Checkout<'a, T> {
    pool: &'a ContextPool<T>,
    ctx: Option<T>,
}

impl<T> Checkout<'_, T> {
    /// Keeps the context instead of returning it to the pool.
    pub fn detach(mut self) -> Option<T> {
        let ctx = self.ctx.take();
        self.pool.note_checkin();
        ctx
    }
}

impl<T> Deref for Checkout<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.ctx.as_ref().expect("context present until drop")
    }
}

impl<T> DerefMut for Checkout<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.ctx.as_mut().expect("context present until drop")
    }
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.put(ctx);
        }
    }
}
