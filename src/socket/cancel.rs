//! Cancellable blocking socket layer (§4.2, §9).
//!
//! §9 allows either a non-blocking, readiness-driven design or a
//! shutdown-on-cancel one, as long as the externally observable
//! timeout/ordering/`Cancelled` contract holds. This uses the latter:
//! `shutdown(Both)` unblocks whatever thread is parked in a blocking
//! read/write/accept/connect on the same socket, which needs no event loop
//! and composes cleanly with `std::net`/`std::os::unix::net` blocking I/O,
//! the rest of the transport layer's I/O model.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Something that can be force-unblocked from an in-flight blocking
/// operation by shutting down its read/write halves.
pub trait Shutdownable: Send + Sync {
    fn shutdown(&self);
}

/// Cancels every blocking operation registered against it. A single token is
/// shared by every socket a given component (the I/O thread, the broker's
/// debuggee connection, ...) owns, matching §5's "single
/// `SocketCancellationToken`... wired into every blocking socket operation".
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    hooks: Mutex<Vec<(u64, Box<dyn FnOnce() + Send>)>>,
}

/// RAII guard returned by [`CancellationToken::guard`]; deregisters the
/// shutdown hook when the cancellable operation completes normally.
pub struct CancelGuard<'a> {
    token: &'a CancellationToken,
    id: u64,
    done: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut hooks = self.token.hooks.lock().unwrap();
            hooks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Registers `shutdown` as the hook to run if `cancel()` is called while
    /// the returned guard is alive. Returns `Err(Cancelled)` immediately if
    /// the token was already cancelled.
    pub fn guard<'a>(&'a self, shutdown: impl FnOnce() + Send + 'static) -> Result<CancelGuard<'a>> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.hooks.lock().unwrap().push((id, Box::new(shutdown)));

        // Re-check: cancel() may have run (and found an empty hook list)
        // between our is_cancelled() check and registering the hook.
        if self.is_cancelled() {
            let mut hooks = self.hooks.lock().unwrap();
            if let Some(pos) = hooks.iter().position(|(hid, _)| *hid == id) {
                let (_, hook) = hooks.remove(pos);
                drop(hooks);
                hook();
            }
            return Err(Error::Cancelled);
        }

        Ok(CancelGuard {
            token: self,
            id,
            done: false,
        })
    }

    /// Marks a guarded operation as finished without having been cancelled.
    pub fn finish(mut guard: CancelGuard<'_>) {
        guard.done = true;
        let mut hooks = guard.token.hooks.lock().unwrap();
        hooks.retain(|(id, _)| *id != guard.id);
    }

    /// Cancels every currently-registered operation. Idempotent: calling it
    /// twice, or with no operations registered, is a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap());
        for (_, hook) in hooks {
            hook();
        }
    }
}

/// Runs a blocking operation under cancellation: registers `shutdown` as the
/// unblock hook, runs `op`, and translates an `Err` that raced a concurrent
/// `cancel()` into `Error::Cancelled`, with the cancelled flag as the
/// tie-breaker between a racing cancel and a racing success.
pub fn run_cancellable<T>(
    token: &CancellationToken,
    shutdown: impl FnOnce() + Send + 'static,
    op: impl FnOnce() -> std::io::Result<T>,
) -> Result<T> {
    let guard = token.guard(shutdown)?;
    match op() {
        Ok(v) => {
            CancellationToken::finish(guard);
            Ok(v)
        }
        Err(e) => {
            let cancelled = token.is_cancelled();
            CancellationToken::finish(guard);
            if cancelled {
                Err(Error::Cancelled)
            } else {
                Err(Error::Io(e))
            }
        }
    }
}
