//! Seq-sequencing guard around the `dap` crate's own framing (§4.1).
//!
//! The `dap` crate already parses/writes the `Content-Length` header and the
//! JSON body for us; what it does not do is enforce that a client's request
//! `seq` values are monotonically increasing, which is an invariant §4.1
//! calls out explicitly. `SeqTracker` is that check, kept as a thin layer so
//! it applies equally to the stdio-facing server and to any future
//! socket-facing one.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{Error, Result};

/// Tracks the last incoming request `seq` seen on one connection.
#[derive(Default)]
pub struct SeqTracker {
    last_seen: AtomicI64,
}

impl SeqTracker {
    pub fn new() -> Self {
        Self {
            last_seen: AtomicI64::new(0),
        }
    }

    /// Validates that `seq` continues the sequence from the last call,
    /// updating the tracker on success. The very first message establishes
    /// the baseline rather than being checked against it.
    pub fn observe(&self, seq: i64) -> Result<()> {
        let last = self.last_seen.load(Ordering::SeqCst);
        if last != 0 && seq <= last {
            return Err(Error::OutOfSequence {
                expected: last + 1,
                got: seq,
            });
        }
        self.last_seen.store(seq, Ordering::SeqCst);
        Ok(())
    }
}
