//! Submission/completion ring abstraction.
//!
//! A `CompletionRing` owns one kernel ring pair. The engine drives it:
//! check for a free entry, push, submit, then peek (or wait) for
//! completions and route them by `user_data`.
//!
//! # Implementors
//!
//! - `IoUringRing` (nvme-uring): io_uring with SQE128/CQE32 entries so
//!   NVMe passthrough commands and their dword results fit.
//! - `FakeRing` (nvme-uring, tests only): in-memory emulated device with
//!   instrumentation and controllable completion order.
//!
//! **Contract:** nothing here may block except `wait_completion()`, which
//! is only called when the device runs in polling mode.

use std::os::unix::io::RawFd;

use crate::entry::{RingCompletion, SqEntry};
use crate::error::Result;

pub trait CompletionRing {
    /// Register the device fd; subsequent entries target fixed slot 0.
    fn register_file(&mut self, fd: RawFd) -> Result<()>;

    /// Drop the file registration. Best-effort.
    fn unregister_files(&mut self);

    /// Whether the kernel accepts `IORING_OP_URING_CMD` on this ring.
    fn supports_passthrough(&mut self) -> bool;

    /// Whether a submission queue entry is free. Must not mutate the ring.
    fn has_free_entry(&mut self) -> bool;

    /// Queue one entry. Not visible to the kernel until `submit()`.
    fn push(&mut self, entry: &SqEntry) -> Result<()>;

    /// Hand queued entries to the kernel. Returns how many were consumed.
    fn submit(&mut self) -> Result<usize>;

    /// Pop one completion without blocking. `Ok(None)` if the CQ is empty.
    fn peek_completion(&mut self) -> Result<Option<RingCompletion>>;

    /// Block until one completion is available and pop it.
    fn wait_completion(&mut self) -> Result<RingCompletion>;

    /// Submission queue depth.
    fn depth(&self) -> u32;
}
