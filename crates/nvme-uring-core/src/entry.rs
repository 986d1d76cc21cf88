//! Submission and completion entry types.
//!
//! These are the ring-agnostic forms exchanged between the engine and a
//! [`CompletionRing`](crate::ring::CompletionRing). The io_uring
//! implementation translates them to SQE128 / CQE32.

use core::fmt;

/// Correlation handle of one in-flight request.
///
/// Low 32 bits index the in-flight slot table, high 32 bits carry the
/// issue sequence number so a stale completion can never match a reused
/// slot. Stored verbatim in the ring's `user_data`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const NONE: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(index: u32, seq: u32) -> Self {
        Self(((seq as u64) << 32) | index as u64)
    }

    #[inline]
    pub const fn from_user_data(data: u64) -> Self {
        Self(data)
    }

    #[inline]
    pub const fn user_data(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn seq(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "RequestId(NONE)")
        } else {
            write!(f, "RequestId({}#{})", self.index(), self.seq())
        }
    }
}

/// A submission queue entry, before translation to the ring's native format.
///
/// All entries target the device file registered with the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqEntry {
    /// Block fast path: pread into `addr`.
    Read {
        addr: u64,
        len: u32,
        offset: u64,
        user_data: u64,
    },
    /// Block fast path: pwrite from `addr`.
    Write {
        addr: u64,
        len: u32,
        offset: u64,
        user_data: u64,
    },
    /// `IORING_OP_URING_CMD` with an 80-byte command area.
    Passthrough {
        cmd_op: u32,
        cmd: [u8; 80],
        user_data: u64,
    },
}

impl SqEntry {
    #[inline]
    pub fn user_data(&self) -> u64 {
        match *self {
            SqEntry::Read { user_data, .. }
            | SqEntry::Write { user_data, .. }
            | SqEntry::Passthrough { user_data, .. } => user_data,
        }
    }

    #[inline]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, SqEntry::Passthrough { .. })
    }
}

/// A completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCompletion {
    /// The `user_data` of the submitted entry.
    pub user_data: u64,
    /// Bytes transferred, negative errno, or (passthrough) NVMe status.
    pub result: i32,
    /// Command dword 0/1 returned by the device (big CQE payload).
    pub payload: u64,
}
