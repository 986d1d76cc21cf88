//! Device error types.
//!
//! The storage engine only distinguishes two kinds of failure
//! (see [`ErrorKind`]); the variants keep the raw errno for diagnostics.

use std::fmt;

/// Coarse classification exposed to the block-device contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host or device I/O failure.
    Io,
    /// Operation not available on this device kind.
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Kernel lacks io_uring or the passthrough opcode.
    UringUnsupported,
    /// io_uring setup failed.
    RingSetup(i32),
    /// open(2) on the special file failed.
    Open(i32),
    /// fstat(2) on the special file failed.
    Stat(i32),
    /// Registering the fd with the ring failed.
    RegisterFiles(i32),
    /// No free submission queue entry (or in-flight slot).
    QueueExhausted,
    /// Path matched neither a block nor a character NVMe device.
    UnknownDeviceKind,
    /// Buffer length not described by the command (over 4 GiB, or the
    /// command was built for another buffer).
    BufferLength(usize),
    /// io_uring_enter() failed on submit.
    Submit(i32),
    /// Waiting on the completion queue failed.
    Wait(i32),
    /// The completion carried a negative errno.
    Completion(i32),
    /// A passthrough completion carried an NVMe status code.
    NvmeStatus(i32),
    /// Operation not implemented for this device kind.
    NotSupported(&'static str),
    /// Device already closed.
    Closed,
}

impl DeviceError {
    /// Map onto the two-kind contract of the block layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported(_) => ErrorKind::NotSupported,
            _ => ErrorKind::Io,
        }
    }

    #[inline]
    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::NotSupported
    }

    /// Raw errno carried by the variant, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::RingSetup(e)
            | Self::Open(e)
            | Self::Stat(e)
            | Self::RegisterFiles(e)
            | Self::Submit(e)
            | Self::Wait(e)
            | Self::Completion(e) => Some(*e),
            _ => None,
        }
    }

    /// Build from an `io::Error`, falling back to EIO when no errno is set.
    pub fn from_io(make: fn(i32) -> Self, err: &std::io::Error) -> Self {
        make(err.raw_os_error().unwrap_or(5))
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UringUnsupported => write!(f, "io_uring passthrough not supported"),
            Self::RingSetup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::Open(e) => write!(f, "device open: errno {}", e),
            Self::Stat(e) => write!(f, "device fstat: errno {}", e),
            Self::RegisterFiles(e) => write!(f, "io_uring register files: errno {}", e),
            Self::QueueExhausted => write!(f, "submission queue exhausted"),
            Self::UnknownDeviceKind => write!(f, "unknown device kind"),
            Self::BufferLength(len) => write!(f, "buffer of {} bytes does not match command", len),
            Self::Submit(e) => write!(f, "io_uring submit: errno {}", e),
            Self::Wait(e) => write!(f, "io_uring completion wait: errno {}", e),
            Self::Completion(e) => write!(f, "completion failed: errno {}", e),
            Self::NvmeStatus(s) => write!(f, "NVMe status {:#x}", s),
            Self::NotSupported(op) => write!(f, "{} not supported on this device", op),
            Self::Closed => write!(f, "device closed"),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type Result<T> = std::result::Result<T, DeviceError>;
