//! Device special-file lifecycle.
//!
//! Open order: the caller sets up the ring first, then `DeviceHandle::open`
//! classifies the path, opens the file, reads geometry from fstat(2),
//! probes passthrough support for character devices and registers the
//! fd with the ring. Any failure unwinds what was done so far.

use std::os::unix::io::RawFd;

use nix::fcntl::{self, OFlag};
use nix::sys::stat::{fstat, Mode};
use nix::unistd;

use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::kind::DeviceKind;
use nvme_uring_core::ring::CompletionRing;
use nvme_uring_core::{kdebug, kerror, kwarn};

pub struct DeviceHandle {
    path: String,
    kind: DeviceKind,
    fd: Option<RawFd>,
    block_size: u64,
    size: u64,
}

impl DeviceHandle {
    pub fn open<R: CompletionRing>(path: &str, mode: OFlag, ring: &mut R) -> Result<Self> {
        let kind = DeviceKind::classify(path);

        let fd = fcntl::open(path, mode, Mode::from_bits_truncate(0o644)).map_err(|e| {
            kerror!("open {}: {} ({})", path, e as i32, e.desc());
            DeviceError::Open(e as i32)
        })?;

        // Closes the fd on the error paths below.
        let mut handle = Self {
            path: path.to_string(),
            kind,
            fd: Some(fd),
            block_size: 0,
            size: 0,
        };

        let st = fstat(fd).map_err(|e| {
            kerror!("fstat {}: {} ({})", path, e as i32, e.desc());
            DeviceError::Stat(e as i32)
        })?;
        if st.st_blksize <= 0 {
            kerror!("fstat {}: block size {}", path, st.st_blksize);
            return Err(DeviceError::Stat(libc::EINVAL));
        }
        handle.block_size = st.st_blksize as u64;
        handle.size = st.st_size.max(0) as u64;

        if kind == DeviceKind::Character && !ring.supports_passthrough() {
            kerror!("{}: kernel lacks IORING_OP_URING_CMD", path);
            return Err(DeviceError::UringUnsupported);
        }

        ring.register_file(fd).map_err(|e| {
            kerror!("{}: {}", path, e);
            e
        })?;

        kdebug!(
            "open {} kind {} fd {} block_size {} size {}",
            path,
            kind,
            fd,
            handle.block_size,
            handle.size
        );
        Ok(handle)
    }

    #[inline]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Close the fd. The ring must have dropped its registration first.
    /// Best-effort and idempotent.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            if let Err(e) = unistd::close(fd) {
                kwarn!("close {}: {} ({})", self.path, e as i32, e.desc());
            }
            kdebug!("closed {}", self.path);
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}
