//! `IoUringRing`: io_uring implementation of `CompletionRing`.
//!
//! Big entries (SQE128 / CQE32) so passthrough commands fit inline and
//! the device's result dwords come back in the completion. Every entry
//! targets fixed file slot 0; `register_file()` must run before `push()`.
//!
//! Ring setup flags follow `DeviceConfig`: IOPOLL in polling mode,
//! SQPOLL when an idle time is configured.

use io_uring::{cqueue, opcode, squeue, types, IoUring, Probe};

use nvme_uring_core::config::DeviceConfig;
use nvme_uring_core::constants::QUEUE_DEPTH;
use nvme_uring_core::entry::{RingCompletion, SqEntry};
use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::ring::CompletionRing;
use nvme_uring_core::{kdebug, kwarn};

use std::os::unix::io::{AsRawFd, RawFd};

pub struct IoUringRing {
    ring: IoUring<squeue::Entry128, cqueue::Entry32>,
    depth: u32,
    registered: bool,
}

impl IoUringRing {
    /// Set up a ring of `QUEUE_DEPTH` entries.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        Self::with_depth(QUEUE_DEPTH, config)
    }

    pub fn with_depth(depth: u32, config: &DeviceConfig) -> Result<Self> {
        let mut builder = IoUring::<squeue::Entry128, cqueue::Entry32>::builder();
        if config.polling {
            builder.setup_iopoll();
        }
        if let Some(idle) = config.sqpoll_idle_ms {
            builder.setup_sqpoll(idle);
        }

        let ring = builder.build(depth).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOSYS) => DeviceError::UringUnsupported,
            _ => DeviceError::from_io(DeviceError::RingSetup, &e),
        })?;

        kdebug!(
            "ring fd {} depth {} iopoll {} sqpoll {:?}",
            ring.as_raw_fd(),
            depth,
            config.polling,
            config.sqpoll_idle_ms
        );

        Ok(Self {
            ring,
            depth,
            registered: false,
        })
    }

    /// The io_uring fd.
    pub fn fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    fn build(entry: &SqEntry) -> squeue::Entry128 {
        let target = types::Fixed(0);
        match *entry {
            SqEntry::Read {
                addr,
                len,
                offset,
                user_data,
            } => squeue::Entry128::from(
                opcode::Read::new(target, addr as *mut u8, len)
                    .offset(offset)
                    .build(),
            )
            .user_data(user_data),
            SqEntry::Write {
                addr,
                len,
                offset,
                user_data,
            } => squeue::Entry128::from(
                opcode::Write::new(target, addr as *const u8, len)
                    .offset(offset)
                    .build(),
            )
            .user_data(user_data),
            SqEntry::Passthrough {
                cmd_op,
                cmd,
                user_data,
            } => opcode::UringCmd80::new(target, cmd_op)
                .cmd(cmd)
                .build()
                .user_data(user_data),
        }
    }

    fn convert(cqe: &cqueue::Entry32) -> RingCompletion {
        RingCompletion {
            user_data: cqe.user_data(),
            result: cqe.result(),
            payload: cqe.big_cqe()[0],
        }
    }
}

impl CompletionRing for IoUringRing {
    fn register_file(&mut self, fd: RawFd) -> Result<()> {
        self.ring
            .submitter()
            .register_files(&[fd])
            .map_err(|e| DeviceError::from_io(DeviceError::RegisterFiles, &e))?;
        self.registered = true;
        Ok(())
    }

    fn unregister_files(&mut self) {
        if !self.registered {
            return;
        }
        if let Err(e) = self.ring.submitter().unregister_files() {
            kwarn!("unregister files: {}", e);
        }
        self.registered = false;
    }

    fn supports_passthrough(&mut self) -> bool {
        let mut probe = Probe::new();
        self.ring.submitter().register_probe(&mut probe).is_ok()
            && probe.is_supported(opcode::UringCmd80::CODE)
    }

    fn has_free_entry(&mut self) -> bool {
        !self.ring.submission().is_full()
    }

    fn push(&mut self, entry: &SqEntry) -> Result<()> {
        if !self.registered {
            return Err(DeviceError::RegisterFiles(libc::EBADF));
        }
        let sqe = Self::build(entry);
        // Safety: buffers referenced by the entry are owned by the
        // in-flight table until the matching completion is routed.
        unsafe {
            self.ring
                .submission()
                .push(&sqe)
                .map_err(|_| DeviceError::QueueExhausted)?;
        }
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        self.ring
            .submit()
            .map_err(|e| DeviceError::from_io(DeviceError::Submit, &e))
    }

    fn peek_completion(&mut self) -> Result<Option<RingCompletion>> {
        Ok(self.ring.completion().next().map(|cqe| Self::convert(&cqe)))
    }

    fn wait_completion(&mut self) -> Result<RingCompletion> {
        loop {
            if let Some(cqe) = self.ring.completion().next() {
                return Ok(Self::convert(&cqe));
            }
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => return Err(DeviceError::from_io(DeviceError::Wait, &e)),
            }
        }
    }

    fn depth(&self) -> u32 {
        self.depth
    }
}
