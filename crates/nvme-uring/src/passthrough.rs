//! NVMe passthrough encoding for `IORING_OP_URING_CMD`.
//!
//! Mirrors the kernel's `linux/nvme_ioctl.h`. A command is laid out as
//! `struct nvme_uring_cmd` and carried inline in the 80-byte command area
//! of a big (SQE128) submission entry, addressed to the registered fd.
//!
//! `nvme_passthru_cmd`, `nvme_passthru_cmd64` and `nvme_uring_cmd` share
//! their first 68 bytes; the tail only holds output fields, which are
//! left zeroed here, so one encoding serves every ABI.

use nvme_uring_core::command::NvmeIoCommand;
use nvme_uring_core::config::PassthroughAbi;
use nvme_uring_core::entry::{RequestId, SqEntry};
use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::ktrace;

// ── ioctl ──

const NVME_IOC_MAGIC: u8 = b'N';

/// Size of `struct nvme_passthru_cmd64`.
const NVME_PASSTHRU_CMD64_SIZE: usize = 80;

/// `flags` bit marking the first command of a fused pair.
pub const NVME_CMD_FUSE_FIRST: u8 = 0x01;

/// Kernel's `struct nvme_uring_cmd` (72 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmeUringCmd {
    pub opcode: u8,
    pub flags: u8,
    pub rsvd1: u16,
    pub nsid: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub metadata: u64,
    pub addr: u64,
    pub metadata_len: u32,
    pub data_len: u32,
    /// SLBA low 32 bits.
    pub cdw10: u32,
    /// SLBA high 32 bits.
    pub cdw11: u32,
    /// NLB, zero-based.
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
    pub timeout_ms: u32,
    pub rsvd2: u32,
}

const _: () = assert!(std::mem::size_of::<NvmeUringCmd>() == 72);
const _: () = assert!(std::mem::size_of::<NvmeUringCmd>() <= 80);

impl NvmeUringCmd {
    /// Serialize into the SQE128 command area.
    pub fn to_bytes(&self) -> [u8; 80] {
        let mut buf = [0u8; 80];
        // Safety: repr(C), 72 bytes, fits in 80.
        unsafe {
            buf.as_mut_ptr().cast::<NvmeUringCmd>().write_unaligned(*self);
        }
        buf
    }

    /// Read back a command serialized by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(buf: &[u8; 80]) -> Self {
        // Safety: any bit pattern is a valid NvmeUringCmd.
        unsafe { buf.as_ptr().cast::<NvmeUringCmd>().read_unaligned() }
    }

    #[inline]
    pub fn slba(&self) -> u64 {
        ((self.cdw11 as u64) << 32) | self.cdw10 as u64
    }

    #[inline]
    pub fn is_fused(&self) -> bool {
        self.flags & NVME_CMD_FUSE_FIRST != 0
    }
}

impl From<&NvmeIoCommand> for NvmeUringCmd {
    fn from(cmd: &NvmeIoCommand) -> Self {
        Self {
            opcode: cmd.opcode.nvm_code().unwrap_or(0),
            flags: if cmd.fused { NVME_CMD_FUSE_FIRST } else { 0 },
            nsid: cmd.nsid,
            addr: cmd.addr,
            data_len: cmd.data_len,
            cdw10: cmd.slba as u32,
            cdw11: (cmd.slba >> 32) as u32,
            cdw12: cmd.nlb as u32,
            ..Default::default()
        }
    }
}

/// ioctl command code placed in the entry's `cmd_op` for `abi`.
pub fn cmd_op(abi: PassthroughAbi) -> u32 {
    let code = match abi {
        // _IOWR('N', 0x80, struct nvme_uring_cmd)
        PassthroughAbi::Uring => nix::request_code_readwrite!(
            NVME_IOC_MAGIC,
            0x80,
            std::mem::size_of::<NvmeUringCmd>()
        ),
        // _IOWR('N', 0x48, struct nvme_passthru_cmd64)
        PassthroughAbi::Io64 => {
            nix::request_code_readwrite!(NVME_IOC_MAGIC, 0x48, NVME_PASSTHRU_CMD64_SIZE)
        }
        // _IOWR('N', 0x43, struct nvme_passthru_cmd)
        PassthroughAbi::Io => nix::request_code_readwrite!(
            NVME_IOC_MAGIC,
            0x43,
            std::mem::size_of::<NvmeUringCmd>()
        ),
    };
    code as u32
}

/// Encodes I/O commands into passthrough submission entries.
///
/// Only encodes; the engine pushes and submits.
#[derive(Debug, Clone, Copy)]
pub struct PassthroughEncoder {
    cmd_op: u32,
}

impl PassthroughEncoder {
    pub fn new(abi: PassthroughAbi) -> Self {
        Self {
            cmd_op: cmd_op(abi),
        }
    }

    #[inline]
    pub fn cmd_op(&self) -> u32 {
        self.cmd_op
    }

    /// Build the entry for `cmd`, correlated by `id`.
    pub fn encode(&self, cmd: &NvmeIoCommand, id: RequestId) -> Result<SqEntry> {
        if cmd.opcode.nvm_code().is_none() {
            return Err(DeviceError::NotSupported("admin passthrough"));
        }
        let nvme = NvmeUringCmd::from(cmd);
        ktrace!(
            "encode {} {:?} slba {} len {} flags {:#x} cmd_op {:#x}",
            cmd.opcode.name(),
            id,
            cmd.slba,
            cmd.data_len,
            nvme.flags,
            self.cmd_op
        );
        Ok(SqEntry::Passthrough {
            cmd_op: self.cmd_op,
            cmd: nvme.to_bytes(),
            user_data: id.user_data(),
        })
    }
}

impl Default for PassthroughEncoder {
    fn default() -> Self {
        Self::new(PassthroughAbi::default())
    }
}
