//! NVMe command descriptors and their construction.
//!
//! [`NvmeIoCommand`] is the host-side view of an NVM command set entry:
//! plain `Copy` data handed by value from the factory to the encoder.
//! [`CommandFactory`] is pure: no I/O and no shared state.

use crate::constants::{DEFAULT_NSID, ZONE_SIZE};

/// NVMe command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Opcode {
    #[default]
    Read,
    Write,
    /// Zone Append (ZNS command set).
    Append,
    /// Admin command; travels through `pass_admin`, never the I/O queue.
    PassthroughAdmin,
}

impl Opcode {
    /// NVM command set opcode byte. `None` for admin commands.
    pub const fn nvm_code(self) -> Option<u8> {
        match self {
            Opcode::Write => Some(0x01),
            Opcode::Read => Some(0x02),
            Opcode::Append => Some(0x7d),
            Opcode::PassthroughAdmin => None,
        }
    }

    pub const fn from_nvm_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Opcode::Write),
            0x02 => Some(Opcode::Read),
            0x7d => Some(Opcode::Append),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Read => "read",
            Opcode::Write => "write",
            Opcode::Append => "append",
            Opcode::PassthroughAdmin => "admin",
        }
    }
}

/// An NVMe I/O command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NvmeIoCommand {
    pub opcode: Opcode,
    /// Namespace id.
    pub nsid: u32,
    /// Starting logical block address.
    pub slba: u64,
    /// Number of logical blocks, zero-based (0 = one block).
    pub nlb: u16,
    /// First command of a fused pair.
    pub fused: bool,
    /// Userspace address of the data buffer.
    pub addr: u64,
    /// Data length in bytes.
    pub data_len: u32,
    /// Command-specific result (Zone Append: assigned LBA).
    pub result: u64,
}

impl NvmeIoCommand {
    /// A zeroed command with only the opcode and namespace set.
    pub fn new(opcode: Opcode, nsid: u32) -> Self {
        Self {
            opcode,
            nsid,
            ..Default::default()
        }
    }

    /// Point the command at `buf`.
    ///
    /// Buffers past `u32::MAX` bytes saturate `data_len`, which the engine
    /// then rejects as a length mismatch.
    #[inline]
    pub fn with_buffer(mut self, buf: &[u8]) -> Self {
        self.addr = buf.as_ptr() as u64;
        self.data_len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        self
    }

    /// Whether `data_len` covers exactly `len` bytes.
    #[inline]
    pub fn covers(&self, len: usize) -> bool {
        self.data_len as usize == len
    }
}

/// An NVMe admin command.
///
/// Accepted by `pass_admin` but not executed by this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NvmeAdminCommand {
    pub opcode: u8,
    pub nsid: u32,
    pub addr: u64,
    pub data_len: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
    pub timeout_ms: u32,
}

/// Builds I/O commands for one device geometry.
#[derive(Debug, Clone, Copy)]
pub struct CommandFactory {
    block_size: u64,
    nsid: u32,
    polling: bool,
}

impl CommandFactory {
    /// `block_size` must be non-zero; the device handle guarantees it.
    pub fn new(block_size: u64, nsid: u32, polling: bool) -> Self {
        debug_assert!(block_size > 0, "block size must be non-zero");
        Self {
            block_size,
            nsid,
            polling,
        }
    }

    /// Factory for namespace 1 without polling.
    pub fn with_block_size(block_size: u64) -> Self {
        Self::new(block_size, DEFAULT_NSID, false)
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[inline]
    pub fn nsid(&self) -> u32 {
        self.nsid
    }

    /// LBA containing byte `offset`.
    #[inline]
    pub fn lba_of(&self, offset: u64) -> u64 {
        offset / self.block_size
    }

    /// Starting LBA of `zone`.
    #[inline]
    pub fn zone_start_lba(&self, zone: u32) -> u64 {
        (zone as u64 * ZONE_SIZE) / self.block_size
    }

    pub fn read(&self, offset: u64, buf: &[u8]) -> NvmeIoCommand {
        self.rw(Opcode::Read, offset, buf)
    }

    pub fn write(&self, offset: u64, buf: &[u8]) -> NvmeIoCommand {
        self.rw(Opcode::Write, offset, buf)
    }

    /// Zone Append targeting the start LBA of `zone`.
    ///
    /// Never fused: the zoned path ignores the polling-mode fuse bit.
    pub fn append(&self, zone: u32, buf: &[u8]) -> NvmeIoCommand {
        let mut cmd = NvmeIoCommand::new(Opcode::Append, self.nsid).with_buffer(buf);
        cmd.slba = self.zone_start_lba(zone);
        cmd
    }

    fn rw(&self, opcode: Opcode, offset: u64, buf: &[u8]) -> NvmeIoCommand {
        let mut cmd = NvmeIoCommand::new(opcode, self.nsid).with_buffer(buf);
        cmd.slba = self.lba_of(offset);
        cmd.nlb = 0; // zero-based
        cmd.fused = self.polling;
        cmd
    }
}
