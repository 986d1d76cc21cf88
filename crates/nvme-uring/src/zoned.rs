//! Zoned namespace device.
//!
//! Adds Zone Append on top of [`UringDevice`]: the host names the zone,
//! the device picks the landing LBA and reports it in the completion.
//! Reads and writes go through the same passthrough path. Write pointer
//! and zone state tracking belong to the caller.

use nix::fcntl::OFlag;

use nvme_uring_core::command::NvmeAdminCommand;
use nvme_uring_core::config::DeviceConfig;
use nvme_uring_core::constants::ZONE_SIZE;
use nvme_uring_core::device::{BlockDevice, BufResult};
use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::kind::DeviceKind;
use nvme_uring_core::ring::CompletionRing;
use nvme_uring_core::{kerror, ktrace};

use crate::device::UringDevice;
use crate::engine::Request;
use crate::uring_ring::IoUringRing;

pub struct ZonedDevice<R: CompletionRing = IoUringRing> {
    inner: UringDevice<R>,
}

impl ZonedDevice<IoUringRing> {
    pub fn open(path: &str, mode: OFlag) -> Result<Self> {
        Ok(Self::from_device(UringDevice::open(path, mode)?))
    }

    pub fn open_with(path: &str, mode: OFlag, config: DeviceConfig) -> Result<Self> {
        Ok(Self::from_device(UringDevice::open_with(path, mode, config)?))
    }
}

impl<R: CompletionRing> ZonedDevice<R> {
    pub fn open_with_ring(path: &str, mode: OFlag, config: DeviceConfig, ring: R) -> Result<Self> {
        Ok(Self::from_device(UringDevice::open_with_ring(
            path, mode, config, ring,
        )?))
    }

    pub fn from_device(inner: UringDevice<R>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &UringDevice<R> {
        &self.inner
    }

    /// Whole zones on the namespace.
    pub fn zone_count(&self) -> u64 {
        self.inner.size() / ZONE_SIZE
    }

    #[inline]
    pub fn zone_start_lba(&self, zone: u32) -> u64 {
        self.inner.factory().zone_start_lba(zone)
    }
}

impl<R: CompletionRing> BlockDevice for ZonedDevice<R> {
    fn kind(&self) -> DeviceKind {
        self.inner.kind()
    }

    fn block_size(&self) -> u64 {
        self.inner.block_size()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    async fn read(&self, offset: u64, buf: Vec<u8>) -> BufResult<()> {
        self.inner.read(offset, buf).await
    }

    async fn write(&self, offset: u64, buf: Vec<u8>, stream: u16) -> BufResult<()> {
        self.inner.write(offset, buf, stream).await
    }

    async fn append(&self, zone: u32, buf: Vec<u8>) -> BufResult<u64> {
        if !self.kind().is_zoned_capable() {
            kerror!("append zone {} on {} device {}", zone, self.kind(), self.inner.path());
            return (Err(DeviceError::NotSupported("append")), buf);
        }
        let command = self.inner.factory().append(zone, &buf);
        ktrace!("append zone {} slba {} len {}", zone, command.slba, buf.len());
        let request = Request {
            command,
            offset: command.slba * self.block_size(),
            buffer: buf,
            kind: DeviceKind::Character,
        };
        self.inner.run(request).await
    }

    async fn discard(&self, offset: u64, len: u64) -> Result<()> {
        self.inner.discard(offset, len).await
    }

    async fn pass_admin(&self, cmd: &NvmeAdminCommand) -> Result<i32> {
        self.inner.pass_admin(cmd).await
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
