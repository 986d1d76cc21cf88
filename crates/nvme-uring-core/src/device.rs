//! Block-device contract consumed by the storage engine.
//!
//! Buffers are passed by value and handed back with the result, so the
//! backend owns the memory for as long as the device may touch it.
//!
//! # Implementors
//!
//! - `UringDevice` (nvme-uring): block and unclassified devices.
//! - `ZonedDevice` (nvme-uring): NVMe generic character devices, adds append.
//! - `Device` (nvme-uring): the kind chosen by the open-time factory.

use crate::command::NvmeAdminCommand;
use crate::error::Result;
use crate::kind::DeviceKind;

/// Result of a buffer-carrying operation plus the buffer itself.
pub type BufResult<T> = (Result<T>, Vec<u8>);

/// Asynchronous block-device operations.
///
/// Futures returned here are driven by a single-threaded scheduler and
/// suspend while the device works; they never block the thread except
/// in polling mode.
#[allow(async_fn_in_trait)]
pub trait BlockDevice {
    fn kind(&self) -> DeviceKind;

    /// Logical block size in bytes. Always non-zero.
    fn block_size(&self) -> u64;

    /// Device size in bytes.
    fn size(&self) -> u64;

    /// Read `buf.len()` bytes at `offset` into `buf`.
    async fn read(&self, offset: u64, buf: Vec<u8>) -> BufResult<()>;

    /// Write `buf` at `offset`. `stream` is a placement hint.
    async fn write(&self, offset: u64, buf: Vec<u8>, stream: u16) -> BufResult<()>;

    /// Append `buf` to `zone`; returns the LBA the device chose.
    async fn append(&self, zone: u32, buf: Vec<u8>) -> BufResult<u64>;

    /// Deallocate a range. No-op on this backend.
    async fn discard(&self, offset: u64, len: u64) -> Result<()>;

    /// Admin passthrough. Placeholder on this backend.
    async fn pass_admin(&self, cmd: &NvmeAdminCommand) -> Result<i32>;

    /// Release the device. Best-effort and idempotent.
    fn close(&mut self);
}
