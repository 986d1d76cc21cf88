//! Concrete devices and the open-time factory.
//!
//! | Kind      | Type          | read/write       | append        |
//! |-----------|---------------|------------------|---------------|
//! | Block     | `UringDevice` | fast path        | NotSupported  |
//! | Character | `ZonedDevice` | passthrough      | zone append   |
//! | Unknown   | `UringDevice` | IOError          | NotSupported  |
//!
//! [`Device::open`] picks the type from the path; callers that know the
//! kind can open a `UringDevice` or `ZonedDevice` directly.

use nix::fcntl::OFlag;

use nvme_uring_core::command::{CommandFactory, NvmeAdminCommand};
use nvme_uring_core::config::DeviceConfig;
use nvme_uring_core::device::{BlockDevice, BufResult};
use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::kind::DeviceKind;
use nvme_uring_core::ring::CompletionRing;
use nvme_uring_core::{kdebug, kerror, kinfo, ktrace};

use crate::engine::{Engine, EngineStats, Request};
use crate::handle::DeviceHandle;
use crate::passthrough::PassthroughEncoder;
use crate::uring_ring::IoUringRing;
use crate::zoned::ZonedDevice;

/// Device driven through one io_uring ring.
pub struct UringDevice<R: CompletionRing = IoUringRing> {
    // Declared before `handle`: the ring goes before the fd closes.
    engine: Engine<R>,
    handle: DeviceHandle,
    factory: CommandFactory,
}

impl UringDevice<IoUringRing> {
    /// Open with configuration from the environment.
    pub fn open(path: &str, mode: OFlag) -> Result<Self> {
        Self::open_with(path, mode, DeviceConfig::from_env())
    }

    pub fn open_with(path: &str, mode: OFlag, config: DeviceConfig) -> Result<Self> {
        let ring = IoUringRing::new(&config).map_err(|e| {
            kerror!("open {}: {}", path, e);
            e
        })?;
        Self::open_with_ring(path, mode, config, ring)
    }
}

impl<R: CompletionRing> UringDevice<R> {
    /// Open on an already set-up ring.
    pub fn open_with_ring(path: &str, mode: OFlag, config: DeviceConfig, mut ring: R) -> Result<Self> {
        let handle = DeviceHandle::open(path, mode, &mut ring)?;
        let factory = CommandFactory::new(handle.block_size(), config.nsid, config.polling);
        let engine = Engine::new(
            ring,
            PassthroughEncoder::new(config.passthrough_abi),
            config.polling,
        );
        kinfo!(
            "opened {} kind {} block size {} size {}",
            path,
            handle.kind(),
            handle.block_size(),
            handle.size()
        );
        Ok(Self {
            engine,
            handle,
            factory,
        })
    }

    #[inline]
    pub fn factory(&self) -> &CommandFactory {
        &self.factory
    }

    pub fn path(&self) -> &str {
        self.handle.path()
    }

    pub fn is_polling(&self) -> bool {
        self.engine.is_polling()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Route completions already posted, e.g. for abandoned requests.
    pub fn reap(&self) -> usize {
        self.engine.drain()
    }

    pub(crate) async fn run(&self, request: Request) -> BufResult<u64> {
        if !self.handle.is_open() {
            return (Err(DeviceError::Closed), request.buffer);
        }
        self.engine.submit(request).await
    }

    /// Wait out in-flight commands, tear down the ring, close the fd.
    pub(crate) fn close_device(&mut self) {
        if !self.handle.is_open() {
            return;
        }
        self.engine.shutdown();
        self.handle.close();
    }
}

impl<R: CompletionRing> BlockDevice for UringDevice<R> {
    fn kind(&self) -> DeviceKind {
        self.handle.kind()
    }

    fn block_size(&self) -> u64 {
        self.handle.block_size()
    }

    fn size(&self) -> u64 {
        self.handle.size()
    }

    async fn read(&self, offset: u64, buf: Vec<u8>) -> BufResult<()> {
        let command = self.factory.read(offset, &buf);
        let request = Request {
            command,
            offset,
            buffer: buf,
            kind: self.kind(),
        };
        let (result, buf) = self.run(request).await;
        (result.map(|_| ()), buf)
    }

    async fn write(&self, offset: u64, buf: Vec<u8>, stream: u16) -> BufResult<()> {
        ktrace!("write offset {} len {} stream {}", offset, buf.len(), stream);
        let command = self.factory.write(offset, &buf);
        let request = Request {
            command,
            offset,
            buffer: buf,
            kind: self.kind(),
        };
        let (result, buf) = self.run(request).await;
        (result.map(|_| ()), buf)
    }

    async fn append(&self, zone: u32, buf: Vec<u8>) -> BufResult<u64> {
        kerror!("append zone {} on {} device {}", zone, self.kind(), self.path());
        (Err(DeviceError::NotSupported("append")), buf)
    }

    async fn discard(&self, offset: u64, len: u64) -> Result<()> {
        ktrace!("discard offset {} len {}: no-op", offset, len);
        Ok(())
    }

    async fn pass_admin(&self, cmd: &NvmeAdminCommand) -> Result<i32> {
        match self.kind() {
            DeviceKind::Unknown => Err(DeviceError::NotSupported("admin passthrough")),
            kind => {
                kdebug!("admin opcode {:#x} on {} device: not executed", cmd.opcode, kind);
                Ok(1)
            }
        }
    }

    fn close(&mut self) {
        self.close_device();
    }
}

impl<R: CompletionRing> Drop for UringDevice<R> {
    fn drop(&mut self) {
        self.close_device();
    }
}

/// Device selected by kind at open time.
pub enum Device<R: CompletionRing = IoUringRing> {
    Uring(UringDevice<R>),
    Zoned(ZonedDevice<R>),
}

impl Device<IoUringRing> {
    pub fn open(path: &str, mode: OFlag) -> Result<Self> {
        Self::open_with(path, mode, DeviceConfig::from_env())
    }

    pub fn open_with(path: &str, mode: OFlag, config: DeviceConfig) -> Result<Self> {
        Ok(Self::select(UringDevice::open_with(path, mode, config)?))
    }
}

impl<R: CompletionRing> Device<R> {
    pub fn open_with_ring(path: &str, mode: OFlag, config: DeviceConfig, ring: R) -> Result<Self> {
        Ok(Self::select(UringDevice::open_with_ring(path, mode, config, ring)?))
    }

    fn select(dev: UringDevice<R>) -> Self {
        match dev.kind() {
            DeviceKind::Character => Device::Zoned(ZonedDevice::from_device(dev)),
            _ => Device::Uring(dev),
        }
    }

    pub fn as_uring(&self) -> &UringDevice<R> {
        match self {
            Device::Uring(dev) => dev,
            Device::Zoned(dev) => dev.inner(),
        }
    }

    pub fn as_zoned(&self) -> Option<&ZonedDevice<R>> {
        match self {
            Device::Zoned(dev) => Some(dev),
            Device::Uring(_) => None,
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.as_uring().stats()
    }
}

impl<R: CompletionRing> BlockDevice for Device<R> {
    fn kind(&self) -> DeviceKind {
        self.as_uring().kind()
    }

    fn block_size(&self) -> u64 {
        self.as_uring().block_size()
    }

    fn size(&self) -> u64 {
        self.as_uring().size()
    }

    async fn read(&self, offset: u64, buf: Vec<u8>) -> BufResult<()> {
        match self {
            Device::Uring(dev) => dev.read(offset, buf).await,
            Device::Zoned(dev) => dev.read(offset, buf).await,
        }
    }

    async fn write(&self, offset: u64, buf: Vec<u8>, stream: u16) -> BufResult<()> {
        match self {
            Device::Uring(dev) => dev.write(offset, buf, stream).await,
            Device::Zoned(dev) => dev.write(offset, buf, stream).await,
        }
    }

    async fn append(&self, zone: u32, buf: Vec<u8>) -> BufResult<u64> {
        match self {
            Device::Uring(dev) => dev.append(zone, buf).await,
            Device::Zoned(dev) => dev.append(zone, buf).await,
        }
    }

    async fn discard(&self, offset: u64, len: u64) -> Result<()> {
        self.as_uring().discard(offset, len).await
    }

    async fn pass_admin(&self, cmd: &NvmeAdminCommand) -> Result<i32> {
        self.as_uring().pass_admin(cmd).await
    }

    fn close(&mut self) {
        match self {
            Device::Uring(dev) => dev.close(),
            Device::Zoned(dev) => dev.close(),
        }
    }
}
