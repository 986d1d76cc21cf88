//! # nvme-uring: io_uring NVMe raw-device backend
//!
//! Drives an NVMe namespace through one io_uring ring: the regular
//! read/write fast path for block devices (`/dev/nvme<X>n<Y>`) and
//! `IORING_OP_URING_CMD` passthrough for generic character devices
//! (`/dev/ng<X>n<Y>`), including Zone Append.
//!
//! ## Stack
//!
//! | Layer        | Type                  | Module        |
//! |--------------|-----------------------|---------------|
//! | Ring         | `IoUringRing`         | `uring_ring`  |
//! | Encoding     | `PassthroughEncoder`  | `passthrough` |
//! | Correlation  | `Engine`/`Submission` | `engine`      |
//! | Lifecycle    | `DeviceHandle`        | `handle`      |
//! | Devices      | `UringDevice`         | `device`      |
//! | Zoned        | `ZonedDevice`         | `zoned`       |
//!
//! ```rust,ignore
//! use nix::fcntl::OFlag;
//! use nvme_uring::{BlockDevice, Device};
//!
//! let dev = Device::open("/dev/ng0n1", OFlag::O_RDWR)?;
//! let (lba, _buf) = dev.append(3, vec![0u8; 4096]).await;
//! ```

pub mod uring_ring;
pub mod passthrough;
pub mod engine;
pub mod handle;
pub mod device;
pub mod zoned;

#[cfg(test)]
pub(crate) mod fake_ring;

pub use device::{Device, UringDevice};
pub use engine::{Engine, EngineStats, Request, Submission};
pub use handle::DeviceHandle;
pub use passthrough::{NvmeUringCmd, PassthroughEncoder};
pub use uring_ring::IoUringRing;
pub use zoned::ZonedDevice;

pub use nvme_uring_core::{
    BlockDevice, BufResult, CommandFactory, DeviceConfig, DeviceError, DeviceKind, ErrorKind,
    NvmeAdminCommand, NvmeIoCommand, Opcode, PassthroughAbi, Result,
};
