//! # nvme-uring-core: Types and traits for the NVMe io_uring backend
//!
//! This crate defines everything that does not touch the kernel:
//! command descriptors and their construction, the submission/completion
//! ring contract, the in-flight request table, the block-device contract
//! consumed by the storage engine, configuration and logging.
//!
//! The kernel-facing implementations live in `nvme-uring`.
//!
//! ## Modules
//!
//! - `error` - Error types
//! - `kind` - Path-based device kind classification
//! - `command` - NVMe command descriptors and `CommandFactory`
//! - `entry` - Request ids, submission and completion entries
//! - `ring` - `CompletionRing` trait
//! - `inflight` - Slot table of in-flight request records
//! - `device` - `BlockDevice` contract
//! - `config` - Device configuration with environment overrides
//! - `env` - Environment variable utilities
//! - `kprint` - Kernel-style debug printing macros

pub mod error;
pub mod kind;
pub mod command;
pub mod entry;
pub mod ring;
pub mod inflight;
pub mod device;
pub mod config;
pub mod env;
pub mod kprint;

// Re-exports for convenience
pub use error::{DeviceError, ErrorKind, Result};
pub use kind::DeviceKind;
pub use command::{CommandFactory, NvmeAdminCommand, NvmeIoCommand, Opcode};
pub use entry::{RequestId, RingCompletion, SqEntry};
pub use ring::CompletionRing;
pub use inflight::{InflightRecord, InflightStats, InflightTable};
pub use device::{BlockDevice, BufResult};
pub use config::{DeviceConfig, PassthroughAbi};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};

/// Fixed constants shared by every open device.
pub mod constants {
    /// Submission queue depth of every ring.
    pub const QUEUE_DEPTH: u32 = 1024;

    /// Size of every zone on a zoned namespace (96 MiB).
    pub const ZONE_SIZE: u64 = 96 * 1024 * 1024;

    /// Default namespace id.
    pub const DEFAULT_NSID: u32 = 1;
}
