//! Device configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use nvme_uring_core::config::DeviceConfig;
//!
//! let config = DeviceConfig::from_env().polling(true);
//! ```

use crate::constants::DEFAULT_NSID;
use crate::env::{env_get, env_get_bool, env_get_opt, env_get_str};

/// Which ioctl command code passthrough entries carry.
///
/// Kernels that accept `IORING_OP_URING_CMD` on NVMe generic devices expect
/// `NVME_URING_CMD_IO`; the ioctl-era codes are kept for patched kernels
/// that route the classic passthrough ioctls through the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassthroughAbi {
    /// `NVME_URING_CMD_IO` (struct nvme_uring_cmd)
    #[default]
    Uring,
    /// `NVME_IOCTL_IO64_CMD` (struct nvme_passthru_cmd64)
    Io64,
    /// `NVME_IOCTL_IO_CMD` (struct nvme_passthru_cmd)
    Io,
}

impl PassthroughAbi {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "uring" => Some(PassthroughAbi::Uring),
            "io64" => Some(PassthroughAbi::Io64),
            "io" => Some(PassthroughAbi::Io),
            _ => None,
        }
    }
}

/// Per-open device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// IOPOLL ring, fused read/write, blocking completion wait.
    pub polling: bool,
    /// SQPOLL kernel submission thread idle time, if enabled.
    pub sqpoll_idle_ms: Option<u32>,
    /// Namespace id placed in every command.
    pub nsid: u32,
    pub passthrough_abi: PassthroughAbi,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            polling: false,
            sqpoll_idle_ms: None,
            nsid: DEFAULT_NSID,
            passthrough_abi: PassthroughAbi::Uring,
        }
    }
}

impl DeviceConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NVME_IOPOLL` - Polling mode (0/1)
    /// - `NVME_SQPOLL_IDLE_MS` - Enable SQPOLL with this idle time
    /// - `NVME_NSID` - Namespace id
    /// - `NVME_PASSTHRU_ABI` - uring | io64 | io
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            polling: env_get_bool("NVME_IOPOLL", defaults.polling),
            sqpoll_idle_ms: env_get_opt("NVME_SQPOLL_IDLE_MS"),
            nsid: env_get("NVME_NSID", defaults.nsid),
            passthrough_abi: PassthroughAbi::parse(&env_get_str("NVME_PASSTHRU_ABI", "uring"))
                .unwrap_or(defaults.passthrough_abi),
        }
    }

    pub fn polling(mut self, enabled: bool) -> Self {
        self.polling = enabled;
        self
    }

    pub fn sqpoll(mut self, idle_ms: Option<u32>) -> Self {
        self.sqpoll_idle_ms = idle_ms;
        self
    }

    pub fn nsid(mut self, nsid: u32) -> Self {
        self.nsid = nsid;
        self
    }

    pub fn passthrough_abi(mut self, abi: PassthroughAbi) -> Self {
        self.passthrough_abi = abi;
        self
    }
}
