//! Device kind classification.
//!
//! The kind is derived from the special-file path alone:
//! NVMe generic character devices are named `ng<X>n<Y>`, block
//! namespaces `nvme<X>n<Y>`. Zoned namespaces are only exposed through
//! the character device, so `Character` is the zoned-capable kind.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// `/dev/nvme<X>n<Y>`: regular read/write fast path.
    Block,
    /// `/dev/ng<X>n<Y>`: passthrough only, zoned-capable.
    Character,
    /// Neither; every I/O fails.
    Unknown,
}

impl DeviceKind {
    /// Classify by substring match. "ng" is checked first.
    pub fn classify(path: &str) -> Self {
        if path.contains("ng") {
            DeviceKind::Character
        } else if path.contains("nvme") {
            DeviceKind::Block
        } else {
            DeviceKind::Unknown
        }
    }

    #[inline]
    pub fn is_zoned_capable(self) -> bool {
        self == DeviceKind::Character
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Block => "block",
            DeviceKind::Character => "char",
            DeviceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
