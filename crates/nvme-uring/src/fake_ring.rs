//! In-memory `CompletionRing` for tests.
//!
//! Emulates an NVMe namespace behind the ring: block fast path reads and
//! writes, passthrough read / write / zone append with per-zone write
//! pointers. Passthrough commands move `nlb + 1` blocks, bounded by the
//! buffer, like the device does. Entries execute at `submit()` (and at a
//! blocking wait, which enters the kernel too); their completions are
//! posted to the CQ, or parked while `hold` is on so tests can release
//! them in any order. Every ring call is counted.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use nvme_uring_core::constants::ZONE_SIZE;
use nvme_uring_core::entry::{RingCompletion, SqEntry};
use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::ring::CompletionRing;

use crate::passthrough::NvmeUringCmd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub registers: u32,
    pub unregisters: u32,
    pub pushes: u32,
    pub passthrough: u32,
    pub submits: u32,
    pub peeks: u32,
    pub waits: u32,
}

impl Counters {
    /// Calls that change ring state.
    pub fn mutations(&self) -> u32 {
        self.registers + self.unregisters + self.pushes + self.submits
    }
}

struct FakeState {
    block_size: u64,
    sq_capacity: usize,
    sq: Vec<SqEntry>,
    cq: VecDeque<RingCompletion>,
    held: Vec<RingCompletion>,
    hold: bool,
    fail_next: Option<i32>,
    fail_submit: Option<i32>,
    /// Sticky: every wait fails with this errno.
    fail_wait: Option<i32>,
    passthrough_supported: bool,
    ring_dropped: bool,
    registered: Option<RawFd>,
    media: HashMap<u64, u8>,
    /// Zone index -> blocks written.
    write_pointers: HashMap<u64, u64>,
    counters: Counters,
}

impl FakeState {
    fn store(&mut self, offset: u64, addr: u64, len: u32) {
        // Safety: the engine keeps the buffer alive until completion.
        let data = unsafe { std::slice::from_raw_parts(addr as *const u8, len as usize) };
        for (i, b) in data.iter().enumerate() {
            self.media.insert(offset + i as u64, *b);
        }
    }

    fn load(&self, offset: u64, addr: u64, len: u32) {
        // Safety: as above.
        let data = unsafe { std::slice::from_raw_parts_mut(addr as *mut u8, len as usize) };
        for (i, b) in data.iter_mut().enumerate() {
            *b = self.media.get(&(offset + i as u64)).copied().unwrap_or(0);
        }
    }

    fn execute(&mut self, entry: SqEntry) -> RingCompletion {
        let (result, payload) = match entry {
            SqEntry::Read {
                addr, len, offset, ..
            } => {
                self.load(offset, addr, len);
                (len as i32, 0)
            }
            SqEntry::Write {
                addr, len, offset, ..
            } => {
                self.store(offset, addr, len);
                (len as i32, 0)
            }
            SqEntry::Passthrough { cmd, .. } => {
                let nvme = NvmeUringCmd::from_bytes(&cmd);
                let bs = self.block_size;
                // cdw12 bits 15:0 hold the zero-based block count.
                let blocks = (nvme.cdw12 & 0xffff) as u64 + 1;
                let len = (blocks * bs).min(nvme.data_len as u64) as u32;
                match nvme.opcode {
                    0x02 => {
                        self.load(nvme.slba() * bs, nvme.addr, len);
                        (0, 0)
                    }
                    0x01 => {
                        self.store(nvme.slba() * bs, nvme.addr, len);
                        (0, 0)
                    }
                    0x7d => {
                        let zone = nvme.slba() * bs / ZONE_SIZE;
                        let wp = self.write_pointers.entry(zone).or_insert(0);
                        let landing = nvme.slba() + *wp;
                        *wp += blocks;
                        self.store(landing * bs, nvme.addr, len);
                        (0, landing)
                    }
                    // Invalid Command Opcode
                    _ => (0x1, 0),
                }
            }
        };
        RingCompletion {
            user_data: entry.user_data(),
            result: self.fail_next.take().unwrap_or(result),
            payload,
        }
    }

    fn flush(&mut self) -> usize {
        let entries = std::mem::take(&mut self.sq);
        let n = entries.len();
        for entry in entries {
            let cqe = self.execute(entry);
            if self.hold {
                self.held.push(cqe);
            } else {
                self.cq.push_back(cqe);
            }
        }
        n
    }
}

pub struct FakeRing {
    state: Rc<RefCell<FakeState>>,
    depth: u32,
}

/// Test-side control of a [`FakeRing`].
#[derive(Clone)]
pub struct FakeHandle {
    state: Rc<RefCell<FakeState>>,
}

impl FakeRing {
    pub fn new(depth: u32, block_size: u64) -> (Self, FakeHandle) {
        let state = Rc::new(RefCell::new(FakeState {
            block_size,
            sq_capacity: depth as usize,
            sq: Vec::new(),
            cq: VecDeque::new(),
            held: Vec::new(),
            hold: false,
            fail_next: None,
            fail_submit: None,
            fail_wait: None,
            passthrough_supported: true,
            ring_dropped: false,
            registered: None,
            media: HashMap::new(),
            write_pointers: HashMap::new(),
            counters: Counters::default(),
        }));
        let handle = FakeHandle {
            state: state.clone(),
        };
        (Self { state, depth }, handle)
    }
}

impl FakeHandle {
    pub fn counters(&self) -> Counters {
        self.state.borrow().counters
    }

    /// Park completions instead of posting them.
    pub fn hold(&self, on: bool) {
        self.state.borrow_mut().hold = on;
    }

    pub fn held(&self) -> usize {
        self.state.borrow().held.len()
    }

    /// Post the `index`-th parked completion (submission order).
    pub fn release_held(&self, index: usize) {
        let mut s = self.state.borrow_mut();
        let cqe = s.held.remove(index);
        s.cq.push_back(cqe);
    }

    pub fn set_sq_capacity(&self, n: usize) {
        self.state.borrow_mut().sq_capacity = n;
    }

    /// Override the result of the next executed entry.
    pub fn fail_next(&self, result: i32) {
        self.state.borrow_mut().fail_next = Some(result);
    }

    /// Fail the next `submit()` with `errno`, leaving the SQ queued.
    pub fn fail_submit(&self, errno: i32) {
        self.state.borrow_mut().fail_submit = Some(errno);
    }

    /// Fail every later `wait_completion()` with `errno`.
    pub fn fail_waits(&self, errno: i32) {
        self.state.borrow_mut().fail_wait = Some(errno);
    }

    /// Completions posted and not yet reaped.
    pub fn posted(&self) -> usize {
        self.state.borrow().cq.len()
    }

    pub fn ring_dropped(&self) -> bool {
        self.state.borrow().ring_dropped
    }

    pub fn set_passthrough_supported(&self, on: bool) {
        self.state.borrow_mut().passthrough_supported = on;
    }

    pub fn registered_fd(&self) -> Option<RawFd> {
        self.state.borrow().registered
    }

    /// Bytes at `offset` on the emulated media.
    pub fn media(&self, offset: u64, len: usize) -> Vec<u8> {
        let s = self.state.borrow();
        (0..len as u64)
            .map(|i| s.media.get(&(offset + i)).copied().unwrap_or(0))
            .collect()
    }
}

impl CompletionRing for FakeRing {
    fn register_file(&mut self, fd: RawFd) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.counters.registers += 1;
        s.registered = Some(fd);
        Ok(())
    }

    fn unregister_files(&mut self) {
        let mut s = self.state.borrow_mut();
        s.counters.unregisters += 1;
        s.registered = None;
    }

    fn supports_passthrough(&mut self) -> bool {
        self.state.borrow().passthrough_supported
    }

    fn has_free_entry(&mut self) -> bool {
        let s = self.state.borrow();
        s.sq.len() < s.sq_capacity
    }

    fn push(&mut self, entry: &SqEntry) -> Result<()> {
        let mut s = self.state.borrow_mut();
        if s.sq.len() >= s.sq_capacity {
            return Err(DeviceError::QueueExhausted);
        }
        s.counters.pushes += 1;
        if entry.is_passthrough() {
            s.counters.passthrough += 1;
        }
        s.sq.push(*entry);
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        let mut s = self.state.borrow_mut();
        s.counters.submits += 1;
        if let Some(errno) = s.fail_submit.take() {
            return Err(DeviceError::Submit(errno));
        }
        Ok(s.flush())
    }

    fn peek_completion(&mut self) -> Result<Option<RingCompletion>> {
        let mut s = self.state.borrow_mut();
        s.counters.peeks += 1;
        Ok(s.cq.pop_front())
    }

    fn wait_completion(&mut self) -> Result<RingCompletion> {
        let mut s = self.state.borrow_mut();
        s.counters.waits += 1;
        if let Some(errno) = s.fail_wait {
            return Err(DeviceError::Wait(errno));
        }
        s.flush();
        if s.cq.is_empty() && !s.held.is_empty() {
            let cqe = s.held.remove(0);
            s.cq.push_back(cqe);
        }
        s.cq.pop_front().ok_or(DeviceError::Wait(libc::EAGAIN))
    }

    fn depth(&self) -> u32 {
        self.depth
    }
}

impl Drop for FakeRing {
    fn drop(&mut self) {
        self.state.borrow_mut().ring_dropped = true;
    }
}

/// Regular file standing in for a device special file; removed on drop.
pub struct TempDevice {
    path: PathBuf,
}

impl TempDevice {
    /// `name` picks the kind, e.g. "nvme0n1", "ng0n1", "sda".
    pub fn new(name: &str, len: u64) -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("blk{}x{}-{}", std::process::id(), n, name));
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(len).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().unwrap()
    }
}

impl Drop for TempDevice {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
