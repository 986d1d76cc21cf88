//! In-flight request table.
//!
//! Every submitted command owns one [`InflightRecord`] stored in a slot of
//! an [`InflightTable`]. The slot index plus an issue sequence number form
//! the [`RequestId`] placed in the ring's `user_data`, so completion
//! routing is an O(1) index with stale-id detection.
//!
//! A record is allocated once, completed once by whoever drains the
//! completion queue, and released once by its submitter. A submitter that
//! goes away before completion marks the slot abandoned; the completion
//! then releases it.
//!
//! Free slots are reused LIFO for cache-friendly reuse.

use crate::command::{NvmeIoCommand, Opcode};
use crate::entry::{RequestId, RingCompletion};

/// Host-side bookkeeping for one outstanding command.
#[derive(Debug)]
pub struct InflightRecord {
    pub command: NvmeIoCommand,
    /// Data buffer; owned here while the device may access it.
    pub buffer: Vec<u8>,
    /// Submitted through the passthrough path.
    pub passthrough: bool,
    pub done: bool,
    /// 0, a negative errno, or (passthrough) a positive NVMe status.
    pub error: i32,
    /// Zone Append landing LBA; unused otherwise.
    pub payload: u64,
}

impl InflightRecord {
    pub fn new(command: NvmeIoCommand, buffer: Vec<u8>) -> Self {
        Self {
            command,
            buffer,
            passthrough: false,
            done: false,
            error: 0,
            payload: 0,
        }
    }

    /// Apply the device's answer.
    pub fn complete(&mut self, result: i32, device_result: u64) {
        if result < 0 || (self.passthrough && result > 0) {
            self.error = result;
        }
        self.command.result = device_result;
        if self.command.opcode == Opcode::Append {
            self.payload = self.command.result;
        }
        self.done = true;
    }
}

/// What `route()` did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Filed on a live record for its submitter to collect.
    Delivered,
    /// Owner had abandoned the request; the record was released.
    Reclaimed,
    /// No live record matches the id.
    Stale,
}

/// Counters for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflightStats {
    pub allocations: u64,
    pub releases: u64,
    pub reclaimed: u64,
    pub stale: u64,
    /// Records dropped at teardown with their buffers leaked.
    pub leaked: u64,
}

struct Slot {
    seq: u32,
    record: Option<InflightRecord>,
    abandoned: bool,
}

pub struct InflightTable {
    slots: Vec<Slot>,
    /// LIFO stack of released slot indices.
    free: Vec<u32>,
    capacity: u32,
    /// Next issue sequence number. Monotonic, wraps.
    next_seq: u32,
    outstanding: u32,
    stats: InflightStats,
}

impl InflightTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: Vec::with_capacity(capacity as usize),
            free: Vec::with_capacity(capacity as usize),
            capacity,
            next_seq: 1,
            outstanding: 0,
            stats: InflightStats::default(),
        }
    }

    /// Store `record` and issue its id. `None` when every slot is taken.
    pub fn allocate(&mut self, record: InflightRecord) -> Option<RequestId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() as u32 >= self.capacity {
                    return None;
                }
                self.slots.push(Slot {
                    seq: 0,
                    record: None,
                    abandoned: false,
                });
                self.slots.len() as u32 - 1
            }
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let slot = &mut self.slots[index as usize];
        slot.seq = seq;
        slot.record = Some(record);
        slot.abandoned = false;

        self.outstanding += 1;
        self.stats.allocations += 1;
        Some(RequestId::new(index, seq))
    }

    pub fn get(&self, id: RequestId) -> Option<&InflightRecord> {
        self.slot(id)?.record.as_ref()
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut InflightRecord> {
        self.slot_mut(id)?.record.as_mut()
    }

    #[inline]
    pub fn is_done(&self, id: RequestId) -> bool {
        self.get(id).map_or(false, |r| r.done)
    }

    /// File a completion on the record it belongs to.
    pub fn route(&mut self, cqe: &RingCompletion) -> Routed {
        let id = RequestId::from_user_data(cqe.user_data);
        let abandoned = match self.slot_mut(id) {
            Some(Slot {
                record: Some(record),
                abandoned,
                ..
            }) if !record.done => {
                record.complete(cqe.result, cqe.payload);
                *abandoned
            }
            _ => {
                self.stats.stale += 1;
                return Routed::Stale;
            }
        };

        if abandoned {
            self.release(id);
            self.stats.reclaimed += 1;
            Routed::Reclaimed
        } else {
            Routed::Delivered
        }
    }

    /// Release and return the record if it has completed.
    pub fn take_completed(&mut self, id: RequestId) -> Option<InflightRecord> {
        if self.is_done(id) {
            self.release(id)
        } else {
            None
        }
    }

    /// The submitter is gone. Release now if complete, else on completion.
    pub fn abandon(&mut self, id: RequestId) {
        if self.is_done(id) {
            self.release(id);
        } else if let Some(slot) = self.slot_mut(id) {
            if slot.record.is_some() {
                slot.abandoned = true;
            }
        }
    }

    /// Release the slot unconditionally.
    pub fn release(&mut self, id: RequestId) -> Option<InflightRecord> {
        let slot = self.slot_mut(id)?;
        let record = slot.record.take()?;
        slot.abandoned = false;
        self.free.push(id.index());
        self.outstanding -= 1;
        self.stats.releases += 1;
        Some(record)
    }

    /// Records allocated and not yet released.
    #[inline]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Records the device has not answered yet.
    pub fn in_flight(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| s.record.as_ref().map_or(false, |r| !r.done))
            .count() as u32
    }

    /// Drop every unanswered record without freeing its buffer.
    ///
    /// Teardown path for when the device may still access the memory.
    /// Returns how many records were dropped.
    pub fn leak_in_flight(&mut self) -> u32 {
        let mut n = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.record.as_ref().map_or(false, |r| !r.done) {
                continue;
            }
            if let Some(record) = slot.record.take() {
                std::mem::forget(record.buffer);
                slot.abandoned = false;
                self.free.push(index as u32);
                n += 1;
            }
        }
        self.outstanding -= n;
        self.stats.leaked += n as u64;
        n
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.outstanding >= self.capacity
    }

    #[inline]
    pub fn stats(&self) -> InflightStats {
        self.stats
    }

    fn slot(&self, id: RequestId) -> Option<&Slot> {
        self.slots
            .get(id.index() as usize)
            .filter(|s| s.seq == id.seq() && s.record.is_some())
    }

    fn slot_mut(&mut self, id: RequestId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|s| s.seq == id.seq() && s.record.is_some())
    }
}
