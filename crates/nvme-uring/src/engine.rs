//! Submission/completion engine.
//!
//! One ring, one in-flight table, driven from a single thread. Each
//! request is a [`Submission`] future:
//!
//! ```text
//!   first poll:   free entry? ─► allocate ─► encode ─► push ─► submit
//!   every poll:   own record done? ─► take, release, Ready
//!                 else peek (or wait, polling mode) one completion
//!                   └─► route to its owner (any request), repeat
//!                 CQ empty ─► wake_by_ref, Pending
//! ```
//!
//! Completions are routed by `user_data` whichever future happens to
//! drain them. The data buffer moves into the in-flight record for the
//! lifetime of the command; a future dropped mid-flight abandons its
//! record and the buffer is freed only when the device answers.
//!
//! Shutdown waits until the device has answered every command before the
//! ring goes away, so no buffer is freed while the kernel may still use it.
//!
//! State lives in a `RefCell`: futures of one engine must be polled on
//! one thread, never re-entrantly.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use nix::errno::Errno;

use nvme_uring_core::command::{NvmeIoCommand, Opcode};
use nvme_uring_core::device::BufResult;
use nvme_uring_core::entry::{RequestId, RingCompletion, SqEntry};
use nvme_uring_core::error::{DeviceError, Result};
use nvme_uring_core::inflight::{InflightRecord, InflightStats, InflightTable, Routed};
use nvme_uring_core::kind::DeviceKind;
use nvme_uring_core::ring::CompletionRing;
use nvme_uring_core::{kdebug, kerror, ktrace};

use crate::passthrough::PassthroughEncoder;

/// One I/O to run through the engine.
#[derive(Debug)]
pub struct Request {
    pub command: NvmeIoCommand,
    /// Byte offset for the block fast path.
    pub offset: u64,
    /// Data buffer; `command.addr` must point into it.
    pub buffer: Vec<u8>,
    pub kind: DeviceKind,
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub inflight: InflightStats,
    pub outstanding: u32,
}

pub(crate) fn errno_desc(errno: i32) -> &'static str {
    Errno::from_raw(errno.abs()).desc()
}

struct Inner<R> {
    /// `None` after shutdown.
    ring: Option<R>,
    slots: InflightTable,
}

impl<R: CompletionRing> Inner<R> {
    /// Pop and route one completion. `Ok(false)` if the CQ is empty.
    fn reap(&mut self, blocking: bool) -> Result<bool> {
        let ring = self.ring.as_mut().ok_or(DeviceError::Closed)?;
        let cqe = if blocking {
            ring.wait_completion()?
        } else {
            match ring.peek_completion()? {
                Some(cqe) => cqe,
                None => return Ok(false),
            }
        };
        self.route(&cqe);
        Ok(true)
    }

    fn route(&mut self, cqe: &RingCompletion) {
        let routed = self.slots.route(cqe);
        ktrace!(
            "cqe {:?} res {} payload {:#x} {:?}",
            RequestId::from_user_data(cqe.user_data),
            cqe.result,
            cqe.payload,
            routed
        );
        if routed == Routed::Stale {
            kdebug!("stale completion user_data {:#x}", cqe.user_data);
        }
    }
}

pub struct Engine<R: CompletionRing> {
    inner: RefCell<Inner<R>>,
    encoder: PassthroughEncoder,
    polling: bool,
}

impl<R: CompletionRing> Engine<R> {
    pub fn new(ring: R, encoder: PassthroughEncoder, polling: bool) -> Self {
        let depth = ring.depth();
        Self {
            inner: RefCell::new(Inner {
                ring: Some(ring),
                slots: InflightTable::new(depth),
            }),
            encoder,
            polling,
        }
    }

    #[inline]
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Submit `request` and resolve with its completion payload
    /// (Zone Append landing LBA, 0 otherwise) and the buffer.
    pub fn submit(&self, request: Request) -> Submission<'_, R> {
        Submission {
            engine: self,
            state: State::Start(Some(request)),
        }
    }

    /// Route every completion already on the CQ. Returns how many.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let mut n = 0;
        loop {
            match inner.reap(false) {
                Ok(true) => n += 1,
                Ok(false) | Err(DeviceError::Closed) => break,
                Err(e) => {
                    kerror!("drain: {}", e);
                    break;
                }
            }
        }
        n
    }

    pub fn stats(&self) -> EngineStats {
        let inner = self.inner.borrow();
        EngineStats {
            inflight: inner.slots.stats(),
            outstanding: inner.slots.outstanding(),
        }
    }

    #[inline]
    pub fn outstanding(&self) -> u32 {
        self.inner.borrow().slots.outstanding()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().ring.is_none()
    }

    /// Wait for every unanswered command, unregister the device fd and
    /// tear down the ring. Later submissions fail with `Closed`.
    /// Idempotent; also run on drop.
    ///
    /// If the wait itself fails the unanswered buffers are leaked, never
    /// freed under the device.
    pub fn shutdown(&self) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let Some(mut ring) = inner.ring.take() else {
            return;
        };
        let mut waited = 0;
        while inner.slots.in_flight() > 0 {
            match ring.wait_completion() {
                Ok(cqe) => {
                    inner.route(&cqe);
                    waited += 1;
                }
                Err(e) => {
                    let leaked = inner.slots.leak_in_flight();
                    kerror!("shutdown: {}: leaking {} in-flight buffers", e, leaked);
                    break;
                }
            }
        }
        ring.unregister_files();
        drop(ring);
        kdebug!(
            "engine shutdown: waited {} outstanding {}",
            waited,
            inner.slots.outstanding()
        );
    }

    /// Steps of the first poll. On success the record is in flight.
    fn start(&self, request: Request) -> std::result::Result<RequestId, (DeviceError, Vec<u8>)> {
        let Request {
            command,
            offset,
            buffer,
            kind,
        } = request;
        let mut guard = self.inner.borrow_mut();
        let Inner { ring, slots } = &mut *guard;
        let Some(ring) = ring.as_mut() else {
            return Err((DeviceError::Closed, buffer));
        };

        if !ring.has_free_entry() || slots.is_full() {
            kerror!(
                "{} offset {} len {}: no free submission entry",
                command.opcode.name(),
                offset,
                command.data_len
            );
            return Err((DeviceError::QueueExhausted, buffer));
        }
        if kind == DeviceKind::Unknown {
            kerror!(
                "{} offset {}: unknown device kind",
                command.opcode.name(),
                offset
            );
            return Err((DeviceError::UnknownDeviceKind, buffer));
        }
        if !command.covers(buffer.len()) {
            kerror!(
                "{} offset {}: buffer of {} bytes, command covers {}",
                command.opcode.name(),
                offset,
                buffer.len(),
                command.data_len
            );
            return Err((DeviceError::BufferLength(buffer.len()), buffer));
        }

        let mut record = InflightRecord::new(command, buffer);
        record.passthrough = kind == DeviceKind::Character;
        let Some(id) = slots.allocate(record) else {
            return Err((DeviceError::QueueExhausted, Vec::new()));
        };

        let entry = match kind {
            DeviceKind::Character => self.encoder.encode(&command, id),
            _ => Self::fast_path(&command, offset, id),
        };
        let pushed = entry.and_then(|entry| ring.push(&entry));
        if let Err(e) = pushed {
            kerror!(
                "{} offset {} len {}: {}",
                command.opcode.name(),
                offset,
                command.data_len,
                e
            );
            let buffer = slots.release(id).map(|r| r.buffer).unwrap_or_default();
            return Err((e, buffer));
        }

        if let Err(e) = ring.submit() {
            let errno = e.errno().unwrap_or(0);
            kerror!(
                "{} offset {} len {}: submit failed ({}: {})",
                command.opcode.name(),
                offset,
                command.data_len,
                errno,
                errno_desc(errno)
            );
            // The entry may still reach the kernel; keep the buffer alive.
            slots.abandon(id);
            return Err((e, Vec::new()));
        }

        ktrace!(
            "submit {} {:?} {} offset {} len {}",
            command.opcode.name(),
            id,
            kind,
            offset,
            command.data_len
        );
        Ok(id)
    }

    fn fast_path(command: &NvmeIoCommand, offset: u64, id: RequestId) -> Result<SqEntry> {
        let (addr, len, user_data) = (command.addr, command.data_len, id.user_data());
        match command.opcode {
            Opcode::Read => Ok(SqEntry::Read {
                addr,
                len,
                offset,
                user_data,
            }),
            Opcode::Write => Ok(SqEntry::Write {
                addr,
                len,
                offset,
                user_data,
            }),
            Opcode::Append => Err(DeviceError::NotSupported("append")),
            Opcode::PassthroughAdmin => Err(DeviceError::NotSupported("admin passthrough")),
        }
    }

    /// Advance the wait protocol for `id`.
    fn poll_wait(&self, id: RequestId, cx: &mut Context<'_>) -> Poll<BufResult<u64>> {
        let mut inner = self.inner.borrow_mut();
        loop {
            if let Some(record) = inner.slots.take_completed(id) {
                return Poll::Ready(Self::finish(record));
            }
            match inner.reap(self.polling) {
                Ok(true) => continue,
                Ok(false) => {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Err(e) => {
                    kerror!("{:?}: completion wait failed: {}", id, e);
                    inner.slots.abandon(id);
                    return Poll::Ready((Err(e), Vec::new()));
                }
            }
        }
    }

    fn finish(record: InflightRecord) -> BufResult<u64> {
        let InflightRecord {
            command,
            buffer,
            error,
            payload,
            ..
        } = record;
        let result = match error {
            0 => Ok(payload),
            e if e < 0 => {
                kerror!(
                    "{} slba {} len {}: completion failed ({}: {})",
                    command.opcode.name(),
                    command.slba,
                    command.data_len,
                    e,
                    errno_desc(e)
                );
                Err(DeviceError::Completion(-e))
            }
            status => {
                kerror!(
                    "{} slba {} len {}: NVMe status {:#x}",
                    command.opcode.name(),
                    command.slba,
                    command.data_len,
                    status
                );
                Err(DeviceError::NvmeStatus(status))
            }
        };
        (result, buffer)
    }
}

enum State {
    Start(Option<Request>),
    Waiting(RequestId),
    Done,
}

/// Future of one submitted request. See [`Engine::submit`].
#[must_use = "futures do nothing unless polled"]
pub struct Submission<'a, R: CompletionRing> {
    engine: &'a Engine<R>,
    state: State,
}

impl<'a, R: CompletionRing> Submission<'a, R> {
    /// Id of the in-flight record, once submitted.
    pub fn request_id(&self) -> Option<RequestId> {
        match self.state {
            State::Waiting(id) => Some(id),
            _ => None,
        }
    }
}

impl<'a, R: CompletionRing> Future for Submission<'a, R> {
    type Output = BufResult<u64>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::Start(request) => {
                    let Some(request) = request.take() else {
                        this.state = State::Done;
                        return Poll::Ready((Err(DeviceError::Closed), Vec::new()));
                    };
                    match this.engine.start(request) {
                        Ok(id) => this.state = State::Waiting(id),
                        Err((e, buffer)) => {
                            this.state = State::Done;
                            return Poll::Ready((Err(e), buffer));
                        }
                    }
                }
                State::Waiting(id) => {
                    let id = *id;
                    let ready = this.engine.poll_wait(id, cx);
                    if ready.is_ready() {
                        this.state = State::Done;
                    }
                    return ready;
                }
                State::Done => {
                    return Poll::Ready((Err(DeviceError::Closed), Vec::new()));
                }
            }
        }
    }
}

impl<R: CompletionRing> Drop for Engine<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<'a, R: CompletionRing> Drop for Submission<'a, R> {
    fn drop(&mut self) {
        if let State::Waiting(id) = self.state {
            ktrace!("{:?} abandoned", id);
            self.engine.inner.borrow_mut().slots.abandon(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_ring::FakeRing;
    use futures::executor::block_on;
    use futures::task::noop_waker_ref;
    use nvme_uring_core::command::CommandFactory;

    const BS: u64 = 4096;

    fn engine(depth: u32, polling: bool) -> (Engine<FakeRing>, crate::fake_ring::FakeHandle) {
        let (mut ring, handle) = FakeRing::new(depth, BS);
        ring.register_file(3).unwrap();
        (Engine::new(ring, PassthroughEncoder::default(), polling), handle)
    }

    fn write_req(f: &CommandFactory, offset: u64, data: Vec<u8>, kind: DeviceKind) -> Request {
        Request {
            command: f.write(offset, &data),
            offset,
            buffer: data,
            kind,
        }
    }

    fn read_req(f: &CommandFactory, offset: u64, len: usize, kind: DeviceKind) -> Request {
        let buf = vec![0u8; len];
        Request {
            command: f.read(offset, &buf),
            offset,
            buffer: buf,
            kind,
        }
    }

    #[test]
    fn test_round_trip_both_paths() {
        // Passthrough commands carry nlb 0: one block per command.
        for (kind, blocks) in [(DeviceKind::Block, 2), (DeviceKind::Character, 1)] {
            let (engine, handle) = engine(16, false);
            let f = CommandFactory::with_block_size(BS);
            let data: Vec<u8> = (0..BS as usize * blocks).map(|i| (i % 251) as u8).collect();

            let (r, _) = block_on(engine.submit(write_req(&f, 3 * BS, data.clone(), kind)));
            r.unwrap();
            let (r, buf) = block_on(engine.submit(read_req(&f, 3 * BS, data.len(), kind)));
            r.unwrap();
            assert_eq!(buf, data, "{}", kind);

            let passthrough = handle.counters().passthrough;
            assert_eq!(passthrough, if kind == DeviceKind::Character { 2 } else { 0 });
        }
    }

    #[test]
    fn test_passthrough_moves_one_block() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        let bs = BS as usize;

        let (r, _) = block_on(engine.submit(write_req(&f, 0, vec![0x77; bs * 2], DeviceKind::Character)));
        r.unwrap();
        assert_eq!(handle.media(0, bs), vec![0x77; bs]);
        assert_eq!(handle.media(BS, bs), vec![0; bs]);

        block_on(engine.submit(write_req(&f, BS, vec![0x66; bs], DeviceKind::Block)))
            .0
            .unwrap();
        let (r, back) = block_on(engine.submit(read_req(&f, 0, bs * 2, DeviceKind::Character)));
        r.unwrap();
        assert_eq!(&back[..bs], &vec![0x77; bs][..]);
        assert!(back[bs..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_length_mismatch_rejected() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        let mut request = write_req(&f, 0, vec![4; 4096], DeviceKind::Block);
        request.command.data_len = u32::MAX;

        let (r, buf) = block_on(engine.submit(request));
        assert_eq!(r, Err(DeviceError::BufferLength(4096)));
        assert_eq!(buf, vec![4; 4096]);
        assert_eq!(handle.counters().pushes, 0);
        assert_eq!(engine.stats().inflight.allocations, 0);
    }

    #[test]
    fn test_one_alloc_one_release_per_command() {
        let (engine, _handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        for i in 0..5u64 {
            let (r, _) = block_on(engine.submit(write_req(&f, i * BS, vec![1; 512], DeviceKind::Block)));
            r.unwrap();
        }
        let stats = engine.stats();
        assert_eq!(stats.inflight.allocations, 5);
        assert_eq!(stats.inflight.releases, 5);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_no_release_before_completion() {
        let (engine, handle) = engine(16, false);
        handle.hold(true);
        let f = CommandFactory::with_block_size(BS);
        let mut fut = Box::pin(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)));
        let mut cx = Context::from_waker(noop_waker_ref());

        for _ in 0..3 {
            assert!(fut.as_mut().poll(&mut cx).is_pending());
            assert_eq!(engine.stats().inflight.releases, 0);
            assert_eq!(engine.outstanding(), 1);
        }
        handle.release_held(0);
        let Poll::Ready((r, _)) = fut.as_mut().poll(&mut cx) else {
            panic!("expected ready");
        };
        r.unwrap();
        assert_eq!(engine.stats().inflight.releases, 1);
    }

    #[test]
    fn test_exhausted_queue_does_not_touch_ring() {
        let (engine, handle) = engine(16, false);
        handle.set_sq_capacity(0);
        let f = CommandFactory::with_block_size(BS);
        let before = handle.counters();

        let (r, buf) = block_on(engine.submit(write_req(&f, 0, vec![9; 512], DeviceKind::Block)));
        assert_eq!(r, Err(DeviceError::QueueExhausted));
        assert_eq!(buf, vec![9; 512]);
        assert_eq!(handle.counters().mutations(), before.mutations());
        assert_eq!(engine.stats().inflight.allocations, 0);
    }

    #[test]
    fn test_unknown_kind_fails_before_submission() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        let (r, _) = block_on(engine.submit(read_req(&f, 0, 512, DeviceKind::Unknown)));
        assert_eq!(r, Err(DeviceError::UnknownDeviceKind));
        assert_eq!(handle.counters().pushes, 0);
        assert_eq!(handle.counters().submits, 0);
    }

    #[test]
    fn test_interleaved_completions() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        block_on(engine.submit(write_req(&f, 0, vec![0xA; 512], DeviceKind::Character)))
            .0
            .unwrap();
        block_on(engine.submit(write_req(&f, BS, vec![0xB; 512], DeviceKind::Character)))
            .0
            .unwrap();
        handle.hold(true);

        let mut a = Box::pin(engine.submit(read_req(&f, 0, 512, DeviceKind::Character)));
        let mut b = Box::pin(engine.submit(read_req(&f, BS, 512, DeviceKind::Character)));
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(a.as_mut().poll(&mut cx).is_pending());
        assert!(b.as_mut().poll(&mut cx).is_pending());

        // B completes first; A drains it but keeps waiting.
        handle.release_held(1);
        assert!(a.as_mut().poll(&mut cx).is_pending());
        assert_eq!(engine.outstanding(), 2);

        let Poll::Ready((rb, buf_b)) = b.as_mut().poll(&mut cx) else {
            panic!("B should be ready");
        };
        rb.unwrap();
        assert_eq!(buf_b, vec![0xB; 512]);

        handle.release_held(0);
        let Poll::Ready((ra, buf_a)) = a.as_mut().poll(&mut cx) else {
            panic!("A should be ready");
        };
        ra.unwrap();
        assert_eq!(buf_a, vec![0xA; 512]);
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_join_resolves_both() {
        let (engine, _handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        let ((ra, _), (rb, _)) = block_on(futures::future::join(
            engine.submit(write_req(&f, 0, vec![1; 512], DeviceKind::Block)),
            engine.submit(write_req(&f, BS, vec![2; 512], DeviceKind::Block)),
        ));
        ra.unwrap();
        rb.unwrap();
        assert_eq!(engine.stats().inflight.releases, 2);
    }

    #[test]
    fn test_completion_error_scoped_to_owner() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        handle.fail_next(-libc::EIO);
        let (r, _) = block_on(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)));
        assert_eq!(r, Err(DeviceError::Completion(libc::EIO)));

        let (r, _) = block_on(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)));
        r.unwrap();
    }

    #[test]
    fn test_passthrough_status_is_error() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        handle.fail_next(0x281);
        let (r, _) = block_on(engine.submit(read_req(&f, 0, 512, DeviceKind::Character)));
        assert_eq!(r, Err(DeviceError::NvmeStatus(0x281)));
    }

    #[test]
    fn test_submit_failure_abandons_record() {
        let (engine, handle) = engine(16, false);
        let f = CommandFactory::with_block_size(BS);
        handle.fail_submit(libc::EBUSY);
        let (r, buf) = block_on(engine.submit(write_req(&f, 0, vec![3; 512], DeviceKind::Block)));
        assert_eq!(r, Err(DeviceError::Submit(libc::EBUSY)));
        assert!(buf.is_empty());
        assert_eq!(engine.outstanding(), 1);

        // The entry stayed queued; the next enter flushes it and the
        // completion reclaims the record.
        block_on(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)))
            .0
            .unwrap();
        engine.drain();
        let stats = engine.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.inflight.reclaimed, 1);
    }

    #[test]
    fn test_dropped_future_reclaimed() {
        let (engine, handle) = engine(16, false);
        handle.hold(true);
        let f = CommandFactory::with_block_size(BS);
        let mut fut = Box::pin(engine.submit(read_req(&f, 0, 4096, DeviceKind::Block)));
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert!(fut.request_id().is_some());
        drop(fut);
        assert_eq!(engine.outstanding(), 1);

        handle.release_held(0);
        assert_eq!(engine.drain(), 1);
        let stats = engine.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.inflight.reclaimed, 1);
        assert_eq!(stats.inflight.releases, 1);
    }

    #[test]
    fn test_polling_mode_waits() {
        let (engine, handle) = engine(16, true);
        handle.hold(true);
        let f = CommandFactory::new(BS, 1, true);
        let mut fut = Box::pin(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)));
        let mut cx = Context::from_waker(noop_waker_ref());
        // Blocking wait: ready on the first poll, no Pending turn.
        assert!(fut.as_mut().poll(&mut cx).is_ready());
        let c = handle.counters();
        assert_eq!(c.waits, 1);
        assert_eq!(c.peeks, 0);
    }

    #[test]
    fn test_shutdown_rejects_new_requests() {
        let (engine, handle) = engine(16, false);
        engine.shutdown();
        engine.shutdown();
        assert_eq!(handle.counters().unregisters, 1);
        let f = CommandFactory::with_block_size(BS);
        let (r, buf) = block_on(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)));
        assert_eq!(r, Err(DeviceError::Closed));
        assert_eq!(buf.len(), 512);
        assert!(engine.is_closed());
        assert!(handle.ring_dropped());
    }

    fn abandon_read(engine: &Engine<FakeRing>, f: &CommandFactory, offset: u64) {
        let mut fut = Box::pin(engine.submit(read_req(f, offset, 4096, DeviceKind::Block)));
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(fut.as_mut().poll(&mut cx).is_pending());
    }

    #[test]
    fn test_shutdown_waits_for_abandoned_records() {
        let (engine, handle) = engine(16, false);
        handle.hold(true);
        let f = CommandFactory::with_block_size(BS);
        abandon_read(&engine, &f, 0);
        assert_eq!(engine.outstanding(), 1);

        engine.shutdown();
        assert_eq!(handle.held(), 0);
        assert!(handle.ring_dropped());
        let stats = engine.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.inflight.reclaimed, 1);
        assert_eq!(stats.inflight.leaked, 0);
    }

    #[test]
    fn test_drop_waits_for_device() {
        let (engine, handle) = engine(16, false);
        handle.hold(true);
        let f = CommandFactory::with_block_size(BS);
        abandon_read(&engine, &f, 0);
        abandon_read(&engine, &f, BS);
        assert_eq!(handle.held(), 2);

        drop(engine);
        assert_eq!(handle.held(), 0);
        assert_eq!(handle.posted(), 0);
        assert_eq!(handle.counters().waits, 2);
        assert_eq!(handle.counters().unregisters, 1);
        assert!(handle.ring_dropped());
    }

    #[test]
    fn test_shutdown_leaks_when_wait_fails() {
        let (engine, handle) = engine(16, false);
        handle.hold(true);
        let f = CommandFactory::with_block_size(BS);
        abandon_read(&engine, &f, 0);
        handle.fail_waits(libc::EBADF);

        engine.shutdown();
        let stats = engine.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.inflight.leaked, 1);
        assert_eq!(stats.inflight.releases, 0);
        assert!(handle.ring_dropped());
    }

    #[test]
    fn test_shutdown_completes_live_request() {
        let (engine, handle) = engine(16, false);
        handle.hold(true);
        let f = CommandFactory::with_block_size(BS);
        let mut fut = Box::pin(engine.submit(read_req(&f, 0, 512, DeviceKind::Block)));
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(fut.as_mut().poll(&mut cx).is_pending());

        engine.shutdown();
        let Poll::Ready((r, buf)) = fut.as_mut().poll(&mut cx) else {
            panic!("expected ready");
        };
        r.unwrap();
        assert_eq!(buf.len(), 512);
        assert_eq!(engine.outstanding(), 0);
    }
}
