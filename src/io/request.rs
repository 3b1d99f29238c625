//! I/O request lifecycle (C11, §4.9 + §3 Data model).
//!
//! Fields per §4.9: "instance pointer (the subsystem's object), `cancel
//! (instance)`, `finish(instance, out[])→n`, a state word, and a
//! `cancellable` flag." This crate folds "instance pointer" into the
//! request's own id — a driver that needs extra per-request context looks
//! it up in its own table keyed by `IoRequestId`, the same header-tag
//! indirection `memory::slab` uses instead of carrying a raw pointer through
//! kernel data structures. The "single atomic word" the concurrency model
//! describes is realized as the whole pool living behind one spinlock-backed
//! `Mutex`, so `try_cancel` racing `complete` is already serialized by lock
//! acquisition rather than a hand-rolled compare-and-swap.

use heapless::Vec;
use spin::Mutex;

use crate::config::{MAX_COMPLETED_REQUESTS_PER_TASK, MAX_IO_REQUESTS, MAX_IO_RETURN_VALUES};
use crate::error::{KResult, KernelError};
use crate::sched::task::TaskId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IoRequestId(u32);

impl IoRequestId {
    /// Marshals to/from the raw `u32` the syscall ABI carries in a single
    /// register (§6 `wait-io-return(request_id, ...)`).
    pub fn from_raw(raw: u32) -> Self {
        IoRequestId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Initial,
    Pending,
    Completed,
    /// Terminal like `Completed`, but the slot has already been returned to
    /// the free pool — kept only so a stale `IoRequestId` fails loudly
    /// instead of aliasing a future allocation.
    Cancelled,
}

struct Slot {
    in_use: bool,
    state: State,
    owner: TaskId,
    cancellable: bool,
    cancel_cb: Option<fn(IoRequestId)>,
    finish_cb: Option<fn(IoRequestId, &mut [u32]) -> u32>,
    values: [u32; MAX_IO_RETURN_VALUES],
    value_count: u8,
    generation: u32,
}

impl Slot {
    const fn empty() -> Self {
        Slot {
            in_use: false,
            state: State::Initial,
            owner: TaskId(0),
            cancellable: false,
            cancel_cb: None,
            finish_cb: None,
            values: [0; MAX_IO_RETURN_VALUES],
            value_count: 0,
            generation: 0,
        }
    }
}

static POOL: Mutex<[Slot; MAX_IO_REQUESTS]> = Mutex::new([const { Slot::empty() }; MAX_IO_REQUESTS]);

fn pack(index: usize, generation: u32) -> IoRequestId {
    IoRequestId(((generation & 0xFFF) << 20) | index as u32)
}

fn unpack(id: IoRequestId) -> (usize, u32) {
    ((id.0 & 0x000F_FFFF) as usize, (id.0 >> 20) & 0xFFF)
}

/// `allocate` (§4.9 initial state): reserves a free slot for `task`,
/// recording the optional `cancel`/`finish` callbacks and whether the
/// request may be cancelled at all.
pub fn allocate(
    task: TaskId,
    cancel_cb: Option<fn(IoRequestId)>,
    finish_cb: Option<fn(IoRequestId, &mut [u32]) -> u32>,
    cancellable: bool,
) -> KResult<IoRequestId> {
    let mut pool = POOL.lock();
    let index = pool.iter().position(|s| !s.in_use).ok_or(KernelError::Exhausted)?;
    let generation = pool[index].generation.wrapping_add(1);
    pool[index] = Slot {
        in_use: true,
        state: State::Initial,
        owner: task,
        cancellable,
        cancel_cb,
        finish_cb,
        values: [0; MAX_IO_RETURN_VALUES],
        value_count: 0,
        generation,
    };
    Ok(pack(index, generation))
}

fn with_slot<R>(id: IoRequestId, f: impl FnOnce(&mut Slot) -> KResult<R>) -> KResult<R> {
    let (index, generation) = unpack(id);
    let mut pool = POOL.lock();
    let slot = pool.get_mut(index).ok_or(KernelError::NotFound)?;
    if !slot.in_use || slot.generation != generation {
        return Err(KernelError::NotFound);
    }
    f(slot)
}

/// `pend(r)` (§4.9): initial→pending. Re-affirms `task` as the owner so a
/// caller that pends on behalf of another task (e.g. a driver pending its
/// own previously-allocated request) cannot silently hand it to the wrong
/// waiter.
pub fn pend(request: IoRequestId, task: TaskId) -> KResult<()> {
    with_slot(request, |slot| {
        if slot.state != State::Initial {
            return Err(KernelError::InvalidArgument("request not in initial state"));
        }
        slot.owner = task;
        slot.state = State::Pending;
        Ok(())
    })
}

/// `try-cancel` (§5 Cancellation): the sole atomic boundary against
/// `complete`. Only a `Pending` and `cancellable` request can be cancelled;
/// losing the race (already completed, or not cancellable) is reported as
/// an error rather than silently ignored.
pub fn try_cancel(request: IoRequestId) -> KResult<()> {
    let (owner, cancel_cb) = with_slot(request, |slot| {
        if slot.state != State::Pending || !slot.cancellable {
            return Err(KernelError::InvalidArgument("request not cancellable"));
        }
        slot.state = State::Cancelled;
        slot.in_use = false;
        Ok((slot.owner, slot.cancel_cb))
    })?;
    if let Some(cancel_cb) = cancel_cb {
        cancel_cb(request);
    }
    let _ = owner;
    Ok(())
}

/// `complete(r)` (§4.9): pending→completed. When a `finish` callback was
/// supplied at `allocate` time it computes the return values; otherwise
/// `values` is copied in directly (the common case — most completions, like
/// a plain timer expiry, have no driver-specific instance to consult).
/// Wakes the owner if it is parked in `wait_io`/`wait_io_return` for this
/// request (or for any request, via `wait_io`).
pub fn complete(request: IoRequestId, values: &[u32]) -> KResult<()> {
    let owner = with_slot(request, |slot| {
        if slot.state != State::Pending {
            return Err(KernelError::InvalidArgument("request not pending"));
        }
        if let Some(finish_cb) = slot.finish_cb {
            let n = finish_cb(request, &mut slot.values) as usize;
            slot.value_count = n.min(MAX_IO_RETURN_VALUES) as u8;
        } else {
            let n = values.len().min(MAX_IO_RETURN_VALUES);
            slot.values[..n].copy_from_slice(&values[..n]);
            slot.value_count = n as u8;
        }
        slot.state = State::Completed;
        Ok(slot.owner)
    })?;

    let mut should_resume = false;
    crate::sched::task::with_task_mut(owner, |t| {
        if t.completed_requests.push_back(request).is_err() {
            log::warn!("[io] task {:?} completed-request queue full, dropping {:?}", owner, request);
        }
        if t.waiting_on_io && t.waiting_on_specific_request.map_or(true, |w| w == request) {
            t.waiting_on_io = false;
            t.waiting_on_specific_request = None;
            should_resume = true;
        }
    });
    if should_resume {
        crate::sched::resume(owner);
    }
    Ok(())
}

fn take_values(request: IoRequestId, n: usize, out: &mut [u32]) -> KResult<()> {
    with_slot(request, |slot| {
        if slot.state != State::Completed {
            return Err(KernelError::InvalidArgument("request not completed"));
        }
        let count = n.min(out.len()).min(slot.value_count as usize);
        out[..count].copy_from_slice(&slot.values[..count]);
        slot.in_use = false;
        Ok(())
    })
}

fn drain_matching(task: TaskId, request: Option<IoRequestId>) -> Option<IoRequestId> {
    crate::sched::task::with_task_mut(task, |t| {
        let mut staged: Vec<IoRequestId, MAX_COMPLETED_REQUESTS_PER_TASK> = Vec::new();
        let mut found = None;
        while let Some(candidate) = t.completed_requests.pop_front() {
            if found.is_none() && request.map_or(true, |r| r == candidate) {
                found = Some(candidate);
            } else {
                let _ = staged.push(candidate);
            }
        }
        for id in staged {
            let _ = t.completed_requests.push_back(id);
        }
        found
    })
    .flatten()
}

/// Sentinel `arg` value meaning "waiting on any completed request", since
/// `suspend_current`'s context slot is an untyped `usize` and `None` has no
/// natural bit pattern of its own. No `pack`ed `IoRequestId` ever collides
/// with it: the generation field is masked to 12 bits, so the packed value
/// never reaches `u32::MAX`.
const WAIT_ANY: usize = u32::MAX as usize;

/// Parks the calling task until `io::request::complete` resumes it. As
/// with `sync::semaphore`, marking the task as waiting is deferred to
/// `suspend_current`'s post-switch callback (`mark_waiting`) rather than
/// done before suspending, so `complete` running on another processor can
/// never observe `waiting_on_io` before the switch away has actually
/// completed.
fn park_until_resumed(request: Option<IoRequestId>) {
    let arg = request.map_or(WAIT_ANY, |r| r.raw() as usize);
    crate::sched::suspend_current(mark_waiting, arg);
}

fn mark_waiting(prev: TaskId, arg: usize) {
    let request = if arg == WAIT_ANY { None } else { Some(IoRequestId::from_raw(arg as u32)) };
    crate::sched::task::with_task_mut(prev, |t| {
        t.waiting_on_io = true;
        t.waiting_on_specific_request = request;
    });
}

/// `wait-io(task)` (§4.9): returns the oldest completed-and-unconsumed
/// request, blocking until one appears if the task has none yet.
pub fn wait_io(task: TaskId) -> KResult<IoRequestId> {
    loop {
        if let Some(id) = drain_matching(task, None) {
            return Ok(id);
        }
        park_until_resumed(None);
    }
}

/// `wait-io-return(r, n, out[])` (§6 ABI): waits for *this specific*
/// request, then copies up to `n` return values into `out`. Other completed
/// requests already queued for `task` are left untouched for a later
/// `wait_io`/`wait_io_return` to consume.
pub fn wait_io_return(task: TaskId, request: IoRequestId, n: usize, out: &mut [u32]) -> KResult<()> {
    loop {
        if drain_matching(task, Some(request)).is_some() {
            return take_values(request, n, out);
        }
        park_until_resumed(Some(request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskId {
        crate::sched::task::spawn(0, 0x1000, 0).unwrap()
    }

    #[test]
    fn allocate_pend_complete_round_trip() {
        let t = task();
        let req = allocate(t, None, None, false).unwrap();
        pend(req, t).unwrap();
        complete(req, &[7, 8]).unwrap();

        let completed = drain_matching(t, None).expect("request should be queued on the task");
        assert_eq!(completed, req);
        let mut out = [0u32; 2];
        take_values(req, 2, &mut out).unwrap();
        assert_eq!(out, [7, 8]);
        crate::sched::task::remove(t);
    }

    #[test]
    fn cancellable_request_runs_cancel_callback() {
        static CANCELLED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
        fn on_cancel(_id: IoRequestId) {
            CANCELLED.store(true, core::sync::atomic::Ordering::SeqCst);
        }

        let t = task();
        let req = allocate(t, Some(on_cancel), None, true).unwrap();
        pend(req, t).unwrap();
        try_cancel(req).unwrap();
        assert!(CANCELLED.load(core::sync::atomic::Ordering::SeqCst));
        assert!(complete(req, &[]).is_err(), "a cancelled request's slot must not still be completable");
        crate::sched::task::remove(t);
    }

    #[test]
    fn non_cancellable_request_rejects_try_cancel() {
        let t = task();
        let req = allocate(t, None, None, false).unwrap();
        pend(req, t).unwrap();
        assert!(try_cancel(req).is_err());
        complete(req, &[]).unwrap();
        crate::sched::task::remove(t);
    }

    #[test]
    fn finish_callback_overrides_direct_values() {
        fn finish(_id: IoRequestId, out: &mut [u32]) -> u32 {
            out[0] = 42;
            1
        }

        let t = task();
        let req = allocate(t, None, Some(finish), false).unwrap();
        pend(req, t).unwrap();
        complete(req, &[1, 2, 3]).unwrap();

        drain_matching(t, Some(req)).unwrap();
        let mut out = [0u32; 1];
        take_values(req, 1, &mut out).unwrap();
        assert_eq!(out, [42]);
        crate::sched::task::remove(t);
    }
}
