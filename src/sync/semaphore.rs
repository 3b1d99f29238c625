//! Counting semaphore (§3, §4.9).
//!
//! Written in `Spinlock`'s idiom: the guarded state (count + FIFO waiters)
//! lives behind one `Spinlock`, and blocking reuses the scheduler's
//! `suspend_current`/`resume` pair the same way `io::request::wait_io`
//! does. Enqueueing the blocked task is deferred to `suspend_current`'s
//! post-switch callback (§4.7, §9 Design Notes) rather than done up front:
//! pushing onto `waiters` *before* switching away would make the task
//! observable to a concurrent `release` on another processor before this
//! processor has actually finished switching off of it.

use crate::sched::queue::Queue;
use crate::sched::task::{QueueTag, TaskId};

use super::spinlock::Spinlock;

struct State {
    count: u32,
    waiters: Queue,
}

pub struct Semaphore {
    state: Spinlock<State>,
}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Semaphore { state: Spinlock::new(State { count: initial, waiters: Queue::new(QueueTag::Semaphore) }) }
    }

    /// `acquire` (§4.9): if `count > 0`, decrement and return; otherwise
    /// suspend, enqueueing self onto `waiters` only once the switch away
    /// has actually happened (`enqueue_waiter`, run as `suspend_current`'s
    /// post-switch callback). A waiter resumed by `release` has already had
    /// its unit handed to it directly — no recheck needed.
    pub fn acquire(&self) {
        let mut state = self.state.acquire();
        if state.count > 0 {
            state.count -= 1;
            return;
        }
        drop(state);
        crate::sched::suspend_current(Self::enqueue_waiter, self as *const Semaphore as usize);
    }

    /// Post-switch callback for both `acquire` and `acquire_all`: places
    /// the just-suspended task on this semaphore's wait queue. `sem_ptr` is
    /// `self` round-tripped through a `usize`, the same way a C kernel
    /// would pass a `void *` context — sound here because every
    /// `Semaphore` this crate builds outlives any task that can still be
    /// blocked on it.
    fn enqueue_waiter(prev: TaskId, sem_ptr: usize) {
        let sem = unsafe { &*(sem_ptr as *const Semaphore) };
        sem.state.acquire().waiters.push_back(prev);
    }

    /// `release` (§4.9): if the wait queue is non-empty, dequeue one waiter
    /// and resume it directly (the unit is handed off, never counted);
    /// otherwise increment the count.
    pub fn release(&self) {
        let mut state = self.state.acquire();
        if let Some(waiter) = state.waiters.pop_front() {
            drop(state);
            crate::sched::resume(waiter);
        } else {
            state.count += 1;
        }
    }

    /// `acquire-all` (§4.9): if `count >= 1`, atomically take the entire
    /// count and return it; otherwise block until released and retry.
    ///
    /// A caller mixed into the same wait queue as plain `acquire` waiters
    /// may be resumed by a hand-off that leaves `count` at zero (DESIGN.md:
    /// `release` does not increment when waiters are queued) — the retry
    /// loop below is what "block until released and retry" calls for, and
    /// correctly makes progress once a `release` occurs with no other
    /// waiter ahead of it in the queue.
    pub fn acquire_all(&self) -> u32 {
        loop {
            let mut state = self.state.acquire();
            if state.count >= 1 {
                let taken = state.count;
                state.count = 0;
                return taken;
            }
            drop(state);
            crate::sched::suspend_current(Self::enqueue_waiter, self as *const Semaphore as usize);
        }
    }

    /// Advisory only (§4.9) — may be stale the instant it's read.
    pub fn get_value(&self) -> u32 {
        self.state.acquire().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_consumes_available_count() {
        let sem = Semaphore::new(2);
        sem.acquire();
        sem.acquire();
        assert_eq!(sem.get_value(), 0);
    }

    #[test]
    fn release_increments_with_no_waiters() {
        let sem = Semaphore::new(0);
        sem.release();
        sem.release();
        assert_eq!(sem.get_value(), 2);
        sem.acquire();
        assert_eq!(sem.get_value(), 1);
    }

    #[test]
    fn acquire_all_takes_entire_count() {
        let sem = Semaphore::new(5);
        let taken = sem.acquire_all();
        assert_eq!(taken, 5);
        assert_eq!(sem.get_value(), 0);
    }

    #[test]
    fn release_after_n_acquires_matches_surplus() {
        // S6 (§8): after N releases and <=N acquires the surplus equals count.
        let sem = Semaphore::new(0);
        for _ in 0..10 {
            sem.release();
        }
        for _ in 0..6 {
            sem.acquire();
        }
        assert_eq!(sem.get_value(), 4);
    }
}
