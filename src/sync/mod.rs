//! Synchronization primitives (§3).
//!
//! `spinlock` is the kernel's own primitive, used in places where other
//! modules reach for `spin::Mutex` directly — that crate is kept as the
//! lowest layer `Spinlock` builds on rather than replaced, the same way
//! `sched::task` builds `TASKS` on top of `spin::Mutex` today. `semaphore`
//! and `rwlock` are grounded directly in spec §3's stated semantics and
//! written in the idiom the spinlock establishes.

pub mod rwlock;
pub mod semaphore;
pub mod spinlock;

pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::Spinlock;
