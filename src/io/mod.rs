//! I/O request lifecycle (C11, §4.9 + §3 Data model).
//!
//! The universal rendezvous object between a system-call handler, a driver
//! task, and the scheduler: a syscall pends a request on a driver's queue
//! and suspends the caller; the driver later `complete`s or `cancel`s it;
//! the caller's `wait_io`/`wait_io_return` observes exactly one of the two.

pub mod request;
