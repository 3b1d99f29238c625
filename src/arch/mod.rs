//! Architecture support.
//!
//! A single target is implemented: 32-bit x86, possibly multiprocessor.
//! There is no widely used no_std crate covering protected-mode i386, so
//! the register/segment/paging primitives below are hand-rolled — raw
//! `Entry = u32` descriptors and inline `asm!` register access, no
//! abstraction over a crate that assumes long mode.

pub mod x86;
