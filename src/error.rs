//! Crate-wide error taxonomy (§7).
//!
//! Kernel-internal APIs return `Result<T, KernelError>` and propagate with
//! `?` rather than unwinding. Only the syscall-dispatch boundary (§6, §7)
//! collapses a `KernelError` into the untyped sentinel convention user tasks
//! observe.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An allocator (buddy, slab, linear) has no block satisfying the request.
    OutOfMemory,
    /// A caller-supplied value violates a documented precondition.
    InvalidArgument(&'static str),
    /// A lookup (service name, I/O request id, vector) found nothing.
    NotFound,
    /// A registration would collide with an existing entry.
    AlreadyExists,
    /// A counted resource (descriptor slots, dynamic syscall slots, task table) is full.
    Exhausted,
    /// An address fails its required alignment.
    Unaligned,
    /// An address or size falls outside the owning manager's span.
    OutOfRange,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::InvalidArgument(why) => write!(f, "invalid argument: {why}"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::AlreadyExists => write!(f, "already exists"),
            KernelError::Exhausted => write!(f, "resource exhausted"),
            KernelError::Unaligned => write!(f, "unaligned address"),
            KernelError::OutOfRange => write!(f, "address out of range"),
        }
    }
}

pub type KResult<T> = Result<T, KernelError>;

/// Sentinel returned across the syscall ABI in place of a successful request
/// id or return value (§6 `IO_REQUEST_FAILURE`, §7).
pub const IO_REQUEST_FAILURE: u32 = u32::MAX;

/// Service-name registry error codes (§4.9), encoded as small negative-space
/// constants the way `original_source/src/interrupt/systemcall.h` defines
/// `enum ServiceNameError`.
pub const INVALID_NAME: i32 = -1024;
pub const SERVICE_EXISTING: i32 = -1025;
pub const SERVICE_NOT_EXISTING: i32 = -1026;
pub const TOO_MANY_SERVICES: i32 = -1027;

impl KernelError {
    /// Collapse into the syscall ABI's untyped `u32` return convention.
    pub fn to_syscall_sentinel(self) -> u32 {
        IO_REQUEST_FAILURE
    }
}

/// Halts the current processor after logging a fatal invariant violation.
/// Never returns. The offending processor only; other processors continue
/// (no global halt) unless the caller chooses to IPI them separately.
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)*) => {{
        log::error!("KERNEL PANIC at {}:{}: {}", file!(), line!(), format_args!($($arg)*));
        $crate::arch::x86::halt_forever()
    }};
}
