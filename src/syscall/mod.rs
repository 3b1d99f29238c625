//! System-call vector (C10, §6).
//!
//! One software-interrupt vector (`int 0x80`), a call number plus up to five
//! pointer-sized arguments in, up to six return-value slots out — register
//! convention lifted from the classic i386 `int 0x80` ABI (`eax` = number in
//! / result slot 0 out; `ebx, ecx, edx, esi, edi` = up to five arguments in /
//! result slots 1..5 out): the argument/return shape is fixed without a
//! concrete register assignment, so this convention is adopted directly.
//! Call numbers 1..15 are reserved
//! (`original_source/src/interrupt/systemcall.h`); 16..32 are the dynamic
//! slots `registry` hands out.

pub mod registry;

use crate::config::{FILE_SERVICE_NAME, MAX_USER_SEMAPHORES, NUMBER_OF_RESERVED_SYSTEM_CALLS};
use crate::error::IO_REQUEST_FAILURE;
use crate::io::request::IoRequestId;
use crate::sched::task::TaskId;
use crate::sync::semaphore::Semaphore;

/// Reserved call numbers (§6, recovered in SPEC_FULL.md §6).
pub mod numbers {
    pub const TASK_DEFINED: u32 = 1;
    pub const ACQUIRE_SEMAPHORE: u32 = 2;
    pub const RELEASE_SEMAPHORE: u32 = 3;
    pub const REGISTER_SERVICE: u32 = 4;
    pub const QUERY_SERVICE: u32 = 5;
    pub const ALLOCATE_HEAP: u32 = 6;
    pub const RELEASE_HEAP: u32 = 7;
    pub const SET_ALARM: u32 = 8;
    pub const WAIT_IO: u32 = 9;
    pub const WAIT_IO_RETURN: u32 = 10;
    pub const OPEN_FILE: u32 = 11;
    pub const CLOSE_FILE: u32 = 12;
    pub const READ_FILE: u32 = 13;
    pub const WRITE_FILE: u32 = 14;
    pub const SEEK_FILE: u32 = 15;
}

/// Stack layout `pushad` leaves behind, lowest address first — matches the
/// naked entry stub in `arch::x86::idt`. Only `eax`, `ebx`, `ecx`, `edx`,
/// `esi`, `edi` carry ABI meaning; `ebp` and the `pushad`-recorded `esp` are
/// untouched scratch the stub restores on the way out.
#[repr(C)]
pub struct SyscallRegisters {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_snapshot: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// A small fixed table of kernel-owned semaphores `ACQUIRE_SEMAPHORE`/
/// `RELEASE_SEMAPHORE` address by index (§6). The spec has no syscall for
/// creating one dynamically, so this plays the role a heap-backed registry
/// would in a larger system; see DESIGN.md.
static USER_SEMAPHORES: [Semaphore; MAX_USER_SEMAPHORES] = [const { Semaphore::new(0) }; MAX_USER_SEMAPHORES];

fn failure() -> [u32; 6] {
    [IO_REQUEST_FAILURE, 0, 0, 0, 0, 0]
}

fn ok(value: u32) -> [u32; 6] {
    [value, 0, 0, 0, 0, 0]
}

/// Called from the naked `syscall_int80` stub with a pointer to the
/// GPRs it just saved. Re-enables interrupts (§4.9: a syscall does not run
/// with interrupts masked once its own arguments are read), dispatches, and
/// writes the result back into the same registers for `iretd` to restore.
///
/// # Safety
/// `regs` must point at a live `SyscallRegisters` on the current stack, as
/// only the naked entry stub in `arch::x86::idt` guarantees.
#[no_mangle]
pub unsafe extern "C" fn dispatch_from_interrupt(regs: *mut SyscallRegisters) {
    let regs = &mut *regs;
    crate::arch::x86::enable_interrupts();

    let number = regs.eax;
    let args = [regs.ebx, regs.ecx, regs.edx, regs.esi, regs.edi];
    let result = dispatch(number, args);

    regs.eax = result[0];
    regs.ebx = result[1];
    regs.ecx = result[2];
    regs.edx = result[3];
    regs.esi = result[4];
    regs.edi = result[5];
}

fn current_task() -> Option<TaskId> {
    crate::sched::current()
}

fn dispatch(number: u32, args: [u32; 5]) -> [u32; 6] {
    use numbers::*;
    match number {
        TASK_DEFINED => {
            log::warn!("[syscall] call number {TASK_DEFINED} (task-defined) is kernel-internal, not user-callable");
            failure()
        }
        ACQUIRE_SEMAPHORE => semaphore_op(args[0], true),
        RELEASE_SEMAPHORE => semaphore_op(args[0], false),
        REGISTER_SERVICE => register_service(args),
        QUERY_SERVICE => query_service(args),
        ALLOCATE_HEAP => allocate_heap(args[0]),
        RELEASE_HEAP => release_heap(args[0]),
        SET_ALARM => set_alarm(args),
        WAIT_IO => wait_io(),
        WAIT_IO_RETURN => wait_io_return(args),
        OPEN_FILE | CLOSE_FILE | READ_FILE | WRITE_FILE | SEEK_FILE => forward_to_file_service(number, args),
        n if n >= NUMBER_OF_RESERVED_SYSTEM_CALLS => registry::dispatch(n, args).unwrap_or_else(failure),
        _ => {
            log::warn!("[syscall] call number {number} not implemented");
            failure()
        }
    }
}

fn semaphore_op(index: u32, acquire: bool) -> [u32; 6] {
    match USER_SEMAPHORES.get(index as usize) {
        Some(sem) if acquire => {
            sem.acquire();
            ok(0)
        }
        Some(sem) => {
            sem.release();
            ok(0)
        }
        None => failure(),
    }
}

/// Reads up to `MAX_SERVICE_NAME_LEN` bytes of a NUL-terminated name out of
/// the caller's own address space. Driver registration is a trusted,
/// in-kernel operation in this design (the services that call it are
/// privileged tasks, not arbitrary ring-3 applications), so the pointer is
/// trusted rather than separately validated — see DESIGN.md.
unsafe fn read_name(ptr: u32) -> heapless::String<{ crate::config::MAX_SERVICE_NAME_LEN }> {
    let mut name = heapless::String::new();
    let mut cursor = ptr as *const u8;
    for _ in 0..crate::config::MAX_SERVICE_NAME_LEN {
        let byte = *cursor;
        if byte == 0 {
            break;
        }
        if name.push(byte as char).is_err() {
            break;
        }
        cursor = cursor.add(1);
    }
    name
}

fn register_service(args: [u32; 5]) -> [u32; 6] {
    let name = unsafe { read_name(args[0]) };
    let handler = unsafe { core::mem::transmute::<u32, registry::ServiceHandler>(args[1]) };
    match registry::register_service(&name, handler, args[2] as usize) {
        Ok(number) => ok(number),
        Err(_) => failure(),
    }
}

fn query_service(args: [u32; 5]) -> [u32; 6] {
    let name = unsafe { read_name(args[0]) };
    match registry::query_service(&name) {
        Ok(number) => ok(number),
        Err(_) => failure(),
    }
}

fn allocate_heap(size: u32) -> [u32; 6] {
    match crate::memory::slab::allocate(size as usize) {
        Ok(ptr) => ok(ptr.as_ptr() as u32),
        Err(_) => failure(),
    }
}

fn release_heap(ptr: u32) -> [u32; 6] {
    match core::ptr::NonNull::new(ptr as *mut u8) {
        Some(ptr) => {
            crate::memory::slab::free(ptr);
            ok(0)
        }
        None => failure(),
    }
}

/// `args[0]`/`args[1]` pack a millisecond count across two registers
/// (low, high) since a single 32-bit register cannot carry the full 64-bit
/// duration `timer::sleep_ms` takes.
fn set_alarm(args: [u32; 5]) -> [u32; 6] {
    let ms = (args[0] as u64) | ((args[1] as u64) << 32);
    match crate::timer::sleep_ms(ms) {
        Ok(()) => ok(0),
        Err(_) => failure(),
    }
}

fn wait_io() -> [u32; 6] {
    let Some(task) = current_task() else { return failure() };
    match crate::io::request::wait_io(task) {
        Ok(request) => ok(request.raw()),
        Err(_) => failure(),
    }
}

/// `wait-io-return(request_id, n, out_ptr_0, out_ptr_1, out_ptr_2)`: unlike
/// every other call, the last three argument registers are themselves
/// output pointers (one word each) rather than input values — the ABI has
/// room for at most three return pointers this way, so `n` is capped at 3.
fn wait_io_return(args: [u32; 5]) -> [u32; 6] {
    let Some(task) = current_task() else { return failure() };
    let request = IoRequestId::from_raw(args[0]);
    let n = (args[1] as usize).min(3);
    let mut buf = [0u32; 3];
    match crate::io::request::wait_io_return(task, request, n, &mut buf[..n]) {
        Ok(()) => {
            let out_ptrs = [args[2], args[3], args[4]];
            for i in 0..n {
                if out_ptrs[i] != 0 {
                    unsafe { *(out_ptrs[i] as *mut u32) = buf[i] };
                }
            }
            ok(0)
        }
        Err(_) => failure(),
    }
}

/// File operations (§6: "call numbers 11..15 are reserved but their handler
/// bodies live in the out-of-scope FAT reader; this crate only reserves the
/// numbers and marshals arguments to whichever service registered the
/// filesystem name"). Forwards verbatim to whatever dynamic slot is
/// currently registered under `FILE_SERVICE_NAME`.
fn forward_to_file_service(number: u32, args: [u32; 5]) -> [u32; 6] {
    let _ = number;
    match registry::query_service(FILE_SERVICE_NAME) {
        Ok(slot) => registry::dispatch(slot, args).unwrap_or_else(failure),
        Err(_) => failure(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreserved_unregistered_call_fails() {
        assert_eq!(dispatch(numbers::TASK_DEFINED, [0; 5]), failure());
    }

    #[test]
    fn unknown_call_number_fails() {
        assert_eq!(dispatch(999, [0; 5]), failure());
    }

    #[test]
    fn semaphore_acquire_release_round_trips() {
        // Index far enough from 0 to avoid colliding with another test's
        // index in the shared static table.
        let index = 7;
        assert_eq!(dispatch(numbers::RELEASE_SEMAPHORE, [index, 0, 0, 0, 0]), ok(0));
        assert_eq!(dispatch(numbers::ACQUIRE_SEMAPHORE, [index, 0, 0, 0, 0]), ok(0));
    }

    #[test]
    fn semaphore_index_out_of_range_fails() {
        assert_eq!(dispatch(numbers::ACQUIRE_SEMAPHORE, [MAX_USER_SEMAPHORES as u32, 0, 0, 0, 0]), failure());
    }

    #[test]
    fn file_call_without_registered_fat_service_fails() {
        assert_eq!(dispatch(numbers::OPEN_FILE, [0; 5]), failure());
    }

    #[test]
    fn release_heap_rejects_null_pointer() {
        assert_eq!(dispatch(numbers::RELEASE_HEAP, [0, 0, 0, 0, 0]), failure());
    }
}
