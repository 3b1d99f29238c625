//! Task context switch (§4.7).
//!
//! Callee-saved-register switch: everything the System V i386 calling
//! convention requires the callee to preserve (`ebx`, `esi`, `edi`, `ebp`)
//! plus the stack pointer is saved on the outgoing task's own stack, and the
//! incoming task's stack pointer is loaded before returning — the classic
//! "switch is just a very unusual function call" shape. Caller-saved
//! registers, segment registers, and FPU/SSE state are not preserved here:
//! this kernel does not run floating-point code in task bodies (no FPU
//! save/restore is specified — an explicit Non-goal of §4.7).

use core::arch::asm;

/// Saved-register layout at the top of a suspended task's stack. Only
/// `esp` (recorded as the task's `stack_pointer`) is kept in `Task`; this
/// struct exists purely to document the stack layout `switch` relies on.
/// Field order matches `switch`'s push/pop sequence exactly (`push ebp;
/// push ebx; push esi; push edi` then the original return address) —
/// `ebx`/`ebp` are declared in pop order, not alphabetically.
#[repr(C)]
pub struct SavedContext {
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    pub eip: u32,
}

/// Builds the initial stack contents for a never-yet-run task so that the
/// first `switch` into it lands in `first_run_stub`, which drains this
/// processor's pending post-switch callback (§4.7 "post_switch runs on the
/// new task's stack after the switch") before jumping into `entry(arg)` —
/// a freshly spawned task never itself passes through `dispatch`'s own
/// post-switch point, since it has no prior `switch()` call to resume
/// into. Returns the initial stack pointer to store in the task's
/// `Context`.
///
/// # Safety
/// `stack_top` must point one-past-the-end of a writable region at least
/// `size_of::<SavedContext>()` bytes long, 4-byte aligned.
pub unsafe fn init_stack(stack_top: *mut u8, entry: extern "C" fn(usize) -> !, arg: usize) -> u32 {
    let mut sp = stack_top as u32;

    // `first_run_stub(arg, entry)`, pushed as if by a `call` that never
    // returns: cdecl order puts the first parameter nearest the return
    // address, so `entry` (the second parameter) is pushed first.
    sp -= 4;
    *(sp as *mut u32) = entry as usize as u32;
    sp -= 4;
    *(sp as *mut u32) = arg as u32;
    sp -= 4;
    *(sp as *mut u32) = trampoline as u32; // return address for the stub's frame, unused

    sp -= core::mem::size_of::<SavedContext>() as u32;
    let ctx = sp as *mut SavedContext;
    (*ctx).edi = 0;
    (*ctx).esi = 0;
    (*ctx).ebx = 0;
    (*ctx).ebp = 0;
    (*ctx).eip = first_run_stub as u32;

    sp
}

/// Runs once, the very first time a freshly spawned task is dispatched.
/// Drains the owning processor's pending post-switch callback exactly the
/// way `sched::dispatch` does for every later resume, then hands off to
/// the task's real entry point. `entry` travels here as a raw `u32`
/// (rather than as a typed `fn` pointer) purely because it has to survive
/// the same untyped stack-word round trip `arg` does.
extern "C" fn first_run_stub(arg: usize, entry: u32) -> ! {
    crate::sched::run_pending_post_switch();
    let entry: extern "C" fn(usize) -> ! = unsafe { core::mem::transmute(entry as usize) };
    entry(arg)
}

/// Return address pushed under `first_run_stub`'s synthetic frame; never
/// actually reached (the stub diverges into `entry`), but traps rather
/// than falling off into garbage if that ever changes.
extern "C" fn trampoline(_arg: usize) -> ! {
    crate::kpanic!("task entry point returned");
}

/// Switches from the current stack to `next_sp`, saving the current
/// register state to `*current_sp_out` first. On the next switch back into
/// this task, execution resumes here as if `switch` had just returned.
///
/// # Safety
/// Both stack pointers must belong to stacks built by `init_stack` (or a
/// previously-saved `switch` exit), and the caller must not hold any
/// `spin::Mutex` guard across the call — the outgoing task may not run
/// again for an arbitrary amount of time.
#[naked]
pub unsafe extern "C" fn switch(current_sp_out: *mut u32, next_sp: u32) {
    // cdecl passes both arguments on the stack; a naked function has no
    // prologue, so they are read relative to `esp` as it stands on entry
    // (return address at [esp], current_sp_out at [esp+4], next_sp at
    // [esp+8]) before anything is pushed.
    asm!(
        "mov eax, [esp + 4]", // current_sp_out
        "mov edx, [esp + 8]", // next_sp
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "mov [eax], esp",
        "mov esp, edx",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
        options(noreturn),
    );
}
