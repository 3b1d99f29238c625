//! Generated IRQ/IPI entry stubs (§4.5, §4.9).
//!
//! `idt::init` needs one code address per vector to hand the CPU; the
//! `interrupts` module's per-vector handler chain lives in Rust and can't
//! itself be the target of an `lidt`-installed gate. This emits one
//! `pushad`/call/`popad`/`iretd` wrapper for every vector in
//! `idt::vectors::IRQ_BASE..=idt::vectors::IPI_TLB_SHOOTDOWN`, at a fixed
//! stride, so `idt::init` can compute vector V's entry point as
//! `irq_stub_table + (V - IRQ_BASE) * STUB_STRIDE` instead of needing 210
//! separate named `extern "C"` symbols.
//!
//! Every stub is hand-encoded to an identical byte length: `push` the
//! vector number and `jmp` into the shared tail are both written as raw
//! opcode bytes rather than mnemonics, since the assembler would otherwise
//! pick a shorter 2-byte `push imm8` for small vector numbers and a 2-byte
//! `jmp rel8` for whichever stub lands close enough to `irq_common_stub` —
//! either one would break the fixed-stride address arithmetic.

use core::arch::global_asm;

use super::idt::vectors::{IPI_TLB_SHOOTDOWN, IRQ_BASE};

/// Bytes per generated stub: `push dword imm32` (5) + `jmp rel32` (5).
pub const STUB_STRIDE: u32 = 10;

global_asm!(
    ".global irq_stub_table",
    ".align 4",
    "irq_stub_table:",
    ".set cur_vec, {irq_base}",
    ".rept {irq_count}",
    ".byte 0x68", // push imm32 opcode
    ".long cur_vec",
    ".byte 0xE9", // jmp rel32 opcode
    ".long irq_common_stub - (. + 4)",
    ".set cur_vec, cur_vec + 1",
    ".endr",
    "irq_common_stub:",
    // The CPU has already pushed its own trap frame (EIP/CS/EFLAGS, plus
    // ESP/SS on a privilege-level change); `pushad` sits on top of that and
    // the vector word each stub pushed sits on top of `pushad`.
    "pushad",
    "mov eax, [esp + 32]", // the stub-pushed vector, just above pushad's 8 regs
    "push eax",
    "call {dispatch}",
    "add esp, 4",
    "popad",
    "add esp, 4", // drop the vector word
    "iretd",
    irq_base = const IRQ_BASE,
    irq_count = const ((IPI_TLB_SHOOTDOWN - IRQ_BASE) as u32 + 1),
    dispatch = sym irq_dispatch_trampoline,
);

extern "C" {
    static irq_stub_table: u8;
}

/// Address of the generated entry stub for `vector`, for installing as an
/// IDT gate. `vector` must fall within
/// `idt::vectors::IRQ_BASE..=idt::vectors::IPI_TLB_SHOOTDOWN`.
pub fn stub_address(vector: u8) -> u32 {
    debug_assert!((IRQ_BASE..=IPI_TLB_SHOOTDOWN).contains(&vector));
    let base = unsafe { &irq_stub_table as *const u8 as u32 };
    base + (vector - IRQ_BASE) as u32 * STUB_STRIDE
}

/// Bridges the raw asm `call` (cdecl, no type information) into
/// `interrupts::dispatch`, which is an ordinary Rust function rather than
/// `extern "C"` so it stays directly callable from tests.
extern "C" fn irq_dispatch_trampoline(vector: u32) {
    super::interrupts::dispatch(vector as u8);
}
