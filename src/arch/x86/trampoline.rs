//! Real-mode AP trampoline (C12, §4.10).
//!
//! A tiny real-mode stub that takes a newly INIT-SIPI-SIPI'd processor from
//! its post-reset 16-bit state into 32-bit protected mode with paging
//! already enabled against the *kernel* page directory, then jumps to a
//! fixed Rust entry point. Three scratch words at the end of the blob
//! (`trampoline_stack_ptr`, `trampoline_cr3`, `trampoline_entry_ptr`) are
//! poked by the BSP after copying the blob and before sending the SIPI —
//! the same "fixed memory word the bring-up code fills in" trick every
//! hobby-OS AP trampoline uses (see e.g. the Rust OSDev wiki's SMP article).
//!
//! Every label is computed as an offset from `trampoline_start`, not an
//! absolute address, since this code is assembled at its normal link
//! address but *executed* only after being copied byte-for-byte to
//! `config::AP_TRAMPOLINE_PHYS`.

use core::arch::global_asm;

global_asm!(
    ".global trampoline_start",
    ".global trampoline_end",
    ".global trampoline_stack_ptr_offset",
    ".global trampoline_cr3_offset",
    ".global trampoline_entry_ptr_offset",
    "trampoline_start:",
    ".code16",
    "cli",
    "xor ax, ax",
    "mov ds, ax",
    "mov es, ax",
    "mov ss, ax",
    "lgdt [trampoline_gdt_ptr]",
    "mov eax, cr0",
    "or al, 1",
    "mov cr0, eax",
    ".byte 0x66, 0xEA", // operand-size-override + far jmp ptr16:32
    ".long (protected_mode_entry - trampoline_start) + {base}",
    ".word 0x08",
    ".code32",
    "protected_mode_entry:",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov ss, ax",
    "mov esp, [(trampoline_stack_ptr - trampoline_start) + {base}]",
    "mov eax, [(trampoline_cr3 - trampoline_start) + {base}]",
    "mov cr3, eax",
    "mov eax, cr0",
    "or eax, 0x80000000",
    "mov cr0, eax",
    "jmp dword ptr [(trampoline_entry_ptr - trampoline_start) + {base}]",
    ".align 4",
    "trampoline_gdt:",
    ".quad 0", // null
    ".quad 0x00CF9A000000FFFF", // 0x08: flat 32-bit code, ring0
    ".quad 0x00CF92000000FFFF", // 0x10: flat 32-bit data, ring0
    "trampoline_gdt_ptr:",
    ".word 23",
    ".long (trampoline_gdt - trampoline_start) + {base}",
    "trampoline_stack_ptr:",
    ".long 0",
    "trampoline_cr3:",
    ".long 0",
    "trampoline_entry_ptr:",
    ".long 0",
    "trampoline_end:",
    base = const crate::config::AP_TRAMPOLINE_PHYS,
);

extern "C" {
    static trampoline_start: u8;
    static trampoline_end: u8;
    static trampoline_stack_ptr: u8;
    static trampoline_cr3: u8;
    static trampoline_entry_ptr: u8;
}

/// Length of the blob to copy to `config::AP_TRAMPOLINE_PHYS`.
pub fn len() -> usize {
    unsafe { (&trampoline_end as *const u8).offset_from(&trampoline_start as *const u8) as usize }
}

pub fn start_ptr() -> *const u8 {
    unsafe { &trampoline_start as *const u8 }
}

/// Offsets of the three scratch words the BSP fills in after copying the
/// blob, relative to the destination base (`config::AP_TRAMPOLINE_PHYS`).
pub fn stack_ptr_offset() -> usize {
    unsafe { (&trampoline_stack_ptr as *const u8).offset_from(&trampoline_start as *const u8) as usize }
}

pub fn cr3_offset() -> usize {
    unsafe { (&trampoline_cr3 as *const u8).offset_from(&trampoline_start as *const u8) as usize }
}

pub fn entry_ptr_offset() -> usize {
    unsafe { (&trampoline_entry_ptr as *const u8).offset_from(&trampoline_start as *const u8) as usize }
}
