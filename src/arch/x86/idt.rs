//! 32-bit Interrupt Descriptor Table.
//!
//! Installs the CPU exception vectors with their own `extern
//! "x86-interrupt"` handlers below, the full device-IRQ/IPI range
//! (`vectors::IRQ_BASE..=vectors::IPI_TLB_SHOOTDOWN`) with the generated
//! stub table from `irq_stub.rs` that feeds `interrupts::dispatch`, and,
//! when `axiom-syscall-int80` is enabled, the `int 0x80` software-interrupt
//! gate used by `syscall::dispatch`. Exception handlers record per-CPU
//! fault counters (`CpuFaultStats`) in `sched::percpu` rather than behind a
//! raw GS-base offset, since this target has no swapgs/GS-base MSR story
//! worth adopting for a 32-bit kernel.

use core::mem::size_of;
use lazy_static::lazy_static;
use spin::Mutex;

use super::gdt::KERNEL_CODE_SELECTOR;

pub type HandlerFn = extern "x86-interrupt" fn(&mut InterruptFrame);
pub type HandlerWithErrorFn = extern "x86-interrupt" fn(&mut InterruptFrame, u32);

#[repr(C)]
#[derive(Debug)]
pub struct InterruptFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

const GATE_INTERRUPT32: u8 = 0x8E; // present, ring0, 32-bit interrupt gate
const GATE_INTERRUPT32_USER: u8 = 0xEE; // present, ring3 callable (int80)
const GATE_TRAP32: u8 = 0x8F;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

const IDT_ENTRIES: usize = 256;

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

lazy_static! {
    static ref IDT: Mutex<Idt> = Mutex::new(Idt { entries: [IdtEntry::missing(); IDT_ENTRIES] });
}

/// Exception vector indices (Intel-architecture fixed assignment).
pub mod vectors {
    pub const DIVIDE_ERROR: u8 = 0;
    pub const DEBUG: u8 = 1;
    pub const NMI: u8 = 2;
    pub const BREAKPOINT: u8 = 3;
    pub const OVERFLOW: u8 = 4;
    pub const BOUND_RANGE: u8 = 5;
    pub const INVALID_OPCODE: u8 = 6;
    pub const DEVICE_NOT_AVAILABLE: u8 = 7;
    pub const DOUBLE_FAULT: u8 = 8;
    pub const INVALID_TSS: u8 = 10;
    pub const SEGMENT_NOT_PRESENT: u8 = 11;
    pub const STACK_SEGMENT_FAULT: u8 = 12;
    pub const GENERAL_PROTECTION_FAULT: u8 = 13;
    pub const PAGE_FAULT: u8 = 14;
    pub const FPU_ERROR: u8 = 16;
    pub const ALIGNMENT_CHECK: u8 = 17;
    pub const MACHINE_CHECK: u8 = 18;
    pub const SIMD_FP: u8 = 19;

    pub const IRQ_BASE: u8 = 0x20;
    pub const TIMER_IRQ: u8 = IRQ_BASE;
    pub const IPI_RESCHEDULE: u8 = 0xF0;
    pub const IPI_TLB_SHOOTDOWN: u8 = 0xF1;

    #[cfg(feature = "axiom-syscall-int80")]
    pub const SYSCALL_INT80: u8 = 0x80;
}

/// Per-CPU exception statistics, indexed by vector. Small and fixed-size so
/// it can live in `PerCpu` without a heap allocation (§0.4 test-tooling note:
/// exercised on the host via direct struct manipulation, not through a real
/// fault).
#[derive(Clone, Copy)]
pub struct CpuFaultStats {
    pub counts: [u32; IDT_ENTRIES],
}

impl CpuFaultStats {
    pub const fn new() -> Self {
        CpuFaultStats { counts: [0; IDT_ENTRIES] }
    }

    pub fn record(&mut self, vector: u8) {
        self.counts[vector as usize] = self.counts[vector as usize].saturating_add(1);
    }
}

pub fn init() {
    {
        let mut idt = IDT.lock();
        idt.entries[vectors::DIVIDE_ERROR as usize] =
            IdtEntry::new(divide_error as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);
        idt.entries[vectors::DEBUG as usize] =
            IdtEntry::new(debug as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);
        idt.entries[vectors::BREAKPOINT as usize] =
            IdtEntry::new(breakpoint as u32, KERNEL_CODE_SELECTOR, GATE_TRAP32);
        idt.entries[vectors::INVALID_OPCODE as usize] =
            IdtEntry::new(invalid_opcode as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);
        idt.entries[vectors::DOUBLE_FAULT as usize] =
            IdtEntry::new(double_fault as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);
        idt.entries[vectors::GENERAL_PROTECTION_FAULT as usize] =
            IdtEntry::new(general_protection_fault as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);
        idt.entries[vectors::PAGE_FAULT as usize] =
            IdtEntry::new(page_fault as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);

        // Device IRQs and the two IPI vectors all route through the same
        // generated stub table (`irq_stub.rs`), which feeds the vector
        // number to `interrupts::dispatch` — the handler-chain registry
        // drivers and the timer/TLB-shootdown subsystems register against.
        // Without this, `interrupts::dispatch` is reachable only by tests
        // calling it directly, never by a real or emulated interrupt.
        for vector in vectors::IRQ_BASE..=vectors::IPI_TLB_SHOOTDOWN {
            idt.entries[vector as usize] =
                IdtEntry::new(super::irq_stub::stub_address(vector), KERNEL_CODE_SELECTOR, GATE_INTERRUPT32);
        }

        #[cfg(feature = "axiom-syscall-int80")]
        {
            idt.entries[vectors::SYSCALL_INT80 as usize] =
                IdtEntry::new(syscall_int80 as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT32_USER);
        }
    }

    let ptr = {
        let idt = IDT.lock();
        IdtPointer {
            limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
            base: idt.entries.as_ptr() as u32,
        }
    };

    unsafe { core::arch::asm!("lidt [{}]", in(reg) &ptr, options(nostack, preserves_flags)) };

    log::info!(
        "[arch] IDT installed: {} exception vectors, irq/ipi range 0x{:x}..=0x{:x}",
        19,
        vectors::IRQ_BASE,
        vectors::IPI_TLB_SHOOTDOWN
    );
}

/// Records the fault in the running task's per-CPU stats and escalates via
/// `kpanic!` — this kernel has no user-mode fault recovery path (no
/// Non-goal waiver for it; crash-only semantics per §7).
fn on_fault(vector: u8, frame: &InterruptFrame) {
    crate::sched::percpu::with_current_fault_stats(|stats| stats.record(vector));
    log::error!(
        "fault vector={} eip=0x{:x} cs=0x{:x} eflags=0x{:x}",
        vector, { frame.eip }, { frame.cs }, { frame.eflags }
    );
}

extern "x86-interrupt" fn divide_error(frame: &mut InterruptFrame) {
    on_fault(vectors::DIVIDE_ERROR, frame);
    crate::kpanic!("divide error");
}

extern "x86-interrupt" fn debug(frame: &mut InterruptFrame) {
    on_fault(vectors::DEBUG, frame);
}

extern "x86-interrupt" fn breakpoint(frame: &mut InterruptFrame) {
    on_fault(vectors::BREAKPOINT, frame);
}

extern "x86-interrupt" fn invalid_opcode(frame: &mut InterruptFrame) {
    on_fault(vectors::INVALID_OPCODE, frame);
    crate::kpanic!("invalid opcode");
}

extern "x86-interrupt" fn double_fault(frame: &mut InterruptFrame, _error_code: u32) {
    on_fault(vectors::DOUBLE_FAULT, frame);
    crate::kpanic!("double fault");
}

extern "x86-interrupt" fn general_protection_fault(frame: &mut InterruptFrame, error_code: u32) {
    on_fault(vectors::GENERAL_PROTECTION_FAULT, frame);
    log::error!("gpf error_code={:#x}", error_code);
    crate::kpanic!("general protection fault");
}

extern "x86-interrupt" fn page_fault(frame: &mut InterruptFrame, error_code: u32) {
    let faulting_addr = super::read_cr2();
    on_fault(vectors::PAGE_FAULT, frame);
    log::error!("page fault at 0x{:x} error_code={:#x}", faulting_addr, error_code);
    crate::kpanic!("page fault");
}

// `extern "x86-interrupt"` functions only expose the trap frame
// (`InterruptFrame` above) — there is no way to read the general-purpose
// registers the syscall ABI (§6) carries its call number and arguments in.
// This needs the same kind of hand-written entry stub as `context::switch`:
// a `#[naked]` function that saves the GPRs itself before calling into Rust.
#[cfg(feature = "axiom-syscall-int80")]
#[naked]
unsafe extern "C" fn syscall_int80() {
    core::arch::asm!(
        "pushad",
        "push esp",
        "call {dispatch}",
        "add esp, 4",
        "popad",
        "iretd",
        dispatch = sym crate::syscall::dispatch_from_interrupt,
        options(noreturn),
    );
}
