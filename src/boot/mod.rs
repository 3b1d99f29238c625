//! Boot sequencing and entry point (§4.6 step 0, §4.10).
//!
//! A staged-init shape (`init_early`/`init_memory`/`init_cpu`/
//! `init_interrupts`/`init_subsystems`) wires this crate's own subsystems
//! in the order their documented preconditions require: GDT before IDT
//! (the IDT's gate
//! descriptors reference `KERNEL_CODE_SELECTOR`), IDT before the logging
//! sink enables interrupts, memory before the scheduler (task stacks come
//! from the kernel heap), interrupts before the timer (the timer claims a
//! vector), and the BSP's own `PerCpu` slot before any AP is started.

#[cfg(feature = "axiom-smp")]
pub mod smp;

use crate::memory::MemoryRegion;

/// Real entry point once the out-of-scope boot collaborator has handed off
/// protected-mode execution with a valid stack (§1: "BIOS memory-map
/// ingestion performed by the boot collaborator" — this crate starts from
/// an already-parsed `&[MemoryRegion]`, not raw E820/multiboot records).
pub fn start(regions: &[MemoryRegion], ap_apic_ids: &[u8]) -> ! {
    crate::arch::x86::gdt::init();
    crate::arch::x86::idt::init();
    crate::log::init();

    log::info!("[boot] axiom kernel starting, {} memory regions reported", regions.len());

    crate::memory::init(regions);
    crate::memory::page::tlb::init();

    crate::arch::x86::pic::init(crate::arch::x86::idt::vectors::IRQ_BASE);

    let bsp_sp = crate::arch::x86::read_esp();
    let bsp_cr3 = crate::arch::x86::read_cr3();
    crate::sched::init_idle(bsp_sp, bsp_cr3);

    crate::timer::init();

    #[cfg(feature = "axiom-smp")]
    if !ap_apic_ids.is_empty() {
        smp::start_aps(ap_apic_ids);
    }
    #[cfg(not(feature = "axiom-smp"))]
    if !ap_apic_ids.is_empty() {
        log::warn!("[boot] {} application processor(s) reported but axiom-smp is disabled; BSP-only", ap_apic_ids.len());
    }

    log::info!("[boot] {} processor(s) online, entering scheduler", crate::sched::percpu::online_count());

    loop {
        crate::arch::x86::enable_interrupts();
        crate::arch::x86::hlt();
    }
}
