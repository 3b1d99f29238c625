//! Multiprocessor bring-up (C12, §4.10).
//!
//! `start_aps` runs once on the bootstrap processor, after the BSP's own
//! `PerCpu` slot and idle task exist. For each reported application
//! processor it pokes the real-mode trampoline's three scratch words and
//! drives the INIT-SIPI-SIPI sequence over the local APIC; the AP itself
//! re-enters Rust at `ap_entry` once it lands in protected mode with paging
//! already enabled against the kernel's own page directory.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::x86::lapic::IpiDeliveryMode;
use crate::config::{
    AP_BOOT_TIMEOUT_SPINS, AP_INIT_DEASSERT_SPINS, AP_SIPI_DELAY_SPINS, AP_TRAMPOLINE_PHYS, KERNEL_LINEAR_BEGIN,
    KERNEL_STACK_SIZE, MAX_CPUS,
};
use crate::memory::PageAttribute;
use crate::sched::percpu;

/// Incremented by each AP once its idle task is installed and it is about
/// to enter the interrupt-driven scheduler loop. The BSP's rendezvous wait
/// below watches this counter, not `PerCpu::online` — that flag is set
/// early, by the BSP itself, purely so the AP can locate its own table slot
/// by APIC id the moment it calls `percpu::current_index` (see below).
static READY: AtomicU32 = AtomicU32::new(0);

fn spin_delay(iterations: u32) {
    for _ in 0..iterations {
        core::hint::spin_loop();
    }
}

/// Brings up every processor in `ap_apic_ids`, one at a time. An AP that
/// never signals readiness within `AP_BOOT_TIMEOUT_SPINS` is logged and
/// left offline; there is no hotplug retry (§4.10 Non-goals).
pub fn start_aps(ap_apic_ids: &[u8]) {
    let kernel_cr3 = crate::memory::page::with_kernel_manager(|pm| pm.root_physical());
    let dest_linear = KERNEL_LINEAR_BEGIN + AP_TRAMPOLINE_PHYS;

    // The trampoline's destination is a fixed low-memory scratch page, not
    // a frame drawn from the buddy allocator, so it has to be mapped into
    // the kernel window explicitly before it can be reached through its
    // kernel-linear alias.
    crate::memory::page::with_kernel_manager(|pm| pm.set_page(dest_linear, AP_TRAMPOLINE_PHYS, PageAttribute::KernelPage, false))
        .expect("failed to map AP trampoline scratch page");

    unsafe {
        core::ptr::copy_nonoverlapping(
            crate::arch::x86::trampoline::start_ptr(),
            dest_linear as *mut u8,
            crate::arch::x86::trampoline::len(),
        );
    }

    // SIPI vector = trampoline's destination physical page number, per the
    // x86 MP convention that the startup vector names a page, not a byte
    // address.
    let sipi_vector = (AP_TRAMPOLINE_PHYS >> 12) as u8;

    for (i, &apic_id) in ap_apic_ids.iter().enumerate() {
        let index = i + 1; // slot 0 belongs to the BSP (sched::init_idle).
        if index >= MAX_CPUS {
            log::warn!("[smp] apic_id={} exceeds MAX_CPUS ({}), not started", apic_id, MAX_CPUS);
            continue;
        }

        percpu::register(index, apic_id);

        let stack = crate::memory::slab::allocate(KERNEL_STACK_SIZE as usize).expect("no kernel memory for AP stack");
        let stack_top = stack.as_ptr() as u32 + KERNEL_STACK_SIZE;

        unsafe {
            let stack_word = (dest_linear as usize + crate::arch::x86::trampoline::stack_ptr_offset()) as *mut u32;
            let cr3_word = (dest_linear as usize + crate::arch::x86::trampoline::cr3_offset()) as *mut u32;
            let entry_word = (dest_linear as usize + crate::arch::x86::trampoline::entry_ptr_offset()) as *mut u32;
            core::ptr::write_volatile(stack_word, stack_top);
            core::ptr::write_volatile(cr3_word, kernel_cr3);
            core::ptr::write_volatile(entry_word, ap_entry as usize as u32);
        }

        let ready_before = READY.load(Ordering::Acquire);

        crate::arch::x86::lapic::send_ipi_to(apic_id, 0, IpiDeliveryMode::Init);
        spin_delay(AP_INIT_DEASSERT_SPINS);
        crate::arch::x86::lapic::send_ipi_to(apic_id, sipi_vector, IpiDeliveryMode::Startup);
        spin_delay(AP_SIPI_DELAY_SPINS);
        // A second SIPI, per the Intel MP spec, covers the case where the
        // first one arrived before the AP was ready to latch it.
        crate::arch::x86::lapic::send_ipi_to(apic_id, sipi_vector, IpiDeliveryMode::Startup);

        let mut waited: u32 = 0;
        loop {
            if READY.load(Ordering::Acquire) != ready_before {
                log::info!("[smp] apic_id={} online (processor {})", apic_id, index);
                break;
            }
            if waited >= AP_BOOT_TIMEOUT_SPINS {
                log::warn!("[smp] apic_id={} did not come up, excluded", apic_id);
                break;
            }
            core::hint::spin_loop();
            waited += 1;
        }
    }
}

/// Entry point an application processor jumps to out of the real-mode
/// trampoline, already running in 32-bit protected mode with paging enabled
/// against the kernel's page directory and `esp` pointing at the stack
/// `start_aps` allocated for it. Mirrors the BSP's own `boot::start`
/// per-processor setup (GDT/IDT reload, local APIC enable, idle task) minus
/// the one-time global init steps the BSP already performed.
unsafe extern "C" fn ap_entry() -> ! {
    crate::arch::x86::gdt::init();
    crate::arch::x86::idt::init();
    crate::arch::x86::lapic::init();

    let sp = crate::arch::x86::read_esp();
    let cr3 = crate::arch::x86::read_cr3();
    crate::sched::init_idle(sp, cr3);

    READY.fetch_add(1, Ordering::Release);

    loop {
        crate::arch::x86::enable_interrupts();
        crate::arch::x86::hlt();
    }
}
