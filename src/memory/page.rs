//! Page manager: two-level page tables, demand table allocation, and
//! cross-processor TLB shootdown (C4, §4.3).
//!
//! Both the kernel and every user address space map their own "own
//! tables" window the same way: the kernel's linear window
//! (`config::KERNEL_LINEAR_BEGIN..KERNEL_LINEAR_END`) is a direct map of
//! all physical memory — `linear == phys + KERNEL_LINEAR_BEGIN` — and that
//! window's page-directory entries are copied (as `external`) into every
//! user manager (§4.3 "Kernel vs. user page managers"). Because of that,
//! *any* page-table frame, wherever it belongs, is always reachable at its
//! kernel-linear alias regardless of which `CR3` is currently loaded, so
//! `set_page`/`invalidate_page`/etc. never need the "reload CR3 to edit
//! this address space's tables" dance other hobby kernels use. This is the
//! one deliberate simplification from a from-scratch recursive-mapping
//! design, recorded in DESIGN.md.

use spin::Mutex;

use crate::config::{KERNEL_LINEAR_BEGIN, KERNEL_LINEAR_END, MAX_CPUS, PAGE_SIZE};
use crate::error::{KResult, KernelError};

use super::physical;
use super::PageAttribute;

bitflags::bitflags! {
    /// Page-table-entry bits (§3 Data model: "present, writable,
    /// user-accessible, dirty, accessed, and one OS-reserved bit"). Matches
    /// the hardware i386 PTE layout directly; `AUTO_RELEASE` squats on bit 9,
    /// one of the three bits Intel reserves for OS use.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PageFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        /// OS-reserved bit: "auto-release the underlying physical page on
        /// unmap" (§3).
        const AUTO_RELEASE  = 1 << 9;
    }
}

const ADDR_MASK: u32 = 0xFFFF_F000;
const ENTRIES: usize = 1024;

#[repr(C, align(4096))]
struct Table([u32; ENTRIES]);

impl Table {
    fn zeroed() -> Self {
        Table([0; ENTRIES])
    }
}

fn dir_index(linear: u32) -> usize {
    ((linear >> 22) & 0x3FF) as usize
}

fn table_index(linear: u32) -> usize {
    ((linear >> 12) & 0x3FF) as usize
}

fn kernel_linear_of(phys: u32) -> u32 {
    phys + KERNEL_LINEAR_BEGIN
}

/// Per-directory-slot bookkeeping the hardware PDE has no room for (§3:
/// "Each page-table slot also tracks a present count and flags
/// release-when-empty and external").
#[derive(Clone, Copy)]
struct SlotMeta {
    present_count: u16,
    release_when_empty: bool,
    external: bool,
}

impl SlotMeta {
    const fn empty() -> Self {
        SlotMeta { present_count: 0, release_when_empty: false, external: false }
    }
}

pub struct PageManager {
    root_phys: u32,
    /// `reserved[begin,end)`: the linear range this manager's own table set
    /// lives in. With the direct-map simplification above this is
    /// informational only — tables are always reached via the shared
    /// kernel window — but is kept so callers that need "is this address
    /// part of my own page-table bookkeeping" can still ask (§3).
    reserved: (u32, u32),
    slots: [SlotMeta; ENTRIES],
}

impl PageManager {
    fn dir(&self) -> *mut Table {
        kernel_linear_of(self.root_phys) as *mut Table
    }

    pub fn root_physical(&self) -> u32 {
        self.root_phys
    }

    /// Maps `linear -> physical` with `attr`'s permissions, allocating an
    /// intermediate page table on demand (§4.3 `set-page`).
    pub fn set_page(&mut self, linear: u32, physical: u32, attr: PageAttribute, auto_release: bool) -> KResult<()> {
        if linear & (PAGE_SIZE - 1) != 0 || physical & (PAGE_SIZE - 1) != 0 {
            return Err(KernelError::Unaligned);
        }
        let d = dir_index(linear);
        let t = table_index(linear);

        let pde = unsafe { (*self.dir()).0[d] };
        if pde & PageFlags::PRESENT.bits() == 0 {
            let table_phys = physical::allocate(PAGE_SIZE)?;
            unsafe { *(kernel_linear_of(table_phys) as *mut Table) = Table::zeroed() };
            unsafe {
                (*self.dir()).0[d] = (table_phys & ADDR_MASK) | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits();
            }
            self.slots[d] = SlotMeta { present_count: 0, release_when_empty: true, external: false };
        }

        let table_phys = unsafe { (*self.dir()).0[d] } & ADDR_MASK;
        let table = kernel_linear_of(table_phys) as *mut Table;
        let mut flags = attr.to_flags() | PageFlags::PRESENT;
        if auto_release {
            flags |= PageFlags::AUTO_RELEASE;
        }
        let was_present = unsafe { (*table).0[t] } & PageFlags::PRESENT.bits() != 0;
        unsafe { (*table).0[t] = (physical & ADDR_MASK) | flags.bits() };

        if !was_present && !self.slots[d].external {
            self.slots[d].present_count += 1;
        }
        Ok(())
    }

    /// Clears the PTE's present bit but keeps its physical address in
    /// place (§4.3 `invalidate-page`), so `release_invalidated_page` can
    /// still find the frame after the TLB shootdown phase runs.
    pub fn invalidate_page(&mut self, linear: u32) -> KResult<()> {
        let d = dir_index(linear);
        let t = table_index(linear);
        let pde = unsafe { (*self.dir()).0[d] };
        if pde & PageFlags::PRESENT.bits() == 0 {
            return Err(KernelError::NotFound);
        }
        let table = kernel_linear_of(pde & ADDR_MASK) as *mut Table;
        unsafe {
            let entry = (*table).0[t];
            (*table).0[t] = entry & !PageFlags::PRESENT.bits();
        }
        Ok(())
    }

    /// Reclaims the frame (if `AUTO_RELEASE` was set) and, if the owning
    /// page table emptied out, the table itself (§4.3
    /// `release-invalidated-page`). Must run only after a TLB shootdown
    /// covering `linear` has completed on every processor that might still
    /// hold a stale translation.
    pub fn release_invalidated_page(&mut self, linear: u32) -> KResult<()> {
        let d = dir_index(linear);
        let t = table_index(linear);
        let pde = unsafe { (*self.dir()).0[d] };
        if pde & PageFlags::PRESENT.bits() == 0 {
            return Err(KernelError::NotFound);
        }
        let table = kernel_linear_of(pde & ADDR_MASK) as *mut Table;
        let entry = unsafe { (*table).0[t] };
        let addr = entry & ADDR_MASK;
        let auto_release = entry & PageFlags::AUTO_RELEASE.bits() != 0;

        unsafe { (*table).0[t] = 0 };

        if auto_release && addr != 0 {
            physical::release(addr)?;
        }

        if !self.slots[d].external {
            self.slots[d].present_count = self.slots[d].present_count.saturating_sub(1);
            if self.slots[d].present_count == 0 && self.slots[d].release_when_empty {
                let table_phys = pde & ADDR_MASK;
                physical::release(table_phys)?;
                unsafe { (*self.dir()).0[d] = 0 };
            }
        }
        Ok(())
    }

    /// `translate(linear)` (§8 round-trip property): the physical address
    /// currently mapped, or `None` if unmapped/not present.
    pub fn translate(&self, linear: u32) -> Option<u32> {
        let d = dir_index(linear);
        let pde = unsafe { (*self.dir()).0[d] };
        if pde & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        let table = kernel_linear_of(pde & ADDR_MASK) as *const Table;
        let t = table_index(linear);
        let pte = unsafe { (*table).0[t] };
        (pte & PageFlags::PRESENT.bits() != 0).then_some(pte & ADDR_MASK)
    }

    /// Unmap sequence (§4.3): invalidate every PTE in the range, shoot the
    /// TLB down across processors, *then* free frames/tables — never the
    /// other order, so no processor can dereference a freed frame through a
    /// stale TLB.
    pub fn unmap_range(&mut self, linear_start: u32, page_count: u32) -> KResult<()> {
        for i in 0..page_count {
            self.invalidate_page(linear_start + i * PAGE_SIZE)?;
        }
        tlb::shootdown(self.root_phys, linear_start, page_count, false);
        for i in 0..page_count {
            self.release_invalidated_page(linear_start + i * PAGE_SIZE)?;
        }
        Ok(())
    }
}

static KERNEL: Mutex<Option<PageManager>> = Mutex::new(None);

/// Builds the kernel's own manager: a fresh directory, no user-window
/// entries, whose kernel-window slots are never `external` (it owns them).
/// Must run once at boot, before any other manager is created (user
/// managers copy their kernel-window entries *from* this one).
pub fn init_kernel_manager() {
    let root_phys = physical::allocate(PAGE_SIZE).expect("no physical memory for kernel page directory");
    unsafe { *(kernel_linear_of(root_phys) as *mut Table) = Table::zeroed() };
    let mgr = PageManager { root_phys, reserved: (KERNEL_LINEAR_BEGIN, KERNEL_LINEAR_END), slots: [SlotMeta::empty(); ENTRIES] };
    *KERNEL.lock() = Some(mgr);
    log::info!("[memory] kernel page manager initialized, root=0x{:x}", root_phys);
}

pub fn with_kernel_manager<R>(f: impl FnOnce(&mut PageManager) -> R) -> R {
    let mut guard = KERNEL.lock();
    f(guard.as_mut().expect("kernel page manager not initialized"))
}

/// Creates a user address space's manager on top of the kernel's existing
/// physical pages: kernel-window directory entries are *copied* with the
/// `external` bit set so the user manager never frees them (§4.3 "Kernel vs.
/// user page managers").
pub fn new_user_manager() -> KResult<PageManager> {
    let root_phys = physical::allocate(PAGE_SIZE)?;
    unsafe { *(kernel_linear_of(root_phys) as *mut Table) = Table::zeroed() };

    let mut slots = [SlotMeta::empty(); ENTRIES];
    {
        let mut kernel = KERNEL.lock();
        let kernel = kernel.as_mut().expect("kernel page manager not initialized");
        let first = dir_index(KERNEL_LINEAR_BEGIN);
        let last = dir_index(KERNEL_LINEAR_END.wrapping_sub(1));
        for d in first..=last {
            let pde = unsafe { (*kernel.dir()).0[d] };
            unsafe { (*(kernel_linear_of(root_phys) as *mut Table)).0[d] = pde };
            if pde & PageFlags::PRESENT.bits() != 0 {
                slots[d] = SlotMeta { present_count: 0, release_when_empty: false, external: true };
            }
        }
    }

    Ok(PageManager { root_phys, reserved: (0, 0), slots })
}

/// Cross-processor TLB invalidation (§4.3 "TLB shootdown").
pub mod tlb {
    use core::sync::atomic::{AtomicU32, Ordering};
    use spin::Mutex;

    use crate::arch::x86::{idt::vectors, interrupts, pic};

    #[derive(Clone, Copy, Default)]
    struct Request {
        cr3: u32,
        start: u32,
        count: u32,
        is_global: bool,
    }

    static REQUEST: Mutex<Request> = Mutex::new(Request { cr3: 0, start: 0, count: 0, is_global: false });
    static PENDING_ACKS: AtomicU32 = AtomicU32::new(0);
    static SHOOTDOWN_VECTOR: AtomicU32 = AtomicU32::new(0);

    /// Registers the shootdown IPI handler at a dynamically allocated
    /// vector. Must run once at boot (§6 "TLB-shootdown vector allocated
    /// dynamically at multiprocessor init").
    pub fn init() {
        let vector = interrupts::register_general(on_shootdown_irq).expect("no free vector for TLB shootdown");
        SHOOTDOWN_VECTOR.store(vector as u32, Ordering::Release);
    }

    fn invalidate_local(start: u32, count: u32) {
        for i in 0..count {
            crate::arch::x86::invlpg(start + i * crate::config::PAGE_SIZE);
        }
    }

    /// Takes the shootdown lock, fills the shared request, IPIs every other
    /// processor, invalidates locally, then spins until every processor has
    /// acknowledged (§4.3, §8 S5).
    pub fn shootdown(cr3: u32, start: u32, count: u32, is_global: bool) {
        {
            let mut req = REQUEST.lock();
            *req = Request { cr3, start, count, is_global };
        }
        let others = crate::sched::percpu::online_count().saturating_sub(1) as u32;
        PENDING_ACKS.store(others, Ordering::Release);

        pic::interrupt_all_other(SHOOTDOWN_VECTOR.load(Ordering::Acquire) as u8);
        invalidate_local(start, count);

        while PENDING_ACKS.load(Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
        let _ = vectors::IPI_TLB_SHOOTDOWN; // reserved numeric slot; actual vector is dynamic
    }

    /// Receiver side: invalidates the range locally only if the request is
    /// global or addressed to this processor's active address space,
    /// otherwise the request is irrelevant here and is dropped (§4.3).
    fn on_shootdown_irq(_vector: u8) {
        let req = *REQUEST.lock();
        let current_cr3 = crate::arch::x86::read_cr3();
        if req.is_global || req.cr3 == current_cr3 {
            invalidate_local(req.start, req.count);
        }
        PENDING_ACKS.fetch_sub(1, Ordering::Release);
    }
}

// No host-run `#[test]`s here: every operation above dereferences a
// directory/table through its kernel-linear alias, which only resolves to
// real backing memory under the kernel's own direct-mapped physical window
// — there is no such mapping in a host test process. Per §0.4, paging is
// hardware-only and is exercised by the §8 scenarios (S5 in particular)
// under QEMU, not by this crate's automated suite.
