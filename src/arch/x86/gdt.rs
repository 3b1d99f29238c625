//! 32-bit Global Descriptor Table.
//!
//! Flat segmentation model: one kernel code/data pair covering the whole
//! 4 GiB linear space, one user code/data pair (ring 3), and a Task State
//! Segment used only for `esp0`/`ss0` — the stack the CPU switches to on a
//! ring3→ring0 transition (interrupt, syscall gate, or task preemption of a
//! user task). The eight-byte GDT entry is packed and loaded by hand rather
//! than through a typed-descriptor crate, since this target has no
//! long-mode crate to lean on.

use core::mem::size_of;
use lazy_static::lazy_static;
use spin::Mutex;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn flat(access: u8, flags: u8) -> Self {
        GdtEntry {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: 0xF0 | (flags & 0x0F), // limit_high=0xF (4KiB granularity, 4GiB limit)
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        GdtEntry {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, ring0, 32-bit TSS (available)
            granularity: (((limit >> 16) & 0x0F) as u8) | 0x00,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

// Access byte bits: present(0x80) | dpl<<5 | S(0x10) | type
const ACCESS_KERNEL_CODE: u8 = 0x9A; // present, ring0, code, readable
const ACCESS_KERNEL_DATA: u8 = 0x92; // present, ring0, data, writable
const ACCESS_USER_CODE: u8 = 0xFA; // present, ring3, code, readable
const ACCESS_USER_DATA: u8 = 0xF2; // present, ring3, data, writable
const FLAGS_32BIT: u8 = 0x0C; // size=32bit(0x4), granularity=4KiB(0x8)

pub const KERNEL_CODE_SELECTOR: u16 = 1 * 8;
pub const KERNEL_DATA_SELECTOR: u16 = 2 * 8;
pub const USER_CODE_SELECTOR: u16 = (3 * 8) | 3;
pub const USER_DATA_SELECTOR: u16 = (4 * 8) | 3;
pub const TSS_SELECTOR: u16 = 5 * 8;

const GDT_ENTRIES: usize = 6;

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Tss {
    pub link: u16,
    _r0: u16,
    pub esp0: u32,
    pub ss0: u16,
    _r1: u16,
    // Remaining fields are unused in this flat model; kept for ABI shape.
    esp1: u32,
    ss1: u16,
    _r2: u16,
    esp2: u32,
    ss2: u16,
    _r3: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _r4: u16,
    cs: u16,
    _r5: u16,
    ss: u16,
    _r6: u16,
    ds: u16,
    _r7: u16,
    fs: u16,
    _r8: u16,
    gs: u16,
    _r9: u16,
    ldt: u16,
    _r10: u16,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        // SAFETY: all-zero is a valid bit pattern for every field here.
        unsafe { core::mem::zeroed() }
    }
}

lazy_static! {
    static ref TSS: Mutex<Tss> = Mutex::new(Tss::new());
}

struct Gdt {
    entries: [GdtEntry; GDT_ENTRIES],
}

static GDT: Mutex<Gdt> = Mutex::new(Gdt { entries: [GdtEntry::null(); GDT_ENTRIES] });

/// Installs the GDT and TSS, and reloads every segment register. Must run
/// before `idt::init()` since the IDT's code-segment field references
/// `KERNEL_CODE_SELECTOR`.
pub fn init() {
    let tss_addr = {
        let tss = TSS.lock();
        &*tss as *const Tss as u32
    };

    {
        let mut gdt = GDT.lock();
        gdt.entries[0] = GdtEntry::null();
        gdt.entries[1] = GdtEntry::flat(ACCESS_KERNEL_CODE, FLAGS_32BIT);
        gdt.entries[2] = GdtEntry::flat(ACCESS_KERNEL_DATA, FLAGS_32BIT);
        gdt.entries[3] = GdtEntry::flat(ACCESS_USER_CODE, FLAGS_32BIT);
        gdt.entries[4] = GdtEntry::flat(ACCESS_USER_DATA, FLAGS_32BIT);
        gdt.entries[5] = GdtEntry::tss(tss_addr, size_of::<Tss>() as u32 - 1);
    }

    {
        let mut tss = TSS.lock();
        tss.ss0 = KERNEL_DATA_SELECTOR;
    }

    let ptr = {
        let gdt = GDT.lock();
        GdtPointer {
            limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: gdt.entries.as_ptr() as u32,
        }
    };

    unsafe {
        load_gdt(&ptr);
        reload_segments();
        load_tss();
    }

    log::info!("[arch] GDT installed: flat kernel/user code+data, TSS ss0=0x{:x}", KERNEL_DATA_SELECTOR);
}

/// Updates `esp0` in the TSS — called by the scheduler on every context
/// switch into a user task, so the next ring3→ring0 transition lands on that
/// task's kernel stack (§4.7 task model; §4.3 two-level tables distinguish
/// user vs kernel, this is the segmentation-side analogue for privilege
/// transitions).
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

unsafe fn load_gdt(ptr: &GdtPointer) {
    core::arch::asm!("lgdt [{}]", in(reg) ptr, options(nostack, preserves_flags));
}

unsafe fn reload_segments() {
    // Far return to reload CS, then reload the data-segment registers from
    // the flat kernel data selector. `retf` is the standard way to load CS
    // from inline asm since it cannot be a `mov` target directly.
    core::arch::asm!(
        "push {code_sel:e}",
        "lea {tmp:e}, [1f]",
        "push {tmp:e}",
        "retf",
        "1:",
        "mov ax, {data_sel:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        code_sel = in(reg) KERNEL_CODE_SELECTOR as u32,
        data_sel = in(reg) KERNEL_DATA_SELECTOR as u32,
        tmp = out(reg) _,
        out("ax") _,
        options(nostack),
    );
}

unsafe fn load_tss() {
    core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
}
