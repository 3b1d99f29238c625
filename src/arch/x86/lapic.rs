//! Local APIC: per-CPU interrupt endpoint and IPI source.
//!
//! Register access is memory-mapped (xAPIC). The base address is fixed by
//! convention at boot (`IA32_APIC_BASE` default, 0xFEE00000) rather than
//! read back from the MSR — this kernel does not relocate the APIC window.
//! Grounded in the same "hand-roll what the 64-bit crate would have given
//! us" approach as the rest of `arch::x86`; the register layout itself is
//! architectural and unrelated to word size.

use core::ptr::{read_volatile, write_volatile};

const APIC_BASE: usize = 0xFEE0_0000;

const REG_ID: usize = 0x020;
const REG_EOI: usize = 0x0B0;
const REG_SPURIOUS: usize = 0x0F0;
const REG_ICR_LOW: usize = 0x300;
const REG_ICR_HIGH: usize = 0x310;
const REG_LVT_TIMER: usize = 0x320;
const REG_TIMER_INITIAL_COUNT: usize = 0x380;
const REG_TIMER_CURRENT_COUNT: usize = 0x390;
const REG_TIMER_DIVIDE: usize = 0x3E0;

const ICR_DELIVERY_MODE_FIXED: u32 = 0 << 8;
const ICR_DEST_SHORTHAND_ALL_EXCLUDING_SELF: u32 = 0b11 << 18;
const ICR_DEST_SHORTHAND_NONE: u32 = 0b00 << 18;
const ICR_LEVEL_ASSERT: u32 = 1 << 14;

unsafe fn read_reg(offset: usize) -> u32 {
    read_volatile((APIC_BASE + offset) as *const u32)
}

unsafe fn write_reg(offset: usize, value: u32) {
    write_volatile((APIC_BASE + offset) as *mut u32, value);
}

/// Enables the local APIC (spurious-interrupt vector register bit 8) and
/// sets the spurious vector. Must run after `pic::remap_legacy_pic_masked`.
pub fn init() {
    unsafe {
        let spurious_vector: u32 = 0xFF;
        write_reg(REG_SPURIOUS, spurious_vector | (1 << 8));
    }
}

pub fn id() -> u8 {
    unsafe { (read_reg(REG_ID) >> 24) as u8 }
}

pub fn end_of_interrupt() {
    unsafe { write_reg(REG_EOI, 0) };
}

/// Sends a fixed-mode IPI to every processor other than the sender — used
/// for reschedule and TLB-shootdown cross-calls (§4.3, §4.10).
pub fn send_ipi_all_excluding_self(vector: u8) {
    unsafe {
        write_reg(REG_ICR_HIGH, 0);
        write_reg(
            REG_ICR_LOW,
            vector as u32 | ICR_DELIVERY_MODE_FIXED | ICR_LEVEL_ASSERT | ICR_DEST_SHORTHAND_ALL_EXCLUDING_SELF,
        );
        wait_for_icr_idle();
    }
}

/// Sends an INIT or startup IPI to a specific APIC id, used by the C12
/// AP-bringup sequence (INIT-SIPI-SIPI).
pub fn send_ipi_to(apic_id: u8, vector: u8, delivery_mode: IpiDeliveryMode) {
    unsafe {
        write_reg(REG_ICR_HIGH, (apic_id as u32) << 24);
        let mode_bits = match delivery_mode {
            IpiDeliveryMode::Init => 0b101 << 8,
            IpiDeliveryMode::Startup => 0b110 << 8,
            IpiDeliveryMode::Fixed => ICR_DELIVERY_MODE_FIXED,
        };
        write_reg(
            REG_ICR_LOW,
            vector as u32 | mode_bits | ICR_LEVEL_ASSERT | ICR_DEST_SHORTHAND_NONE,
        );
        wait_for_icr_idle();
    }
}

#[derive(Clone, Copy)]
pub enum IpiDeliveryMode {
    Init,
    Startup,
    Fixed,
}

unsafe fn wait_for_icr_idle() {
    const DELIVERY_STATUS_PENDING: u32 = 1 << 12;
    while read_reg(REG_ICR_LOW) & DELIVERY_STATUS_PENDING != 0 {
        core::hint::spin_loop();
    }
}

/// LVT timer register bit 17: one-shot when clear, periodic (auto-reload
/// from `REG_TIMER_INITIAL_COUNT` on expiry) when set.
const LVT_TIMER_MODE_PERIODIC: u32 = 1 << 17;

/// Programs the APIC timer for `initial_count` bus cycles at the given
/// divide value, firing `vector` on expiry (§4.6 timebase). `periodic`
/// selects auto-reload ticking (the scheduler's steady-state tick source)
/// versus a single countdown (calibration against PIT channel 0).
pub fn program_timer(vector: u8, initial_count: u32, divide: TimerDivide, periodic: bool) {
    unsafe {
        write_reg(REG_TIMER_DIVIDE, divide as u32);
        let mode_bits = if periodic { LVT_TIMER_MODE_PERIODIC } else { 0 };
        write_reg(REG_LVT_TIMER, vector as u32 | mode_bits);
        write_reg(REG_TIMER_INITIAL_COUNT, initial_count);
    }
}

pub fn timer_current_count() -> u32 {
    unsafe { read_reg(REG_TIMER_CURRENT_COUNT) }
}

#[derive(Clone, Copy)]
pub enum TimerDivide {
    By1 = 0b1011,
    By16 = 0b0011,
    By128 = 0b1010,
}
