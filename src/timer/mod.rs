//! Timer subsystem (C7, §4.6).
//!
//! Each processor owns a doubly linked list of timer events, guarded by its
//! own spinlock — implemented here as a fixed-size array indexed by
//! processor id, the same "thread-local… as an array indexed by processor
//! id" shape Design Notes §9 prescribes for the scheduler's per-processor
//! state. Calibration follows `arch/x86_64/apic.rs`'s local-APIC timer
//! bring-up (one-shot programming against a known reference), scaled down
//! to a much smaller countdown-list model: PIT channel 0 is the
//! calibration reference, the local APIC timer is the tick source, and
//! there is no drift-slewing or hierarchical timer wheel.

use heapless::Vec;
use spin::Mutex;

use crate::arch::x86::{lapic, pic, port};
use crate::config::{MAX_CPUS, SCHED_TICK_HZ};
use crate::error::{KResult, KernelError};
use crate::io::request::IoRequestId;

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const MAX_EVENTS_PER_CPU: usize = 64;

pub struct TimerEvent {
    pub id: u32,
    pub countdown_ticks: u32,
    pub period_ticks: u32,
    /// `None` for a periodic event past its first firing — re-using the
    /// same `IoRequestId` across multiple `complete` calls would violate
    /// the "exactly one of complete/cancel fires" invariant (§3), so only
    /// an event's first expiry is ever wired to a caller-visible request.
    pub request: Option<IoRequestId>,
}

struct EventList {
    events: Vec<TimerEvent, MAX_EVENTS_PER_CPU>,
}

impl EventList {
    const fn new() -> Self {
        EventList { events: Vec::new() }
    }
}

static LISTS: [Mutex<EventList>; MAX_CPUS] = [const { Mutex::new(EventList::new()) }; MAX_CPUS];
static NEXT_EVENT_ID: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(1);
static APIC_TICKS_PER_SCHED_TICK: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Calibrates the local APIC timer against PIT channel 0 (§4.5: "a
/// boot-time measurement against the 8254 channel 0 at a known frequency
/// determines how many APIC bus ticks correspond to a scheduler tick"),
/// then programs the local APIC for periodic ticking at `SCHED_TICK_HZ`.
/// Must run once per processor, after `pic::init`.
pub fn init() {
    let ticks_per_sched_tick = APIC_TICKS_PER_SCHED_TICK.load(core::sync::atomic::Ordering::Acquire);
    let ticks_per_sched_tick = if ticks_per_sched_tick == 0 {
        let measured = calibrate_against_pit();
        APIC_TICKS_PER_SCHED_TICK.store(measured, core::sync::atomic::Ordering::Release);
        measured
    } else {
        ticks_per_sched_tick
    };

    lapic::program_timer(
        crate::arch::x86::idt::vectors::TIMER_IRQ,
        ticks_per_sched_tick,
        lapic::TimerDivide::By16,
        true,
    );
    crate::arch::x86::interrupts::register_at(crate::arch::x86::idt::vectors::TIMER_IRQ, on_timer_irq);
    log::info!("[timer] calibrated: {} apic ticks per {}Hz tick", ticks_per_sched_tick, SCHED_TICK_HZ);
}

/// Measures the APIC bus frequency by gating the APIC timer's countdown
/// against a known PIT channel-0 one-shot interval (10ms), a standard
/// technique for deriving the bus tick rate without an external reference.
fn calibrate_against_pit() -> u32 {
    const CALIBRATION_MS: u32 = 10;
    let pit_reload = (PIT_FREQUENCY_HZ / 1000) * CALIBRATION_MS;

    unsafe {
        port::outb(PIT_COMMAND, 0x30); // channel 0, lobyte/hibyte, mode 0 (one-shot)
        port::outb(PIT_CHANNEL0_DATA, (pit_reload & 0xFF) as u8);
        port::outb(PIT_CHANNEL0_DATA, ((pit_reload >> 8) & 0xFF) as u8);
    }

    lapic::program_timer(0xFF, u32::MAX, lapic::TimerDivide::By16, false);
    let start = lapic::timer_current_count();

    // PIT channel 0 in mode 0 does not expose a simple "elapsed" read
    // without also reading back status; poll the output pin via the PIT's
    // own readback command instead of busy-looping on wall time we don't
    // have yet.
    while !pit_channel0_output_high() {
        core::hint::spin_loop();
    }

    let end = lapic::timer_current_count();
    let elapsed_apic_ticks = start.saturating_sub(end); // counts down
    let apic_ticks_per_ms = elapsed_apic_ticks / CALIBRATION_MS.max(1);
    (apic_ticks_per_ms * 1000 / SCHED_TICK_HZ).max(1)
}

fn pit_channel0_output_high() -> bool {
    unsafe {
        port::outb(PIT_COMMAND, 0xE2); // read-back, channel 0, latch status
        let status = port::inb(PIT_CHANNEL0_DATA);
        status & 0x80 != 0 // output pin bit
    }
}

/// Constructs and inserts a one-shot event whose I/O request is already
/// pending (§4.6 `sleep`), returning its id for later cancellation lookup.
pub fn schedule_event(processor: usize, countdown_ticks: u32, period_ticks: u32, request: IoRequestId) -> KResult<u32> {
    let id = NEXT_EVENT_ID.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    let event = TimerEvent { id, countdown_ticks: countdown_ticks.max(1), period_ticks, request: Some(request) };
    LISTS[processor]
        .lock()
        .events
        .push(event)
        .map_err(|_| KernelError::Exhausted)?;
    Ok(id)
}

/// `sleep(ms)` (§4.6): converts milliseconds to ticks (rounding up, minimum
/// 1 tick), constructs a one-shot event, pends its I/O request, and blocks
/// the caller. Callers more than ~10^9 seconds out are rejected outright
/// (§8 boundary behavior) rather than silently truncated.
///
/// The request is allocated `cancellable` (§8 S4: `try-cancel` must be able
/// to race `complete` on a sleeping task's request), with `cancel_sleep` as
/// its cancel callback so a won race also pulls the still-pending event out
/// of `LISTS` rather than leaving it to fire later into a freed/reused slot.
pub fn sleep_ms(ms: u64) -> KResult<()> {
    const MAX_SLEEP_MS: u64 = 1_000_000_000 * 1000;
    if ms > MAX_SLEEP_MS {
        return Err(KernelError::OutOfRange);
    }
    let ticks = ((ms * SCHED_TICK_HZ as u64 + 999) / 1000).max(1) as u32;

    let task = crate::sched::current().ok_or(KernelError::NotFound)?;
    let request = crate::io::request::allocate(task, Some(cancel_sleep), None, true)?;
    crate::io::request::pend(request, task)?;

    let processor = crate::sched::percpu::current_index();
    schedule_event(processor, ticks, 0, request)?;

    crate::io::request::wait_io_return(task, request, 0, &mut [])?;
    Ok(())
}

/// Cancel callback for a `sleep_ms` request (§8 S4). A won `try_cancel`
/// race means the request is already torn down by the time this runs; the
/// event itself is still live in whichever processor's `LISTS` it was
/// scheduled on and must be pulled out now; otherwise it would fire later
/// and `complete` a request slot that `try_cancel` has already reused.
fn cancel_sleep(request: IoRequestId) {
    for list in LISTS.iter() {
        let mut list = list.lock();
        if let Some(pos) = list.events.iter().position(|e| e.request == Some(request)) {
            list.events.swap_remove(pos);
            return;
        }
    }
}

/// Timer-interrupt handler body (§4.6 steps 1–3): EOI, walk-and-decrement,
/// then invoke the scheduler. Installed at `idt::vectors::TIMER_IRQ`
/// through `arch::x86::interrupts::register_at`.
fn on_timer_irq(vector: u8) {
    let irq = vector.wrapping_sub(crate::arch::x86::idt::vectors::IRQ_BASE);
    pic::end_of_interrupt(irq);

    let processor = crate::sched::percpu::current_index();
    let mut fired: Vec<IoRequestId, MAX_EVENTS_PER_CPU> = Vec::new();

    {
        let mut list = LISTS[processor].lock();
        let mut i = 0;
        while i < list.events.len() {
            list.events[i].countdown_ticks = list.events[i].countdown_ticks.saturating_sub(1);
            if list.events[i].countdown_ticks == 0 {
                let mut event = list.events.swap_remove(i);
                if let Some(request) = event.request.take() {
                    let _ = fired.push(request);
                }
                if event.period_ticks > 0 {
                    event.countdown_ticks = event.period_ticks;
                    let _ = list.events.push(event);
                }
            } else {
                i += 1;
            }
        }
    }

    // A plain timer expiry completes with no return values — "completion
    // with success" per §7, there being nothing for the waiter to read
    // beyond the fact that the sleep elapsed.
    for request in fired.iter() {
        let _ = crate::io::request::complete(*request, &[]);
    }

    crate::sched::tick();
}
