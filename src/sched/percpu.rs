//! Per-processor local data (§9 Design Notes: "thread-local per-processor
//! state… is an array indexed by processor id").
//!
//! One `PerCpu` slot exists per possible processor (`config::MAX_CPUS`),
//! populated as application processors come up (`boot::smp`). Each slot
//! owns that processor's ready queue, current-task pointer, idle task,
//! timer-event list (C7), and fault-statistics block (§4.5) — everything
//! that must not be shared or cross-processor-migrated.

use spin::Mutex;

use crate::arch::x86::idt::CpuFaultStats;
use crate::config::MAX_CPUS;

use super::queue::Queue;
use super::task::{QueueTag, TaskId};

/// A callback queued by `sched::suspend_current` to run on behalf of the
/// task this processor just switched *away from*, once the switch has
/// actually landed on whichever task comes next (§4.7, §9 Design Notes
/// "post_switch runs on the new task's stack after the switch"). Plain `fn`
/// pointer + `usize` context, not a closure — the same ABI
/// `suspend_current` itself exposes, since the value has to survive a raw
/// stack swap.
pub type PostSwitch = (fn(TaskId, usize), TaskId, usize);

pub struct PerCpu {
    pub apic_id: u8,
    pub current: Mutex<Option<TaskId>>,
    pub ready_queue: Mutex<Queue>,
    pub idle_task: Mutex<Option<TaskId>>,
    pub fault_stats: Mutex<CpuFaultStats>,
    pub online: core::sync::atomic::AtomicBool,
    pub pending_post_switch: Mutex<Option<PostSwitch>>,
}

impl PerCpu {
    const fn new() -> Self {
        PerCpu {
            apic_id: 0,
            current: Mutex::new(None),
            ready_queue: Mutex::new(Queue::new(QueueTag::Ready)),
            idle_task: Mutex::new(None),
            fault_stats: Mutex::new(CpuFaultStats::new()),
            online: core::sync::atomic::AtomicBool::new(false),
            pending_post_switch: Mutex::new(None),
        }
    }
}

static TABLE: Table = Table::new();

struct Table {
    slots: [PerCpu; MAX_CPUS],
}

impl Table {
    const fn new() -> Self {
        Table { slots: [const { PerCpu::new() }; MAX_CPUS] }
    }
}

/// Registers processor `index` (its position in the local-data array,
/// assigned sequentially during `boot::smp` bring-up, not the raw APIC id)
/// as online, recording its APIC id for cross-processor IPI addressing.
pub fn register(index: usize, apic_id: u8) {
    // `apic_id` is const-fixed per slot only after registration; store it
    // through a raw pointer write since `PerCpu::apic_id` is not behind a
    // lock (it never changes after boot, so a plain relaxed store is
    // sufficient and avoids lock ordering with `current`/`ready_queue`).
    let slot = &TABLE.slots[index];
    unsafe {
        let ptr = slot as *const PerCpu as *mut PerCpu;
        (*ptr).apic_id = apic_id;
    }
    slot.online.store(true, core::sync::atomic::Ordering::Release);
}

pub fn get(index: usize) -> &'static PerCpu {
    &TABLE.slots[index]
}

pub fn online_count() -> usize {
    TABLE
        .slots
        .iter()
        .filter(|s| s.online.load(core::sync::atomic::Ordering::Acquire))
        .count()
}

/// The index of the processor executing this call. Backed by the local
/// APIC id looked up against the registered table; falls back to the
/// provided default if no slot matches (e.g. the logger running before
/// `register` has been called for this processor).
pub fn current_cpu_id_or(default: u8) -> u8 {
    let apic = crate::arch::x86::local_apic_id();
    for (index, slot) in TABLE.slots.iter().enumerate() {
        if slot.online.load(core::sync::atomic::Ordering::Acquire) && slot.apic_id == apic {
            return index as u8;
        }
    }
    default
}

pub fn current_index() -> usize {
    current_cpu_id_or(0) as usize
}

pub fn with_current_fault_stats<R>(f: impl FnOnce(&mut CpuFaultStats) -> R) -> R {
    let slot = get(current_index());
    f(&mut slot.fault_stats.lock())
}
