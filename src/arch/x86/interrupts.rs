//! Interrupt vector allocation table (§4.5).
//!
//! The IDT installs a fixed set of CPU-exception and architectural handlers
//! (see `idt.rs`); this module layers a registry of *driver-facing* vectors
//! on top, so device drivers and the timer subsystem can claim a vector
//! without editing `idt::init`. Generalizes the fixed-table-built-at-
//! compile-time handler install loop into "drivers register at boot, in
//! whatever order modules initialize".

use spin::Mutex;

use super::pic;

pub type DeviceHandler = fn(vector: u8);

const MAX_VECTORS: usize = 256;
const FIRST_DEVICE_VECTOR: u8 = 0x20;
const LAST_DEVICE_VECTOR: u8 = 0xEF; // 0xF0.. reserved for IPIs (idt::vectors)

/// Handlers sharing a single vector are tried in registration order — the
/// common case of an IRQ line shared by several devices (§4.5), none of
/// which know about each other at compile time.
const MAX_HANDLERS_PER_VECTOR: usize = 4;

struct Slot {
    handlers: heapless::Vec<DeviceHandler, MAX_HANDLERS_PER_VECTOR>,
}

impl Slot {
    const fn empty() -> Self {
        Slot { handlers: heapless::Vec::new() }
    }
}

struct Table {
    slots: [Slot; MAX_VECTORS],
}

static TABLE: Mutex<Table> = Mutex::new(Table { slots: [const { Slot::empty() }; MAX_VECTORS] });

/// Claims the next free vector in the device range and installs `handler`
/// as its sole handler. Returns `None` if the device range is exhausted.
pub fn register_general(handler: DeviceHandler) -> Option<u8> {
    let mut table = TABLE.lock();
    for vector in FIRST_DEVICE_VECTOR..=LAST_DEVICE_VECTOR {
        if table.slots[vector as usize].handlers.is_empty() {
            let _ = table.slots[vector as usize].handlers.push(handler);
            return Some(vector);
        }
    }
    None
}

/// Installs `handler` at a specific vector, failing if already taken. Used
/// when a caller needs a fixed vector (e.g. the timer claiming
/// `idt::vectors::TIMER_IRQ` deterministically rather than via first-fit).
pub fn register_at(vector: u8, handler: DeviceHandler) -> bool {
    let mut table = TABLE.lock();
    if !table.slots[vector as usize].handlers.is_empty() {
        return false;
    }
    table.slots[vector as usize].handlers.push(handler).is_ok()
}

/// Replaces the entire handler chain at `vector` with just `handler`,
/// discarding whatever was there. Used by subsystems that reprogram their
/// own previously claimed vector (e.g. the timer switching from
/// calibration mode to steady-state ticking). Contrast `add_handler`, which
/// appends instead of replacing.
pub fn set_handler(vector: u8, handler: DeviceHandler) {
    let mut table = TABLE.lock();
    let slot = &mut table.slots[vector as usize];
    slot.handlers.clear();
    let _ = slot.handlers.push(handler);
}

/// Appends `handler` to the chain already installed at `vector`, for
/// drivers sharing an IRQ vector (§4.5: "set-handler / add-handler: replace
/// or append a handler for an already-allocated vector"). `dispatch` calls
/// every chained handler, in the order they were added. Returns `false` if
/// the chain is already at `MAX_HANDLERS_PER_VECTOR`.
pub fn add_handler(vector: u8, handler: DeviceHandler) -> bool {
    TABLE.lock().slots[vector as usize].handlers.push(handler).is_ok()
}

/// Common entry point for every device-range and IPI vector, reached from
/// the generated stub table in `irq_stub.rs` rather than called as a plain
/// function — the raw hardware interrupt carries no Rust-visible argument
/// beyond the vector number the stub itself pushed.
pub fn dispatch(vector: u8) {
    // Cloned out from under the lock before any handler runs: a handler is
    // free to call back into `add_handler`/`set_handler` for this or any
    // other vector without deadlocking on `TABLE`.
    let handlers = TABLE.lock().slots[vector as usize].handlers.clone();
    if handlers.is_empty() {
        log::warn!("unhandled interrupt vector 0x{:x}", vector);
    } else {
        for handler in &handlers {
            handler(vector);
        }
    }
    let irq = vector.wrapping_sub(FIRST_DEVICE_VECTOR);
    pic::end_of_interrupt(irq);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_a(_vector: u8) {}
    fn handler_b(_vector: u8) {}

    #[test]
    fn add_handler_appends_without_replacing() {
        let vector = register_general(handler_a).expect("free vector");
        assert!(add_handler(vector, handler_b));
        assert_eq!(TABLE.lock().slots[vector as usize].handlers.len(), 2);
    }

    #[test]
    fn set_handler_replaces_the_whole_chain() {
        let vector = register_general(handler_a).expect("free vector");
        assert!(add_handler(vector, handler_b));
        set_handler(vector, handler_a);
        assert_eq!(TABLE.lock().slots[vector as usize].handlers.len(), 1);
    }

    #[test]
    fn add_handler_fails_once_chain_is_full() {
        let vector = register_general(handler_a).expect("free vector");
        for _ in 1..MAX_HANDLERS_PER_VECTOR {
            assert!(add_handler(vector, handler_b));
        }
        assert!(!add_handler(vector, handler_b));
    }
}
