//! Driver-facing service registry (§4.9, §6 "driver-facing registry").
//!
//! Backs dynamic syscall numbers `NUMBER_OF_RESERVED_SYSTEM_CALLS..
//! NUMBER_OF_SYSTEM_CALLS` (16..32): once a name is registered, its slot's
//! absolute call number becomes directly dispatchable like any reserved
//! call. Name validity ("1..15 printable characters") and the two entry
//! points, `register-service`/`query-service`, are taken from §4.9.

use heapless::String;
use spin::Mutex;

use crate::config::{MAX_SERVICE_NAME_LEN, NUMBER_OF_DYNAMIC_SERVICES, NUMBER_OF_RESERVED_SYSTEM_CALLS};
use crate::error::{INVALID_NAME, SERVICE_EXISTING, SERVICE_NOT_EXISTING, TOO_MANY_SERVICES};

/// `(opaque arg, call arguments) -> return-value slots`, the same shape the
/// reserved calls in `syscall::dispatch` produce.
pub type ServiceHandler = fn(usize, [u32; 5]) -> [u32; 6];

struct Slot {
    name: String<MAX_SERVICE_NAME_LEN>,
    handler: Option<ServiceHandler>,
    arg: usize,
}

impl Slot {
    const fn empty() -> Self {
        Slot { name: String::new(), handler: None, arg: 0 }
    }
}

static SLOTS: Mutex<[Slot; NUMBER_OF_DYNAMIC_SERVICES]> = Mutex::new([const { Slot::empty() }; NUMBER_OF_DYNAMIC_SERVICES]);

fn valid_name(name: &str) -> bool {
    let len = name.len();
    (1..=MAX_SERVICE_NAME_LEN).contains(&len) && name.bytes().all(|b| b.is_ascii_graphic())
}

/// `register-service(name, handler, arg)`: assigns the next free dynamic
/// slot and returns its absolute syscall number.
pub fn register_service(name: &str, handler: ServiceHandler, arg: usize) -> Result<u32, i32> {
    if !valid_name(name) {
        return Err(INVALID_NAME);
    }
    let mut slots = SLOTS.lock();
    if slots.iter().any(|s| s.handler.is_some() && s.name.as_str() == name) {
        return Err(SERVICE_EXISTING);
    }
    let index = slots.iter().position(|s| s.handler.is_none()).ok_or(TOO_MANY_SERVICES)?;
    let mut owned = String::new();
    owned.push_str(name).map_err(|_| INVALID_NAME)?;
    slots[index] = Slot { name: owned, handler: Some(handler), arg };
    Ok(NUMBER_OF_RESERVED_SYSTEM_CALLS + index as u32)
}

/// `query-service(name)`: resolves a registered name back to its call number.
pub fn query_service(name: &str) -> Result<u32, i32> {
    let slots = SLOTS.lock();
    slots
        .iter()
        .position(|s| s.handler.is_some() && s.name.as_str() == name)
        .map(|index| NUMBER_OF_RESERVED_SYSTEM_CALLS + index as u32)
        .ok_or(SERVICE_NOT_EXISTING)
}

/// Invokes the handler registered at absolute call number `number`, or
/// `None` if `number` doesn't name a live dynamic slot.
pub fn dispatch(number: u32, args: [u32; 5]) -> Option<[u32; 6]> {
    let index = number.checked_sub(NUMBER_OF_RESERVED_SYSTEM_CALLS)? as usize;
    let slots = SLOTS.lock();
    let slot = slots.get(index)?;
    let handler = slot.handler?;
    let arg = slot.arg;
    drop(slots);
    Some(handler(arg, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_arg: usize, _args: [u32; 5]) -> [u32; 6] {
        [0; 6]
    }

    #[test]
    fn register_then_query_returns_same_slot() {
        let number = register_service("t-keyboard", noop, 0).unwrap();
        assert_eq!(query_service("t-keyboard").unwrap(), number);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        register_service("t-dup", noop, 0).unwrap();
        assert_eq!(register_service("t-dup", noop, 0), Err(SERVICE_EXISTING));
    }

    #[test]
    fn unknown_name_is_not_existing() {
        assert_eq!(query_service("t-does-not-exist"), Err(SERVICE_NOT_EXISTING));
    }

    #[test]
    fn empty_name_is_invalid() {
        assert_eq!(register_service("", noop, 0), Err(INVALID_NAME));
    }

    #[test]
    fn dispatch_forwards_to_registered_handler() {
        fn answer(_arg: usize, _args: [u32; 5]) -> [u32; 6] {
            [99, 0, 0, 0, 0, 0]
        }
        let number = register_service("t-answer", answer, 0).unwrap();
        assert_eq!(dispatch(number, [0; 5]).unwrap()[0], 99);
    }
}
