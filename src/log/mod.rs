//! Kernel logging sink (§0.1).
//!
//! Binds the `log` facade to a serial backend, layered as a pluggable sink
//! behind a global, once-initialized logger. `log::Log` is implemented
//! directly so callers use the ordinary `log::info!`/`warn!`/`debug!`
//! macros instead of a bespoke `.log()` method.

#[cfg(feature = "axiom-log-serial")]
use core::fmt::Write;
#[cfg(feature = "axiom-log-serial")]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "axiom-log-serial")]
use spin::Mutex;

#[cfg(feature = "axiom-log-serial")]
use crate::arch::x86::serial::SerialPort;
use crate::sched::percpu;

#[cfg(feature = "axiom-log-serial")]
static SINK_READY: AtomicBool = AtomicBool::new(false);
#[cfg(feature = "axiom-log-serial")]
static SERIAL: Mutex<Option<SerialPort>> = Mutex::new(None);

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let cpu = percpu::current_cpu_id_or(0xff);
        let mut line = heapless::String::<256>::new();
        let _ = write!(
            line,
            "[cpu{:02x}][{}] {}\n",
            cpu,
            record.level(),
            record.args()
        );
        write_line(&line);
    }

    fn flush(&self) {}
}

fn write_line(line: &str) {
    #[cfg(feature = "axiom-log-serial")]
    if SINK_READY.load(Ordering::Acquire) {
        if let Some(serial) = SERIAL.lock().as_mut() {
            let _ = serial.write_str(line);
            return;
        }
    }
    // Early-boot fallback: QEMU/bochs debug-exit port, readable from the
    // host without a working UART (feature-gated the same way the VGA vs
    // serial log sinks are).
    #[cfg(feature = "axiom-log-debugport")]
    {
        for byte in line.bytes() {
            unsafe { crate::arch::x86::port::outb(0xE9, byte) };
        }
    }
}

/// Installs the serial backend (when `axiom-log-serial` is enabled) and
/// registers the `log` facade. Must run after `arch::x86::gdt`/`idt` init
/// but before any subsystem that might log (memory init onward). With
/// `axiom-log-serial` off, `SINK_READY` never flips and every line falls
/// through to the `axiom-log-debugport` fallback (or nowhere, if neither
/// sink feature is enabled) — the same either/or `#[cfg]` shape the
/// debug-port fallback in `write_line` already uses.
pub fn init() {
    #[cfg(feature = "axiom-log-serial")]
    {
        let mut serial = unsafe { SerialPort::new(0x3F8) }; // COM1
        serial.init();
        *SERIAL.lock() = Some(serial);
        SINK_READY.store(true, Ordering::Release);
    }

    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .ok();
}
