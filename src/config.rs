//! Boot-time-fixed layout and tuning constants.
//!
//! The teacher scatters these across the modules that use them
//! (`memory/heap.rs`'s `HEAP_START`/`HEAP_SIZE`, `sched/task.rs`'s
//! `KSTACK_SIZE`); we collect them here so the linear-memory layout is
//! visible in one place. Nothing here is read from a config file — there is
//! no persistent configuration store in scope.

/// Page size on x86 without PAE/PSE: 4 KiB.
pub const PAGE_SIZE: u32 = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Buddy order range shared by the physical and linear allocators (§4.1).
pub const MIN_BLOCK_ORDER: u32 = 12; // 4 KiB
pub const MAX_BLOCK_ORDER: u32 = 30; // 1 GiB

/// Saturating cap on a physical block's reference count (§3).
pub const MAX_BLOCK_REFERENCE_COUNT: u16 = u16::MAX;

/// Upper bound on how many 4 KiB units the physical buddy allocator tracks.
/// Sized as a fixed static array (§9 Design Notes: singletons created once
/// at boot) rather than a heap-allocated `Vec`, since the physical
/// allocator is itself the thing everything else allocates from. 256 MiB
/// worth of 4 KiB descriptors; scaled down from the architectural 1 GiB
/// `MAX_BLOCK_ORDER` ceiling to keep the static descriptor table a few
/// hundred KiB rather than several MiB — the buddy algorithm's invariants
/// (§8) hold at any span size, so S1's "1 GiB range" scenario is exercised
/// at this smaller scale in the automated test suite.
pub const MAX_PHYSICAL_UNITS: usize = 65_536;

/// Upper bound on how many 4 KiB units a single per-task linear buddy
/// allocator (§4.2/§4.7 "a per-task linear memory manager") tracks: 16 MiB
/// of address space per task. Deliberately far smaller than a task's full
/// `USER_LINEAR_BEGIN..USER_LINEAR_END` window — tracking the whole ~3 GiB
/// user range per task at 4 KiB granularity would cost several hundred KiB
/// of descriptor table *per task*, which this exercise's fixed-capacity,
/// no-heap-before-init design cannot afford. A real deployment would back
/// this with a demand-sized descriptor table instead of a fixed array; see
/// DESIGN.md.
pub const MAX_LINEAR_UNITS: usize = 4_096;

/// Maximum number of concurrently live linear memory managers: one for the
/// kernel plus one per distinct address space (shared-memory task groups
/// share a single manager, §4.7).
pub const MAX_LINEAR_MANAGERS: usize = 64;

/// Kernel linear window: identity-plus-offset region the kernel's own page
/// tables, heap, and slab pages live in. Chosen below the 1 GiB mark so it
/// never collides with a 3:1 user/kernel split.
pub const KERNEL_LINEAR_BEGIN: u32 = 0xC000_0000;
pub const KERNEL_LINEAR_END: u32 = 0xFFC0_0000; // leave top 4 MiB for recursive mapping

/// Default per-task user linear window (everything below the kernel split).
pub const USER_LINEAR_BEGIN: u32 = 0x0040_0000; // leave the first 4 MiB unmapped (null-deref guard)
pub const USER_LINEAR_END: u32 = KERNEL_LINEAR_BEGIN;

/// Kernel heap carved out of the kernel linear window at boot.
pub const HEAP_START: u32 = 0xD000_0000;
pub const HEAP_INITIAL_SIZE: u32 = 2 * 1024 * 1024;

/// Default kernel stack size for `kspawn`-created tasks (§4.7).
pub const KERNEL_STACK_SIZE: u32 = 16 * 1024;
pub const KERNEL_STACK_GUARD_PAGES: u32 = 1;

/// Scheduler tick rate (APIC timer / PIT fallback), Hz.
pub const SCHED_TICK_HZ: u32 = 1000;

/// Default scheduler timeslice, in ticks, for a Normal-priority task.
pub const DEFAULT_TIMESLICE_TICKS: u32 = 10;

/// Hard ceiling on simultaneously bootstrapped processors (§4.10).
pub const MAX_CPUS: usize = 32;

/// Fixed, page-aligned physical scratch address the AP real-mode trampoline
/// is copied to before the INIT-SIPI-SIPI sequence (§4.10). Must be below
/// 1 MiB and vector-aligned (trampoline start = vector << 12).
pub const AP_TRAMPOLINE_PHYS: u32 = 0x0000_8000;

/// Busy-wait spin counts for the INIT-SIPI-SIPI sequence (§4.10). No
/// calibrated timebase is available yet when the BSP brings APs up, so the
/// ~10ms/~200us real-hardware delays the MP spec calls for are approximated
/// with a plain iteration count rather than a timer read.
pub const AP_INIT_DEASSERT_SPINS: u32 = 10_000_000;
pub const AP_SIPI_DELAY_SPINS: u32 = 1_000_000;

/// How long the BSP waits for one AP to signal readiness before giving up on
/// it (§4.10: "An AP that fails to come up is logged and excluded, not
/// retried").
pub const AP_BOOT_TIMEOUT_SPINS: u32 = 50_000_000;

/// Slab size classes, in bytes (§4.4). Requests larger than the last class
/// fall through to raw page allocation.
pub const SLAB_SIZE_CLASSES: [u16; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

/// Minimum object alignment the slab allocator guarantees.
pub const SLAB_MIN_ALIGN: usize = core::mem::size_of::<usize>();

/// Reserved system-call numbers (§6, recovered in SPEC_FULL.md §6 from
/// `original_source/src/interrupt/systemcall.h`).
pub const NUMBER_OF_RESERVED_SYSTEM_CALLS: u32 = 16;
pub const NUMBER_OF_SYSTEM_CALLS: u32 = 32;
pub const NUMBER_OF_DYNAMIC_SERVICES: usize = (NUMBER_OF_SYSTEM_CALLS - NUMBER_OF_RESERVED_SYSTEM_CALLS) as usize;

/// Longest printable service name, inclusive (§4.9: "1..15 printable
/// characters").
pub const MAX_SERVICE_NAME_LEN: usize = 15;

/// Fixed capacity of the I/O request pool (C11, §4.9). Sized well above
/// `MAX_TASKS` worth of in-flight requests for headroom; a real deployment
/// would size this from the boot memory map instead of a compile-time cap.
pub const MAX_IO_REQUESTS: usize = 512;

/// "Up to six return-value slots" (§6 system-call vector).
pub const MAX_IO_RETURN_VALUES: usize = 6;

/// Per-task backlog of completed-but-unconsumed I/O requests (§3: "a queue
/// of pending I/O requests finalized but not yet consumed").
pub const MAX_COMPLETED_REQUESTS_PER_TASK: usize = 16;

/// Fixed table of kernel-owned semaphores the `ACQUIRE_SEMAPHORE`/
/// `RELEASE_SEMAPHORE` syscalls (§6) address by index. The spec does not
/// describe a dynamic semaphore-creation syscall, so user-visible
/// semaphores are this small preallocated table rather than a heap-backed
/// registry; see DESIGN.md.
pub const MAX_USER_SEMAPHORES: usize = 32;

/// Name the out-of-scope filesystem service is expected to register under
/// (§6: "their handler bodies live in the out-of-scope FAT reader").
pub const FILE_SERVICE_NAME: &str = "fat";
