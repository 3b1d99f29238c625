//! Task manager & scheduler (C8, §4.7).
//!
//! Single-level FIFO ready-queue per processor.

pub mod percpu;
pub mod queue;
pub mod task;

use task::{State, TaskId};

/// Installs the idle task for the calling processor and marks it current.
/// Must run once per processor, after that processor's `PerCpu` slot has
/// been registered (`percpu::register`).
pub fn init_idle(stack_pointer: u32, cr3: u32) {
    let index = percpu::current_index();
    let apic_id = crate::arch::x86::local_apic_id();
    percpu::register(index, apic_id);
    let idle = task::spawn(index as u8, stack_pointer, cr3).expect("idle task spawn");
    task::with_task_mut(idle, |t| t.set_state(State::Running));
    *percpu::get(index).idle_task.lock() = Some(idle);
    *percpu::get(index).current.lock() = Some(idle);
}

pub fn current() -> Option<TaskId> {
    *percpu::get(percpu::current_index()).current.lock()
}

/// Places a freshly spawned task on its processor's ready queue. Tasks are
/// never migrated after creation (§4.7 Wakeup: "target processor is the
/// one it last ran on; no migration"), so this is also where "last ran on"
/// is first established.
pub fn enqueue_new_task(id: TaskId) {
    let processor = task::with_task(id, |t| t.processor).unwrap_or(0);
    percpu::get(processor as usize).ready_queue.lock().push_back(id);
}

/// Timer-tick preemption point (§4.6 step 3, §4.7 Preemption). Pushes the
/// running task to the tail of its processor's ready queue, pops the head,
/// and switches — a no-op switch if the queue held only the running task.
pub fn tick() {
    let index = percpu::current_index();
    let slot = percpu::get(index);
    let running = slot.current.lock().expect("tick with no current task");

    task::with_task_mut(running, |t| t.set_state(State::Ready));
    slot.ready_queue.lock().push_back(running);

    let next = slot.ready_queue.lock().pop_front().unwrap_or(running);
    dispatch(index, running, next);
}

/// Runs this processor's pending post-switch callback, if one is queued,
/// and clears the slot. Called from two places: the tail of `dispatch`
/// immediately after `context::switch` returns (a task resuming from an
/// earlier `suspend_current`), and `context::first_run_stub` (a task
/// dispatched for the very first time, which never passes back through
/// `dispatch`'s own tail on its first run — it has no prior `switch()`
/// call to resume into). Reads the *current* processor's slot rather than
/// trusting a caller-supplied index, though this crate never migrates a
/// task across processors, so the two always agree.
pub fn run_pending_post_switch() {
    let slot = percpu::get(percpu::current_index());
    if let Some((callback, prev, arg)) = slot.pending_post_switch.lock().take() {
        callback(prev, arg);
    }
}

/// Common dispatch step shared by `tick` and `suspend_current`: marks
/// `next` running, records it as the processor's current task, reloads CR3
/// if it differs, and performs the register-level switch. A no-op switch
/// (prev == next) still updates state bookkeeping but skips the asm call.
/// Either way, `run_pending_post_switch` runs once this call is genuinely
/// executing as the dispatched task — trivially true already for the
/// no-op path, true only once `context::switch` returns for the real one.
fn dispatch(index: usize, prev: TaskId, next: TaskId) {
    let slot = percpu::get(index);

    task::with_task_mut(next, |t| t.set_state(State::Running));
    *slot.current.lock() = Some(next);

    if prev == next {
        run_pending_post_switch();
        return;
    }

    let prev_cr3 = task::with_task(prev, |t| t.cr3).unwrap_or(0);
    let next_sp = task::with_task(next, |t| t.stack_pointer).unwrap_or(0);
    let next_cr3 = task::with_task(next, |t| t.cr3).unwrap_or(0);

    if next_cr3 != prev_cr3 {
        unsafe { crate::arch::x86::write_cr3(next_cr3) };
    }

    let mut saved_sp: u32 = 0;
    unsafe {
        crate::arch::x86::context::switch(&mut saved_sp as *mut u32, next_sp);
    }
    // Resumed: this is the continuation of whichever earlier `dispatch`
    // call switched this exact task out, on this exact processor (no
    // migration). Draining the pending slot here, before anything else
    // runs, is what makes `post_switch` genuinely run on the new task's
    // stack right after the switch, rather than only the next time the
    // old task happens to be rescheduled.
    run_pending_post_switch();
    task::with_task_mut(prev, |t| t.stack_pointer = saved_sp);
}

/// Voluntary suspension (§4.7). Switches away from the running task
/// *without* enqueueing it anywhere; `post_switch(prev, arg)` is queued on
/// this processor and runs on the new task's stack immediately after the
/// switch completes (via `run_pending_post_switch`, called from `dispatch`
/// or `context::first_run_stub`) — it is responsible for placing `prev` on
/// whatever queue is semantically correct. This ordering — the switch away
/// from `prev` completes, *then* `prev` becomes visible to other
/// processors — is what makes `resume` racing the switch impossible (§9
/// Design Notes): nothing can observe `prev` as resumable until the
/// callback that makes it so has already run, and it never runs on `prev`'s
/// own stack.
pub fn suspend_current(post_switch: fn(TaskId, usize), arg: usize) {
    let index = percpu::current_index();
    let slot = percpu::get(index);
    let prev = slot.current.lock().expect("suspend with no current task");

    task::with_task_mut(prev, |t| t.set_state(State::Suspended));
    *slot.pending_post_switch.lock() = Some((post_switch, prev, arg));

    let next = slot
        .ready_queue
        .lock()
        .pop_front()
        .unwrap_or_else(|| slot.idle_task.lock().expect("no idle task registered"));

    dispatch(index, prev, next);
}

/// Wakeup (§4.7): atomically SUSPENDED→READY, appended to the processor it
/// last ran on (never migrated).
pub fn resume(id: TaskId) {
    let processor = task::with_task(id, |t| t.processor).unwrap_or(0);
    task::with_task_mut(id, |t| t.set_state(State::Ready));
    percpu::get(processor as usize).ready_queue.lock().push_back(id);
}

/// Terminates the running task (§4.7 state transition RUNNING→TERMINATED).
/// Never returns; the switch lands in whatever task is dispatched next.
pub fn exit_current() -> ! {
    let index = percpu::current_index();
    let slot = percpu::get(index);
    let prev = slot.current.lock().expect("exit with no current task");

    // `mark_terminated` already performs the real memory-manager teardown
    // (`memory::linear::release_reference` / `memory::physical::release_or_unmap`)
    // for `prev` itself; the return value here is only the task-group signal
    // that `freed_parent` has no live shared-memory children left.
    if let Some(freed_parent) = task::mark_terminated(prev) {
        log::debug!("task {:?} has no live shared-memory children left", freed_parent);
    }

    let next = slot
        .ready_queue
        .lock()
        .pop_front()
        .unwrap_or_else(|| slot.idle_task.lock().expect("no idle task registered"));

    dispatch(index, prev, next);
    unreachable!("exit_current's task was dispatched again after termination");
}
