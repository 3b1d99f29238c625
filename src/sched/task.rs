//! Task control block (§3 Data model, C8).
//!
//! Follows `process/task.rs`'s shape (`Pid`, a process-state enum, a
//! `TASKS` table guarded by `spin::Mutex`) with the state machine and
//! fields reworked: four states (RUNNING/READY/SUSPENDED/TERMINATED), one
//! pair of intrusive queue links, a pending-I/O-request list, and a
//! system-call hook pair.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use spin::Mutex;

use crate::error::{KResult, KernelError};
use crate::io::request::IoRequestId;
use crate::memory::linear::LinearManagerId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(pub u32);

/// §3 Data model: "a state among {RUNNING, READY, SUSPENDED, TERMINATED}".
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum State {
    Running = 0,
    Ready = 1,
    Suspended = 2,
    Terminated = 3,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Running,
            1 => State::Ready,
            2 => State::Suspended,
            _ => State::Terminated,
        }
    }
}

/// Which queue a task's single pair of intrusive links currently belongs
/// to, for debug assertions matching §8's "on exactly one queue" invariant.
/// Not load-bearing for correctness — only `links` and `queue_tag` need to
/// stay in sync.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueueTag {
    None,
    Ready,
    Semaphore,
    RwLockReaders,
    RwLockWriters,
}

pub struct SyscallHook {
    pub function: Option<fn(arg: usize)>,
    pub argument: usize,
}

pub struct Task {
    pub id: TaskId,
    pub state: AtomicU8,
    pub processor: u8,
    pub stack_pointer: u32,
    pub cr3: u32,
    pub queue_tag: QueueTag,
    pub links: (Option<TaskId>, Option<TaskId>),
    /// Completed requests not yet consumed by `wait_io`, oldest first.
    pub completed_requests: heapless::Deque<IoRequestId, 16>,
    /// Set while the task is blocked in `wait_io`/`wait_io_return` so
    /// `io::request::complete` knows to call `resume`.
    pub waiting_on_io: bool,
    pub waiting_on_specific_request: Option<IoRequestId>,
    pub syscall_hook: SyscallHook,
    /// Shared-memory parent, if this task was spawned with
    /// `spawn_shared_memory_child` (§4.7).
    pub shared_memory_parent: Option<TaskId>,
    pub shared_memory_refcount: u32,
    /// The linear memory manager backing this task's address space, if one
    /// has been attached via `attach_linear_manager`. Shared-memory children
    /// inherit the same handle from their parent (§4.7); each holder's own
    /// exit releases one reference via `memory::linear::release_reference`.
    pub linear_manager: Option<LinearManagerId>,
}

impl Task {
    fn new(id: TaskId, processor: u8, stack_pointer: u32, cr3: u32) -> Self {
        Task {
            id,
            state: AtomicU8::new(State::Ready as u8),
            processor,
            stack_pointer,
            cr3,
            queue_tag: QueueTag::None,
            links: (None, None),
            completed_requests: heapless::Deque::new(),
            waiting_on_io: false,
            waiting_on_specific_request: None,
            syscall_hook: SyscallHook { function: None, argument: 0 },
            shared_memory_parent: None,
            shared_memory_refcount: 0,
            linear_manager: None,
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, s: State) {
        self.state.store(s as u8, Ordering::Release);
    }
}

const MAX_TASKS: usize = 256;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);
static TASKS: Mutex<heapless::FnvIndexMap<TaskId, Task, MAX_TASKS>> =
    Mutex::new(heapless::FnvIndexMap::new());

fn alloc_tid() -> TaskId {
    TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Creates a new task on `processor`'s ready queue. The caller is
/// responsible for pushing the returned id onto that processor's ready
/// queue (`sched::queue`) — task creation and scheduling are kept separate
/// the way `sched::resume` and `Task::new` are separate, so tests can build
/// a `Task` without a live scheduler.
pub fn spawn(processor: u8, stack_pointer: u32, cr3: u32) -> KResult<TaskId> {
    let id = alloc_tid();
    let mut tasks = TASKS.lock();
    tasks
        .insert(id, Task::new(id, processor, stack_pointer, cr3))
        .map_err(|_| KernelError::Exhausted)?;
    Ok(id)
}

/// Attaches a linear memory manager to a task's address space — the
/// counterpart to `memory::linear::create` for whoever sets one up. Must be
/// called before any shared-memory child is spawned from this task, since
/// `spawn_shared_memory_child` inherits whatever is attached at that point.
pub fn attach_linear_manager(id: TaskId, manager: LinearManagerId) {
    with_task_mut(id, |t| t.linear_manager = Some(manager));
}

/// Shared-memory child: inherits the parent's linear memory manager by
/// reference count (§4.7), taking out a real reference via
/// `memory::linear::add_reference` rather than only tracking the link at
/// the task level. The task-level `shared_memory_refcount` on the parent is
/// a separate bookkeeping concern (how many live children it has); the
/// linear-manager refcount is what actually gates teardown of the shared
/// address space.
pub fn spawn_shared_memory_child(parent: TaskId, processor: u8, stack_pointer: u32, cr3: u32) -> KResult<TaskId> {
    let id = spawn(processor, stack_pointer, cr3)?;
    let mut tasks = TASKS.lock();
    let parent_manager = tasks.get(&parent).and_then(|t| t.linear_manager);
    if let Some(parent_task) = tasks.get_mut(&parent) {
        parent_task.shared_memory_refcount += 1;
    }
    if let Some(task) = tasks.get_mut(&id) {
        task.shared_memory_parent = Some(parent);
        task.linear_manager = parent_manager;
    }
    drop(tasks);

    if let Some(manager) = parent_manager {
        crate::memory::linear::add_reference(manager);
    }
    Ok(id)
}

pub fn with_task<R>(id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
    TASKS.lock().get(&id).map(f)
}

pub fn with_task_mut<R>(id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    TASKS.lock().get_mut(&id).map(f)
}

pub fn links(id: TaskId) -> (Option<TaskId>, Option<TaskId>) {
    with_task(id, |t| t.links).unwrap_or((None, None))
}

pub fn set_links(id: TaskId, links: (Option<TaskId>, Option<TaskId>), tag: QueueTag) {
    with_task_mut(id, |t| {
        t.links = links;
        t.queue_tag = tag;
    });
}

/// Terminates `id`. If it was a shared-memory child, decrements the
/// parent's live-children count, returning the parent's id once that count
/// reaches zero (purely a task-group bookkeeping signal — see
/// `spawn_shared_memory_child`). Independently, if `id` itself held a
/// linear memory manager reference, releases it via
/// `memory::linear::release_reference`; when that drops the manager's own
/// refcount to zero, any blocks it still has flagged "with physical pages"
/// are swept and their frames released through
/// `memory::physical::release_or_unmap` (§4.7 — ordinarily there should be
/// none left, since normal `unmap_range` calls already tore down each
/// allocation's frames before releasing it back to the manager).
pub fn mark_terminated(id: TaskId) -> Option<TaskId> {
    let mut tasks = TASKS.lock();
    let parent = tasks.get(&id).and_then(|t| t.shared_memory_parent);
    let linear_manager = tasks.get(&id).and_then(|t| t.linear_manager);
    if let Some(task) = tasks.get(&id) {
        task.set_state(State::Terminated);
    }
    let mut freed_parent = None;
    if let Some(parent_id) = parent {
        if let Some(parent_task) = tasks.get_mut(&parent_id) {
            parent_task.shared_memory_refcount = parent_task.shared_memory_refcount.saturating_sub(1);
            if parent_task.shared_memory_refcount == 0 {
                freed_parent = Some(parent_id);
            }
        }
    }
    drop(tasks);

    if let Some(manager) = linear_manager {
        if crate::memory::linear::release_reference(manager) {
            let mut reclaimed = 0u32;
            crate::memory::linear::with_manager(manager, |mgr| {
                for addr in mgr.physical_units() {
                    let _ = crate::memory::physical::release_or_unmap(addr);
                    reclaimed += 1;
                }
            });
            log::debug!(
                "linear memory manager {:?} torn down ({} leftover frame(s) reclaimed)",
                manager,
                reclaimed
            );
        }
    }

    freed_parent
}

pub fn remove(id: TaskId) -> Option<Task> {
    TASKS.lock().remove(&id)
}

pub fn count() -> usize {
    TASKS.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_assigns_unique_ids() {
        let a = spawn(0, 0x1000, 0).unwrap();
        let b = spawn(0, 0x2000, 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(with_task(a, |t| t.state()), Some(State::Ready));
        remove(a);
        remove(b);
    }

    #[test]
    fn shared_memory_child_refcounts_parent() {
        let parent = spawn(0, 0x1000, 0).unwrap();
        let child = spawn_shared_memory_child(parent, 0, 0x2000, 0).unwrap();
        assert_eq!(with_task(parent, |t| t.shared_memory_refcount), Some(1));
        let freed = mark_terminated(child);
        assert_eq!(freed, Some(parent));
        remove(parent);
        remove(child);
    }

    #[test]
    fn shared_memory_child_releases_linear_manager_reference() {
        use crate::memory::linear;

        let manager = linear::create(0x5000_0000, 1 << 16).unwrap();
        let parent = spawn(0, 0x1000, 0).unwrap();
        attach_linear_manager(parent, manager);
        let child = spawn_shared_memory_child(parent, 0, 0x2000, 0).unwrap();
        assert_eq!(with_task(child, |t| t.linear_manager), Some(Some(manager)));
        assert_eq!(linear::reference_count(manager), 2);

        assert_eq!(mark_terminated(child), Some(parent));
        assert_eq!(linear::reference_count(manager), 1);

        assert_eq!(mark_terminated(parent), None);
        assert_eq!(linear::reference_count(manager), 0);

        remove(parent);
        remove(child);
    }
}
