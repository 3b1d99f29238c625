//! Intrusive FIFO task queue.
//!
//! Per §9 Design Notes: "a language without raw pointers expresses \[the
//! cyclic intrusive-link pattern\] with arena indices and a small tagged
//! 'currently-on' field." Tasks live in the `task` module's slab, addressed
//! by `TaskId`; this queue stores only a head/tail pair and borrows each
//! task's single link field (`Task::links`) rather than allocating its own
//! node storage. Used for per-processor ready queues, semaphore wait
//! queues, and RW-lock reader/writer wait queues — exactly the set of
//! queues §3 says a task is on "at most one of… at a time."

use super::task::{self, QueueTag, TaskId};

pub struct Queue {
    head: Option<TaskId>,
    tail: Option<TaskId>,
    len: usize,
    tag: QueueTag,
}

impl Queue {
    pub const fn new(tag: QueueTag) -> Self {
        Queue { head: None, tail: None, len: 0, tag }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends `id` to the tail. `id` must not currently be linked on any
    /// queue — callers enforce this by only calling `push_back` from a
    /// state transition that just removed the task from its prior queue
    /// (or confirmed it was on none).
    pub fn push_back(&mut self, id: TaskId) {
        task::set_links(id, (self.tail, None), self.tag);
        if let Some(tail) = self.tail {
            task::with_task_mut(tail, |t| t.links.1 = Some(id));
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<TaskId> {
        let head = self.head?;
        let (_, next) = task::links(head);
        self.head = next;
        match next {
            Some(next_id) => {
                task::with_task_mut(next_id, |t| t.links.0 = None);
            }
            None => self.tail = None,
        }
        task::set_links(head, (None, None), QueueTag::None);
        self.len -= 1;
        Some(head)
    }

    pub fn peek_front(&self) -> Option<TaskId> {
        self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::spawn;

    #[test]
    fn fifo_order_preserved() {
        let mut q = Queue::new(QueueTag::Ready);
        let a = spawn(0, 0x1000, 0).unwrap();
        let b = spawn(0, 0x2000, 0).unwrap();
        let c = spawn(0, 0x3000, 0).unwrap();
        q.push_back(a);
        q.push_back(b);
        q.push_back(c);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_front(), Some(a));
        assert_eq!(q.pop_front(), Some(b));
        assert_eq!(q.pop_front(), Some(c));
        assert_eq!(q.pop_front(), None);
        task::remove(a);
        task::remove(b);
        task::remove(c);
    }

    #[test]
    fn single_element_roundtrip() {
        let mut q = Queue::new(QueueTag::Semaphore);
        let a = spawn(0, 0x1000, 0).unwrap();
        q.push_back(a);
        assert_eq!(q.pop_front(), Some(a));
        assert!(q.is_empty());
        task::remove(a);
    }
}
