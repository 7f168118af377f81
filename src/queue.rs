//! # Ready Queue
//!
//! Priority-ordered, bounded collection of task descriptors. Lower priority
//! values sort first and tasks of equal priority keep their arrival order,
//! so a linear scan from the front yields the scheduling order directly.
//!
//! Insertion and removal shift the tail of a fixed array. At the target
//! scale (a few dozen tasks) that is cheaper and simpler than any balanced
//! structure, and it needs no allocator.

use log::warn;

use crate::config::{CONTEXT_CAPACITY, LOWEST_PRIORITY, MAX_TASKS, MAX_TASK_ID};
use crate::context::SavedContext;
use crate::error::{Result, SchedError};
use crate::task::{TaskDescriptor, TaskFn, TaskId, TaskState};

/// Bounded ready queue. Slots `0..len` are always occupied and sorted.
pub struct ReadyQueue<'a, const CAP: usize = MAX_TASKS, const CTX: usize = CONTEXT_CAPACITY> {
    slots: [Option<TaskDescriptor<'a, CTX>>; CAP],
    len: usize,
    next_id: u16,
}

impl<'a, const CAP: usize, const CTX: usize> ReadyQueue<'a, CAP, CTX> {
    /// An empty queue with the id counter at zero.
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; CAP],
            len: 0,
            next_id: 0,
        }
    }

    /// Drop every queued task and reset the id counter.
    pub fn init(&mut self) {
        self.slots[..self.len].iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
        self.next_id = 0;
    }

    /// Register a task in `Created` state.
    ///
    /// The task goes after every queued task with a priority lower than or
    /// equal to its own.
    ///
    /// # Errors
    /// - `InvalidPriority` if `priority` is above `LOWEST_PRIORITY`
    /// - `QueueFull` if all `CAP` slots are taken
    /// - `IdExhaustion` if the id counter wrapped onto a queued task; the
    ///   counter still advances, so a retry draws the next id
    pub fn enqueue(&mut self, entry: TaskFn<'a>, priority: u8) -> Result<TaskId> {
        if priority > LOWEST_PRIORITY {
            return Err(SchedError::InvalidPriority(priority));
        }
        if self.is_full() {
            return Err(SchedError::QueueFull);
        }

        let id = TaskId::new(self.next_id);
        self.next_id = (self.next_id + 1) % MAX_TASK_ID;
        if self.contains(id) {
            warn!("task id {id} wrapped onto a live task");
            return Err(SchedError::IdExhaustion(id));
        }

        let pos = self
            .iter()
            .position(|desc| priority < desc.priority)
            .unwrap_or(self.len);

        // Slot `len` is free; rotating brings it to `pos` and shifts the
        // tail right by one.
        self.slots[pos..=self.len].rotate_right(1);
        self.slots[pos] = Some(TaskDescriptor::new(id, entry, priority));
        self.len += 1;
        Ok(id)
    }

    /// Remove a task, shifting later tasks left by one.
    pub fn dequeue(&mut self, id: TaskId) -> Result<()> {
        let pos = self.position(id).ok_or(SchedError::TaskNotFound(id))?;
        self.slots[pos] = None;
        self.slots[pos..self.len].rotate_left(1);
        self.len -= 1;
        Ok(())
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn is_full(&self) -> bool {
        self.len == CAP
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Id of the task at queue position `pos`.
    pub fn id_at(&self, pos: usize) -> Option<TaskId> {
        self.slots[..self.len].get(pos)?.as_ref().map(|desc| desc.id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Queued descriptors in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor<'a, CTX>> {
        self.slots[..self.len].iter().flatten()
    }

    pub fn get(&self, id: TaskId) -> Result<&TaskDescriptor<'a, CTX>> {
        self.iter()
            .find(|desc| desc.id == id)
            .ok_or(SchedError::TaskNotFound(id))
    }

    pub fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskDescriptor<'a, CTX>> {
        self.slots[..self.len]
            .iter_mut()
            .flatten()
            .find(|desc| desc.id == id)
            .ok_or(SchedError::TaskNotFound(id))
    }

    pub fn state(&self, id: TaskId) -> Result<TaskState> {
        self.get(id).map(|desc| desc.state)
    }

    pub fn priority(&self, id: TaskId) -> Result<u8> {
        self.get(id).map(|desc| desc.priority)
    }

    pub fn entry(&self, id: TaskId) -> Result<TaskFn<'a>> {
        self.get(id).map(|desc| desc.entry)
    }

    pub fn context(&self, id: TaskId) -> Result<&SavedContext<CTX>> {
        self.get(id).map(|desc| &desc.context)
    }

    /// Overwrite a task's state. This is also the cross-task signaling
    /// primitive: marking a waiting task `Ready` lets the loop resume it.
    pub fn set_state(&mut self, id: TaskId, state: TaskState) -> Result<()> {
        self.get_mut(id)?.state = state;
        Ok(())
    }

    /// Replace a task's saved context with `bytes`.
    pub fn set_context(&mut self, id: TaskId, bytes: &[u8]) -> Result<()> {
        self.get_mut(id)?.context.fill(bytes)
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.iter().position(|desc| desc.id == id)
    }
}

impl<const CAP: usize, const CTX: usize> Default for ReadyQueue<'_, CAP, CTX> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
