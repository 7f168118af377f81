//! # Scheduler Errors
//!
//! A single error enum covers every failure the core can report. Queue
//! errors are returned to the caller; task faults are isolated by the
//! scheduler loop, which terminates only the offending task and keeps a
//! [`Fault`] record; fatal errors indicate misuse and panic.

use core::fmt;

use crate::task::{TaskId, TaskState};

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, SchedError>;

/// Everything that can go wrong in the scheduler core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The ready queue already holds its maximum number of tasks.
    QueueFull,
    /// No queued task has this id.
    TaskNotFound(TaskId),
    /// A stack span did not fit in the task's snapshot buffer.
    ContextOverflow {
        /// Bytes the span needed.
        needed: usize,
        /// Capacity of the buffer.
        capacity: usize,
    },
    /// The task is not `Ready` or has no captured context to resume from.
    InvalidResume(TaskId),
    /// Suspend was requested while no task was executing.
    SuspendOutsideTask,
    /// The id counter wrapped onto a task that is still queued.
    IdExhaustion(TaskId),
    /// Priority outside `HIGHEST_PRIORITY..=LOWEST_PRIORITY`.
    InvalidPriority(u8),
    /// The requested state is reserved to the scheduler.
    InvalidState(TaskState),
    /// The execution stack handed to the scheduler is too small.
    StackTooSmall {
        /// Usable bytes after alignment.
        size: usize,
        /// Minimum accepted size.
        required: usize,
    },
}

impl SchedError {
    /// Faults that the loop isolates by terminating the offending task.
    #[inline]
    #[must_use]
    pub const fn is_task_fault(&self) -> bool {
        matches!(self, Self::ContextOverflow { .. } | Self::InvalidResume(_))
    }

    /// Programmer misuse with no well-defined recovery.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SuspendOutsideTask | Self::InvalidState(_))
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "ready queue is full"),
            Self::TaskNotFound(id) => write!(f, "task {id} is not queued"),
            Self::ContextOverflow { needed, capacity } => write!(
                f,
                "stack span of {needed} bytes exceeds context capacity of {capacity} bytes"
            ),
            Self::InvalidResume(id) => write!(f, "task {id} cannot be resumed"),
            Self::SuspendOutsideTask => write!(f, "suspend called outside of a scheduled task"),
            Self::IdExhaustion(id) => write!(f, "task id {id} is still in use"),
            Self::InvalidPriority(p) => write!(f, "priority {p} is out of range"),
            Self::InvalidState(state) => write!(f, "state {state:?} is reserved to the scheduler"),
            Self::StackTooSmall { size, required } => write!(
                f,
                "execution stack of {size} bytes is below the minimum of {required} bytes"
            ),
        }
    }
}

impl core::error::Error for SchedError {}

/// A task fault isolated by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    /// The task that was terminated.
    pub task: TaskId,
    /// Why it was terminated.
    pub error: SchedError,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} faulted: {}", self.task, self.error)
    }
}
