//! # Task Descriptor
//!
//! Defines the per-task record kept in the ready queue: identity, state,
//! static priority, entry point and the saved stack snapshot that lets a
//! suspended task continue mid-function.

use core::fmt;

use crate::config::CONTEXT_CAPACITY;
use crate::context::SavedContext;
use crate::scheduler::TaskCx;

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Identifier of a queued task. Unique among the tasks currently queued;
/// values are recycled modulo `MAX_TASK_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u16);

impl TaskId {
    /// Wrap a raw id.
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw id value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌─────────┐  dispatch   ┌─────────┐  return       ┌────────────┐
///   │ Created │ ──────────► │ Running │ ────────────► │ Terminated │
///   └─────────┘             └─────────┘               └────────────┘
///                             │     ▲
///                 suspend()   │     │ resume
///                             ▼     │
///   ┌─────────────────┐  wake()  ┌───────┐
///   │ WaitingForEvent │ ───────► │ Ready │
///   └─────────────────┘          └───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered but never dispatched.
    Created,
    /// Suspended and allowed to resume.
    Ready,
    /// Currently executing on the shared stack.
    Running,
    /// Suspended until some code path marks it `Ready`.
    WaitingForEvent,
    /// Finished or killed; reaped at the next scan.
    Terminated,
}

impl TaskState {
    /// States the loop acts on (dispatch or resume).
    #[inline]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Created | Self::Ready)
    }

    /// States task code may request for itself or another task.
    #[inline]
    pub const fn is_requestable(self) -> bool {
        matches!(self, Self::Ready | Self::WaitingForEvent | Self::Terminated)
    }
}

/// Task body. Receives the task-side scheduler handle and may suspend
/// through it at any call depth.
pub type TaskFn<'a> = &'a dyn Fn(&mut TaskCx<'a>);

// ---------------------------------------------------------------------------
// Task descriptor
// ---------------------------------------------------------------------------

/// Everything the scheduler keeps for one task. Descriptors live inline in
/// the ready queue; the snapshot buffer makes each one `CTX` bytes larger.
pub struct TaskDescriptor<'a, const CTX: usize = CONTEXT_CAPACITY> {
    /// Task identifier.
    pub id: TaskId,

    /// Current state.
    pub state: TaskState,

    /// Static priority; lower runs earlier.
    pub priority: u8,

    /// Task body, invoked on first dispatch.
    pub entry: TaskFn<'a>,

    /// Set once the body has been entered. A `Ready` task that never
    /// started is dispatched, not resumed.
    pub started: bool,

    /// Stack slice captured at the last suspend.
    pub context: SavedContext<CTX>,
}

impl<'a, const CTX: usize> TaskDescriptor<'a, CTX> {
    /// A freshly registered task in `Created` state with an empty snapshot.
    pub const fn new(id: TaskId, entry: TaskFn<'a>, priority: u8) -> Self {
        Self {
            id,
            state: TaskState::Created,
            priority,
            entry,
            started: false,
            context: SavedContext::new(),
        }
    }

    /// Whether a snapshot is stored to resume from.
    #[inline]
    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }

    /// Whether the next run of this task enters its body from the top.
    #[inline]
    pub fn needs_dispatch(&self) -> bool {
        !self.started && self.state.is_runnable()
    }
}

impl<const CTX: usize> fmt::Debug for TaskDescriptor<'_, CTX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("started", &self.started)
            .field("context_len", &self.context.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
