//! # Scheduler
//!
//! Cooperative, priority-ordered scheduling loop over the ready queue, and
//! the task-side handle ([`TaskCx`]) tasks use to suspend and to signal each
//! other.
//!
//! ## Scheduling Algorithm
//!
//! A cursor scans the ready queue from the front:
//! 1. **`Created`**, or **`Ready`** before its first run: build a fresh frame
//!    below the boundary and dispatch the task body
//! 2. **`Ready`**: copy its snapshot back below the boundary and resume it
//!    right after its suspend call
//! 3. **`WaitingForEvent`**: skip
//! 4. **`Terminated`**: reap (another task asked for it)
//!
//! After every dispatch, resume or reap the cursor returns to 0: the event
//! may have woken higher-priority tasks or shifted the queue. When a full
//! scan finds nothing to do, the idle hook decides whether to park and
//! rescan or to return.
//!
//! ## Suspension
//!
//! A suspending task records its target state, marks the exit as
//! `Suspended` and switches registers back to the loop. The loop then copies
//! `[sp, boundary)` into the task's snapshot. A task whose body returns
//! switches back with the exit marked `Finished` and is dequeued.
//!
//! ## Fault Isolation
//!
//! A snapshot that does not fit (`ContextOverflow`) or a `Ready` task with
//! nothing to resume from (`InvalidResume`) terminates only that task; the
//! fault is logged, counted and kept as [`Scheduler::last_fault`].
//!
//! ## Panics in Tasks
//!
//! Task bodies run below an `extern "C"` trampoline on the execution stack,
//! which has no frames to unwind into. A panic inside a task therefore
//! aborts the process instead of unwinding into the caller of
//! [`Scheduler::run`]. Report failures from tasks through shared state.
//!
//! ## Moving the Scheduler
//!
//! Task frames never store the scheduler's address. They go through the
//! anchor slot above the execution stack, which every run refreshes. A
//! `Scheduler` with suspended tasks can be moved (boxed, returned, swapped)
//! between runs.

use core::ptr::{self, NonNull};

use log::{debug, error, info, trace, warn};

use crate::arch;
use crate::config::{CONTEXT_CAPACITY, MAX_TASKS};
use crate::context::{ExecStack, SwitchRegs};
use crate::error::{Fault, Result, SchedError};
use crate::queue::ReadyQueue;
use crate::task::{TaskFn, TaskId, TaskState};

/// Contents of the anchor slot: the scheduler core, type-erased.
type Anchor<'a> = *mut (dyn Control<'a> + 'a);

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

/// Why [`Scheduler::run_with`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task terminated.
    Drained,
    /// Tasks remain but none can make progress.
    Stalled {
        /// Number of tasks left in the queue.
        waiting: usize,
    },
}

/// Decision of an [`IdleHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Rescan the queue.
    Continue,
    /// Return from the run loop.
    Stop,
}

/// Consulted whenever a full scan finds no task to dispatch or resume.
///
/// The hook gets the queue so it can inject external events (mark tasks
/// `Ready`, spawn new ones) before asking for a rescan.
pub trait IdleHook<'a, const CAP: usize, const CTX: usize> {
    fn on_idle(&mut self, queue: &mut ReadyQueue<'a, CAP, CTX>) -> IdleAction;
}

/// Return as soon as nothing can run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopWhenIdle;

impl<'a, const CAP: usize, const CTX: usize> IdleHook<'a, CAP, CTX> for StopWhenIdle {
    fn on_idle(&mut self, _queue: &mut ReadyQueue<'a, CAP, CTX>) -> IdleAction {
        IdleAction::Stop
    }
}

/// Never return: park the CPU (`wfi` on Cortex-M) and rescan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParkOnIdle;

impl<'a, const CAP: usize, const CTX: usize> IdleHook<'a, CAP, CTX> for ParkOnIdle {
    fn on_idle(&mut self, _queue: &mut ReadyQueue<'a, CAP, CTX>) -> IdleAction {
        arch::idle();
        IdleAction::Continue
    }
}

impl<'a, F, const CAP: usize, const CTX: usize> IdleHook<'a, CAP, CTX> for F
where
    F: FnMut(&mut ReadyQueue<'a, CAP, CTX>) -> IdleAction,
{
    fn on_idle(&mut self, queue: &mut ReadyQueue<'a, CAP, CTX>) -> IdleAction {
        self(queue)
    }
}

/// Counters kept by the run loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// First dispatches of `Created` tasks.
    pub dispatches: u32,
    /// Resumes of `Ready` tasks.
    pub resumes: u32,
    /// Suspend calls that came back to the loop.
    pub suspensions: u32,
    /// Tasks that returned or exited.
    pub completions: u32,
    /// Tasks terminated by an isolated fault.
    pub faults: u32,
    /// Idle hook invocations.
    pub idle_calls: u32,
    /// Largest snapshot captured so far, in bytes.
    pub peak_context: usize,
}

impl SchedulerStats {
    pub const fn new() -> Self {
        Self {
            dispatches: 0,
            resumes: 0,
            suspensions: 0,
            completions: 0,
            faults: 0,
            idle_calls: 0,
            peak_context: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler core
// ---------------------------------------------------------------------------

/// How the last task switched back to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Suspended,
    Finished,
}

/// State shared between the loop and the running task. Both sides reach it
/// through one raw pointer, never at the same time: the loop is parked in
/// `switch` while a task runs and vice versa.
struct Core<'a, const CAP: usize, const CTX: usize> {
    queue: ReadyQueue<'a, CAP, CTX>,
    stack: ExecStack<'a>,
    regs: SwitchRegs,
    current: Option<TaskId>,
    exit: Option<Exit>,
    stats: SchedulerStats,
    last_fault: Option<Fault>,
}

impl<'a, const CAP: usize, const CTX: usize> Core<'a, CAP, CTX> {
    /// First dispatch of a task that has never run.
    ///
    /// # Safety
    /// `this` must point at a live core whose anchor slot holds `this`, and
    /// no task may be executing.
    unsafe fn dispatch(this: *mut Self, id: TaskId) {
        let sp = {
            let core = &mut *this;
            match core.queue.get_mut(id) {
                Ok(desc) => {
                    desc.state = TaskState::Running;
                    desc.started = true;
                }
                Err(err) => {
                    error!("cannot dispatch task {id}: {err}");
                    return;
                }
            }
            core.stats.dispatches += 1;
            debug!("dispatching task {id}");
            let anchor = core.stack.anchor();
            arch::init_frame(core.stack.boundary(), trampoline::<CAP, CTX>, anchor)
        };
        Self::enter(this, id, sp);
    }

    /// Resume a `Ready` task from its snapshot.
    ///
    /// # Safety
    /// Same as [`Core::dispatch`].
    unsafe fn resume(this: *mut Self, id: TaskId) {
        let sp = {
            let core = &mut *this;
            match core.prepare_resume(id) {
                Ok(sp) => sp,
                Err(err) => {
                    core.fault(id, err);
                    return;
                }
            }
        };
        Self::enter(this, id, sp);
    }

    fn prepare_resume(&mut self, id: TaskId) -> Result<*mut u8> {
        let boundary = self.stack.boundary();
        let desc = self.queue.get_mut(id)?;
        if desc.state != TaskState::Ready || !desc.started || !desc.has_context() {
            return Err(SchedError::InvalidResume(id));
        }

        // SAFETY: no task is executing, so the region below the boundary
        // belongs to whichever snapshot is copied into it.
        let sp = unsafe { desc.context.restore(boundary) };
        desc.state = TaskState::Running;
        debug!("resuming task {id} ({} byte context)", desc.context.len());
        self.stats.resumes += 1;
        Ok(sp)
    }

    /// Switch to the task at `sp` and handle the way it comes back.
    ///
    /// # Safety
    /// `sp` must come from `init_frame` or from a restored snapshot.
    unsafe fn enter(this: *mut Self, id: TaskId, sp: *mut u8) {
        (*this).current = Some(id);
        arch::switch(ptr::addr_of_mut!((*this).regs.host_sp), sp as usize);

        let core = &mut *this;
        core.current = None;
        if !core.stack.canary_intact() {
            panic!("execution stack overflow while task {id} was running");
        }
        match core.exit.take() {
            Some(Exit::Suspended) => core.capture(id),
            Some(Exit::Finished) | None => core.complete(id),
        }
    }

    /// Copy the parked task's stack slice into its snapshot.
    fn capture(&mut self, id: TaskId) {
        self.stats.suspensions += 1;
        let sp = self.regs.task_sp;
        debug_assert!(self.stack.contains(sp));
        let span = self.stack.span_from(sp);

        let desc = match self.queue.get_mut(id) {
            Ok(desc) => desc,
            Err(err) => {
                error!("suspended task {id} vanished: {err}");
                return;
            }
        };
        if desc.state == TaskState::Terminated {
            self.complete(id);
            return;
        }

        // SAFETY: the task is parked in `switch`; `[sp, boundary)` is its
        // quiescent stack slice and does not overlap the queue.
        match unsafe { desc.context.capture(sp as *const u8, span) } {
            Ok(()) => {
                trace!("task {id} suspended as {:?} ({span} byte context)", desc.state);
                self.stats.peak_context = self.stats.peak_context.max(span);
            }
            Err(err) => self.fault(id, err),
        }
    }

    fn complete(&mut self, id: TaskId) {
        if let Err(err) = self.queue.set_state(id, TaskState::Terminated) {
            error!("cannot mark finished task {id} terminated: {err}");
        }
        if let Err(err) = self.queue.dequeue(id) {
            error!("cannot remove finished task {id}: {err}");
            return;
        }
        self.stats.completions += 1;
        info!("task {id} completed");
    }

    /// Remove a task another task marked `Terminated`.
    fn reap(&mut self, id: TaskId) {
        debug!("reaping terminated task {id}");
        if let Err(err) = self.queue.dequeue(id) {
            error!("cannot reap task {id}: {err}");
        }
    }

    fn fault(&mut self, id: TaskId, error: SchedError) {
        error!("task {id} faulted: {error}");
        self.stats.faults += 1;
        self.last_fault = Some(Fault { task: id, error });
        if let Err(err) = self.queue.set_state(id, TaskState::Terminated) {
            error!("cannot mark faulted task {id} terminated: {err}");
        }
        if let Err(err) = self.queue.dequeue(id) {
            error!("cannot remove faulted task {id}: {err}");
        }
    }

    fn outcome(&self) -> RunOutcome {
        if self.queue.is_empty() {
            info!("ready queue drained");
            RunOutcome::Drained
        } else {
            let waiting = self.queue.len();
            warn!("scheduler stalled with {waiting} waiting task(s)");
            RunOutcome::Stalled { waiting }
        }
    }

    /// Task side of a suspend: record the target state and hand back the
    /// switch bookkeeping.
    fn park(&mut self, state: TaskState) -> *mut SwitchRegs {
        let Some(id) = self.current else {
            panic!("{}", SchedError::SuspendOutsideTask);
        };
        if !state.is_requestable() {
            panic!("{}", SchedError::InvalidState(state));
        }
        if let Err(err) = self.queue.set_state(id, state) {
            panic!("running task {id} is not queued: {err}");
        }
        debug!("task {id} suspending as {state:?}");
        self.exit = Some(Exit::Suspended);
        &mut self.regs
    }
}

/// Operations a task reaches through [`TaskCx`], with the queue sizing
/// erased.
trait Control<'a> {
    fn current(&self) -> Option<TaskId>;
    fn park(&mut self, state: TaskState) -> *mut SwitchRegs;
    fn state_of(&self, id: TaskId) -> Result<TaskState>;
    fn signal(&mut self, id: TaskId, state: TaskState) -> Result<()>;
    fn spawn(&mut self, entry: TaskFn<'a>, priority: u8) -> Result<TaskId>;
    fn queue_len(&self) -> usize;
}

impl<'a, const CAP: usize, const CTX: usize> Control<'a> for Core<'a, CAP, CTX> {
    fn current(&self) -> Option<TaskId> {
        self.current
    }

    fn park(&mut self, state: TaskState) -> *mut SwitchRegs {
        Core::park(self, state)
    }

    fn state_of(&self, id: TaskId) -> Result<TaskState> {
        self.queue.state(id)
    }

    fn signal(&mut self, id: TaskId, state: TaskState) -> Result<()> {
        self.queue.set_state(id, state)
    }

    fn spawn(&mut self, entry: TaskFn<'a>, priority: u8) -> Result<TaskId> {
        self.queue.enqueue(entry, priority)
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// First code a dispatched task runs, on the execution stack. `arg` is the
/// anchor slot; a panic escaping the task body aborts here.
extern "C" fn trampoline<const CAP: usize, const CTX: usize>(arg: *mut u8) -> ! {
    let anchor = arg.cast::<Anchor<'_>>();
    // SAFETY: the anchor holds the core of the scheduler currently running,
    // and the loop stays parked in `switch` until this task switches back.
    // The core may have moved while the body was suspended, so it is read
    // from the anchor again before switching out.
    unsafe {
        let core = (*anchor).cast::<Core<'_, CAP, CTX>>();
        if let Some(id) = (*core).current {
            match (*core).queue.entry(id) {
                Ok(entry) => {
                    let mut cx = TaskCx::new(id, anchor);
                    entry(&mut cx);
                }
                Err(err) => error!("task {id} has no entry point: {err}"),
            }
        }

        let core = (*anchor).cast::<Core<'_, CAP, CTX>>();
        (*core).exit = Some(Exit::Finished);
        arch::switch(ptr::addr_of_mut!((*core).regs.task_sp), (*core).regs.host_sp);
    }
    unreachable!("finished task was resumed")
}

// ---------------------------------------------------------------------------
// Task-side handle
// ---------------------------------------------------------------------------

/// Handle passed to every task body. It is the only way to suspend, so a
/// suspend can only ever originate from inside a scheduled task; pass it down
/// to helpers that need to suspend.
pub struct TaskCx<'a> {
    id: TaskId,
    anchor: NonNull<Anchor<'a>>,
}

impl<'a> TaskCx<'a> {
    fn new(id: TaskId, anchor: *mut Anchor<'a>) -> Self {
        Self {
            id,
            // SAFETY: the anchor slot lies inside the execution stack region.
            anchor: unsafe { NonNull::new_unchecked(anchor) },
        }
    }

    fn kernel(&self) -> &(dyn Control<'a> + 'a) {
        // SAFETY: `run_with` stores its core in the anchor before any task
        // runs, and the loop does not touch the core while this task
        // executes.
        unsafe { &**self.anchor.as_ptr() }
    }

    fn kernel_mut(&mut self) -> &mut (dyn Control<'a> + 'a) {
        // SAFETY: see `kernel`.
        unsafe { &mut **self.anchor.as_ptr() }
    }

    /// Park this task as `state` and switch to the loop.
    fn switch_out(&mut self, state: TaskState) {
        let regs = self.kernel_mut().park(state);
        // SAFETY: `regs` lives in the core; the loop reads `task_sp` only
        // after this switch lands back in the loop. `regs` is not used after
        // the task is resumed.
        unsafe { arch::switch(ptr::addr_of_mut!((*regs).task_sp), (*regs).host_sp) };
    }

    /// Id of the task currently executing.
    pub fn current_task_id(&self) -> TaskId {
        self.kernel().current().unwrap_or(self.id)
    }

    /// Record `state` for this task and return to the scheduler. Returns
    /// once the scheduler resumes the task, with every local and every
    /// caller frame exactly as it was.
    ///
    /// `Ready` yields, `WaitingForEvent` blocks until another task wakes this
    /// one and `Terminated` never returns.
    ///
    /// # Errors
    /// `InvalidState` for `Created` and `Running`, which are reserved to the
    /// scheduler. The task keeps running without suspending.
    pub fn suspend(&mut self, state: TaskState) -> Result<()> {
        if !state.is_requestable() {
            return Err(SchedError::InvalidState(state));
        }
        self.switch_out(state);
        Ok(())
    }

    /// Stay runnable but let the loop rescan from the highest priority.
    pub fn yield_now(&mut self) {
        self.switch_out(TaskState::Ready);
    }

    /// Block until some task calls [`TaskCx::wake`] on this one.
    pub fn wait(&mut self) {
        self.switch_out(TaskState::WaitingForEvent);
    }

    /// Terminate this task from any call depth.
    pub fn exit(&mut self) -> ! {
        self.switch_out(TaskState::Terminated);
        unreachable!("terminated task was resumed")
    }

    pub fn state(&self, id: TaskId) -> Result<TaskState> {
        self.kernel().state_of(id)
    }

    /// Set another task's state. Only `Ready`, `WaitingForEvent` and
    /// `Terminated` can be requested; a `Terminated` task is removed at the
    /// next scan.
    pub fn set_state(&mut self, id: TaskId, state: TaskState) -> Result<()> {
        if !state.is_requestable() {
            return Err(SchedError::InvalidState(state));
        }
        self.kernel_mut().signal(id, state)
    }

    /// Mark a task `Ready`. A task that has not run yet is dispatched from
    /// the top of its body.
    pub fn wake(&mut self, id: TaskId) -> Result<()> {
        self.set_state(id, TaskState::Ready)
    }

    /// Register a new task from inside a running one.
    pub fn spawn(&mut self, entry: TaskFn<'a>, priority: u8) -> Result<TaskId> {
        self.kernel_mut().spawn(entry, priority)
    }

    pub fn queue_len(&self) -> usize {
        self.kernel().queue_len()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The cooperative scheduler: a ready queue of `CAP` tasks with `CTX`-byte
/// snapshots, and the execution stack they all run on.
pub struct Scheduler<'a, const CAP: usize = MAX_TASKS, const CTX: usize = CONTEXT_CAPACITY> {
    core: Core<'a, CAP, CTX>,
}

impl<'a, const CAP: usize, const CTX: usize> Scheduler<'a, CAP, CTX> {
    /// Create a scheduler running tasks on `stack`.
    pub fn new(stack: &'a mut [u8]) -> Result<Self> {
        Ok(Self {
            core: Core {
                queue: ReadyQueue::new(),
                stack: ExecStack::new(stack)?,
                regs: SwitchRegs::new(),
                current: None,
                exit: None,
                stats: SchedulerStats::new(),
                last_fault: None,
            },
        })
    }

    /// Drop every task and reset ids and statistics.
    pub fn init(&mut self) {
        self.core.queue.init();
        self.core.stats = SchedulerStats::new();
        self.core.last_fault = None;
    }

    /// Register a task with the given priority (lower runs earlier).
    pub fn spawn(&mut self, entry: TaskFn<'a>, priority: u8) -> Result<TaskId> {
        self.core.queue.enqueue(entry, priority)
    }

    pub fn queue(&self) -> &ReadyQueue<'a, CAP, CTX> {
        &self.core.queue
    }

    /// Mutable queue access between runs, e.g. to mark tasks `Ready` from
    /// outside.
    pub fn queue_mut(&mut self) -> &mut ReadyQueue<'a, CAP, CTX> {
        &mut self.core.queue
    }

    /// Task being executed; `None` outside of a dispatch or resume.
    pub fn current_task_id(&self) -> Option<TaskId> {
        self.core.current
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core.stats
    }

    pub fn last_fault(&self) -> Option<Fault> {
        self.core.last_fault
    }

    /// Deepest execution stack usage so far.
    pub fn stack_peak_usage(&self) -> usize {
        self.core.stack.peak_usage()
    }

    /// Run until nothing can make progress.
    pub fn run(&mut self) -> RunOutcome {
        self.run_with(StopWhenIdle)
    }

    /// Run the scheduling loop, consulting `hook` whenever a full scan finds
    /// no task to dispatch or resume.
    pub fn run_with<H: IdleHook<'a, CAP, CTX>>(&mut self, mut hook: H) -> RunOutcome {
        let core: *mut Core<'a, CAP, CTX> = &mut self.core;
        // SAFETY: the anchor slot is inside the borrowed stack region and
        // aligned for a pointer; no task is executing yet.
        unsafe {
            let anchor = (*core).stack.anchor().cast::<Anchor<'a>>();
            anchor.write(core as Anchor<'a>);
        }
        let mut cursor = 0;

        loop {
            // SAFETY: between events no task executes, so this is the only
            // live reference into the core.
            let this = unsafe { &mut *core };

            let Some(id) = this.queue.id_at(cursor) else {
                this.stats.idle_calls = this.stats.idle_calls.wrapping_add(1);
                match hook.on_idle(&mut this.queue) {
                    IdleAction::Continue => {
                        cursor = 0;
                        continue;
                    }
                    IdleAction::Stop => return this.outcome(),
                }
            };

            match this.queue.get(id).map(|desc| (desc.state, desc.needs_dispatch())) {
                Ok((_, true)) => {
                    // SAFETY: `core` is valid for the whole loop, idle, and
                    // stored in the anchor.
                    unsafe { Core::dispatch(core, id) };
                    cursor = 0;
                }
                Ok((TaskState::Ready, false)) => {
                    // SAFETY: as above.
                    unsafe { Core::resume(core, id) };
                    cursor = 0;
                }
                Ok((TaskState::Terminated, _)) => {
                    this.reap(id);
                    cursor = 0;
                }
                Ok(_) | Err(_) => cursor += 1,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
