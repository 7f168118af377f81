//! # coopsched: Cooperative Priority Scheduler
//!
//! A single-threaded, cooperative task scheduler for small embedded
//! targets. Tasks are stackful coroutines: they can suspend from any call
//! depth and later continue exactly where they stopped, with every local of
//! every caller frame intact.
//!
//! ## Overview
//!
//! All tasks share one execution stack. A suspending task's live stack slice
//! is copied into a fixed-size snapshot kept in its descriptor; resuming
//! copies it back to the same addresses and switches to it. Only one task
//! ever runs at a time and switching happens only when the running task asks
//! for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! │          fn(&mut TaskCx) · suspend · wake · exit       │
//! ├────────────────────────────────────────────────────────┤
//! │              Scheduler Loop (scheduler.rs)             │
//! │     run_with() · dispatch · resume · reap · idle hook  │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Ready Queue (queue.rs)  │  Context (context.rs)       │
//! │  ─ enqueue / dequeue     │  ─ SavedContext snapshots   │
//! │  ─ set_state (signaling) │  ─ ExecStack + boundary     │
//! ├──────────────────────────┴─────────────────────────────┤
//! │              Task Model (task.rs, error.rs)            │
//! │      TaskId · TaskState · TaskDescriptor · SchedError  │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/x86_64.rs, aarch64.rs, cortex_m4.rs) │
//! │         switch · init_frame · idle                     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - **Priority**: lower value runs first; equal priorities run in arrival
//!   order
//! - **Rescan**: after every dispatch, resume or reap the loop starts over
//!   from the highest-priority task
//! - **Signaling**: a task wakes another by marking it `Ready`; there is no
//!   other synchronization primitive
//! - **Idle**: when nothing can run an [`IdleHook`] decides whether to park
//!   and rescan or to return
//!
//! ## Memory Model
//!
//! - **No heap**: queue and snapshots are fixed-size arrays
//! - **Const-generic sizing**: `Scheduler<CAP, CTX>` with
//!   [`config::MAX_TASKS`] and [`config::CONTEXT_CAPACITY`] as defaults
//! - **Checked limits**: a full queue and an oversized snapshot are typed
//!   errors, never silent corruption
//!
//! ## Example
//!
//! ```
//! use core::cell::Cell;
//! use coopsched::{RunOutcome, Scheduler, TaskCx};
//!
//! let steps = Cell::new(0);
//! let worker = |cx: &mut TaskCx<'_>| {
//!     steps.set(steps.get() + 1);
//!     cx.yield_now();
//!     steps.set(steps.get() + 1);
//! };
//!
//! let mut stack = vec![0u8; 32 * 1024];
//! let mut sched: Scheduler<'_, 4, 4096> = Scheduler::new(&mut stack).unwrap();
//! sched.spawn(&worker, 1).unwrap();
//!
//! assert_eq!(sched.run(), RunOutcome::Drained);
//! assert_eq!(steps.get(), 2);
//! ```

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod context;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use error::{Fault, Result, SchedError};
pub use queue::ReadyQueue;
pub use scheduler::{
    IdleAction, IdleHook, ParkOnIdle, RunOutcome, Scheduler, SchedulerStats, StopWhenIdle, TaskCx,
};
pub use task::{TaskFn, TaskId, TaskState};
