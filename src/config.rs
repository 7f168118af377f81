//! # Scheduler Configuration
//!
//! Compile-time constants governing the ready queue, the snapshot buffers and
//! the shared execution stack. All limits are fixed at compile time; the
//! queue and snapshot sizes can be overridden per scheduler through const
//! generics, with the values below as defaults.

/// Maximum number of tasks the ready queue can hold simultaneously.
/// Each queued task carries a `CONTEXT_CAPACITY`-byte snapshot buffer, so
/// the queue costs roughly `MAX_TASKS * CONTEXT_CAPACITY` bytes of RAM.
pub const MAX_TASKS: usize = 32;

/// Capacity of a task's saved-context buffer in bytes. A task whose stack
/// span at a suspend point exceeds this is terminated with
/// `ContextOverflow`. This is the reference sizing for small optimized
/// firmware; unoptimized builds need considerably more per suspend.
pub const CONTEXT_CAPACITY: usize = 256;

/// Task ids are handed out modulo this value.
pub const MAX_TASK_ID: u16 = 1024;

/// Highest priority (scheduled first).
pub const HIGHEST_PRIORITY: u8 = 0;

/// Lowest accepted priority.
pub const LOWEST_PRIORITY: u8 = 128;

/// Smallest execution stack accepted by `ExecStack::new`. Must cover the
/// initial register frame, the canary and a few frames of task code.
pub const MIN_EXEC_STACK: usize = 1024;

/// Bytes reserved above the frame boundary for the scheduler anchor. Holds
/// one trait-object pointer and keeps the boundary `STACK_ALIGN`-aligned on
/// every supported target.
pub const ANCHOR_LEN: usize = 16;

/// Number of bytes at the low end of the execution stack checked after every
/// switch back to the scheduler.
pub const CANARY_LEN: usize = 32;

/// Fill byte painted over the execution stack for canary and high-water
/// mark detection.
pub const STACK_PAINT: u8 = 0xA5;
