//! # coopsched Demo Firmware
//!
//! Runs the three-task rendezvous on a Cortex-M4 board:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `sensor_task` | 1 | Suspends inside a nested helper, wakes `logger_task`, suspends again |
//! | `filter_task` | 2 | Suspends immediately, wakes `sensor_task` once resumed |
//! | `logger_task` | 3 | Wakes `filter_task`, suspends, wakes `sensor_task` once resumed |
//!
//! ## Expected Order
//!
//! 1. `sensor_task` enters its helper and waits.
//! 2. `filter_task` waits.
//! 3. `logger_task` wakes `filter_task` and waits.
//! 4. `filter_task` resumes, wakes `sensor_task` and completes.
//! 5. `sensor_task` resumes inside its helper, wakes `logger_task`, waits.
//! 6. `logger_task` resumes, wakes `sensor_task` and completes.
//! 7. `sensor_task` resumes at its last suspend point and completes.
//!
//! The queue is then empty and the core parks in `wfi`.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use coopsched::{ParkOnIdle, Scheduler, TaskCx, TaskId};

/// Snapshot capacity for the demo tasks.
const DEMO_CONTEXT: usize = 512;

/// Bytes of RAM lent to the scheduler as the shared execution stack.
const EXEC_STACK_SIZE: usize = 4096;

const SENSOR: TaskId = TaskId::new(0);
const FILTER: TaskId = TaskId::new(1);
const LOGGER: TaskId = TaskId::new(2);

/// Samples taken by `sensor_task`; inspect with a debugger.
static SAMPLES: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

#[inline(never)]
fn sample_burst(cx: &mut TaskCx<'_>) -> u32 {
    let mut acc: u32 = 0;
    for i in 0..16u32 {
        acc = acc.wrapping_mul(31).wrapping_add(i);
    }

    // Suspends two frames below the task entry; `acc` survives.
    cx.wait();
    cx.wake(LOGGER).expect("demo task is queued");
    acc
}

fn sensor_task(cx: &mut TaskCx<'_>) {
    let acc = sample_burst(cx);
    SAMPLES.fetch_add(acc & 0xFF, Ordering::Relaxed);
    cx.wait();
    SAMPLES.fetch_add(1, Ordering::Relaxed);
}

fn filter_task(cx: &mut TaskCx<'_>) {
    cx.wait();
    cx.wake(SENSOR).expect("demo task is queued");
}

fn logger_task(cx: &mut TaskCx<'_>) {
    cx.wake(FILTER).expect("demo task is queued");
    cx.wait();
    cx.wake(SENSOR).expect("demo task is queued");
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let stack = cortex_m::singleton!(: [u8; EXEC_STACK_SIZE] = [0; EXEC_STACK_SIZE])
        .expect("execution stack already taken");

    let mut sched: Scheduler<'static, 4, DEMO_CONTEXT> =
        Scheduler::new(stack).expect("execution stack too small");

    sched.spawn(&sensor_task, 1).expect("failed to spawn sensor_task");
    sched.spawn(&filter_task, 2).expect("failed to spawn filter_task");
    sched.spawn(&logger_task, 3).expect("failed to spawn logger_task");

    // Never returns: once the queue drains the hook parks in `wfi`.
    sched.run_with(ParkOnIdle);
    loop {
        cortex_m::asm::wfi();
    }
}
