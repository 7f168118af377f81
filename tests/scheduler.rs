//! End-to-end scheduling tests on the host architecture.

use core::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};

use coopsched::{
    IdleAction, ReadyQueue, RunOutcome, SchedError, Scheduler, TaskCx, TaskId, TaskState,
};

const STACK: usize = 64 * 1024;

type Sched<'a> = Scheduler<'a, 8, 8192>;
type Queue<'a> = ReadyQueue<'a, 8, 8192>;
type Trace = RefCell<Vec<&'static str>>;

fn exec_stack() -> Vec<u8> {
    vec![0u8; STACK]
}

// ---------------------------------------------------------------------------
// Three-task rendezvous
// ---------------------------------------------------------------------------

#[inline(never)]
fn first_helper(cx: &mut TaskCx<'_>, trace: &Trace) {
    trace.borrow_mut().push("t1 helper suspends");
    cx.wait();
    trace.borrow_mut().push("t1 helper resumed");
    cx.wake(TaskId::new(2)).unwrap();
}

#[test]
fn test_three_task_rendezvous() {
    let trace = Trace::default();

    let t1 = |cx: &mut TaskCx<'_>| {
        trace.borrow_mut().push("t1 start");
        first_helper(cx, &trace);
        trace.borrow_mut().push("t1 suspends");
        cx.wait();
        trace.borrow_mut().push("t1 done");
    };
    let t2 = |cx: &mut TaskCx<'_>| {
        trace.borrow_mut().push("t2 suspends");
        cx.wait();
        trace.borrow_mut().push("t2 resumed");
        cx.wake(TaskId::new(0)).unwrap();
    };
    let t3 = |cx: &mut TaskCx<'_>| {
        trace.borrow_mut().push("t3 wakes t2");
        cx.wake(TaskId::new(1)).unwrap();
        cx.wait();
        trace.borrow_mut().push("t3 resumed");
        cx.wake(TaskId::new(0)).unwrap();
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    assert_eq!(sched.spawn(&t1, 1), Ok(TaskId::new(0)));
    assert_eq!(sched.spawn(&t2, 2), Ok(TaskId::new(1)));
    assert_eq!(sched.spawn(&t3, 3), Ok(TaskId::new(2)));

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(sched.queue().is_empty());
    assert_eq!(sched.current_task_id(), None);

    let stats = sched.stats();
    assert_eq!(stats.dispatches, 3);
    assert_eq!(stats.resumes, 4);
    assert_eq!(stats.suspensions, 4);
    assert_eq!(stats.completions, 3);
    assert_eq!(stats.faults, 0);
    assert!(stats.peak_context > 0);
    assert!(sched.last_fault().is_none());

    assert_eq!(
        *trace.borrow(),
        [
            "t1 start",
            "t1 helper suspends",
            "t2 suspends",
            "t3 wakes t2",
            "t2 resumed",
            "t1 helper resumed",
            "t1 suspends",
            "t3 resumed",
            "t1 done",
        ]
    );
}

// ---------------------------------------------------------------------------
// Stack preservation
// ---------------------------------------------------------------------------

#[inline(never)]
fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.rotate_left(5) ^ u32::from(b))
}

#[inline(never)]
fn nested_locals(cx: &mut TaskCx<'_>, depth: u32) -> u32 {
    let mut local = [0u8; 256];
    for (i, b) in local.iter_mut().enumerate() {
        *b = (i as u32 * 7 + depth) as u8;
    }
    let before = checksum(&local);

    let below = if depth == 0 {
        cx.wait();
        0
    } else {
        nested_locals(cx, depth - 1)
    };

    assert_eq!(checksum(&local), before);
    before.wrapping_add(below)
}

#[inline(never)]
fn scribble(seed: u8) -> u32 {
    let buf = [seed; 2048];
    checksum(&buf)
}

#[test]
fn test_locals_survive_nested_suspension() {
    let observed = Cell::new(None);

    let deep = |cx: &mut TaskCx<'_>| {
        observed.set(Some(nested_locals(cx, 4)));
    };
    let noisy = |cx: &mut TaskCx<'_>| {
        // Reuses the stack region `deep` was parked on.
        std::hint::black_box(scribble(0xC3));
        cx.wake(TaskId::new(0)).unwrap();
        std::hint::black_box(scribble(0x3C));
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&deep, 1).unwrap();
    sched.spawn(&noisy, 2).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);

    let mut reference = 0u32;
    for depth in 0..=4u32 {
        let mut local = [0u8; 256];
        for (i, b) in local.iter_mut().enumerate() {
            *b = (i as u32 * 7 + depth) as u8;
        }
        reference = reference.wrapping_add(checksum(&local));
    }
    assert_eq!(observed.get(), Some(reference));
}

#[inline(never)]
fn id_from_depth(cx: &mut TaskCx<'_>, depth: u32) -> TaskId {
    if depth == 0 {
        cx.yield_now();
        cx.current_task_id()
    } else {
        id_from_depth(cx, depth - 1)
    }
}

#[test]
fn test_current_task_id_from_nested_calls() {
    let seen = RefCell::new(Vec::new());
    let body = |cx: &mut TaskCx<'_>| {
        let top = cx.current_task_id();
        let nested = id_from_depth(cx, 3);
        seen.borrow_mut().push((top, nested));
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    let a = sched.spawn(&body, 2).unwrap();
    let b = sched.spawn(&body, 1).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert_eq!(*seen.borrow(), [(b, b), (a, a)]);
}

// ---------------------------------------------------------------------------
// Fault isolation
// ---------------------------------------------------------------------------

#[test]
fn test_context_overflow_terminates_only_offender() {
    let after_wait = Cell::new(false);
    let survivor_ran = Cell::new(false);

    let greedy = |cx: &mut TaskCx<'_>| {
        cx.wait();
        after_wait.set(true);
    };
    let survivor = |_cx: &mut TaskCx<'_>| survivor_ran.set(true);

    let mut stack = exec_stack();
    // No real stack span fits in 32 bytes.
    let mut sched: Scheduler<'_, 4, 32> = Scheduler::new(&mut stack).unwrap();
    let offender = sched.spawn(&greedy, 1).unwrap();
    sched.spawn(&survivor, 2).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(!after_wait.get());
    assert!(survivor_ran.get());

    let fault = sched.last_fault().unwrap();
    assert_eq!(fault.task, offender);
    assert!(matches!(
        fault.error,
        SchedError::ContextOverflow { capacity: 32, needed } if needed > 32
    ));
    assert!(fault.error.is_task_fault());

    let stats = sched.stats();
    assert_eq!(stats.faults, 1);
    assert_eq!(stats.completions, 1);
}

#[test]
fn test_resume_with_discarded_snapshot_is_invalid_resume() {
    let resumed = Cell::new(false);
    let body = |cx: &mut TaskCx<'_>| {
        cx.wait();
        resumed.set(true);
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    let broken = sched.spawn(&body, 1).unwrap();
    assert_eq!(sched.run(), RunOutcome::Stalled { waiting: 1 });

    sched.queue_mut().set_context(broken, &[]).unwrap();
    sched.queue_mut().set_state(broken, TaskState::Ready).unwrap();
    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(!resumed.get());

    let fault = sched.last_fault().unwrap();
    assert_eq!(fault.task, broken);
    assert_eq!(fault.error, SchedError::InvalidResume(broken));
    assert_eq!(sched.stats().faults, 1);
}

#[test]
fn test_wake_before_first_run_dispatches() {
    let consumer_ran = Cell::new(false);
    let producer = |cx: &mut TaskCx<'_>| {
        assert_eq!(cx.state(TaskId::new(1)), Ok(TaskState::Created));
        cx.wake(TaskId::new(1)).unwrap();
    };
    let consumer = |_cx: &mut TaskCx<'_>| consumer_ran.set(true);

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&producer, 1).unwrap();
    sched.spawn(&consumer, 2).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(consumer_ran.get());
    assert!(sched.last_fault().is_none());
    assert_eq!(sched.stats().dispatches, 2);
    assert_eq!(sched.stats().completions, 2);
}

#[test]
fn test_ready_set_externally_before_first_run_dispatches() {
    let ran = Cell::new(0u32);
    let body = |_cx: &mut TaskCx<'_>| ran.set(ran.get() + 1);

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    let early = sched.spawn(&body, 1).unwrap();
    sched.spawn(&body, 2).unwrap();
    sched.queue_mut().set_state(early, TaskState::Ready).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert_eq!(ran.get(), 2);
    assert!(sched.last_fault().is_none());
    assert_eq!(sched.stats().faults, 0);
}

// ---------------------------------------------------------------------------
// Moving the scheduler
// ---------------------------------------------------------------------------

#[test]
fn test_scheduler_moved_between_runs() {
    let trace = RefCell::new(Vec::new());
    let body = |cx: &mut TaskCx<'_>| {
        let marker = [0x5Au8; 64];
        cx.wait();
        trace.borrow_mut().push(cx.current_task_id());
        cx.wait();
        trace.borrow_mut().push(cx.current_task_id());
        assert!(marker.iter().all(|&b| b == 0x5A));
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    let id = sched.spawn(&body, 1).unwrap();
    assert_eq!(sched.run(), RunOutcome::Stalled { waiting: 1 });

    // Onto the heap.
    let mut boxed = Box::new(sched);
    boxed.queue_mut().set_state(id, TaskState::Ready).unwrap();
    assert_eq!(boxed.run(), RunOutcome::Stalled { waiting: 1 });

    // And back out again.
    let mut unboxed = *boxed;
    unboxed.queue_mut().set_state(id, TaskState::Ready).unwrap();
    assert_eq!(unboxed.run(), RunOutcome::Drained);

    assert_eq!(*trace.borrow(), [id, id]);
    let stats = unboxed.stats();
    assert_eq!(stats.resumes, 2);
    assert_eq!(stats.completions, 1);
    assert_eq!(stats.faults, 0);
}

// ---------------------------------------------------------------------------
// Idle handling
// ---------------------------------------------------------------------------

#[test]
fn test_stalled_then_woken_externally() {
    let finished = Cell::new(false);
    let body = |cx: &mut TaskCx<'_>| {
        cx.wait();
        finished.set(true);
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    let id = sched.spawn(&body, 1).unwrap();

    assert_eq!(sched.run(), RunOutcome::Stalled { waiting: 1 });
    assert!(!finished.get());
    assert_eq!(sched.queue().state(id), Ok(TaskState::WaitingForEvent));
    assert!(!sched.queue().context(id).unwrap().is_empty());

    sched.queue_mut().set_state(id, TaskState::Ready).unwrap();
    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(finished.get());
}

#[test]
fn test_idle_hook_injects_events() {
    let rounds = Cell::new(0u32);
    let body = |cx: &mut TaskCx<'_>| {
        for _ in 0..3 {
            cx.wait();
            rounds.set(rounds.get() + 1);
        }
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&body, 1).unwrap();

    let outcome = sched.run_with(|queue: &mut Queue<'_>| match queue.id_at(0) {
        Some(id) => {
            queue.set_state(id, TaskState::Ready).unwrap();
            IdleAction::Continue
        }
        None => IdleAction::Stop,
    });

    assert_eq!(outcome, RunOutcome::Drained);
    assert_eq!(rounds.get(), 3);
    assert_eq!(sched.stats().idle_calls, 4);
}

// ---------------------------------------------------------------------------
// Task-side operations
// ---------------------------------------------------------------------------

#[test]
fn test_yield_rescans_from_highest_priority() {
    let trace = Trace::default();
    let first = |cx: &mut TaskCx<'_>| {
        trace.borrow_mut().push("first before yield");
        cx.yield_now();
        trace.borrow_mut().push("first after yield");
    };
    let second = |_cx: &mut TaskCx<'_>| trace.borrow_mut().push("second");

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&first, 1).unwrap();
    sched.spawn(&second, 1).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert_eq!(
        *trace.borrow(),
        ["first before yield", "first after yield", "second"]
    );
}

static CHILD_RUNS: AtomicU32 = AtomicU32::new(0);

fn child(cx: &mut TaskCx<'_>) {
    CHILD_RUNS.fetch_add(1, Ordering::SeqCst);
    cx.wake(TaskId::new(0)).unwrap();
}

fn parent(cx: &mut TaskCx<'_>) {
    let spawned = cx.spawn(&child, 0).unwrap();
    assert_eq!(spawned, TaskId::new(1));
    assert_eq!(cx.queue_len(), 2);
    cx.wait();
    assert_eq!(CHILD_RUNS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_spawn_from_task() {
    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&parent, 5).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert_eq!(CHILD_RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(sched.stats().dispatches, 2);
    assert_eq!(sched.stats().completions, 2);
}

static SPAWN_RESULTS: std::sync::Mutex<Vec<Result<TaskId, SchedError>>> =
    std::sync::Mutex::new(Vec::new());

fn idle_child(_cx: &mut TaskCx<'_>) {}

fn spawner(cx: &mut TaskCx<'_>) {
    for _ in 0..2 {
        let result = cx.spawn(&idle_child, 1);
        SPAWN_RESULTS.lock().unwrap().push(result);
    }
}

#[test]
fn test_spawn_from_task_reports_queue_full() {
    let mut stack = exec_stack();
    let mut sched: Scheduler<'_, 2, 8192> = Scheduler::new(&mut stack).unwrap();
    sched.spawn(&spawner, 0).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert_eq!(
        *SPAWN_RESULTS.lock().unwrap(),
        [Ok(TaskId::new(1)), Err(SchedError::QueueFull)]
    );
}

#[test]
fn test_terminated_by_another_task_is_reaped() {
    let victim_resumed = Cell::new(false);
    let victim = |cx: &mut TaskCx<'_>| {
        cx.wait();
        victim_resumed.set(true);
    };
    let killer = |cx: &mut TaskCx<'_>| {
        let target = TaskId::new(0);
        assert_eq!(cx.state(target), Ok(TaskState::WaitingForEvent));
        cx.set_state(target, TaskState::Terminated).unwrap();
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&victim, 1).unwrap();
    sched.spawn(&killer, 2).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(!victim_resumed.get());
    assert_eq!(sched.stats().completions, 1);
}

#[inline(never)]
fn leave_early(cx: &mut TaskCx<'_>) {
    cx.exit();
}

#[test]
fn test_exit_from_nested_call() {
    let reached_end = Cell::new(false);
    let body = |cx: &mut TaskCx<'_>| {
        leave_early(cx);
        reached_end.set(true);
    };

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&body, 1).unwrap();

    assert_eq!(sched.run(), RunOutcome::Drained);
    assert!(!reached_end.get());
    assert_eq!(sched.stats().completions, 1);
    assert_eq!(sched.stats().suspensions, 1);
}

#[test]
fn test_wake_unknown_task_is_not_found() {
    let result = Cell::new(None);
    let body = |cx: &mut TaskCx<'_>| result.set(Some(cx.wake(TaskId::new(99))));

    let mut stack = exec_stack();
    let mut sched = Sched::new(&mut stack).unwrap();
    sched.spawn(&body, 1).unwrap();
    sched.run();

    assert_eq!(
        result.get(),
        Some(Err(SchedError::TaskNotFound(TaskId::new(99))))
    );
}
