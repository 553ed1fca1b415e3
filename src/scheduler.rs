//! # Cooperative Fiber Scheduler
//!
//! Strict round-robin over N fibers on a single OS thread. No preemption,
//! no priorities, no blocking primitives: a fiber runs until it calls
//! [`yield_now`], and the scheduler hands the CPU to the next fiber in the
//! ring.
//!
//! The scheduler is thread-local. Each OS thread that calls [`init`] gets
//! its own ring, and fibers never migrate across threads, so none of the
//! scheduler's state needs a lock. Calling any other function here before
//! `init` on the same thread panics.
//!
//! ## The first switch into a fiber
//!
//! `spawn` does not run the entry. It forges an initial stack frame (see
//! [`crate::arch`]) shaped exactly like the save area `switch_context`
//! restores from, with the trampoline's address in the return slot and the
//! boxed entry closure parked in a designated callee-saved register. The
//! first time the ring reaches the fiber, the ordinary restore path "pops"
//! the forged registers and returns into the trampoline, which hands the
//! closure to [`fiber_entry`].
//!
//! Completed fibers stay in the ring and re-yield immediately when their
//! turn comes; [`run`] uses their completion flags to know when to return.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::arch;
use crate::fiber::{Fiber, FiberId, FiberSnapshot, FiberStack, DEFAULT_STACK_SIZE};
use crate::log;

thread_local! {
    static SCHEDULER: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// Per-thread scheduler state.
struct Scheduler {
    fibers: Vec<Box<Fiber>>,
    current: usize,
    stack_size: usize,
}

/// Capture the calling OS thread as fiber 0 and start scheduling on it.
///
/// Returns `false` if this thread's scheduler was already initialized.
pub fn init() -> bool {
    init_with_stack_size(DEFAULT_STACK_SIZE)
}

/// Like [`init`], with an explicit stack size for spawned fibers.
pub fn init_with_stack_size(stack_size: usize) -> bool {
    SCHEDULER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Scheduler {
            fibers: vec![Box::new(Fiber {
                id: FiberId(0),
                name: "main".into(),
                stack: None,
                saved_sp: 0,
                completed: false,
            })],
            current: 0,
            stack_size,
        });
        true
    })
}

/// Spawn a new fiber that will run `entry` when the ring first reaches it.
///
/// The closure moves onto the heap and its pointer rides the forged frame
/// into the trampoline; it is dropped there after the call returns.
pub fn spawn<F>(name: impl Into<String>, entry: F) -> FiberId
where
    F: FnOnce() + 'static,
{
    let closure: Box<dyn FnOnce()> = Box::new(entry);
    let raw = Box::into_raw(Box::new(closure)) as *mut u8;

    SCHEDULER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let sched = slot.as_mut().expect("scheduler not initialized on this thread");

        let stack = FiberStack::allocate(sched.stack_size);
        // SAFETY: the stack top is writable and the closure box is handed
        // to the trampoline exactly once.
        let sp = unsafe { arch::forge_initial_frame(stack.top(), raw) };

        let id = FiberId(sched.fibers.len() as u64);
        let name = name.into();
        log::record(log::LogLevel::Debug, "fiber spawned")
            .target("scheduler")
            .field_int("id", id.as_u64() as i64)
            .field_str("name", name.clone())
            .emit();

        sched.fibers.push(Box::new(Fiber {
            id,
            name,
            stack: Some(stack),
            saved_sp: sp,
            completed: false,
        }));
        id
    })
}

/// Suspend the current fiber and resume the next one in the ring.
///
/// With a single fiber in the ring this is a no-op. The borrow on the
/// scheduler is released before the actual switch, so the resumed fiber
/// finds the scheduler unlocked.
pub fn yield_now() {
    let switch = SCHEDULER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let sched = slot.as_mut().expect("scheduler not initialized on this thread");

        let count = sched.fibers.len();
        let next = (sched.current + 1) % count;
        if next == sched.current {
            return None;
        }

        let prev = sched.current;
        sched.current = next;
        debug_assert!(
            sched.fibers[next].sp_in_bounds(),
            "suspended fiber's saved SP escaped its stack"
        );

        // The Box keeps each record's address stable across ring growth.
        let prev_sp_slot: *mut usize = &mut sched.fibers[prev].saved_sp;
        let next_sp = sched.fibers[next].saved_sp;
        Some((prev_sp_slot, next_sp))
    });

    if let Some((prev_sp_slot, next_sp)) = switch {
        // SAFETY: next_sp is a save area written by a previous switch or
        // forged at spawn; the slot outlives the suspension (boxed record).
        unsafe { arch::switch_context(prev_sp_slot, next_sp) };
    }
}

/// Identifier of the fiber currently executing on this thread.
pub fn current() -> FiberId {
    SCHEDULER.with(|cell| {
        let slot = cell.borrow();
        let sched = slot.as_ref().expect("scheduler not initialized on this thread");
        sched.fibers[sched.current].id
    })
}

/// Snapshots of every fiber in this thread's ring.
pub fn all() -> Vec<FiberSnapshot> {
    SCHEDULER.with(|cell| {
        let slot = cell.borrow();
        let sched = slot.as_ref().expect("scheduler not initialized on this thread");
        sched
            .fibers
            .iter()
            .map(|f| FiberSnapshot {
                id: f.id,
                name: f.name.clone(),
                completed: f.completed,
            })
            .collect()
    })
}

/// Drive the ring until every spawned fiber has completed.
///
/// Must be called from the main fiber. Completed fibers keep their slot in
/// the ring and re-yield instantly, so the cost of a finished fiber is one
/// context switch per lap.
pub fn run() {
    loop {
        let done = SCHEDULER.with(|cell| {
            let slot = cell.borrow();
            let sched = slot.as_ref().expect("scheduler not initialized on this thread");
            sched.fibers.iter().filter(|f| f.stack.is_some()).all(|f| f.completed)
        });
        if done {
            return;
        }
        yield_now();
    }
}

/// Mark the currently running fiber as completed.
fn mark_current_completed() {
    SCHEDULER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let sched = slot.as_mut().expect("scheduler not initialized on this thread");
        let current = sched.current;
        sched.fibers[current].completed = true;
    });
}

/// First Rust frame of every spawned fiber; the arch trampoline calls this
/// with the closure pointer recovered from the designated register.
///
/// Runs the closure (catching panics so unwinding never crosses the forged
/// frame), drops it, marks the fiber completed and yields forever. The
/// scheduler never switches back into a frame below this one.
pub(crate) extern "C" fn fiber_entry(raw: *mut u8) -> ! {
    {
        // SAFETY: `raw` is the Box<Box<dyn FnOnce()>> leaked by spawn(),
        // delivered exactly once.
        let closure = unsafe { Box::from_raw(raw as *mut Box<dyn FnOnce()>) };
        let entry = *closure;
        if catch_unwind(AssertUnwindSafe(entry)).is_err() {
            log::record(log::LogLevel::Error, "fiber entry panicked")
                .target("scheduler")
                .field_int("id", current().as_u64() as i64)
                .emit();
        }
    }

    mark_current_completed();
    loop {
        yield_now();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    // Each #[test] runs on its own thread, so every test gets a fresh
    // thread-local scheduler.

    #[test]
    fn test_init_is_idempotent() {
        assert!(init());
        assert!(!init());
        assert_eq!(current(), FiberId(0));
    }

    #[test]
    fn test_yield_with_only_main_is_noop() {
        init();
        yield_now();
        yield_now();
        assert_eq!(current(), FiberId(0));
    }

    #[test]
    fn test_spawn_runs_entry_on_first_switch() {
        init();
        let ran = Rc::new(StdRefCell::new(false));
        let flag = ran.clone();
        spawn("probe", move || {
            *flag.borrow_mut() = true;
        });
        assert!(!*ran.borrow(), "entry must not run at spawn time");
        yield_now();
        assert!(*ran.borrow());
    }

    #[test]
    fn test_round_robin_interleave() {
        init();
        let order: Rc<StdRefCell<Vec<u64>>> = Rc::new(StdRefCell::new(Vec::new()));

        for _ in 0..2 {
            let order = order.clone();
            spawn("worker", move || {
                for _ in 0..5 {
                    order.borrow_mut().push(current().as_u64());
                    yield_now();
                }
            });
        }

        // Drive the ring long enough for both fibers to finish their laps.
        for _ in 0..16 {
            yield_now();
        }

        let observed = order.borrow();
        assert_eq!(
            &observed[..],
            &[1, 2, 1, 2, 1, 2, 1, 2, 1, 2],
            "strict round-robin interleave expected"
        );
    }

    #[test]
    fn test_completed_fibers_reyield() {
        init();
        let counter = Rc::new(StdRefCell::new(0u32));
        let c = counter.clone();
        spawn("oneshot", move || {
            *c.borrow_mut() += 1;
        });

        for _ in 0..10 {
            yield_now();
        }
        // The entry ran exactly once even though the ring kept visiting it.
        assert_eq!(*counter.borrow(), 1);
        let fibers = all();
        assert!(fibers[1].completed);
    }

    #[test]
    fn test_run_returns_when_all_spawned_complete() {
        init();
        let log: Rc<StdRefCell<Vec<&'static str>>> = Rc::new(StdRefCell::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = log.clone();
            spawn(name, move || {
                log.borrow_mut().push(name);
                yield_now();
                log.borrow_mut().push(name);
            });
        }

        run();
        let entries = log.borrow();
        assert_eq!(entries.len(), 6);
        assert_eq!(&entries[..3], &["a", "b", "c"]);
    }

    #[test]
    fn test_panicking_fiber_completes_ring_survives() {
        init();
        let after = Rc::new(StdRefCell::new(false));
        spawn("doomed", || panic!("fiber panic"));
        let flag = after.clone();
        spawn("survivor", move || {
            *flag.borrow_mut() = true;
        });

        run();
        assert!(*after.borrow());
        assert!(all()[1].completed);
    }

    #[test]
    fn test_identity_preserved_across_yields() {
        init();
        let seen: Rc<StdRefCell<Vec<u64>>> = Rc::new(StdRefCell::new(Vec::new()));
        let s = seen.clone();
        spawn("self-check", move || {
            for _ in 0..3 {
                s.borrow_mut().push(current().as_u64());
                yield_now();
            }
        });

        run();
        assert_eq!(&seen.borrow()[..], &[1, 1, 1]);
    }

    #[test]
    fn test_snapshots_report_names() {
        init();
        spawn("ingest", || {});
        spawn("status", || {});
        let fibers = all();
        assert_eq!(fibers.len(), 3);
        assert_eq!(fibers[0].name, "main");
        assert_eq!(fibers[1].name, "ingest");
        assert_eq!(fibers[2].name, "status");
    }
}
