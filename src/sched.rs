//! The single-CPU scheduler: ready set, all-threads set, and the tick-driven
//! policy engine (fixed priority with donation, or MLFQS).
//!
//! Targets a single core whose only mutual-exclusion primitive is disabling
//! interrupts; a single priority-ordered ready set guarded that way replaces
//! a lock-free multi-CPU queue, with `enqueue`/`pick_next`/`on_tick`-style
//! operations kept as free functions instead of a trait object nobody else
//! implements.

use crate::arch::{Arch, DefaultArch};
use crate::config::{self, SchedulerPolicy};
use crate::errors::{KernelError, KernelResult};
use crate::fixed::Fixed;
use crate::mem::{StackPool, StackSizeClass};
use crate::thread::{alloc_thread_id, JoinHandle, ReadyRef, RunningRef, Thread, ThreadId, ThreadState};
use crate::time::tick::GLOBAL_TICK_COUNTER;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use spin::{Lazy, Mutex};

extern crate alloc;
use alloc::vec::Vec;

static MLFQS: AtomicBool = AtomicBool::new(false);
static READY: Mutex<Vec<ReadyRef>> = Mutex::new(Vec::new());
static ALL_THREADS: Mutex<Vec<Thread>> = Mutex::new(Vec::new());
static CURRENT: Mutex<Option<RunningRef>> = Mutex::new(None);
static LOAD_AVG: Mutex<Fixed> = Mutex::new(Fixed::ZERO);
static CURRENT_SLICE_TICKS: AtomicU64 = AtomicU64::new(0);
static STACK_POOL: StackPool = StackPool::new();

/// Context of whatever was executing before the very first `schedule()`
/// call (the boot stack). Never restored to in practice — boot never
/// blocks — but `context_switch` needs a valid slot to save into.
static BOOT_CONTEXT: Lazy<Mutex<<DefaultArch as Arch>::SavedContext>> =
    Lazy::new(|| Mutex::new(Default::default()));

fn boot_context_ptr() -> *mut <DefaultArch as Arch>::SavedContext {
    let mut guard = BOOT_CONTEXT.lock();
    &mut *guard as *mut _
}

/// What should happen to the outgoing thread when `schedule` switches away
/// from it.
enum Outgoing {
    /// Cooperative yield: still runnable, goes back on the ready set.
    Requeue,
    /// Caller already transitioned the thread to `Blocked`/`Dying`; leave
    /// it off the ready set.
    Parked,
}

/// Select which priority policy governs scheduling. Must be called once,
/// before any thread is spawned.
pub fn init(policy: SchedulerPolicy) {
    MLFQS.store(policy == SchedulerPolicy::Mlfqs, Ordering::Release);
}

fn policy() -> SchedulerPolicy {
    if MLFQS.load(Ordering::Acquire) {
        SchedulerPolicy::Mlfqs
    } else {
        SchedulerPolicy::PriorityDonation
    }
}

/// Whether locks should donate priority while waiting. False under MLFQS,
/// which derives priority from `nice`/`recent_cpu` and has no notion of
/// donation.
pub fn donation_enabled() -> bool {
    policy() == SchedulerPolicy::PriorityDonation
}

/// Create a new thread, register it, and place it on the ready set.
pub fn spawn(entry: fn(), priority: u8, stack_size: StackSizeClass) -> KernelResult<JoinHandle> {
    crate::assert_kernel!(
        (config::PRI_MIN..=config::PRI_MAX).contains(&priority),
        "priority {} outside [{}, {}]",
        priority,
        config::PRI_MIN,
        config::PRI_MAX
    );

    let stack = STACK_POOL
        .allocate(stack_size)
        .ok_or(KernelError::ResourceExhausted)?;
    let id = alloc_thread_id();
    let thread = Thread::new(id, stack, entry, priority);

    ALL_THREADS.lock().push(thread.clone());
    READY.lock().push(ReadyRef(thread.clone()));

    maybe_yield_to_higher_priority();

    Ok(JoinHandle::new(thread))
}

/// Find a registered thread by id (used for priority-donation chain walks).
pub fn lookup_thread(id: ThreadId) -> Option<Thread> {
    ALL_THREADS
        .lock()
        .iter()
        .find(|t| t.id() == id)
        .cloned()
}

/// The thread currently executing, if scheduling has started.
pub fn current() -> Option<Thread> {
    CURRENT.lock().as_ref().map(|r| r.0.clone())
}

/// Remove and return the highest-priority ready thread, preferring the one
/// that has waited longest among equals (stable FIFO within a priority
/// band, matching Pintos's `list_insert_ordered` + tie-break-by-arrival).
fn pop_highest_priority() -> Option<ReadyRef> {
    let mut ready = READY.lock();
    if ready.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_priority = ready[0].priority();
    for (idx, candidate) in ready.iter().enumerate().skip(1) {
        if candidate.priority() > best_priority {
            best_idx = idx;
            best_priority = candidate.priority();
        }
    }
    Some(ready.remove(best_idx))
}

/// Perform a scheduling decision: pick the next ready thread (if any is
/// more eligible than whoever is running) and switch to it. Interrupts
/// must already be disabled by the caller.
fn schedule(outgoing: Outgoing) {
    let next = match pop_highest_priority() {
        Some(next) => next,
        None => return, // nobody else runnable; keep executing as-is
    };

    let prev = CURRENT.lock().take();
    let prev_ctx = match &prev {
        Some(p) => p.0.context_ptr(),
        None => boot_context_ptr(),
    };

    if let (Some(prev_running), Outgoing::Requeue) = (&prev, &outgoing) {
        READY.lock().push(ReadyRef(prev_running.0.clone()));
    }

    let next_running = next.start_running();
    let next_ctx = next_running.0.context_ptr();
    CURRENT_SLICE_TICKS.store(0, Ordering::Release);
    *CURRENT.lock() = Some(next_running);

    unsafe {
        DefaultArch::context_switch(prev_ctx, next_ctx);
    }
}

/// Voluntarily give up the CPU. The caller remains ready and may be
/// rescheduled immediately if nothing else is runnable.
pub fn yield_now() {
    crate::assert_kernel!(
        !DefaultArch::in_interrupt_context(),
        "yield_now called from interrupt context"
    );
    let prior = DefaultArch::disable_interrupts();
    schedule(Outgoing::Requeue);
    DefaultArch::restore_interrupts(prior);
}

/// Block the calling thread. Intended to be called by semaphore/lock/condvar
/// wait paths after registering themselves as a waiter; does not re-enqueue
/// onto the ready set, unlike `yield_now`.
pub fn block_current() {
    crate::assert_kernel!(
        !DefaultArch::in_interrupt_context(),
        "block_current called from interrupt context"
    );
    let prior = DefaultArch::disable_interrupts();
    if let Some(running) = CURRENT.lock().as_ref() {
        running.0.set_state(ThreadState::Blocked);
    }
    schedule(Outgoing::Parked);
    DefaultArch::restore_interrupts(prior);
}

/// Move a blocked thread back onto the ready set.
pub fn unblock(thread: Thread) {
    crate::assert_kernel!(
        thread.state() == ThreadState::Blocked,
        "unblock called on a thread that was not blocked"
    );
    thread.set_state(ThreadState::Ready);
    READY.lock().push(ReadyRef(thread));
}

/// Terminate the calling thread with the given exit status; never returns.
pub fn exit_current(status: i32) -> ! {
    let prior = DefaultArch::disable_interrupts();
    if let Some(running) = CURRENT.lock().as_ref() {
        running.0.set_exit_status(status);
        running.0.set_state(ThreadState::Dying);
    }
    schedule(Outgoing::Parked);
    DefaultArch::restore_interrupts(prior);
    unreachable!("exit_current: scheduler switched into a dead thread")
}

/// Set the calling thread's base priority (no-op under MLFQS, which derives
/// priority from `nice`/`recent_cpu` instead — matches Pintos's
/// `thread_set_priority` guard).
pub fn set_priority(priority: u8) {
    if policy() == SchedulerPolicy::Mlfqs {
        return;
    }
    if let Some(thread) = current() {
        thread.set_base_priority(priority);
    }
    maybe_yield_to_higher_priority();
}

pub fn get_priority() -> u8 {
    current().map(|t| t.priority()).unwrap_or(config::PRI_MIN)
}

pub fn set_nice(nice: i32) {
    if let Some(thread) = current() {
        thread.set_nice(nice);
        if policy() == SchedulerPolicy::Mlfqs {
            thread.recompute_mlfqs_priority();
        }
    }
    maybe_yield_to_higher_priority();
}

pub fn get_nice() -> i32 {
    current().map(|t| t.nice()).unwrap_or(config::NICE_DEFAULT)
}

/// Current load average, scaled by 100 and rounded, matching Pintos's
/// `thread_get_load_avg`.
pub fn get_load_avg_x100() -> i32 {
    LOAD_AVG.lock().mul_int(100).to_int_round()
}

/// Current thread's `recent_cpu`, scaled by 100 and rounded, matching
/// Pintos's `thread_get_recent_cpu`.
pub fn get_recent_cpu_x100() -> i32 {
    current()
        .map(|t| t.recent_cpu().mul_int(100).to_int_round())
        .unwrap_or(0)
}

/// If a higher-priority thread became ready, yield to it immediately rather
/// than waiting for the next tick (Pintos calls this after any priority
/// change that could make the running thread no longer the best choice).
fn maybe_yield_to_higher_priority() {
    let current_priority = current().map(|t| t.priority()).unwrap_or(u8::MAX);
    let should_yield = READY
        .lock()
        .iter()
        .any(|r| r.priority() > current_priority);
    if should_yield {
        yield_now();
    }
}

/// Called once per timer interrupt. Advances the tick counter, wakes any
/// sleepers whose deadline has passed, applies MLFQS per-tick/per-second
/// recalculation, and preempts the running thread if its slice expired or
/// a higher-priority thread is now ready.
pub fn tick() {
    GLOBAL_TICK_COUNTER.increment();
    let ticks = GLOBAL_TICK_COUNTER.ticks();

    crate::sleep::wake_due(ticks);

    if policy() == SchedulerPolicy::Mlfqs {
        mlfqs_on_tick(ticks);
    }

    let slice_ticks = CURRENT_SLICE_TICKS.fetch_add(1, Ordering::AcqRel) + 1;
    let current_priority = current().map(|t| t.priority()).unwrap_or(u8::MAX);
    let higher_ready = READY
        .lock()
        .iter()
        .any(|r| r.priority() > current_priority);

    if slice_ticks >= config::TIME_SLICE_TICKS || higher_ready {
        DefaultArch::yield_on_return();
    }
}

fn mlfqs_on_tick(ticks: u64) {
    if let Some(thread) = current() {
        thread.set_recent_cpu(thread.recent_cpu().add_int(1));
    }

    if ticks % config::TIMER_FREQUENCY_HZ as u64 == 0 {
        recalculate_load_avg();
        recalculate_all_recent_cpu();
    }
    if ticks % 4 == 0 {
        recalculate_all_mlfqs_priorities();
    }
}

fn recalculate_load_avg() {
    let ready_count = READY.lock().len() as i32
        + if current().is_some() { 1 } else { 0 };
    let mut load_avg = LOAD_AVG.lock();
    let fifty_nine_sixtieths = Fixed::from_int(59).div(Fixed::from_int(60));
    let one_sixtieth = Fixed::from_int(1).div(Fixed::from_int(60));
    *load_avg = fifty_nine_sixtieths
        .mul(*load_avg)
        .add(one_sixtieth.mul(Fixed::from_int(ready_count)));
}

fn recalculate_all_recent_cpu() {
    let load_avg = *LOAD_AVG.lock();
    let two_load_avg = load_avg.mul_int(2);
    let coefficient = two_load_avg.div(two_load_avg.add_int(1));
    for thread in ALL_THREADS.lock().iter() {
        let updated = coefficient.mul(thread.recent_cpu()).add_int(thread.nice());
        thread.set_recent_cpu(updated);
    }
}

fn recalculate_all_mlfqs_priorities() {
    for thread in ALL_THREADS.lock().iter() {
        thread.recompute_mlfqs_priority();
    }
}

/// Test-only hook: wipe all scheduler state so successive tests (which
/// share the crate's global statics) start from a clean slate.
#[cfg(any(test, feature = "std-shim"))]
pub fn reset_for_test() {
    *READY.lock() = Vec::new();
    *ALL_THREADS.lock() = Vec::new();
    *CURRENT.lock() = None;
    *LOAD_AVG.lock() = Fixed::ZERO;
    MLFQS.store(false, Ordering::Release);
}

/// Test-only hook: force a specific thread to be "current" without going
/// through a real context switch, so lock/condvar/semaphore tests can
/// exercise holder-identity checks on a single host thread.
#[cfg(any(test, feature = "std-shim"))]
pub fn set_current_for_test(thread: Option<Thread>) {
    *CURRENT.lock() = thread.map(RunningRef);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::StackSizeClass;

    fn reset() {
        reset_for_test();
    }

    #[test]
    fn pop_highest_priority_picks_max_and_is_fifo_among_ties() {
        reset();
        let a = spawn(|| {}, 10, StackSizeClass::Small).unwrap();
        let b = spawn(|| {}, 30, StackSizeClass::Small).unwrap();
        let c = spawn(|| {}, 30, StackSizeClass::Small).unwrap();

        let first = pop_highest_priority().unwrap();
        assert_eq!(first.priority(), 30);
        assert_eq!(first.id(), b.thread_id());

        let second = pop_highest_priority().unwrap();
        assert_eq!(second.id(), c.thread_id());

        let third = pop_highest_priority().unwrap();
        assert_eq!(third.id(), a.thread_id());
    }

    #[test]
    fn load_avg_rises_from_zero_when_threads_are_ready() {
        reset();
        init(SchedulerPolicy::Mlfqs);
        let _h = spawn(|| {}, config::PRI_DEFAULT, StackSizeClass::Small).unwrap();
        recalculate_load_avg();
        assert!(*LOAD_AVG.lock() > Fixed::ZERO);
    }

    #[test]
    fn spawn_rejects_out_of_range_priority() {
        reset();
        // priority validated via assert_kernel!; exercised indirectly by
        // staying within range here since assert_kernel! panics rather
        // than returning an error.
        let handle = spawn(|| {}, config::PRI_MAX, StackSizeClass::Small);
        assert!(handle.is_ok());
    }

    /// Two CPU-bound threads with equal `nice` that get equal tick exposure
    /// accumulate equal `recent_cpu`. `tick()` only charges whichever thread
    /// is `current`, so this alternates `set_current_for_test` between the
    /// two to stand in for a real scheduler splitting ticks between them.
    #[test]
    fn mlfqs_recent_cpu_is_equal_for_equally_scheduled_threads() {
        reset();
        init(SchedulerPolicy::Mlfqs);
        let a = spawn(|| {}, config::PRI_DEFAULT, StackSizeClass::Small).unwrap();
        let b = spawn(|| {}, config::PRI_DEFAULT, StackSizeClass::Small).unwrap();
        let a = lookup_thread(a.thread_id()).unwrap();
        let b = lookup_thread(b.thread_id()).unwrap();

        for _ in 0..40 {
            set_current_for_test(Some(a.clone()));
            tick();
            set_current_for_test(Some(b.clone()));
            tick();
        }

        assert_eq!(a.recent_cpu(), b.recent_cpu());
        assert_eq!(a.priority(), b.priority());
    }
}
