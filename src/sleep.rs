//! Timed sleep.
//!
//! Grounded on the Pintos original's `timer_sleep`/`thread_tick`, which
//! busy-polls in the unmodified kernel but is commonly reworked into a
//! wake-list the timer interrupt drains each tick. The sleep set here is a
//! plain `Vec`, matching the ready set's "good enough at this scale"
//! linear-scan style rather than reaching for a binary heap.

use crate::sched;
use crate::thread::Thread;
use crate::time::tick::GLOBAL_TICK_COUNTER;

extern crate alloc;
use alloc::vec::Vec;

struct Sleeper {
    thread: Thread,
    wake_at: u64,
}

static SLEEPERS: spin::Mutex<Vec<Sleeper>> = spin::Mutex::new(Vec::new());

/// Block the calling thread until at least `ticks` timer ticks have
/// elapsed. A request for zero ticks returns immediately without blocking.
pub fn sleep(ticks: u64) {
    if ticks == 0 {
        return;
    }
    let current = sched::current().expect("sleep called with no current thread");
    let wake_at = GLOBAL_TICK_COUNTER.ticks() + ticks;
    current.set_sleep_until(wake_at);
    SLEEPERS.lock().push(Sleeper {
        thread: current,
        wake_at,
    });
    sched::block_current();
}

/// Called once per timer tick: wake every sleeper whose deadline has
/// passed. Threads with the same deadline wake in the order they went to
/// sleep (stable relative to `Vec::retain`'s scan order).
pub fn wake_due(now_ticks: u64) {
    let mut sleepers = SLEEPERS.lock();
    let mut i = 0;
    while i < sleepers.len() {
        if sleepers[i].wake_at <= now_ticks {
            let sleeper = sleepers.remove(i);
            sleeper.thread.set_sleep_until(0);
            sched::unblock(sleeper.thread);
        } else {
            i += 1;
        }
    }
}

/// Earliest wake deadline among all sleepers, if any are pending. Exposed
/// so a power-aware timer driver (outside this crate's scope) could choose
/// how long it's safe to stay in a low-power tickless mode.
pub fn earliest_deadline() -> Option<u64> {
    SLEEPERS.lock().iter().map(|s| s.wake_at).min()
}

pub fn sleeper_count() -> usize {
    SLEEPERS.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::StackSizeClass;

    fn reset() {
        sched::reset_for_test();
        *SLEEPERS.lock() = Vec::new();
    }

    #[test]
    fn sleeping_zero_ticks_does_not_register_a_sleeper() {
        reset();
        let handle = sched::spawn(|| {}, 10, StackSizeClass::Small).unwrap();
        let thread = sched::lookup_thread(handle.thread_id()).unwrap();
        sched::set_current_for_test(Some(thread));
        sleep(0);
        assert_eq!(sleeper_count(), 0);
    }

    #[test]
    fn wake_due_only_wakes_expired_sleepers() {
        reset();
        let a = sched::spawn(|| {}, 10, StackSizeClass::Small).unwrap();
        let b = sched::spawn(|| {}, 10, StackSizeClass::Small).unwrap();
        let thread_a = sched::lookup_thread(a.thread_id()).unwrap();
        let thread_b = sched::lookup_thread(b.thread_id()).unwrap();

        thread_a.set_state(crate::thread::ThreadState::Blocked);
        thread_b.set_state(crate::thread::ThreadState::Blocked);
        SLEEPERS.lock().push(Sleeper { thread: thread_a.clone(), wake_at: 5 });
        SLEEPERS.lock().push(Sleeper { thread: thread_b.clone(), wake_at: 10 });

        wake_due(5);
        assert_eq!(sleeper_count(), 1);
        assert_eq!(thread_a.state(), crate::thread::ThreadState::Ready);
        assert_eq!(thread_b.state(), crate::thread::ThreadState::Blocked);

        wake_due(10);
        assert_eq!(sleeper_count(), 0);
        assert_eq!(thread_b.state(), crate::thread::ThreadState::Ready);
    }

    #[test]
    fn earliest_deadline_reports_minimum() {
        reset();
        let a = sched::spawn(|| {}, 10, StackSizeClass::Small).unwrap();
        let thread_a = sched::lookup_thread(a.thread_id()).unwrap();
        thread_a.set_state(crate::thread::ThreadState::Blocked);
        SLEEPERS.lock().push(Sleeper { thread: thread_a, wake_at: 42 });
        assert_eq!(earliest_deadline(), Some(42));
    }
}
