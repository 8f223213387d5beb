//! Mesa-style condition variable.
//!
//! Grounded on the Pintos original's `threads/synch.c` (`cond_wait`/
//! `cond_signal`/`cond_broadcast`), which implements a condition variable
//! as a list of private, single-use semaphores rather than one shared
//! semaphore — a waiter parks on its own semaphore so `signal` can wake
//! exactly one, specifically the highest-priority one, without waking
//! every waiter and making them race to re-check the predicate.

use crate::lock::Lock;
use crate::mem::ArcLite;
use crate::sched;
use crate::semaphore::Semaphore;
use crate::thread::Thread;

extern crate alloc;
use alloc::vec::Vec;

struct Waiter {
    thread: Thread,
    sem: ArcLite<Semaphore>,
}

pub struct Condvar {
    waiters: spin::Mutex<Vec<Waiter>>,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: spin::Mutex::new(Vec::new()),
        }
    }

    /// Atomically release `lock` and block until signaled, then reacquire
    /// `lock` before returning.
    ///
    /// Mesa semantics: the predicate this wait guards must be re-checked
    /// in a loop by the caller after `wait` returns, since another thread
    /// may run (and invalidate it) between `signal` and this thread
    /// actually resuming.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        crate::assert_kernel!(
            lock.is_held_by_current(),
            "cond_wait called without holding the associated lock"
        );

        let thread = sched::current().expect("cond_wait called with no current thread");
        let sem = ArcLite::new(Semaphore::new(0));
        self.waiters.lock().push(Waiter {
            thread,
            sem: sem.clone(),
        });

        lock.release().expect("cond_wait: releasing a lock we just confirmed we hold");
        sem.down();
        lock.acquire();
    }

    /// Wake the single highest-priority waiter, if any.
    ///
    /// Compares each waiter's *current* effective priority, not a priority
    /// snapshotted at `wait` time — a parked waiter may have received a
    /// donation since then, which must be able to change wake order.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        crate::assert_kernel!(
            lock.is_held_by_current(),
            "cond_signal called without holding the associated lock"
        );

        let mut waiters = self.waiters.lock();
        if waiters.is_empty() {
            return;
        }
        let mut best_idx = 0;
        let mut best_priority = waiters[0].thread.priority();
        for (idx, waiter) in waiters.iter().enumerate().skip(1) {
            let priority = waiter.thread.priority();
            if priority > best_priority {
                best_idx = idx;
                best_priority = priority;
            }
        }
        let waiter = waiters.remove(best_idx);
        drop(waiters);
        waiter.sem.up();
    }

    /// Wake every waiter.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        crate::assert_kernel!(
            lock.is_held_by_current(),
            "cond_broadcast called without holding the associated lock"
        );
        let drained: Vec<Waiter> = core::mem::take(&mut *self.waiters.lock());
        for waiter in drained {
            waiter.sem.up();
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::StackSizeClass;

    fn with_current_thread() {
        sched::reset_for_test();
        let handle = sched::spawn(|| {}, 20, StackSizeClass::Small).unwrap();
        let thread = sched::lookup_thread(handle.thread_id()).unwrap();
        sched::set_current_for_test(Some(thread));
    }

    #[test]
    fn signal_on_empty_condvar_is_a_no_op() {
        with_current_thread();
        let lock = Lock::new();
        assert!(lock.try_acquire());
        let cv = Condvar::new();
        cv.signal(&lock); // must not panic with no waiters
        assert_eq!(cv.waiter_count(), 0);
    }

    #[test]
    #[should_panic(expected = "without holding")]
    fn signal_without_holding_lock_panics() {
        sched::reset_for_test();
        let lock = Lock::new();
        let cv = Condvar::new();
        cv.signal(&lock);
    }

    /// Three waiters enqueued low-to-high priority wake highest-first,
    /// regardless of enqueue order. Built by pushing `Waiter`s directly
    /// rather than through `wait` (which would block on `Semaphore::down`
    /// with nothing in this host test ever around to call `up`).
    #[test]
    fn signal_wakes_waiters_in_descending_priority_order() {
        // The lock holder is spawned at a priority above every waiter below
        // so that spawning the waiters (which now preempts a lower-priority
        // caller) never knocks the holder out of `current`.
        sched::reset_for_test();
        let holder = sched::lookup_thread(sched::spawn(|| {}, 40, StackSizeClass::Small).unwrap().thread_id()).unwrap();
        sched::set_current_for_test(Some(holder));
        let lock = Lock::new();
        assert!(lock.try_acquire());
        let cv = Condvar::new();

        let low_thread = sched::lookup_thread(sched::spawn(|| {}, 31, StackSizeClass::Small).unwrap().thread_id()).unwrap();
        let mid_thread = sched::lookup_thread(sched::spawn(|| {}, 32, StackSizeClass::Small).unwrap().thread_id()).unwrap();
        let high_thread = sched::lookup_thread(sched::spawn(|| {}, 33, StackSizeClass::Small).unwrap().thread_id()).unwrap();

        let low = ArcLite::new(Semaphore::new(0));
        let mid = ArcLite::new(Semaphore::new(0));
        let high = ArcLite::new(Semaphore::new(0));
        cv.waiters.lock().push(Waiter { thread: low_thread, sem: low.clone() });
        cv.waiters.lock().push(Waiter { thread: mid_thread, sem: mid.clone() });
        cv.waiters.lock().push(Waiter { thread: high_thread, sem: high.clone() });

        cv.signal(&lock);
        assert_eq!(high.value(), 1);
        assert_eq!(mid.value(), 0);
        assert_eq!(low.value(), 0);

        cv.signal(&lock);
        assert_eq!(mid.value(), 1);

        cv.signal(&lock);
        assert_eq!(low.value(), 1);

        assert_eq!(cv.waiter_count(), 0);
    }
}
