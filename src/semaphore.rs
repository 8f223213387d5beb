//! Counting semaphore.
//!
//! Grounded on the Pintos original's `threads/synch.c` (`sema_down`/
//! `sema_up`/`sema_try_down`): a non-negative counter plus a waiter list,
//! mutual exclusion provided by disabling interrupts rather than a nested
//! lock. The waiter list is kept as a plain `Vec` and scanned for the
//! highest-priority candidate on `up`, the same linear-scan style used for
//! the ready set's own bookkeeping, just applied to a handful of waiters
//! instead of the whole ready set.

use crate::arch::{Arch, DefaultArch};
use crate::sched;
use crate::thread::Thread;

extern crate alloc;
use alloc::vec::Vec;

pub struct Semaphore {
    value: spin::Mutex<u32>,
    waiters: spin::Mutex<Vec<Thread>>,
}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            value: spin::Mutex::new(value),
            waiters: spin::Mutex::new(Vec::new()),
        }
    }

    /// Decrement the semaphore, blocking while its value is zero.
    ///
    /// # Panics
    ///
    /// Panics if called from interrupt context or with no current thread.
    pub fn down(&self) {
        crate::assert_kernel!(
            !DefaultArch::in_interrupt_context(),
            "semaphore down called from interrupt context"
        );
        let prior = DefaultArch::disable_interrupts();
        loop {
            if *self.value.lock() > 0 {
                break;
            }
            let me = sched::current().expect("semaphore down with no current thread");
            self.waiters.lock().push(me);
            sched::block_current();
        }
        *self.value.lock() -= 1;
        DefaultArch::restore_interrupts(prior);
    }

    /// Decrement the semaphore only if its value is already positive.
    pub fn try_down(&self) -> bool {
        let prior = DefaultArch::disable_interrupts();
        let mut value = self.value.lock();
        let acquired = if *value > 0 {
            *value -= 1;
            true
        } else {
            false
        };
        drop(value);
        DefaultArch::restore_interrupts(prior);
        acquired
    }

    /// Increment the semaphore, waking the highest-priority waiter if one
    /// exists — matching `sema_up`'s "unblock before incrementing" order,
    /// which keeps a waiter that immediately re-blocks from seeing a value
    /// it never actually got to consume. Preempts the caller if the woken
    /// thread now outranks it; from interrupt context, that preemption is
    /// deferred to `yield_on_return` instead of yielding directly.
    pub fn up(&self) {
        let prior = DefaultArch::disable_interrupts();
        let woken = pop_highest_priority(&self.waiters);
        if let Some(woken) = &woken {
            sched::unblock(woken.clone());
        }
        *self.value.lock() += 1;
        DefaultArch::restore_interrupts(prior);

        if let Some(woken) = woken {
            if DefaultArch::in_interrupt_context() {
                DefaultArch::yield_on_return();
            } else {
                let current_priority = sched::current().map(|t| t.priority()).unwrap_or(u8::MAX);
                if woken.priority() > current_priority {
                    sched::yield_now();
                }
            }
        }
    }

    /// Current value, for diagnostics/tests only — not meaningful to act
    /// on without holding the interrupt-disable region that guards it.
    pub fn value(&self) -> u32 {
        *self.value.lock()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

fn pop_highest_priority(waiters: &spin::Mutex<Vec<Thread>>) -> Option<Thread> {
    let mut list = waiters.lock();
    if list.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_priority = list[0].priority();
    for (idx, candidate) in list.iter().enumerate().skip(1) {
        if candidate.priority() > best_priority {
            best_idx = idx;
            best_priority = candidate.priority();
        }
    }
    Some(list.remove(best_idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_down_respects_value() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn up_without_waiters_just_increments() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.value(), 0);
        sem.up();
        assert_eq!(sem.value(), 1);
        assert_eq!(sem.waiter_count(), 0);
    }

    #[test]
    fn down_then_up_by_a_single_thread_returns_value_to_its_original() {
        let sem = Semaphore::new(3);
        assert!(sem.try_down());
        sem.up();
        assert_eq!(sem.value(), 3);
    }
}
