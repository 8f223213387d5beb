//! A mutual-exclusion lock with priority donation.
//!
//! Grounded on the Pintos original's `threads/synch.c` (`lock_acquire`/
//! `lock_release`/`lock_try_acquire`) and `threads/thread.c`'s
//! `donate_priority`/`remove_with_lock`/`refresh_priority`. Built on top of
//! `Semaphore` the same way Pintos builds `struct lock` on `struct
//! semaphore` with value 1, plus a `holder` pointer; the donor bookkeeping
//! Pintos keeps as an intrusive list on `struct thread` is kept here as a
//! plain `Vec<ThreadId>` scoped to the lock that caused the donation, so
//! `release` can undo exactly the donations it caused without needing
//! pointer identity on locks.

use crate::errors::{KernelError, KernelResult};
use crate::mem::ArcLite;
use crate::sched;
use crate::semaphore::Semaphore;
use crate::thread::ThreadId;

extern crate alloc;
use alloc::vec::Vec;

pub struct LockInner {
    holder: spin::Mutex<Option<crate::thread::Thread>>,
    donated_by: spin::Mutex<Vec<ThreadId>>,
    semaphore: Semaphore,
}

impl LockInner {
    pub fn holder_id(&self) -> Option<ThreadId> {
        self.holder.lock().as_ref().map(|t| t.id())
    }
}

pub struct Lock {
    inner: ArcLite<LockInner>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            inner: ArcLite::new(LockInner {
                holder: spin::Mutex::new(None),
                donated_by: spin::Mutex::new(Vec::new()),
                semaphore: Semaphore::new(1),
            }),
        }
    }

    pub fn holder_id(&self) -> Option<ThreadId> {
        self.inner.holder_id()
    }

    pub fn is_held_by_current(&self) -> bool {
        match (sched::current(), self.holder_id()) {
            (Some(current), Some(holder)) => current.id() == holder,
            _ => false,
        }
    }

    /// Acquire the lock, donating the caller's priority to the current
    /// holder (and transitively through whatever that holder is itself
    /// blocked on) while waiting.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this lock.
    pub fn acquire(&self) {
        let current = sched::current().expect("lock acquire with no current thread");
        crate::assert_kernel!(
            self.holder_id() != Some(current.id()),
            "lock already held by the current thread"
        );

        if let Some(holder_id) = self.holder_id() {
            if sched::donation_enabled() {
                current.set_wait_on_lock(Some(self.inner.clone()));
                self.inner.donated_by.lock().push(current.id());
                if let Some(holder) = sched::lookup_thread(holder_id) {
                    holder.receive_donation(current.id());
                }
            }
        }

        self.inner.semaphore.down();

        current.set_wait_on_lock(None);
        *self.inner.holder.lock() = Some(current);
    }

    /// Acquire the lock only if it is free, without blocking or donating.
    pub fn try_acquire(&self) -> bool {
        let acquired = self.inner.semaphore.try_down();
        if acquired {
            if let Some(current) = sched::current() {
                *self.inner.holder.lock() = Some(current);
            }
        }
        acquired
    }

    /// Release the lock, reversing every donation it caused and waking the
    /// highest-priority waiter.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold this lock.
    pub fn release(&self) -> KernelResult<()> {
        if !self.is_held_by_current() {
            return Err(KernelError::PermissionDenied);
        }

        let donors = core::mem::take(&mut *self.inner.donated_by.lock());
        let holder = self.inner.holder.lock().take();
        if let Some(holder_thread) = &holder {
            for donor_id in donors {
                holder_thread.remove_donor(donor_id);
            }
        }

        self.inner.semaphore.up();
        Ok(())
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Lock {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_without_a_current_thread_still_claims_the_semaphore() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
    }

    #[test]
    fn release_without_holding_is_rejected() {
        let lock = Lock::new();
        assert_eq!(lock.release(), Err(KernelError::PermissionDenied));
    }

    #[test]
    fn reacquire_after_release_succeeds_but_double_acquire_is_rejected() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        lock.release().unwrap();
        assert!(lock.try_acquire());
        lock.release().unwrap();
    }

    /// Drives the same donor-set bookkeeping `acquire`/`release` perform,
    /// without going through `Semaphore::down`'s blocking loop (there is no
    /// second thread in this host test to ever call `up`). Exercises a
    /// two-lock donation chain: L holds lock_a, M holds lock_b and wants
    /// lock_a, H wants lock_b.
    #[test]
    fn donation_propagates_through_a_chain_of_two_locks_and_fully_reverts() {
        use crate::mem::StackSizeClass;

        sched::reset_for_test();
        let l = sched::lookup_thread(sched::spawn(|| {}, 20, StackSizeClass::Small).unwrap().thread_id()).unwrap();
        let m = sched::lookup_thread(sched::spawn(|| {}, 30, StackSizeClass::Small).unwrap().thread_id()).unwrap();
        let h = sched::lookup_thread(sched::spawn(|| {}, 40, StackSizeClass::Small).unwrap().thread_id()).unwrap();

        let lock_a = Lock::new();
        let lock_b = Lock::new();

        sched::set_current_for_test(Some(l.clone()));
        assert!(lock_a.try_acquire());
        sched::set_current_for_test(Some(m.clone()));
        assert!(lock_b.try_acquire());

        // M waits on lock_a (held by L).
        m.set_wait_on_lock(Some(lock_a.inner.clone()));
        lock_a.inner.donated_by.lock().push(m.id());
        l.receive_donation(m.id());

        // H waits on lock_b (held by M); propagates through M to L.
        h.set_wait_on_lock(Some(lock_b.inner.clone()));
        lock_b.inner.donated_by.lock().push(h.id());
        m.receive_donation(h.id());

        assert_eq!(l.priority(), 40);
        assert_eq!(m.priority(), 40);
        assert_eq!(h.priority(), 40);

        // L releases lock_a: its one donation (from M) is undone.
        let donors = core::mem::take(&mut *lock_a.inner.donated_by.lock());
        for donor_id in donors {
            l.remove_donor(donor_id);
        }
        assert_eq!(l.priority(), 20);
    }
}
