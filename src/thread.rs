//! Thread control blocks.
//!
//! Same `ArcLite`-backed `Thread`/`ThreadInner` split, same `ReadyRef`/
//! `RunningRef` newtypes for which queue a thread may currently be found in,
//! as an earlier round-robin design this replaces. Extended with the fields
//! a donation-aware, MLFQS-capable scheduler needs that round-robin never
//! carried: effective priority, a donor set, `nice`/`recent_cpu`, and a
//! sleep deadline.

use crate::arch::Arch;
use crate::config;
use crate::fixed::Fixed;
use crate::lock::LockInner;
use crate::mem::{ArcLite, Stack};
use portable_atomic::{AtomicU64, AtomicU8, AtomicI32, Ordering};

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Written to the low end of each stack at creation time so a later
/// `check_stack_integrity` call can detect overflow into the guard region.
const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Allocate a fresh, never-reused thread id.
pub fn alloc_thread_id() -> ThreadId {
    ThreadId::new(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(core::num::NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    pub fn new(id: u64) -> Self {
        let id_usize = (id as usize).max(1);
        Self(unsafe { core::num::NonZeroUsize::new_unchecked(id_usize) })
    }

    /// # Safety
    ///
    /// The caller must ensure that `id` is non-zero and unique.
    pub unsafe fn new_unchecked(id: usize) -> Self {
        Self(unsafe { core::num::NonZeroUsize::new_unchecked(id) })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    pub fn as_u64(self) -> u64 {
        self.0.get() as u64
    }
}

/// Lifecycle state of a thread (Pintos has a fifth, `THREAD_DYING`,
/// collapsed here into `Dying` covering both "about to exit" and "exited,
/// awaiting reclamation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Dying = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ThreadState::Ready,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Dying,
        }
    }
}

pub struct Thread {
    inner: ArcLite<ThreadInner>,
}

/// Internal thread data shared between `Thread`, `ReadyRef`/`RunningRef`,
/// and anything (locks, the join table) that needs to reach into a thread
/// it doesn't own outright.
pub struct ThreadInner {
    pub id: ThreadId,
    state: AtomicU8,
    base_priority: AtomicU8,
    effective_priority: AtomicU8,
    nice: AtomicI32,
    recent_cpu: spin::Mutex<Fixed>,
    stack: Option<Stack>,
    context: spin::Mutex<<crate::arch::DefaultArch as Arch>::SavedContext>,
    name: spin::Mutex<Option<String>>,
    exit_status: spin::Mutex<Option<i32>>,
    /// Lock this thread is currently blocked trying to acquire, if any.
    wait_on_lock: spin::Mutex<Option<ArcLite<LockInner>>>,
    /// Threads that have donated priority to this one through a lock it holds.
    donors: spin::Mutex<Vec<ThreadId>>,
    /// Tick at which a sleeping thread should wake; 0 means not sleeping.
    sleep_until: AtomicU64,
}

impl Thread {
    /// Create a new thread with the given parameters.
    pub fn new(id: ThreadId, stack: Stack, entry_point: fn(), priority: u8) -> Self {
        let inner = ThreadInner {
            id,
            state: AtomicU8::new(ThreadState::Ready as u8),
            base_priority: AtomicU8::new(priority),
            effective_priority: AtomicU8::new(priority),
            nice: AtomicI32::new(config::NICE_DEFAULT),
            recent_cpu: spin::Mutex::new(Fixed::from_int(config::RECENT_CPU_DEFAULT)),
            stack: Some(stack),
            context: spin::Mutex::new(Default::default()),
            name: spin::Mutex::new(None),
            exit_status: spin::Mutex::new(None),
            wait_on_lock: spin::Mutex::new(None),
            donors: spin::Mutex::new(Vec::new()),
            sleep_until: AtomicU64::new(0),
        };

        let inner_arc = ArcLite::new(inner);
        let thread = Self { inner: inner_arc };

        if let Some(stack_bottom) = thread.stack_bottom() {
            let entry = entry_point as usize;
            thread.setup_initial_context(entry, stack_bottom as usize, 0);
        }
        if let Some(stack) = &thread.inner.stack {
            stack.install_canary(STACK_CANARY);
        }

        thread
    }

    /// Build a standalone thread at the given priority, backed by a fresh
    /// small stack from a throwaway pool. For tests that need a `Thread` to
    /// poke at (donation, priority, state) without going through `sched::spawn`.
    #[cfg(any(test, feature = "std-shim"))]
    pub fn new_test_thread(priority: u8) -> Self {
        let pool = crate::mem::StackPool::new();
        let stack = pool
            .allocate(crate::mem::StackSizeClass::Small)
            .expect("test stack pool exhausted");
        Self::new(alloc_thread_id(), stack, || {}, priority)
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, new_state: ThreadState) {
        self.inner.state.store(new_state as u8, Ordering::Release);
    }

    /// Priority a thread would hold absent any donation.
    pub fn base_priority(&self) -> u8 {
        self.inner.base_priority.load(Ordering::Acquire)
    }

    /// Priority actually used for scheduling decisions: `max(base, donors)`.
    pub fn priority(&self) -> u8 {
        self.inner.effective_priority.load(Ordering::Acquire)
    }

    /// Set the thread's base priority and recompute its effective priority.
    ///
    /// Lowering a thread's own priority below what it has been donated does
    /// not take effect until the donation is released, matching Pintos's
    /// `thread_set_priority`.
    pub fn set_base_priority(&self, new_priority: u8) {
        self.inner.base_priority.store(new_priority, Ordering::Release);
        self.recompute_effective_priority();
    }

    /// Recompute `effective_priority` from `base_priority` and the current
    /// donor set, propagating the result through the chain of locks a
    /// blocked thread may itself be waiting on.
    pub fn recompute_effective_priority(&self) {
        let effective = self.highest_donor_priority();
        self.inner.effective_priority.store(effective, Ordering::Release);
    }

    fn highest_donor_priority(&self) -> u8 {
        // Donor ids only record *who* donated; the actual priority used is
        // that donor's own effective priority at propagation time, so we
        // look each one up through the global thread table.
        let donors = self.inner.donors.lock();
        let mut max = self.base_priority();
        for &id in donors.iter() {
            if let Some(donor) = crate::sched::lookup_thread(id) {
                max = max.max(donor.priority());
            }
        }
        max
    }

    /// Record that `donor` is donating its priority to this thread, then
    /// recompute and propagate through any lock this thread is itself
    /// blocked on (bounded by `config::DONATION_CHAIN_DEPTH`).
    pub fn receive_donation(&self, donor: ThreadId) {
        {
            let mut donors = self.inner.donors.lock();
            if !donors.contains(&donor) {
                donors.push(donor);
            }
        }
        self.propagate_donation(config::DONATION_CHAIN_DEPTH);
    }

    /// Remove a donor (its lock was released) and recompute.
    pub fn remove_donor(&self, donor: ThreadId) {
        {
            let mut donors = self.inner.donors.lock();
            donors.retain(|&id| id != donor);
        }
        self.propagate_donation(config::DONATION_CHAIN_DEPTH);
    }

    fn propagate_donation(&self, depth_remaining: usize) {
        self.recompute_effective_priority();
        if depth_remaining == 0 {
            return;
        }
        let next = self.inner.wait_on_lock.lock().clone();
        if let Some(lock) = next {
            if let Some(holder_id) = lock.holder_id() {
                if let Some(holder) = crate::sched::lookup_thread(holder_id) {
                    holder.propagate_donation(depth_remaining - 1);
                }
            }
        }
    }

    pub fn set_wait_on_lock(&self, lock: Option<ArcLite<LockInner>>) {
        *self.inner.wait_on_lock.lock() = lock;
    }

    pub fn nice(&self) -> i32 {
        self.inner.nice.load(Ordering::Acquire)
    }

    pub fn set_nice(&self, nice: i32) {
        self.inner
            .nice
            .store(nice.clamp(config::NICE_MIN, config::NICE_MAX), Ordering::Release);
    }

    pub fn recent_cpu(&self) -> Fixed {
        *self.inner.recent_cpu.lock()
    }

    pub fn set_recent_cpu(&self, value: Fixed) {
        *self.inner.recent_cpu.lock() = value;
    }

    /// Derive the MLFQS priority from `recent_cpu`/`nice`, matching Pintos's
    /// `mlfqs_priority`: `PRI_MAX - recent_cpu/4 - nice*2`.
    pub fn recompute_mlfqs_priority(&self) {
        let rec_by_4 = self.recent_cpu().div_int(4);
        let fp_priority = Fixed::from_int(config::PRI_MAX as i32)
            .sub(rec_by_4)
            .sub_int(self.nice() * 2);
        let computed = fp_priority.to_int_round();
        let clamped = computed.clamp(config::PRI_MIN as i32, config::PRI_MAX as i32) as u8;
        self.inner.base_priority.store(clamped, Ordering::Release);
        self.inner.effective_priority.store(clamped, Ordering::Release);
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state(), ThreadState::Ready | ThreadState::Running)
    }

    pub fn context_ptr(&self) -> *mut <crate::arch::DefaultArch as Arch>::SavedContext {
        let ctx_guard = self.inner.context.lock();
        let ptr = &*ctx_guard as *const _ as *mut _;
        drop(ctx_guard);
        ptr
    }

    /// Set up the initial context for a new thread so that when
    /// context-switched to, it begins executing at `entry_point`.
    #[allow(unused_variables, unused_mut)]
    pub fn setup_initial_context(&self, entry_point: usize, stack_top: usize, arg: usize) {
        let mut ctx_guard = self.inner.context.lock();

        #[cfg(target_arch = "aarch64")]
        {
            ctx_guard.x = [0; 31];
            ctx_guard.x[0] = arg as u64;
            ctx_guard.sp = stack_top as u64;
            ctx_guard.pc = entry_point as u64;
            ctx_guard.pstate = crate::arch::aarch64::Aarch64Arch::INITIAL_PSTATE;

            #[cfg(feature = "full-fpu")]
            {
                ctx_guard.neon_state = [0; 32];
                ctx_guard.fpcr = 0;
                ctx_guard.fpsr = 0;
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            let _ = (entry_point, stack_top, arg);
        }
    }

    pub fn stack_bottom(&self) -> Option<*mut u8> {
        self.inner.stack.as_ref().map(|stack| stack.stack_bottom())
    }

    pub fn check_stack_integrity(&self) -> bool {
        match &self.inner.stack {
            Some(stack) => stack.check_canary(STACK_CANARY),
            None => false,
        }
    }

    pub fn set_name(&self, name: String) {
        *self.inner.name.lock() = Some(name);
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().clone()
    }

    pub fn sleep_until(&self) -> u64 {
        self.inner.sleep_until.load(Ordering::Acquire)
    }

    pub fn set_sleep_until(&self, tick: u64) {
        self.inner.sleep_until.store(tick, Ordering::Release);
    }

    pub fn exit_status(&self) -> Option<i32> {
        *self.inner.exit_status.lock()
    }

    pub fn set_exit_status(&self, status: i32) {
        *self.inner.exit_status.lock() = Some(status);
    }
}

impl Clone for Thread {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

unsafe impl Send for ThreadInner {}
unsafe impl Sync for ThreadInner {}

/// A reference to a thread sitting in the scheduler's ready set.
#[derive(Clone)]
pub struct ReadyRef(pub Thread);

/// A reference to the thread currently executing.
#[derive(Clone)]
pub struct RunningRef(pub Thread);

impl ReadyRef {
    pub fn start_running(self) -> RunningRef {
        self.0.set_state(ThreadState::Running);
        RunningRef(self.0)
    }

    pub fn priority(&self) -> u8 {
        self.0.priority()
    }

    pub fn id(&self) -> ThreadId {
        self.0.id()
    }
}

impl RunningRef {
    pub fn stop_running(self) -> ReadyRef {
        self.0.set_state(ThreadState::Ready);
        ReadyRef(self.0)
    }

    pub fn block(self) {
        self.0.set_state(ThreadState::Blocked);
    }

    pub fn finish(self, status: i32) {
        self.0.set_exit_status(status);
        self.0.set_state(ThreadState::Dying);
    }

    pub fn priority(&self) -> u8 {
        self.0.priority()
    }

    pub fn id(&self) -> ThreadId {
        self.0.id()
    }
}

/// A handle allowing one thread to wait for another's exit status.
///
/// Joins by busy-waiting via `yield_now` until the target thread reaches
/// `Dying`, extended to carry the exit status a `wait` syscall needs rather
/// than a bare `Result<(), ()>`.
pub struct JoinHandle {
    thread: Thread,
}

impl JoinHandle {
    pub fn new(thread: Thread) -> Self {
        Self { thread }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    pub fn is_alive(&self) -> bool {
        self.thread.state() != ThreadState::Dying
    }

    /// Block (cooperatively) until the thread has exited, returning its
    /// exit status.
    pub fn join(self) -> i32 {
        while self.thread.state() != ThreadState::Dying {
            crate::sched::yield_now();
        }
        self.thread.exit_status().unwrap_or(-1)
    }

    pub fn try_join(&self) -> Option<i32> {
        if self.thread.state() == ThreadState::Dying {
            Some(self.thread.exit_status().unwrap_or(-1))
        } else {
            None
        }
    }
}

unsafe impl Send for JoinHandle {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{StackPool, StackSizeClass};

    fn make_thread(priority: u8) -> Thread {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let id = alloc_thread_id();
        Thread::new(id, stack, || {}, priority)
    }

    #[test]
    fn new_thread_is_ready_at_requested_priority() {
        let thread = make_thread(config::PRI_DEFAULT);
        assert_eq!(thread.state(), ThreadState::Ready);
        assert_eq!(thread.priority(), config::PRI_DEFAULT);
        assert!(thread.is_runnable());
    }

    #[test]
    fn state_transitions() {
        let thread = make_thread(10);
        thread.set_state(ThreadState::Running);
        assert_eq!(thread.state(), ThreadState::Running);
        thread.set_state(ThreadState::Blocked);
        assert!(!thread.is_runnable());
        thread.set_state(ThreadState::Dying);
        assert!(!thread.is_runnable());
    }

    #[test]
    fn set_base_priority_updates_effective_priority_absent_donors() {
        let thread = make_thread(10);
        thread.set_base_priority(20);
        assert_eq!(thread.priority(), 20);
        assert_eq!(thread.base_priority(), 20);
    }

    #[test]
    fn effective_priority_is_max_of_base_and_donors_and_fully_reverts() {
        crate::sched::reset_for_test();
        let holder = crate::sched::lookup_thread(
            crate::sched::spawn(|| {}, 20, StackSizeClass::Small).unwrap().thread_id(),
        )
        .unwrap();
        let donor_a = crate::sched::lookup_thread(
            crate::sched::spawn(|| {}, 30, StackSizeClass::Small).unwrap().thread_id(),
        )
        .unwrap();
        let donor_b = crate::sched::lookup_thread(
            crate::sched::spawn(|| {}, 25, StackSizeClass::Small).unwrap().thread_id(),
        )
        .unwrap();

        assert_eq!(holder.priority(), 20);

        holder.receive_donation(donor_a.id());
        assert_eq!(holder.priority(), 30);

        holder.receive_donation(donor_b.id());
        assert_eq!(holder.priority(), 30); // still below donor_a's 30

        holder.remove_donor(donor_a.id());
        assert_eq!(holder.priority(), 25); // falls back to donor_b

        holder.remove_donor(donor_b.id());
        assert_eq!(holder.priority(), 20); // fully reverted to base
    }

    #[test]
    fn mlfqs_priority_decreases_with_recent_cpu_and_nice() {
        let thread = make_thread(config::PRI_DEFAULT);
        thread.set_nice(0);
        thread.set_recent_cpu(Fixed::ZERO);
        thread.recompute_mlfqs_priority();
        let baseline = thread.priority();

        thread.set_recent_cpu(Fixed::from_int(40));
        thread.recompute_mlfqs_priority();
        assert!(thread.priority() < baseline);
    }
}
