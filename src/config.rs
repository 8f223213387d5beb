//! Boot-time constants and the scheduler policy switch.
//!
//! Collects the numbers that form a fixed external contract (priority range,
//! time slice, donation depth, timer frequency) in one place, rather than
//! scattering them across the modules that consume them, since callers
//! depend on these as a named interface rather than incidental tuning.

/// Lowest priority a thread may hold.
pub const PRI_MIN: u8 = 0;
/// Priority assigned to newly created threads unless overridden.
pub const PRI_DEFAULT: u8 = 31;
/// Highest priority a thread may hold.
pub const PRI_MAX: u8 = 63;

/// Consecutive ticks a thread may run before forced preemption.
pub const TIME_SLICE_TICKS: u64 = 4;

/// Maximum depth walked when propagating priority donation along a chain
/// of held locks. Bounds the cost of a donation walk and breaks cycles a
/// buggy caller might construct.
pub const DONATION_CHAIN_DEPTH: usize = 8;

/// Nominal timer interrupt frequency in Hz.
pub const TIMER_FREQUENCY_HZ: u32 = 100;

/// Default `nice` value for new threads under the MLFQS policy.
pub const NICE_DEFAULT: i32 = 0;
/// Default `recent_cpu` value for new threads under the MLFQS policy.
pub const RECENT_CPU_DEFAULT: i32 = 0;
/// Lowest `nice` value a thread may request.
pub const NICE_MIN: i32 = -20;
/// Highest `nice` value a thread may request.
pub const NICE_MAX: i32 = 20;

/// Which scheduling policy governs priority: fixed-priority with donation,
/// or the multi-level feedback queue (MLFQS) driven by `recent_cpu`/`nice`.
///
/// Selected once at boot (`-o mlfqs` in Pintos) and never changed after
/// `sched::init` runs — matching Pintos, which reads this from the kernel
/// command line before any thread exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// Priority scheduling with donation through held locks.
    PriorityDonation,
    /// Multi-level feedback queue scheduling; donation is disabled.
    Mlfqs,
}

impl SchedulerPolicy {
    pub fn donation_enabled(self) -> bool {
        matches!(self, SchedulerPolicy::PriorityDonation)
    }
}
