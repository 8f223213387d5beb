//! Stub implementation of AArch64 context switching for non-ARM64 targets.
//!
//! This module provides type-compatible stubs for testing on non-ARM64 hosts
//! (e.g., x86_64 macOS/Linux). No actual context switching occurs.

use super::{Arch, InterruptLevel};
use portable_atomic::{AtomicBool, Ordering};

/// Saved thread context for AArch64 (stub version).
#[repr(C)]
pub struct Aarch64Context {
    /// General-purpose registers x0-x30
    pub x: [u64; 31],
    /// Stack pointer
    pub sp: u64,
    /// Program counter
    pub pc: u64,
    /// Processor state register
    pub pstate: u64,

    /// NEON/FPU state (when full-fpu feature is enabled)
    #[cfg(feature = "full-fpu")]
    pub neon_state: [u128; 32],
    #[cfg(feature = "full-fpu")]
    pub fpcr: u32,
    #[cfg(feature = "full-fpu")]
    pub fpsr: u32,
}

impl Default for Aarch64Context {
    fn default() -> Self {
        Self {
            x: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0x3c5,
            #[cfg(feature = "full-fpu")]
            neon_state: [0; 32],
            #[cfg(feature = "full-fpu")]
            fpcr: 0,
            #[cfg(feature = "full-fpu")]
            fpsr: 0,
        }
    }
}

unsafe impl Send for Aarch64Context {}
unsafe impl Sync for Aarch64Context {}

/// Stub alias for SavedContext compatibility.
pub type SavedContext = Aarch64Context;

/// AArch64 architecture implementation (stub for testing).
pub struct Aarch64Arch;

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

impl Arch for Aarch64Arch {
    type SavedContext = Aarch64Context;

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {
        // Stub - no actual context switch on non-ARM64
    }

    #[cfg(feature = "full-fpu")]
    unsafe fn save_fpu(_ctx: &mut Self::SavedContext) {}

    #[cfg(feature = "full-fpu")]
    unsafe fn restore_fpu(_ctx: &Self::SavedContext) {}

    fn enable_interrupts() {
        INTERRUPTS_ENABLED.store(true, Ordering::Release);
    }

    fn disable_interrupts() -> InterruptLevel {
        let prior = INTERRUPTS_ENABLED.swap(false, Ordering::AcqRel);
        InterruptLevel(prior)
    }

    fn interrupts_enabled() -> bool {
        INTERRUPTS_ENABLED.load(Ordering::Acquire)
    }

    fn in_interrupt_context() -> bool {
        false
    }

    fn yield_on_return() {}
}
