//! AArch64 (ARM64) architecture implementation.
//!
//! Context switching, interrupt masking, and FPU/NEON save-restore for a
//! single ARM64 core. Vector table setup, GIC configuration, and the timer
//! interrupt handler itself live outside this crate's scope as external
//! collaborators; this module only provides the primitives the scheduler
//! calls through the `Arch` trait.

use super::{Arch, InterruptLevel};
use core::arch::asm;

/// AArch64 architecture implementation.
pub struct Aarch64Arch;

/// AArch64 saved context structure.
///
/// Contains all general-purpose registers, stack pointer, and NEON/FPU state
/// needed to save and restore thread execution state.
#[repr(C)]
#[derive(Debug)]
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
    pub neon_state: [u128; 32], // v0-v31 NEON registers
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
            pstate: 0x3c5, // Default PSTATE (EL0, interrupts enabled)
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

/// Type alias for compatibility with other modules.
pub type SavedContext = Aarch64Context;

impl Arch for Aarch64Arch {
    type SavedContext = Aarch64Context;

    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        // Use x16 (IP0) and x17 (IP1) as our base pointers.
        // These are the intra-procedure-call scratch registers, perfect for trampolines.
        unsafe {
            asm!(
                "mov x16, {prev}",
                "mov x17, {next}",

                "mov x15, sp",
                "str x15, [x16, #248]",
                "adr x15, 1f",
                "str x15, [x16, #256]",
                "mrs x15, nzcv",
                "str x15, [x16, #264]",

                "stp x0, x1, [x16, #0]",
                "stp x2, x3, [x16, #16]",
                "stp x4, x5, [x16, #32]",
                "stp x6, x7, [x16, #48]",
                "stp x8, x9, [x16, #64]",
                "stp x10, x11, [x16, #80]",
                "stp x12, x13, [x16, #96]",
                "stp x14, x15, [x16, #112]",
                "stp x16, x17, [x16, #128]",
                "stp x18, x19, [x16, #144]",
                "stp x20, x21, [x16, #160]",
                "stp x22, x23, [x16, #176]",
                "stp x24, x25, [x16, #192]",
                "stp x26, x27, [x16, #208]",
                "stp x28, x29, [x16, #224]",
                "str x30, [x16, #240]",

                "ldr x15, [x17, #248]",
                "mov sp, x15",
                "ldr x15, [x17, #264]",
                "msr nzcv, x15",
                "ldr x30, [x17, #256]",

                "ldp x0, x1, [x17, #0]",
                "ldp x2, x3, [x17, #16]",
                "ldp x4, x5, [x17, #32]",
                "ldp x6, x7, [x17, #48]",
                "ldp x8, x9, [x17, #64]",
                "ldp x10, x11, [x17, #80]",
                "ldp x12, x13, [x17, #96]",
                "ldp x14, x15, [x17, #112]",
                "ldp x18, x19, [x17, #144]",
                "ldp x20, x21, [x17, #160]",
                "ldp x22, x23, [x17, #176]",
                "ldp x24, x25, [x17, #192]",
                "ldp x26, x27, [x17, #208]",
                "ldp x28, x29, [x17, #224]",

                "ldr x16, [x17, #128]",
                "ldr x17, [x17, #136]",

                "ret",

                "1:",
                prev = in(reg) prev,
                next = in(reg) next,
                out("x15") _,
                out("x16") _,
                out("x17") _,
            );
        }
    }

    #[cfg(feature = "full-fpu")]
    unsafe fn save_fpu(ctx: &mut Self::SavedContext) {
        unsafe {
            asm!(
                "stp q0, q1, [{ctx}, #272]",
                "stp q2, q3, [{ctx}, #304]",
                "stp q4, q5, [{ctx}, #336]",
                "stp q6, q7, [{ctx}, #368]",
                "stp q8, q9, [{ctx}, #400]",
                "stp q10, q11, [{ctx}, #432]",
                "stp q12, q13, [{ctx}, #464]",
                "stp q14, q15, [{ctx}, #496]",
                "stp q16, q17, [{ctx}, #528]",
                "stp q18, q19, [{ctx}, #560]",
                "stp q20, q21, [{ctx}, #592]",
                "stp q22, q23, [{ctx}, #624]",
                "stp q24, q25, [{ctx}, #656]",
                "stp q26, q27, [{ctx}, #688]",
                "stp q28, q29, [{ctx}, #720]",
                "stp q30, q31, [{ctx}, #752]",

                "mrs x0, fpcr",
                "str w0, [{ctx}, #784]",
                "mrs x0, fpsr",
                "str w0, [{ctx}, #788]",
                ctx = in(reg) ctx,
                lateout("x0") _,
                options(nostack)
            );
        }
    }

    #[cfg(feature = "full-fpu")]
    unsafe fn restore_fpu(ctx: &Self::SavedContext) {
        unsafe {
            asm!(
                "ldr w0, [{ctx}, #784]",
                "msr fpcr, x0",
                "ldr w0, [{ctx}, #788]",
                "msr fpsr, x0",

                "ldp q0, q1, [{ctx}, #272]",
                "ldp q2, q3, [{ctx}, #304]",
                "ldp q4, q5, [{ctx}, #336]",
                "ldp q6, q7, [{ctx}, #368]",
                "ldp q8, q9, [{ctx}, #400]",
                "ldp q10, q11, [{ctx}, #432]",
                "ldp q12, q13, [{ctx}, #464]",
                "ldp q14, q15, [{ctx}, #496]",
                "ldp q16, q17, [{ctx}, #528]",
                "ldp q18, q19, [{ctx}, #560]",
                "ldp q20, q21, [{ctx}, #592]",
                "ldp q22, q23, [{ctx}, #624]",
                "ldp q24, q25, [{ctx}, #656]",
                "ldp q26, q27, [{ctx}, #688]",
                "ldp q28, q29, [{ctx}, #720]",
                "ldp q30, q31, [{ctx}, #752]",
                ctx = in(reg) ctx,
                lateout("x0") _,
                options(nostack)
            );
        }
    }

    fn enable_interrupts() {
        unsafe {
            asm!("msr daifclr, #2", options(nomem, nostack));
        }
    }

    fn disable_interrupts() -> InterruptLevel {
        let was_enabled = Self::interrupts_enabled();
        unsafe {
            asm!("msr daifset, #2", options(nomem, nostack));
        }
        InterruptLevel(was_enabled)
    }

    fn interrupts_enabled() -> bool {
        let daif: u64;
        unsafe {
            asm!(
                "mrs {daif}, daif",
                daif = out(reg) daif,
                options(nostack, readonly)
            );
        }
        (daif & 0x80) == 0 // IRQ bit (bit 7) is clear when interrupts enabled
    }

    fn in_interrupt_context() -> bool {
        // SPSel EL1h (handler mode) is set while servicing an exception;
        // thread-mode kernel code always runs on SP_EL0.
        let spsel: u64;
        unsafe {
            asm!(
                "mrs {spsel}, spsel",
                spsel = out(reg) spsel,
                options(nostack, readonly)
            );
        }
        (spsel & 1) != 0
    }

    fn yield_on_return() {
        PENDING_YIELD.store(true, portable_atomic::Ordering::Release);
    }
}

/// Set by `yield_on_return` from inside a handler; the IRQ epilogue
/// (outside this crate) checks and clears this before returning to thread
/// context, invoking the scheduler's tick-driven switch if set.
pub static PENDING_YIELD: portable_atomic::AtomicBool = portable_atomic::AtomicBool::new(false);

/// Clear and return whether a yield was requested since the last check.
pub fn take_pending_yield() -> bool {
    PENDING_YIELD.swap(false, portable_atomic::Ordering::AcqRel)
}

impl Aarch64Arch {
    /// Constant-time PSTATE field used when building a fresh thread's
    /// initial register frame: EL0, interrupts enabled.
    pub const INITIAL_PSTATE: u64 = 0x3c5;
}
