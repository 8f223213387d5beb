//! Architecture abstraction layer for context switching and interrupt handling.
//!
//! This module provides a unified interface for architecture-specific operations
//! that need to be implemented for each supported CPU architecture. Everything
//! outside this trait — interrupt-vector stubs, descriptor-table setup, the
//! board bring-up that gets `DefaultArch` running in the first place — is an
//! external collaborator the rest of the crate never touches directly.

/// Whether interrupts were enabled at the point `Arch::disable` was called.
///
/// `disable`/`restore` must nest correctly: a thread that disables
/// interrupts twice and restores twice ends up exactly where it started.
/// Holding one of these across a context switch is a caller bug (interrupts
/// must already be disabled before switching).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptLevel(bool);

/// Architecture abstraction trait.
///
/// This trait must be implemented for each supported CPU architecture to provide
/// context switching, interrupt handling, and FPU management capabilities.
///
/// # Safety
///
/// Implementations of this trait involve direct hardware manipulation and
/// inline assembly. All methods marked as unsafe have specific preconditions
/// that must be upheld by the caller.
pub trait Arch {
    /// Architecture-specific saved context type.
    ///
    /// This type must contain all CPU registers and state needed to fully
    /// restore a thread's execution context.
    type SavedContext: Send + Sync + Default;

    /// Switch from one thread context to another.
    ///
    /// # Safety
    ///
    /// - `prev` must point to a valid, properly aligned SavedContext
    /// - `next` must point to a valid, properly aligned SavedContext
    /// - The caller must ensure the memory pointed to by both pointers remains
    ///   valid for the duration of this call
    /// - Must be called with interrupts disabled
    /// - The `next` context must represent a valid execution state
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Save floating point unit state to the given context.
    ///
    /// # Safety
    ///
    /// - `ctx` must point to a valid, properly aligned SavedContext
    /// - Must be called when the current thread owns the FPU
    /// - The context must have sufficient space for FPU state
    #[cfg(feature = "full-fpu")]
    unsafe fn save_fpu(ctx: &mut Self::SavedContext);

    /// Restore floating point unit state from the given context.
    ///
    /// # Safety
    ///
    /// - `ctx` must contain valid FPU state
    /// - Must be called before the thread uses FPU instructions
    /// - The current thread must be the owner of the FPU
    #[cfg(feature = "full-fpu")]
    unsafe fn restore_fpu(ctx: &Self::SavedContext);

    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupt delivery and report whether it was enabled before
    /// the call, so the caller can restore exactly that state later.
    fn disable_interrupts() -> InterruptLevel;

    /// Restore the interrupt level returned by a prior `disable_interrupts`.
    fn restore_interrupts(prior: InterruptLevel) {
        if prior.0 {
            Self::enable_interrupts();
        }
    }

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Whether the calling code is running inside an interrupt handler.
    ///
    /// Blocking primitives (semaphore/lock/condvar wait, `thread::exit`)
    /// must never be called from interrupt context; callers assert this at
    /// their own boundary.
    fn in_interrupt_context() -> bool;

    /// Request that the scheduler run before the current interrupt handler
    /// returns to user/kernel code, rather than switching immediately.
    ///
    /// The timer interrupt handler calls this instead of yielding directly,
    /// since a context switch cannot safely happen from inside the handler
    /// itself on this architecture.
    fn yield_on_return();
}

/// A no-op architecture implementation for testing and fallback purposes.
///
/// This implementation provides stub functionality and should not be used
/// in production code where real context switching is required.
pub struct NoOpArch;

impl Arch for NoOpArch {
    type SavedContext = ();

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {}

    #[cfg(feature = "full-fpu")]
    unsafe fn save_fpu(_ctx: &mut Self::SavedContext) {}

    #[cfg(feature = "full-fpu")]
    unsafe fn restore_fpu(_ctx: &Self::SavedContext) {}

    fn enable_interrupts() {}

    fn disable_interrupts() -> InterruptLevel {
        InterruptLevel(true)
    }

    fn interrupts_enabled() -> bool {
        true
    }

    fn in_interrupt_context() -> bool {
        false
    }

    fn yield_on_return() {}
}

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(not(target_arch = "aarch64"))]
#[path = "aarch64_stub.rs"]
pub mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::Aarch64Arch as DefaultArch;

// For testing/std-shim on non-aarch64 hosts
#[cfg(all(not(target_arch = "aarch64"), feature = "std-shim"))]
pub use NoOpArch as DefaultArch;

// Compile error for unsupported configurations
#[cfg(all(not(target_arch = "aarch64"), not(feature = "std-shim")))]
compile_error!("This library targets aarch64 kernels. Use --target aarch64-unknown-none or enable the std-shim feature for host testing.");
