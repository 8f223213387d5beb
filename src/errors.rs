//! Kernel-visible error kinds.
//!
//! Same `Display`/`From` shape as a userspace `ThreadError`, trimmed to the
//! four kinds a kernel core needs to report to a caller. Precondition
//! violations are never returned as an error value — call sites that would
//! construct one instead panic via `assert_kernel!` below, since kernel
//! assertions are unrecoverable.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for operations that can fail without being a kernel bug.
pub type KernelResult<T> = Result<T, KernelError>;

/// Error kinds the core can report to a caller (contract violations panic
/// instead; see `assert_kernel!`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A page (or other page-granular resource) could not be allocated.
    ResourceExhausted,
    /// User-mode fault: bad pointer, divide by zero, invalid syscall argument.
    /// Carries the status the offending thread should exit with.
    UserFault(i32),
    /// Requested object (child tid, file descriptor, path) does not exist.
    NotFound,
    /// Operation is not permitted on the given object in its current state.
    PermissionDenied,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ResourceExhausted => write!(f, "resource exhausted"),
            KernelError::UserFault(status) => write!(f, "user fault, exit status {}", status),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::PermissionDenied => write!(f, "permission denied"),
        }
    }
}

/// Panic with a message identifying a kernel contract violation.
///
/// For precondition violations: calling a blocking primitive from interrupt
/// context, releasing a lock not held, creating a thread with an
/// out-of-range priority. These are bugs in the caller, not runtime
/// conditions a caller can recover from.
#[macro_export]
macro_rules! assert_kernel {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            panic!($($arg)+);
        }
    };
}
