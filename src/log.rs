//! Kernel console logging.
//!
//! UART peripheral bring-up is out of scope here, so logging is built around
//! a "macro over one `write_str`-shaped trait" habit generalized to a
//! `Console` trait, the same `Arch`-trait-over-hardware pattern used
//! elsewhere in this crate.

use core::fmt::Write;
use spin::Mutex;

/// A single-method sink for kernel log output. `get_char` doubles as the
/// external "console input" primitive a syscall bridge needs.
pub trait Console: Send {
    fn write_str(&mut self, s: &str);

    /// Non-blocking read of one input character, or `None` if none pending.
    fn get_char(&mut self) -> Option<u8> {
        None
    }

    /// Write a single output byte, for callers (the syscall bridge's
    /// `write` on fd 1) that have raw bytes rather than a `&str`.
    fn write_byte(&mut self, byte: u8) {
        let buf = [byte];
        let _ = self.write_str(core::str::from_utf8(&buf).unwrap_or("?"));
    }
}

/// Discards everything written to it. Default console until `set_console`
/// is called, matching the `NoOpArch` fallback pattern used for `Arch`.
pub struct NullConsole;

impl Console for NullConsole {
    fn write_str(&mut self, _s: &str) {}
}

/// `std`-backed console for host tests, gated behind the `std-shim` feature.
#[cfg(feature = "std-shim")]
pub struct StdConsole;

#[cfg(feature = "std-shim")]
impl Console for StdConsole {
    fn write_str(&mut self, s: &str) {
        extern crate std;
        std::print!("{}", s);
    }
}

static CONSOLE: Mutex<&'static mut dyn Console> = {
    static mut NULL: NullConsole = NullConsole;
    #[allow(static_mut_refs)]
    unsafe {
        Mutex::new(&mut NULL)
    }
};

/// Install the console used by `kprintln!`/`kdebug!`.
///
/// # Safety
///
/// `console` must outlive every future call to the logging macros.
pub unsafe fn set_console(console: &'static mut dyn Console) {
    *CONSOLE.lock() = console;
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    let mut guard = CONSOLE.lock();
    let _ = guard.write_fmt(args);
}

/// Non-blocking read of one input character from the installed console.
pub fn read_char() -> Option<u8> {
    CONSOLE.lock().get_char()
}

/// Write a single output byte to the installed console.
pub fn write_char(byte: u8) {
    CONSOLE.lock().write_byte(byte);
}

/// Print a line to the kernel console.
#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {{
        $crate::log::_print(format_args!($($arg)*));
        $crate::log::_print(format_args!("\n"));
    }};
}

/// Debug-only variant, compiled out in release builds.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        #[cfg(debug_assertions)]
        $crate::kprintln!($($arg)*);
    }};
}
