//! System-call dispatch bridge.
//!
//! Grounded on `userprog/syscall.c`'s `syscall_handler` dispatch `switch` and
//! `process.c`'s `process_execute`/`process_wait`/`start_process` for the
//! four calls that intersect thread lifecycle (`exit`/`fork`/`exec`/`wait`).
//! The loader and a real filesystem are out of scope, so `CREATE`/`REMOVE`/
//! `OPEN` are dispatched to a pluggable `FileSystem` collaborator instead of
//! a concrete disk-backed one — the numbered surface still exists and is
//! testable against an in-memory implementation.

use crate::mem::ArcLite;
use crate::sched;
use crate::semaphore::Semaphore;
use crate::thread::{ThreadId, ThreadState};

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use portable_atomic::{AtomicBool, Ordering};

/// Numeric syscall ids, in the fixed layout a trap frame decodes them from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SyscallNumber {
    Halt = 0,
    Exit = 1,
    Fork = 2,
    Exec = 3,
    Wait = 4,
    Create = 5,
    Remove = 6,
    Open = 7,
    Filesize = 8,
    Read = 9,
    Write = 10,
    Seek = 11,
    Tell = 12,
    Close = 13,
}

/// Returned to a parent whose `fork` failed (duplication error, or the
/// child table was exhausted) — matches Pintos's `TID_ERROR`.
pub const TID_ERROR: i32 = -1;

const STDIN_FD: i32 = 0;
const STDOUT_FD: i32 = 1;

/// A single open file. An external embedder supplies these through
/// `FileSystem::open`; this crate only multiplexes file descriptors over
/// them.
pub trait FileBackend: Send {
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, buf: &[u8]) -> usize;
    fn seek(&mut self, position: u64);
    fn tell(&self) -> u64;
    fn length(&self) -> u64;
}

/// External collaborator providing the filesystem `CREATE`/`REMOVE`/`OPEN`
/// dispatch to. Left abstract since a concrete disk/block-device layer is
/// out of scope for this crate.
pub trait FileSystem: Send + Sync {
    fn create(&self, name: &str, initial_size: u64) -> bool;
    fn remove(&self, name: &str) -> bool;
    fn open(&self, name: &str) -> Option<Box<dyn FileBackend>>;
}

/// Default filesystem: every operation fails. Installed until `set_filesystem`
/// is called, matching the `NullConsole`/`NoOpArch` "inert until configured"
/// pattern used elsewhere in this crate.
pub struct NullFileSystem;

impl FileSystem for NullFileSystem {
    fn create(&self, _name: &str, _initial_size: u64) -> bool {
        false
    }
    fn remove(&self, _name: &str) -> bool {
        false
    }
    fn open(&self, _name: &str) -> Option<Box<dyn FileBackend>> {
        None
    }
}

static FILESYSTEM: spin::Mutex<&'static dyn FileSystem> = spin::Mutex::new(&NullFileSystem);

/// Install the filesystem backing `CREATE`/`REMOVE`/`OPEN`.
///
/// # Safety
///
/// `fs` must outlive every future syscall dispatch.
pub unsafe fn set_filesystem(fs: &'static dyn FileSystem) {
    *FILESYSTEM.lock() = fs;
}

/// Per-thread file descriptor table. fd 0/1 are reserved for the console;
/// `open` hands out the lowest free fd at or above 2, matching Pintos's
/// `file_descriptor` handling in `process.c`.
struct FileTable {
    slots: Vec<Option<Box<dyn FileBackend>>>,
}

impl FileTable {
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn insert(&mut self, backend: Box<dyn FileBackend>) -> i32 {
        for (idx, existing) in self.slots.iter_mut().enumerate() {
            if existing.is_none() {
                *existing = Some(backend);
                return (idx + 2) as i32;
            }
        }
        self.slots.push(Some(backend));
        (self.slots.len() + 1) as i32
    }

    fn get_mut(&mut self, fd: i32) -> Option<&mut Box<dyn FileBackend>> {
        if fd < 2 {
            return None;
        }
        self.slots.get_mut((fd - 2) as usize).and_then(|s| s.as_mut())
    }

    fn take(&mut self, fd: i32) {
        if fd < 2 {
            return;
        }
        if let Some(slot) = self.slots.get_mut((fd - 2) as usize) {
            *slot = None;
        }
    }
}

static FILE_TABLES: spin::Mutex<Vec<(ThreadId, FileTable)>> = spin::Mutex::new(Vec::new());

fn with_file_table<R>(thread: ThreadId, f: impl FnOnce(&mut FileTable) -> R) -> R {
    let mut tables = FILE_TABLES.lock();
    if let Some((_, table)) = tables.iter_mut().find(|(id, _)| *id == thread) {
        return f(table);
    }
    tables.push((thread, FileTable::new()));
    let (_, table) = tables.last_mut().expect("just pushed");
    f(table)
}

/// Drop a thread's open files. Callers should invoke this once a thread has
/// reached `Dying`, mirroring Pintos's `process_exit` closing every fd the
/// process still held.
pub fn close_all(thread: ThreadId) {
    FILE_TABLES.lock().retain(|(id, _)| *id != thread);
}

struct ForkChannel {
    sem: Semaphore,
    success: AtomicBool,
}

static FORK_CHANNELS: spin::Mutex<Vec<(ThreadId, ArcLite<ForkChannel>)>> =
    spin::Mutex::new(Vec::new());

/// Child/parent relationships established by `fork`, consumed once by `wait`
/// so a second `wait` on the same child returns -1, matching
/// `process_wait`'s "not a direct child, or already waited on" rule.
static CHILDREN: spin::Mutex<Vec<(ThreadId, ThreadId)>> = spin::Mutex::new(Vec::new());

/// Create a child thread running `entry`, blocking the caller until the
/// child reports (via `fork_child_signal_ready`) that duplicating whatever
/// per-process state it needs has succeeded or failed.
///
/// Grounded on `process_execute` spawning `start_process`, which calls
/// `sema_up` on the parent's per-fork semaphore once setup completes; since
/// this crate has no address space to duplicate, the child's `entry` is
/// responsible for calling `fork_child_signal_ready` itself once whatever it
/// considers "setup" has finished.
pub fn fork(entry: fn(), priority: u8) -> i32 {
    let parent = match sched::current() {
        Some(t) => t.id(),
        None => return TID_ERROR,
    };

    let channel = ArcLite::new(ForkChannel {
        sem: Semaphore::new(0),
        success: AtomicBool::new(false),
    });

    let handle = match sched::spawn(entry, priority, crate::mem::StackSizeClass::Small) {
        Ok(h) => h,
        Err(_) => return TID_ERROR,
    };
    let child = handle.thread_id();

    FORK_CHANNELS.lock().push((child, channel.clone()));
    channel.sem.down();
    let ok = channel.success.load(Ordering::Acquire);
    FORK_CHANNELS.lock().retain(|(id, _)| *id != child);

    if ok {
        CHILDREN.lock().push((parent, child));
        child.as_u64() as i32
    } else {
        TID_ERROR
    }
}

/// Called by a freshly forked child once it has finished whatever setup
/// corresponds to duplicating the parent's file descriptors and address
/// space, waking the parent blocked in `fork`.
pub fn fork_child_signal_ready(success: bool) {
    let Some(current) = sched::current() else { return };
    let channels = FORK_CHANNELS.lock();
    if let Some((_, channel)) = channels.iter().find(|(id, _)| *id == current.id()) {
        channel.success.store(success, Ordering::Release);
        channel.sem.up();
    }
}

/// Replace the current thread's program image with the one at `path`. The
/// loader proper is out of scope for this crate, so this always reports
/// failure and terminates the caller with status -1.
pub fn exec(_path: &str) -> ! {
    exit(-1)
}

/// Block until the child identified by `tid` exits, returning its recorded
/// status. Returns -1 if `tid` does not name a live child of the caller, or
/// the same child has already been waited on.
pub fn wait(tid: ThreadId) -> i32 {
    let Some(current) = sched::current() else { return -1 };

    let is_child = {
        let mut children = CHILDREN.lock();
        if let Some(pos) = children
            .iter()
            .position(|(parent, child)| *parent == current.id() && *child == tid)
        {
            children.remove(pos);
            true
        } else {
            false
        }
    };
    if !is_child {
        return -1;
    }

    let Some(child) = sched::lookup_thread(tid) else { return -1 };
    while child.state() != ThreadState::Dying {
        sched::yield_now();
    }
    child.exit_status().unwrap_or(-1)
}

/// Terminate the calling thread with `status`, releasing its open files
/// first. Never returns.
pub fn exit(status: i32) -> ! {
    if let Some(current) = sched::current() {
        close_all(current.id());
    }
    sched::exit_current(status)
}

/// Power off. No hardware backing in this crate; left as a no-op hook an
/// embedder's `Arch` implementation can override by never returning from
/// its own halt routine.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn create(name: &str, initial_size: u64) -> bool {
    FILESYSTEM.lock().create(name, initial_size)
}

fn remove(name: &str) -> bool {
    FILESYSTEM.lock().remove(name)
}

fn open(name: &str) -> i32 {
    let Some(current) = sched::current() else { return -1 };
    let Some(backend) = FILESYSTEM.lock().open(name) else { return -1 };
    with_file_table(current.id(), |table| table.insert(backend))
}

fn filesize(fd: i32) -> i32 {
    let Some(current) = sched::current() else { return -1 };
    with_file_table(current.id(), |table| match table.get_mut(fd) {
        Some(backend) => backend.length() as i32,
        _ => -1,
    })
}

fn read(fd: i32, buf: &mut [u8]) -> i32 {
    if fd == STDIN_FD {
        let mut read = 0;
        while read < buf.len() {
            match crate::log::read_char() {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        return read as i32;
    }
    let Some(current) = sched::current() else { return -1 };
    with_file_table(current.id(), |table| match table.get_mut(fd) {
        Some(backend) => backend.read(buf) as i32,
        _ => -1,
    })
}

fn write(fd: i32, buf: &[u8]) -> i32 {
    if fd == STDOUT_FD {
        for &byte in buf {
            crate::log::write_char(byte);
        }
        return buf.len() as i32;
    }
    let Some(current) = sched::current() else { return -1 };
    with_file_table(current.id(), |table| match table.get_mut(fd) {
        Some(backend) => backend.write(buf) as i32,
        _ => -1,
    })
}

fn seek(fd: i32, position: u64) {
    let Some(current) = sched::current() else { return };
    with_file_table(current.id(), |table| {
        if let Some(backend) = table.get_mut(fd) {
            backend.seek(position);
        }
    });
}

fn tell(fd: i32) -> i32 {
    let Some(current) = sched::current() else { return -1 };
    with_file_table(current.id(), |table| match table.get_mut(fd) {
        Some(backend) => backend.tell() as i32,
        _ => -1,
    })
}

fn close(fd: i32) {
    let Some(current) = sched::current() else { return };
    with_file_table(current.id(), |table| {
        table.take(fd);
    });
}

/// A decoded syscall ready to dispatch. Carries borrowed buffers/strings
/// directly rather than raw user pointers, since validating and copying
/// those out of user memory is the trap handler's job, not this bridge's.
pub enum Syscall<'a> {
    Halt,
    Exit(i32),
    Fork { entry: fn(), priority: u8 },
    Exec { path: &'a str },
    Wait(ThreadId),
    Create { name: &'a str, initial_size: u64 },
    Remove { name: &'a str },
    Open { name: &'a str },
    Filesize(i32),
    Read { fd: i32, buf: &'a mut [u8] },
    Write { fd: i32, buf: &'a [u8] },
    Seek { fd: i32, position: u64 },
    Tell(i32),
    Close(i32),
}

/// Run one decoded syscall to completion, returning the value that belongs
/// in the caller's result register. `Halt`/`Exit` never return to the
/// caller.
pub fn dispatch(call: Syscall) -> i32 {
    match call {
        Syscall::Halt => halt(),
        Syscall::Exit(status) => exit(status),
        Syscall::Fork { entry, priority } => fork(entry, priority),
        Syscall::Exec { path } => exec(path),
        Syscall::Wait(tid) => wait(tid),
        Syscall::Create { name, initial_size } => create(name, initial_size) as i32,
        Syscall::Remove { name } => remove(name) as i32,
        Syscall::Open { name } => open(name),
        Syscall::Filesize(fd) => filesize(fd),
        Syscall::Read { fd, buf } => read(fd, buf),
        Syscall::Write { fd, buf } => write(fd, buf),
        Syscall::Seek { fd, position } => {
            seek(fd, position);
            0
        }
        Syscall::Tell(fd) => tell(fd),
        Syscall::Close(fd) => {
            close(fd);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::StackSizeClass;
    use alloc::string::ToString;
    use alloc::vec;

    struct MemFile {
        data: Vec<u8>,
        pos: u64,
    }

    impl FileBackend for MemFile {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let start = self.pos as usize;
            if start >= self.data.len() {
                return 0;
            }
            let n = (self.data.len() - start).min(buf.len());
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            self.pos += n as u64;
            n
        }
        fn write(&mut self, buf: &[u8]) -> usize {
            let start = self.pos as usize;
            if start + buf.len() > self.data.len() {
                self.data.resize(start + buf.len(), 0);
            }
            self.data[start..start + buf.len()].copy_from_slice(buf);
            self.pos += buf.len() as u64;
            buf.len()
        }
        fn seek(&mut self, position: u64) {
            self.pos = position;
        }
        fn tell(&self) -> u64 {
            self.pos
        }
        fn length(&self) -> u64 {
            self.data.len() as u64
        }
    }

    struct MemFs {
        files: spin::Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl FileSystem for MemFs {
        fn create(&self, name: &str, initial_size: u64) -> bool {
            let mut files = self.files.lock();
            if files.iter().any(|(n, _)| n == name) {
                return false;
            }
            files.push((name.to_string(), vec![0u8; initial_size as usize]));
            true
        }
        fn remove(&self, name: &str) -> bool {
            let mut files = self.files.lock();
            let before = files.len();
            files.retain(|(n, _)| n != name);
            files.len() != before
        }
        fn open(&self, name: &str) -> Option<Box<dyn FileBackend>> {
            let files = self.files.lock();
            files
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, data)| Box::new(MemFile { data: data.clone(), pos: 0 }) as Box<dyn FileBackend>)
        }
    }

    static TEST_FS: MemFs = MemFs {
        files: spin::Mutex::new(Vec::new()),
    };

    fn with_current_thread() -> ThreadId {
        sched::reset_for_test();
        *FILE_TABLES.lock() = Vec::new();
        *CHILDREN.lock() = Vec::new();
        *FORK_CHANNELS.lock() = Vec::new();
        let handle = sched::spawn(|| {}, 20, StackSizeClass::Small).unwrap();
        let thread = sched::lookup_thread(handle.thread_id()).unwrap();
        sched::set_current_for_test(Some(thread));
        handle.thread_id()
    }

    #[test]
    fn create_open_write_read_round_trip() {
        with_current_thread();
        unsafe { set_filesystem(&TEST_FS) };

        assert!(create("greeting.txt", 0));
        let fd = open("greeting.txt");
        assert!(fd >= 2);
        assert_eq!(write(fd, b"hi"), 2);
        seek(fd, 0);
        let mut buf = [0u8; 2];
        assert_eq!(read(fd, &mut buf), 2);
        assert_eq!(&buf, b"hi");
        close(fd);
    }

    #[test]
    fn opening_a_missing_file_fails() {
        with_current_thread();
        unsafe { set_filesystem(&TEST_FS) };
        assert_eq!(open("does-not-exist.txt"), -1);
    }

    #[test]
    fn wait_on_non_child_returns_negative_one() {
        with_current_thread();
        let bogus = ThreadId::new(999);
        assert_eq!(wait(bogus), -1);
    }
}
