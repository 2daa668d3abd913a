//! Process-wide stdout target and the guard that hijacks it.
//!
//! Code that should be capturable prints through [`mprint!`](crate::mprint),
//! [`mprintln!`](crate::mprintln), or [`stdout()`] instead of `println!`.
//! Those go to the current [`StdoutTarget`], which is the real process stdout
//! until a [`DuplicateStdout`] guard installs a [`PatternStream`] in its place.
//!
//! Installing a guard is NOT thread-safe by contract: the slot itself is
//! locked, but nothing stops two threads from entering competing guards and
//! restoring each other's targets out of order. Enter and exit guards from one
//! thread only.

use crate::convert::Payload;
use crate::stream::{lock, PatternStream};
use once_cell::sync::Lazy;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// A writable destination that can stand in for stdout.
pub trait OutputSink: Send + Sync {
    fn write_bytes(&self, data: &[u8]) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn is_tty(&self) -> bool {
        false
    }
}

/// Where [`print_to_stdout`] currently writes.
#[derive(Clone, Default)]
pub enum StdoutTarget {
    #[default]
    Process,
    Sink(Arc<dyn OutputSink>),
}

impl StdoutTarget {
    /// Whether both targets refer to the same destination.
    pub fn same_as(&self, other: &StdoutTarget) -> bool {
        match (self, other) {
            (StdoutTarget::Process, StdoutTarget::Process) => true,
            (StdoutTarget::Sink(a), StdoutTarget::Sink(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    pub fn is_process(&self) -> bool {
        matches!(self, StdoutTarget::Process)
    }

    fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        match self {
            StdoutTarget::Process => {
                let mut out = io::stdout().lock();
                out.write_all(data)?;
                out.flush()
            }
            StdoutTarget::Sink(sink) => sink.write_bytes(data),
        }
    }
}

impl fmt::Debug for StdoutTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdoutTarget::Process => f.write_str("Process"),
            StdoutTarget::Sink(sink) => write!(f, "Sink({:p})", Arc::as_ptr(sink)),
        }
    }
}

static STDOUT_TARGET: Lazy<Mutex<StdoutTarget>> = Lazy::new(|| Mutex::new(StdoutTarget::Process));

pub fn current_stdout() -> StdoutTarget {
    lock(&STDOUT_TARGET).clone()
}

/// Installs `target`, returning the one it replaced.
pub fn replace_stdout(target: StdoutTarget) -> StdoutTarget {
    std::mem::replace(&mut *lock(&STDOUT_TARGET), target)
}

/// Writes `text` to the current stdout target.
pub fn print_to_stdout(text: &str) -> io::Result<()> {
    // The slot lock is released before writing: a sink may reinstall itself.
    current_stdout().write_bytes(text.as_bytes())
}

/// A writer bound to whatever the current stdout target is at write time.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentStdout;

pub fn stdout() -> CurrentStdout {
    CurrentStdout
}

impl Write for CurrentStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        current_stdout().write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match current_stdout() {
            StdoutTarget::Process => io::stdout().flush(),
            StdoutTarget::Sink(sink) => sink.flush(),
        }
    }
}

/// Prints to the current stdout target.
///
/// Unlike `print!`, write errors are dropped instead of panicking.
#[macro_export]
macro_rules! mprint {
    ($($arg:tt)*) => {{
        let _ = $crate::stdout::print_to_stdout(&format!($($arg)*));
    }};
}

/// Prints to the current stdout target, with a newline. Write errors are
/// dropped.
#[macro_export]
macro_rules! mprintln {
    () => {{
        let _ = $crate::stdout::print_to_stdout("\n");
    }};
    ($($arg:tt)*) => {{
        let _ = $crate::stdout::print_to_stdout(&format!("{}\n", format_args!($($arg)*)));
    }};
}

struct Redirect {
    stream: Arc<PatternStream>,
    this: Weak<Redirect>,
    active: AtomicBool,
}

impl Redirect {
    fn reassert(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            replace_stdout(StdoutTarget::Sink(this));
        }
    }
}

impl OutputSink for Redirect {
    fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let result = self.stream.write(Payload::from(data));
        // logging may swap the target as a side effect; stay installed
        self.reassert();
        result.map_err(|e| match e {
            crate::Error::Io(e) => e,
            e => io::Error::other(e),
        })
    }

    fn is_tty(&self) -> bool {
        true
    }
}

/// Redirects the process-wide stdout target into a [`PatternStream`].
///
/// Entering remembers the current target and installs the stream; closing
/// (or dropping the guard) puts the remembered target back. Both are
/// idempotent. Anything printed while the guard is active is forwarded
/// verbatim as plain text; formatting beyond what the caller already applied
/// is not preserved.
pub struct DuplicateStdout {
    redirect: Arc<Redirect>,
    previous: Option<StdoutTarget>,
}

impl DuplicateStdout {
    pub fn new(stream: Arc<PatternStream>) -> Self {
        let redirect = Arc::new_cyclic(|this| Redirect {
            stream,
            this: this.clone(),
            active: AtomicBool::new(false),
        });

        Self {
            redirect,
            previous: None,
        }
    }

    /// Creates a guard and enters it.
    pub fn install(stream: Arc<PatternStream>) -> Self {
        let mut guard = Self::new(stream);
        guard.enter();
        guard
    }

    /// Starts redirecting. Does nothing when already active.
    pub fn enter(&mut self) {
        if self.previous.is_some() {
            return;
        }

        let sink: Arc<dyn OutputSink> = self.redirect.clone();
        self.previous = Some(replace_stdout(StdoutTarget::Sink(sink)));
        self.redirect.active.store(true, Ordering::SeqCst);
        debug!("stdout redirected to stream {:?}", self.redirect.stream.source());
    }

    /// Forwards `data` to the stream. Empty input is ignored.
    pub fn write(&self, data: &str) -> io::Result<()> {
        self.redirect.write_bytes(data.as_bytes())
    }

    /// Writes reach the stream immediately; there is nothing to flush.
    pub fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Stops redirecting and restores the remembered target. Does nothing
    /// when inactive.
    pub fn close(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.redirect.active.store(false, Ordering::SeqCst);
            replace_stdout(previous);
            debug!("stdout restored");
        }
    }

    /// Same as [`close`](Self::close).
    pub fn exit(&mut self) {
        self.close();
    }

    pub fn is_active(&self) -> bool {
        self.previous.is_some()
    }

    /// The target that will be restored on close.
    pub fn previous(&self) -> Option<&StdoutTarget> {
        self.previous.as_ref()
    }

    /// Always true: downstream code should treat this as a live terminal.
    pub fn isatty(&self) -> bool {
        true
    }

    /// The target value this guard installs.
    pub fn target(&self) -> StdoutTarget {
        StdoutTarget::Sink(self.redirect.clone())
    }
}

impl Write for DuplicateStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.redirect.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DuplicateStdout {
    fn drop(&mut self) {
        self.close();
    }
}
