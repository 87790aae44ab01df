//! The channel fatal errors travel through once the real stderr is gone.
//!
//! The launcher duplicates its stderr before tearing the standard streams
//! down. The duplicate is close-on-exec, so the daemon never inherits it,
//! but the launcher (and the forked child up to `exec`) can still reach the
//! invoking terminal with messages like "command not found".

use std::fmt;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Prefix of every fatal message.
pub const PROGRAM: &str = "exec-forge";

/// Where fatal messages go.
#[derive(Debug, Default)]
pub enum DiagnosticSink {
    /// The live standard error. Used before redirection and with keep-open.
    #[default]
    Stderr,
    /// A close-on-exec duplicate of the original standard error.
    Captured(OwnedFd),
    /// Duplication failed; messages are dropped.
    Lost,
}

impl DiagnosticSink {
    /// Duplicates the current stderr above the standard slots, close-on-exec.
    ///
    /// Never fails: descriptor exhaustion yields [`DiagnosticSink::Lost`].
    pub fn capture() -> Self {
        Self::capture_above(3)
    }

    /// Like [`DiagnosticSink::capture`], with the duplicate numbered `floor` or higher,
    /// so it cannot collide with descriptors the caller is about to close.
    ///
    /// A floor at or past `RLIMIT_NOFILE` is unreachable; the duplicate then
    /// falls back to the lowest free slot above 2.
    pub fn capture_above(floor: RawFd) -> Self {
        let floor = floor.max(3);
        let mut fd = dup_stderr(floor);
        if fd < 0 && floor > 3 {
            tracing::debug!(floor, error = %io::Error::last_os_error(), "retrying stderr duplication above 2");
            fd = dup_stderr(3);
        }
        if fd < 0 {
            tracing::debug!(error = %io::Error::last_os_error(), "stderr duplication failed");
            return DiagnosticSink::Lost;
        }
        DiagnosticSink::Captured(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, DiagnosticSink::Captured(_))
    }

    /// The descriptor held by a captured sink.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            DiagnosticSink::Captured(fd) => Some(fd.as_raw_fd()),
            _ => None,
        }
    }

    /// Writes `exec-forge: <err>` to the invoking terminal, best effort.
    pub fn report(&self, err: &dyn fmt::Display) {
        let line = format!("{}: {}\n", PROGRAM, err);
        match self {
            DiagnosticSink::Stderr => write_stderr(&line),
            DiagnosticSink::Captured(fd) => unsafe { report_through(fd, &line) },
            DiagnosticSink::Lost => {}
        }
    }

    /// Reports `err` and terminates without unwinding or running exit handlers.
    /// Used on the child side of the fork.
    pub fn fail(&self, err: &dyn fmt::Display) -> ! {
        self.report(err);
        unsafe { libc::_exit(1) }
    }
}

fn dup_stderr(floor: RawFd) -> RawFd {
    unsafe { libc::fcntl(libc::STDERR_FILENO, libc::F_DUPFD_CLOEXEC, floor) }
}

fn write_stderr(line: &str) {
    let mut stderr = io::stderr().lock();
    let _ = stderr.write_all(line.as_bytes());
    let _ = stderr.flush();
}

/// Temporarily installs `fd` on the stderr slot for the duration of the message.
unsafe fn report_through(fd: &OwnedFd, line: &str) {
    let saved = unsafe { libc::fcntl(libc::STDERR_FILENO, libc::F_DUPFD_CLOEXEC, 3) };
    let slot_was_closed = saved < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EBADF);

    if unsafe { libc::dup2(fd.as_raw_fd(), libc::STDERR_FILENO) } != libc::STDERR_FILENO {
        if saved >= 0 {
            unsafe { libc::close(saved) };
        }
        return;
    }
    write_stderr(line);

    if saved >= 0 {
        unsafe {
            libc::dup2(saved, libc::STDERR_FILENO);
            libc::close(saved);
        }
    } else if slot_was_closed {
        unsafe { libc::close(libc::STDERR_FILENO) };
    }
}
