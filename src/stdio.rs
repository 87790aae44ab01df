//! Closing and reopening the standard streams.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{IntoRawFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{self, AccessFlags};

use crate::error::{LaunchError, LaunchResult};

const DEV_NULL: &str = "/dev/null";

/// Sources of the three standard streams. Each defaults to `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaths {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl Default for StreamPaths {
    fn default() -> Self {
        StreamPaths {
            stdin: PathBuf::from(DEV_NULL),
            stdout: PathBuf::from(DEV_NULL),
            stderr: PathBuf::from(DEV_NULL),
        }
    }
}

/// How stdout and stderr are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Both paths are the same file: append on both, truncated once.
    SharedAppend,
    /// Distinct files, each truncated on open.
    Independent,
}

impl StreamPaths {
    /// Checks every path against the mode it will be opened in.
    /// A missing path passes; it is created on reopen.
    pub fn preflight(&self) -> LaunchResult<()> {
        check_access("stdin source", &self.stdin, AccessFlags::R_OK)?;
        check_access("stdout target", &self.stdout, AccessFlags::W_OK)?;
        check_access("stderr target", &self.stderr, AccessFlags::W_OK)?;
        Ok(())
    }

    /// Decides the stdout/stderr open mode, creating the stdout path if missing.
    pub fn plan(&self) -> io::Result<OpenMode> {
        if same_file(&self.stdout, &self.stderr)? {
            Ok(OpenMode::SharedAppend)
        } else {
            Ok(OpenMode::Independent)
        }
    }

    /// Opens stdout then stderr according to [`StreamPaths::plan`].
    fn open_outputs(&self) -> LaunchResult<(File, File)> {
        let mode = self
            .plan()
            .map_err(|e| LaunchError::io(format!("cannot inspect `{}'", self.stdout.display()), e))?;
        tracing::trace!(?mode, "opening output streams");

        let open = |path: &Path| {
            let mut options = OpenOptions::new();
            options.create(true);
            match mode {
                OpenMode::SharedAppend => options.append(true),
                OpenMode::Independent => options.write(true).truncate(true),
            };
            options.open(path)
        };

        let stdout = open(&self.stdout).map_err(|e| redirect_failed("standard output", &self.stdout, e))?;
        if mode == OpenMode::SharedAppend && stdout.metadata().is_ok_and(|m| m.is_file()) {
            stdout
                .set_len(0)
                .map_err(|e| redirect_failed("standard output", &self.stdout, e))?;
        }
        let stderr = open(&self.stderr).map_err(|e| redirect_failed("standard error", &self.stderr, e))?;
        Ok((stdout, stderr))
    }

    /// Points descriptors 0, 1 and 2 at the configured paths.
    ///
    /// Expects the standard slots to be closed already. Nothing is rolled
    /// back on failure.
    pub fn reopen(&self) -> LaunchResult<()> {
        let stdin = File::open(&self.stdin).map_err(|e| redirect_failed("standard input", &self.stdin, e))?;
        install(stdin, libc::STDIN_FILENO).map_err(|e| redirect_failed("standard input", &self.stdin, e))?;

        let (stdout, stderr) = self.open_outputs()?;
        install(stdout, libc::STDOUT_FILENO).map_err(|e| redirect_failed("standard output", &self.stdout, e))?;
        install(stderr, libc::STDERR_FILENO).map_err(|e| redirect_failed("standard error", &self.stderr, e))?;
        Ok(())
    }
}

/// `access(2)` with `ENOENT` treated as success.
pub fn check_access(what: &'static str, path: &Path, mode: AccessFlags) -> LaunchResult<()> {
    match unistd::access(path, mode) {
        Ok(()) | Err(Errno::ENOENT) => Ok(()),
        Err(errno) => Err(LaunchError::Permission {
            what,
            path: path.to_path_buf(),
            source: errno.into(),
        }),
    }
}

/// Whether both paths name the same file (same device and inode).
///
/// `first` is created when missing; a missing `second` is simply a different file.
pub fn same_file(first: &Path, second: &Path) -> io::Result<bool> {
    OpenOptions::new().write(true).create(true).open(first)?;
    let a = fs::metadata(first)?;
    match fs::metadata(second) {
        Ok(b) => Ok(a.dev() == b.dev() && a.ino() == b.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Closes caller-named descriptors in order. Any failure aborts the launch.
///
/// `reserved` is a descriptor the launcher opened itself after start-up; the
/// caller cannot have meant it, so it fails as `EBADF` and stays open.
pub fn close_descriptors(fds: &[RawFd], reserved: Option<RawFd>) -> LaunchResult<()> {
    for &fd in fds {
        let failed = if Some(fd) == reserved {
            Some(io::Error::from_raw_os_error(libc::EBADF))
        } else if unsafe { libc::close(fd) } < 0 {
            Some(io::Error::last_os_error())
        } else {
            None
        };
        if let Some(err) = failed {
            return Err(LaunchError::syscall_on("close", format!("file descriptor {}", fd), err));
        }
        tracing::trace!(fd, "closed inherited descriptor");
    }
    Ok(())
}

/// Closes stdin, stdout and stderr in that order. A slot that is already
/// closed is left as is.
pub fn close_standard() -> LaunchResult<()> {
    for (fd, name) in [
        (libc::STDIN_FILENO, "stdin"),
        (libc::STDOUT_FILENO, "stdout"),
        (libc::STDERR_FILENO, "stderr"),
    ] {
        if unsafe { libc::close(fd) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EBADF) {
                return Err(LaunchError::syscall_on("close", name, err));
            }
        }
    }
    Ok(())
}

/// Moves `file` onto `target`, leaving it inheritable across `exec`.
fn install(file: File, target: RawFd) -> io::Result<()> {
    let fd = file.into_raw_fd();
    if fd == target {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }

    let res = unsafe { libc::dup2(fd, target) };
    let err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    if res < 0 { Err(err) } else { Ok(()) }
}

fn redirect_failed(stream: &str, path: &Path, source: io::Error) -> LaunchError {
    LaunchError::io(format!("failed to redirect {} to `{}'", stream, path.display()), source)
}
