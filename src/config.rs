use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use crate::diag::DiagnosticSink;
use crate::error::{LaunchError, LaunchResult};
use crate::identity::{Group, User};
use crate::limits::{LimitCategory, LimitRequest, LimitValue};
use crate::stdio::StreamPaths;

/// Everything the launch procedure needs, built once and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub(crate) command: Vec<OsString>,
    pub(crate) keep_open: bool,
    pub(crate) close_fds: Vec<RawFd>,
    pub(crate) streams: StreamPaths,
    pub(crate) pid_file: Option<PathBuf>,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) umask: Option<u32>,
    pub(crate) user: Option<User>,
    pub(crate) group: Option<Group>,
    pub(crate) limits: BTreeMap<LimitCategory, LimitRequest>,
}

impl LaunchConfig {
    /// Creates a configuration for `command` (program followed by its arguments).
    ///
    /// # Defaults
    /// - Streams: `/dev/null`, replaced
    /// - Working directory, umask, identity, limits: inherited
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        LaunchConfig {
            command: command.into_iter().map(Into::into).collect(),
            keep_open: false,
            close_fds: Vec::new(),
            streams: StreamPaths::default(),
            pid_file: None,
            working_dir: None,
            umask: None,
            user: None,
            group: None,
            limits: BTreeMap::new(),
        }
    }

    // --- Public Getters ---

    /// Program name, as given.
    pub fn program(&self) -> Option<&OsStr> {
        self.command.first().map(OsString::as_os_str)
    }

    pub fn command(&self) -> &[OsString] {
        &self.command
    }

    pub fn keeps_streams_open(&self) -> bool {
        self.keep_open
    }

    pub fn descriptors_to_close(&self) -> &[RawFd] {
        &self.close_fds
    }

    pub fn streams(&self) -> &StreamPaths {
        &self.streams
    }

    pub fn pid_file_path(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    pub fn working_directory_path(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn umask_value(&self) -> Option<u32> {
        self.umask
    }

    pub fn limit_request(&self, category: LimitCategory) -> LimitRequest {
        self.limits.get(&category).copied().unwrap_or_default()
    }

    // --- Builder Methods ---

    /// Leaves stdin, stdout and stderr untouched.
    pub fn keep_open(mut self, keep: bool) -> Self { self.keep_open = keep; self }

    /// Closes an inherited descriptor before launching. Repeatable; order is kept.
    pub fn close_fd(mut self, fd: RawFd) -> Self { self.close_fds.push(fd); self }

    pub fn stdin<P: Into<PathBuf>>(mut self, path: P) -> Self { self.streams.stdin = path.into(); self }
    pub fn stdout<P: Into<PathBuf>>(mut self, path: P) -> Self { self.streams.stdout = path.into(); self }
    pub fn stderr<P: Into<PathBuf>>(mut self, path: P) -> Self { self.streams.stderr = path.into(); self }

    /// Records the daemon's pid in `path`.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self { self.pid_file = Some(path.into()); self }

    pub fn working_directory<P: Into<PathBuf>>(mut self, path: P) -> Self { self.working_dir = Some(path.into()); self }

    /// Umask applied in the child right before `setsid`.
    pub fn umask(mut self, mask: u32) -> Self { self.umask = Some(mask); self }

    pub fn user<U: Into<User>>(mut self, user: U) -> Self { self.user = Some(user.into()); self }
    pub fn group<G: Into<Group>>(mut self, group: G) -> Self { self.group = Some(group.into()); self }

    pub fn soft_limit(mut self, category: LimitCategory, value: LimitValue) -> Self {
        self.limits.entry(category).or_default().soft = Some(value);
        self
    }

    pub fn hard_limit(mut self, category: LimitCategory, value: LimitValue) -> Self {
        self.limits.entry(category).or_default().hard = Some(value);
        self
    }

    /// Validates the configuration without launching anything.
    pub fn build(self) -> LaunchResult<Self> {
        if self.command.is_empty() {
            return Err(LaunchError::Config("a program and its arguments are required".into()));
        }
        if self.command[0].is_empty() {
            return Err(LaunchError::Config("the program name is empty".into()));
        }
        if let Some(mask) = self.umask {
            if mask > 0o777 {
                return Err(LaunchError::Config(format!("umask {:o} is out of range", mask)));
            }
        }
        if let Some(fd) = self.close_fds.iter().find(|&&fd| fd < 0) {
            return Err(LaunchError::Config(format!("invalid file descriptor {}", fd)));
        }
        Ok(self)
    }

    /// Runs the launch procedure. Returns in the parent only.
    pub fn start(&self, sink: &mut DiagnosticSink) -> LaunchResult<crate::LaunchOutcome> {
        crate::sys::unix::launch(self, sink)
    }
}
