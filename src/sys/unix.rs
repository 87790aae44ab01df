use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use nix::unistd::{self, ForkResult};

use crate::config::LaunchConfig;
use crate::diag::DiagnosticSink;
use crate::error::{LaunchError, LaunchResult};
use crate::identity::Credentials;
use crate::limits::{self, ProcessLimits};
use crate::pidfile;
use crate::stdio;

/// What the parent knows once the daemon is on its way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub pid: u32,
    pub pid_file: Option<PathBuf>,
}

/// Runs the whole daemonization procedure.
///
/// Order matters: limits and identity come first because they can still
/// report on the real stderr; everything from the stream teardown onwards
/// reports through `sink`, which is replaced by the saved duplicate just
/// before fd 2 is closed.
///
/// Returns in the parent only. The child either becomes the target command
/// or reports through `sink` and exits with status 1.
pub fn launch(config: &LaunchConfig, sink: &mut DiagnosticSink) -> LaunchResult<LaunchOutcome> {
    let Some(program) = config.program() else {
        return Err(LaunchError::Config("a program and its arguments are required".into()));
    };

    // --- Resource limits & identity ---
    limits::apply_limits(&config.limits, &mut ProcessLimits)?;

    if let Some(creds) = Credentials::resolve(config.user.as_ref(), config.group.as_ref())? {
        creds.switch()?;
    }

    // --- Error channel ---
    // The duplicate only takes over once fd 2 is torn down; until then the
    // live stderr keeps reporting, even if duplication failed.
    let saved = if config.keep_open {
        None
    } else {
        config.streams.preflight()?;
        let floor = config.close_fds.iter().copied().max().map_or(3, |fd| fd.saturating_add(1));
        let saved = DiagnosticSink::capture_above(floor);
        tracing::debug!(captured = saved.is_captured(), fd = ?saved.raw_fd(), "saved stderr for late errors");
        Some(saved)
    };

    if let Some(dir) = &config.working_dir {
        std::env::set_current_dir(dir)
            .map_err(|e| LaunchError::syscall_on("chdir", dir.display().to_string(), e))?;
    }

    // --- Descriptors ---
    stdio::close_descriptors(&config.close_fds, saved.as_ref().and_then(DiagnosticSink::raw_fd))?;

    if let Some(saved) = saved {
        *sink = saved;
        tracing::debug!(streams = ?config.streams, "redirecting standard streams");
        stdio::close_standard()?;
        config.streams.reopen()?;
    }

    // Built before the fork so the child only has to exec.
    let mut command = Command::new(program);
    command.args(&config.command[1..]);

    match unsafe { unistd::fork() } {
        Err(errno) => Err(LaunchError::syscall("fork", errno.into())),
        Ok(ForkResult::Child) => run_child(config, command, sink),
        Ok(ForkResult::Parent { child }) => {
            let pid = child.as_raw() as u32;
            tracing::debug!(pid, "forked daemon");
            if let Some(path) = &config.pid_file {
                pidfile::record_pid(path, pid)?;
            }
            Ok(LaunchOutcome {
                pid,
                pid_file: config.pid_file.clone(),
            })
        }
    }
}

/// Child side of the fork: umask, new session, exec. Never returns.
fn run_child(config: &LaunchConfig, mut command: Command, sink: &DiagnosticSink) -> ! {
    if let Some(mask) = config.umask {
        unsafe { libc::umask(mask as libc::mode_t) };
    }

    if let Err(errno) = unistd::setsid() {
        sink.fail(&LaunchError::syscall("setsid", errno.into()));
    }

    // The Rust runtime ignores SIGPIPE; the daemon should start with the default.
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };

    let err = command.exec();
    let program = command.get_program().to_string_lossy().into_owned();
    sink.fail(&LaunchError::syscall_on("execvp", program, err))
}
