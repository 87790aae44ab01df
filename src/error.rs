use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::limits::{LimitCategory, LimitValue};

/// Everything that can stop a launch.
/// Every variant is terminal: the launcher reports it once and exits with status 1.
#[derive(Debug)]
pub enum LaunchError {
    /// Bad or insufficient input (no command, unknown user, bad descriptor list).
    Config(String),
    /// A soft limit was requested above the current hard ceiling.
    Limit {
        category: LimitCategory,
        soft: LimitValue,
        hard: LimitValue,
    },
    /// A configured path is not accessible with the mode it will be opened in.
    Permission {
        what: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    /// A system call failed (fork, setsid, exec, close, setrlimit...).
    Syscall {
        call: &'static str,
        target: Option<String>,
        source: io::Error,
    },
    /// Opening, writing or inspecting a file failed.
    Io { context: String, source: io::Error },
}

impl LaunchError {
    pub(crate) fn syscall(call: &'static str, source: io::Error) -> Self {
        LaunchError::Syscall { call, target: None, source }
    }

    pub(crate) fn syscall_on(call: &'static str, target: impl Into<String>, source: io::Error) -> Self {
        LaunchError::Syscall {
            call,
            target: Some(target.into()),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        LaunchError::Io {
            context: context.into(),
            source,
        }
    }

    /// Raw errno of the underlying OS error, if there is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            LaunchError::Permission { source, .. }
            | LaunchError::Syscall { source, .. }
            | LaunchError::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::Config(msg) => write!(f, "{}", msg),
            LaunchError::Limit { category, soft, hard } => write!(
                f,
                "specified {}_SOFT={} exceeds {}_HARD={}",
                category, soft, category, hard
            ),
            LaunchError::Permission { what, path, source } => {
                write!(f, "{} `{}' is not accessible: {}", what, path.display(), source)
            }
            LaunchError::Syscall { call, target: None, source } => {
                write!(f, "{}() failed: {}", call, source)
            }
            LaunchError::Syscall { call, target: Some(target), source } => {
                write!(f, "{}() on `{}' failed: {}", call, target, source)
            }
            LaunchError::Io { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Permission { source, .. }
            | LaunchError::Syscall { source, .. }
            | LaunchError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A specialized Result type for launch operations.
pub type LaunchResult<T> = Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_error_names_category_and_both_values() {
        let err = LaunchError::Limit {
            category: LimitCategory::OpenFiles,
            soft: LimitValue::Finite(10),
            hard: LimitValue::Finite(5),
        };
        assert_eq!(
            err.to_string(),
            "specified RLIMIT_NOFILE_SOFT=10 exceeds RLIMIT_NOFILE_HARD=5"
        );
    }

    #[test]
    fn exec_failure_embeds_command_name() {
        let err = LaunchError::syscall_on(
            "execvp",
            "/nonexistent-binary",
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("execvp() on `/nonexistent-binary' failed"), "{msg}");
        assert_eq!(err.errno(), Some(libc::ENOENT));
    }

    #[test]
    fn config_error_has_no_source() {
        let err = LaunchError::Config("a program and its arguments are required".into());
        assert!(std::error::Error::source(&err).is_none());
        assert_eq!(err.errno(), None);
    }
}
