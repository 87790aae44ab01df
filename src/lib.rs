//! # exec-forge
//!
//! Launches an arbitrary command as a detached daemon: resource limits,
//! optional identity change, working directory, descriptor cleanup,
//! stream redirection, a new session, and a pid file.
//!
//! Failures that happen after standard error has been redirected still
//! reach the invoking terminal through a [`DiagnosticSink`].

#[cfg(not(unix))]
compile_error!("exec-forge only supports Unix platforms");

pub mod cli;
mod config;
mod diag;
mod error;
mod identity;
mod limits;
pub mod logging;
mod pidfile;
mod stdio;
mod sys;

// Re-export public types to keep the API flat
pub use config::LaunchConfig;
pub use diag::DiagnosticSink;
pub use error::{LaunchError, LaunchResult};
pub use identity::{Credentials, Group, User};
pub use limits::{LimitCategory, LimitRequest, LimitTable, LimitValue, ProcessLimits, apply_limits};
pub use pidfile::record_pid;
pub use stdio::{OpenMode, StreamPaths, same_file};
pub use sys::unix::LaunchOutcome;
