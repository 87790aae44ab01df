//! Command-line surface: `exec-forge [OPTIONS] [--] <COMMAND> [ARGS]...`

use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::PathBuf;

use clap::{Arg, ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::config::LaunchConfig;
use crate::limits::{LimitCategory, LimitValue};

const LIMITS_HEADING: &str = "Resource limits";

#[derive(Debug, Parser)]
#[command(
    name = "exec-forge",
    version,
    about = "Run a command as a detached daemon in its own session",
    after_help = "Limit values are numbers or `unlimited'. A soft limit above the current \
                  hard limit is rejected unless a hard limit is given too."
)]
struct Cli {
    /// Keep stdin, stdout and stderr open instead of redirecting them
    #[arg(short = 'k', long)]
    keep_open: bool,

    /// Close file descriptor FD before launching (repeatable)
    #[arg(short = 'c', long = "close", value_name = "FD", value_parser = clap::value_parser!(i32).range(0..))]
    close: Vec<RawFd>,

    /// Read standard input from PATH
    #[arg(short = 'i', long, value_name = "PATH", default_value = "/dev/null")]
    stdin: PathBuf,

    /// Write standard output to PATH
    #[arg(short = 'o', long, value_name = "PATH", default_value = "/dev/null")]
    stdout: PathBuf,

    /// Write standard error to PATH
    #[arg(short = 'e', long, value_name = "PATH", default_value = "/dev/null")]
    stderr: PathBuf,

    /// Write the daemon's pid to PATH
    #[arg(short = 'p', long = "pid", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Change to DIR before launching
    #[arg(short = 'w', long, value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Octal umask applied to the daemon
    #[arg(long, value_name = "MODE", value_parser = parse_umask)]
    umask: Option<u32>,

    /// Run as USER (name or uid)
    #[arg(short = 'u', long, value_name = "USER")]
    user: Option<String>,

    /// Run as GROUP (name or gid)
    #[arg(short = 'g', long, value_name = "GROUP")]
    group: Option<String>,

    /// The program to run, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

/// The full clap command, including one soft and one hard option per limit category.
pub fn command() -> clap::Command {
    LimitCategory::ALL.iter().fold(Cli::command(), |cmd, &category| {
        cmd.arg(limit_arg(category.soft_flag(), format!("Soft {} limit", category)))
            .arg(limit_arg(category.hard_flag(), format!("Hard {} limit", category)))
    })
}

fn limit_arg(flag: &'static str, help: String) -> Arg {
    Arg::new(flag)
        .long(flag)
        .value_name("N")
        .value_parser(parse_limit)
        .help(help)
        .help_heading(LIMITS_HEADING)
}

/// Parses `args` (program name first) into an unvalidated [`LaunchConfig`].
///
/// Help and version requests come back as errors whose
/// [`clap::Error::use_stderr`] is `false`.
pub fn parse<I, T>(args: I) -> Result<LaunchConfig, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let cli = Cli::from_arg_matches(&matches)?;
    Ok(into_config(cli, &matches))
}

fn into_config(cli: Cli, matches: &ArgMatches) -> LaunchConfig {
    let mut config = LaunchConfig::new(cli.command)
        .keep_open(cli.keep_open)
        .stdin(cli.stdin)
        .stdout(cli.stdout)
        .stderr(cli.stderr);

    for fd in cli.close {
        config = config.close_fd(fd);
    }
    if let Some(path) = cli.pid_file {
        config = config.pid_file(path);
    }
    if let Some(dir) = cli.working_dir {
        config = config.working_directory(dir);
    }
    if let Some(mask) = cli.umask {
        config = config.umask(mask);
    }
    if let Some(user) = cli.user.as_deref() {
        config = config.user(user);
    }
    if let Some(group) = cli.group.as_deref() {
        config = config.group(group);
    }

    for &category in LimitCategory::ALL {
        if let Some(&value) = matches.get_one::<LimitValue>(category.soft_flag()) {
            config = config.soft_limit(category, value);
        }
        if let Some(&value) = matches.get_one::<LimitValue>(category.hard_flag()) {
            config = config.hard_limit(category, value);
        }
    }
    config
}

fn parse_limit(s: &str) -> Result<LimitValue, String> {
    s.parse()
}

fn parse_umask(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    match u32::from_str_radix(digits, 8) {
        Ok(mask) if mask <= 0o777 => Ok(mask),
        _ => Err(format!("`{}' is not an octal mode between 0 and 777", s)),
    }
}
