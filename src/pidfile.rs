use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use nix::unistd::AccessFlags;

use crate::error::{LaunchError, LaunchResult};
use crate::stdio::check_access;

/// Writes `pid` followed by a newline to `path`, replacing any previous content.
pub fn record_pid(path: &Path, pid: u32) -> LaunchResult<()> {
    check_access("pid file", path, AccessFlags::W_OK)?;

    let context = || format!("unable to write pid file `{}'", path.display());
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| LaunchError::io(context(), e))?;

    writeln!(file, "{}", pid).map_err(|e| LaunchError::io(context(), e))?;
    file.flush().map_err(|e| LaunchError::io(context(), e))?;

    tracing::debug!(pid, path = %path.display(), "recorded pid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn writes_decimal_pid_and_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        record_pid(&path, 4321).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "4321\n");
    }

    #[test]
    fn overwrites_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        fs::write(&path, "123456789\nleftover\n").unwrap();
        record_pid(&path, 7).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "7\n");
    }

    #[test]
    fn missing_parent_directory_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("daemon.pid");
        let err = record_pid(&path, 1).unwrap_err();
        assert!(matches!(err, LaunchError::Io { .. }), "{err}");
        assert!(err.to_string().contains("unable to write pid file"));
    }

    #[test]
    fn path_under_a_regular_file_is_a_permission_error() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, b"").unwrap();
        let err = record_pid(&plain.join("daemon.pid"), 1).unwrap_err();
        assert!(matches!(err, LaunchError::Permission { what: "pid file", .. }), "{err}");
    }
}
