//! Subprocess helpers shared by every external tool invocation

use crate::{
    error::{Error, Result},
    log::LogSink,
};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, trace};

/// Run `cmd` to completion and return its standard output. A nonzero exit
/// status is an error carrying whatever the command printed.
pub fn capture(cmd: &mut Command) -> Result<String> {
    capture_with(cmd, Stdio::inherit())
}

/// Like [`capture`], but whatever the command prints on stderr is dropped
pub fn capture_quiet(cmd: &mut Command) -> Result<String> {
    capture_with(cmd, Stdio::null())
}

fn capture_with(cmd: &mut Command, stderr: Stdio) -> Result<String> {
    let shown = describe(cmd);
    debug!("Capturing: {}", shown);

    let output = cmd
        .stdin(Stdio::null())
        .stderr(stderr)
        .output()
        .map_err(|e| spawn_error(&shown, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: shown,
            code: exit_code(output.status),
            output: stdout,
        });
    }
    Ok(stdout)
}

/// Run `cmd` with stdout and stderr joined into one pipe and forward every
/// line to `log` as it arrives. Returns the exit code unmodified.
///
/// The command is taken by value: it holds the write ends of the pipe, and
/// the reader only sees end-of-file once those are dropped.
pub fn run_and_log(mut cmd: Command, log: &mut dyn LogSink) -> Result<i32> {
    let shown = describe(&cmd);
    debug!("Running: {}", shown);

    let (reader, writer) = io::pipe()?;
    let writer_err = writer.try_clone()?;
    cmd.stdout(writer).stderr(writer_err);

    let mut child = cmd.spawn().map_err(|e| spawn_error(&shown, e))?;
    drop(cmd);

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        trace!("{}", line.trim_end());
        log.write(&line)?;
    }

    let status = child.wait()?;
    Ok(exit_code(status))
}

/// Exit code as a shell would report it; death by signal N maps to -N
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

/// Whether `path` is a regular file we may execute
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Shell-like rendering of a command, for logs and errors
pub fn describe(cmd: &Command) -> String {
    let mut shown = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        let arg = arg.to_string_lossy();
        shown.push(' ');
        if arg.contains(' ') || arg.is_empty() {
            shown.push_str(&format!("'{arg}'"));
        } else {
            shown.push_str(&arg);
        }
    }
    shown
}

fn spawn_error(shown: &str, err: io::Error) -> Error {
    Error::CommandFailed {
        command: shown.to_string(),
        code: -1,
        output: err.to_string(),
    }
}
