//! Synchronous external tool invocation with a wall-clock timeout.
//!
//! The sampling pipeline shells out to `ps` and `top`. A hang in either
//! tool would otherwise stall the cycle forever, so every invocation runs
//! against a deadline; hitting it kills the child and surfaces
//! [`ToolError::Timeout`], which callers treat as batch-wide fatal.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often the runner polls a child for exit while the deadline runs.
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Failures invoking or interpreting an external tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn `{tool}`: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("`{tool}` timed out after {timeout:?}")]
    Timeout {
        tool: &'static str,
        timeout: Duration,
    },

    #[error("`{tool}` exited with {status}")]
    Status {
        tool: &'static str,
        status: ExitStatus,
    },

    #[error("`{tool}` wrote to stderr: {stderr}")]
    Stderr { tool: &'static str, stderr: String },

    #[error("`{tool}` produced unparsable output: {reason}")]
    Unparsable { tool: &'static str, reason: String },
}

/// Captured output of a completed tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `tool` with `args`, capturing stdout and stderr, enforcing `timeout`.
///
/// Both pipes are drained concurrently with the wait so a chatty child can
/// never deadlock on a full pipe buffer. A non-zero exit is an error;
/// stderr content is returned for the caller to judge (`ps` and `top` both
/// treat any stderr as a failed capture, but that is their contract).
pub fn run(tool: &'static str, args: &[&str], timeout: Duration) -> Result<ToolOutput, ToolError> {
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn { tool, source })?;

    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, tool, timeout)?;

    let stdout = join_drained(stdout_reader);
    let stderr = join_drained(stderr_reader);

    if !status.success() {
        return Err(ToolError::Status { tool, status });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Check whether `name` resolves on PATH by asking `which`.
pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut r| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_drained(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_with_deadline(
    child: &mut Child,
    tool: &'static str,
    timeout: Duration,
) -> Result<ExitStatus, ToolError> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait().ok().flatten() {
            return Ok(status);
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::Timeout { tool, timeout });
        }

        thread::sleep(WAIT_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let out = run("echo", &["hello"], Duration::from_secs(5)).expect("echo runs");
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn test_run_captures_stderr() {
        let out = run("sh", &["-c", "echo oops >&2"], Duration::from_secs(5)).expect("sh runs");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn test_run_nonzero_status() {
        let err = run("false", &[], Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ToolError::Status { tool: "false", .. }));
    }

    #[test]
    fn test_run_missing_binary() {
        let err = run("definitely-not-a-real-binary-9x7", &[], Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_run_times_out() {
        let err = run("sleep", &["5"], Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ToolError::Timeout { tool: "sleep", .. }));
    }

    #[test]
    fn test_run_large_output_does_not_deadlock() {
        // 1 MiB of stdout, well past the pipe buffer.
        let out = run(
            "sh",
            &["-c", "head -c 1048576 /dev/zero | tr '\\0' 'a'"],
            Duration::from_secs(10),
        )
        .expect("sh runs");
        assert_eq!(out.stdout.len(), 1_048_576);
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("echo"));
        assert!(!command_exists("definitely-not-a-real-binary-9x7"));
    }
}
