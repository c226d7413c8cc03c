//! Running the registry control-plane tool as a child process.
//!
//! Calls are synchronous: the caller blocks until the child exits. There is
//! no timeout unless one is configured.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::ProcessError;

/// Capture ceiling for stdout/stderr. `PATH` alone can exceed a megabyte.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 50 * 1024 * 1024;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Executes the external tool with the given arguments.
pub trait ProcessInvoker {
    /// Run to completion and return stdout, or an error carrying stderr on
    /// non-zero exit.
    fn invoke(&self, args: &[&str]) -> Result<String, ProcessError>;
}

impl<T: ProcessInvoker + ?Sized> ProcessInvoker for &T {
    fn invoke(&self, args: &[&str]) -> Result<String, ProcessError> {
        (**self).invoke(args)
    }
}

/// Invoker for `reg.exe` (or any program with the same argument protocol).
#[derive(Debug, Clone)]
pub struct RegExeInvoker {
    program: PathBuf,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl RegExeInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for RegExeInvoker {
    fn default() -> Self {
        Self::new(default_reg_program())
    }
}

impl ProcessInvoker for RegExeInvoker {
    fn invoke(&self, args: &[&str]) -> Result<String, ProcessError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let label = self.program.display().to_string();
        let output = run_command(cmd, &label, self.timeout, self.output_limit_bytes)?;
        if output.timed_out {
            return Err(ProcessError::TimedOut {
                program: label,
                secs: self.timeout.map_or(0, |t| t.as_secs()),
            });
        }
        if output.stdout_truncated > 0 {
            return Err(ProcessError::OutputTruncated {
                program: label,
                limit_bytes: self.output_limit_bytes,
            });
        }
        if !output.status.success() {
            return Err(ProcessError::Failed {
                program: label,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `%SystemRoot%\System32\reg.exe`, falling back to `C:\Windows`.
pub fn default_reg_program() -> PathBuf {
    let root = std::env::var_os("SystemRoot")
        .or_else(|| std::env::var_os("SYSTEMROOT"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
    root.join("System32").join("reg.exe")
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

/// Run a command and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// With `timeout = None` the call waits for the child indefinitely.
#[instrument(skip_all, fields(program = label, output_limit_bytes = output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    label: &str,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let io_err = |source| ProcessError::Io {
        program: label.to_string(),
        source,
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(ProcessError::Spawn {
                program: label.to_string(),
                source: e,
            });
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_err(std::io::Error::other("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_err(std::io::Error::other("stderr was not piped")))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match timeout {
        None => child.wait().map_err(io_err)?,
        Some(limit) => match child.wait_timeout(limit).map_err(io_err)? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                child.kill().map_err(io_err)?;
                child.wait().map_err(io_err)?
            }
        },
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).map_err(io_err)?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).map_err(io_err)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(
    handle: thread::JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
) -> std::io::Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::other("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
