//! Blocking subprocess runner with interrupt forwarding.
//!
//! External tools run to completion while the calling thread polls the child.
//! When the user presses Ctrl-C the shutdown flag is set by the handler and the
//! runner forwards `SIGINT` to the child, then keeps waiting so the tool can
//! write out its state before exiting.

use crate::InfraError;
use std::io::{BufRead, BufReader};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, waiting for the running tool to exit...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Captured result of one tool invocation.
#[derive(Debug)]
pub struct ToolRun {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub interrupted: bool,
}

impl ToolRun {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Text worth showing the user when the run failed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }

    /// Turn a non-zero exit into `ToolFailed` (or `Interrupted`).
    pub fn check(self, tool: &str) -> Result<ToolRun, InfraError> {
        if self.interrupted {
            return Err(InfraError::Interrupted(tool.to_owned()));
        }
        if !self.status.success() {
            return Err(InfraError::ToolFailed {
                tool: tool.to_owned(),
                status: self.status.to_string(),
                stderr: self.diagnostic(),
            });
        }
        Ok(self)
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn forward_interrupt(pid: u32) {
    let Ok(pid_i32) = i32::try_from(pid) else {
        warn!("cannot forward interrupt: pid {pid} exceeds i32 range");
        return;
    };
    debug!("forwarding SIGINT to pid {pid}");
    // SAFETY: kill() with a pid we spawned and a valid signal number.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid_i32, libc::SIGINT) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to forward SIGINT to pid {pid}: {errno}");
        }
    }
}

/// Drain one pipe on its own thread. Each pipe needs a reader so a child that
/// fills one pipe's buffer while we wait on the other cannot block.
fn collect_lines<R: std::io::Read + Send + 'static>(
    source: Option<R>,
    stream: bool,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(source) = source {
            for line in BufReader::new(source).lines().map_while(Result::ok) {
                if stream {
                    eprintln!("{line}");
                }
                buf.push_str(&line);
                buf.push('\n');
            }
        }
        buf
    })
}

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// With `stream` set, output lines are echoed to stderr as they arrive.
/// Only spawn and wait failures are errors here; use [`ToolRun::check`] to
/// reject non-zero exits.
pub fn run_tool(mut cmd: Command, stream: bool) -> Result<ToolRun, InfraError> {
    let program = describe(&cmd);
    debug!("running {program}");

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| {
        InfraError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to start {}: {e}", cmd.get_program().to_string_lossy()),
        ))
    })?;

    let stdout = collect_lines(child.stdout.take(), stream);
    let stderr = collect_lines(child.stderr.take(), stream);

    let mut interrupted = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if !interrupted && shutdown_requested() {
            forward_interrupt(child.id());
            interrupted = true;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    debug!("{program} exited: {status}");

    Ok(ToolRun {
        status,
        stdout,
        stderr,
        interrupted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let run = run_tool(sh("echo out; echo err >&2"), false).unwrap();
        assert!(run.status.success());
        assert_eq!(run.stdout, "out\n");
        assert_eq!(run.stderr, "err\n");
        assert!(!run.interrupted);
        run.check("sh").unwrap();
    }

    #[test]
    fn non_zero_exit_is_tool_failure() {
        let run = run_tool(sh("echo boom >&2; exit 3"), false).unwrap();
        assert_eq!(run.code(), Some(3));
        let err = run.check("sh").unwrap_err();
        match err {
            InfraError::ToolFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn large_output_on_both_pipes_does_not_block() {
        let script = "i=0; while [ $i -lt 5000 ]; do echo out-$i; echo err-$i >&2; i=$((i+1)); done";
        let run = run_tool(sh(script), false).unwrap();
        assert!(run.status.success());
        assert_eq!(run.stdout.lines().count(), 5000);
        assert_eq!(run.stderr.lines().count(), 5000);
        assert!(run.stderr.ends_with("err-4999\n"));
    }

    #[test]
    fn diagnostic_falls_back_to_stdout() {
        let run = run_tool(sh("echo only-stdout; exit 1"), false).unwrap();
        assert_eq!(run.diagnostic(), "only-stdout");
    }

    #[test]
    fn missing_binary_is_io_error() {
        let err = run_tool(Command::new("bosun-no-such-binary-xyz"), false).unwrap_err();
        assert!(matches!(err, InfraError::Io(_)));
        assert!(err.to_string().contains("bosun-no-such-binary-xyz"));
    }
}
