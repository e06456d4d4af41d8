//! Child process execution with timeouts and bounded output capture.
//!
//! Verification tools are untrusted in the sense that they can hang or emit
//! unbounded output; both are contained here so the engine only ever sees a
//! finished [`ToolOutput`].

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Captured output of one tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl ToolOutput {
    /// Stdout and stderr combined into one lossy string, with truncation
    /// notices, suitable for revision feedback.
    pub fn combined_text(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        if !self.stderr.is_empty() {
            buf.push('\n');
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        buf
    }
}

/// Run a command with a timeout, draining stdout/stderr concurrently to avoid
/// pipe deadlocks. `output_limit_bytes` bounds the bytes kept per stream;
/// excess bytes are counted and discarded while the pipe is still drained.
pub fn run_tool(mut cmd: Command, timeout: Duration, output_limit_bytes: usize) -> Result<ToolOutput> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(timeout_secs = timeout.as_secs(), "spawning tool");
    let mut child = cmd.spawn().context("spawn tool")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    use wait_timeout::ChildExt;
    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for tool")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "tool timed out, killing");
            timed_out = true;
            child.kill().context("kill tool")?;
            child.wait().context("wait tool after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "tool output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "tool finished");
    Ok(ToolOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read tool output")?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; exit 3"]);
        let output = run_tool(cmd, Duration::from_secs(5), 10_000).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert!(!output.timed_out);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let output = run_tool(cmd, Duration::from_millis(100), 10_000).expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn bounds_captured_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "yes x | head -c 100000"]);
        let output = run_tool(cmd, Duration::from_secs(5), 1000).expect("run");
        assert_eq!(output.stdout.len(), 1000);
        assert!(output.stdout_truncated > 0);
        assert!(output.combined_text().contains("truncated"));
    }
}
