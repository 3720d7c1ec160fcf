//! Child processes with timeouts, bounded output, and marker watching.
//!
//! Output is drained on reader threads while the child runs, so pipes never
//! deadlock, and at most `output_limit_bytes` of each stream is retained.
//! A caller may also register marker strings: the stdout reader checks each
//! complete line for them, and the first match terminates the child early
//! (cooperative short-circuit, the child is killed and reaped, never left
//! detached).

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often the wait loop re-checks for an early marker match.
const MARKER_POLL: Duration = Duration::from_millis(200);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// First marker observed on stdout, if any. When set, the child was
    /// terminated early and `status` reflects the kill.
    pub marker: Option<String>,
}

impl CommandOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run a command to completion with a timeout and bounded output capture.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command_watching(cmd, stdin, timeout, output_limit_bytes, &[])
}

/// Run a command, watching stdout lines for marker strings.
///
/// Markers are checked per line in slice order; the first matching line wins.
/// On a match the child is killed and the marker is reported in the output.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), markers = markers.len()))]
pub fn run_command_watching(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    markers: &[&str],
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return Err(err).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let watch = Arc::new(MarkerWatch::new(markers));
    let stdout_watch = Arc::clone(&watch);
    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, &stdout_watch));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    // Readers are already draining, so a child that floods stdout while we
    // feed stdin cannot deadlock the pipes.
    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits (or closes stdin) without reading the prompt is
        // its own signal; surfacing EPIPE here would mask the exit status.
        if let Err(err) = child_stdin.write_all(input) {
            if err.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(err).context("write stdin");
            }
            debug!("child closed stdin before the full prompt was written");
        }
        drop(child_stdin);
    }

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        let slice = deadline
            .saturating_duration_since(Instant::now())
            .min(MARKER_POLL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
        if watch.hit() {
            debug!("marker observed, terminating child early");
            child.kill().context("kill command on marker")?;
            break child.wait().context("wait command after marker kill")?;
        }
        if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command on timeout")?;
            break child.wait().context("wait command after kill")?;
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let marker = watch.matched();
    debug!(exit_code = ?status.code(), timed_out, marker = ?marker, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        marker,
    })
}

/// Write a `=== stdout === / === stderr ===` process log, truncated to the
/// output limit.
pub fn write_process_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }

    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    if output.stdout_truncated > 0 {
        buf.push_str(&format!(
            "\n[stdout truncated {} bytes]\n",
            output.stdout_truncated
        ));
    }
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.stderr_truncated > 0 {
        buf.push_str(&format!(
            "\n[stderr truncated {} bytes]\n",
            output.stderr_truncated
        ));
    }
    if output.timed_out {
        buf.push_str("\n[process timed out]\n");
    }
    if let Some(marker) = &output.marker {
        buf.push_str(&format!("\n[terminated early on marker {marker}]\n"));
    }

    if buf.len() > output_limit {
        let truncated = format!(
            "{}\n[truncated {} bytes]\n",
            &buf[..output_limit],
            buf.len() - output_limit
        );
        return std::fs::write(path, truncated)
            .with_context(|| format!("write process log {}", path.display()));
    }
    std::fs::write(path, buf).with_context(|| format!("write process log {}", path.display()))
}

struct MarkerWatch {
    markers: Vec<String>,
    hit: AtomicBool,
    matched: Mutex<Option<String>>,
}

impl MarkerWatch {
    fn new(markers: &[&str]) -> Self {
        Self {
            markers: markers.iter().map(|m| (*m).to_string()).collect(),
            hit: AtomicBool::new(false),
            matched: Mutex::new(None),
        }
    }

    fn hit(&self) -> bool {
        self.hit.load(Ordering::SeqCst)
    }

    fn matched(&self) -> Option<String> {
        self.matched.lock().ok()?.clone()
    }

    /// Record the first marker found on a line, if any. Later matches are
    /// ignored; the first signal wins.
    fn check_line(&self, line: &str) {
        if self.hit() {
            return;
        }
        if let Some(marker) = self.markers.iter().find(|m| line.contains(m.as_str())) {
            if let Ok(mut slot) = self.matched.lock() {
                slot.get_or_insert_with(|| marker.clone());
            }
            self.hit.store(true, Ordering::SeqCst);
        }
    }
}

fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    watch: &MarkerWatch,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }
        watch.check_line(&String::from_utf8_lossy(&line));

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
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

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
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
    fn captures_output_and_exit_status() {
        let output = run_command(
            sh("echo out; echo err >&2"),
            None,
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
        assert_eq!(output.marker, None);
        assert!(!output.timed_out);
    }

    #[test]
    fn feeds_stdin_to_the_child() {
        let output = run_command(
            sh("cat"),
            Some(b"hello\n"),
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
    }

    #[test]
    fn kills_child_on_timeout() {
        let start = Instant::now();
        let output = run_command(
            sh("sleep 30"),
            None,
            Duration::from_millis(300),
            10_000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn marker_terminates_the_child_early() {
        let start = Instant::now();
        // Redirect the sleep's pipes so the reader threads see EOF as soon as
        // the shell itself is killed.
        let output = run_command_watching(
            sh("echo WORK_DONE; sleep 30 >/dev/null 2>&1"),
            None,
            Duration::from_secs(30),
            10_000,
            &["WORK_DONE"],
        )
        .expect("run");
        assert_eq!(output.marker.as_deref(), Some("WORK_DONE"));
        assert!(!output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn first_marker_in_slice_order_wins_within_a_line() {
        let output = run_command_watching(
            sh("echo TASK_COMPLETE"),
            None,
            Duration::from_secs(5),
            10_000,
            &["TASK_COMPLETE", "COMPLETE"],
        )
        .expect("run");
        assert_eq!(output.marker.as_deref(), Some("TASK_COMPLETE"));
    }

    #[test]
    fn output_beyond_the_limit_is_discarded_not_fatal() {
        let output = run_command(
            sh("yes x | head -c 100000"),
            None,
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert_eq!(output.stdout.len(), 1_000);
        assert!(output.stdout_truncated > 0);
    }

    #[test]
    fn process_log_records_streams_and_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/item.log");
        let output = run_command_watching(
            sh("echo STOP_HERE"),
            None,
            Duration::from_secs(5),
            10_000,
            &["STOP_HERE"],
        )
        .expect("run");

        write_process_log(&path, &output, 100_000).expect("write log");
        let log = std::fs::read_to_string(&path).expect("read log");
        assert!(log.contains("=== stdout ==="));
        assert!(log.contains("terminated early on marker STOP_HERE"));
    }
}
