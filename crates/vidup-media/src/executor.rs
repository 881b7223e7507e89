//! Supervised execution of one external tool invocation.
//!
//! The executor owns the child process for the whole run: it streams output
//! records through the tool's progress grammar, watches the job's cancel token,
//! and on every exit path leaves no process and no partial artifacts behind.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use vidup_models::ProgressUpdate;

use crate::cancel::CancelToken;
use crate::command::ToolCommand;
use crate::reader::OutputRecordReader;

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Number of stderr lines kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// How a stage run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Succeeded,
    Failed {
        message: String,
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },
    Cancelled,
}

impl StageOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            exit_code: None,
            stderr_excerpt: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Bounded ring of recent stderr lines.
struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Most relevant line for a one-line failure message.
    fn headline(&self) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find(|l| l.contains("ERROR") || l.contains("Error") || l.contains("error"))
            .or_else(|| self.lines.back())
            .map(String::as_str)
    }

    fn excerpt(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Runs [`ToolCommand`]s under supervision.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    kill_grace: Duration,
}

impl Default for StageExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl StageExecutor {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run the command to completion, failure or cancellation.
    ///
    /// `on_progress` is called for every record the tool's profile recognises.
    /// Cancellation is checked before spawn, right after spawn, and after every
    /// output record.
    pub async fn run<F>(&self, cmd: &ToolCommand, cancel: &CancelToken, mut on_progress: F) -> StageOutcome
    where
        F: FnMut(ProgressUpdate) + Send,
    {
        let name = cmd.display_name().to_string();

        if cancel.is_cancelled() {
            debug!(tool = %name, "Cancelled before spawn");
            discard_artifacts(cmd).await;
            return StageOutcome::Cancelled;
        }

        debug!(tool = %name, "Running: {}", cmd);
        let started = Instant::now();

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so helpers the tool spawns are signalled too
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(tool = %name, "Failed to spawn: {}", e);
                discard_artifacts(cmd).await;
                return StageOutcome::failed(format!("Failed to start {}: {}", name, e));
            }
        };

        let (tx, mut rx) = mpsc::channel::<(Stream, String)>(256);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let mut tail = StderrTail::new(STDERR_TAIL_LINES);
        // Some tools report their error on stdout only
        let mut last_stdout: Option<String> = None;
        let mut cancelled = cancel.is_cancelled();

        while !cancelled {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => cancelled = true,
                record = rx.recv() => match record {
                    Some((stream, line)) => {
                        match cmd.profile.parse_line(&line) {
                            Some(update) => on_progress(update),
                            None if stream == Stream::Stderr => tail.push(line),
                            None => {
                                trace!(tool = %name, "{}", line);
                                if !line.trim().is_empty() {
                                    last_stdout = Some(line);
                                }
                            }
                        }
                        cancelled = cancel.is_cancelled();
                    }
                    None => break,
                },
            }
        }

        let status = if cancelled {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                status = child.wait() => Some(status),
            }
        };

        match status {
            None => {
                info!(tool = %name, "Cancellation requested, terminating process");
                self.terminate(&mut child, &name).await;
                discard_artifacts(cmd).await;
                StageOutcome::Cancelled
            }
            Some(Ok(status)) if status.success() => {
                debug!(
                    tool = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Process finished"
                );
                StageOutcome::Succeeded
            }
            Some(Ok(status)) => {
                discard_artifacts(cmd).await;
                let code = status.code();
                let mut message = match code {
                    Some(c) => format!("{} exited with code {}", name, c),
                    None => format!("{} was terminated by a signal", name),
                };
                if let Some(line) = tail.headline().or(last_stdout.as_deref()) {
                    message.push_str(": ");
                    message.push_str(line);
                }
                warn!(tool = %name, exit_code = ?code, "{}", message);
                StageOutcome::Failed {
                    message,
                    exit_code: code,
                    stderr_excerpt: tail.excerpt(),
                }
            }
            Some(Err(e)) => {
                self.terminate(&mut child, &name).await;
                discard_artifacts(cmd).await;
                StageOutcome::failed(format!("Failed waiting for {}: {}", name, e))
            }
        }
    }

    /// Graceful signal first, forced kill after the grace period.
    async fn terminate(&self, child: &mut Child, name: &str) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                debug!(tool = %name, "SIGTERM failed: {}", e);
            }
            if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                let _ = killpg(pgid, Signal::SIGKILL);
                return;
            }
            warn!(
                tool = %name,
                grace_secs = self.kill_grace.as_secs_f64(),
                "Process ignored SIGTERM, killing"
            );
            let _ = killpg(pgid, Signal::SIGKILL);
        }

        if let Err(e) = child.kill().await {
            debug!(tool = %name, "Kill failed: {}", e);
        }
    }
}

fn spawn_reader<R>(pipe: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = OutputRecordReader::new(pipe);
        loop {
            match reader.next_record().await {
                Ok(Some(line)) => {
                    if tx.send((stream, line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    });
}

/// Remove partial outputs of a run that did not succeed.
pub async fn discard_artifacts(cmd: &ToolCommand) {
    for path in &cmd.artifacts {
        remove_path(path).await;
    }
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        warn!(path = %path.display(), "Failed to remove partial output: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::progress::ToolProfile;
    use std::sync::{Arc, Mutex};

    fn sh(script: &str, profile: ToolProfile) -> ToolCommand {
        ToolCommand::new("sh", profile).arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_success_streams_progress() {
        let cmd = sh(
            "printf '[download]  10.0%%\\r[download]  55.5%% of 1MiB at 2MiB/s ETA 00:01\\n'",
            ToolProfile::YtDlp,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let outcome = StageExecutor::default()
            .run(&cmd, &CancelToken::new(), move |u| sink.lock().unwrap().push(u.percent))
            .await;

        assert_eq!(outcome, StageOutcome::Succeeded);
        assert_eq!(*seen.lock().unwrap(), vec![Some(10.0), Some(55.5)]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("partial.mp4");
        let script = format!(
            "echo data > {}; echo 'ERROR: unable to download video' >&2; exit 1",
            partial.display()
        );
        let cmd = sh(&script, ToolProfile::YtDlp).artifact(&partial);

        let outcome = StageExecutor::default().run(&cmd, &CancelToken::new(), |_| {}).await;

        match outcome {
            StageOutcome::Failed {
                message,
                exit_code,
                stderr_excerpt,
            } => {
                assert_eq!(exit_code, Some(1));
                assert!(message.contains("unable to download video"), "{message}");
                assert!(stderr_excerpt.contains("ERROR"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_failure_message_falls_back_to_stdout() {
        let cmd = sh("echo 'Conversion failed: no such stream'; exit 2", ToolProfile::Silent);
        let outcome = StageExecutor::default().run(&cmd, &CancelToken::new(), |_| {}).await;
        match outcome {
            StageOutcome::Failed { message, exit_code, .. } => {
                assert_eq!(exit_code, Some(2));
                assert!(message.ends_with("Conversion failed: no such stream"), "{message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_stage_failure() {
        let cmd = ToolCommand::new("/nonexistent/vidup-tool", ToolProfile::Silent);
        let outcome = StageExecutor::default().run(&cmd, &CancelToken::new(), |_| {}).await;
        assert!(matches!(outcome, StageOutcome::Failed { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_cancel_before_spawn() {
        let token = CancelToken::new();
        token.request_cancel();
        let cmd = sh("exit 0", ToolProfile::Silent);
        let outcome = StageExecutor::default().run(&cmd, &token, |_| {}).await;
        assert_eq!(outcome, StageOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_terminates_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("out.mp4");
        let script = format!("echo x > {}; echo started; exec sleep 30", partial.display());
        let cmd = sh(&script, ToolProfile::Silent).artifact(&partial);

        let token = CancelToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.request_cancel();
        });

        let started = Instant::now();
        let outcome = StageExecutor::new(Duration::from_secs(2))
            .run(&cmd, &token, |_| {})
            .await;

        assert_eq!(outcome, StageOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_ignored_sigterm_is_killed_after_grace() {
        let cmd = sh("trap '' TERM; echo ready; while true; do sleep 1; done", ToolProfile::Silent);
        let token = CancelToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.request_cancel();
        });

        let started = Instant::now();
        let outcome = StageExecutor::new(Duration::from_millis(300))
            .run(&cmd, &token, |_| {})
            .await;

        assert_eq!(outcome, StageOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
