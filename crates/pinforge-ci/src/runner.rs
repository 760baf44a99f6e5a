//! Subprocess execution with live line streaming.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RunnerError;
use crate::step::StepConfig;

/// Result of a step execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Step name.
    pub step_name: String,

    /// Exit code (0 = success, -1 when terminated by a signal).
    pub exit_code: i32,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process exited successfully.
    pub success: bool,
}

impl StepResult {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Step result with both output streams collected.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub result: StepResult,
    pub stdout: String,
    pub stderr: String,
}

/// Runs steps as child processes.
pub struct StepRunner;

impl StepRunner {
    /// Run a step, handing every line of its combined stdout/stderr to
    /// `on_line` as soon as it is read.
    ///
    /// Lines are passed without their terminator; invalid UTF-8 is replaced.
    /// The child is killed if the step's timeout elapses.
    pub async fn run_streaming<F>(
        config: &StepConfig,
        mut on_line: F,
    ) -> Result<StepResult, RunnerError>
    where
        F: FnMut(&str),
    {
        let start = Instant::now();

        if config.program.as_os_str().is_empty() {
            return Err(RunnerError::EmptyCommand(config.name.clone()));
        }

        debug!(step = %config.name, command = %config.display_command(), "Spawning step");

        let mut child = config
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        let pump = async {
            while let Some(line) = rx.recv().await {
                on_line(&line);
            }
            child.wait().await
        };

        let waited = if config.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(config.timeout_secs), pump).await
        } else {
            Ok(pump.await)
        };

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                for forwarder in &forwarders {
                    forwarder.abort();
                }
                return Err(RunnerError::TimedOut {
                    step: config.name.clone(),
                    timeout_secs: config.timeout_secs,
                });
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);

        Ok(StepResult {
            step_name: config.name.clone(),
            exit_code,
            duration_ms,
            success: status.success(),
        })
    }

    /// Run a step to completion and collect its output instead of
    /// streaming it.
    pub async fn run_captured(config: &StepConfig) -> Result<CapturedOutput, RunnerError> {
        let start = Instant::now();

        if config.program.as_os_str().is_empty() {
            return Err(RunnerError::EmptyCommand(config.name.clone()));
        }

        let child = config
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| RunnerError::TimedOut {
                step: config.name.clone(),
                timeout_secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(CapturedOutput {
            result: StepResult {
                step_name: config.name.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                duration_ms,
                success: output.status.success(),
            },
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if tx.send(line.to_string()).is_err() {
            return Ok(());
        }
    }
}
