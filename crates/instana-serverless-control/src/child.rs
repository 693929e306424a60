// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Handles for the child processes of a test run.
//!
//! Each child's stdout is consumed line by line. Every line is accumulated
//! for content queries (e.g. `runtime: terminating`, Lambda result lines),
//! and the line matching the configured readiness sentinel completes a
//! single-fire readiness signal. A duplicate readiness sentinel is reported
//! instead of silently absorbed, so a stub that starts twice shows up in the
//! logs rather than masquerading as healthy.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ControlError;

/// Description of one child process to spawn: a display name for logs and
/// errors, the stdout line that signals readiness, and the command itself.
pub struct ProcessSpec {
    pub name: String,
    pub ready_message: String,
    pub command: Command,
}

impl ProcessSpec {
    pub fn new(
        name: impl Into<String>,
        ready_message: impl Into<String>,
        command: Command,
    ) -> Self {
        ProcessSpec {
            name: name.into(),
            ready_message: ready_message.into(),
            command,
        }
    }
}

/// A spawned child process with its message log and readiness signal.
pub struct ChildHandle {
    name: String,
    child: Child,
    messages: Arc<Mutex<Vec<String>>>,
    ready_rx: watch::Receiver<bool>,
}

impl ChildHandle {
    /// Spawns the process with piped stdin/stdout and attaches the stdout
    /// line reader.
    pub fn spawn(mut spec: ProcessSpec) -> Result<ChildHandle, ControlError> {
        spec.command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        let mut child = spec.command.spawn().map_err(|source| ControlError::Spawn {
            name: spec.name.clone(),
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            return Err(ControlError::Spawn {
                name: spec.name,
                source: std::io::Error::other("stdout of the child process was not piped"),
            });
        };

        let messages = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = watch::channel(false);

        let reader_messages = Arc::clone(&messages);
        let name = spec.name.clone();
        let ready_message = spec.ready_message;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{name}: {line}");
                if line == ready_message {
                    if *ready_tx.borrow() {
                        warn!("{name} sent a duplicate readiness signal: {line}");
                    } else {
                        let _ = ready_tx.send(true);
                    }
                }
                if let Ok(mut messages) = reader_messages.lock() {
                    messages.push(line);
                }
            }
            // stdout EOF: the child is gone, dropping ready_tx wakes waiters.
        });

        Ok(ChildHandle {
            name: spec.name,
            child,
            messages,
            ready_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the readiness sentinel, bounded by `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ControlError> {
        let mut ready_rx = self.ready_rx.clone();
        let outcome = tokio::time::timeout(timeout, async move {
            loop {
                if *ready_rx.borrow_and_update() {
                    return true;
                }
                if ready_rx.changed().await.is_err() {
                    // Sender gone: the child exited without reporting ready.
                    return *ready_rx.borrow();
                }
            }
        })
        .await;

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(ControlError::Startup(format!(
                "The process {} exited before reporting as started.",
                self.name
            ))),
            Err(_) => Err(ControlError::StartupTimeout {
                name: self.name.clone(),
                timeout,
            }),
        }
    }

    /// A snapshot of all stdout lines received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn has_message(&self, message: &str) -> bool {
        self.messages().iter().any(|line| line == message)
    }

    /// Sends one line to the child's stdin.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ControlError> {
        let Some(stdin) = self.child.stdin.as_mut() else {
            return Err(ControlError::Ipc {
                name: self.name.clone(),
                line: line.to_string(),
                source: std::io::Error::other("stdin of the child process was not piped"),
            });
        };
        let framed = format!("{line}\n");
        stdin
            .write_all(framed.as_bytes())
            .await
            .map_err(|source| ControlError::Ipc {
                name: self.name.clone(),
                line: line.to_string(),
                source,
            })?;
        stdin.flush().await.map_err(|source| ControlError::Ipc {
            name: self.name.clone(),
            line: line.to_string(),
            source,
        })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kills the process and waits for it to exit. Teardown is best-effort:
    /// failures (e.g. the child died already) are logged, never propagated.
    pub async fn kill_and_wait(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Could not signal {}: {e}", self.name);
        }
        match self.child.wait().await {
            Ok(status) => debug!("{} exited with {status}", self.name),
            Err(e) => warn!("Error while waiting for {} to exit: {e}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_spec(name: &str, ready: &str, script: &str) -> ProcessSpec {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        ProcessSpec::new(name, ready, command)
    }

    #[tokio::test]
    async fn readiness_fires_on_the_sentinel_line() {
        let handle = ChildHandle::spawn(shell_spec(
            "fake backend",
            "backend: started",
            "echo 'backend: started'; sleep 30",
        ))
        .unwrap();

        handle
            .wait_until_ready(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(handle.has_message("backend: started"));
        handle.kill_and_wait().await;
    }

    #[tokio::test]
    async fn readiness_ignores_other_lines() {
        let handle = ChildHandle::spawn(shell_spec(
            "fake backend",
            "backend: started",
            "echo 'something else'; sleep 30",
        ))
        .unwrap();

        let result = handle.wait_until_ready(Duration::from_millis(300)).await;
        assert!(matches!(
            result,
            Err(ControlError::StartupTimeout { .. })
        ));
        handle.kill_and_wait().await;
    }

    #[tokio::test]
    async fn a_child_that_exits_without_the_sentinel_fails_startup() {
        let handle = ChildHandle::spawn(shell_spec(
            "fake backend",
            "backend: started",
            "echo 'crashing'; exit 1",
        ))
        .unwrap();

        let result = handle.wait_until_ready(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ControlError::Startup(_))));
        handle.kill_and_wait().await;
    }

    #[tokio::test]
    async fn duplicate_sentinels_do_not_break_readiness() {
        let handle = ChildHandle::spawn(shell_spec(
            "fake backend",
            "backend: started",
            "echo 'backend: started'; echo 'backend: started'; sleep 30",
        ))
        .unwrap();

        handle
            .wait_until_ready(Duration::from_secs(5))
            .await
            .unwrap();
        // Both lines are still visible in the accumulated message log.
        instana_test_util::retry(
            || async {
                let count = handle
                    .messages()
                    .iter()
                    .filter(|line| line.as_str() == "backend: started")
                    .count();
                if count == 2 {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("only saw {count} sentinel lines so far"))
                }
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        handle.kill_and_wait().await;
    }

    #[tokio::test]
    async fn lines_can_be_sent_to_the_child() {
        let mut handle = ChildHandle::spawn(shell_spec(
            "fake runtime",
            "runtime: started",
            "echo 'runtime: started'; read trigger; echo \"got: $trigger\"; sleep 30",
        ))
        .unwrap();

        handle
            .wait_until_ready(Duration::from_secs(5))
            .await
            .unwrap();
        handle.send_line("run-handler").await.unwrap();

        instana_test_util::retry(
            || async {
                if handle.has_message("got: run-handler") {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("the trigger echo has not arrived yet"))
                }
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        handle.kill_and_wait().await;
    }

    #[tokio::test]
    async fn kill_resolves_even_for_an_already_dead_child() {
        let mut handle =
            ChildHandle::spawn(shell_spec("short lived", "never sent", "exit 0")).unwrap();

        // Give the child a moment to exit, then kill must still resolve.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_running());
        handle.kill_and_wait().await;
    }
}
