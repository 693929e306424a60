// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors that can occur while controlling the process group of a test run.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not spawn the {name} process: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("The process {name} did not report as started within {timeout:?}.")]
    StartupTimeout { name: String, timeout: Duration },

    #[error("A child process did not start properly: {0}")]
    Startup(String),

    #[error("The monitored process has still not started.")]
    MonitoredProcessNotStarted,

    #[error("The monitored process has still not terminated.")]
    MonitoredProcessNotTerminated,

    #[error(
        "Expected the handler to have been running {expected} time(s), \
         but it ran only {actual} time(s)."
    )]
    HandlerRuns { expected: usize, actual: usize },

    #[error("Could not send '{line}' to {name}: {source}")]
    Ipc {
        name: String,
        line: String,
        source: std::io::Error,
    },

    #[error("Backend request failed: {0}")]
    BackendRequest(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_runs_error_message_names_both_counts() {
        let error = ControlError::HandlerRuns {
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            error.to_string(),
            "Expected the handler to have been running 2 time(s), but it ran only 1 time(s)."
        );
    }

    #[test]
    fn startup_timeout_names_the_process() {
        let error = ControlError::StartupTimeout {
            name: "backend mock".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(error.to_string().contains("backend mock"));
    }
}
